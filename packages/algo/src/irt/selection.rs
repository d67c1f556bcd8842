//! Next-item selection for adaptive testing.
//!
//! - Fisher: maximize item information at the current θ
//! - Kullback-Leibler: maximize KL(θ̂ ‖ θ) integrated over the posterior, which
//!   discriminates across the whole uncertainty band instead of a single point

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{AbilityEstimate, ItemResponse, ThetaEstimator};
use crate::error::{LexisError, Result};
use crate::types::{ItemParameter, EPSILON};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedItem {
    pub id: String,
    pub params: ItemParameter,
}

impl CalibratedItem {
    pub fn new(id: impl Into<String>, params: ItemParameter) -> Self {
        Self {
            id: id.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    FisherInformation,
    KullbackLeibler,
    /// KL while the standard error exceeds `se_threshold`, Fisher afterwards
    Adaptive { se_threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSelection {
    pub item_id: String,
    /// Information value of the winning item under the strategy used
    pub information: f64,
    pub strategy: SelectionStrategy,
}

impl ThetaEstimator {
    /// Select the unused item that is most informative for the current estimate.
    ///
    /// `responses` are the answers collected so far; KL selection needs them to form
    /// the posterior. Fails with `NoCandidate` once every pool item is used.
    pub fn select_next_item(
        &self,
        pool: &[CalibratedItem],
        used: &HashSet<String>,
        current: &AbilityEstimate,
        responses: &[ItemResponse],
        strategy: SelectionStrategy,
    ) -> Result<ItemSelection> {
        for item in pool {
            item.params.validate()?;
        }
        let available: Vec<&CalibratedItem> =
            pool.iter().filter(|i| !used.contains(&i.id)).collect();
        if available.is_empty() {
            return Err(LexisError::no_candidate("item selection"));
        }

        let resolved = match strategy {
            SelectionStrategy::Adaptive { se_threshold } => {
                if current.standard_error > se_threshold {
                    SelectionStrategy::KullbackLeibler
                } else {
                    SelectionStrategy::FisherInformation
                }
            }
            other => other,
        };

        let scores: Vec<f64> = match resolved {
            SelectionStrategy::KullbackLeibler => {
                // `current` already reflects `responses`; the grid starts from the population prior
                let (nodes, weights) = self.posterior_grid(
                    responses,
                    self.config.prior_mean,
                    self.config.prior_sd,
                );
                available
                    .iter()
                    .map(|item| self.posterior_kl(&item.params, current.theta, &nodes, &weights))
                    .collect()
            }
            _ => available
                .iter()
                .map(|item| self.information(current.theta, &item.params))
                .collect(),
        };

        // Strict comparison keeps the earliest pool item on ties
        let mut best = 0;
        for (idx, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[best] {
                best = idx;
            }
        }

        Ok(ItemSelection {
            item_id: available[best].id.clone(),
            information: scores[best],
            strategy: resolved,
        })
    }

    fn posterior_kl(
        &self,
        item: &ItemParameter,
        theta_hat: f64,
        nodes: &[f64],
        weights: &[f64],
    ) -> f64 {
        let p_hat = self.probability(theta_hat, item).clamp(EPSILON, 1.0 - EPSILON);
        nodes
            .iter()
            .zip(weights)
            .map(|(&theta, &w)| {
                let p = self.probability(theta, item).clamp(EPSILON, 1.0 - EPSILON);
                let kl = p_hat * (p_hat / p).ln() + (1.0 - p_hat) * ((1.0 - p_hat) / (1.0 - p)).ln();
                w * kl
            })
            .sum()
    }
}
