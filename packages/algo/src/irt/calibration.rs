//! Pilot-data item calibration.
//!
//! EM-style alternation:
//! 1. EAP pass: person abilities given the current item parameters (parallel per person)
//! 2. Gradient pass: one regularized Fisher-scoring step on (a, b) per item given the
//!    abilities; the guessing floor stays at its initial value
//!
//! Parameters are clamped after every step: a ∈ [0.2, 3.0], b ∈ [-4, 4].

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{AbilityEstimate, ItemResponse, ThetaEstimator};
use crate::error::{LexisError, Result};
use crate::sanitize::logistic;
use crate::types::{ItemParameter, EPSILON};

/// Largest change of a or b in a single gradient pass
const MAX_PARAM_STEP: f64 = 0.5;

/// Persons × items; `None` where the person never saw the item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMatrix {
    pub rows: Vec<Vec<Option<bool>>>,
}

impl ResponseMatrix {
    pub fn new(rows: Vec<Vec<Option<bool>>>) -> Self {
        Self { rows }
    }

    pub fn person_count(&self) -> usize {
        self.rows.len()
    }

    pub fn item_count(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    fn validate(&self, item_count: usize) -> Result<()> {
        if self.rows.is_empty() || item_count == 0 {
            return Err(LexisError::no_candidate("item calibration"));
        }
        if let Some((idx, _)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != item_count)
        {
            return Err(LexisError::malformed(
                format!("responses[{idx}]"),
                format!("expected {item_count} items"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub items: Vec<ItemParameter>,
    pub abilities: Vec<AbilityEstimate>,
    pub cycles: usize,
    pub converged: bool,
    /// Largest parameter change in the final cycle
    pub max_delta: f64,
}

impl ThetaEstimator {
    pub fn calibrate(
        &self,
        matrix: &ResponseMatrix,
        initial: &[ItemParameter],
    ) -> Result<CalibrationOutcome> {
        matrix.validate(initial.len())?;
        for item in initial {
            item.validate()?;
        }

        let cfg = self.config();
        let mut items: Vec<ItemParameter> = initial.iter().map(|i| i.clamped()).collect();
        let mut cycles = 0;
        let mut converged = false;
        let mut max_delta = f64::INFINITY;

        for cycle in 1..=cfg.calibration_max_cycles {
            cycles = cycle;
            let thetas: Vec<f64> = self
                .person_abilities(matrix, &items)?
                .iter()
                .map(|a| a.theta)
                .collect();

            let updated: Vec<ItemParameter> = items
                .par_iter()
                .enumerate()
                .map(|(j, item)| self.item_step(j, item, matrix, &thetas))
                .collect();

            max_delta = items
                .iter()
                .zip(&updated)
                .map(|(old, new)| {
                    (old.discrimination - new.discrimination)
                        .abs()
                        .max((old.difficulty - new.difficulty).abs())
                })
                .fold(0.0, f64::max);
            items = updated;

            if max_delta < cfg.calibration_tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            tracing::warn!(cycles, max_delta, "item calibration hit the cycle cap");
        }

        let abilities = self.person_abilities(matrix, &items)?;
        Ok(CalibrationOutcome {
            items,
            abilities,
            cycles,
            converged,
            max_delta,
        })
    }

    fn person_abilities(
        &self,
        matrix: &ResponseMatrix,
        items: &[ItemParameter],
    ) -> Result<Vec<AbilityEstimate>> {
        matrix
            .rows
            .par_iter()
            .map(|row| {
                let responses: Vec<ItemResponse> = row
                    .iter()
                    .zip(items)
                    .filter_map(|(u, item)| u.map(|correct| ItemResponse::new(*item, correct)))
                    .collect();
                self.estimate_eap(&responses).map(|o| o.estimate)
            })
            .collect()
    }

    /// One regularized Fisher-scoring step for a single item.
    fn item_step(
        &self,
        j: usize,
        item: &ItemParameter,
        matrix: &ResponseMatrix,
        thetas: &[f64],
    ) -> ItemParameter {
        let a = item.discrimination;
        let b = item.difficulty;
        let c = item.guessing;

        let mut g_a = 0.0;
        let mut g_b = 0.0;
        let mut h_aa = 0.0;
        let mut h_bb = 0.0;
        let mut h_ab = 0.0;
        let mut observed = 0usize;

        for (row, &theta) in matrix.rows.iter().zip(thetas) {
            let Some(correct) = row[j] else { continue };
            observed += 1;
            let sigma = logistic(a * (theta - b));
            let p = (c + (1.0 - c) * sigma).clamp(EPSILON, 1.0 - EPSILON);
            let dp_dz = (1.0 - c) * sigma * (1.0 - sigma);
            let pq = p * (1.0 - p);
            let u = if correct { 1.0 } else { 0.0 };
            let resid = (u - p) * dp_dz / pq;
            let w = dp_dz * dp_dz / pq;
            let dz_da = theta - b;
            let dz_db = -a;

            g_a += resid * dz_da;
            g_b += resid * dz_db;
            h_aa -= w * dz_da * dz_da;
            h_bb -= w * dz_db * dz_db;
            h_ab -= w * dz_da * dz_db;
        }

        if observed == 0 {
            return *item;
        }

        let ridge = self.config().hessian_ridge;
        h_aa -= ridge;
        h_bb -= ridge;

        let det = h_aa * h_bb - h_ab * h_ab;
        if det.abs() < EPSILON || !det.is_finite() {
            return *item;
        }

        // Newton step d = -H⁻¹ g
        let step_a = -(h_bb * g_a - h_ab * g_b) / det;
        let step_b = -(-h_ab * g_a + h_aa * g_b) / det;
        if !step_a.is_finite() || !step_b.is_finite() {
            return *item;
        }

        ItemParameter {
            discrimination: a + step_a.clamp(-MAX_PARAM_STEP, MAX_PARAM_STEP),
            difficulty: b + step_b.clamp(-MAX_PARAM_STEP, MAX_PARAM_STEP),
            guessing: c,
        }
        .clamped()
    }
}
