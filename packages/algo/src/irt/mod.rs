//! Theta Estimator - Item Response Theory ability estimation
//!
//! Probability model (3PL, reduced for 1PL/2PL):
//! - P(correct | θ) = c + (1 - c) / (1 + exp(-a(θ - b)))
//!   - a: discrimination, b: difficulty, c: guessing floor
//!
//! Estimation:
//! - MLE via Newton-Raphson (Fisher scoring on the expected information),
//!   bounded iterations and step size; non-convergence returns the best estimate with an
//!   inflated standard error, a non-finite gradient falls back to θ = 0
//! - EAP over fixed quadrature nodes with a Gaussian prior
//!
//! Submodules:
//! - [`selection`] - next-item selection (Fisher / Kullback-Leibler information)
//! - [`calibration`] - EM-style batch calibration of item parameters

pub mod calibration;
pub mod selection;

use serde::{Deserialize, Serialize};

use crate::config::IrtConfig;
use crate::error::Result;
use crate::sanitize::{ensure_positive, logistic};
use crate::types::{ItemParameter, EPSILON};

pub use calibration::{CalibrationOutcome, ResponseMatrix};
pub use selection::{CalibratedItem, ItemSelection, SelectionStrategy};

/// Smallest standard error ever reported
const MIN_STANDARD_ERROR: f64 = 1e-3;

/// Quadrature span in prior standard deviations on each side of the mean
const QUADRATURE_SPAN: f64 = 4.0;

// ==================== Data Structures ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrtModel {
    OneParameter,
    TwoParameter,
    ThreeParameter,
}

impl IrtModel {
    /// Reduce an item to the parameters this model actually uses.
    pub fn reduce(&self, item: &ItemParameter) -> ItemParameter {
        match self {
            IrtModel::OneParameter => ItemParameter {
                discrimination: 1.0,
                difficulty: item.difficulty,
                guessing: 0.0,
            },
            IrtModel::TwoParameter => ItemParameter {
                guessing: 0.0,
                ..*item
            },
            IrtModel::ThreeParameter => *item,
        }
    }
}

/// Ability on the logit scale with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    pub theta: f64,
    pub standard_error: f64,
}

impl AbilityEstimate {
    pub fn new(theta: f64, standard_error: f64) -> Result<Self> {
        crate::sanitize::ensure_finite("ability.theta", theta)?;
        ensure_positive("ability.standard_error", standard_error)?;
        Ok(Self {
            theta,
            standard_error,
        })
    }

    /// Onboarding prior.
    pub fn prior(config: &IrtConfig) -> Self {
        Self {
            theta: config.prior_mean,
            standard_error: config.prior_sd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemResponse {
    pub item: ItemParameter,
    pub correct: bool,
}

impl ItemResponse {
    pub fn new(item: ItemParameter, correct: bool) -> Self {
        Self { item, correct }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    MaximumLikelihood,
    ExpectedAPosteriori,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimationOutcome {
    pub estimate: AbilityEstimate,
    pub method: EstimationMethod,
    pub iterations: usize,
    pub converged: bool,
}

/// Probability of a correct response for the full 3PL triple.
pub fn probability(theta: f64, item: &ItemParameter) -> f64 {
    let c = item.guessing;
    c + (1.0 - c) * logistic(item.discrimination * (theta - item.difficulty))
}

/// Fisher information of one item at `theta`.
///
/// `a²(P-c)²(1-P) / ((1-c)²P)`, which equals `a²P(1-P)` when c = 0.
pub fn item_information(theta: f64, item: &ItemParameter) -> f64 {
    let p = probability(theta, item).clamp(EPSILON, 1.0 - EPSILON);
    let c = item.guessing;
    let a = item.discrimination;
    let num = a * a * (p - c).powi(2) * (1.0 - p);
    let den = (1.0 - c).powi(2) * p;
    if den <= EPSILON {
        0.0
    } else {
        num / den
    }
}

// ==================== Quadrature ====================

/// Fixed quadrature grid over a Gaussian prior, kept in log space.
#[derive(Debug, Clone)]
pub(crate) struct Quadrature {
    pub nodes: Vec<f64>,
    pub log_prior: Vec<f64>,
}

impl Quadrature {
    pub fn new(mean: f64, sd: f64, points: usize) -> Self {
        let points = points.max(3);
        let lo = mean - QUADRATURE_SPAN * sd;
        let step = 2.0 * QUADRATURE_SPAN * sd / (points - 1) as f64;
        let nodes: Vec<f64> = (0..points).map(|k| lo + step * k as f64).collect();
        let log_prior = nodes
            .iter()
            .map(|&x| -0.5 * ((x - mean) / sd).powi(2))
            .collect();
        Self { nodes, log_prior }
    }

    /// Normalized posterior weights at every node.
    pub fn posterior(&self, responses: &[ItemResponse], model: IrtModel) -> Vec<f64> {
        let log_post: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.log_prior)
            .map(|(&theta, &lp)| lp + log_likelihood(theta, responses, model))
            .collect();

        let max = log_post.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let unnorm: Vec<f64> = log_post.iter().map(|&l| (l - max).exp()).collect();
        let total: f64 = unnorm.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            let uniform = 1.0 / self.nodes.len() as f64;
            return vec![uniform; self.nodes.len()];
        }
        unnorm.into_iter().map(|w| w / total).collect()
    }
}

fn log_likelihood(theta: f64, responses: &[ItemResponse], model: IrtModel) -> f64 {
    responses
        .iter()
        .map(|r| {
            let p = probability(theta, &model.reduce(&r.item)).clamp(EPSILON, 1.0 - EPSILON);
            if r.correct {
                p.ln()
            } else {
                (1.0 - p).ln()
            }
        })
        .sum()
}

// ==================== Estimator ====================

/// Ability estimator; stateless apart from its configuration.
#[derive(Debug, Clone, Default)]
pub struct ThetaEstimator {
    config: IrtConfig,
}

impl ThetaEstimator {
    pub fn new(config: IrtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IrtConfig {
        &self.config
    }

    /// Model-aware probability (the configured 1/2/3PL reduction applied).
    pub fn probability(&self, theta: f64, item: &ItemParameter) -> f64 {
        probability(theta, &self.config.model.reduce(item))
    }

    pub fn information(&self, theta: f64, item: &ItemParameter) -> f64 {
        item_information(theta, &self.config.model.reduce(item))
    }

    pub fn test_information(&self, theta: f64, responses: &[ItemResponse]) -> f64 {
        responses
            .iter()
            .map(|r| self.information(theta, &r.item))
            .sum()
    }

    /// Picks EAP when the MLE does not exist (no responses or a perfect pattern),
    /// MLE otherwise.
    pub fn estimate(&self, responses: &[ItemResponse]) -> Result<EstimationOutcome> {
        validate_responses(responses)?;
        let all_correct = responses.iter().all(|r| r.correct);
        let all_wrong = responses.iter().all(|r| !r.correct);
        if responses.is_empty() || all_correct || all_wrong {
            tracing::debug!(
                responses = responses.len(),
                "extreme response pattern, using EAP"
            );
            return self.estimate_eap(responses);
        }
        self.estimate_mle(responses)
    }

    /// Newton-Raphson maximum likelihood.
    pub fn estimate_mle(&self, responses: &[ItemResponse]) -> Result<EstimationOutcome> {
        validate_responses(responses)?;
        let cfg = &self.config;

        if responses.is_empty() {
            return Ok(EstimationOutcome {
                estimate: AbilityEstimate {
                    theta: cfg.prior_mean,
                    standard_error: cfg.max_standard_error,
                },
                method: EstimationMethod::MaximumLikelihood,
                iterations: 0,
                converged: false,
            });
        }

        let mut theta = cfg.prior_mean.clamp(cfg.theta_min, cfg.theta_max);
        let mut iterations = 0;
        let mut converged = false;
        let mut at_bound = false;

        for iter in 1..=cfg.max_iterations {
            iterations = iter;
            let (gradient, info) = self.score_and_information(theta, responses);

            if !gradient.is_finite() || !info.is_finite() {
                tracing::warn!(
                    iterations,
                    gradient,
                    "non-finite gradient in theta MLE, falling back to default"
                );
                return Ok(EstimationOutcome {
                    estimate: AbilityEstimate {
                        theta: 0.0,
                        standard_error: cfg.max_standard_error,
                    },
                    method: EstimationMethod::MaximumLikelihood,
                    iterations,
                    converged: false,
                });
            }
            if info < EPSILON {
                break;
            }

            let step = (gradient / info).clamp(-cfg.max_step, cfg.max_step);
            let next = (theta + step).clamp(cfg.theta_min, cfg.theta_max);
            let delta = (next - theta).abs();
            at_bound = (next <= cfg.theta_min && gradient < 0.0)
                || (next >= cfg.theta_max && gradient > 0.0);
            theta = next;

            if delta < cfg.tolerance {
                converged = !at_bound;
                break;
            }
        }

        let info = self.test_information(theta, responses);
        let mut se = standard_error_from_information(info, cfg.max_standard_error);
        if !converged {
            tracing::debug!(iterations, theta, at_bound, "theta MLE did not converge");
            se = (se * cfg.nonconvergence_se_inflation).min(cfg.max_standard_error);
        }

        Ok(EstimationOutcome {
            estimate: AbilityEstimate {
                theta,
                standard_error: se,
            },
            method: EstimationMethod::MaximumLikelihood,
            iterations,
            converged,
        })
    }

    /// Expected a posteriori estimate with the configured prior.
    pub fn estimate_eap(&self, responses: &[ItemResponse]) -> Result<EstimationOutcome> {
        self.estimate_eap_with_prior(
            responses,
            self.config.prior_mean,
            self.config.prior_sd,
            self.config.quadrature_points,
        )
    }

    pub fn estimate_eap_with_prior(
        &self,
        responses: &[ItemResponse],
        prior_mean: f64,
        prior_sd: f64,
        points: usize,
    ) -> Result<EstimationOutcome> {
        validate_responses(responses)?;
        crate::sanitize::ensure_finite("prior_mean", prior_mean)?;
        ensure_positive("prior_sd", prior_sd)?;

        let quad = Quadrature::new(prior_mean, prior_sd, points);
        let weights = quad.posterior(responses, self.config.model);

        let mean: f64 = quad.nodes.iter().zip(&weights).map(|(t, w)| t * w).sum();
        let var: f64 = quad
            .nodes
            .iter()
            .zip(&weights)
            .map(|(t, w)| w * (t - mean).powi(2))
            .sum();

        Ok(EstimationOutcome {
            estimate: AbilityEstimate {
                theta: mean,
                standard_error: var.sqrt().max(MIN_STANDARD_ERROR),
            },
            method: EstimationMethod::ExpectedAPosteriori,
            iterations: quad.nodes.len(),
            converged: true,
        })
    }

    /// Bayesian refinement of an existing estimate: the current estimate is the prior.
    pub fn refine(
        &self,
        current: &AbilityEstimate,
        responses: &[ItemResponse],
    ) -> Result<EstimationOutcome> {
        let sd = current
            .standard_error
            .clamp(self.config.min_prior_sd, self.config.max_standard_error);
        self.estimate_eap_with_prior(
            responses,
            current.theta,
            sd,
            self.config.quadrature_points,
        )
    }

    /// Posterior over the quadrature grid of the configured prior.
    pub(crate) fn posterior_grid(
        &self,
        responses: &[ItemResponse],
        prior_mean: f64,
        prior_sd: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        let quad = Quadrature::new(prior_mean, prior_sd, self.config.quadrature_points);
        let weights = quad.posterior(responses, self.config.model);
        (quad.nodes, weights)
    }

    fn score_and_information(&self, theta: f64, responses: &[ItemResponse]) -> (f64, f64) {
        let mut gradient = 0.0;
        let mut info = 0.0;
        for r in responses {
            let item = self.config.model.reduce(&r.item);
            let sigma = logistic(item.discrimination * (theta - item.difficulty));
            let p = (item.guessing + (1.0 - item.guessing) * sigma).clamp(EPSILON, 1.0 - EPSILON);
            let dp = item.discrimination * (1.0 - item.guessing) * sigma * (1.0 - sigma);
            let pq = p * (1.0 - p);
            let u = if r.correct { 1.0 } else { 0.0 };
            gradient += (u - p) * dp / pq;
            info += dp * dp / pq;
        }
        (gradient, info)
    }
}

fn standard_error_from_information(info: f64, max_se: f64) -> f64 {
    if info <= EPSILON || !info.is_finite() {
        max_se
    } else {
        (1.0 / info.sqrt()).clamp(MIN_STANDARD_ERROR, max_se)
    }
}

fn validate_responses(responses: &[ItemResponse]) -> Result<()> {
    for r in responses {
        r.item.validate()?;
    }
    Ok(())
}
