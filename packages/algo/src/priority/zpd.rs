//! Zone of proximal development on the logit scale.
//!
//! Gap = item difficulty b - learner θ. The fit is a Gaussian bump centred on the
//! configured optimal gap.

use serde::{Deserialize, Serialize};

use crate::config::ZpdConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    TooEasy,
    Proximal,
    TooHard,
}

pub fn zpd_score(theta: f64, difficulty: f64, config: &ZpdConfig) -> f64 {
    let gap = difficulty - theta;
    let distance = gap - config.optimal_gap;
    let width = config.width.max(0.1);
    (-distance.powi(2) / (2.0 * width.powi(2))).exp()
}

pub fn classify_zone(theta: f64, difficulty: f64, config: &ZpdConfig) -> Zone {
    let gap = difficulty - theta;
    if gap < config.too_easy_gap {
        Zone::TooEasy
    } else if gap > config.too_hard_gap {
        Zone::TooHard
    } else {
        Zone::Proximal
    }
}

/// Multiplier in [1 - w/2, 1 + w/2].
pub fn zpd_multiplier(theta: f64, difficulty: f64, config: &ZpdConfig) -> f64 {
    1.0 + config.weight * (zpd_score(theta, difficulty, config) - 0.5)
}
