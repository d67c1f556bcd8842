use serde::{Deserialize, Serialize};

use crate::error::{LexisError, Result};
use crate::irt::IrtModel;
use crate::sanitize::{
    ensure_all_finite, ensure_finite, ensure_in_range, ensure_non_negative, ensure_positive,
    ensure_probability,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrtConfig {
    pub model: IrtModel,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub quadrature_points: usize,
    pub prior_mean: f64,
    pub prior_sd: f64,
    /// Floor for the prior sd when refining from a previous estimate
    pub min_prior_sd: f64,
    pub theta_min: f64,
    pub theta_max: f64,
    /// Largest Newton-Raphson step per iteration
    pub max_step: f64,
    /// Multiplier applied to the standard error of a non-converged estimate
    pub nonconvergence_se_inflation: f64,
    pub max_standard_error: f64,
    pub calibration_max_cycles: usize,
    pub calibration_tolerance: f64,
    /// Added to the diagonal of the item Hessian during calibration
    pub hessian_ridge: f64,
}

impl Default for IrtConfig {
    fn default() -> Self {
        Self {
            model: IrtModel::TwoParameter,
            max_iterations: 50,
            tolerance: 0.001,
            quadrature_points: 41,
            prior_mean: 0.0,
            prior_sd: 1.0,
            min_prior_sd: 0.3,
            theta_min: -4.0,
            theta_max: 4.0,
            max_step: 1.0,
            nonconvergence_se_inflation: 1.5,
            max_standard_error: 10.0,
            calibration_max_cycles: 100,
            calibration_tolerance: 0.001,
            hessian_ridge: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub weights: [f64; 17],
    pub target_retention: f64,
    pub maximum_interval: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weights: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
            target_retention: 0.9,
            maximum_interval: 36500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub window: usize,
    /// Dunning log-likelihood threshold (3.84 ≈ p < 0.05)
    pub significance_threshold: f64,
    pub min_cooccurrence: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            window: 5,
            significance_threshold: 3.84,
            min_cooccurrence: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub frequency: f64,
    pub relational_density: f64,
    pub domain_match: f64,
    pub morphological: f64,
    pub phonological_difficulty: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            frequency: 0.35,
            relational_density: 0.2,
            domain_match: 0.2,
            morphological: 0.15,
            phonological_difficulty: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryBands {
    pub foundation_upper: f64,
    pub optimal_upper: f64,
    pub mastered_lower: f64,
    pub foundation_multiplier: f64,
    pub optimal_multiplier: f64,
    pub mastered_multiplier: f64,
    pub scaffolding_gap_threshold: f64,
    pub scaffolding_boost: f64,
    pub stability_threshold_days: f64,
    pub stability_dampening: f64,
}

impl Default for MasteryBands {
    fn default() -> Self {
        Self {
            foundation_upper: 0.2,
            optimal_upper: 0.7,
            mastered_lower: 0.9,
            foundation_multiplier: 1.2,
            optimal_multiplier: 1.5,
            mastered_multiplier: 0.5,
            scaffolding_gap_threshold: 0.2,
            scaffolding_boost: 1.2,
            stability_threshold_days: 21.0,
            stability_dampening: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZpdConfig {
    /// Preferred difficulty above current theta, in logits
    pub optimal_gap: f64,
    pub width: f64,
    pub weight: f64,
    pub too_easy_gap: f64,
    pub too_hard_gap: f64,
}

impl Default for ZpdConfig {
    fn default() -> Self {
        Self {
            optimal_gap: 0.3,
            width: 1.0,
            weight: 0.25,
            too_easy_gap: -1.5,
            too_hard_gap: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub weights: FeatureWeights,
    pub mastery: MasteryBands,
    pub zpd: ZpdConfig,
    /// Domain share at which an object counts as matching the session domain
    pub domain_match_threshold: f64,
    /// Domain-match feature used when the session has no target domain
    pub neutral_domain_match: f64,
    pub domain_boost: f64,
    pub skill_boost: f64,
    /// Largest multiplicative bonus from association with recent objects
    pub association_boost: f64,
    /// Transfer adjustment bound as a fraction of the base score
    pub transfer_fraction: f64,
    pub urgency_weight: f64,
    pub bottleneck_boost: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            weights: FeatureWeights::default(),
            mastery: MasteryBands::default(),
            zpd: ZpdConfig::default(),
            domain_match_threshold: 0.3,
            neutral_domain_match: 0.5,
            domain_boost: 1.3,
            skill_boost: 1.2,
            association_boost: 0.15,
            transfer_fraction: 0.125,
            urgency_weight: 0.2,
            bottleneck_boost: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Minimum NPMI for a lexical relation to become a `prefers` edge
    pub min_relation_strength: f64,
    pub max_propagation_steps: usize,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            min_relation_strength: 0.3,
            max_propagation_steps: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub min_allocation: f64,
    pub max_allocation: f64,
    pub pareto_samples: usize,
    pub seed: u64,
    pub shared_object_bonus: f64,
    /// Expected theta gain per sqrt(minute) of practice
    pub learning_rate: f64,
    pub risk_steepness: f64,
    /// Fraction of a related goal's progress that transfers
    pub transfer_rate: f64,
    pub cross_domain_similarity: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            min_allocation: 0.05,
            max_allocation: 0.8,
            pareto_samples: 20,
            seed: 42,
            shared_object_bonus: 1.5,
            learning_rate: 0.02,
            risk_steepness: 3.0,
            transfer_rate: 0.1,
            cross_domain_similarity: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub pass_threshold: f64,
    /// K factor of the per-object theta delta
    pub delta_k: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.6,
            delta_k: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BottleneckConfig {
    pub min_samples: usize,
    pub error_threshold: f64,
    /// Sample count at which confidence saturates
    pub confidence_samples: usize,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            error_threshold: 0.3,
            confidence_samples: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexisConfig {
    pub irt: IrtConfig,
    pub scheduler: SchedulerConfig,
    pub lexical: LexicalConfig,
    pub priority: PriorityConfig,
    pub constraint: ConstraintConfig,
    pub allocation: AllocationConfig,
    pub evaluator: EvaluatorConfig,
    pub bottleneck: BottleneckConfig,
}

impl LexisConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LEXIS_TARGET_RETENTION") {
            config.scheduler.target_retention =
                val.parse().unwrap_or(config.scheduler.target_retention);
        }
        if let Ok(val) = std::env::var("LEXIS_MAX_INTERVAL_DAYS") {
            config.scheduler.maximum_interval =
                val.parse().unwrap_or(config.scheduler.maximum_interval);
        }
        if let Ok(val) = std::env::var("LEXIS_IRT_MAX_ITERATIONS") {
            config.irt.max_iterations = val.parse().unwrap_or(config.irt.max_iterations);
        }
        if let Ok(val) = std::env::var("LEXIS_QUADRATURE_POINTS") {
            config.irt.quadrature_points = val.parse().unwrap_or(config.irt.quadrature_points);
        }
        if let Ok(val) = std::env::var("LEXIS_PARETO_SAMPLES") {
            config.allocation.pareto_samples =
                val.parse().unwrap_or(config.allocation.pareto_samples);
        }
        if let Ok(val) = std::env::var("LEXIS_ALLOCATION_SEED") {
            config.allocation.seed = val.parse().unwrap_or(config.allocation.seed);
        }
        if let Ok(val) = std::env::var("LEXIS_SIGNIFICANCE_THRESHOLD") {
            config.lexical.significance_threshold =
                val.parse().unwrap_or(config.lexical.significance_threshold);
        }

        config
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LexisError::malformed("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.irt.max_iterations == 0 {
            return Err(LexisError::malformed("irt.max_iterations", "must be >= 1"));
        }
        ensure_positive("irt.tolerance", self.irt.tolerance)?;
        if self.irt.quadrature_points < 3 || self.irt.quadrature_points % 2 == 0 {
            return Err(LexisError::malformed(
                "irt.quadrature_points",
                "must be an odd count >= 3",
            ));
        }
        ensure_finite("irt.prior_mean", self.irt.prior_mean)?;
        ensure_positive("irt.prior_sd", self.irt.prior_sd)?;
        ensure_positive("irt.min_prior_sd", self.irt.min_prior_sd)?;
        if self.irt.theta_min >= self.irt.theta_max {
            return Err(LexisError::malformed("irt.theta_min", "must be < theta_max"));
        }
        ensure_positive("irt.max_step", self.irt.max_step)?;
        ensure_in_range(
            "irt.nonconvergence_se_inflation",
            self.irt.nonconvergence_se_inflation,
            1.0,
            f64::MAX,
        )?;
        ensure_positive("irt.max_standard_error", self.irt.max_standard_error)?;
        ensure_all_finite("scheduler.weights", &self.scheduler.weights)?;
        ensure_probability("scheduler.target_retention", self.scheduler.target_retention)?;
        if self.scheduler.maximum_interval < 1.0 {
            return Err(LexisError::malformed(
                "scheduler.maximum_interval",
                "must be >= 1 day",
            ));
        }
        ensure_count("lexical.window", self.lexical.window)?;
        ensure_non_negative(
            "lexical.significance_threshold",
            self.lexical.significance_threshold,
        )?;
        self.priority.validate()?;
        ensure_in_range(
            "constraint.min_relation_strength",
            self.constraint.min_relation_strength,
            0.0,
            1.0,
        )?;
        ensure_count(
            "constraint.max_propagation_steps",
            self.constraint.max_propagation_steps,
        )?;
        ensure_in_range(
            "allocation.min_allocation",
            self.allocation.min_allocation,
            0.0,
            1.0,
        )?;
        ensure_in_range(
            "allocation.max_allocation",
            self.allocation.max_allocation,
            self.allocation.min_allocation,
            1.0,
        )?;
        ensure_count("allocation.pareto_samples", self.allocation.pareto_samples)?;
        ensure_positive(
            "allocation.shared_object_bonus",
            self.allocation.shared_object_bonus,
        )?;
        ensure_positive("allocation.learning_rate", self.allocation.learning_rate)?;
        ensure_positive("allocation.risk_steepness", self.allocation.risk_steepness)?;
        ensure_in_range("allocation.transfer_rate", self.allocation.transfer_rate, 0.0, 1.0)?;
        ensure_in_range(
            "allocation.cross_domain_similarity",
            self.allocation.cross_domain_similarity,
            0.0,
            1.0,
        )?;
        ensure_in_range(
            "evaluator.pass_threshold",
            self.evaluator.pass_threshold,
            0.0,
            1.0,
        )?;
        ensure_non_negative("evaluator.delta_k", self.evaluator.delta_k)?;
        ensure_count("bottleneck.min_samples", self.bottleneck.min_samples)?;
        ensure_in_range("bottleneck.error_threshold", self.bottleneck.error_threshold, 0.0, 1.0)?;
        ensure_count(
            "bottleneck.confidence_samples",
            self.bottleneck.confidence_samples,
        )?;
        Ok(())
    }
}

impl PriorityConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        ensure_non_negative("priority.weights.frequency", w.frequency)?;
        ensure_non_negative("priority.weights.relational_density", w.relational_density)?;
        ensure_non_negative("priority.weights.domain_match", w.domain_match)?;
        ensure_non_negative("priority.weights.morphological", w.morphological)?;
        ensure_non_negative(
            "priority.weights.phonological_difficulty",
            w.phonological_difficulty,
        )?;

        let m = &self.mastery;
        ensure_in_range("priority.mastery.foundation_upper", m.foundation_upper, 0.0, 1.0)?;
        ensure_in_range(
            "priority.mastery.optimal_upper",
            m.optimal_upper,
            m.foundation_upper,
            1.0,
        )?;
        ensure_in_range(
            "priority.mastery.mastered_lower",
            m.mastered_lower,
            m.optimal_upper,
            1.0,
        )?;
        ensure_positive("priority.mastery.foundation_multiplier", m.foundation_multiplier)?;
        ensure_positive("priority.mastery.optimal_multiplier", m.optimal_multiplier)?;
        ensure_positive("priority.mastery.mastered_multiplier", m.mastered_multiplier)?;
        ensure_in_range(
            "priority.mastery.scaffolding_gap_threshold",
            m.scaffolding_gap_threshold,
            0.0,
            1.0,
        )?;
        ensure_positive("priority.mastery.scaffolding_boost", m.scaffolding_boost)?;
        ensure_non_negative(
            "priority.mastery.stability_threshold_days",
            m.stability_threshold_days,
        )?;
        ensure_positive("priority.mastery.stability_dampening", m.stability_dampening)?;

        let z = &self.zpd;
        ensure_finite("priority.zpd.optimal_gap", z.optimal_gap)?;
        ensure_positive("priority.zpd.width", z.width)?;
        ensure_non_negative("priority.zpd.weight", z.weight)?;
        ensure_finite("priority.zpd.too_easy_gap", z.too_easy_gap)?;
        ensure_finite("priority.zpd.too_hard_gap", z.too_hard_gap)?;
        if z.too_easy_gap >= z.too_hard_gap {
            return Err(LexisError::malformed(
                "priority.zpd.too_easy_gap",
                "must be < too_hard_gap",
            ));
        }

        ensure_in_range("priority.domain_match_threshold", self.domain_match_threshold, 0.0, 1.0)?;
        ensure_in_range("priority.neutral_domain_match", self.neutral_domain_match, 0.0, 1.0)?;
        ensure_positive("priority.domain_boost", self.domain_boost)?;
        ensure_positive("priority.skill_boost", self.skill_boost)?;
        ensure_non_negative("priority.association_boost", self.association_boost)?;
        ensure_in_range("priority.transfer_fraction", self.transfer_fraction, 0.0, 1.0)?;
        ensure_non_negative("priority.urgency_weight", self.urgency_weight)?;
        ensure_non_negative("priority.bottleneck_boost", self.bottleneck_boost)?;
        Ok(())
    }
}

fn ensure_count(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(LexisError::malformed(field, "must be >= 1"));
    }
    Ok(())
}
