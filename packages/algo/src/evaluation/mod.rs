//! Multi-Layer Evaluator - scores a learner response against an expected answer
//!
//! Modes:
//! - binary: normalized exact match
//! - partial credit: weighted layer scores (lexical default: meaning 50%, spelling 30%,
//!   context fit 20%)
//! - range based: edit-distance tolerance against accepted variants
//! - rubric based: externally supplied criterion scores
//!
//! Batch theta delta per object: K · role_weight · (score - expected), where expected is
//! the IRT probability when ability and item parameters are known, else 0.5.

pub mod text;

use serde::{Deserialize, Serialize};

use crate::config::EvaluatorConfig;
use crate::error::{LexisError, Result};
use crate::irt::{probability, ItemResponse};
use crate::sanitize::{ensure_in_range, ensure_non_negative};
use crate::types::ItemParameter;

pub use text::{classify_error, levenshtein, normalize, similarity, token_overlap, ErrorKind};

/// Neutral expectation when no ability model is available
const NEUTRAL_EXPECTATION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    ExactMatch,
    Spelling,
    Meaning,
    ContextFit,
    TokenOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationLayer {
    pub name: String,
    pub kind: LayerKind,
    pub weight: f64,
}

impl EvaluationLayer {
    pub fn new(name: impl Into<String>, kind: LayerKind, weight: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub name: String,
    pub weight: f64,
    /// Score assigned by the external rater, [0, 1]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EvaluationMode {
    Binary,
    PartialCredit {
        layers: Vec<EvaluationLayer>,
    },
    RangeBased {
        accepted_variants: Vec<String>,
        max_edit_distance: usize,
    },
    RubricBased {
        criteria: Vec<RubricCriterion>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub mode: EvaluationMode,
    /// Overrides the evaluator-wide pass threshold
    #[serde(default)]
    pub pass_threshold: Option<f64>,
}

impl EvaluationConfig {
    pub fn binary() -> Self {
        Self {
            mode: EvaluationMode::Binary,
            pass_threshold: None,
        }
    }

    pub fn lexical_default() -> Self {
        Self {
            mode: EvaluationMode::PartialCredit {
                layers: vec![
                    EvaluationLayer::new("meaning", LayerKind::Meaning, 0.5),
                    EvaluationLayer::new("spelling", LayerKind::Spelling, 0.3),
                    EvaluationLayer::new("context", LayerKind::ContextFit, 0.2),
                ],
            },
            pass_threshold: None,
        }
    }

    pub fn range(variants: &[&str], max_edit_distance: usize) -> Self {
        Self {
            mode: EvaluationMode::RangeBased {
                accepted_variants: variants.iter().map(|v| v.to_string()).collect(),
                max_edit_distance,
            },
            pass_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedAnswer {
    pub text: String,
    #[serde(default)]
    pub accepted_synonyms: Vec<String>,
    /// Tokens a contextually appropriate answer must contain
    #[serde(default)]
    pub context_tokens: Vec<String>,
}

impl ExpectedAnswer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.accepted_synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_context(mut self, tokens: &[&str]) -> Self {
        self.context_tokens = tokens.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerScore {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub object_id: String,
    pub score: f64,
    pub correct: bool,
    pub layers: Vec<LayerScore>,
    pub error: Option<ErrorKind>,
}

impl EvaluationResult {
    pub fn to_response(&self, item: ItemParameter) -> ItemResponse {
        ItemResponse::new(item, self.correct)
    }
}

/// One object embedded in a multi-object task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub object_id: String,
    pub role_weight: f64,
    pub expected: ExpectedAnswer,
    pub response: String,
    pub config: EvaluationConfig,
    #[serde(default)]
    pub item: Option<ItemParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThetaDelta {
    pub object_id: String,
    pub expected: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
    pub composite: f64,
    pub results: Vec<EvaluationResult>,
    pub theta_deltas: Vec<ThetaDelta>,
}

impl BatchEvaluation {
    pub fn total_delta(&self) -> f64 {
        self.theta_deltas.iter().map(|d| d.delta).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiLayerEvaluator {
    config: EvaluatorConfig,
}

impl MultiLayerEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        object_id: &str,
        expected: &ExpectedAnswer,
        response: &str,
        config: &EvaluationConfig,
    ) -> Result<EvaluationResult> {
        let threshold = config.pass_threshold.unwrap_or(self.config.pass_threshold);
        ensure_in_range("evaluation.pass_threshold", threshold, 0.0, 1.0)?;

        let (score, correct, layers) = match &config.mode {
            EvaluationMode::Binary => {
                let s = exact_match(expected, response);
                (
                    s,
                    s >= 1.0,
                    vec![LayerScore {
                        name: "exact".to_string(),
                        score: s,
                        weight: 1.0,
                    }],
                )
            }
            EvaluationMode::PartialCredit { layers } => {
                let (score, scored) = weighted(
                    layers
                        .iter()
                        .map(|l| (l.name.clone(), l.weight, score_layer(l.kind, expected, response))),
                )?;
                (score, score >= threshold, scored)
            }
            EvaluationMode::RangeBased {
                accepted_variants,
                max_edit_distance,
            } => {
                let answer = normalize(response);
                let (distance, best) = std::iter::once(&expected.text)
                    .chain(accepted_variants.iter())
                    .map(|v| {
                        let v = normalize(v);
                        (levenshtein(&answer, &v), similarity(&answer, &v))
                    })
                    .min_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.total_cmp(&a.1)))
                    .unwrap_or((usize::MAX, 0.0));
                (
                    best,
                    distance <= *max_edit_distance,
                    vec![LayerScore {
                        name: "variant".to_string(),
                        score: best,
                        weight: 1.0,
                    }],
                )
            }
            EvaluationMode::RubricBased { criteria } => {
                for c in criteria {
                    ensure_in_range(&format!("rubric[{}].score", c.name), c.score, 0.0, 1.0)?;
                }
                let (score, scored) =
                    weighted(criteria.iter().map(|c| (c.name.clone(), c.weight, c.score)))?;
                (score, score >= threshold, scored)
            }
        };

        let error = if correct {
            None
        } else {
            Some(classify_error(&expected.text, response).unwrap_or(ErrorKind::Substitution))
        };

        Ok(EvaluationResult {
            object_id: object_id.to_string(),
            score,
            correct,
            layers,
            error,
        })
    }

    /// Evaluate every object of one task; `theta` enables IRT expectations.
    pub fn evaluate_batch(&self, items: &[BatchItem], theta: Option<f64>) -> Result<BatchEvaluation> {
        if items.is_empty() {
            return Err(LexisError::no_candidate("evaluation batch"));
        }
        for item in items {
            ensure_non_negative(&format!("batch[{}].role_weight", item.object_id), item.role_weight)?;
        }
        let total_weight: f64 = items.iter().map(|i| i.role_weight).sum();
        if total_weight <= 0.0 {
            return Err(LexisError::malformed("batch.role_weight", "weights sum to zero"));
        }

        let mut results = Vec::with_capacity(items.len());
        let mut theta_deltas = Vec::with_capacity(items.len());
        let mut composite = 0.0;

        for item in items {
            let result = self.evaluate(&item.object_id, &item.expected, &item.response, &item.config)?;
            let expected = match (theta, item.item) {
                (Some(t), Some(params)) => {
                    params.validate()?;
                    probability(t, &params)
                }
                _ => NEUTRAL_EXPECTATION,
            };
            let delta = self.config.delta_k * item.role_weight * (result.score - expected);
            composite += item.role_weight * result.score;
            theta_deltas.push(ThetaDelta {
                object_id: item.object_id.clone(),
                expected,
                delta,
            });
            results.push(result);
        }

        Ok(BatchEvaluation {
            composite: composite / total_weight,
            results,
            theta_deltas,
        })
    }
}

fn exact_match(expected: &ExpectedAnswer, response: &str) -> f64 {
    let answer = normalize(response);
    let hit = std::iter::once(&expected.text)
        .chain(expected.accepted_synonyms.iter())
        .any(|v| normalize(v) == answer);
    if hit {
        1.0
    } else {
        0.0
    }
}

fn score_layer(kind: LayerKind, expected: &ExpectedAnswer, response: &str) -> f64 {
    match kind {
        LayerKind::ExactMatch => exact_match(expected, response),
        LayerKind::Spelling => similarity(&normalize(response), &normalize(&expected.text)),
        LayerKind::Meaning => {
            if exact_match(expected, response) >= 1.0 {
                return 1.0;
            }
            std::iter::once(&expected.text)
                .chain(expected.accepted_synonyms.iter())
                .map(|v| token_overlap(v, response))
                .fold(0.0, f64::max)
        }
        LayerKind::ContextFit => {
            if expected.context_tokens.is_empty() {
                return 1.0;
            }
            let answer = text::tokens(response);
            let present = expected
                .context_tokens
                .iter()
                .filter(|t| answer.contains(&normalize(t)))
                .count();
            present as f64 / expected.context_tokens.len() as f64
        }
        LayerKind::TokenOverlap => token_overlap(&expected.text, response),
    }
}

fn weighted<I>(parts: I) -> Result<(f64, Vec<LayerScore>)>
where
    I: Iterator<Item = (String, f64, f64)>,
{
    let mut scored = Vec::new();
    let mut total_weight = 0.0;
    let mut sum = 0.0;
    for (name, weight, score) in parts {
        ensure_non_negative(&format!("layer[{name}].weight"), weight)?;
        total_weight += weight;
        sum += weight * score;
        scored.push(LayerScore {
            name,
            score,
            weight,
        });
    }
    if total_weight <= 0.0 {
        return Err(LexisError::malformed("layers", "weights sum to zero"));
    }
    Ok(((sum / total_weight).clamp(0.0, 1.0), scored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_mode() {
        let evaluator = MultiLayerEvaluator::default();
        let expected = ExpectedAnswer::new("Bonjour");
        let ok = evaluator
            .evaluate("w1", &expected, " bonjour! ", &EvaluationConfig::binary())
            .unwrap();
        assert!(ok.correct);
        assert_eq!(ok.score, 1.0);
        assert_eq!(ok.error, None);

        let miss = evaluator
            .evaluate("w1", &expected, "bonsoir", &EvaluationConfig::binary())
            .unwrap();
        assert!(!miss.correct);
        assert!(miss.error.is_some());
    }

    #[test]
    fn test_partial_credit_lexical_default() {
        let evaluator = MultiLayerEvaluator::default();
        let expected = ExpectedAnswer::new("receive").with_context(&["receive"]);
        let result = evaluator
            .evaluate("w2", &expected, "recieve", &EvaluationConfig::lexical_default())
            .unwrap();
        assert_eq!(result.layers.len(), 3);
        // meaning 0, spelling 5/7, context 0
        assert!((result.score - 0.3 * 5.0 / 7.0).abs() < 1e-9);
        assert!(!result.correct);
        assert_eq!(result.error, Some(ErrorKind::FormError));
    }

    #[test]
    fn test_synonym_counts_for_meaning() {
        let evaluator = MultiLayerEvaluator::default();
        let expected = ExpectedAnswer::new("big").with_synonyms(&["large"]);
        let result = evaluator
            .evaluate("w3", &expected, "large", &EvaluationConfig::lexical_default())
            .unwrap();
        // meaning 1.0, spelling 1 - 4/5, context 1.0 (no context tokens)
        assert!((result.score - 0.76).abs() < 1e-9);
        assert!(result.correct);
    }

    #[test]
    fn test_range_based_tolerance() {
        let evaluator = MultiLayerEvaluator::default();
        let expected = ExpectedAnswer::new("colour");
        let config = EvaluationConfig::range(&["color"], 1);
        assert!(evaluator.evaluate("w4", &expected, "colr", &config).unwrap().correct);
        assert!(!evaluator.evaluate("w4", &expected, "clr", &config).unwrap().correct);
    }

    #[test]
    fn test_rubric_based() {
        let evaluator = MultiLayerEvaluator::default();
        let config = EvaluationConfig {
            mode: EvaluationMode::RubricBased {
                criteria: vec![
                    RubricCriterion {
                        name: "grammar".into(),
                        weight: 1.0,
                        score: 0.8,
                    },
                    RubricCriterion {
                        name: "fluency".into(),
                        weight: 3.0,
                        score: 0.4,
                    },
                ],
            },
            pass_threshold: Some(0.5),
        };
        let result = evaluator
            .evaluate("essay", &ExpectedAnswer::new(""), "free text", &config)
            .unwrap();
        assert!((result.score - 0.5).abs() < 1e-9);
        assert!(result.correct);
    }

    #[test]
    fn test_rubric_rejects_out_of_range_score() {
        let config = EvaluationConfig {
            mode: EvaluationMode::RubricBased {
                criteria: vec![RubricCriterion {
                    name: "grammar".into(),
                    weight: 1.0,
                    score: 1.4,
                }],
            },
            pass_threshold: None,
        };
        assert!(MultiLayerEvaluator::default()
            .evaluate("x", &ExpectedAnswer::new(""), "", &config)
            .is_err());
    }

    #[test]
    fn test_batch_composite_and_deltas() {
        let evaluator = MultiLayerEvaluator::default();
        let items = vec![
            BatchItem {
                object_id: "verb".into(),
                role_weight: 2.0,
                expected: ExpectedAnswer::new("went"),
                response: "went".into(),
                config: EvaluationConfig::binary(),
                item: Some(ItemParameter::default()),
            },
            BatchItem {
                object_id: "noun".into(),
                role_weight: 1.0,
                expected: ExpectedAnswer::new("house"),
                response: "mouse".into(),
                config: EvaluationConfig::binary(),
                item: None,
            },
        ];
        let batch = evaluator.evaluate_batch(&items, Some(0.0)).unwrap();
        assert!((batch.composite - 2.0 / 3.0).abs() < 1e-9);
        // theta 0, b 0 → expected 0.5 for both
        assert!((batch.theta_deltas[0].delta - 0.3 * 2.0 * 0.5).abs() < 1e-9);
        assert!((batch.theta_deltas[1].delta + 0.3 * 0.5).abs() < 1e-9);
        assert!(batch.total_delta() > 0.0);
    }

    #[test]
    fn test_empty_batch_is_no_candidate() {
        let err = MultiLayerEvaluator::default()
            .evaluate_batch(&[], None)
            .unwrap_err();
        assert!(err.is_no_candidate());
    }

    #[test]
    fn test_mode_serde_tagged() {
        let config = EvaluationConfig::range(&["gray"], 1);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"mode\":\"range_based\""));
        let back: EvaluationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_to_response() {
        let result = EvaluationResult {
            object_id: "w".into(),
            score: 1.0,
            correct: true,
            layers: vec![],
            error: None,
        };
        assert!(result.to_response(ItemParameter::default()).correct);
    }
}
