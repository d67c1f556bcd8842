//! Bottleneck Analyzer - locates the linguistic component holding a learner back
//!
//! Components are scanned in cascade order (phonological → morphological → lexical →
//! syntactic → pragmatic). The primary bottleneck is the earliest component with at
//! least `min_samples` records and an error rate at or above `error_threshold`; every
//! later component above the threshold is reported as a cascading effect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::BottleneckConfig;
use crate::error::Result;
use crate::evaluation::{ErrorKind, EvaluationResult};
use crate::sanitize::ensure_in_range;
use crate::types::LanguageComponent;

/// One evaluated response attributed to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub component: LanguageComponent,
    pub correct: bool,
    pub score: f64,
    pub error: Option<ErrorKind>,
}

impl ComponentRecord {
    pub fn new(component: LanguageComponent, correct: bool, score: f64) -> Self {
        Self {
            component,
            correct,
            score,
            error: None,
        }
    }

    pub fn from_result(component: LanguageComponent, result: &EvaluationResult) -> Self {
        Self {
            component,
            correct: result.correct,
            score: result.score,
            error: result.error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentStats {
    pub samples: usize,
    pub errors: usize,
    pub error_rate: f64,
    pub mean_score: f64,
    pub error_kinds: BTreeMap<ErrorKind, usize>,
}

impl ComponentStats {
    pub fn dominant_error(&self) -> Option<ErrorKind> {
        self.error_kinds
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(kind, _)| *kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub primary: Option<LanguageComponent>,
    pub cascading: Vec<LanguageComponent>,
    /// min(samples / confidence_samples, 1) of the primary component
    pub confidence: f64,
    pub stats: BTreeMap<LanguageComponent, ComponentStats>,
    pub recommendations: Vec<String>,
}

impl BottleneckReport {
    pub fn has_bottleneck(&self) -> bool {
        self.primary.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BottleneckAnalyzer {
    config: BottleneckConfig,
}

impl BottleneckAnalyzer {
    pub fn new(config: BottleneckConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, records: &[ComponentRecord]) -> Result<BottleneckReport> {
        for (i, r) in records.iter().enumerate() {
            ensure_in_range(&format!("records[{i}].score"), r.score, 0.0, 1.0)?;
        }

        let mut stats: BTreeMap<LanguageComponent, ComponentStats> = BTreeMap::new();
        for record in records {
            let entry = stats.entry(record.component).or_default();
            entry.samples += 1;
            entry.mean_score += record.score;
            if !record.correct {
                entry.errors += 1;
                let kind = record.error.unwrap_or(ErrorKind::Substitution);
                *entry.error_kinds.entry(kind).or_insert(0) += 1;
            }
        }
        for entry in stats.values_mut() {
            entry.error_rate = entry.errors as f64 / entry.samples as f64;
            entry.mean_score /= entry.samples as f64;
        }

        let weak: Vec<LanguageComponent> = LanguageComponent::ALL
            .iter()
            .copied()
            .filter(|c| {
                stats.get(c).is_some_and(|s| {
                    s.samples >= self.config.min_samples
                        && s.error_rate >= self.config.error_threshold
                })
            })
            .collect();

        let primary = weak.first().copied();
        let cascading: Vec<LanguageComponent> = weak.iter().skip(1).copied().collect();
        let confidence = primary
            .and_then(|c| stats.get(&c))
            .map(|s| {
                (s.samples as f64 / self.config.confidence_samples.max(1) as f64).min(1.0)
            })
            .unwrap_or(0.0);

        let recommendations = recommend(primary, &cascading, &stats);

        if let Some(component) = primary {
            tracing::debug!(
                primary = component.as_str(),
                cascading = cascading.len(),
                confidence,
                "bottleneck detected"
            );
        }

        Ok(BottleneckReport {
            primary,
            cascading,
            confidence,
            stats,
            recommendations,
        })
    }
}

fn recommend(
    primary: Option<LanguageComponent>,
    cascading: &[LanguageComponent],
    stats: &BTreeMap<LanguageComponent, ComponentStats>,
) -> Vec<String> {
    let Some(component) = primary else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let focus = match component {
        LanguageComponent::Phonological => "listening and pronunciation drills",
        LanguageComponent::Morphological => "word-form and inflection practice",
        LanguageComponent::Lexical => "vocabulary recall and spelling",
        LanguageComponent::Syntactic => "sentence construction and word order",
        LanguageComponent::Pragmatic => "usage in context and register",
    };
    out.push(format!("Prioritize {} ({})", component.as_str(), focus));

    if let Some(kind) = stats.get(&component).and_then(|s| s.dominant_error()) {
        out.push(format!("Most frequent error: {}", kind.as_str()));
    }
    if !cascading.is_empty() {
        let names: Vec<&str> = cascading.iter().map(|c| c.as_str()).collect();
        out.push(format!(
            "Errors in {} may resolve once {} improves",
            names.join(", "),
            component.as_str()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(component: LanguageComponent, correct: usize, wrong: usize) -> Vec<ComponentRecord> {
        let mut out = Vec::new();
        for _ in 0..correct {
            out.push(ComponentRecord::new(component, true, 1.0));
        }
        for _ in 0..wrong {
            let mut r = ComponentRecord::new(component, false, 0.0);
            r.error = Some(ErrorKind::FormError);
            out.push(r);
        }
        out
    }

    #[test]
    fn test_earliest_weak_component_is_primary() {
        let mut history = records(LanguageComponent::Syntactic, 4, 6);
        history.extend(records(LanguageComponent::Morphological, 5, 5));
        history.extend(records(LanguageComponent::Lexical, 9, 1));

        let report = BottleneckAnalyzer::default().analyze(&history).unwrap();
        assert_eq!(report.primary, Some(LanguageComponent::Morphological));
        assert_eq!(report.cascading, vec![LanguageComponent::Syntactic]);
        assert!((report.confidence - 0.5).abs() < 1e-12);
        assert_eq!(report.recommendations.len(), 3);
    }

    #[test]
    fn test_too_few_samples_ignored() {
        let history = records(LanguageComponent::Phonological, 0, 3);
        let report = BottleneckAnalyzer::default().analyze(&history).unwrap();
        assert!(!report.has_bottleneck());
        assert_eq!(report.confidence, 0.0);
        assert_eq!(report.stats[&LanguageComponent::Phonological].error_rate, 1.0);
    }

    #[test]
    fn test_stats_and_dominant_error() {
        let history = records(LanguageComponent::Lexical, 2, 8);
        let report = BottleneckAnalyzer::default().analyze(&history).unwrap();
        let stats = &report.stats[&LanguageComponent::Lexical];
        assert_eq!(stats.samples, 10);
        assert!((stats.mean_score - 0.2).abs() < 1e-12);
        assert_eq!(stats.dominant_error(), Some(ErrorKind::FormError));
    }

    #[test]
    fn test_empty_history() {
        let report = BottleneckAnalyzer::default().analyze(&[]).unwrap();
        assert_eq!(report.primary, None);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_rejects_bad_score() {
        let bad = vec![ComponentRecord::new(LanguageComponent::Lexical, true, f64::NAN)];
        assert!(BottleneckAnalyzer::default().analyze(&bad).is_err());
    }
}
