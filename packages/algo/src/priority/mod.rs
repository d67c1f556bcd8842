//! Priority Engine - learning-priority ranking of language objects
//!
//! Fixed application order:
//! 1. base: weighted features, clamped to [0, 1]
//! 2. mastery: inverted-U g(m) with scaffolding boost and stability dampening
//! 3. context: domain match, target skills, ZPD fit, association with recent objects
//! 4. transfer: ± transfer_fraction · base from native-language similarity
//! 5. additive urgency (retrievability deficit of due items) and bottleneck boost
//! 6. floor at 0
//!
//! Ranking sorts by (due for review desc, priority desc); equal keys keep input order.

pub mod zpd;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PriorityConfig;
use crate::error::Result;
use crate::fsrs::{is_mastered, MemoryCard, MemoryScheduler};
use crate::lexical::LexicalRelationIndex;
use crate::sanitize::{ensure_finite, ensure_in_range, ensure_non_negative, finite_or};
use crate::types::{FeatureVector, LanguageComponent, LanguageObject};

pub use zpd::{classify_zone, zpd_multiplier, zpd_score, Zone};

/// Per-object practice history of one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryRecord {
    /// Overall accuracy [0, 1]
    pub accuracy: f64,
    pub assisted_accuracy: Option<f64>,
    pub unassisted_accuracy: Option<f64>,
    pub stability_days: f64,
    pub retrievability: Option<f64>,
    pub due_for_review: bool,
    pub exposures: u32,
    /// Memory trace is stable enough to count as long-term mastery
    #[serde(default)]
    pub retained: bool,
}

impl MasteryRecord {
    pub fn new(accuracy: f64) -> Self {
        Self {
            accuracy,
            assisted_accuracy: None,
            unassisted_accuracy: None,
            stability_days: 0.0,
            retrievability: None,
            due_for_review: false,
            exposures: 0,
            retained: false,
        }
    }

    /// Mastery view of a memory card. Cards that were never rated are not "due".
    pub fn from_card(
        card: &MemoryCard,
        accuracy: f64,
        scheduler: &MemoryScheduler,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            accuracy,
            assisted_accuracy: None,
            unassisted_accuracy: None,
            stability_days: card.stability,
            retrievability: Some(scheduler.retrievability_at(card, now)),
            due_for_review: !card.is_new() && scheduler.is_due(card, now),
            exposures: card.reps,
            retained: is_mastered(card),
        }
    }

    pub fn with_scaffolding(mut self, assisted: f64, unassisted: f64) -> Self {
        self.assisted_accuracy = Some(assisted);
        self.unassisted_accuracy = Some(unassisted);
        self
    }

    pub fn scaffolding_gap(&self) -> Option<f64> {
        match (self.assisted_accuracy, self.unassisted_accuracy) {
            (Some(a), Some(u)) => Some(a - u),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure_in_range("mastery.accuracy", self.accuracy, 0.0, 1.0)?;
        if let Some(a) = self.assisted_accuracy {
            ensure_in_range("mastery.assisted_accuracy", a, 0.0, 1.0)?;
        }
        if let Some(u) = self.unassisted_accuracy {
            ensure_in_range("mastery.unassisted_accuracy", u, 0.0, 1.0)?;
        }
        ensure_non_negative("mastery.stability_days", self.stability_days)?;
        if let Some(r) = self.retrievability {
            ensure_in_range("mastery.retrievability", r, 0.0, 1.0)?;
        }
        Ok(())
    }
}

/// Native-language similarity per linguistic component, each in [-1, 1].
///
/// Positive values are facilitation (cognates), negative values interference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferProfile {
    pub native_language: Option<String>,
    pub coefficients: BTreeMap<LanguageComponent, f64>,
}

impl TransferProfile {
    pub fn coefficient(&self, component: LanguageComponent) -> f64 {
        self.coefficients
            .get(&component)
            .copied()
            .map(|c| finite_or(c, 0.0).clamp(-1.0, 1.0))
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub target_domain: Option<String>,
    pub target_skills: BTreeSet<String>,
    pub transfer: TransferProfile,
    /// Primary bottleneck component from the latest analysis
    pub bottleneck: Option<LanguageComponent>,
    /// Current ability; enables the ZPD fit
    pub theta: Option<f64>,
    /// Content of recently practiced objects
    pub recent_contents: Vec<String>,
    pub relations: Option<Arc<LexicalRelationIndex>>,
}

impl SessionContext {
    pub fn validate(&self) -> Result<()> {
        if let Some(theta) = self.theta {
            ensure_finite("context.theta", theta)?;
        }
        for (component, c) in &self.transfer.coefficients {
            ensure_in_range(
                &format!("context.transfer[{}]", component.as_str()),
                *c,
                -1.0,
                1.0,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityBreakdown {
    pub base: f64,
    pub mastery: f64,
    pub domain: f64,
    pub skill: f64,
    pub zpd: f64,
    pub association: f64,
    pub transfer: f64,
    pub urgency: f64,
    pub bottleneck: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityResult {
    pub object_id: String,
    pub priority: f64,
    pub due_for_review: bool,
    pub breakdown: PriorityBreakdown,
    pub rationale: String,
}

#[derive(Debug, Clone, Default)]
pub struct PriorityEngine {
    config: PriorityConfig,
}

impl PriorityEngine {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    pub fn base_score(&self, features: &FeatureVector, ctx: &SessionContext) -> f64 {
        let w = &self.config.weights;
        let domain_match = match &ctx.target_domain {
            Some(domain) => features.domain_share(domain),
            None => self.config.neutral_domain_match,
        };
        let score = w.frequency * features.frequency
            + w.relational_density * features.relational_density
            + w.domain_match * domain_match
            + w.morphological * features.morphological_score
            - w.phonological_difficulty * features.phonological_difficulty;
        finite_or(score, 0.0).clamp(0.0, 1.0)
    }

    /// g(m): inverted U over accuracy.
    pub fn mastery_curve(&self, accuracy: f64) -> f64 {
        let bands = &self.config.mastery;
        let m = finite_or(accuracy, 0.0).clamp(0.0, 1.0);
        if m < bands.foundation_upper {
            bands.foundation_multiplier
        } else if m <= bands.optimal_upper {
            bands.optimal_multiplier
        } else if m < bands.mastered_lower {
            let t = (m - bands.optimal_upper) / (bands.mastered_lower - bands.optimal_upper);
            bands.optimal_multiplier + t * (bands.mastered_multiplier - bands.optimal_multiplier)
        } else {
            bands.mastered_multiplier
        }
    }

    /// Full mastery adjustment; a missing record is a fresh object with multiplier 1.0.
    pub fn mastery_adjustment(&self, record: Option<&MasteryRecord>) -> f64 {
        let Some(record) = record else {
            return 1.0;
        };
        let bands = &self.config.mastery;
        let mut g = self.mastery_curve(record.accuracy);
        if record
            .scaffolding_gap()
            .is_some_and(|gap| gap > bands.scaffolding_gap_threshold)
        {
            g *= bands.scaffolding_boost;
        }
        if record.stability_days >= bands.stability_threshold_days {
            g *= bands.stability_dampening;
        }
        g
    }

    fn association(&self, object: &LanguageObject, ctx: &SessionContext) -> f64 {
        let Some(index) = &ctx.relations else {
            return 1.0;
        };
        let strongest = ctx
            .recent_contents
            .iter()
            .filter(|recent| **recent != object.content)
            .filter_map(|recent| index.relation(&object.content, recent))
            .map(|r| r.npmi)
            .fold(0.0, f64::max);
        1.0 + self.config.association_boost * strongest
    }

    pub fn score(
        &self,
        object: &LanguageObject,
        mastery: Option<&MasteryRecord>,
        ctx: &SessionContext,
    ) -> Result<PriorityResult> {
        ctx.validate()?;
        object.validate()?;
        if let Some(record) = mastery {
            record.validate()?;
        }
        let cfg = &self.config;

        let base = self.base_score(&object.features, ctx);
        let g = self.mastery_adjustment(mastery);

        let domain = match &ctx.target_domain {
            Some(d) if object.features.domain_share(d) >= cfg.domain_match_threshold => {
                cfg.domain_boost
            }
            _ => 1.0,
        };
        let skill = if ctx.target_skills.iter().any(|s| object.has_tag(s)) {
            cfg.skill_boost
        } else {
            1.0
        };
        let zpd = ctx
            .theta
            .map(|theta| zpd_multiplier(theta, object.item.difficulty, &cfg.zpd))
            .unwrap_or(1.0);
        let association = self.association(object, ctx);

        let mut value = base * g * domain * skill * zpd * association;

        let coefficient = ctx.transfer.coefficient(object.component);
        let transfer = -coefficient * cfg.transfer_fraction * base;
        value += transfer;

        let due = mastery.is_some_and(|m| m.due_for_review);
        let urgency = if due {
            let deficit = 1.0 - mastery.and_then(|m| m.retrievability).unwrap_or(0.0);
            cfg.urgency_weight * deficit.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let bottleneck = if ctx.bottleneck == Some(object.component) {
            cfg.bottleneck_boost
        } else {
            0.0
        };
        value += urgency + bottleneck;

        let priority = finite_or(value, 0.0).max(0.0);
        let breakdown = PriorityBreakdown {
            base,
            mastery: g,
            domain,
            skill,
            zpd,
            association,
            transfer,
            urgency,
            bottleneck,
        };
        let rationale = self.rationale(object, mastery, ctx, &breakdown);

        Ok(PriorityResult {
            object_id: object.id.clone(),
            priority,
            due_for_review: due,
            breakdown,
            rationale,
        })
    }

    fn rationale(
        &self,
        object: &LanguageObject,
        mastery: Option<&MasteryRecord>,
        ctx: &SessionContext,
        b: &PriorityBreakdown,
    ) -> String {
        let bands = &self.config.mastery;
        let mut parts = vec![format!("base {:.2}", b.base)];

        match mastery {
            None => parts.push("new object".to_string()),
            Some(m) if m.accuracy < bands.foundation_upper => {
                parts.push("building foundations".to_string())
            }
            Some(m) if m.accuracy <= bands.optimal_upper => {
                parts.push("in the optimal challenge zone".to_string())
            }
            Some(m) if m.accuracy >= bands.mastered_lower => {
                parts.push("largely mastered".to_string())
            }
            Some(_) => parts.push("approaching mastery".to_string()),
        }
        if b.domain > 1.0 {
            if let Some(domain) = &ctx.target_domain {
                parts.push(format!("matches domain '{domain}'"));
            }
        }
        if b.skill > 1.0 {
            parts.push("exercises a target skill".to_string());
        }
        if let Some(theta) = ctx.theta {
            match classify_zone(theta, object.item.difficulty, &self.config.zpd) {
                Zone::TooEasy => parts.push("below current level".to_string()),
                Zone::TooHard => parts.push("well above current level".to_string()),
                Zone::Proximal => {}
            }
        }
        if b.association > 1.0 {
            parts.push("associated with recent practice".to_string());
        }
        if b.transfer < 0.0 {
            parts.push("native-language transfer makes it easier".to_string());
        } else if b.transfer > 0.0 {
            parts.push("native-language interference".to_string());
        }
        if b.urgency > 0.0 {
            parts.push("due for review".to_string());
        }
        if b.bottleneck > 0.0 {
            parts.push(format!("targets {} bottleneck", object.component.as_str()));
        }
        parts.join("; ")
    }

    /// Score and rank candidates in parallel; output order is stable.
    pub fn rank(
        &self,
        objects: &[LanguageObject],
        mastery: &HashMap<String, MasteryRecord>,
        ctx: &SessionContext,
    ) -> Result<Vec<PriorityResult>> {
        ctx.validate()?;
        let mut results = objects
            .par_iter()
            .map(|object| self.score(object, mastery.get(&object.id), ctx))
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|a, b| {
            b.due_for_review
                .cmp(&a.due_for_review)
                .then_with(|| b.priority.total_cmp(&a.priority))
        });
        Ok(results)
    }

    /// Rank and write each object's priority back.
    pub fn refresh(
        &self,
        objects: &mut [LanguageObject],
        mastery: &HashMap<String, MasteryRecord>,
        ctx: &SessionContext,
    ) -> Result<Vec<PriorityResult>> {
        let ranked = self.rank(objects, mastery, ctx)?;
        let priorities: HashMap<&str, f64> = ranked
            .iter()
            .map(|r| (r.object_id.as_str(), r.priority))
            .collect();
        for object in objects.iter_mut() {
            if let Some(p) = priorities.get(object.id.as_str()) {
                object.priority = *p;
            }
        }
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LexicalConfig;

    fn word(id: &str, frequency: f64) -> LanguageObject {
        LanguageObject::new(id, id, LanguageComponent::Lexical).with_features(FeatureVector {
            frequency,
            relational_density: 0.5,
            ..Default::default()
        })
    }

    #[test]
    fn test_mastery_curve_inverted_u() {
        let engine = PriorityEngine::default();
        let low = engine.mastery_curve(0.05);
        let mid = engine.mastery_curve(0.5);
        let high = engine.mastery_curve(0.95);
        assert!(mid > low);
        assert!(mid > high);
        assert!((engine.mastery_curve(0.8) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_mastery_is_neutral() {
        let engine = PriorityEngine::default();
        assert_eq!(engine.mastery_adjustment(None), 1.0);
    }

    #[test]
    fn test_scaffolding_gap_boosts_and_stability_dampens() {
        let engine = PriorityEngine::default();
        let plain = MasteryRecord::new(0.5);
        let scaffolded = MasteryRecord::new(0.5).with_scaffolding(0.9, 0.4);
        let stable = MasteryRecord {
            stability_days: 40.0,
            ..MasteryRecord::new(0.5)
        };
        let g = engine.mastery_adjustment(Some(&plain));
        assert!(engine.mastery_adjustment(Some(&scaffolded)) > g);
        assert!(engine.mastery_adjustment(Some(&stable)) < g);
    }

    #[test]
    fn test_base_score_clamped() {
        let engine = PriorityEngine::default();
        let heavy = FeatureVector {
            phonological_difficulty: 1.0,
            ..Default::default()
        };
        let ctx = SessionContext {
            target_domain: Some("travel".into()),
            ..Default::default()
        };
        assert_eq!(engine.base_score(&heavy, &ctx), 0.0);
    }

    #[test]
    fn test_domain_and_skill_boost() {
        let engine = PriorityEngine::default();
        let mut features = FeatureVector {
            frequency: 0.5,
            ..Default::default()
        };
        features.domain_distribution.insert("travel".into(), 0.8);
        let object = LanguageObject::new("ticket", "ticket", LanguageComponent::Lexical)
            .with_features(features)
            .with_tags(["noun"]);

        let plain_ctx = SessionContext::default();
        let ctx = SessionContext {
            target_domain: Some("travel".into()),
            target_skills: ["noun".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let plain = engine.score(&object, None, &plain_ctx).unwrap();
        let boosted = engine.score(&object, None, &ctx).unwrap();
        assert_eq!(boosted.breakdown.domain, 1.3);
        assert_eq!(boosted.breakdown.skill, 1.2);
        assert!(boosted.priority > plain.priority);
        assert!(boosted.rationale.contains("travel"));
    }

    #[test]
    fn test_positive_transfer_lowers_priority() {
        let engine = PriorityEngine::default();
        let object = word("hotel", 0.6);
        let mut cognate = SessionContext::default();
        cognate
            .transfer
            .coefficients
            .insert(LanguageComponent::Lexical, 1.0);
        let mut interference = SessionContext::default();
        interference
            .transfer
            .coefficients
            .insert(LanguageComponent::Lexical, -1.0);

        let neutral = engine.score(&object, None, &SessionContext::default()).unwrap();
        let easier = engine.score(&object, None, &cognate).unwrap();
        let harder = engine.score(&object, None, &interference).unwrap();
        assert!(easier.priority < neutral.priority);
        assert!(harder.priority > neutral.priority);
        let bound = 0.125 * neutral.breakdown.base + 1e-12;
        assert!(easier.breakdown.transfer.abs() <= bound);
    }

    #[test]
    fn test_rank_due_first_then_priority() {
        let engine = PriorityEngine::default();
        let objects = vec![word("a", 0.9), word("b", 0.1), word("c", 0.5)];
        let mut mastery = HashMap::new();
        mastery.insert(
            "b".to_string(),
            MasteryRecord {
                due_for_review: true,
                retrievability: Some(0.4),
                ..MasteryRecord::new(0.5)
            },
        );
        let ranked = engine
            .rank(&objects, &mastery, &SessionContext::default())
            .unwrap();
        let ids: Vec<&str> = ranked.iter().map(|r| r.object_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!(ranked[0].breakdown.urgency > 0.0);
    }

    #[test]
    fn test_rank_ties_keep_insertion_order() {
        let engine = PriorityEngine::default();
        let objects = vec![word("x", 0.4), word("y", 0.4), word("z", 0.4)];
        let ranked = engine
            .rank(&objects, &HashMap::new(), &SessionContext::default())
            .unwrap();
        let ids: Vec<&str> = ranked.iter().map(|r| r.object_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_bottleneck_component_boosted() {
        let engine = PriorityEngine::default();
        let object = word("walk", 0.5);
        let ctx = SessionContext {
            bottleneck: Some(LanguageComponent::Lexical),
            ..Default::default()
        };
        let result = engine.score(&object, None, &ctx).unwrap();
        assert!((result.breakdown.bottleneck - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_association_with_recent_objects() {
        let engine = PriorityEngine::default();
        let corpus = ["a", "b", "x", "y", "a", "b", "z", "w", "a", "b", "q", "r"];
        let index = LexicalRelationIndex::build(
            &corpus,
            LexicalConfig {
                window: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let ctx = SessionContext {
            recent_contents: vec!["b".into()],
            relations: Some(Arc::new(index)),
            ..Default::default()
        };
        let result = engine.score(&word("a", 0.5), None, &ctx).unwrap();
        assert!((result.breakdown.association - 1.15).abs() < 1e-9);
    }

    #[test]
    fn test_refresh_writes_priority() {
        let engine = PriorityEngine::default();
        let mut objects = vec![word("a", 0.9), word("b", 0.2)];
        engine
            .refresh(&mut objects, &HashMap::new(), &SessionContext::default())
            .unwrap();
        assert!(objects[0].priority > objects[1].priority);
        assert!(objects.iter().all(|o| o.priority.is_finite() && o.priority >= 0.0));
    }

    #[test]
    fn test_rationale_names_difficulty_zone() {
        let engine = PriorityEngine::default();
        let hard = word("hard", 0.5).with_item(crate::types::ItemParameter {
            difficulty: 3.0,
            ..Default::default()
        });
        let ctx = SessionContext {
            theta: Some(0.0),
            ..Default::default()
        };
        let result = engine.score(&hard, None, &ctx).unwrap();
        assert!(result.rationale.contains("well above current level"));

        let near = engine.score(&word("near", 0.5), None, &ctx).unwrap();
        assert!(!near.rationale.contains("current level"));
    }

    #[test]
    fn test_non_finite_context_rejected() {
        let engine = PriorityEngine::default();
        let object = word("a", 0.5);
        let ctx = SessionContext {
            theta: Some(f64::NAN),
            ..Default::default()
        };
        let err = engine.score(&object, None, &ctx).unwrap_err();
        assert!(err.to_string().contains("context.theta"));
        assert!(engine.rank(&[object.clone()], &HashMap::new(), &ctx).is_err());

        let mut ctx = SessionContext::default();
        ctx.transfer
            .coefficients
            .insert(LanguageComponent::Lexical, f64::INFINITY);
        assert!(engine.score(&object, None, &ctx).is_err());
    }

    #[test]
    fn test_invalid_mastery_rejected() {
        let engine = PriorityEngine::default();
        let record = MasteryRecord::new(1.5);
        assert!(engine
            .score(&word("a", 0.5), Some(&record), &SessionContext::default())
            .is_err());
    }
}
