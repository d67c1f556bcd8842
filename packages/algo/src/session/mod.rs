//! Session Planner - one learner, one practice session
//!
//! Pipeline (single thread of control per learner):
//! 1. estimate: refine or estimate θ from the new responses
//! 2. diagnose: bottleneck analysis of the component history
//! 3. schedule view: memory cards → mastery records
//! 4. rank: priority scores, written back onto the candidate pool
//! 5. propagate: consistent selection over the ranked pool
//! 6. allocate: time shares across active curriculum goals
//! 7. task specs for the content-generation service
//!
//! `commit` closes the loop after practice: batch evaluation → θ update, card reviews.
//! Nothing here is shared between learners; `plan_many` runs learners in parallel.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::allocation::{AllocationPolicy, AllocationResult, CurriculumGoal, MultiGoalAllocator};
use crate::bottleneck::{BottleneckAnalyzer, BottleneckReport, ComponentRecord};
use crate::config::{LexisConfig, MasteryBands};
use crate::constraint::{ConstraintGraph, ConstraintPropagator, RuleTable, Selection};
use crate::error::{LexisError, Result};
use crate::evaluation::BatchEvaluation;
use crate::fsrs::{MemoryCard, MemoryScheduler, Rating};
use crate::irt::{AbilityEstimate, EstimationOutcome, ItemResponse, ThetaEstimator};
use crate::lexical::LexicalRelationIndex;
use crate::priority::{MasteryRecord, PriorityEngine, PriorityResult, SessionContext, TransferProfile};
use crate::sanitize::ensure_in_range;
use crate::types::{LanguageComponent, LanguageObject, TaskFormat};

/// Response time assumed when the host did not record one
const DEFAULT_RESPONSE_MS: i64 = 3000;

/// Read-consistent view of one learner, supplied by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnerSnapshot {
    pub learner_id: String,
    pub ability: Option<AbilityEstimate>,
    /// Responses not yet folded into `ability`
    #[serde(default)]
    pub responses: Vec<ItemResponse>,
    #[serde(default)]
    pub cards: HashMap<String, MemoryCard>,
    /// Per-object accuracy [0, 1]
    #[serde(default)]
    pub accuracy: HashMap<String, f64>,
    #[serde(default)]
    pub history: Vec<ComponentRecord>,
    #[serde(default)]
    pub goals: Vec<CurriculumGoal>,
    #[serde(default)]
    pub transfer: TransferProfile,
    #[serde(default)]
    pub recent_contents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub budget_minutes: f64,
    pub max_objects: usize,
    pub policy: AllocationPolicy,
    #[serde(default)]
    pub target_domain: Option<String>,
    #[serde(default)]
    pub target_skills: BTreeSet<String>,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self {
            budget_minutes: 30.0,
            max_objects: 10,
            policy: AllocationPolicy::Balanced,
            target_domain: None,
            target_skills: BTreeSet::new(),
        }
    }
}

/// Task handed to the external content-generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub object_id: String,
    pub target_difficulty: f64,
    pub format: TaskFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPlan {
    pub learner_id: String,
    pub ability: AbilityEstimate,
    pub estimation: Option<EstimationOutcome>,
    pub bottleneck: BottleneckReport,
    pub ranked: Vec<PriorityResult>,
    pub selection: Selection,
    /// `None` when the learner has no active goal
    pub allocation: Option<AllocationResult>,
    pub tasks: Vec<TaskSpec>,
}

/// State the host commits back after a practiced session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub ability: AbilityEstimate,
    pub cards: HashMap<String, MemoryCard>,
    pub intervals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct SessionPlanner {
    config: LexisConfig,
    estimator: ThetaEstimator,
    scheduler: MemoryScheduler,
    priority: PriorityEngine,
    propagator: ConstraintPropagator,
    allocator: MultiGoalAllocator,
    bottleneck: BottleneckAnalyzer,
}

impl SessionPlanner {
    pub fn new(config: LexisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            estimator: ThetaEstimator::new(config.irt.clone()),
            scheduler: MemoryScheduler::new(config.scheduler.clone())?,
            priority: PriorityEngine::new(config.priority.clone()),
            propagator: ConstraintPropagator::new(config.constraint.clone()),
            allocator: MultiGoalAllocator::new(config.allocation.clone()),
            bottleneck: BottleneckAnalyzer::new(config.bottleneck.clone()),
            config,
        })
    }

    pub fn config(&self) -> &LexisConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &MemoryScheduler {
        &self.scheduler
    }

    pub fn plan(
        &self,
        snapshot: &LearnerSnapshot,
        objects: &[LanguageObject],
        relations: Option<Arc<LexicalRelationIndex>>,
        rules: &RuleTable,
        request: &SessionRequest,
        now: DateTime<Utc>,
    ) -> Result<SessionPlan> {
        if objects.is_empty() {
            return Err(LexisError::no_candidate("session pool"));
        }

        // 1. estimate
        let (ability, estimation) = self.current_ability(snapshot)?;

        // 2. diagnose
        let bottleneck = self.bottleneck.analyze(&snapshot.history)?;

        // 3. schedule view
        let mastery = self.mastery_records(snapshot, objects, now)?;

        // 4. rank
        let ctx = SessionContext {
            target_domain: request.target_domain.clone(),
            target_skills: request.target_skills.clone(),
            transfer: snapshot.transfer.clone(),
            bottleneck: bottleneck.primary,
            theta: Some(ability.theta),
            recent_contents: snapshot.recent_contents.clone(),
            relations: relations.clone(),
        };
        let mut pool = objects.to_vec();
        let ranked = self.priority.refresh(&mut pool, &mastery, &ctx)?;

        // 5. propagate
        let graph = ConstraintGraph::build(
            &pool,
            relations.as_deref(),
            rules,
            &self.config.constraint,
        )?;
        let selection = self.propagator.select(&ranked, &graph, request.max_objects)?;

        // 6. allocate
        let allocation = if snapshot.goals.is_empty() {
            None
        } else {
            match self.allocator.allocate(
                &snapshot.goals,
                request.budget_minutes,
                request.policy,
                now,
            ) {
                Ok(result) => Some(result),
                Err(err) if err.is_no_candidate() => {
                    tracing::debug!(learner = %snapshot.learner_id, "no active goal to allocate");
                    None
                }
                Err(err) => return Err(err),
            }
        };

        // 7. task specs
        let by_id: HashMap<&str, &LanguageObject> =
            pool.iter().map(|o| (o.id.as_str(), o)).collect();
        let target_difficulty = ability.theta + self.config.priority.zpd.optimal_gap;
        let tasks = selection
            .selected
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .map(|object| TaskSpec {
                object_id: object.id.clone(),
                target_difficulty,
                format: choose_format(
                    object.component,
                    mastery.get(&object.id),
                    &self.config.priority.mastery,
                ),
            })
            .collect();

        tracing::debug!(
            learner = %snapshot.learner_id,
            theta = ability.theta,
            ranked = ranked.len(),
            selected = selection.selected.len(),
            "session planned"
        );

        Ok(SessionPlan {
            learner_id: snapshot.learner_id.clone(),
            ability,
            estimation,
            bottleneck,
            ranked,
            selection,
            allocation,
            tasks,
        })
    }

    /// Plan independent learners in parallel; results keep input order.
    pub fn plan_many(
        &self,
        learners: &[(LearnerSnapshot, SessionRequest)],
        objects: &[LanguageObject],
        relations: Option<Arc<LexicalRelationIndex>>,
        rules: &RuleTable,
        now: DateTime<Utc>,
    ) -> Vec<Result<SessionPlan>> {
        learners
            .par_iter()
            .map(|(snapshot, request)| {
                self.plan(snapshot, objects, relations.clone(), rules, request, now)
            })
            .collect()
    }

    /// Fold a practiced batch back into ability and memory state.
    pub fn commit(
        &self,
        ability: &AbilityEstimate,
        cards: &HashMap<String, MemoryCard>,
        batch: &BatchEvaluation,
        response_times_ms: &HashMap<String, i64>,
        now: DateTime<Utc>,
    ) -> Result<SessionUpdate> {
        let theta = (ability.theta + batch.total_delta())
            .clamp(self.config.irt.theta_min, self.config.irt.theta_max);
        let ability = AbilityEstimate::new(theta, ability.standard_error)?;

        let mut updated = HashMap::new();
        let mut intervals = BTreeMap::new();
        for result in &batch.results {
            let card = cards.get(&result.object_id).cloned().unwrap_or_default();
            let millis = response_times_ms
                .get(&result.object_id)
                .copied()
                .unwrap_or(DEFAULT_RESPONSE_MS);
            let rating = Rating::from_response(result.correct, millis);
            let outcome = self.scheduler.review(&card, rating, now)?;
            intervals.insert(result.object_id.clone(), outcome.interval_days);
            updated.insert(result.object_id.clone(), outcome.card);
        }

        Ok(SessionUpdate {
            ability,
            cards: updated,
            intervals,
        })
    }

    fn current_ability(
        &self,
        snapshot: &LearnerSnapshot,
    ) -> Result<(AbilityEstimate, Option<EstimationOutcome>)> {
        if let Some(current) = &snapshot.ability {
            AbilityEstimate::new(current.theta, current.standard_error)?;
        }
        if snapshot.responses.is_empty() {
            let ability = snapshot
                .ability
                .unwrap_or_else(|| AbilityEstimate::prior(&self.config.irt));
            return Ok((ability, None));
        }
        let outcome = match &snapshot.ability {
            Some(current) => self.estimator.refine(current, &snapshot.responses)?,
            None => self.estimator.estimate(&snapshot.responses)?,
        };
        Ok((outcome.estimate, Some(outcome)))
    }

    fn mastery_records(
        &self,
        snapshot: &LearnerSnapshot,
        objects: &[LanguageObject],
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, MasteryRecord>> {
        let mut records = HashMap::new();
        for object in objects {
            let accuracy = snapshot.accuracy.get(&object.id).copied();
            if let Some(a) = accuracy {
                ensure_in_range(&format!("accuracy[{}]", object.id), a, 0.0, 1.0)?;
            }
            let record = match (snapshot.cards.get(&object.id), accuracy) {
                (Some(card), acc) => {
                    card.validate()?;
                    MasteryRecord::from_card(card, acc.unwrap_or(0.0), &self.scheduler, now)
                }
                (None, Some(acc)) => MasteryRecord::new(acc),
                (None, None) => continue,
            };
            records.insert(object.id.clone(), record);
        }
        Ok(records)
    }
}

fn choose_format(
    component: LanguageComponent,
    record: Option<&MasteryRecord>,
    bands: &MasteryBands,
) -> TaskFormat {
    if component == LanguageComponent::Phonological {
        return TaskFormat::Listening;
    }
    let Some(record) = record else {
        return TaskFormat::Recognition;
    };
    if record.exposures == 0 || record.accuracy < bands.foundation_upper {
        TaskFormat::Recognition
    } else if record.retained {
        TaskFormat::Usage
    } else if record.accuracy <= bands.optimal_upper {
        TaskFormat::Recall
    } else if record.accuracy < bands.mastered_lower
        && matches!(
            component,
            LanguageComponent::Lexical | LanguageComponent::Morphological
        )
    {
        TaskFormat::Spelling
    } else {
        TaskFormat::Usage
    }
}
