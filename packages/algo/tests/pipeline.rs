//! End-to-end session planning: estimate → rank → propagate → allocate → evaluate → commit.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

use lexis_algo::config::LexicalConfig;
use lexis_algo::{
    AbilityEstimate, AllocationPolicy, BatchItem, ComponentRecord, ConstraintGraph,
    ConstraintPropagator, EvaluationConfig, ExpectedAnswer, ItemParameter, ItemResponse,
    LanguageComponent, LanguageObject, LearnerSnapshot, LexicalRelationIndex, LexisConfig,
    LexisError, MemoryCard, MemoryScheduler, MultiLayerEvaluator, Rating, RelationCache,
    RuleTable, SessionPlanner, SessionRequest,
};

use common::{collocation_corpus, fixed_now, goals_with_deadlines, tagged, word};

fn pool() -> Vec<LanguageObject> {
    vec![
        word("w-strong", "strong", 0.6, 0.0),
        word("w-coffee", "coffee", 0.5, 0.3),
        word("w-cold", "cold", 0.7, -0.5),
        word("w-weather", "weather", 0.4, 0.8),
        tagged("g-passive", LanguageComponent::Syntactic, &["passive_voice"]),
        tagged("v-write", LanguageComponent::Lexical, &["verb:transitive"]),
        tagged("m-ed", LanguageComponent::Morphological, &["tense:past"]),
    ]
}

fn history() -> Vec<ComponentRecord> {
    let mut records = Vec::new();
    for k in 0..10 {
        records.push(ComponentRecord::new(LanguageComponent::Morphological, k >= 6, 0.5));
        records.push(ComponentRecord::new(LanguageComponent::Lexical, k >= 1, 0.9));
    }
    records
}

fn snapshot() -> LearnerSnapshot {
    let scheduler = MemoryScheduler::default();
    let reviewed = scheduler
        .review(&MemoryCard::new(), Rating::Good, fixed_now() - Duration::days(10))
        .unwrap()
        .card;

    let responses = [(-1.0, true), (-0.5, true), (0.0, true), (0.5, false), (0.2, true), (1.0, false)]
        .iter()
        .map(|&(b, correct)| ItemResponse::new(ItemParameter::two_pl(1.0, b).unwrap(), correct))
        .collect();

    LearnerSnapshot {
        learner_id: "learner-1".into(),
        ability: Some(AbilityEstimate::new(0.0, 0.8).unwrap()),
        responses,
        cards: HashMap::from([("w-cold".to_string(), reviewed)]),
        accuracy: HashMap::from([("w-cold".to_string(), 0.8)]),
        history: history(),
        goals: goals_with_deadlines(&[14, 60]),
        recent_contents: vec!["strong".into()],
        ..Default::default()
    }
}

fn relations() -> Arc<LexicalRelationIndex> {
    let docs = collocation_corpus();
    let cache = RelationCache::new(
        LexicalRelationIndex::build_from_documents(&docs, LexicalConfig::default()).unwrap(),
    );
    cache.snapshot()
}

fn request() -> SessionRequest {
    SessionRequest {
        budget_minutes: 45.0,
        max_objects: 5,
        policy: AllocationPolicy::DeadlineFocused,
        ..Default::default()
    }
}

#[test]
fn full_session_plan() {
    let planner = SessionPlanner::new(LexisConfig::default()).unwrap();
    let objects = pool();
    let plan = planner
        .plan(
            &snapshot(),
            &objects,
            Some(relations()),
            &RuleTable::standard(),
            &request(),
            fixed_now(),
        )
        .unwrap();

    // estimate
    assert!(plan.estimation.is_some());
    assert!(plan.ability.theta.is_finite());

    // diagnose
    assert_eq!(plan.bottleneck.primary, Some(LanguageComponent::Morphological));

    // rank
    assert_eq!(plan.ranked.len(), objects.len());
    assert_eq!(plan.ranked[0].object_id, "w-cold");
    assert!(plan.ranked[0].due_for_review);
    let by_id: HashMap<&str, _> = plan
        .ranked
        .iter()
        .map(|r| (r.object_id.as_str(), r))
        .collect();
    assert!(by_id["m-ed"].breakdown.bottleneck > 0.0);
    assert!(by_id["w-coffee"].breakdown.association > 1.0);
    assert_eq!(by_id["w-weather"].breakdown.association, 1.0);

    // propagate
    let selected = &plan.selection.selected;
    assert!(!selected.is_empty() && selected.len() <= 5);
    let graph = ConstraintGraph::build(&objects, None, &RuleTable::standard(), &Default::default())
        .unwrap();
    assert!(ConstraintPropagator::default().validate(selected, &graph).is_ok());
    if selected.iter().any(|s| s == "g-passive") {
        assert!(selected.iter().any(|s| s == "v-write"));
    }

    // allocate
    let allocation = plan.allocation.as_ref().unwrap();
    let total: f64 = allocation.shares().iter().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert_eq!(allocation.allocations[0].goal_id, "goal-14d");

    // task specs
    assert_eq!(plan.tasks.len(), selected.len());
    for (task, id) in plan.tasks.iter().zip(selected) {
        assert_eq!(&task.object_id, id);
    }
}

#[test]
fn evaluate_and_commit_closes_the_loop() {
    let planner = SessionPlanner::new(LexisConfig::default()).unwrap();
    let objects = pool();
    let learner = snapshot();
    let plan = planner
        .plan(&learner, &objects, None, &RuleTable::standard(), &request(), fixed_now())
        .unwrap();

    let items: Vec<BatchItem> = plan
        .tasks
        .iter()
        .map(|task| {
            let object = objects.iter().find(|o| o.id == task.object_id).unwrap();
            BatchItem {
                object_id: object.id.clone(),
                role_weight: 1.0,
                expected: ExpectedAnswer::new(object.content.clone()),
                response: object.content.clone(),
                config: EvaluationConfig::binary(),
                item: Some(object.item),
            }
        })
        .collect();
    let batch = MultiLayerEvaluator::default()
        .evaluate_batch(&items, Some(plan.ability.theta))
        .unwrap();
    assert!((batch.composite - 1.0).abs() < 1e-12);
    assert!(batch.total_delta() > 0.0);

    let later = fixed_now() + Duration::hours(1);
    let update = planner
        .commit(&plan.ability, &learner.cards, &batch, &HashMap::new(), later)
        .unwrap();
    assert!(update.ability.theta > plan.ability.theta);
    assert_eq!(update.cards.len(), plan.tasks.len());
    assert!(update.intervals.values().all(|&d| d >= 1.0));

    let mut goal = learner.goals[0].clone();
    let gained = goal.record_progress(update.ability.theta).unwrap();
    assert!(gained > 0.0);
}

#[test]
fn plan_many_keeps_learners_independent() {
    let planner = SessionPlanner::new(LexisConfig::default()).unwrap();
    let objects = pool();
    let first = snapshot();
    let second = LearnerSnapshot {
        learner_id: "learner-2".into(),
        ..Default::default()
    };

    let plans = planner.plan_many(
        &[(first, request()), (second, SessionRequest::default())],
        &objects,
        Some(relations()),
        &RuleTable::standard(),
        fixed_now(),
    );
    assert_eq!(plans.len(), 2);
    let a = plans[0].as_ref().unwrap();
    let b = plans[1].as_ref().unwrap();
    assert_eq!(a.learner_id, "learner-1");
    assert_eq!(b.learner_id, "learner-2");
    assert!(a.allocation.is_some());
    assert!(b.allocation.is_none());
    assert!(b.estimation.is_none());
    assert_eq!(b.bottleneck.primary, None);
}

#[test]
fn malformed_snapshots_are_rejected_before_ranking() {
    let planner = SessionPlanner::new(LexisConfig::default()).unwrap();
    let objects = pool();

    let mut drifted = snapshot();
    drifted.ability = Some(AbilityEstimate {
        theta: f64::NAN,
        standard_error: 0.5,
    });
    let err = planner
        .plan(&drifted, &objects, None, &RuleTable::standard(), &request(), fixed_now())
        .unwrap_err();
    assert!(matches!(err, LexisError::MalformedInput { .. }));

    let mut far_future = snapshot();
    if let Some(card) = far_future.cards.get_mut("w-cold") {
        card.scheduled_days = 1e300;
    }
    let err = planner
        .plan(&far_future, &objects, None, &RuleTable::standard(), &request(), fixed_now())
        .unwrap_err();
    assert!(err.to_string().contains("card.scheduled_days"));
}

#[test]
fn relation_cache_swaps_without_disturbing_readers() {
    let docs = collocation_corpus();
    let cache = RelationCache::new(
        LexicalRelationIndex::build_from_documents(&docs, LexicalConfig::default()).unwrap(),
    );
    let before = cache.snapshot();
    assert_eq!(before.version(), 0);

    let version = cache
        .rebuild(&[vec!["cold", "weather"], vec!["cold", "weather"]], LexicalConfig::default())
        .unwrap();
    assert_eq!(version, 1);
    assert_eq!(cache.version(), 1);

    // Old readers still see the full previous corpus
    assert_eq!(before.count("coffee"), 30);
    assert_eq!(cache.snapshot().count("coffee"), 0);
}
