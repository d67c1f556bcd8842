//! # lexis-algo - adaptive language-learning core
//!
//! Decides what a learner practices next, when, and how a response updates their
//! ability. Pure computation: no I/O, no clocks (every time-dependent call takes `now`),
//! no global state.
//!
//! ## Modules
//!
//! - [`irt`] - ThetaEstimator (1/2/3PL, MLE, EAP, item selection, EM calibration)
//! - [`fsrs`] - MemoryScheduler (FSRS stability/difficulty, review intervals)
//! - [`lexical`] - LexicalRelationIndex (PMI, NPMI, log-likelihood, versioned cache)
//! - [`priority`] - PriorityEngine (mastery curve, context, ZPD, transfer, urgency)
//! - [`constraint`] - ConstraintPropagator (rule graph, BFS propagation, validation)
//! - [`allocation`] - MultiGoalAllocator (Pareto frontier over time shares)
//! - [`evaluation`] - MultiLayerEvaluator (layered scoring, error kinds, batch deltas)
//! - [`bottleneck`] - BottleneckAnalyzer (cascade-ordered component diagnosis)
//! - [`session`] - SessionPlanner (estimate → rank → propagate → allocate)
//! - [`config`], [`error`], [`sanitize`], [`logging`], [`types`] - ambient plumbing
//!
//! ## Example
//!
//! ```rust
//! use lexis_algo::{ItemParameter, ItemResponse, ThetaEstimator};
//!
//! let estimator = ThetaEstimator::default();
//! let item = ItemParameter::two_pl(1.2, 0.0).unwrap();
//! let responses: Vec<_> = (0..10).map(|_| ItemResponse::new(item, true)).collect();
//! let outcome = estimator.estimate(&responses).unwrap();
//! assert!(outcome.estimate.theta > 0.0);
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod error;
pub mod logging;
pub mod sanitize;
pub mod types;

pub mod allocation;
pub mod bottleneck;
pub mod constraint;
pub mod evaluation;
pub mod fsrs;
pub mod irt;
pub mod lexical;
pub mod priority;
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::LexisConfig;
pub use error::{LexisError, Result, Violation, ViolationKind};
pub use types::*;

pub use irt::{
    item_information, probability, AbilityEstimate, CalibrationOutcome, EstimationMethod,
    EstimationOutcome, IrtModel, ItemResponse, ResponseMatrix, SelectionStrategy, ThetaEstimator,
};

pub use fsrs::{CardState, MemoryCard, MemoryScheduler, Rating, ReviewOutcome};

pub use lexical::{LexicalRelation, LexicalRelationIndex, RelationCache};

pub use priority::{
    MasteryRecord, PriorityBreakdown, PriorityEngine, PriorityResult, SessionContext,
    TransferProfile,
};

pub use constraint::{
    ConstraintGraph, ConstraintPropagator, EdgeKind, LinguisticRule, Propagation, Resolution,
    ResolutionPolicy, RuleTable, Selection, UnmetRequirement,
};

pub use allocation::{
    AllocationPolicy, AllocationResult, CurriculumGoal, GoalAllocation, MultiGoalAllocator,
};

pub use evaluation::{
    BatchEvaluation, BatchItem, ErrorKind, EvaluationConfig, EvaluationMode, EvaluationResult,
    ExpectedAnswer, MultiLayerEvaluator,
};

pub use bottleneck::{BottleneckAnalyzer, BottleneckReport, ComponentRecord};

pub use session::{LearnerSnapshot, SessionPlan, SessionPlanner, SessionRequest, TaskSpec};
