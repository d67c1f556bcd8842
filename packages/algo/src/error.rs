//! Error types shared by every engine component.
//!
//! Numerical non-convergence is not an error: estimators report it through
//! `converged` / `iterations` fields on their outcomes and keep going.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard-constraint failure found after propagation or selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub source: String,
    pub target: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Both ends of an `excludes` edge are selected.
    MutualExclusion,
    /// The source is selected but none of its required targets is.
    MissingRequirement,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ViolationKind::MutualExclusion => {
                write!(f, "{} excludes {}", self.source, self.target)
            }
            ViolationKind::MissingRequirement => {
                write!(f, "{} requires {}", self.source, self.target)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexisError {
    #[error("malformed input: {field}: {reason}")]
    MalformedInput { field: String, reason: String },

    #[error("no candidate available for {stage}")]
    NoCandidate { stage: &'static str },

    #[error("hard constraint violated ({} violation(s)): {}", .0.len(), first_violation(.0))]
    ConstraintViolation(Vec<Violation>),
}

fn first_violation(violations: &[Violation]) -> String {
    violations
        .first()
        .map(|v| v.to_string())
        .unwrap_or_default()
}

impl LexisError {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn no_candidate(stage: &'static str) -> Self {
        Self::NoCandidate { stage }
    }

    /// Returns `true` when the host should fall back to a default task.
    pub fn is_no_candidate(&self) -> bool {
        matches!(self, LexisError::NoCandidate { .. })
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            LexisError::ConstraintViolation(v) => v,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, LexisError>;
