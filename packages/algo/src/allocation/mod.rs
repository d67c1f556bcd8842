//! Multi-Goal Allocator - split a practice budget across curriculum goals
//!
//! Pipeline:
//! 1. Candidates: uniform, deadline-weighted, progress-weighted and seeded perturbations,
//!    each projected onto {Σ = 1, min ≤ share ≤ max}
//! 2. Score: expected progress (rate · √minutes + inbound transfer) and risk
//!    σ(k · ln(required_rate / expected_rate)) per goal
//! 3. Keep the Pareto frontier over per-goal expected progress
//! 4. Pick one frontier member with the selection policy
//!
//! Parameters:
//! - shares within [0.05, 0.8]; relaxed to 1/n when infeasible
//! - shared-object bonus = 1.5
//! - transfer τ_ij = 0.5 · domain similarity + 0.5 · shared-object fraction

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::AllocationConfig;
use crate::error::{LexisError, Result};
use crate::sanitize::{ensure_finite, ensure_positive, logistic};
use crate::types::EPSILON;

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Floor for the remaining time of a goal at or past its deadline
const MIN_DAYS_REMAINING: f64 = 1.0 / 24.0;
const PROJECTION_ITERATIONS: usize = 100;
const SUM_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumGoal {
    pub id: String,
    pub target_theta: f64,
    pub current_theta: f64,
    pub deadline: DateTime<Utc>,
    pub weight: f64,
    pub domain: String,
    #[serde(default)]
    pub object_ids: BTreeSet<String>,
}

impl CurriculumGoal {
    pub fn new(
        id: impl Into<String>,
        current_theta: f64,
        target_theta: f64,
        deadline: DateTime<Utc>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target_theta,
            current_theta,
            deadline,
            weight: 1.0,
            domain: domain.into(),
            object_ids: BTreeSet::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_objects<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn gap(&self) -> f64 {
        (self.target_theta - self.current_theta).max(0.0)
    }

    pub fn is_active(&self) -> bool {
        self.gap() > EPSILON
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> f64 {
        ((self.deadline - now).num_seconds() as f64 / SECONDS_PER_DAY).max(MIN_DAYS_REMAINING)
    }

    /// Apply the realized ability after a session; returns the change.
    pub fn record_progress(&mut self, theta: f64) -> Result<f64> {
        ensure_finite("goal.current_theta", theta)?;
        let delta = theta - self.current_theta;
        self.current_theta = theta;
        Ok(delta)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(LexisError::malformed("goal.id", "must not be empty"));
        }
        ensure_finite(&format!("goal[{}].target_theta", self.id), self.target_theta)?;
        ensure_finite(&format!("goal[{}].current_theta", self.id), self.current_theta)?;
        ensure_positive(&format!("goal[{}].weight", self.id), self.weight)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Minimize variance of expected progress across goals
    Balanced,
    /// Minimize the worst goal risk
    DeadlineFocused,
    /// Maximize weighted total progress
    ProgressFocused,
    /// Maximize benefit of objects shared across goals
    SynergyFocused,
    Custom {
        progress: f64,
        risk: f64,
        balance: f64,
        synergy: f64,
    },
}

impl AllocationPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            AllocationPolicy::Balanced => "balanced",
            AllocationPolicy::DeadlineFocused => "deadline-focused",
            AllocationPolicy::ProgressFocused => "progress-focused",
            AllocationPolicy::SynergyFocused => "synergy-focused",
            AllocationPolicy::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalAllocation {
    pub goal_id: String,
    pub share: f64,
    pub minutes: f64,
    pub expected_progress: f64,
    pub inbound_transfer: f64,
    pub risk: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// One entry per input goal, in input order
    pub allocations: Vec<GoalAllocation>,
    pub policy: AllocationPolicy,
    pub candidates_evaluated: usize,
    pub frontier_size: usize,
    pub bounds_relaxed: bool,
    pub explanation: String,
}

impl AllocationResult {
    pub fn shares(&self) -> Vec<f64> {
        self.allocations.iter().map(|a| a.share).collect()
    }
}

/// Per-candidate evaluation over the active goals.
#[derive(Debug, Clone)]
struct Evaluated {
    shares: Vec<f64>,
    progress: Vec<f64>,
    inbound: Vec<f64>,
    risk: Vec<f64>,
    synergy: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MultiGoalAllocator {
    config: AllocationConfig,
}

impl MultiGoalAllocator {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn allocate(
        &self,
        goals: &[CurriculumGoal],
        budget_minutes: f64,
        policy: AllocationPolicy,
        now: DateTime<Utc>,
    ) -> Result<AllocationResult> {
        ensure_positive("budget_minutes", budget_minutes)?;
        let mut seen = BTreeSet::new();
        for goal in goals {
            goal.validate()?;
            if !seen.insert(goal.id.as_str()) {
                return Err(LexisError::malformed(
                    format!("goal[{}]", goal.id),
                    "duplicate goal id",
                ));
            }
        }
        let active: Vec<&CurriculumGoal> = goals.iter().filter(|g| g.is_active()).collect();
        if active.is_empty() {
            return Err(LexisError::no_candidate("goal allocation"));
        }

        let n = active.len();
        let (lo, hi, bounds_relaxed) = self.bounds(n);
        if bounds_relaxed {
            tracing::warn!(goals = n, lo, hi, "allocation bounds infeasible; relaxed");
        }

        let transfer = self.transfer_matrix(&active);
        let shared = shared_objects(&active);

        let candidates = self.candidates(&active, lo, hi, now);
        let evaluated: Vec<Evaluated> = candidates
            .into_iter()
            .map(|shares| self.evaluate(&active, shares, budget_minutes, &transfer, &shared, now))
            .collect();
        let frontier = pareto_frontier(&evaluated);

        let best = frontier
            .iter()
            .copied()
            .min_by(|&a, &b| {
                policy_cost(policy, &evaluated[a], &active)
                    .total_cmp(&policy_cost(policy, &evaluated[b], &active))
                    .then_with(|| a.cmp(&b))
            })
            .ok_or_else(|| LexisError::no_candidate("goal allocation"))?;
        let chosen = &evaluated[best];

        let mut by_id: HashMap<&str, usize> = HashMap::new();
        for (k, goal) in active.iter().enumerate() {
            by_id.insert(goal.id.as_str(), k);
        }
        let allocations: Vec<GoalAllocation> = goals
            .iter()
            .map(|goal| match by_id.get(goal.id.as_str()).filter(|_| goal.is_active()) {
                Some(&k) => GoalAllocation {
                    goal_id: goal.id.clone(),
                    share: chosen.shares[k],
                    minutes: chosen.shares[k] * budget_minutes,
                    expected_progress: chosen.progress[k],
                    inbound_transfer: chosen.inbound[k],
                    risk: chosen.risk[k],
                },
                None => GoalAllocation {
                    goal_id: goal.id.clone(),
                    share: 0.0,
                    minutes: 0.0,
                    expected_progress: 0.0,
                    inbound_transfer: 0.0,
                    risk: 0.0,
                },
            })
            .collect();

        let explanation = explain(policy, &allocations, frontier.len(), evaluated.len());
        tracing::debug!(
            policy = policy.name(),
            frontier = frontier.len(),
            candidates = evaluated.len(),
            "allocation selected"
        );

        Ok(AllocationResult {
            allocations,
            policy,
            candidates_evaluated: evaluated.len(),
            frontier_size: frontier.len(),
            bounds_relaxed,
            explanation,
        })
    }

    fn bounds(&self, n: usize) -> (f64, f64, bool) {
        let n = n as f64;
        let mut lo = self.config.min_allocation;
        let mut hi = self.config.max_allocation;
        let mut relaxed = false;
        if n * lo > 1.0 {
            lo = 1.0 / n;
            relaxed = true;
        }
        if n * hi < 1.0 {
            hi = 1.0 / n;
            relaxed = true;
        }
        (lo, hi, relaxed)
    }

    fn transfer_matrix(&self, goals: &[&CurriculumGoal]) -> Vec<Vec<f64>> {
        let n = goals.len();
        let mut tau = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let domain = if goals[i].domain == goals[j].domain {
                    1.0
                } else {
                    self.config.cross_domain_similarity
                };
                let common = goals[i].object_ids.intersection(&goals[j].object_ids).count();
                let smaller = goals[i].object_ids.len().min(goals[j].object_ids.len());
                let overlap = if smaller == 0 {
                    0.0
                } else {
                    common as f64 / smaller as f64
                };
                tau[i][j] = 0.5 * domain + 0.5 * overlap;
            }
        }
        tau
    }

    fn candidates(
        &self,
        goals: &[&CurriculumGoal],
        lo: f64,
        hi: f64,
        now: DateTime<Utc>,
    ) -> Vec<Vec<f64>> {
        let n = goals.len();
        let uniform = vec![1.0; n];
        let deadline: Vec<f64> = goals
            .iter()
            .map(|g| g.weight / g.days_remaining(now))
            .collect();
        let progress: Vec<f64> = goals.iter().map(|g| g.weight * g.gap()).collect();
        let seeds = [uniform, deadline, progress];

        let mut raw: Vec<Vec<f64>> = seeds.to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        for k in 0..self.config.pareto_samples {
            let base = &seeds[k % seeds.len()];
            raw.push(base.iter().map(|w| w * rng.gen_range(0.25..1.75)).collect());
        }

        let mut out: Vec<Vec<f64>> = Vec::with_capacity(raw.len());
        for weights in raw {
            let shares = project_to_bounds(&weights, lo, hi);
            let duplicate = out.iter().any(|existing| {
                existing
                    .iter()
                    .zip(&shares)
                    .all(|(a, b)| (a - b).abs() < 1e-9)
            });
            if !duplicate {
                out.push(shares);
            }
        }
        out
    }

    fn evaluate(
        &self,
        goals: &[&CurriculumGoal],
        shares: Vec<f64>,
        budget: f64,
        transfer: &[Vec<f64>],
        shared: &HashMap<String, usize>,
        now: DateTime<Utc>,
    ) -> Evaluated {
        let cfg = &self.config;
        let direct: Vec<f64> = shares
            .iter()
            .map(|s| cfg.learning_rate * (s * budget).max(0.0).sqrt())
            .collect();
        let inbound: Vec<f64> = (0..goals.len())
            .map(|i| {
                (0..goals.len())
                    .filter(|&j| j != i)
                    .map(|j| cfg.transfer_rate * transfer[i][j] * direct[j])
                    .sum::<f64>()
            })
            .collect();
        let progress: Vec<f64> = direct.iter().zip(&inbound).map(|(d, t)| d + t).collect();

        let risk: Vec<f64> = goals
            .iter()
            .zip(&progress)
            .map(|(goal, expected)| {
                let required = goal.gap() / goal.days_remaining(now);
                if *expected <= EPSILON {
                    return 1.0;
                }
                logistic(cfg.risk_steepness * (required / expected).max(EPSILON).ln())
            })
            .collect();

        let synergy: f64 = goals
            .iter()
            .zip(&shares)
            .map(|(goal, share)| {
                if goal.object_ids.is_empty() {
                    return 0.0;
                }
                let per_object = goal.weight * share / goal.object_ids.len() as f64;
                goal.object_ids
                    .iter()
                    .map(|o| {
                        if shared.get(o).copied().unwrap_or(0) >= 2 {
                            per_object * cfg.shared_object_bonus
                        } else {
                            per_object
                        }
                    })
                    .sum::<f64>()
            })
            .sum();

        Evaluated {
            shares,
            progress,
            inbound,
            risk,
            synergy,
        }
    }
}

/// Number of active goals each object appears in.
fn shared_objects(goals: &[&CurriculumGoal]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for goal in goals {
        for object in &goal.object_ids {
            *counts.entry(object.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Project non-negative weights onto {Σ = 1, lo ≤ x ≤ hi} as clamp(λ·w, lo, hi).
///
/// Requires n·lo ≤ 1 ≤ n·hi. λ is found by bisection; the rounding residual goes to a
/// component with room inside the bounds.
pub fn project_to_bounds(weights: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let w: Vec<f64> = weights
        .iter()
        .map(|x| if x.is_finite() && *x > 0.0 { *x } else { 0.0 })
        .collect();
    if w.iter().all(|x| *x == 0.0) {
        return project_to_bounds(&vec![1.0; n], lo, hi);
    }

    let total = |lambda: f64| -> f64 { w.iter().map(|x| (lambda * x).clamp(lo, hi)).sum() };

    let mut low = 0.0;
    let mut high = 1.0;
    let mut guard = 0;
    while total(high) < 1.0 && guard < 200 {
        high *= 2.0;
        guard += 1;
    }
    for _ in 0..PROJECTION_ITERATIONS {
        let mid = 0.5 * (low + high);
        if total(mid) < 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }

    let mut shares: Vec<f64> = w.iter().map(|x| (high * x).clamp(lo, hi)).collect();
    let residual = 1.0 - shares.iter().sum::<f64>();
    if residual.abs() > SUM_TOLERANCE {
        let slack = |s: f64| if residual > 0.0 { hi - s } else { s - lo };
        if let Some(k) = (0..n).max_by(|&a, &b| slack(shares[a]).total_cmp(&slack(shares[b]))) {
            shares[k] = (shares[k] + residual).clamp(lo, hi);
        }
    }
    shares
}

fn dominates(a: &Evaluated, b: &Evaluated) -> bool {
    let mut strictly = false;
    for (x, y) in a.progress.iter().zip(&b.progress) {
        if x < y {
            return false;
        }
        if x > y {
            strictly = true;
        }
    }
    strictly
}

fn pareto_frontier(candidates: &[Evaluated]) -> Vec<usize> {
    (0..candidates.len())
        .filter(|&i| {
            !candidates
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && dominates(other, &candidates[i]))
        })
        .collect()
}

fn weighted_progress(e: &Evaluated, goals: &[&CurriculumGoal]) -> f64 {
    e.progress
        .iter()
        .zip(goals)
        .map(|(p, g)| p * g.weight)
        .sum()
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn max_risk(e: &Evaluated) -> f64 {
    e.risk.iter().copied().fold(0.0, f64::max)
}

/// Lower is better.
fn policy_cost(policy: AllocationPolicy, e: &Evaluated, goals: &[&CurriculumGoal]) -> f64 {
    match policy {
        AllocationPolicy::Balanced => variance(&e.progress),
        AllocationPolicy::DeadlineFocused => max_risk(e),
        AllocationPolicy::ProgressFocused => -weighted_progress(e, goals),
        AllocationPolicy::SynergyFocused => -e.synergy,
        AllocationPolicy::Custom {
            progress,
            risk,
            balance,
            synergy,
        } => {
            -progress * weighted_progress(e, goals) + risk * max_risk(e)
                + balance * variance(&e.progress)
                - synergy * e.synergy
        }
    }
}

fn explain(
    policy: AllocationPolicy,
    allocations: &[GoalAllocation],
    frontier: usize,
    evaluated: usize,
) -> String {
    let mut parts = vec![format!(
        "{} policy over {frontier} non-dominated of {evaluated} candidates",
        policy.name()
    )];
    if let Some(top) = allocations
        .iter()
        .max_by(|a, b| a.share.total_cmp(&b.share))
    {
        parts.push(format!(
            "largest share {:.0}% to '{}' (risk {:.2})",
            top.share * 100.0,
            top.goal_id,
            top.risk
        ));
    }
    let inactive = allocations.iter().filter(|a| a.share == 0.0).count();
    if inactive > 0 {
        parts.push(format!("{inactive} goal(s) already at target"));
    }
    parts.join("; ")
}
