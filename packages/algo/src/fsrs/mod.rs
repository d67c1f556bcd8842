//! Memory Scheduler - FSRS-style memory-decay scheduling
//!
//! Card lifecycle:
//! - new → review on the first passing rating (learning → review likewise)
//! - review → relapsing on a failing rating
//! - relapsing → review on any passing rating
//! - a failing rating always increments lapses and forces relapsing
//!
//! Formulas:
//! - Retrievability: R = exp(-t / S)
//! - Recall stability: S' = S·(1 + e^w8·(11 - D)·S^-w9·(e^(w10·(1-R)) - 1)·hard·easy)
//! - Forget stability: S' = w11·D^-w12·((S+1)^w13 - 1)·e^(w14·(1-R)), capped at S
//! - Interval: S·ln(target)/ln(0.9), clamped to [1, maximum_interval]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::{LexisError, Result};
use crate::sanitize::{ensure_in_range, ensure_positive, ensure_probability};

const MIN_STABILITY: f64 = 0.1;
const MIN_CARD_DIFFICULTY: f64 = 1.0;
const MAX_CARD_DIFFICULTY: f64 = 10.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
/// Largest schedule a card may carry (about 2700 years)
const MAX_SCHEDULED_DAYS: f64 = 1_000_000.0;

/// Long-term mastery thresholds
const MASTERY_STABILITY_DAYS: f64 = 21.0;
const MASTERY_MAX_LAPSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    pub fn from_response(is_correct: bool, response_time_ms: i64) -> Self {
        if !is_correct {
            return Self::Again;
        }
        if response_time_ms < 2000 {
            Self::Easy
        } else if response_time_ms < 5000 {
            Self::Good
        } else {
            Self::Hard
        }
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, Rating::Again)
    }

    fn value(&self) -> i32 {
        *self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    New,
    Learning,
    Review,
    Relapsing,
}

/// Memory state of one (learner, object) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCard {
    /// 1 (easy) ..= 10 (hard)
    pub difficulty: f64,
    /// Days until retrievability drops to e^-1; always > 0
    pub stability: f64,
    pub last_review: Option<DateTime<Utc>>,
    pub reps: u32,
    pub lapses: u32,
    pub state: CardState,
    pub scheduled_days: f64,
}

impl Default for MemoryCard {
    fn default() -> Self {
        Self {
            difficulty: 5.0,
            stability: MIN_STABILITY,
            last_review: None,
            reps: 0,
            lapses: 0,
            state: CardState::New,
            scheduled_days: 0.0,
        }
    }
}

impl MemoryCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self) -> bool {
        self.reps == 0
    }

    /// `None` for unreviewed cards and for schedules outside the representable range.
    pub fn due(&self) -> Option<DateTime<Utc>> {
        let last = self.last_review?;
        if !(0.0..=MAX_SCHEDULED_DAYS).contains(&self.scheduled_days) {
            return None;
        }
        let offset = chrono::Duration::seconds((self.scheduled_days * SECONDS_PER_DAY) as i64);
        last.checked_add_signed(offset)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("card.stability", self.stability)?;
        ensure_in_range(
            "card.difficulty",
            self.difficulty,
            MIN_CARD_DIFFICULTY,
            MAX_CARD_DIFFICULTY,
        )?;
        ensure_in_range(
            "card.scheduled_days",
            self.scheduled_days,
            0.0,
            MAX_SCHEDULED_DAYS,
        )?;
        if self.last_review.is_some() && self.due().is_none() {
            return Err(LexisError::malformed(
                "card.scheduled_days",
                "due date out of range",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub card: MemoryCard,
    pub interval_days: f64,
    /// Retrievability at the moment of review, before the update
    pub retrievability_before: f64,
}

pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (-elapsed_days.max(0.0) / stability).exp()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryScheduler {
    config: SchedulerConfig,
}

impl MemoryScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        ensure_probability("scheduler.target_retention", config.target_retention)?;
        ensure_in_range(
            "scheduler.maximum_interval",
            config.maximum_interval,
            1.0,
            f64::MAX,
        )?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Unrated first presentation: the card enters the learning state.
    pub fn introduce(&self, card: &MemoryCard, now: DateTime<Utc>) -> MemoryCard {
        let mut next = card.clone();
        if next.state == CardState::New {
            next.state = CardState::Learning;
            next.last_review = Some(now);
        }
        next
    }

    pub fn elapsed_days(&self, card: &MemoryCard, now: DateTime<Utc>) -> f64 {
        card.last_review
            .map(|t| ((now - t).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0))
            .unwrap_or(0.0)
    }

    pub fn retrievability_at(&self, card: &MemoryCard, now: DateTime<Utc>) -> f64 {
        if card.is_new() {
            return 0.0;
        }
        retrievability(card.stability, self.elapsed_days(card, now))
    }

    pub fn is_due(&self, card: &MemoryCard, now: DateTime<Utc>) -> bool {
        match card.state {
            CardState::New | CardState::Learning | CardState::Relapsing => true,
            CardState::Review => card
                .due()
                .map(|due| due <= now)
                .unwrap_or(card.last_review.is_none()),
        }
    }

    pub fn review(
        &self,
        card: &MemoryCard,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<ReviewOutcome> {
        card.validate()?;
        let w = &self.config.weights;

        if card.is_new() {
            let stability = initial_stability(w, rating);
            let difficulty = initial_difficulty(w, rating);
            let interval = self.next_interval(stability);
            let lapses = if rating.is_failing() { 1 } else { 0 };

            return Ok(ReviewOutcome {
                card: MemoryCard {
                    difficulty,
                    stability,
                    last_review: Some(now),
                    reps: 1,
                    lapses,
                    state: next_state(rating),
                    scheduled_days: interval,
                },
                interval_days: interval,
                retrievability_before: 0.0,
            });
        }

        let elapsed = self.elapsed_days(card, now);
        let r = retrievability(card.stability, elapsed);
        let difficulty = next_difficulty(w, card.difficulty, rating);

        let (stability, lapses) = if rating.is_failing() {
            (
                next_forget_stability(w, card.difficulty, card.stability, r),
                card.lapses + 1,
            )
        } else {
            (
                next_recall_stability(w, card.difficulty, card.stability, r, rating),
                card.lapses,
            )
        };

        let interval = self.next_interval(stability);
        tracing::debug!(
            rating = rating.value(),
            elapsed,
            retrievability = r,
            stability,
            interval,
            "card reviewed"
        );

        Ok(ReviewOutcome {
            card: MemoryCard {
                difficulty,
                stability,
                last_review: Some(now),
                reps: card.reps + 1,
                lapses,
                state: next_state(rating),
                scheduled_days: interval,
            },
            interval_days: interval,
            retrievability_before: r,
        })
    }

    pub fn next_interval(&self, stability: f64) -> f64 {
        let interval = stability * self.config.target_retention.ln() / 0.9f64.ln();
        interval.clamp(1.0, self.config.maximum_interval)
    }
}

/// Every state moves to review on a pass and to relapsing on a failure.
fn next_state(rating: Rating) -> CardState {
    if rating.is_failing() {
        CardState::Relapsing
    } else {
        CardState::Review
    }
}

fn initial_stability(w: &[f64; 17], rating: Rating) -> f64 {
    w[(rating.value() - 1) as usize].max(MIN_STABILITY)
}

fn initial_difficulty(w: &[f64; 17], rating: Rating) -> f64 {
    let d = w[4] - (rating.value() - 3) as f64 * w[5];
    d.clamp(MIN_CARD_DIFFICULTY, MAX_CARD_DIFFICULTY)
}

fn next_difficulty(w: &[f64; 17], d: f64, rating: Rating) -> f64 {
    let delta = -(rating.value() - 3) as f64;
    let d_new = d + w[6] * delta;
    // Mean reversion towards the initial difficulty of an easy card
    let d_mean = w[7] * initial_difficulty(w, Rating::Easy) + (1.0 - w[7]) * d_new;
    d_mean.clamp(MIN_CARD_DIFFICULTY, MAX_CARD_DIFFICULTY)
}

fn next_recall_stability(w: &[f64; 17], d: f64, s: f64, r: f64, rating: Rating) -> f64 {
    let hard_penalty = if rating == Rating::Hard { w[15] } else { 1.0 };
    let easy_bonus = if rating == Rating::Easy { w[16] } else { 1.0 };

    let new_s = s
        * (1.0
            + w[8].exp()
                * (11.0 - d)
                * s.powf(-w[9])
                * ((1.0 - r) * w[10]).exp_m1()
                * hard_penalty
                * easy_bonus);
    new_s.max(s).max(MIN_STABILITY)
}

fn next_forget_stability(w: &[f64; 17], d: f64, s: f64, r: f64) -> f64 {
    let new_s = w[11] * d.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * (w[14] * (1.0 - r)).exp();
    new_s.clamp(MIN_STABILITY, s.max(MIN_STABILITY))
}

/// Long-term mastery; allows up to two lapses
pub fn is_mastered(card: &MemoryCard) -> bool {
    card.stability >= MASTERY_STABILITY_DAYS && card.lapses <= MASTERY_MAX_LAPSES
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_new_card_good_rating_enters_review() {
        let scheduler = MemoryScheduler::default();
        let outcome = scheduler
            .review(&MemoryCard::new(), Rating::Good, t0())
            .unwrap();
        assert_eq!(outcome.card.state, CardState::Review);
        assert_eq!(outcome.card.reps, 1);
        assert_eq!(outcome.card.lapses, 0);
        assert!((outcome.card.stability - 2.4).abs() < 1e-9);
        assert!(outcome.interval_days >= 1.0);
    }

    #[test]
    fn test_new_card_again_relapses() {
        let scheduler = MemoryScheduler::default();
        let outcome = scheduler
            .review(&MemoryCard::new(), Rating::Again, t0())
            .unwrap();
        assert_eq!(outcome.card.state, CardState::Relapsing);
        assert_eq!(outcome.card.lapses, 1);
    }

    #[test]
    fn test_huge_schedule_is_malformed_not_a_panic() {
        let scheduler = MemoryScheduler::default();
        let card = MemoryCard {
            stability: 10.0,
            last_review: Some(t0()),
            reps: 3,
            state: CardState::Review,
            scheduled_days: f64::MAX,
            ..Default::default()
        };
        assert!(card.validate().is_err());
        assert_eq!(card.due(), None);
        assert!(!scheduler.is_due(&card, t0() + Duration::days(30)));
        assert!(scheduler.review(&card, Rating::Good, t0()).is_err());

        let bounded = MemoryCard {
            scheduled_days: 36_500.0,
            ..card
        };
        assert!(bounded.validate().is_ok());
        assert!(bounded.due().is_some());
    }

    #[test]
    fn test_introduce_then_pass_goes_to_review() {
        let scheduler = MemoryScheduler::default();
        let learning = scheduler.introduce(&MemoryCard::new(), t0());
        assert_eq!(learning.state, CardState::Learning);
        let outcome = scheduler.review(&learning, Rating::Hard, t0()).unwrap();
        assert_eq!(outcome.card.state, CardState::Review);
    }

    #[test]
    fn test_relapsing_recovers_on_pass() {
        let scheduler = MemoryScheduler::default();
        let reviewed = scheduler
            .review(&MemoryCard::new(), Rating::Good, t0())
            .unwrap()
            .card;
        let lapsed = scheduler
            .review(&reviewed, Rating::Again, t0() + Duration::days(3))
            .unwrap()
            .card;
        assert_eq!(lapsed.state, CardState::Relapsing);
        assert!(lapsed.stability <= reviewed.stability);
        let recovered = scheduler
            .review(&lapsed, Rating::Good, t0() + Duration::days(4))
            .unwrap()
            .card;
        assert_eq!(recovered.state, CardState::Review);
        assert_eq!(recovered.lapses, 1);
    }

    #[test]
    fn test_retrievability_decay() {
        let r_0 = retrievability(10.0, 0.0);
        let r_5 = retrievability(10.0, 5.0);
        let r_10 = retrievability(10.0, 10.0);
        assert!(r_0 > r_5);
        assert!(r_5 > r_10);
        assert!((r_0 - 1.0).abs() < 0.001);
        assert!((r_10 - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_interval_equals_stability_at_default_retention() {
        let scheduler = MemoryScheduler::default();
        assert!((scheduler.next_interval(12.0) - 12.0).abs() < 1e-9);
        assert_eq!(scheduler.next_interval(0.2), 1.0);
        assert_eq!(scheduler.next_interval(1e9), 36500.0);
    }

    #[test]
    fn test_higher_retention_shortens_interval() {
        let strict = MemoryScheduler::new(SchedulerConfig {
            target_retention: 0.95,
            ..Default::default()
        })
        .unwrap();
        assert!(strict.next_interval(20.0) < 20.0);
    }

    #[test]
    fn test_negative_stability_rejected() {
        let scheduler = MemoryScheduler::default();
        let card = MemoryCard {
            stability: -1.0,
            reps: 3,
            ..Default::default()
        };
        assert!(scheduler.review(&card, Rating::Good, t0()).is_err());
    }

    #[test]
    fn test_invalid_retention_rejected() {
        let config = SchedulerConfig {
            target_retention: 1.2,
            ..Default::default()
        };
        assert!(MemoryScheduler::new(config).is_err());
    }

    #[test]
    fn test_due_and_retrievability_at() {
        let scheduler = MemoryScheduler::default();
        let card = scheduler
            .review(&MemoryCard::new(), Rating::Good, t0())
            .unwrap()
            .card;
        assert!(!scheduler.is_due(&card, t0() + Duration::hours(1)));
        assert!(scheduler.is_due(&card, t0() + Duration::days(30)));
        let r = scheduler.retrievability_at(&card, t0() + Duration::days(2));
        assert!(r > 0.0 && r < 1.0);
    }

    #[test]
    fn test_rating_from_response() {
        assert_eq!(Rating::from_response(false, 500), Rating::Again);
        assert_eq!(Rating::from_response(true, 1500), Rating::Easy);
        assert_eq!(Rating::from_response(true, 3000), Rating::Good);
        assert_eq!(Rating::from_response(true, 9000), Rating::Hard);
    }

    #[test]
    fn test_mastery() {
        let mastered = MemoryCard {
            stability: 30.0,
            reps: 10,
            lapses: 0,
            state: CardState::Review,
            ..Default::default()
        };
        assert!(is_mastered(&mastered));

        let not_mastered = MemoryCard {
            stability: 10.0,
            reps: 5,
            lapses: 1,
            ..Default::default()
        };
        assert!(!is_mastered(&not_mastered));
    }
}
