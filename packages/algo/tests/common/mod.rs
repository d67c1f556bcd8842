#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};

use lexis_algo::{
    CurriculumGoal, FeatureVector, ItemParameter, LanguageComponent, LanguageObject,
};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap()
}

pub fn days_from_now(days: i64) -> DateTime<Utc> {
    fixed_now() + Duration::days(days)
}

pub fn word(id: &str, content: &str, frequency: f64, difficulty: f64) -> LanguageObject {
    LanguageObject::new(id, content, LanguageComponent::Lexical)
        .with_features(FeatureVector {
            frequency,
            relational_density: 0.4,
            ..Default::default()
        })
        .with_item(ItemParameter::two_pl(1.0, difficulty).unwrap())
}

pub fn tagged(id: &str, component: LanguageComponent, tags: &[&str]) -> LanguageObject {
    LanguageObject::new(id, id, component)
        .with_tags(tags.iter().copied())
        .with_features(FeatureVector {
            frequency: 0.5,
            relational_density: 0.5,
            ..Default::default()
        })
}

/// Goals with equal weight, θ 0 → 1, one per deadline, each in its own domain.
pub fn goals_with_deadlines(deadlines: &[i64]) -> Vec<CurriculumGoal> {
    deadlines
        .iter()
        .map(|&d| {
            CurriculumGoal::new(
                format!("goal-{d}d"),
                0.0,
                1.0,
                days_from_now(d),
                format!("domain-{d}"),
            )
        })
        .collect()
}

/// Small corpus where "strong" and "coffee" co-occur far above chance.
pub fn collocation_corpus() -> Vec<Vec<&'static str>> {
    let mut docs = Vec::new();
    for _ in 0..30 {
        docs.push(vec!["strong", "coffee", "every", "morning"]);
        docs.push(vec!["the", "weather", "was", "cold"]);
    }
    docs
}
