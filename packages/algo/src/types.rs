//! Common Types and Constants
//!
//! Shared data structures used across all engine modules.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sanitize::{ensure_finite, ensure_in_range, ensure_positive};

// ==================== Constants ====================

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Hard clamp for item discrimination during calibration
pub const MIN_DISCRIMINATION: f64 = 0.2;
pub const MAX_DISCRIMINATION: f64 = 3.0;

/// Hard clamp for item difficulty during calibration
pub const MIN_DIFFICULTY: f64 = -4.0;
pub const MAX_DIFFICULTY: f64 = 4.0;

/// Upper bound for guessing floors; a floor at or above this makes an item useless
pub const MAX_GUESSING: f64 = 0.5;

// ==================== Linguistic components ====================

/// Linguistic dimension of a language object.
///
/// Declaration order is the cascade order used by bottleneck analysis: a weakness in an
/// earlier component tends to surface as errors in later ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LanguageComponent {
    Phonological,
    Morphological,
    Lexical,
    Syntactic,
    Pragmatic,
}

impl LanguageComponent {
    pub const ALL: [LanguageComponent; 5] = [
        LanguageComponent::Phonological,
        LanguageComponent::Morphological,
        LanguageComponent::Lexical,
        LanguageComponent::Syntactic,
        LanguageComponent::Pragmatic,
    ];

    pub fn to_index(&self) -> usize {
        match self {
            LanguageComponent::Phonological => 0,
            LanguageComponent::Morphological => 1,
            LanguageComponent::Lexical => 2,
            LanguageComponent::Syntactic => 3,
            LanguageComponent::Pragmatic => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageComponent::Phonological => "phonological",
            LanguageComponent::Morphological => "morphological",
            LanguageComponent::Lexical => "lexical",
            LanguageComponent::Syntactic => "syntactic",
            LanguageComponent::Pragmatic => "pragmatic",
        }
    }
}

/// Practice format requested from the content-generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFormat {
    Recognition,
    Recall,
    Spelling,
    Listening,
    Usage,
}

// ==================== Item calibration ====================

/// Calibration triple of a language object.
///
/// Replaced wholesale on recalibration; never edited field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemParameter {
    /// a
    pub discrimination: f64,
    /// b
    pub difficulty: f64,
    /// c
    pub guessing: f64,
}

impl Default for ItemParameter {
    fn default() -> Self {
        Self {
            discrimination: 1.0,
            difficulty: 0.0,
            guessing: 0.0,
        }
    }
}

impl ItemParameter {
    pub fn new(discrimination: f64, difficulty: f64, guessing: f64) -> Result<Self> {
        let item = Self {
            discrimination,
            difficulty,
            guessing,
        };
        item.validate()?;
        Ok(item)
    }

    pub fn two_pl(discrimination: f64, difficulty: f64) -> Result<Self> {
        Self::new(discrimination, difficulty, 0.0)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("item.discrimination", self.discrimination)?;
        ensure_finite("item.difficulty", self.difficulty)?;
        ensure_in_range("item.guessing", self.guessing, 0.0, MAX_GUESSING)?;
        Ok(())
    }

    /// Copy with discrimination and difficulty forced into the calibration clamps.
    pub fn clamped(&self) -> Self {
        Self {
            discrimination: self
                .discrimination
                .clamp(MIN_DISCRIMINATION, MAX_DISCRIMINATION),
            difficulty: self.difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY),
            guessing: self.guessing.clamp(0.0, MAX_GUESSING),
        }
    }
}

// ==================== Language objects ====================

/// Pre-computed linguistic features; the engine never derives these itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Normalized corpus frequency [0, 1]
    pub frequency: f64,
    /// Normalized relational density [0, 1]
    pub relational_density: f64,
    /// Share of occurrences per domain tag, each in [0, 1]
    pub domain_distribution: BTreeMap<String, f64>,
    /// Morphological productivity [0, 1]
    pub morphological_score: f64,
    /// Phonological difficulty [0, 1]
    pub phonological_difficulty: f64,
}

impl FeatureVector {
    pub fn validate(&self) -> Result<()> {
        ensure_in_range("features.frequency", self.frequency, 0.0, 1.0)?;
        ensure_in_range(
            "features.relational_density",
            self.relational_density,
            0.0,
            1.0,
        )?;
        ensure_in_range(
            "features.morphological_score",
            self.morphological_score,
            0.0,
            1.0,
        )?;
        ensure_in_range(
            "features.phonological_difficulty",
            self.phonological_difficulty,
            0.0,
            1.0,
        )?;
        for (domain, share) in &self.domain_distribution {
            ensure_in_range(&format!("features.domain_distribution[{domain}]"), *share, 0.0, 1.0)?;
        }
        Ok(())
    }

    pub fn domain_share(&self, domain: &str) -> f64 {
        self.domain_distribution.get(domain).copied().unwrap_or(0.0)
    }
}

/// A unit of language knowledge.
///
/// Ingested externally; `priority` is the only field the engine writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageObject {
    pub id: String,
    pub content: String,
    pub component: LanguageComponent,
    /// Linguistic tags such as `passive_voice`, `verb:transitive`, `register:formal`
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub features: FeatureVector,
    pub item: ItemParameter,
    #[serde(default)]
    pub priority: f64,
}

impl LanguageObject {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        component: LanguageComponent,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            component,
            tags: BTreeSet::new(),
            features: FeatureVector::default(),
            item: ItemParameter::default(),
            priority: 0.0,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_features(mut self, features: FeatureVector) -> Self {
        self.features = features;
        self
    }

    pub fn with_item(mut self, item: ItemParameter) -> Self {
        self.item = item;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(crate::error::LexisError::malformed(
                "object.id",
                "must not be empty",
            ));
        }
        self.features.validate()?;
        self.item.validate()?;
        Ok(())
    }
}
