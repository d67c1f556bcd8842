//! Fixed linguistic rule table.
//!
//! Rules are keyed by object tags: every object carrying `source_tag` gets an edge of
//! `kind` to every object carrying `target_tag`.

use serde::{Deserialize, Serialize};

use super::{EdgeKind, Modification};
use crate::error::{LexisError, Result};
use crate::sanitize::ensure_in_range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinguisticRule {
    pub id: String,
    pub source_tag: String,
    pub target_tag: String,
    pub kind: EdgeKind,
    pub strength: f64,
    /// Attribute forced on the target by a `restricts` rule
    #[serde(default)]
    pub modification: Option<Modification>,
}

impl LinguisticRule {
    pub fn new(
        id: impl Into<String>,
        source_tag: impl Into<String>,
        kind: EdgeKind,
        target_tag: impl Into<String>,
        strength: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source_tag: source_tag.into(),
            target_tag: target_tag.into(),
            kind,
            strength,
            modification: None,
        }
    }

    pub fn with_modification(mut self, attribute: &str, value: &str) -> Self {
        self.modification = Some(Modification::new(attribute, value));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_tag.is_empty() || self.target_tag.is_empty() {
            return Err(LexisError::malformed(
                format!("rule[{}]", self.id),
                "tags must not be empty",
            ));
        }
        ensure_in_range(&format!("rule[{}].strength", self.id), self.strength, 0.0, 1.0)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: Vec<LinguisticRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        Self::new()
            .with_rule(LinguisticRule::new(
                "passive_requires_transitive",
                "passive_voice",
                EdgeKind::Requires,
                "verb:transitive",
                1.0,
            ))
            .with_rule(LinguisticRule::new(
                "formal_excludes_colloquial",
                "register:formal",
                EdgeKind::Excludes,
                "register:colloquial",
                1.0,
            ))
            .with_rule(
                LinguisticRule::new(
                    "past_restricts_irregular",
                    "tense:past",
                    EdgeKind::Restricts,
                    "verb:irregular",
                    0.8,
                )
                .with_modification("tense", "past"),
            )
            .with_rule(LinguisticRule::new(
                "question_prefers_interrogative",
                "construction:question",
                EdgeKind::Prefers,
                "interrogative",
                0.6,
            ))
    }

    pub fn with_rule(mut self, rule: LinguisticRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[LinguisticRule] {
        &self.rules
    }

    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(LinguisticRule::validate)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)
            .map_err(|e| LexisError::malformed("rules", e.to_string()))?;
        table.validate()?;
        Ok(table)
    }
}
