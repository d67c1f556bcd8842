//! Lexical Relation Index - corpus co-occurrence statistics
//!
//! Built in one pass over a corpus snapshot, never edited afterwards.
//!
//! Statistics:
//! - PMI = log2(observed / expected), expected = count(A)·count(B) / N
//! - NPMI = PMI / -log2(observed / N), clamped to [-1, 1]
//! - Significance: Dunning log-likelihood ratio over the 2×2 contingency table
//!
//! Zero co-occurrence or a zero marginal yields `None`, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::LexicalConfig;
use crate::error::{LexisError, Result};

/// Order-independent pair key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub first: String,
    pub second: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                first: a.to_string(),
                second: b.to_string(),
            }
        } else {
            Self {
                first: b.to_string(),
                second: a.to_string(),
            }
        }
    }

    pub fn partner_of(&self, word: &str) -> Option<&str> {
        if self.first == word {
            Some(&self.second)
        } else if self.second == word {
            Some(&self.first)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalRelation {
    pub pair: PairKey,
    pub cooccurrence: u64,
    pub pmi: f64,
    pub npmi: f64,
    pub log_likelihood: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LexicalRelationIndex {
    config: LexicalConfig,
    version: u64,
    total_tokens: u64,
    unigrams: HashMap<String, u64>,
    pairs: HashMap<PairKey, u64>,
}

impl LexicalRelationIndex {
    /// Index a single token stream.
    pub fn build<S: AsRef<str>>(tokens: &[S], config: LexicalConfig) -> Result<Self> {
        Self::build_from_documents(std::slice::from_ref(&tokens), config)
    }

    /// Index several documents; windows never cross a document boundary.
    pub fn build_from_documents<D, S>(documents: &[D], config: LexicalConfig) -> Result<Self>
    where
        D: AsRef<[S]>,
        S: AsRef<str>,
    {
        if config.window == 0 {
            return Err(LexisError::malformed("lexical.window", "must be >= 1"));
        }

        let mut unigrams: HashMap<String, u64> = HashMap::new();
        let mut pairs: HashMap<PairKey, u64> = HashMap::new();
        let mut total_tokens = 0u64;

        for doc in documents {
            let tokens: Vec<&str> = doc
                .as_ref()
                .iter()
                .map(|t| t.as_ref().trim())
                .filter(|t| !t.is_empty())
                .collect();

            for (i, token) in tokens.iter().enumerate() {
                total_tokens += 1;
                *unigrams.entry((*token).to_string()).or_insert(0) += 1;

                let end = (i + 1 + config.window).min(tokens.len());
                for other in &tokens[i + 1..end] {
                    if other == token {
                        continue;
                    }
                    *pairs.entry(PairKey::new(token, other)).or_insert(0) += 1;
                }
            }
        }

        tracing::debug!(
            total_tokens,
            vocabulary = unigrams.len(),
            pairs = pairs.len(),
            window = config.window,
            "lexical index built"
        );

        Ok(Self {
            config,
            version: 0,
            total_tokens,
            unigrams,
            pairs,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn vocabulary_size(&self) -> usize {
        self.unigrams.len()
    }

    pub fn count(&self, word: &str) -> u64 {
        self.unigrams.get(word).copied().unwrap_or(0)
    }

    pub fn cooccurrence(&self, a: &str, b: &str) -> u64 {
        if a == b {
            return 0;
        }
        self.pairs.get(&PairKey::new(a, b)).copied().unwrap_or(0)
    }

    fn counts(&self, a: &str, b: &str) -> Option<(f64, f64, f64)> {
        let observed = self.cooccurrence(a, b);
        let count_a = self.count(a);
        let count_b = self.count(b);
        if observed == 0 || count_a == 0 || count_b == 0 {
            return None;
        }
        Some((observed as f64, count_a as f64, count_b as f64))
    }

    pub fn pmi(&self, a: &str, b: &str) -> Option<f64> {
        let (observed, count_a, count_b) = self.counts(a, b)?;
        let n = self.total_tokens as f64;
        let expected = count_a * count_b / n;
        Some((observed / expected).log2())
    }

    pub fn npmi(&self, a: &str, b: &str) -> Option<f64> {
        let pmi = self.pmi(a, b)?;
        let (observed, _, _) = self.counts(a, b)?;
        let p = observed / self.total_tokens as f64;
        if p >= 1.0 {
            // Pair saturates the corpus: perfect association
            return Some(1.0);
        }
        Some((pmi / -p.log2()).clamp(-1.0, 1.0))
    }

    pub fn log_likelihood(&self, a: &str, b: &str) -> Option<f64> {
        self.counts(a, b)?;
        // Canonical order keeps the statistic bit-identical under argument swap
        let key = PairKey::new(a, b);
        let count_a = self.count(&key.first);
        let count_b = self.count(&key.second);
        // Windowed counts can exceed a marginal; keep the 2x2 table summing to N
        let k11 = self
            .cooccurrence(&key.first, &key.second)
            .min(count_a)
            .min(count_b);
        let k12 = count_a.saturating_sub(k11);
        let k21 = count_b.saturating_sub(k11);
        let k22 = self
            .total_tokens
            .saturating_sub(count_a)
            .saturating_sub(count_b)
            .saturating_add(k11);
        Some(dunning_g2(k11, k12, k21, k22))
    }

    /// Full statistics for a pair regardless of significance.
    pub fn pair_stats(&self, a: &str, b: &str) -> Option<LexicalRelation> {
        let pmi = self.pmi(a, b)?;
        let npmi = self.npmi(a, b)?;
        let log_likelihood = self.log_likelihood(a, b)?;
        let cooccurrence = self.cooccurrence(a, b);
        let significant = log_likelihood >= self.config.significance_threshold
            && cooccurrence >= self.config.min_cooccurrence;
        Some(LexicalRelation {
            pair: PairKey::new(a, b),
            cooccurrence,
            pmi,
            npmi,
            log_likelihood,
            significant,
        })
    }

    /// Usable relation: present only when the pair passes the significance filter.
    pub fn relation(&self, a: &str, b: &str) -> Option<LexicalRelation> {
        self.pair_stats(a, b).filter(|r| r.significant)
    }

    /// Significant partners of `word`, strongest NPMI first.
    pub fn relations_for(&self, word: &str) -> Vec<LexicalRelation> {
        let mut relations: Vec<LexicalRelation> = self
            .pairs
            .keys()
            .filter_map(|key| key.partner_of(word))
            .filter_map(|partner| self.relation(word, partner))
            .collect();
        relations.sort_by(|x, y| {
            y.npmi
                .total_cmp(&x.npmi)
                .then_with(|| x.pair.cmp(&y.pair))
        });
        relations
    }

    pub fn significant_relations(&self, min_npmi: f64) -> Vec<LexicalRelation> {
        let mut relations: Vec<LexicalRelation> = self
            .pairs
            .keys()
            .filter_map(|key| self.relation(&key.first, &key.second))
            .filter(|r| r.npmi >= min_npmi)
            .collect();
        relations.sort_by(|x, y| x.pair.cmp(&y.pair));
        relations
    }
}

/// G² = 2 Σ k·ln(k·N / (row·col)); zero cells contribute nothing.
fn dunning_g2(k11: u64, k12: u64, k21: u64, k22: u64) -> f64 {
    let cells = [
        (k11 as f64, (k11 + k12) as f64, (k11 + k21) as f64),
        (k12 as f64, (k11 + k12) as f64, (k12 + k22) as f64),
        (k21 as f64, (k21 + k22) as f64, (k11 + k21) as f64),
        (k22 as f64, (k21 + k22) as f64, (k12 + k22) as f64),
    ];
    let n = (k11 + k12 + k21 + k22) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let sum: f64 = cells
        .iter()
        .filter(|(k, row, col)| *k > 0.0 && *row > 0.0 && *col > 0.0)
        .map(|(k, row, col)| k * (k * n / (row * col)).ln())
        .sum();
    (2.0 * sum).max(0.0)
}

// ==================== Snapshot cache ====================

/// Versioned corpus snapshot shared across pipeline invocations.
///
/// Readers clone the `Arc`; a rebuild indexes the new corpus outside the lock and swaps
/// the pointer, so no reader ever sees a partially built index.
#[derive(Debug, Default)]
pub struct RelationCache {
    current: RwLock<Arc<LexicalRelationIndex>>,
}

impl RelationCache {
    pub fn new(index: LexicalRelationIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<LexicalRelationIndex> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Rebuild from a new corpus and publish it; returns the new version.
    pub fn rebuild<D, S>(&self, documents: &[D], config: LexicalConfig) -> Result<u64>
    where
        D: AsRef<[S]>,
        S: AsRef<str>,
    {
        let mut index = LexicalRelationIndex::build_from_documents(documents, config)?;
        let mut guard = self.current.write();
        index.version = guard.version + 1;
        let version = index.version;
        *guard = Arc::new(index);
        drop(guard);

        tracing::info!(version, "lexical snapshot swapped");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternating() -> LexicalRelationIndex {
        let corpus = ["a", "b", "a", "b", "a", "b"];
        LexicalRelationIndex::build(
            &corpus,
            LexicalConfig {
                window: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_pair_key_order_independent() {
        assert_eq!(PairKey::new("x", "y"), PairKey::new("y", "x"));
        assert_eq!(PairKey::new("x", "y").partner_of("y"), Some("x"));
        assert_eq!(PairKey::new("x", "y").partner_of("z"), None);
    }

    #[test]
    fn test_alternating_corpus_counts() {
        let index = alternating();
        assert_eq!(index.total_tokens(), 6);
        assert_eq!(index.count("a"), 3);
        assert_eq!(index.cooccurrence("a", "b"), 5);
        assert_eq!(index.cooccurrence("a", "a"), 0);
    }

    #[test]
    fn test_alternating_corpus_strong_pmi() {
        let index = alternating();
        let pmi = index.pmi("a", "b").unwrap();
        assert!((pmi - (5.0f64 / 1.5).log2()).abs() < 1e-9);
        assert!(pmi > 1.0);
        assert_eq!(index.npmi("a", "b"), Some(1.0));
        // No contrasting tokens, so the pair carries no evidence
        assert!(index.relation("a", "b").is_none());
    }

    #[test]
    fn test_collocation_against_filler_is_significant() {
        let corpus = ["a", "b", "x", "y", "a", "b", "z", "w", "a", "b", "q", "r"];
        let index = LexicalRelationIndex::build(
            &corpus,
            LexicalConfig {
                window: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(index.cooccurrence("a", "b"), 3);
        let relation = index.relation("a", "b").unwrap();
        assert!((relation.npmi - 1.0).abs() < 1e-9);
        assert!(relation.log_likelihood > 13.0);
    }

    #[test]
    fn test_pmi_symmetric() {
        let corpus = "the cat sat on the mat while the dog sat on the rug"
            .split_whitespace()
            .collect::<Vec<_>>();
        let index = LexicalRelationIndex::build(&corpus, LexicalConfig::default()).unwrap();
        assert_eq!(index.pmi("cat", "sat"), index.pmi("sat", "cat"));
        assert_eq!(index.log_likelihood("on", "the"), index.log_likelihood("the", "on"));
    }

    #[test]
    fn test_zero_cooccurrence_is_none() {
        let corpus = ["a", "b", "c", "d", "e", "f"];
        let index = LexicalRelationIndex::build(
            &corpus,
            LexicalConfig {
                window: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(index.pmi("a", "f"), None);
        assert_eq!(index.npmi("a", "zzz"), None);
        assert!(index.pair_stats("a", "f").is_none());
    }

    #[test]
    fn test_rare_pair_not_significant() {
        // a and b co-occur exactly as often as chance predicts
        let corpus = ["a", "b", "c", "a", "c", "b", "c", "a", "c", "b"];
        let index = LexicalRelationIndex::build(
            &corpus,
            LexicalConfig {
                window: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let stats = index.pair_stats("a", "b").unwrap();
        assert_eq!(stats.cooccurrence, 1);
        assert!(stats.log_likelihood < 3.84);
        assert!(!stats.significant);
        assert!(index.relation("a", "b").is_none());
    }

    #[test]
    fn test_documents_do_not_share_windows() {
        let docs = vec![vec!["a", "b"], vec!["c", "d"]];
        let index =
            LexicalRelationIndex::build_from_documents(&docs, LexicalConfig::default()).unwrap();
        assert_eq!(index.cooccurrence("b", "c"), 0);
        assert_eq!(index.cooccurrence("a", "b"), 1);
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = LexicalRelationIndex::build(
            &["a"],
            LexicalConfig {
                window: 0,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, LexisError::MalformedInput { .. }));
    }

    #[test]
    fn test_cache_swaps_snapshot() {
        let cache = RelationCache::default();
        assert_eq!(cache.version(), 0);
        let before = cache.snapshot();

        let docs = vec![vec!["a", "b", "a", "b", "a", "b"]];
        let version = cache.rebuild(&docs, LexicalConfig::default()).unwrap();
        assert_eq!(version, 1);

        // Old readers keep their snapshot
        assert_eq!(before.total_tokens(), 0);
        assert_eq!(cache.snapshot().total_tokens(), 6);
        assert_eq!(cache.snapshot().version(), 1);
    }

    #[test]
    fn test_contingency_table_stays_consistent_for_wide_windows() {
        let index = LexicalRelationIndex::build(
            &["a", "b", "a"],
            LexicalConfig {
                window: 2,
                ..Default::default()
            },
        )
        .unwrap();
        // Two windowed pairs against a single "b"
        assert_eq!(index.cooccurrence("a", "b"), 2);
        assert_eq!(index.count("b"), 1);

        let g2 = index.log_likelihood("a", "b").unwrap();
        assert!(g2.is_finite() && g2 >= 0.0);
        assert!((g2 - dunning_g2(1, 1, 0, 1)).abs() < 1e-12);
    }
}
