//! Text normalization, edit distance and token alignment for response scoring.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Expected tokens are missing
    Omission,
    /// A different word was produced
    Substitution,
    /// Right tokens, wrong order
    Ordering,
    /// Right word, wrong form (spelling, inflection)
    FormError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Omission => "omission",
            ErrorKind::Substitution => "substitution",
            ErrorKind::Ordering => "ordering",
            ErrorKind::FormError => "form_error",
        }
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn tokens(s: &str) -> Vec<String> {
    normalize(s).split(' ').filter(|t| !t.is_empty()).map(String::from).collect()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 1 - distance / longer length; 1.0 for two empty strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Jaccard overlap of the token sets.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let ta: std::collections::BTreeSet<String> = tokens(a).into_iter().collect();
    let tb: std::collections::BTreeSet<String> = tokens(b).into_iter().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    inter as f64 / union as f64
}

/// Two tokens are forms of one word when they share a stem or are a small edit apart.
fn same_word(a: &str, b: &str) -> bool {
    let prefix = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
    prefix >= 3 || similarity(a, b) >= 0.5
}

fn lcs_pairs(e: &[String], a: &[String]) -> usize {
    let mut dp = vec![vec![0usize; a.len() + 1]; e.len() + 1];
    for i in 0..e.len() {
        for j in 0..a.len() {
            dp[i + 1][j + 1] = if e[i] == a[j] {
                dp[i][j] + 1
            } else {
                dp[i][j + 1].max(dp[i + 1][j])
            };
        }
    }
    dp[e.len()][a.len()]
}

/// Classify the dominant error from token-level alignment; `None` when the token
/// sequences agree.
pub fn classify_error(expected: &str, actual: &str) -> Option<ErrorKind> {
    let e = tokens(expected);
    let a = tokens(actual);
    if e == a {
        return None;
    }
    if a.is_empty() {
        return Some(ErrorKind::Omission);
    }

    let mut es = e.clone();
    let mut as_ = a.clone();
    es.sort();
    as_.sort();
    if es == as_ {
        return Some(ErrorKind::Ordering);
    }

    let common = lcs_pairs(&e, &a);
    let missing = e.len() - common;
    let extra = a.len() - common;
    if extra == 0 && missing > 0 {
        return Some(ErrorKind::Omission);
    }

    let unmatched_expected: Vec<&String> = e.iter().filter(|t| !a.contains(t)).collect();
    let unmatched_actual: Vec<&String> = a.iter().filter(|t| !e.contains(t)).collect();
    let all_forms = !unmatched_actual.is_empty()
        && unmatched_actual
            .iter()
            .all(|x| unmatched_expected.iter().any(|y| same_word(x, y)));
    if all_forms {
        Some(ErrorKind::FormError)
    } else {
        Some(ErrorKind::Substitution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello,   World! "), "hello world");
        assert_eq!(normalize("don't"), "don't");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("recieve", "receive") - 5.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_overlap() {
        assert!((token_overlap("the red car", "the blue car") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_classify_errors() {
        assert_eq!(classify_error("I went home", "I went home"), None);
        assert_eq!(classify_error("I went home", ""), Some(ErrorKind::Omission));
        assert_eq!(classify_error("I went home", "I home"), Some(ErrorKind::Omission));
        assert_eq!(classify_error("I went home", "home I went"), Some(ErrorKind::Ordering));
        assert_eq!(classify_error("I went home", "I goed home"), Some(ErrorKind::Substitution));
        assert_eq!(classify_error("I went home", "I wnet home"), Some(ErrorKind::FormError));
        assert_eq!(classify_error("she walks", "she walked"), Some(ErrorKind::FormError));
        assert_eq!(classify_error("a big dog", "a small cat"), Some(ErrorKind::Substitution));
    }
}
