//! Fuzzy value matcher
//!
//! Score = normalized Levenshtein similarity + prefix bonus + frequency bonus,
//! clamped to 1.0. A case-insensitive exact hit short-circuits with 1.0.

use super::ValueFrequency;
use strsim::levenshtein;

pub const DEFAULT_THRESHOLD: f64 = 0.7;
pub const PREFIX_LEN: usize = 3;
pub const PREFIX_BONUS: f64 = 0.10;
pub const FREQUENCY_BONUS_WEIGHT: f64 = 0.05;
pub const FREQUENCY_SATURATION: f64 = 1000.0;

/// `1 - lev(a, b) / max(|a|, |b|)` on lowercased input, in [0, 1]
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Bonus when the candidate starts with the first three characters of the query
pub fn prefix_bonus(query: &str, candidate: &str) -> f64 {
    let query = query.to_lowercase();
    let prefix: String = query.chars().take(PREFIX_LEN).collect();
    if candidate.to_lowercase().starts_with(&prefix) {
        PREFIX_BONUS
    } else {
        0.0
    }
}

/// Up to 0.05, proportional to `min(1, frequency / 1000)`
pub fn frequency_bonus(frequency: u64) -> f64 {
    (frequency as f64 / FREQUENCY_SATURATION).min(1.0) * FREQUENCY_BONUS_WEIGHT
}

/// Combined fuzzy score for one candidate, clamped to 1.0
pub fn score(query: &str, candidate: &str, frequency: u64) -> f64 {
    let total = normalized_similarity(query, candidate)
        + prefix_bonus(query, candidate)
        + frequency_bonus(frequency);
    total.min(1.0)
}

/// Best candidate for `value` among sampled values (in sampling order).
/// Exact case-insensitive matches win outright with 1.0.
pub fn best_match(value: &str, candidates: &[ValueFrequency], threshold: f64) -> Option<(String, f64)> {
    let value_lower = value.to_lowercase();
    if let Some(exact) = candidates
        .iter()
        .find(|c| c.value.to_lowercase() == value_lower)
    {
        return Some((exact.value.clone(), 1.0));
    }

    let mut best: Option<(String, f64)> = None;
    for candidate in candidates {
        let candidate_score = score(value, &candidate.value, candidate.frequency);
        if candidate_score < threshold {
            continue;
        }
        // strict comparison keeps the first candidate on ties
        let better = match &best {
            Some((_, best_score)) => candidate_score > *best_score,
            None => true,
        };
        if better {
            best = Some((candidate.value.clone(), candidate_score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[(&str, u64)]) -> Vec<ValueFrequency> {
        items
            .iter()
            .map(|(v, f)| ValueFrequency {
                value: v.to_string(),
                frequency: *f,
            })
            .collect()
    }

    #[test]
    fn test_bjprn_matches_bjorn() {
        let candidates = values(&[("Bjorn", 1)]);
        let (value, score) = best_match("Bjprn", &candidates, DEFAULT_THRESHOLD).unwrap();
        assert_eq!(value, "Bjorn");
        assert!(score >= 0.7);
    }

    #[test]
    fn test_exact_formula() {
        // lev("bjprn", "bjorn") = 1 over 5 chars, no prefix bonus ("bjp"), freq 1
        let expected = 0.8 + 0.0 + 0.05 * (1.0 / 1000.0);
        assert!((score("Bjprn", "Bjorn", 1) - expected).abs() < 1e-12);

        // prefix bonus applies: "hel" prefixes "helena"
        let expected = (1.0 - 1.0 / 6.0) + 0.10 + 0.05 * 0.5;
        assert!((score("Helen", "Helena", 500) - expected).abs() < 1e-12);

        // frequency bonus saturates at 1000
        assert!((frequency_bonus(5000) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_score_is_clamped() {
        // 0.9 + 0.10 + 0.05 would exceed 1.0 unclamped
        assert_eq!(score("Alexandrea", "Alexandria", 10_000), 1.0);
    }

    #[test]
    fn test_exact_match_beats_bonused_fuzzy() {
        // "Luisa" is frequent and shares the prefix, the exact hit still wins
        let candidates = values(&[("Luisa", 5000), ("LUIS", 1)]);
        assert_eq!(
            best_match("Luis", &candidates, DEFAULT_THRESHOLD),
            Some(("LUIS".to_string(), 1.0))
        );
    }

    #[test]
    fn test_ties_resolve_to_first() {
        let candidates = values(&[("Marc", 1), ("Mark", 1)]);
        let (value, _) = best_match("Marx", &candidates, 0.5).unwrap();
        assert_eq!(value, "Marc");
    }

    #[test]
    fn test_below_threshold_is_none() {
        let candidates = values(&[("Frank", 3)]);
        assert_eq!(best_match("Zoe", &candidates, DEFAULT_THRESHOLD), None);
    }

    #[test]
    fn test_idempotent() {
        let candidates = values(&[("Helena", 2), ("Hugh", 1), ("Heather", 4)]);
        let first = best_match("Helna", &candidates, DEFAULT_THRESHOLD);
        let second = best_match("Helna", &candidates, DEFAULT_THRESHOLD);
        assert_eq!(first, second);
    }
}
