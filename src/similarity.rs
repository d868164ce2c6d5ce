//! String similarity scores shared by the merger and the response classifier.
//!
//! Inputs are expected in [`crate::canon::normalize`]d form. Scores on the
//! 0-100 scale follow the usual fuzzy-matching convention; the containment
//! score is a 0-1 ratio.

use std::collections::BTreeSet;

/// Character-level similarity, 0-100.
///
/// Normalized Levenshtein similarity, `1 - distance / longer length`. A
/// substitution costs one edit here, so this scores below an insert/delete
/// (Indel) ratio for the same pair: one added letter in a six-letter word is
/// 85.7, not 92.3. Either side empty scores 0.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Token-set similarity, 0-100.
///
/// Compares the shared tokens against each side's full token set, so word
/// order and repeated words do not matter, and a title whose words are all
/// contained in the other scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let shared = join(tokens_a.intersection(&tokens_b));
    let only_a = join(tokens_a.difference(&tokens_b));
    let only_b = join(tokens_b.difference(&tokens_a));

    let combined_a = concat(&shared, &only_a);
    let combined_b = concat(&shared, &only_b);

    ratio(&shared, &combined_a)
        .max(ratio(&shared, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

/// Containment score, 0-1: `shorter / longer` in characters when one string
/// contains the other, `None` otherwise.
pub fn containment(a: &str, b: &str) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if !(a.contains(b) || b.contains(a)) {
        return None;
    }

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    Some(len_a.min(len_b) / len_a.max(len_b))
}

fn join<'a, 'b: 'a>(tokens: impl Iterator<Item = &'a &'b str>) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

fn concat(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{} {}", head, tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_bounds() {
        assert_eq!(ratio("saude", "saude"), 100.0);
        assert_eq!(ratio("", "saude"), 0.0);
        assert!(ratio("esgoto", "esgotos") > 85.0);
        assert!(ratio("esgoto", "asfalto") < 60.0);
    }

    #[test]
    fn test_ratio_single_edit_scores() {
        // one insertion over seven characters
        assert!((ratio("esgoto", "esgotto") - 600.0 / 7.0).abs() < 1e-9);
        // one substitution over six characters
        assert!((ratio("escola", "escula") - 500.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_set_ignores_order_and_subsets() {
        assert_eq!(token_set_ratio("posto saude", "saude posto"), 100.0);
        assert_eq!(token_set_ratio("melhoria saude", "melhoria"), 100.0);
        assert!(token_set_ratio("nova categoria", "esgoto") < 50.0);
        assert_eq!(token_set_ratio("", "esgoto"), 0.0);
    }

    #[test]
    fn test_containment() {
        assert_eq!(containment("saude", "saude"), Some(1.0));
        assert_eq!(containment("posto", "posto saude"), Some(5.0 / 11.0));
        assert_eq!(containment("escola", "saude"), None);
        assert_eq!(containment("", "saude"), None);
    }
}
