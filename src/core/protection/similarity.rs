// String similarity used by the mass-post detector.
//
// Works on chars rather than bytes so a single emoji or accented letter
// counts as one edit.

/// Classic edit distance: insertions, deletions and substitutions all cost 1.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // table[i][j] = distance between a[..i] and b[..j]
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in table.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        table[0][j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            table[i][j] = (table[i - 1][j] + 1)
                .min(table[i][j - 1] + 1)
                .min(table[i - 1][j - 1] + cost);
        }
    }

    table[a.len()][b.len()]
}

/// Normalized similarity in `[0.0, 1.0]`.
///
/// `1 - distance / max(len(a), len(b))`. If either side is empty the
/// result is 0, so empty messages are never considered similar.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let longest = a.chars().count().max(b.chars().count());
    let distance = levenshtein_distance(a, b);

    1.0 - distance as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_distances() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("", ""), 0);
    }

    #[test]
    fn test_multibyte_chars_count_once() {
        assert_eq!(levenshtein_distance("héllo", "hello"), 1);
        assert_eq!(levenshtein_distance("🎉", "🎊"), 1);
    }

    #[test]
    fn test_similarity_edges() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("free nitro", "free nitro"), 1.0);
        assert_eq!(similarity("abcd", "abcx"), 0.75);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn similarity_is_symmetric(a in ".{0,24}", b in ".{0,24}") {
            prop_assert_eq!(similarity(&a, &b), similarity(&b, &a));
        }

        #[test]
        fn similarity_with_self_is_one(a in ".{1,24}") {
            prop_assert_eq!(similarity(&a, &a), 1.0);
        }

        #[test]
        fn similarity_stays_in_unit_range(a in ".{0,24}", b in ".{0,24}") {
            let s = similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn zero_distance_iff_equal(a in "[a-c]{0,6}", b in "[a-c]{0,6}") {
            prop_assert_eq!(levenshtein_distance(&a, &b) == 0, a == b);
        }
    }
}
