use strsim::levenshtein;

/// Normalized edit-distance similarity in [0.0, 1.0].
///
/// `(max_len - levenshtein(a, b)) / max_len`, measured in chars. Two empty
/// strings are identical. No normalization beyond what the caller applies.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = levenshtein(a, b);
    (max_len - distance) as f64 / max_len as f64
}
