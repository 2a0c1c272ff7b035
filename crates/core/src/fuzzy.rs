//! Approximate block similarity.
//!
//! Used to decide whether an insertion in one edit script and a deletion
//! in another are "the same change" — never to approve a merge by itself.
//! The acceptance threshold lives in `[merge] fuzzy_threshold`, nowhere
//! else.

use similar::TextDiff;

/// Normalized similarity between two multi-line blocks, 0–100.
///
/// 100 means identical; values just below tolerate incidental whitespace
/// and formatting drift.
pub fn similarity(a: &str, b: &str) -> u8 {
    if a == b {
        return 100;
    }
    let ratio = TextDiff::from_chars(a, b).ratio();
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// `true` when the similarity of the two blocks meets the threshold.
pub fn is_similar(a: &str, b: &str, threshold: u8) -> bool {
    similarity(a, b) >= threshold
}
