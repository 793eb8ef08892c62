//! Keyword-window sentiment heuristic.
//!
//! Deliberately not semantic analysis: fixed keyword lists counted inside a
//! window around each brand mention, with a pinned threshold rule.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;

use super::{ceil_char_boundary, floor_char_boundary, Sentiment};

pub(crate) const POSITIVE_KEYWORDS: &[&str] = &[
    "best",
    "great",
    "excellent",
    "recommend",
    "recommended",
    "top",
    "leading",
    "reliable",
    "trusted",
    "quality",
    "popular",
    "outstanding",
    "impressive",
    "affordable",
    "favorite",
    "love",
];

pub(crate) const NEGATIVE_KEYWORDS: &[&str] = &[
    "avoid",
    "poor",
    "bad",
    "worst",
    "unreliable",
    "scam",
    "overpriced",
    "disappointing",
    "complaint",
    "issue",
    "problem",
    "beware",
    "faulty",
    "lawsuit",
];

static POSITIVE: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(POSITIVE_KEYWORDS)
        .expect("positive keyword automaton")
});

static NEGATIVE: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(NEGATIVE_KEYWORDS)
        .expect("negative keyword automaton")
});

/// Classify sentiment around the given mention spans. Keywords are counted
/// within `window` characters on each side of every mention; `positive` only
/// when positives outnumber negatives by more than one (and vice versa).
pub(crate) fn classify_around(text: &str, mentions: &[(usize, usize)], window: usize) -> Sentiment {
    if mentions.is_empty() {
        return Sentiment::Neutral;
    }
    let mut positives = 0usize;
    let mut negatives = 0usize;
    for &(start, end) in mentions {
        let lo = floor_char_boundary(text, start.saturating_sub(window));
        let hi = ceil_char_boundary(text, end.saturating_add(window));
        let slice = &text[lo..hi];
        positives += POSITIVE.find_iter(slice).count();
        negatives += NEGATIVE.find_iter(slice).count();
    }
    if positives > negatives + 1 {
        Sentiment::Positive
    } else if negatives > positives + 1 {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}
