pub mod competitors;
mod grounded;
pub mod identifiers;
mod listrank;
mod sentiment;

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::model::SourceCitation;

pub use competitors::CompetitorMention;
pub use identifiers::BrandProfile;

/// Keywords whose presence marks a recommendation context and nudges
/// confidence upward.
const RECOMMENDATION_KEYWORDS: &[&str] = &[
    "recommend",
    "suggest",
    "top pick",
    "best choice",
    "great option",
    "worth considering",
    "check out",
    "popular choice",
];

static RECOMMENDATION: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(RECOMMENDATION_KEYWORDS)
        .expect("recommendation keyword automaton")
});

/// How the brand was detected in a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Matched against real citation URLs returned by the platform.
    Grounded,
    /// Matched as an identifier substring of the free-form response text.
    TextMatch,
}

/// Sentiment bucket produced by the keyword heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Structured outcome of analyzing one model response for one brand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub found: bool,
    pub method: DetectionMethod,
    pub rank: Option<usize>,
    /// `[0, 1]`; `0.0` when not found, at least `0.5` when found.
    pub confidence: f64,
    pub sentiment: Sentiment,
    /// ±`context_window` characters around the first identifier match.
    pub mention_context: Option<String>,
    pub matched_identifiers: Vec<String>,
    pub competitors: Vec<CompetitorMention>,
}

/// Tunable windows for the detection heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Characters captured on each side of the first mention.
    pub context_window: usize,
    /// Characters scanned on each side of each mention for sentiment keywords.
    pub sentiment_window: usize,
    /// Maximum number of competitor mentions reported.
    pub competitor_cap: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            context_window: 100,
            sentiment_window: 200,
            competitor_cap: 10,
        }
    }
}

/// Turns one model's raw text and citations into a structured [`Detection`].
#[derive(Debug, Clone, Default)]
pub struct DetectionEngine {
    config: DetectionConfig,
}

impl DetectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Analyze one response. Never fails: malformed URLs and other oddities
    /// degrade to `found = false` / `confidence = 0.0` / `rank = None`.
    #[instrument(name = "detect", skip(self, text, sources, profile), fields(text_len = text.len(), source_count = sources.len()))]
    pub fn detect(&self, text: &str, sources: &[SourceCitation], profile: &BrandProfile) -> Detection {
        let grounded_rank = if sources.is_empty() {
            None
        } else {
            grounded::match_sources(profile, sources)
        };

        let matches = profile.find_matches(text);
        let found = grounded_rank.is_some() || !matches.is_empty();
        let method = if grounded_rank.is_some() {
            DetectionMethod::Grounded
        } else {
            DetectionMethod::TextMatch
        };

        let rank = grounded_rank.or_else(|| {
            if matches.is_empty() {
                None
            } else {
                listrank::rank_from_list(text, profile)
            }
        });

        let mention_context = matches.first().map(|m| {
            excerpt(text, (m.start, m.end), self.config.context_window)
        });

        let spans: Vec<(usize, usize)> = matches.iter().map(|m| (m.start, m.end)).collect();
        let sentiment_label = sentiment::classify_around(text, &spans, self.config.sentiment_window);

        let mut matched_identifiers: Vec<String> = Vec::new();
        for m in &matches {
            let identifier = &profile.identifiers()[m.identifier];
            if !matched_identifiers.contains(identifier) {
                matched_identifiers.push(identifier.clone());
            }
        }

        let confidence = confidence(found, matched_identifiers.len(), matches.len(), text);
        let competitors = competitors::extract(
            text,
            profile,
            self.config.competitor_cap,
            self.config.sentiment_window,
        );

        debug!(found, ?method, ?rank, confidence, "detection completed");

        Detection {
            found,
            method,
            rank,
            confidence,
            sentiment: sentiment_label,
            mention_context,
            matched_identifiers,
            competitors,
        }
    }
}

/// Base 0.5 once found, plus capped boosts for identifier diversity, repeat
/// mentions and recommendation context; clamped to `[0, 1]`.
fn confidence(found: bool, distinct_identifiers: usize, total_mentions: usize, text: &str) -> f64 {
    if !found {
        return 0.0;
    }
    let identifier_boost = (0.1 * distinct_identifiers as f64).min(0.3);
    let repeat_boost = (0.1 * total_mentions.saturating_sub(1) as f64).min(0.3);
    let mut recommendation_hits = std::collections::HashSet::new();
    for m in RECOMMENDATION.find_iter(text) {
        recommendation_hits.insert(m.pattern().as_usize());
    }
    let recommendation_boost = (0.05 * recommendation_hits.len() as f64).min(0.3);
    (0.5 + identifier_boost + repeat_boost + recommendation_boost).clamp(0.0, 1.0)
}

fn excerpt(text: &str, span: (usize, usize), window: usize) -> String {
    let lo = floor_char_boundary(text, span.0.saturating_sub(window));
    let hi = ceil_char_boundary(text, span.1.saturating_add(window));
    text[lo..hi].to_string()
}

pub(crate) fn floor_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor > 0 && !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

pub(crate) fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor < text.len() && !text.is_char_boundary(cursor) {
        cursor += 1;
    }
    cursor
}
