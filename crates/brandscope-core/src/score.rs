use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::{CompetitorMention, Detection, DetectionMethod, Sentiment};
use crate::model::{catalog, ModelCallError, ModelOutput, PlatformType, SourceCitation, TokenUsage};

/// Outcome state of a single (query, model) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Pending,
    Complete,
    Error,
}

/// Qualitative agreement bucket shared by query-level scoring and rank
/// aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusLevel {
    Strong,
    Moderate,
    Weak,
    None,
}

/// Immutable per-(query, model) outcome. Created exactly once by the run that
/// owns it and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_id: String,
    pub status: ModelStatus,
    pub found: bool,
    pub method: DetectionMethod,
    pub sources: Vec<SourceCitation>,
    pub mention_context: Option<String>,
    pub sentiment: Sentiment,
    /// Detection confidence in `[0, 1]`; `0.0` whenever `found` is false.
    pub confidence: f64,
    pub rank: Option<usize>,
    pub matched_identifiers: Vec<String>,
    pub competitors: Vec<CompetitorMention>,
    pub response_text: String,
    pub tokens: TokenUsage,
    pub latency_ms: u64,
    pub cost: f64,
    pub error: Option<String>,
}

impl ModelResult {
    /// Build a completed cell from a model reply and its detection outcome.
    pub fn from_output(model_id: impl Into<String>, output: ModelOutput, detection: Detection) -> Self {
        Self {
            model_id: model_id.into(),
            status: ModelStatus::Complete,
            found: detection.found,
            method: detection.method,
            sources: output.sources,
            mention_context: detection.mention_context,
            sentiment: detection.sentiment,
            confidence: detection.confidence,
            rank: detection.rank,
            matched_identifiers: detection.matched_identifiers,
            competitors: detection.competitors,
            response_text: output.text,
            tokens: output.tokens,
            latency_ms: output.latency_ms,
            cost: output.cost,
            error: None,
        }
    }

    /// Build an error-shaped cell. Detection fields degrade to safe defaults
    /// and nothing is billed for the failed call.
    pub fn from_error(model_id: impl Into<String>, error: &ModelCallError, latency_ms: u64) -> Self {
        Self {
            model_id: model_id.into(),
            status: ModelStatus::Error,
            found: false,
            method: DetectionMethod::TextMatch,
            sources: Vec::new(),
            mention_context: None,
            sentiment: Sentiment::Neutral,
            confidence: 0.0,
            rank: None,
            matched_identifiers: Vec::new(),
            competitors: Vec::new(),
            response_text: String::new(),
            tokens: TokenUsage::default(),
            latency_ms,
            cost: 0.0,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate over every [`ModelResult`] of a single query. Derived data,
/// recomputed from the cells and never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    /// Percentage (0–100) of tested models that found the brand.
    pub citation_rate: f64,
    pub search_hits: usize,
    pub chat_hits: usize,
    /// Mean sentiment of the models that found the brand, in `[-1, 1]`.
    pub avg_sentiment: f64,
    pub avg_rank: Option<f64>,
    pub avg_confidence: f64,
    /// Composite 0–100 visibility score.
    pub visibility_score: u8,
    pub consensus: ConsensusLevel,
    pub results: Vec<ModelResult>,
}

/// Aggregate over every [`QueryResult`] of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tests: usize,
    pub completed: usize,
    pub errored: usize,
    pub overall_score: u8,
    pub per_model_citation_rate: BTreeMap<String, f64>,
    pub total_cost: f64,
    pub total_latency_ms: u64,
}

pub(crate) fn sentiment_value(sentiment: Sentiment) -> f64 {
    match sentiment {
        Sentiment::Positive => 1.0,
        Sentiment::Negative => -1.0,
        Sentiment::Neutral => 0.0,
    }
}

/// Composite visibility score: 40% citation rate, 30% sentiment, 20% rank,
/// 10% confidence, rounded to the nearest integer and clamped to 0–100.
fn composite_score(
    citation_rate: f64,
    avg_sentiment: f64,
    avg_rank: Option<f64>,
    avg_confidence: f64,
    found_count: usize,
) -> u8 {
    let sentiment_component = (avg_sentiment + 1.0) / 2.0 * 100.0;
    let rank_component = match avg_rank {
        Some(avg) => ((11.0 - avg) / 10.0).max(0.0) * 100.0,
        None if found_count > 0 => 50.0,
        None => 0.0,
    };
    let score = 0.4 * citation_rate
        + 0.3 * sentiment_component
        + 0.2 * rank_component
        + 0.1 * avg_confidence * 100.0;
    score.round().clamp(0.0, 100.0) as u8
}

fn consensus_level(citation_rate: f64, sentiment_agreement: f64) -> ConsensusLevel {
    let rate = citation_rate / 100.0;
    if rate >= 0.8 && sentiment_agreement >= 0.8 {
        ConsensusLevel::Strong
    } else if rate >= 0.6 && sentiment_agreement >= 0.6 {
        ConsensusLevel::Moderate
    } else if rate >= 0.4 {
        ConsensusLevel::Weak
    } else {
        ConsensusLevel::None
    }
}

/// Fraction of found models sharing the majority sentiment; 0.0 when no model
/// found the brand.
fn sentiment_agreement(results: &[ModelResult]) -> f64 {
    let found: Vec<_> = results.iter().filter(|r| r.found).collect();
    if found.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 3];
    for result in &found {
        let idx = match result.sentiment {
            Sentiment::Positive => 0,
            Sentiment::Negative => 1,
            Sentiment::Neutral => 2,
        };
        counts[idx] += 1;
    }
    let majority = counts.iter().copied().max().unwrap_or(0);
    majority as f64 / found.len() as f64
}

/// Roll the per-model cells of one query up into a [`QueryResult`].
pub fn aggregate_query(query_id: impl Into<String>, results: Vec<ModelResult>) -> QueryResult {
    let total = results.len();
    let found: Vec<_> = results.iter().filter(|r| r.found).collect();
    let found_count = found.len();
    let citation_rate = if total == 0 {
        0.0
    } else {
        found_count as f64 / total as f64 * 100.0
    };

    let mut search_hits = 0;
    let mut chat_hits = 0;
    for result in &found {
        match catalog::descriptor(&result.model_id).map(|d| d.platform) {
            Some(PlatformType::Search) => search_hits += 1,
            _ => chat_hits += 1,
        }
    }

    let avg_sentiment = if found_count == 0 {
        0.0
    } else {
        found.iter().map(|r| sentiment_value(r.sentiment)).sum::<f64>() / found_count as f64
    };
    let ranks: Vec<f64> = found.iter().filter_map(|r| r.rank).map(|r| r as f64).collect();
    let avg_rank = if ranks.is_empty() {
        None
    } else {
        Some(ranks.iter().sum::<f64>() / ranks.len() as f64)
    };
    let avg_confidence = if found_count == 0 {
        0.0
    } else {
        found.iter().map(|r| r.confidence).sum::<f64>() / found_count as f64
    };

    let visibility_score =
        composite_score(citation_rate, avg_sentiment, avg_rank, avg_confidence, found_count);
    let consensus = consensus_level(citation_rate, sentiment_agreement(&results));

    QueryResult {
        query_id: query_id.into(),
        citation_rate,
        search_hits,
        chat_hits,
        avg_sentiment,
        avg_rank,
        avg_confidence,
        visibility_score,
        consensus,
        results,
    }
}

/// Roll emitted query results up into the terminal [`RunSummary`].
///
/// `total_tests` is the planned cell count; it can exceed the observed cells
/// when a run was cancelled partway through.
pub fn aggregate_run(query_results: &[QueryResult], total_tests: usize) -> RunSummary {
    let mut completed = 0;
    let mut errored = 0;
    let mut total_cost = 0.0;
    let mut total_latency_ms = 0;
    let mut per_model: BTreeMap<String, (usize, usize)> = BTreeMap::new();

    for query in query_results {
        for cell in &query.results {
            match cell.status {
                ModelStatus::Complete => completed += 1,
                ModelStatus::Error => errored += 1,
                ModelStatus::Pending => {}
            }
            total_cost += cell.cost;
            total_latency_ms += cell.latency_ms;
            let entry = per_model.entry(cell.model_id.clone()).or_insert((0, 0));
            entry.1 += 1;
            if cell.found {
                entry.0 += 1;
            }
        }
    }

    let overall_score = if query_results.is_empty() {
        0
    } else {
        let sum: u32 = query_results.iter().map(|q| q.visibility_score as u32).sum();
        (sum as f64 / query_results.len() as f64).round() as u8
    };

    let per_model_citation_rate = per_model
        .into_iter()
        .map(|(model, (hits, total))| {
            let rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 * 100.0 };
            (model, rate)
        })
        .collect();

    RunSummary {
        total_tests,
        completed,
        errored,
        overall_score,
        per_model_citation_rate,
        total_cost,
        total_latency_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(model_id: &str, found: bool, sentiment: Sentiment, confidence: f64, rank: Option<usize>) -> ModelResult {
        ModelResult {
            model_id: model_id.into(),
            status: ModelStatus::Complete,
            found,
            method: DetectionMethod::TextMatch,
            sources: Vec::new(),
            mention_context: None,
            sentiment,
            confidence,
            rank,
            matched_identifiers: Vec::new(),
            competitors: Vec::new(),
            response_text: String::new(),
            tokens: TokenUsage::default(),
            latency_ms: 100,
            cost: 0.001,
            error: None,
        }
    }

    #[test]
    fn citation_rate_is_found_over_total() {
        let query = aggregate_query(
            "q1",
            vec![
                cell("gpt-4o-mini", true, Sentiment::Positive, 0.6, None),
                cell("claude-haiku", false, Sentiment::Neutral, 0.0, None),
            ],
        );
        assert!((query.citation_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn composite_score_matches_weighted_formula() {
        // One model, found, positive, rank 1, confidence 0.8:
        // 0.4*100 + 0.3*100 + 0.2*100 + 0.1*80 = 118 -> clamped to 100.
        let query = aggregate_query(
            "q1",
            vec![cell("gpt-4o-mini", true, Sentiment::Positive, 0.8, Some(1))],
        );
        assert_eq!(query.visibility_score, 100);

        // Found with no rank anywhere: rank component falls back to 50.
        // 0.4*100 + 0.3*50 + 0.2*50 + 0.1*50 = 70.
        let query = aggregate_query(
            "q2",
            vec![cell("gpt-4o-mini", true, Sentiment::Neutral, 0.5, None)],
        );
        assert_eq!(query.visibility_score, 70);

        // Nothing found: all components zero except neutral sentiment midpoint.
        // 0.4*0 + 0.3*50 + 0.2*0 + 0.1*0 = 15.
        let query = aggregate_query(
            "q3",
            vec![cell("gpt-4o-mini", false, Sentiment::Neutral, 0.0, None)],
        );
        assert_eq!(query.visibility_score, 15);
    }

    #[test]
    fn rank_component_degrades_past_rank_ten() {
        // avg rank 12 -> (11-12)/10 clamps to 0.
        let with_deep_rank = aggregate_query(
            "q1",
            vec![cell("gpt-4o-mini", true, Sentiment::Neutral, 0.5, Some(12))],
        );
        // 0.4*100 + 0.3*50 + 0.2*0 + 0.1*50 = 60.
        assert_eq!(with_deep_rank.visibility_score, 60);
    }

    #[test]
    fn consensus_buckets_follow_thresholds() {
        // 2/2 found, both positive: strong.
        let strong = aggregate_query(
            "q",
            vec![
                cell("a", true, Sentiment::Positive, 0.6, None),
                cell("b", true, Sentiment::Positive, 0.6, None),
            ],
        );
        assert_eq!(strong.consensus, ConsensusLevel::Strong);

        // 2/3 found (66%), sentiment split 1/1 (agreement 0.5): weak.
        let weak = aggregate_query(
            "q",
            vec![
                cell("a", true, Sentiment::Positive, 0.6, None),
                cell("b", true, Sentiment::Negative, 0.6, None),
                cell("c", false, Sentiment::Neutral, 0.0, None),
            ],
        );
        assert_eq!(weak.consensus, ConsensusLevel::Weak);

        // 0/2 found: none.
        let none = aggregate_query(
            "q",
            vec![
                cell("a", false, Sentiment::Neutral, 0.0, None),
                cell("b", false, Sentiment::Neutral, 0.0, None),
            ],
        );
        assert_eq!(none.consensus, ConsensusLevel::None);
    }

    #[test]
    fn error_cells_carry_zero_cost_and_confidence() {
        let err = ModelResult::from_error("gpt-4o-mini", &ModelCallError::Timeout, 450);
        assert_eq!(err.status, ModelStatus::Error);
        assert!(!err.found);
        assert_eq!(err.cost, 0.0);
        assert_eq!(err.confidence, 0.0);
        assert_eq!(err.latency_ms, 450);
        assert!(err.error.is_some());
    }

    #[test]
    fn run_summary_totals_across_queries() {
        let q1 = aggregate_query(
            "q1",
            vec![
                cell("a", true, Sentiment::Positive, 0.6, None),
                cell("b", false, Sentiment::Neutral, 0.0, None),
            ],
        );
        let q2 = aggregate_query(
            "q2",
            vec![
                cell("a", true, Sentiment::Positive, 0.6, None),
                cell("b", true, Sentiment::Neutral, 0.5, None),
            ],
        );
        let summary = aggregate_run(&[q1, q2], 4);
        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.errored, 0);
        assert!((summary.per_model_citation_rate["a"] - 100.0).abs() < f64::EPSILON);
        assert!((summary.per_model_citation_rate["b"] - 50.0).abs() < f64::EPSILON);
        assert!((summary.total_cost - 0.004).abs() < 1e-9);
        assert_eq!(summary.total_latency_ms, 400);
    }
}
