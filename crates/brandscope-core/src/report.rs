use std::fmt::Write;

use serde::Serialize;

use crate::score::{ConsensusLevel, QueryResult, RunSummary};

/// Format styles supported in default reporter implementations.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce a report string from a [`RunSummary`] using the desired format.
pub fn render_summary(summary: &RunSummary, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(summary),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonSummary::from(summary))?),
    }
}

fn render_human(summary: &RunSummary) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Overall Score: {}/100", summary.overall_score)?;
    writeln!(
        out,
        "Tests: {} planned, {} completed, {} errored",
        summary.total_tests, summary.completed, summary.errored
    )?;
    writeln!(out)?;

    if summary.per_model_citation_rate.is_empty() {
        writeln!(out, "No model results recorded.")?;
    } else {
        writeln!(out, "Citation rate by model:")?;
        for (model, rate) in &summary.per_model_citation_rate {
            writeln!(out, "  - {model:<24} {rate:>5.1}%")?;
        }
    }

    writeln!(
        out,
        "\nTotal cost: ${:.4} • Total latency: {} ms",
        summary.total_cost, summary.total_latency_ms
    )?;
    Ok(out)
}

/// Single human-readable progress line for one finished query.
pub fn render_query_line(result: &QueryResult) -> String {
    let consensus = match result.consensus {
        ConsensusLevel::Strong => "strong",
        ConsensusLevel::Moderate => "moderate",
        ConsensusLevel::Weak => "weak",
        ConsensusLevel::None => "none",
    };
    format!(
        "{id}: score {score}/100, cited by {rate:.0}% of models, consensus {consensus}",
        id = result.query_id,
        score = result.visibility_score,
        rate = result.citation_rate,
    )
}

#[derive(Debug, Serialize)]
struct JsonSummary<'a> {
    overall_score: u8,
    total_tests: usize,
    completed: usize,
    errored: usize,
    per_model_citation_rate: &'a std::collections::BTreeMap<String, f64>,
    total_cost: f64,
    total_latency_ms: u64,
}

impl<'a> From<&'a RunSummary> for JsonSummary<'a> {
    fn from(summary: &'a RunSummary) -> Self {
        Self {
            overall_score: summary.overall_score,
            total_tests: summary.total_tests,
            completed: summary.completed,
            errored: summary.errored,
            per_model_citation_rate: &summary.per_model_citation_rate,
            total_cost: summary.total_cost,
            total_latency_ms: summary.total_latency_ms,
        }
    }
}
