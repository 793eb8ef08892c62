use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use brandscope_core::{
    aggregate_rankings, blind_responses_with, catalog, report::render_query_line,
    report::render_summary, report::OutputFormat, run_tests, DetectionConfig, EngineResponse,
    Evaluation, ModelCallError, ModelClient, ModelOutput, PlatformType, RunConfig, RunEventKind,
    RunRequest, ScriptedClient, ScriptedOutcome, SourceCitation, TokenUsage,
};

#[derive(Parser, Debug)]
#[command(
    name = "brandscope",
    author,
    version,
    about = "Multi-model brand visibility probe"
)]
struct Cli {
    /// TOML config file with engine defaults
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the model catalog
    Models {
        /// Emit the catalog as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Estimate the dollar cost of a run request without executing it
    Estimate {
        /// Run request file (JSON or YAML)
        #[arg(long, value_name = "FILE")]
        request: PathBuf,
        /// Override the query count (e.g. to price a larger discovery batch)
        #[arg(long, value_name = "N")]
        queries: Option<usize>,
    },
    /// Execute a run request against fixture-scripted model outputs
    Run {
        /// Run request file (JSON or YAML)
        #[arg(long, value_name = "FILE")]
        request: PathBuf,
        /// Directory of canned model outputs (<model-id>.json)
        #[arg(long, value_name = "DIR")]
        fixtures: PathBuf,
        /// Emit NDJSON events instead of human-readable lines
        #[arg(long)]
        json: bool,
    },
    /// Blind a response set for impartial judging
    Blind {
        /// Engine responses file (JSON array)
        #[arg(long, value_name = "FILE")]
        responses: PathBuf,
        /// RNG seed for a reproducible shuffle
        #[arg(long)]
        seed: u64,
    },
    /// Aggregate judge rankings over a blinded response set
    Rank {
        /// Engine responses file (JSON array), blinded with --seed
        #[arg(long, value_name = "FILE")]
        responses: PathBuf,
        /// Judge evaluations file (JSON array of {judge, ranking})
        #[arg(long, value_name = "FILE")]
        evaluations: PathBuf,
        /// Seed used when the set was blinded
        #[arg(long)]
        seed: u64,
        /// Emit the aggregated ranking as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let run_config = load_run_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Models { json } => list_models(json),
        Commands::Estimate { request, queries } => estimate(&request, queries),
        Commands::Run {
            request,
            fixtures,
            json,
        } => run(&request, &fixtures, json, run_config).await,
        Commands::Blind { responses, seed } => blind(&responses, seed),
        Commands::Rank {
            responses,
            evaluations,
            seed,
            json,
        } => rank(&responses, &evaluations, seed, json),
    }
}

fn list_models(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(catalog::MODEL_CATALOG)?);
        return Ok(());
    }
    println!("{} model(s) in catalog", catalog::MODEL_CATALOG.len());
    for descriptor in catalog::MODEL_CATALOG {
        let platform = match descriptor.platform {
            PlatformType::Search => "search",
            PlatformType::Chat => "chat",
        };
        let grounding = if descriptor.supports_grounding {
            ", grounded citations"
        } else {
            ""
        };
        println!(
            "- {id:<24} [{platform:6}] in ${cin:>5.2}/M out ${cout:>5.2}/M :: {name}{grounding}",
            id = descriptor.id,
            platform = platform,
            cin = descriptor.price_in_per_mtok,
            cout = descriptor.price_out_per_mtok,
            name = descriptor.display_name,
            grounding = grounding,
        );
    }
    Ok(())
}

fn estimate(request_path: &Path, query_override: Option<usize>) -> Result<()> {
    let request = load_request(request_path)?;
    let plan = request
        .plan()
        .with_context(|| format!("invalid run request in {}", request_path.display()))?;
    // The plan always holds at least one query, so scaling to an overridden
    // count is plain per-query arithmetic.
    let (query_count, total_tests, cost) = match query_override {
        Some(count) => (
            count,
            plan.total_tests / plan.work.len() * count,
            plan.estimated_cost / plan.work.len() as f64 * count as f64,
        ),
        None => (plan.work.len(), plan.total_tests, plan.estimated_cost),
    };
    println!(
        "{total_tests} tests across {query_count} quer{}, estimated upper bound ${cost:.4}",
        if query_count == 1 { "y" } else { "ies" },
    );
    Ok(())
}

async fn run(request_path: &Path, fixtures: &Path, json: bool, config: RunConfig) -> Result<()> {
    let request = load_request(request_path)?;
    let clients = fixture_clients(&request, fixtures)?;

    let mut handle = run_tests(request, clients, config);
    while let Some(event) = handle.next_event().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            if matches!(event.kind, RunEventKind::Error { .. }) {
                bail!("run rejected before any model call");
            }
            continue;
        }
        match event.kind {
            RunEventKind::Start {
                total_tests,
                estimated_cost,
            } => println!(
                "{} {total_tests} tests, estimated ${estimated_cost:.4}",
                "start".bold()
            ),
            RunEventKind::QueryStart {
                query_id,
                model_ids,
                ..
            } => println!("{} {query_id} → {}", "query".cyan(), model_ids.join(", ")),
            RunEventKind::QueryComplete { result } => {
                println!("{} {}", "done ".green(), render_query_line(&result))
            }
            RunEventKind::Complete { summary } => {
                println!();
                print!("{}", render_summary(&summary, OutputFormat::Human)?);
            }
            RunEventKind::Error { message } => bail!("run rejected: {message}"),
        }
    }
    Ok(())
}

fn blind(responses_path: &Path, seed: u64) -> Result<()> {
    let responses = load_responses(responses_path)?;
    let session = blind_responses_with(&responses, &mut StdRng::seed_from_u64(seed))
        .context("failed to blind response set")?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

fn rank(responses_path: &Path, evaluations_path: &Path, seed: u64, json: bool) -> Result<()> {
    let responses = load_responses(responses_path)?;
    let session = blind_responses_with(&responses, &mut StdRng::seed_from_u64(seed))
        .context("failed to blind response set")?;

    let raw = fs::read_to_string(evaluations_path)
        .with_context(|| format!("failed to read evaluations from {}", evaluations_path.display()))?;
    let evaluations: Vec<Evaluation> =
        serde_json::from_str(&raw).context("invalid evaluations file")?;

    let outcome = aggregate_rankings(&evaluations, &session.mapping)
        .context("rank aggregation rejected the evaluation set")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    println!(
        "winner: {} (consensus {:?})",
        outcome.winner.bold(),
        outcome.consensus
    );
    for ranking in &outcome.rankings {
        println!(
            "{final_rank}. {engine} ({blind_id}): avg rank {avg:.2}, borda {borda}, agreement {agreement:.2}",
            final_rank = ranking.final_rank,
            engine = ranking.engine_id,
            blind_id = ranking.blind_id,
            avg = ranking.average_rank,
            borda = ranking.borda_score,
            agreement = ranking.agreement,
        );
    }
    Ok(())
}

/// Canned model output for one catalog model, read from `<model-id>.json`.
#[derive(Debug, Deserialize)]
struct FixtureResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    sources: Vec<SourceCitation>,
    #[serde(default)]
    tokens: TokenUsage,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    cost: f64,
}

fn fixture_clients(
    request: &RunRequest,
    fixtures: &Path,
) -> Result<HashMap<String, Arc<dyn ModelClient>>> {
    let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
    let mut model_ids: Vec<&str> = request.models.iter().map(String::as_str).collect();
    if let Some(selected) = request.selected_model.as_deref() {
        if !model_ids.contains(&selected) {
            model_ids.push(selected);
        }
    }

    for model_id in model_ids {
        let Some(descriptor) = catalog::descriptor(model_id) else {
            // Unknown ids are reported by request validation with a proper
            // error event; skip them here.
            continue;
        };
        let path = fixtures.join(format!("{model_id}.json"));
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("missing fixture for `{model_id}` at {}", path.display()))?;
        let fixture: FixtureResponse = serde_json::from_str(&raw)
            .with_context(|| format!("invalid fixture JSON at {}", path.display()))?;

        let outcome = match fixture.error {
            Some(error) => ScriptedOutcome::Fail(match error.as_str() {
                "timeout" => ModelCallError::Timeout,
                "rate_limited" => ModelCallError::RateLimited,
                message => ModelCallError::Provider {
                    message: message.to_string(),
                },
            }),
            None => ScriptedOutcome::Reply(ModelOutput {
                text: fixture.text,
                sources: fixture.sources,
                tokens: fixture.tokens,
                latency_ms: fixture.latency_ms,
                cost: fixture.cost,
            }),
        };
        clients.insert(model_id.to_string(), Arc::new(ScriptedClient::new(descriptor, outcome)));
    }
    Ok(clients)
}

fn load_request(path: &Path) -> Result<RunRequest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read run request from {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&raw).context("invalid YAML run request")
    } else {
        serde_json::from_str(&raw).context("invalid JSON run request")
    }
}

fn load_responses(path: &Path) -> Result<Vec<EngineResponse>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read responses from {}", path.display()))?;
    serde_json::from_str(&raw).context("invalid responses file")
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    engine: EngineSettings,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSettings {
    query_concurrency: Option<usize>,
    context_window: Option<usize>,
    sentiment_window: Option<usize>,
    competitor_cap: Option<usize>,
}

fn load_run_config(path: Option<&Path>) -> Result<RunConfig> {
    let settings = match path {
        Some(path) => config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()
            .with_context(|| format!("failed to load config from {}", path.display()))?
            .try_deserialize::<Settings>()
            .context("invalid config file")?,
        None => Settings::default(),
    };

    let defaults = RunConfig::default();
    let detection_defaults = DetectionConfig::default();
    Ok(RunConfig {
        query_concurrency: settings
            .engine
            .query_concurrency
            .unwrap_or(defaults.query_concurrency),
        detection: DetectionConfig {
            context_window: settings
                .engine
                .context_window
                .unwrap_or(detection_defaults.context_window),
            sentiment_window: settings
                .engine
                .sentiment_window
                .unwrap_or(detection_defaults.sentiment_window),
            competitor_cap: settings
                .engine
                .competitor_cap
                .unwrap_or(detection_defaults.competitor_cap),
        },
    })
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
