//! Test orchestrator: fans queries out to model backends under a bounded
//! semaphore and streams progress events back to the caller.

mod events;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::detect::{BrandProfile, DetectionConfig, DetectionEngine};
use crate::model::{catalog, ModelClient, ModelDescriptor};
use crate::score::{aggregate_query, aggregate_run, ModelResult, QueryResult};

pub use events::{RunEvent, RunEventKind};

/// A shopping query to probe. Immutable once issued to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub source_tag: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

/// Which (query, model) cells a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Cartesian product: every selected query against every model.
    AllQueriesAllModels,
    /// Every selected query against the one `selected_model`.
    AllQueriesOneModel,
    /// The one `selected_query_id` against every model.
    OneQueryAllModels,
}

/// Full run request as consumed from the caller/UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub brand_url: String,
    #[serde(default)]
    pub brand_name: Option<String>,
    pub queries: Vec<Query>,
    pub models: Vec<String>,
    pub mode: ExecutionMode,
    #[serde(default)]
    pub selected_model: Option<String>,
    #[serde(default)]
    pub selected_query_id: Option<String>,
}

/// Validation failures. All are rejected before any model call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunRequestError {
    #[error("no queries are selected")]
    NoQueriesSelected,
    #[error("no models were requested")]
    NoModels,
    #[error("unknown model `{id}`")]
    UnknownModel { id: String },
    #[error("no client was provided for model `{id}`")]
    MissingClient { id: String },
    #[error("execution mode requires `selected_model`")]
    MissingSelectedModel,
    #[error("execution mode requires `selected_query_id`")]
    MissingSelectedQuery,
    #[error("selected query `{id}` is not in the request")]
    UnknownSelectedQuery { id: String },
    #[error("brand profile rejected: {message}")]
    InvalidBrand { message: String },
}

/// One query with the models it will fan out to.
#[derive(Debug, Clone)]
pub struct QueryWork {
    pub query: Query,
    pub models: Vec<&'static ModelDescriptor>,
}

/// Validated work set derived from a request.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub work: Vec<QueryWork>,
    pub total_tests: usize,
    pub estimated_cost: f64,
}

impl RunRequest {
    /// Resolve the request into its work set, validating everything that can
    /// be checked without I/O.
    pub fn plan(&self) -> Result<RunPlan, RunRequestError> {
        if self.models.is_empty() {
            return Err(RunRequestError::NoModels);
        }
        let all_models = self
            .models
            .iter()
            .map(|id| {
                catalog::descriptor(id).ok_or_else(|| RunRequestError::UnknownModel { id: id.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let work: Vec<QueryWork> = match self.mode {
            ExecutionMode::AllQueriesAllModels => self
                .selected_queries()?
                .into_iter()
                .map(|query| QueryWork {
                    query,
                    models: all_models.clone(),
                })
                .collect(),
            ExecutionMode::AllQueriesOneModel => {
                let id = self
                    .selected_model
                    .as_deref()
                    .ok_or(RunRequestError::MissingSelectedModel)?;
                let model = catalog::descriptor(id)
                    .ok_or_else(|| RunRequestError::UnknownModel { id: id.to_string() })?;
                self.selected_queries()?
                    .into_iter()
                    .map(|query| QueryWork {
                        query,
                        models: vec![model],
                    })
                    .collect()
            }
            ExecutionMode::OneQueryAllModels => {
                let id = self
                    .selected_query_id
                    .as_deref()
                    .ok_or(RunRequestError::MissingSelectedQuery)?;
                let query = self
                    .queries
                    .iter()
                    .find(|query| query.id == id)
                    .cloned()
                    .ok_or_else(|| RunRequestError::UnknownSelectedQuery { id: id.to_string() })?;
                vec![QueryWork {
                    query,
                    models: all_models,
                }]
            }
        };

        let total_tests = work.iter().map(|w| w.models.len()).sum();
        let estimated_cost = work
            .iter()
            .map(|w| catalog::estimate_run_cost(w.models.iter().copied(), 1))
            .sum();

        Ok(RunPlan {
            work,
            total_tests,
            estimated_cost,
        })
    }

    fn selected_queries(&self) -> Result<Vec<Query>, RunRequestError> {
        let selected: Vec<Query> = self.queries.iter().filter(|q| q.selected).cloned().collect();
        if selected.is_empty() {
            return Err(RunRequestError::NoQueriesSelected);
        }
        Ok(selected)
    }
}

/// Engine tunables, merged by the caller from its configuration layer.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum queries in flight. Forced to 1 when the run has exactly one
    /// query, to avoid pointless synchronization overhead.
    pub query_concurrency: usize,
    pub detection: DetectionConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            query_concurrency: 3,
            detection: DetectionConfig::default(),
        }
    }
}

/// Cooperative cancellation flag shared between the caller and the run.
///
/// Checked before admitting a query into the semaphore and before dispatching
/// model calls; already-dispatched calls finish, but their results are not
/// emitted once cancellation has been observed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Live handle on a run: the event stream plus cancellation and the
/// instrumented semaphore capacity.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancelHandle,
    query_concurrency: usize,
}

impl RunHandle {
    /// Next event, or `None` once the stream is finished. The stream always
    /// terminates with `complete` or `error`.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Semaphore capacity this run was started with; `0` when the request
    /// failed validation and nothing was admitted.
    pub fn query_concurrency(&self) -> usize {
        self.query_concurrency
    }
}

/// Start a run. Returns immediately; all work happens on spawned tasks and
/// is reported through the handle's event stream.
///
/// `clients` must provide a [`ModelClient`] for every model the plan names.
#[instrument(name = "run_tests", skip(request, clients, config), fields(mode = ?request.mode, queries = request.queries.len()))]
pub fn run_tests(
    request: RunRequest,
    clients: HashMap<String, Arc<dyn ModelClient>>,
    config: RunConfig,
) -> RunHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelHandle::default();

    let setup = validate(&request, &clients);
    let (plan, profile) = match setup {
        Ok(parts) => parts,
        Err(error) => {
            let _ = tx.send(RunEvent::now(RunEventKind::Error {
                message: error.to_string(),
            }));
            return RunHandle {
                events: rx,
                cancel,
                query_concurrency: 0,
            };
        }
    };

    let query_concurrency = if plan.work.len() == 1 {
        1
    } else {
        config.query_concurrency.max(1)
    };

    let driver_cancel = cancel.clone();
    tokio::spawn(drive(
        plan,
        Arc::new(profile),
        Arc::new(DetectionEngine::with_config(config.detection)),
        clients,
        tx,
        driver_cancel,
        query_concurrency,
    ));

    RunHandle {
        events: rx,
        cancel,
        query_concurrency,
    }
}

fn validate(
    request: &RunRequest,
    clients: &HashMap<String, Arc<dyn ModelClient>>,
) -> Result<(RunPlan, BrandProfile), RunRequestError> {
    let plan = request.plan()?;
    for work in &plan.work {
        for model in &work.models {
            if !clients.contains_key(model.id) {
                return Err(RunRequestError::MissingClient {
                    id: model.id.to_string(),
                });
            }
        }
    }
    let profile = BrandProfile::new(&request.brand_url, request.brand_name.as_deref())
        .map_err(|err| RunRequestError::InvalidBrand {
            message: err.to_string(),
        })?;
    Ok((plan, profile))
}

async fn drive(
    plan: RunPlan,
    profile: Arc<BrandProfile>,
    engine: Arc<DetectionEngine>,
    clients: HashMap<String, Arc<dyn ModelClient>>,
    tx: mpsc::UnboundedSender<RunEvent>,
    cancel: CancelHandle,
    query_concurrency: usize,
) {
    let total_tests = plan.total_tests;
    let _ = tx.send(RunEvent::now(RunEventKind::Start {
        total_tests,
        estimated_cost: plan.estimated_cost,
    }));

    let semaphore = Arc::new(Semaphore::new(query_concurrency));
    let mut tasks = JoinSet::new();
    for work in plan.work {
        let model_clients: Vec<(String, Arc<dyn ModelClient>)> = work
            .models
            .iter()
            .filter_map(|model| {
                clients
                    .get(model.id)
                    .map(|client| (model.id.to_string(), Arc::clone(client)))
            })
            .collect();
        tasks.spawn(run_query(
            work.query,
            model_clients,
            Arc::clone(&semaphore),
            tx.clone(),
            cancel.clone(),
            Arc::clone(&engine),
            Arc::clone(&profile),
        ));
    }

    let mut query_results: Vec<QueryResult> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(result)) => query_results.push(result),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "query task failed to join"),
        }
    }

    let summary = aggregate_run(&query_results, total_tests);
    debug!(
        completed = summary.completed,
        errored = summary.errored,
        "run finished"
    );
    let _ = tx.send(RunEvent::now(RunEventKind::Complete { summary }));
}

/// One query's lifecycle: acquire a semaphore slot, fan out to every model
/// with no additional limit, aggregate, emit.
async fn run_query(
    query: Query,
    clients: Vec<(String, Arc<dyn ModelClient>)>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<RunEvent>,
    cancel: CancelHandle,
    engine: Arc<DetectionEngine>,
    profile: Arc<BrandProfile>,
) -> Option<QueryResult> {
    if cancel.is_cancelled() {
        return None;
    }
    let _permit = semaphore.acquire_owned().await.ok()?;
    if cancel.is_cancelled() {
        return None;
    }

    let _ = tx.send(RunEvent::now(RunEventKind::QueryStart {
        query_id: query.id.clone(),
        text: query.text.clone(),
        model_ids: clients.iter().map(|(id, _)| id.clone()).collect(),
    }));

    let mut calls = JoinSet::new();
    for (model_id, client) in clients {
        if cancel.is_cancelled() {
            break;
        }
        let prompt = query.text.clone();
        let engine = Arc::clone(&engine);
        let profile = Arc::clone(&profile);
        calls.spawn(async move {
            let started = Instant::now();
            match client.complete(&prompt).await {
                Ok(output) => {
                    let detection = engine.detect(&output.text, &output.sources, &profile);
                    ModelResult::from_output(model_id, output, detection)
                }
                Err(error) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    ModelResult::from_error(model_id, &error, latency_ms)
                }
            }
        });
    }

    let mut results: Vec<ModelResult> = Vec::new();
    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => warn!(error = %err, query_id = %query.id, "model task failed to join"),
        }
    }
    results.sort_by(|a, b| a.model_id.cmp(&b.model_id));

    let result = aggregate_query(query.id, results);
    if cancel.is_cancelled() {
        return None;
    }
    let _ = tx.send(RunEvent::now(RunEventKind::QueryComplete {
        result: result.clone(),
    }));
    Some(result)
}
