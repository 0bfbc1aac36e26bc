//! Epoch-based ingestion runs.
//!
//! One epoch covers every selected endpoint for one instrument; epoch numbers
//! are universe positions starting at 1. Progress is durable at two levels:
//!
//! | Level | Table | Resume rule |
//! |-------|-------|-------------|
//! | instrument | `ingestion_checkpoints` | skip endpoints up to `last_completed_endpoint` |
//! | run | `ingestion_sessions` | continue at `start_epoch + instruments_completed` |
//!
//! Endpoint failures are recorded and the epoch moves on. Only an empty
//! credential pool or an unreachable store aborts the run; the session is
//! then marked `failed` with the reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ferrofeed_core::endpoint::{self, EndpointSpec};
use ferrofeed_core::{
    default_universe, load_universe, normalize_response, CredentialPool, FetchError,
    FetchErrorKind, Fetcher, RawResponse, ReqwestHttpClient, Symbol, UtcDateTime,
};
use ferrofeed_warehouse::{CheckpointRow, SessionRow, SessionStatus, Warehouse};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::indexer::OutboxTextIndexer;
use crate::stats::{records_per_second, EpochOutcome, RunReport, RunTally};
use crate::writer::{count_column, epoch_column, PersistTarget, Writer};
use crate::IngestError;

/// Where a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// New session from the first instrument.
    Fresh,
    /// New session from a 1-based epoch.
    FromEpoch(u64),
    /// Continue the latest `running` session.
    Resume,
}

impl RunMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::FromEpoch(_) => "from_epoch",
            Self::Resume => "resume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Stop after this many epochs, leaving the session resumable.
    pub max_epochs: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Fresh,
            max_epochs: None,
        }
    }
}

/// Cooperative stop request, honoured at epoch boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Session bookkeeping for one invocation.
struct RunContext {
    session: SessionRow,
    mode: RunMode,
    start_epoch: u64,
    next_epoch: u64,
    base_api_calls: u64,
    calls_at_start: u64,
    tally: RunTally,
}

impl RunContext {
    fn session_id(&self) -> &str {
        &self.session.session_id
    }
}

pub struct IngestionManager {
    fetcher: Arc<Fetcher>,
    writer: Writer,
    universe: Vec<Symbol>,
    endpoints: Vec<&'static EndpointSpec>,
    state: RunState,
}

impl IngestionManager {
    pub fn new(
        fetcher: Arc<Fetcher>,
        writer: Writer,
        universe: Vec<Symbol>,
    ) -> Result<Self, IngestError> {
        if universe.is_empty() {
            return Err(IngestError::EmptyUniverse);
        }
        Ok(Self {
            fetcher,
            writer,
            universe,
            endpoints: endpoint::catalog().iter().collect(),
            state: RunState::Idle,
        })
    }

    /// Restrict the run to a subset of the catalog, kept in canonical order.
    pub fn with_endpoints(mut self, mut endpoints: Vec<&'static EndpointSpec>) -> Self {
        endpoints.sort_by_key(|spec| endpoint::position(spec.id));
        endpoints.dedup_by_key(|spec| spec.id);
        self.endpoints = endpoints;
        self
    }

    /// Production wiring: reqwest transport, outbox indexer, configured universe.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let keys = config.require_api_keys()?.to_vec();
        let credentials = Arc::new(CredentialPool::new(keys, config.credential_quota())?);
        let fetcher = Fetcher::new(
            config.fetcher_config(),
            Arc::new(ReqwestHttpClient::new()),
            credentials,
        );

        let warehouse = Warehouse::open(config.warehouse_config())?;
        let writer = Writer::new(warehouse.clone())
            .with_indexer(Arc::new(OutboxTextIndexer::new(warehouse)))
            .with_batch_size(config.write_batch_size);

        let universe = match &config.universe_file {
            Some(path) => load_universe(path)?,
            None => default_universe(),
        };

        let mut manager = Self::new(Arc::new(fetcher), writer, universe)?;
        if !config.endpoints.is_empty() {
            manager = manager.with_endpoints(endpoint::select(config.endpoints.as_slice())?);
        }
        Ok(manager)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn universe(&self) -> &[Symbol] {
        &self.universe
    }

    pub fn endpoints(&self) -> &[&'static EndpointSpec] {
        &self.endpoints
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    fn warehouse(&self) -> &Warehouse {
        self.writer.warehouse()
    }

    /// Run epochs until the universe is exhausted, `max_epochs` is reached,
    /// `stop` is triggered, or a fatal error occurs.
    pub async fn run(
        &mut self,
        options: RunOptions,
        stop: &StopSignal,
    ) -> Result<RunReport, IngestError> {
        let started = Instant::now();
        let mut context = self.open_session(options)?;
        self.state = RunState::Running;
        tracing::info!(
            session_id = %context.session_id(),
            mode = options.mode.as_str(),
            start_epoch = context.next_epoch,
            universe = self.universe.len(),
            endpoints = self.endpoints.len(),
            "ingestion run started"
        );

        match self.run_epochs(&mut context, options, stop).await {
            Ok(stopped_early) => {
                if !stopped_early {
                    context.session.status = SessionStatus::Completed;
                    context.session.ended_at = Some(UtcDateTime::now().format_sql());
                }
                self.sync_session(&mut context)?;
                self.state = if stopped_early {
                    RunState::Idle
                } else {
                    RunState::Completed
                };
                let report = self.report(&context, started, stopped_early);
                tracing::info!(
                    session_id = %report.session_id,
                    status = %report.status,
                    records = report.records_written,
                    api_calls = report.api_calls,
                    elapsed_s = report.elapsed_seconds,
                    "ingestion run finished"
                );
                Ok(report)
            }
            Err(error) => {
                self.state = RunState::Failed;
                self.fail_session(&mut context, &error);
                Err(error)
            }
        }
    }

    fn open_session(&self, options: RunOptions) -> Result<RunContext, IngestError> {
        let universe = self.universe.len();
        let now = UtcDateTime::now().format_sql();
        let (session, start_epoch, next_epoch) = match options.mode {
            RunMode::Resume => {
                let session = self
                    .warehouse()
                    .latest_running_session()?
                    .ok_or(IngestError::NothingToResume)?;
                let start_epoch = session
                    .metadata
                    .get("start_epoch")
                    .and_then(Value::as_u64)
                    .unwrap_or(1)
                    .max(1);
                let completed = u64::try_from(session.instruments_completed).unwrap_or_default();
                (session, start_epoch, start_epoch + completed)
            }
            RunMode::Fresh | RunMode::FromEpoch(_) => {
                let start_epoch = match options.mode {
                    RunMode::FromEpoch(epoch) => epoch,
                    _ => 1,
                };
                if start_epoch == 0 || start_epoch > universe as u64 {
                    return Err(IngestError::InvalidEpoch {
                        epoch: start_epoch,
                        universe,
                    });
                }
                let mut session = SessionRow::running(Uuid::new_v4().to_string(), now);
                session.metadata = json!({
                    "mode": options.mode.as_str(),
                    "start_epoch": start_epoch,
                    "universe_size": universe,
                    "endpoints": self.endpoints.len(),
                    "epochs_succeeded": 0,
                    "epochs_failed": 0,
                });
                self.warehouse().insert_session(&session)?;
                (session, start_epoch, start_epoch)
            }
        };

        let mut session = session;
        set_metadata(&mut session.metadata, "max_epochs", json!(options.max_epochs));
        if options.mode == RunMode::Resume {
            let resumes = session
                .metadata
                .get("resumes")
                .and_then(Value::as_u64)
                .unwrap_or_default();
            set_metadata(&mut session.metadata, "resumes", json!(resumes + 1));
        }

        Ok(RunContext {
            base_api_calls: u64::try_from(session.api_calls).unwrap_or_default(),
            calls_at_start: self.fetcher.api_calls(),
            session,
            mode: options.mode,
            start_epoch,
            next_epoch,
            tally: RunTally::default(),
        })
    }

    /// Returns `true` when the run stopped before the universe ran out.
    async fn run_epochs(
        &self,
        context: &mut RunContext,
        options: RunOptions,
        stop: &StopSignal,
    ) -> Result<bool, IngestError> {
        let mut epochs_run = 0_u64;
        while let Some(symbol) = epoch_symbol(&self.universe, context.next_epoch) {
            if stop.is_triggered() {
                tracing::info!(epoch = context.next_epoch, "stop requested; leaving session resumable");
                return Ok(true);
            }
            if options.max_epochs.is_some_and(|max| epochs_run >= max) {
                tracing::info!(epoch = context.next_epoch, "epoch limit reached");
                return Ok(true);
            }

            let epoch = context.next_epoch;
            let outcome = self.run_epoch(context, epoch, symbol).await?;
            epochs_run += 1;
            context.tally.record(&outcome);
            context.next_epoch += 1;

            let session = &mut context.session;
            session.instruments_completed += 1;
            session.records_written += count_column(outcome.records_written);
            let metadata_key = if outcome.succeeded() {
                "epochs_succeeded"
            } else {
                "epochs_failed"
            };
            let count = session
                .metadata
                .get(metadata_key)
                .and_then(Value::as_u64)
                .unwrap_or_default();
            set_metadata(&mut session.metadata, metadata_key, json!(count + 1));
            self.sync_session(context)?;

            tracing::info!(
                session_id = %context.session_id(),
                epoch = outcome.epoch,
                symbol = %symbol,
                attempted = outcome.endpoints_attempted,
                failed = outcome.endpoints_failed,
                skipped = outcome.endpoints_skipped,
                records = outcome.records_written,
                succeeded = outcome.succeeded(),
                "epoch done"
            );
        }
        Ok(false)
    }

    async fn run_epoch(
        &self,
        context: &mut RunContext,
        epoch: u64,
        symbol: &Symbol,
    ) -> Result<EpochOutcome, IngestError> {
        let mut outcome = EpochOutcome::new(epoch);
        let session_id = context.session.session_id.clone();
        let cursor = self.claim_checkpoint(symbol, epoch, &session_id)?;

        for spec in &self.endpoints {
            if cursor.skips(spec.id) {
                outcome.endpoints_skipped += 1;
                continue;
            }

            outcome.endpoints_attempted += 1;
            let response = match self.fetch_endpoint(spec, symbol).await {
                Ok(response) => response,
                Err(error) if error.is_fatal() => {
                    tracing::error!(
                        symbol = %symbol,
                        endpoint = spec.id,
                        error = %error,
                        "credential pool exhausted"
                    );
                    return Err(IngestError::CredentialsExhausted(error));
                }
                Err(error) => {
                    outcome.endpoints_failed += 1;
                    self.record_endpoint_failure(context, symbol, epoch, spec.id, &error.to_string())?;
                    continue;
                }
            };

            let records = normalize_response(&response);
            let target = PersistTarget::new(symbol.clone(), spec.id);
            let report = self.writer.persist(&target, &records, epoch, &session_id)?;
            outcome.records_written += report.inserted();
            outcome.duplicates += report.duplicates;
            if report.is_complete() {
                outcome.endpoints_succeeded += 1;
            } else {
                outcome.endpoints_failed += 1;
                let reason = report.errors.join("; ");
                self.record_endpoint_failure(context, symbol, epoch, spec.id, &reason)?;
            }
        }
        Ok(outcome)
    }

    /// Resume cursor when the checkpoint already belongs to this session and
    /// epoch; otherwise take the checkpoint over and start from scratch.
    fn claim_checkpoint(
        &self,
        symbol: &Symbol,
        epoch: u64,
        session_id: &str,
    ) -> Result<ResumeCursor, IngestError> {
        let epoch_value = epoch_column(epoch);
        match self.warehouse().load_checkpoint(symbol.as_str())? {
            Some(checkpoint) if checkpoint.is_owned_by(session_id, epoch_value) => {
                if let Some(last) = &checkpoint.last_completed_endpoint {
                    tracing::info!(
                        symbol = %symbol,
                        epoch,
                        after = %last,
                        retrying = checkpoint.failed_endpoints.len(),
                        "resuming epoch"
                    );
                }
                Ok(ResumeCursor {
                    after: checkpoint
                        .last_completed_endpoint
                        .as_deref()
                        .and_then(endpoint::position),
                    retry: checkpoint.failed_endpoints,
                })
            }
            _ => {
                self.warehouse()
                    .save_checkpoint(&CheckpointRow::start(symbol.as_str(), epoch_value, session_id))?;
                Ok(ResumeCursor::default())
            }
        }
    }

    async fn fetch_endpoint(
        &self,
        spec: &EndpointSpec,
        symbol: &Symbol,
    ) -> Result<RawResponse, FetchError> {
        let params = spec.runtime_params(UtcDateTime::now());
        match self.fetcher.fetch(spec.id, symbol, &params).await {
            Err(error) if error.kind() == FetchErrorKind::CircuitOpen => {
                let wait = self.fetcher.breaker().retry_after();
                tracing::warn!(
                    symbol = %symbol,
                    endpoint = spec.id,
                    wait_ms = wait.as_millis() as u64,
                    "circuit open; waiting out cooldown"
                );
                tokio::time::sleep(wait).await;
                self.fetcher.fetch(spec.id, symbol, &params).await
            }
            result => result,
        }
    }

    fn record_endpoint_failure(
        &self,
        context: &mut RunContext,
        symbol: &Symbol,
        epoch: u64,
        endpoint_id: &str,
        reason: &str,
    ) -> Result<(), IngestError> {
        tracing::warn!(
            session_id = %context.session_id(),
            symbol = %symbol,
            epoch,
            endpoint = endpoint_id,
            error = reason,
            "endpoint failed"
        );
        context.session.errors += 1;

        let epoch_value = epoch_column(epoch);
        let mut checkpoint = match self.warehouse().load_checkpoint(symbol.as_str())? {
            Some(existing) if existing.is_owned_by(context.session_id(), epoch_value) => existing,
            _ => CheckpointRow::start(symbol.as_str(), epoch_value, context.session_id()),
        };
        if !checkpoint.failed_endpoints.iter().any(|id| id == endpoint_id) {
            checkpoint.failed_endpoints.push(endpoint_id.to_owned());
        }
        self.warehouse().save_checkpoint(&checkpoint)?;
        Ok(())
    }

    fn sync_session(&self, context: &mut RunContext) -> Result<(), IngestError> {
        let delta = self.fetcher.api_calls().saturating_sub(context.calls_at_start);
        context.session.api_calls =
            i64::try_from(context.base_api_calls + delta).unwrap_or(i64::MAX);
        self.warehouse().update_session(&context.session)?;
        Ok(())
    }

    fn fail_session(&self, context: &mut RunContext, error: &IngestError) {
        context.session.status = SessionStatus::Failed;
        context.session.ended_at = Some(UtcDateTime::now().format_sql());
        set_metadata(
            &mut context.session.metadata,
            "failure_reason",
            json!(error.to_string()),
        );
        set_metadata(&mut context.session.metadata, "failure_code", json!(error.code()));
        tracing::error!(
            session_id = %context.session_id(),
            epoch = context.next_epoch,
            error = %error,
            "ingestion run failed"
        );
        if let Err(store_error) = self.sync_session(context) {
            tracing::error!(
                session_id = %context.session_id(),
                error = %store_error,
                "could not mark session failed"
            );
        }
    }

    fn report(&self, context: &RunContext, started: Instant, stopped_early: bool) -> RunReport {
        let elapsed = started.elapsed();
        let tally = context.tally;
        RunReport {
            session_id: context.session.session_id.clone(),
            mode: context.mode.as_str(),
            status: context.session.status,
            start_epoch: context.start_epoch,
            next_epoch: context.next_epoch,
            epochs_attempted: tally.epochs_attempted,
            epochs_succeeded: tally.epochs_succeeded,
            epochs_failed: tally.epochs_failed,
            records_written: tally.records_written,
            duplicates: tally.duplicates,
            api_calls: self.fetcher.api_calls().saturating_sub(context.calls_at_start),
            endpoint_successes: tally.endpoint_successes,
            endpoint_failures: tally.endpoint_failures,
            elapsed_seconds: elapsed.as_secs_f64(),
            records_per_second: records_per_second(tally.records_written, elapsed),
            stopped_early,
            fetcher: self.fetcher.stats(),
        }
    }
}

/// Where an owned epoch picks up: past `after`, plus the endpoints that
/// failed before the interruption.
#[derive(Debug, Default)]
struct ResumeCursor {
    after: Option<usize>,
    retry: Vec<String>,
}

impl ResumeCursor {
    fn skips(&self, endpoint_id: &str) -> bool {
        let Some(after) = self.after else {
            return false;
        };
        endpoint::position(endpoint_id).is_some_and(|position| position <= after)
            && !self.retry.iter().any(|id| id == endpoint_id)
    }
}

fn epoch_symbol(universe: &[Symbol], epoch: u64) -> Option<&Symbol> {
    let index = usize::try_from(epoch.checked_sub(1)?).ok()?;
    universe.get(index)
}

fn set_metadata(metadata: &mut Value, key: &str, value: Value) {
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Value::Object(map) = metadata {
        map.insert(key.to_owned(), value);
    }
}
