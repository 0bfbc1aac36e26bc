//! Session lifecycle: epoch limits, resume from checkpoints, fatal failures.

use std::sync::Arc;

use ferrofeed_core::endpoint;
use ferrofeed_core::Symbol;
use ferrofeed_ingest::{
    IngestError, IngestionManager, RunMode, RunOptions, RunState, StopSignal, Writer,
};
use ferrofeed_warehouse::{
    CheckpointRow, QueryGuardrails, SessionRow, SessionStatus, Warehouse,
};
use serde_json::json;

use ferrofeed_tests::{
    fast_fetcher_config, fetcher, open_warehouse, ScriptedHttpClient, DAILY_LIMIT, DAILY_SERIES,
    EARNINGS, OVERVIEW,
};

fn scripted_provider() -> Arc<ScriptedHttpClient> {
    let http = ScriptedHttpClient::new();
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    http.respond("OVERVIEW", OVERVIEW);
    http.respond("EARNINGS", EARNINGS);
    http
}

fn manager(http: Arc<ScriptedHttpClient>, warehouse: &Warehouse) -> IngestionManager {
    let fetcher = fetcher(http, &["key-a"], fast_fetcher_config());
    let universe = ["IBM", "MSFT"]
        .iter()
        .map(|ticker| Symbol::parse(ticker).expect("symbol"))
        .collect();
    let endpoints = endpoint::select(&["earnings", "overview", "time_series_daily"])
        .expect("known endpoints");
    IngestionManager::new(Arc::new(fetcher), Writer::new(warehouse.clone()), universe)
        .expect("manager")
        .with_endpoints(endpoints)
}

fn options(mode: RunMode, max_epochs: Option<u64>) -> RunOptions {
    RunOptions { mode, max_epochs }
}

fn requested(http: &ScriptedHttpClient, function: &str, symbol: &str) -> usize {
    http.requests()
        .iter()
        .filter(|request| {
            request.query_param("function") == Some(function)
                && request.query_param("symbol") == Some(symbol)
        })
        .count()
}

#[tokio::test]
async fn when_universe_is_exhausted_then_session_completes() {
    // Given
    let (_temp, warehouse) = open_warehouse();
    let http = scripted_provider();
    let mut manager = manager(http.clone(), &warehouse);

    // When
    let report = manager
        .run(RunOptions::default(), &StopSignal::new())
        .await
        .expect("run");

    // Then: both epochs ran every endpoint and the session is closed
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.epochs_attempted, 2);
    assert_eq!(report.next_epoch, 3);
    assert!(!report.stopped_early);
    assert_eq!(report.endpoint_failures, 0);
    assert_eq!(report.api_calls, 6);
    assert_eq!(manager.state(), RunState::Completed);

    let session = warehouse
        .load_session(&report.session_id)
        .expect("load")
        .expect("session stored");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.instruments_completed, 2);
    assert!(session.ended_at.is_some());
    assert_eq!(session.api_calls, 6);
    assert!(warehouse.count_records(Some("MSFT")).expect("count") > 0);
}

#[tokio::test]
async fn when_epoch_limit_is_reached_then_session_stays_resumable() {
    // Given
    let (_temp, warehouse) = open_warehouse();
    let http = scripted_provider();
    let mut manager = manager(http.clone(), &warehouse);

    // When: only one of two epochs is allowed
    let report = manager
        .run(options(RunMode::Fresh, Some(1)), &StopSignal::new())
        .await
        .expect("bounded run");

    // Then: the session is still running and points at the second instrument
    assert!(report.stopped_early);
    assert_eq!(report.status, SessionStatus::Running);
    assert_eq!(report.next_epoch, 2);
    assert_eq!(requested(&http, "TIME_SERIES_DAILY", "MSFT"), 0);

    // When: the run is resumed
    let resumed = manager
        .run(options(RunMode::Resume, None), &StopSignal::new())
        .await
        .expect("resume");

    // Then: the same session finishes the remaining epoch only
    assert_eq!(resumed.session_id, report.session_id);
    assert_eq!(resumed.start_epoch, 1);
    assert_eq!(resumed.epochs_attempted, 1);
    assert_eq!(resumed.status, SessionStatus::Completed);
    assert_eq!(requested(&http, "TIME_SERIES_DAILY", "IBM"), 1);
    assert_eq!(requested(&http, "TIME_SERIES_DAILY", "MSFT"), 1);

    let session = warehouse
        .load_session(&report.session_id)
        .expect("load")
        .expect("session stored");
    assert_eq!(session.instruments_completed, 2);
    assert_eq!(session.metadata["resumes"], json!(1));
}

#[tokio::test]
async fn when_resuming_mid_epoch_then_completed_endpoints_are_not_fetched_again() {
    // Given: a running session whose first epoch already stored the daily series
    let (_temp, warehouse) = open_warehouse();
    let mut seeded = SessionRow::running("seeded-session", "2024-03-08 12:00:00");
    seeded.metadata = json!({"mode": "fresh", "start_epoch": 1});
    warehouse.insert_session(&seeded).expect("seed session");
    let mut checkpoint = CheckpointRow::start("IBM", 1, "seeded-session");
    checkpoint.last_completed_endpoint = Some(String::from("time_series_daily"));
    checkpoint.endpoints_completed = 1;
    warehouse.save_checkpoint(&checkpoint).expect("seed checkpoint");

    let http = scripted_provider();
    let mut manager = manager(http.clone(), &warehouse);

    // When
    let report = manager
        .run(options(RunMode::Resume, None), &StopSignal::new())
        .await
        .expect("resume");

    // Then: IBM picks up after the daily series, MSFT runs in full
    assert_eq!(report.session_id, "seeded-session");
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(requested(&http, "TIME_SERIES_DAILY", "IBM"), 0);
    assert_eq!(requested(&http, "OVERVIEW", "IBM"), 1);
    assert_eq!(requested(&http, "EARNINGS", "IBM"), 1);
    assert_eq!(requested(&http, "TIME_SERIES_DAILY", "MSFT"), 1);

    let ibm = warehouse
        .load_checkpoint("IBM")
        .expect("load")
        .expect("checkpoint");
    assert_eq!(ibm.last_completed_endpoint.as_deref(), Some("earnings"));
    assert_eq!(ibm.endpoints_completed, 3);
}

#[tokio::test]
async fn when_an_endpoint_failed_before_a_crash_then_resume_retries_it() {
    // Given: IBM's overview is rejected while the other endpoints succeed
    let (_temp, warehouse) = open_warehouse();
    let http = ScriptedHttpClient::new();
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    http.respond("EARNINGS", EARNINGS);
    let mut manager = manager(http.clone(), &warehouse);
    let first = manager
        .run(options(RunMode::Fresh, Some(1)), &StopSignal::new())
        .await
        .expect("first run");
    assert_eq!(first.endpoint_failures, 1);
    let checkpoint = warehouse
        .load_checkpoint("IBM")
        .expect("load")
        .expect("checkpoint");
    assert_eq!(checkpoint.last_completed_endpoint.as_deref(), Some("earnings"));
    assert_eq!(checkpoint.failed_endpoints, vec![String::from("overview")]);

    // And: the process died before the epoch was counted
    let mut session = warehouse
        .load_session(&first.session_id)
        .expect("load")
        .expect("session stored");
    session.instruments_completed = 0;
    warehouse.update_session(&session).expect("rewind session");

    // When: the provider recovers and the session is resumed
    http.respond("OVERVIEW", OVERVIEW);
    manager
        .run(options(RunMode::Resume, Some(1)), &StopSignal::new())
        .await
        .expect("resume");

    // Then: only the failed endpoint is fetched again
    assert_eq!(requested(&http, "OVERVIEW", "IBM"), 2);
    assert_eq!(requested(&http, "TIME_SERIES_DAILY", "IBM"), 1);
    assert_eq!(requested(&http, "EARNINGS", "IBM"), 1);
    let checkpoint = warehouse
        .load_checkpoint("IBM")
        .expect("load")
        .expect("checkpoint");
    assert_eq!(checkpoint.last_completed_endpoint.as_deref(), Some("earnings"));
    assert!(checkpoint.failed_endpoints.is_empty());
    assert_eq!(checkpoint.endpoints_completed, 3);
}

#[tokio::test]
async fn when_nothing_is_running_then_resume_is_rejected() {
    let (_temp, warehouse) = open_warehouse();
    let mut manager = manager(scripted_provider(), &warehouse);

    let error = manager
        .run(options(RunMode::Resume, None), &StopSignal::new())
        .await
        .expect_err("no session");

    assert!(matches!(error, IngestError::NothingToResume));
}

#[tokio::test]
async fn when_start_epoch_is_outside_the_universe_then_run_is_rejected() {
    let (_temp, warehouse) = open_warehouse();
    let mut manager = manager(scripted_provider(), &warehouse);

    let error = manager
        .run(options(RunMode::FromEpoch(3), None), &StopSignal::new())
        .await
        .expect_err("epoch out of range");

    assert!(matches!(error, IngestError::InvalidEpoch { epoch: 3, universe: 2 }));
    assert!(warehouse.latest_session().expect("query").is_none());
}

#[tokio::test]
async fn when_stop_is_requested_then_no_epoch_starts() {
    let (_temp, warehouse) = open_warehouse();
    let http = scripted_provider();
    let mut manager = manager(http.clone(), &warehouse);
    let stop = StopSignal::new();
    stop.trigger();

    let report = manager
        .run(RunOptions::default(), &stop)
        .await
        .expect("run");

    assert!(report.stopped_early);
    assert_eq!(report.status, SessionStatus::Running);
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn when_checkpoint_store_is_unavailable_then_run_fails_and_session_is_marked() {
    // Given: the checkpoint table is gone
    let (_temp, warehouse) = open_warehouse();
    warehouse
        .execute_query(
            "DROP TABLE ingestion_checkpoints",
            QueryGuardrails::default(),
            true,
        )
        .expect("drop checkpoints");
    let mut manager = manager(scripted_provider(), &warehouse);

    // When
    let error = manager
        .run(RunOptions::default(), &StopSignal::new())
        .await
        .expect_err("persistence failure");

    // Then: the run aborts with a fatal error and the session records it
    assert!(matches!(error, IngestError::PersistenceUnavailable(_)));
    assert!(error.is_fatal());
    assert_eq!(manager.state(), RunState::Failed);
    let session = warehouse
        .latest_session()
        .expect("query")
        .expect("session stored");
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(
        session.metadata["failure_code"],
        json!("ingest.persistence_unavailable")
    );
}

#[tokio::test]
async fn when_every_credential_is_spent_for_the_day_then_run_fails() {
    // Given: the only key reports its daily quota used up
    let (_temp, warehouse) = open_warehouse();
    let http = ScriptedHttpClient::new();
    for function in ["TIME_SERIES_DAILY", "OVERVIEW", "EARNINGS"] {
        http.respond(function, DAILY_LIMIT);
    }
    let mut manager = manager(http.clone(), &warehouse);

    // When
    let error = manager
        .run(RunOptions::default(), &StopSignal::new())
        .await
        .expect_err("credentials exhausted");

    // Then: the first endpoint call aborts the run
    assert!(matches!(error, IngestError::CredentialsExhausted(_)));
    assert_eq!(http.requests().len(), 1);
    let session = warehouse
        .latest_session()
        .expect("query")
        .expect("session stored");
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.instruments_completed, 0);
}
