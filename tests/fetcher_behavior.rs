//! Behaviour tests for the fetch layer: rotation, quota exhaustion,
//! circuit breaking and caching, observed through a scripted transport.

use std::time::{Duration, Instant};

use ferrofeed_core::{
    Backoff, CircuitBreakerConfig, CircuitState, FetchErrorKind, PacingConfig, RetryConfig, Symbol,
};

use ferrofeed_tests::{
    fast_fetcher_config, fetcher, ScriptedHttpClient, DAILY_LIMIT, DAILY_SERIES, MINUTE_LIMIT,
    OVERVIEW,
};

fn ibm() -> Symbol {
    Symbol::parse("IBM").expect("symbol")
}

#[tokio::test]
async fn when_first_credential_is_rate_limited_then_fetch_rotates_without_error() {
    // Given: the first key gets a soft rate-limit notice, the second gets data
    let http = ScriptedHttpClient::new();
    http.respond_for_key("TIME_SERIES_DAILY", "key-a", MINUTE_LIMIT);
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    let fetcher = fetcher(http.clone(), &["key-a", "key-b"], fast_fetcher_config());

    // When: the endpoint is fetched once
    let response = fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect("rotation hides the rate limit");

    // Then: the payload came from the second key and the pacer saw the signal
    assert!(response.payload.get("Time Series (Daily)").is_some());
    let keys: Vec<_> = http
        .requests()
        .iter()
        .map(|request| request.query_param("apikey").unwrap_or_default().to_owned())
        .collect();
    assert_eq!(keys, vec!["key-a", "key-b"]);
    assert_eq!(fetcher.stats().pacer.rate_limit_signals, 1);
    assert_eq!(fetcher.api_calls(), 2);
}

#[tokio::test]
async fn when_every_credential_is_rate_limited_then_quota_exceeded_is_reported() {
    // Given: every key answers with the per-minute notice
    let http = ScriptedHttpClient::new();
    http.respond("TIME_SERIES_DAILY", MINUTE_LIMIT);
    let fetcher = fetcher(http.clone(), &["key-a", "key-b"], fast_fetcher_config());

    // When: the endpoint is fetched
    let error = fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect_err("all keys limited");

    // Then: the failure is a quota error, not a fatal one
    assert_eq!(error.kind(), FetchErrorKind::QuotaExceeded);
    assert!(!error.is_fatal());
    assert_eq!(http.count_for("TIME_SERIES_DAILY"), 2);
}

#[tokio::test]
async fn when_daily_quota_is_spent_on_every_key_then_credentials_are_exhausted() {
    // Given: both keys report their daily allowance used up
    let http = ScriptedHttpClient::new();
    http.respond("OVERVIEW", DAILY_LIMIT);
    let fetcher = fetcher(http.clone(), &["key-a", "key-b"], fast_fetcher_config());

    // When: the endpoint is fetched
    let error = fetcher
        .fetch("overview", &ibm(), &[])
        .await
        .expect_err("no key left");

    // Then: the run-aborting error surfaces
    assert_eq!(error.kind(), FetchErrorKind::CredentialsExhausted);
    assert!(error.is_fatal());
    assert!(fetcher.credentials().all_exhausted());
}

#[tokio::test]
async fn when_breaker_trips_then_calls_fail_without_network_attempts() {
    // Given: a transport that keeps resetting and a breaker tripping after two failures
    let http = ScriptedHttpClient::new();
    http.fail_transport("TIME_SERIES_DAILY");
    let mut config = fast_fetcher_config();
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        open_timeout: Duration::from_secs(60),
    };
    let fetcher = fetcher(http.clone(), &["key-a"], config);

    // When: three fetches are attempted
    for _ in 0..2 {
        let error = fetcher
            .fetch("time_series_daily", &ibm(), &[])
            .await
            .expect_err("transport down");
        assert_eq!(error.kind(), FetchErrorKind::TransientNetwork);
    }
    let error = fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect_err("breaker open");

    // Then: the third fails fast and never reaches the transport
    assert_eq!(error.kind(), FetchErrorKind::CircuitOpen);
    assert_eq!(fetcher.breaker().state(), CircuitState::Open);
    assert_eq!(http.count_for("TIME_SERIES_DAILY"), 2);
}

#[tokio::test]
async fn when_breaker_cooldown_passes_then_one_success_closes_it() {
    // Given: a breaker that opened on transport failures
    let http = ScriptedHttpClient::new();
    http.fail_transport("TIME_SERIES_DAILY");
    let mut config = fast_fetcher_config();
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 1,
        open_timeout: Duration::from_millis(20),
    };
    let fetcher = fetcher(http.clone(), &["key-a"], config);
    fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect_err("transport down");
    assert_eq!(fetcher.breaker().state(), CircuitState::Open);

    // When: the provider recovers and the cooldown elapses
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    tokio::time::sleep(Duration::from_millis(40)).await;
    fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect("probe succeeds");

    // Then: the breaker is closed again
    assert_eq!(fetcher.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn when_cacheable_report_is_fetched_twice_then_second_call_is_served_locally() {
    // Given: a slow-changing report and a market series
    let http = ScriptedHttpClient::new();
    http.respond("OVERVIEW", OVERVIEW);
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    let fetcher = fetcher(http.clone(), &["key-a"], fast_fetcher_config());

    // When: both are fetched twice
    let first = fetcher.fetch("overview", &ibm(), &[]).await.expect("first");
    let second = fetcher.fetch("overview", &ibm(), &[]).await.expect("second");
    fetcher.fetch("time_series_daily", &ibm(), &[]).await.expect("series");
    fetcher.fetch("time_series_daily", &ibm(), &[]).await.expect("series again");

    // Then: only the report is cached
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.payload, first.payload);
    assert_eq!(http.count_for("OVERVIEW"), 1);
    assert_eq!(http.count_for("TIME_SERIES_DAILY"), 2);
    assert_eq!(fetcher.stats().cache_hits, 1);
}

#[tokio::test]
async fn when_provider_rejects_the_call_then_error_is_provider_data() {
    // Given: no scripted answer, so the provider returns an error message
    let http = ScriptedHttpClient::new();
    let fetcher = fetcher(http.clone(), &["key-a"], fast_fetcher_config());

    // When / Then
    let error = fetcher
        .fetch("earnings", &ibm(), &[])
        .await
        .expect_err("invalid call");
    assert_eq!(error.kind(), FetchErrorKind::ProviderData);
    assert_eq!(http.count_for("EARNINGS"), 1);
}

#[tokio::test]
async fn when_a_credential_stays_limited_then_it_is_retried_before_rotating() {
    // Given: two keys stay limited, each gets two attempts with a 10ms backoff
    let http = ScriptedHttpClient::new();
    http.respond_for_key("TIME_SERIES_DAILY", "key-a", MINUTE_LIMIT);
    http.respond_for_key("TIME_SERIES_DAILY", "key-b", MINUTE_LIMIT);
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    let mut config = fast_fetcher_config();
    config.attempts_per_credential = 2;
    config.rate_limit_backoff = Backoff::doubling(Duration::from_millis(10), Duration::from_secs(1));
    let fetcher = fetcher(http.clone(), &["key-a", "key-b", "key-c"], config);

    // When
    let started = Instant::now();
    fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect("third key answers");

    // Then: each limited key was tried twice, backing off before its retry
    assert_eq!(
        http.keys_used(),
        vec!["key-a", "key-a", "key-b", "key-b", "key-c"]
    );
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(fetcher.stats().pacer.rate_limit_signals, 4);
}

#[tokio::test]
async fn when_rotation_walks_past_several_limited_keys_then_breaker_stays_closed() {
    // Given: four limited keys, one healthy key and the default breaker
    let http = ScriptedHttpClient::new();
    for key in ["key-a", "key-b", "key-c", "key-d"] {
        http.respond_for_key("TIME_SERIES_DAILY", key, MINUTE_LIMIT);
    }
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    let mut config = fast_fetcher_config();
    config.attempts_per_credential = 3;
    config.circuit_breaker = CircuitBreakerConfig::default();
    let fetcher = fetcher(
        http.clone(),
        &["key-a", "key-b", "key-c", "key-d", "key-e"],
        config,
    );

    // When
    let response = fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect("healthy key reached");

    // Then: the same-key retries did not count against the breaker
    assert!(response.payload.get("Time Series (Daily)").is_some());
    assert_eq!(fetcher.api_calls(), 13);
    assert_eq!(http.keys_used().last().map(String::as_str), Some("key-e"));
    assert_eq!(fetcher.breaker().state(), CircuitState::Closed);
    assert_eq!(fetcher.breaker().trips(), 0);
}

#[tokio::test]
async fn when_transport_drops_once_then_retry_recovers() {
    // Given: one connection reset, then data
    let http = ScriptedHttpClient::new();
    http.fail_transport_once("TIME_SERIES_DAILY");
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    let mut config = fast_fetcher_config();
    config.transient_retry = RetryConfig::fixed(Duration::from_millis(1), 2);
    let fetcher = fetcher(http.clone(), &["key-a"], config);

    // When
    let response = fetcher
        .fetch("time_series_daily", &ibm(), &[])
        .await
        .expect("retry succeeds");

    // Then: the same key was used again and the breaker was cleared
    assert!(response.payload.get("Time Series (Daily)").is_some());
    assert_eq!(http.keys_used(), vec!["key-a", "key-a"]);
    assert_eq!(fetcher.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn when_success_streak_reaches_the_pause_interval_then_next_request_waits() {
    // Given: a long pause after every two consecutive successes
    let http = ScriptedHttpClient::new();
    http.respond("TIME_SERIES_DAILY", DAILY_SERIES);
    let mut config = fast_fetcher_config();
    config.pacing = PacingConfig {
        long_pause_every: 2,
        long_pause: Duration::from_millis(30),
        max_delay: Duration::from_millis(2),
        ..PacingConfig::unpaced()
    };
    let fetcher = fetcher(http.clone(), &["key-a"], config);

    // When: two quick fetches, then a third
    for _ in 0..2 {
        fetcher.fetch("time_series_daily", &ibm(), &[]).await.expect("fetch");
    }
    assert_eq!(fetcher.stats().pacer.long_pauses, 0);
    let started = Instant::now();
    fetcher.fetch("time_series_daily", &ibm(), &[]).await.expect("paused fetch");

    // Then: the third request sat out the pause exactly once
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(fetcher.stats().pacer.long_pauses, 1);
}
