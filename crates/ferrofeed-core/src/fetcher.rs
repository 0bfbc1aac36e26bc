//! Provider fetch layer.
//!
//! One [`Fetcher::fetch`] call is one logical request for an
//! `(endpoint, instrument)` pair. Underneath it may:
//!
//! - answer from the TTL cache without touching the network,
//! - fail fast while the circuit breaker is open,
//! - wait on the adaptive pacer and the credential quotas,
//! - retry the same credential with exponential backoff on rate limits,
//! - rotate round-robin through the remaining credentials,
//! - retry transport failures with jittered backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::credentials::{Checkout, CredentialLease, CredentialPool, CredentialSnapshot};
use crate::endpoint::{self, EndpointSpec};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::pacing::{AdaptivePacer, PacerSnapshot, PacingConfig};
use crate::retry::{Backoff, RetryConfig};
use crate::{FetchError, Symbol, UtcDateTime};

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Lower-cased fragments of the provider's soft rate-limit notices.
const RATE_LIMIT_PHRASES: &[&str] = &[
    "call frequency",
    "rate limit",
    "requests per minute",
    "calls per minute",
    "requests per day",
    "more sparingly",
    "api call volume",
];

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Rate-limited attempts on one credential before rotating.
    pub attempts_per_credential: u32,
    /// Backoff between same-credential rate-limit retries; restarts on rotation.
    pub rate_limit_backoff: Backoff,
    pub transient_retry: RetryConfig,
    pub cache_ttl: Duration,
    /// Upper bound on a single quota or cooldown wait.
    pub max_quota_wait: Duration,
    pub pacing: PacingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(30),
            attempts_per_credential: 3,
            rate_limit_backoff: Backoff::doubling(Duration::from_secs(2), Duration::from_secs(30)),
            transient_retry: RetryConfig::default(),
            cache_ttl: Duration::from_secs(60 * 60),
            max_quota_wait: Duration::from_secs(90),
            pacing: PacingConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Provider response for one `(endpoint, instrument)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawResponse {
    pub endpoint: String,
    pub symbol: Symbol,
    pub params: Vec<(String, String)>,
    pub payload: Value,
    pub status: u16,
    pub fetched_at: UtcDateTime,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetcherStats {
    pub api_calls: u64,
    pub cache_hits: u64,
    pub breaker_state: CircuitState,
    pub breaker_trips: u64,
    pub pacer: PacerSnapshot,
    pub credentials: Vec<CredentialSnapshot>,
}

/// How a single provider exchange ended.
#[derive(Debug, Clone, PartialEq)]
enum ResponseClass {
    Payload { payload: Value, status: u16 },
    RateLimited { message: String, daily: bool },
    Transient(String),
    Rejected(FetchError),
}

/// What the credential loop should do next.
enum CredentialOutcome {
    Done { payload: Value, status: u16 },
    Rotate,
    Failed(FetchError),
}

/// Rate-limited, credential-rotating fetch client.
pub struct Fetcher {
    config: FetcherConfig,
    http: Arc<dyn HttpClient>,
    credentials: Arc<CredentialPool>,
    pacer: Arc<AdaptivePacer>,
    breaker: Arc<CircuitBreaker>,
    cache: ResponseCache,
    api_calls: AtomicU64,
}

impl Fetcher {
    pub fn new(
        config: FetcherConfig,
        http: Arc<dyn HttpClient>,
        credentials: Arc<CredentialPool>,
    ) -> Self {
        let pacer = Arc::new(AdaptivePacer::new(config.pacing));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let cache = ResponseCache::new(config.cache_ttl);
        Self {
            config,
            http,
            credentials,
            pacer,
            breaker,
            cache,
            api_calls: AtomicU64::new(0),
        }
    }

    /// Share pacing state with other fetchers on the same credential set.
    pub fn with_pacer(mut self, pacer: Arc<AdaptivePacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn pacer(&self) -> &AdaptivePacer {
        &self.pacer
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> FetcherStats {
        FetcherStats {
            api_calls: self.api_calls(),
            cache_hits: self.cache.hits(),
            breaker_state: self.breaker.state(),
            breaker_trips: self.breaker.trips(),
            pacer: self.pacer.snapshot(),
            credentials: self.credentials.snapshot(),
        }
    }

    /// Fetch one endpoint for one instrument. `params` override catalog defaults.
    pub async fn fetch(
        &self,
        endpoint_id: &str,
        symbol: &Symbol,
        params: &[(String, String)],
    ) -> Result<RawResponse, FetchError> {
        let spec = endpoint::lookup(endpoint_id)?;
        let mut query = spec.query_params(symbol);
        for (name, value) in params {
            match query.iter_mut().find(|(existing, _)| existing == name) {
                Some(slot) => slot.1 = value.clone(),
                None => query.push((name.clone(), value.clone())),
            }
        }

        let cache_key = spec.cacheable.then(|| {
            let scope = if spec.is_global() { "*" } else { symbol.as_str() };
            ResponseCache::key(spec.id, scope, &query)
        });

        if let Some(key) = &cache_key {
            if let Some(payload) = self.cache.get(key).await {
                tracing::debug!(endpoint = spec.id, symbol = %symbol, "cache hit");
                return Ok(RawResponse {
                    endpoint: spec.id.to_owned(),
                    symbol: symbol.clone(),
                    params: query,
                    payload,
                    status: 200,
                    fetched_at: UtcDateTime::now(),
                    cache_hit: true,
                });
            }
        }

        let (payload, status) = self.fetch_rotating(spec, symbol, &query).await?;
        if let Some(key) = cache_key {
            self.cache.put(key, payload.clone()).await;
        }

        Ok(RawResponse {
            endpoint: spec.id.to_owned(),
            symbol: symbol.clone(),
            params: query,
            payload,
            status,
            fetched_at: UtcDateTime::now(),
            cache_hit: false,
        })
    }

    async fn fetch_rotating(
        &self,
        spec: &EndpointSpec,
        symbol: &Symbol,
        query: &[(String, String)],
    ) -> Result<(Value, u16), FetchError> {
        let mut tried: Vec<usize> = Vec::new();
        loop {
            self.ensure_circuit_closed()?;
            let Some(lease) = self.next_credential(&tried).await? else {
                return Err(FetchError::quota_exceeded(format!(
                    "{} for {symbol}: rate limited on all {} credential(s)",
                    spec.id,
                    tried.len()
                )));
            };

            let index = lease.index();
            match self.run_credential(spec, symbol, query, lease).await {
                CredentialOutcome::Done { payload, status } => return Ok((payload, status)),
                CredentialOutcome::Failed(error) => return Err(error),
                CredentialOutcome::Rotate => {
                    tried.push(index);
                    self.credentials.rotate_past(index);
                    tracing::info!(
                        endpoint = spec.id,
                        symbol = %symbol,
                        credentials_tried = tried.len(),
                        "rotating credential"
                    );
                }
            }
        }
    }

    async fn run_credential(
        &self,
        spec: &EndpointSpec,
        symbol: &Symbol,
        query: &[(String, String)],
        mut lease: CredentialLease,
    ) -> CredentialOutcome {
        let index = lease.index();
        let mut rate_limited = 0_u32;
        let mut transient = 0_u32;

        loop {
            if let Err(error) = self.ensure_circuit_closed() {
                return CredentialOutcome::Failed(error);
            }
            self.pacer.acquire().await;

            let request = HttpRequest::get(self.config.base_url.as_str())
                .with_query(query.iter().cloned())
                .with_query_param("apikey", lease.secret())
                .with_timeout_ms(self.config.request_timeout.as_millis() as u64);
            self.api_calls.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                endpoint = spec.id,
                symbol = %symbol,
                credential = lease.label(),
                "provider request"
            );

            let class = classify(self.http.execute(request).await, &self.config.transient_retry);
            match class {
                ResponseClass::Payload { payload, status } => {
                    self.breaker.record_success();
                    self.pacer.record_success();
                    self.credentials.record_success(index);
                    return CredentialOutcome::Done { payload, status };
                }
                ResponseClass::Rejected(error) => {
                    // The transport worked; the provider refused this request.
                    self.breaker.record_success();
                    self.pacer.record_success();
                    self.credentials.record_success(index);
                    return CredentialOutcome::Failed(error);
                }
                ResponseClass::RateLimited { message, daily } => {
                    self.pacer.record_failure();
                    self.credentials.record_failure(index);
                    rate_limited += 1;
                    tracing::warn!(
                        endpoint = spec.id,
                        symbol = %symbol,
                        credential = lease.label(),
                        attempt = rate_limited,
                        "rate limited: {message}"
                    );

                    if daily {
                        self.credentials.mark_daily_exhausted(index);
                    }
                    if daily || rate_limited >= self.config.attempts_per_credential.max(1) {
                        // One breaker failure per spent credential, not per retry.
                        self.breaker.record_failure();
                        return CredentialOutcome::Rotate;
                    }
                    tokio::time::sleep(self.config.rate_limit_backoff.delay(rate_limited - 1))
                        .await;
                }
                ResponseClass::Transient(message) => {
                    self.breaker.record_failure();
                    self.credentials.record_failure(index);
                    if !self.config.transient_retry.allows(transient) {
                        return CredentialOutcome::Failed(FetchError::transient(format!(
                            "{} for {symbol}: {message}",
                            spec.id
                        )));
                    }
                    tracing::warn!(
                        endpoint = spec.id,
                        symbol = %symbol,
                        attempt = transient + 1,
                        "transient failure, retrying: {message}"
                    );
                    tokio::time::sleep(self.config.transient_retry.delay_for_attempt(transient))
                        .await;
                    transient += 1;
                }
            }

            lease = match self.same_credential(index).await {
                Some(lease) => lease,
                None => return CredentialOutcome::Rotate,
            };
        }
    }

    fn ensure_circuit_closed(&self) -> Result<(), FetchError> {
        if self.breaker.allow_request() {
            return Ok(());
        }
        Err(FetchError::circuit_open(format!(
            "circuit breaker open; retry in {}ms",
            self.breaker.retry_after().as_millis()
        )))
    }

    async fn next_credential(&self, tried: &[usize]) -> Result<Option<CredentialLease>, FetchError> {
        loop {
            match self.credentials.checkout(tried) {
                Checkout::Ready(lease) => return Ok(Some(lease)),
                Checkout::Wait(wait) => {
                    let wait = wait.min(self.config.max_quota_wait);
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for credential quota");
                    tokio::time::sleep(wait).await;
                }
                Checkout::Unavailable if self.credentials.all_exhausted() => {
                    return Err(FetchError::credentials_exhausted(
                        "every credential has exhausted its daily quota",
                    ));
                }
                Checkout::Unavailable => return Ok(None),
            }
        }
    }

    async fn same_credential(&self, index: usize) -> Option<CredentialLease> {
        loop {
            match self.credentials.checkout_same(index) {
                Checkout::Ready(lease) => return Some(lease),
                Checkout::Wait(wait) if wait <= self.config.max_quota_wait => {
                    tokio::time::sleep(wait).await;
                }
                Checkout::Wait(_) | Checkout::Unavailable => return None,
            }
        }
    }
}

fn classify(result: Result<HttpResponse, HttpError>, retry: &RetryConfig) -> ResponseClass {
    let response = match result {
        Ok(response) => response,
        Err(error) if error.retryable() => return ResponseClass::Transient(error.to_string()),
        Err(error) => return ResponseClass::Rejected(FetchError::invalid_request(error.to_string())),
    };

    if response.status == 429 {
        return ResponseClass::RateLimited {
            message: String::from("HTTP 429"),
            daily: false,
        };
    }
    if retry.should_retry_status(response.status) {
        return ResponseClass::Transient(format!("HTTP {}", response.status));
    }
    if !response.is_success() {
        return ResponseClass::Rejected(FetchError::provider_data(format!(
            "provider returned HTTP {}",
            response.status
        )));
    }

    let payload: Value = match serde_json::from_str(&response.body) {
        Ok(payload) => payload,
        Err(error) => {
            return ResponseClass::Rejected(FetchError::provider_data(format!(
                "malformed JSON body: {error}"
            )))
        }
    };

    if let Some(notice) = ["Note", "Information"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
    {
        let lowered = notice.to_ascii_lowercase();
        if RATE_LIMIT_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return ResponseClass::RateLimited {
                message: notice.to_owned(),
                daily: lowered.contains("per day"),
            };
        }
        if payload.as_object().is_some_and(|object| object.len() == 1) {
            return ResponseClass::Rejected(FetchError::provider_data(notice.to_owned()));
        }
    }

    if let Some(message) = payload.get("Error Message").and_then(Value::as_str) {
        return ResponseClass::Rejected(FetchError::provider_data(message.to_owned()));
    }

    ResponseClass::Payload {
        payload,
        status: response.status,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::FetchErrorKind;

    fn ok(body: &str) -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse::ok_json(body))
    }

    fn status(code: u16) -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse {
            status: code,
            body: String::new(),
        })
    }

    #[test]
    fn soft_rate_limit_note_is_detected() {
        let class = classify(
            ok(r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#),
            &RetryConfig::default(),
        );
        assert!(matches!(class, ResponseClass::RateLimited { daily: false, .. }));
    }

    #[test]
    fn daily_limit_information_is_flagged() {
        let class = classify(
            ok(r#"{"Information": "Our standard API rate limit is 25 requests per day."}"#),
            &RetryConfig::default(),
        );
        assert!(matches!(class, ResponseClass::RateLimited { daily: true, .. }));
    }

    #[test]
    fn error_message_is_provider_data() {
        let class = classify(
            ok(r#"{"Error Message": "Invalid API call."}"#),
            &RetryConfig::default(),
        );
        match class {
            ResponseClass::Rejected(error) => assert_eq!(error.kind(), FetchErrorKind::ProviderData),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lone_premium_notice_is_rejected_not_retried() {
        let class = classify(
            ok(r#"{"Information": "This is a premium endpoint."}"#),
            &RetryConfig::default(),
        );
        assert!(matches!(class, ResponseClass::Rejected(_)));
    }

    #[test]
    fn statuses_map_to_categories() {
        let retry = RetryConfig::default();
        assert!(matches!(classify(status(429), &retry), ResponseClass::RateLimited { .. }));
        assert!(matches!(classify(status(503), &retry), ResponseClass::Transient(_)));
        assert!(matches!(classify(status(404), &retry), ResponseClass::Rejected(_)));
        assert!(matches!(
            classify(Err(HttpError::new("connection reset")), &retry),
            ResponseClass::Transient(_)
        ));
    }

    #[test]
    fn malformed_body_is_provider_data() {
        let class = classify(ok("<html>maintenance</html>"), &RetryConfig::default());
        assert!(matches!(class, ResponseClass::Rejected(_)));
    }

    #[test]
    fn ordinary_payload_passes_through() {
        let class = classify(ok(r#"{"Global Quote": {"05. price": "10.0"}}"#), &RetryConfig::default());
        assert_eq!(
            class,
            ResponseClass::Payload {
                payload: json!({"Global Quote": {"05. price": "10.0"}}),
                status: 200
            }
        );
    }
}
