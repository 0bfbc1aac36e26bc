//! # Ferrofeed Core
//!
//! Fetch and normalization contracts for the ferrofeed ingestion engine.
//!
//! ## Overview
//!
//! This crate owns everything between "which report for which instrument"
//! and "canonical records ready to persist":
//!
//! - **Endpoint catalog** with the shape class each report is normalized by
//! - **Credential pool** with per-key minute and day windows
//! - **Fetcher** combining adaptive pacing, circuit breaking, caching and rotation
//! - **Normalizer** mapping provider payloads to [`CanonicalRecord`]s
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL cache for responses that change slowly |
//! | [`circuit_breaker`] | Consecutive-failure breaker guarding the provider |
//! | [`credentials`] | Credential pool and per-key quota tracking |
//! | [`domain`] | Symbol, timestamp and canonical record types |
//! | [`endpoint`] | Static endpoint catalog |
//! | [`error`] | Validation and fetch error types |
//! | [`fetcher`] | Rate-limited, credential-rotating fetch |
//! | [`http_client`] | HTTP client abstraction |
//! | [`normalize`] | Shape-class driven payload normalization |
//! | [`pacing`] | Adaptive inter-request delay |
//! | [`retry`] | Backoff policies |
//! | [`universe`] | Default and file-based instrument universes |
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │  Fetcher    │────▶│ Credential Pool  │     │ Response      │
//! │             │────▶│ Adaptive Pacer   │     │ Cache         │
//! │             │────▶│ Circuit Breaker  │◀───▶│               │
//! └──────┬──────┘     └──────────────────┘     └───────────────┘
//!        │ RawResponse
//!        ▼
//! ┌─────────────┐
//! │ Normalizer  │──▶ Vec<CanonicalRecord>
//! └─────────────┘
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod credentials;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod normalize;
pub mod pacing;
pub mod retry;
pub mod universe;

pub use cache::ResponseCache;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use credentials::{
    Checkout, CredentialLease, CredentialPool, CredentialQuota, CredentialSnapshot,
};
pub use domain::{CanonicalRecord, ParsedValue, QualityFlag, Symbol, UtcDateTime};
pub use endpoint::{EndpointCategory, EndpointSpec, ShapeClass};
pub use error::{FetchError, FetchErrorKind, ValidationError};
pub use fetcher::{Fetcher, FetcherConfig, FetcherStats, RawResponse, DEFAULT_BASE_URL};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use normalize::{normalize, normalize_response};
pub use pacing::{AdaptivePacer, PacerSnapshot, PacingConfig};
pub use retry::{Backoff, RetryConfig};
pub use universe::{default_universe, load_universe, UniverseError};
