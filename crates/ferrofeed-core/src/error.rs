use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation errors for domain inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("timestamp is not in a recognized provider format: '{value}'")]
    UnrecognizedTimestamp { value: String },
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("unknown endpoint '{value}'")]
    UnknownEndpoint { value: String },
    #[error("credential list cannot be empty")]
    NoCredentials,
    #[error("universe file '{path}' contains no symbols")]
    EmptyUniverse { path: String },
}

/// Failure categories surfaced by the fetch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Timeout, connection reset or a retryable 5xx after retries ran out.
    TransientNetwork,
    /// Every credential answered with a rate-limit signal within one call.
    QuotaExceeded,
    /// The provider rejected the call or returned an unusable body.
    ProviderData,
    /// The circuit breaker is open; no network attempt was made.
    CircuitOpen,
    /// No credential has daily quota left.
    CredentialsExhausted,
    /// The request could not be built (unknown endpoint, bad parameters).
    InvalidRequest,
}

/// Structured fetch error carrying its kind and retry hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    retryable: bool,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::TransientNetwork,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::QuotaExceeded,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn provider_data(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::ProviderData,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::CircuitOpen,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn credentials_exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::CredentialsExhausted,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    /// Only an empty credential set aborts a whole run.
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, FetchErrorKind::CredentialsExhausted)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::TransientNetwork => "fetch.transient_network",
            FetchErrorKind::QuotaExceeded => "fetch.quota_exceeded",
            FetchErrorKind::ProviderData => "fetch.provider_data",
            FetchErrorKind::CircuitOpen => "fetch.circuit_open",
            FetchErrorKind::CredentialsExhausted => "fetch.credentials_exhausted",
            FetchErrorKind::InvalidRequest => "fetch.invalid_request",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

impl From<ValidationError> for FetchError {
    fn from(value: ValidationError) -> Self {
        Self::invalid_request(value.to_string())
    }
}
