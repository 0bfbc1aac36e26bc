use ferrofeed_core::{FetchError, UniverseError, ValidationError};
use ferrofeed_warehouse::WarehouseError;
use thiserror::Error;

use crate::config::ConfigError;

/// Run-level failures. Endpoint failures never surface here; they are
/// recorded and the epoch continues.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] WarehouseError),

    #[error("credentials exhausted: {0}")]
    CredentialsExhausted(FetchError),

    #[error("no running session to resume")]
    NothingToResume,

    #[error("instrument universe is empty")]
    EmptyUniverse,

    #[error("epoch {epoch} is outside the universe of {universe} instrument(s)")]
    InvalidEpoch { epoch: u64, universe: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Universe(#[from] UniverseError),
}

impl IngestError {
    /// Errors that abort a running session.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PersistenceUnavailable(_) | Self::CredentialsExhausted(_)
        )
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::PersistenceUnavailable(_) => "ingest.persistence_unavailable",
            Self::CredentialsExhausted(_) => "ingest.credentials_exhausted",
            Self::NothingToResume => "ingest.nothing_to_resume",
            Self::EmptyUniverse => "ingest.empty_universe",
            Self::InvalidEpoch { .. } => "ingest.invalid_epoch",
            Self::Validation(_) => "ingest.validation",
            Self::Config(_) => "ingest.config",
            Self::Universe(_) => "ingest.universe",
        }
    }
}
