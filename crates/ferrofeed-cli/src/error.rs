use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ferrofeed_core::ValidationError),

    #[error(transparent)]
    Config(#[from] ferrofeed_ingest::ConfigError),

    #[error("command error: {0}")]
    Command(String),

    #[error("{0} [{code}]", code = .0.code())]
    Ingest(#[from] ferrofeed_ingest::IngestError),

    #[error(transparent)]
    Warehouse(#[from] ferrofeed_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Command(_) => 2,
            Self::Ingest(error) if error.is_fatal() => 3,
            Self::Ingest(_) => 2,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) | Self::Io(_) => 10,
        }
    }
}
