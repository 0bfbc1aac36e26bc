//! # Ferrofeed Ingest
//!
//! Orchestration layer of the ferrofeed ingestion engine.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Environment-driven run configuration |
//! | [`error`] | Run-level error taxonomy |
//! | [`indexer`] | Text unit hand-off to the embedding subsystem |
//! | [`manager`] | Epoch loop, sessions and resume |
//! | [`stats`] | Epoch outcomes and run reports |
//! | [`writer`] | Idempotent batched persistence and checkpoint advance |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrofeed_ingest::{IngestConfig, IngestionManager, RunOptions, StopSignal};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::from_env()?;
//! let mut manager = IngestionManager::from_config(&config)?;
//! let report = manager.run(RunOptions::default(), &StopSignal::new()).await?;
//! println!("{} records in {:.1}s", report.records_written, report.elapsed_seconds);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod indexer;
pub mod manager;
pub mod stats;
pub mod writer;

pub use config::{ConfigError, IngestConfig};
pub use error::IngestError;
pub use indexer::{IndexError, NoopTextIndexer, OutboxTextIndexer, TextIndexer, TextUnit};
pub use manager::{IngestionManager, RunMode, RunOptions, RunState, StopSignal};
pub use stats::{EpochOutcome, RunReport};
pub use writer::{PersistReport, PersistTarget, Writer};
