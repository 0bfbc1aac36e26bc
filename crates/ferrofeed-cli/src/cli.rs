//! CLI argument definitions for ferrofeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Ingest the instrument universe epoch by epoch |
//! | `status` | Show a session and its checkpoint coverage |
//! | `endpoints` | List the endpoint catalog |
//! | `sql` | Query the local DuckDB warehouse |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--home` | `FERROFEED_HOME` or `~/.ferrofeed` | Data directory |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-json` | `false` | JSON log lines on stderr |
//!
//! # Examples
//!
//! ```bash
//! # Start a new session over the default universe
//! ferrofeed run --fresh
//!
//! # Two instruments, three endpoints, then stop
//! ferrofeed run --max-epochs 2 --endpoints overview,earnings,time_series_daily
//!
//! # Pick up where the last running session stopped
//! ferrofeed run --resume
//!
//! # Inspect coverage
//! ferrofeed sql "SELECT * FROM vw_endpoint_coverage ORDER BY records DESC"
//! ```

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

/// Rate-limited financial data ingestion.
#[derive(Debug, Parser)]
#[command(
    name = "ferrofeed",
    author,
    version,
    about = "Rate-limited, multi-credential financial data ingestion",
    long_about = "ferrofeed pulls every report the provider offers for a universe of \
instruments into a local DuckDB warehouse. Runs are split into per-instrument \
epochs with durable checkpoints, so an interrupted run resumes where it stopped.\n\
\n\
API keys are read from FERROFEED_API_KEYS (comma separated) or ALPHAVANTAGE_API_KEY."
)]
pub struct Cli {
    /// Data directory holding the warehouse; overrides `FERROFEED_HOME`.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Emit log lines as JSON (also enabled by `FERROFEED_LOG_JSON=1`).
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest the universe epoch by epoch.
    ///
    /// Prints run statistics as JSON when the universe is exhausted, the
    /// epoch limit is reached, or the run is interrupted with Ctrl-C.
    ///
    /// # Examples
    ///
    ///   ferrofeed run
    ///   ferrofeed run --from-epoch 40 --max-epochs 10
    ///   ferrofeed run --resume
    Run(RunArgs),

    /// Show a session row and its checkpoint coverage.
    ///
    /// Defaults to the most recently started session.
    Status(StatusArgs),

    /// List the endpoint catalog with shape class and cacheability.
    Endpoints,

    /// Run SQL queries against the DuckDB warehouse.
    ///
    /// Read-only by default with row and time limits.
    ///
    /// # Examples
    ///
    ///   ferrofeed sql "SELECT * FROM vw_session_throughput"
    ///   ferrofeed sql "SELECT COUNT(*) FROM canonical_records WHERE symbol = 'IBM'"
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("mode").args(["fresh", "from_epoch", "resume"])))]
pub struct RunArgs {
    /// Start a new session at the first instrument (default).
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Start a new session at this 1-based epoch.
    #[arg(long, value_name = "N")]
    pub from_epoch: Option<u64>,

    /// Continue the latest running session.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Stop after this many epochs; the session stays resumable.
    #[arg(long, value_name = "N")]
    pub max_epochs: Option<u64>,

    /// Newline-delimited ticker file replacing the built-in universe.
    #[arg(long, value_name = "FILE")]
    pub universe: Option<PathBuf>,

    /// Comma separated endpoint ids; defaults to the whole catalog.
    #[arg(long, value_delimiter = ',')]
    pub endpoints: Vec<String>,

    /// Records per write transaction.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Session id; defaults to the latest session.
    #[arg(long)]
    pub session: Option<String>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL query to execute.
    pub query: String,

    /// Allow write statements.
    #[arg(long, default_value_t = false)]
    pub write: bool,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}
