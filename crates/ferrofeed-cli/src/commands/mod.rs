mod endpoints;
mod run;
mod sql;
mod status;

use std::path::PathBuf;

use ferrofeed_ingest::IngestConfig;
use ferrofeed_warehouse::{Warehouse, WarehouseConfig};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(args, base_config(cli)?).await,
        Command::Status(args) => status::run(args, &open_warehouse(cli)?),
        Command::Endpoints => endpoints::run(),
        Command::Sql(args) => sql::run(args, &open_warehouse(cli)?),
    }
}

/// Environment configuration with the global `--home` applied.
fn base_config(cli: &Cli) -> Result<IngestConfig, CliError> {
    let mut config = IngestConfig::from_env()?;
    if let Some(home) = &cli.home {
        config.home = home.clone();
    }
    Ok(config)
}

fn open_warehouse(cli: &Cli) -> Result<Warehouse, CliError> {
    let home: PathBuf = cli
        .home
        .clone()
        .unwrap_or_else(ferrofeed_warehouse::resolve_home);
    Ok(Warehouse::open(WarehouseConfig::in_home(home))?)
}
