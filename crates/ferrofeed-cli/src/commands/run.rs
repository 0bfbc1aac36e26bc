use ferrofeed_ingest::{IngestConfig, IngestionManager, RunMode, RunOptions, StopSignal};
use serde_json::Value;

use crate::cli::RunArgs;
use crate::error::CliError;

pub async fn run(args: &RunArgs, mut config: IngestConfig) -> Result<Value, CliError> {
    if let Some(universe) = &args.universe {
        config.universe_file = Some(universe.clone());
    }
    if !args.endpoints.is_empty() {
        config.endpoints = args
            .endpoints
            .iter()
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .collect();
    }
    if let Some(batch_size) = args.batch_size {
        config.write_batch_size = batch_size.max(1);
    }

    let options = RunOptions {
        mode: mode(args),
        max_epochs: args.max_epochs,
    };
    let mut manager = IngestionManager::from_config(&config)?;

    let stop = StopSignal::new();
    let handle = stop.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current epoch");
            handle.trigger();
        }
    });

    let result = manager.run(options, &stop).await;
    interrupt.abort();

    Ok(serde_json::to_value(result?)?)
}

fn mode(args: &RunArgs) -> RunMode {
    if args.resume {
        RunMode::Resume
    } else if let Some(epoch) = args.from_epoch {
        RunMode::FromEpoch(epoch)
    } else {
        RunMode::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            fresh: false,
            from_epoch: None,
            resume: false,
            max_epochs: None,
            universe: None,
            endpoints: Vec::new(),
            batch_size: None,
        }
    }

    #[test]
    fn fresh_is_the_default_mode() {
        assert_eq!(mode(&args()), RunMode::Fresh);
    }

    #[test]
    fn explicit_modes_are_honoured() {
        let mut from = args();
        from.from_epoch = Some(12);
        assert_eq!(mode(&from), RunMode::FromEpoch(12));

        let mut resume = args();
        resume.resume = true;
        assert_eq!(mode(&resume), RunMode::Resume);
    }
}
