mod cache;
mod collect;
mod phase;
mod quota;

use std::sync::Arc;

use serde::Serialize;
use tubequota_core::{
    AcquisitionConfig, AcquisitionEngine, AcquisitionEngineBuilder, BatchReport, CollectionReport, EnvTokenProvider,
    FileTokenProvider, Item, PhaseReport, PhaseStatus, QuotaStatus, RequestPacer, SystemClock, TokenProvider,
    YouTubeAdapter,
};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Result of one command, rendered as JSON or a table.
#[derive(Debug, Serialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum CommandOutput {
    Collect(Box<CollectionReport>),
    Quota(QuotaStatus),
    CacheClear {
        prefix: Option<String>,
        removed: usize,
    },
    PhaseStatus(PhaseStatus),
    PhaseRun {
        report: PhaseReport,
        items: Vec<Item>,
    },
    PhaseNext(Option<BatchReport>),
    PhaseReset,
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let mut config = AcquisitionConfig::from_env()?;
    if let Some(dir) = &cli.state_dir {
        config.state_dir = Some(dir.clone());
    }
    if cli.ephemeral {
        config.state_dir = None;
    }

    match &cli.command {
        Command::Collect(args) => collect::run(args, config).await,
        Command::Quota => quota::run(&config),
        Command::Cache(args) => cache::run(args, &config).await,
        Command::Phase(args) => phase::run(args, &config).await,
    }
}

/// Engine over the live YouTube adapter.
fn build_engine(config: &AcquisitionConfig) -> Result<AcquisitionEngine, CliError> {
    let tokens: Arc<dyn TokenProvider> = match &config.token_file {
        Some(path) => Arc::new(FileTokenProvider::new(path, Arc::new(SystemClock))),
        None => Arc::new(EnvTokenProvider),
    };
    let source = YouTubeAdapter::new(tokens)
        .with_pacer(RequestPacer::per_second(config.requests_per_second))
        .with_timeout_ms(config.request_timeout_ms);

    let engine = AcquisitionEngineBuilder::from_config(config, Arc::new(source))?.build()?;
    Ok(engine)
}
