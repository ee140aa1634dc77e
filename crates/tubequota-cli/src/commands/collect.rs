use tracing::warn;
use tubequota_core::AcquisitionConfig;

use crate::cli::CollectArgs;
use crate::error::CliError;

use super::{build_engine, CommandOutput};

pub async fn run(args: &CollectArgs, mut config: AcquisitionConfig) -> Result<CommandOutput, CliError> {
    config.window = args.window;
    config.sort_key = args.sort_key;
    config.result_count = args.count;
    config.max_channels = Some(args.max_channels);
    config.items_per_channel = args.items_per_channel;
    if !args.channels.is_empty() {
        config.channel_ids = args.channels.clone();
    }
    if args.query.is_some() {
        config.search_query = args.query.clone();
    }
    if args.no_cache {
        config.cache_enabled = false;
    }
    if args.no_auth {
        config.no_auth = true;
    }
    if args.token_file.is_some() {
        config.token_file = args.token_file.clone();
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config.max_concurrency = max_concurrency;
    }

    let engine = build_engine(&config)?;

    let cancel = engine.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let report = engine.run_collection(&config.collection_request()).await;
    watcher.abort();
    let report = report?;

    if !report.complete {
        warn!("collection unfinished; run the same command again to resume");
    }
    Ok(CommandOutput::Collect(Box::new(report)))
}
