use tubequota_core::AcquisitionConfig;

use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

use super::{build_engine, CommandOutput};

pub async fn run(args: &CacheArgs, config: &AcquisitionConfig) -> Result<CommandOutput, CliError> {
    match &args.command {
        CacheCommand::Clear { prefix } => {
            let engine = build_engine(config)?;
            let removed = engine.clear_cache(prefix.as_deref()).await?;
            Ok(CommandOutput::CacheClear {
                prefix: prefix.clone(),
                removed,
            })
        }
    }
}
