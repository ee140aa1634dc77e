use tubequota_core::AcquisitionConfig;

use crate::error::CliError;

use super::{build_engine, CommandOutput};

pub fn run(config: &AcquisitionConfig) -> Result<CommandOutput, CliError> {
    let engine = build_engine(config)?;
    Ok(CommandOutput::Quota(engine.quota_status()))
}
