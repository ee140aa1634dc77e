use tubequota_core::AcquisitionConfig;

use crate::cli::{PhaseArgs, PhaseCommand};
use crate::error::CliError;

use super::{build_engine, CommandOutput};

pub async fn run(args: &PhaseArgs, config: &AcquisitionConfig) -> Result<CommandOutput, CliError> {
    let engine = build_engine(config)?;

    match &args.command {
        PhaseCommand::Status => Ok(CommandOutput::PhaseStatus(engine.phase_status())),
        PhaseCommand::Run {
            phase,
            batch_size,
            count,
            sort_key,
        } => {
            let report = engine.run_phase(*phase, *batch_size).await?;
            Ok(CommandOutput::PhaseRun {
                report,
                items: engine.ranked_items(*sort_key, *count),
            })
        }
        PhaseCommand::Next { batch_size } => Ok(CommandOutput::PhaseNext(engine.run_next_batch(*batch_size).await?)),
        PhaseCommand::Reset => {
            engine.reset_phases()?;
            Ok(CommandOutput::PhaseReset)
        }
    }
}
