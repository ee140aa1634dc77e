use std::io::{self, Write};

use tubequota_core::{
    BatchReport, ChannelOutcome, ChannelSummary, CollectionReport, Item, PhaseReport, PhaseStatus, QuotaStatus,
};

use crate::cli::OutputFormat;
use crate::commands::CommandOutput;
use crate::error::CliError;

const TITLE_WIDTH: usize = 60;

pub fn render(output: &CommandOutput, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(output)?
            } else {
                serde_json::to_string(output)?
            };
            writeln!(out, "{payload}")?;
        }
        OutputFormat::Table => render_table(&mut out, output)?,
    }
    Ok(())
}

fn render_table(out: &mut impl Write, output: &CommandOutput) -> io::Result<()> {
    match output {
        CommandOutput::Collect(report) => render_collection(out, report),
        CommandOutput::Quota(status) => render_quota(out, status),
        CommandOutput::CacheClear { prefix, removed } => match prefix {
            Some(prefix) => writeln!(out, "removed {removed} cached entries with prefix '{prefix}'"),
            None => writeln!(out, "removed {removed} cached entries"),
        },
        CommandOutput::PhaseStatus(status) => render_phase_status(out, status),
        CommandOutput::PhaseRun { report, items } => {
            render_phase_report(out, report)?;
            writeln!(out)?;
            render_items(out, items)
        }
        CommandOutput::PhaseNext(None) => writeln!(out, "nothing left to run"),
        CommandOutput::PhaseNext(Some(batch)) => render_batch(out, batch),
        CommandOutput::PhaseReset => writeln!(out, "collection plan and phase cursors reset"),
    }
}

fn render_collection(out: &mut impl Write, report: &CollectionReport) -> io::Result<()> {
    render_items(out, &report.items)?;

    writeln!(out)?;
    writeln!(out, "channels:")?;
    for summary in &report.outcomes {
        render_channel(out, summary)?;
    }

    writeln!(out)?;
    for phase in &report.phases {
        render_phase_report(out, phase)?;
    }
    writeln!(
        out,
        "estimate    : {} units ({} discovery, {} enrichment, {} subscriptions)",
        report.estimate.total_units,
        report.estimate.discovery_units,
        report.estimate.enrichment_units,
        report.estimate.subscription_units
    )?;
    writeln!(
        out,
        "quota       : {} of {} used, {} remaining, {} saved by cache this run",
        report.quota.consumed, report.quota.ceiling, report.quota.remaining, report.saved_units
    )?;
    if report.halted {
        writeln!(out, "quota       : halted for the rest of the period")?;
    }
    if report.resumed {
        writeln!(out, "resumed     : continued an unfinished collection")?;
    }
    if !report.complete {
        writeln!(out, "unfinished  : run the same command again to resume")?;
    }
    Ok(())
}

fn render_items(out: &mut impl Write, items: &[Item]) -> io::Result<()> {
    if items.is_empty() {
        return writeln!(out, "no items");
    }

    writeln!(
        out,
        "{:>3}  {:>10}  {:>8}  {:>8}  {:<9}  {:<20}  {:<24}  TITLE",
        "#", "VIEWS", "LIKES", "COMMENTS", "TIER", "PUBLISHED", "CHANNEL"
    )?;
    for (rank, item) in items.iter().enumerate() {
        let (views, likes, comments) = match item.stats {
            Some(stats) => (
                stats.views.to_string(),
                stats.likes.to_string(),
                stats.comments.to_string(),
            ),
            None => (String::from("-"), String::from("-"), String::from("-")),
        };
        writeln!(
            out,
            "{:>3}  {:>10}  {:>8}  {:>8}  {:<9}  {:<20}  {:<24}  {}",
            rank + 1,
            views,
            likes,
            comments,
            item.tier.as_str(),
            item.published_at.format_rfc3339(),
            truncate(&item.channel_title, 24),
            truncate(&item.title, TITLE_WIDTH)
        )?;
        writeln!(out, "{:>3}  {}", "", item.url)?;
    }
    Ok(())
}

fn render_channel(out: &mut impl Write, summary: &ChannelSummary) -> io::Result<()> {
    let name = if summary.display_name.is_empty() {
        summary.channel_id.as_str()
    } else {
        summary.display_name.as_str()
    };
    match &summary.outcome {
        ChannelOutcome::Succeeded { tier, demoted, cached } => writeln!(
            out,
            "  {:<24}  ok at {tier}{}{}, {} items, {} with stats",
            truncate(name, 24),
            if *demoted { " (demoted)" } else { "" },
            if *cached { " (cached)" } else { "" },
            summary.items,
            summary.enriched
        ),
        ChannelOutcome::Exhausted { errors } => {
            writeln!(out, "  {:<24}  exhausted", truncate(name, 24))?;
            for failure in errors {
                writeln!(out, "  {:<24}    {}: {}", "", failure.tier, failure.error)?;
            }
            Ok(())
        }
    }
}

fn render_quota(out: &mut impl Write, status: &QuotaStatus) -> io::Result<()> {
    writeln!(out, "period_start: {}", status.period_start)?;
    writeln!(out, "daily_limit : {}", status.daily_limit)?;
    writeln!(out, "buffer      : {}", status.safety_buffer)?;
    writeln!(out, "ceiling     : {}", status.ceiling)?;
    writeln!(out, "consumed    : {}", status.consumed)?;
    writeln!(out, "remaining   : {}", status.remaining)?;
    writeln!(out, "saved       : {}", status.saved_units)?;
    writeln!(out, "halted      : {}", status.halted)?;
    if !status.by_operation.is_empty() {
        writeln!(out, "by operation:")?;
        for (operation, units) in &status.by_operation {
            writeln!(out, "  {:<18} {units}", operation.as_str())?;
        }
    }
    if !status.persisted {
        writeln!(out, "warning     : ledger could not be persisted this session")?;
    }
    Ok(())
}

fn render_phase_status(out: &mut impl Write, status: &PhaseStatus) -> io::Result<()> {
    if !status.planned {
        return writeln!(out, "no collection planned");
    }
    writeln!(
        out,
        "current     : {}",
        status.current.map(|phase| phase.as_str()).unwrap_or("done")
    )?;
    writeln!(out, "channels    : {}", status.channels)?;
    writeln!(out, "harvested   : {}", status.harvested)?;
    if let Some(after) = status.published_after {
        writeln!(out, "since       : {after}")?;
    }
    for cursor in &status.cursors {
        writeln!(
            out,
            "  {:<11} batch {:>3}  remaining {:>4}  completed {:>4}  in flight {}",
            cursor.phase_id.as_str(),
            cursor.batch_index,
            cursor.remaining.len(),
            cursor.completed.len(),
            cursor.in_flight.as_ref().map(Vec::len).unwrap_or(0)
        )?;
    }
    Ok(())
}

fn render_phase_report(out: &mut impl Write, report: &PhaseReport) -> io::Result<()> {
    writeln!(
        out,
        "phase {:<11}: {} batches, {}",
        report.phase.as_str(),
        report.batches.len(),
        if report.complete { "complete" } else { "unfinished" }
    )
}

fn render_batch(out: &mut impl Write, batch: &BatchReport) -> io::Result<()> {
    writeln!(
        out,
        "{} batch {}: {} channels{}, {:?}",
        batch.phase,
        batch.index,
        batch.channels.len(),
        if batch.resumed { " (re-run)" } else { "" },
        batch.disposition
    )
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_owned();
    }
    let mut shortened: String = value.chars().take(width.saturating_sub(1)).collect();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_values() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn reset_renders_a_single_line() {
        let mut buffer = Vec::new();
        render_table(&mut buffer, &CommandOutput::PhaseReset).expect("render");
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "collection plan and phase cursors reset\n"
        );
    }

    #[test]
    fn json_output_is_tagged_by_command() {
        let value = serde_json::to_value(CommandOutput::CacheClear {
            prefix: Some(String::from("search")),
            removed: 3,
        })
        .expect("encode");
        assert_eq!(value["command"], "cache_clear");
        assert_eq!(value["data"]["removed"], 3);
    }
}
