//! CLI argument definitions.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `collect` | Discover, enrich and rank recent videos |
//! | `quota` | Show the quota ledger for the current period |
//! | `cache clear` | Drop cached responses (optionally by endpoint prefix) |
//! | `phase status\|run\|next\|reset` | Inspect or drive a resumable collection |
//!
//! ```bash
//! tubequota collect --window week --sort views --count 20
//! tubequota collect --no-auth --channel UC_x5XG1OV2P6uZZ5FSM9Ttw
//! tubequota phase run enrichment --batch-size 10
//! tubequota quota --format json --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tubequota_core::{ChannelId, PhaseId, SortKey, TimeWindow};

/// Quota-aware collector of recent videos from YouTube channels.
#[derive(Debug, Parser)]
#[command(name = "tubequota", author, version, about = "Quota-aware YouTube collection CLI")]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Directory holding the quota ledger, cursors, results and cache.
    #[arg(long, global = true, env = "TUBEQUOTA_HOME")]
    pub state_dir: Option<PathBuf>,

    /// Keep all state in memory for this invocation.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Log level; TUBEQUOTA_LOG or RUST_LOG take precedence.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover, enrich and rank recent videos.
    Collect(CollectArgs),
    /// Show quota usage for the current period (no quota cost).
    Quota,
    /// Manage the response cache.
    Cache(CacheArgs),
    /// Inspect or drive the phases of a collection.
    Phase(PhaseArgs),
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// week, month, or an RFC3339 UTC start timestamp.
    #[arg(long, default_value = "week")]
    pub window: TimeWindow,

    /// views, likes or comments.
    #[arg(long = "sort", default_value = "views")]
    pub sort_key: SortKey,

    /// Number of ranked items to return.
    #[arg(long, default_value_t = 20)]
    pub count: usize,

    #[arg(long, default_value_t = 50)]
    pub max_channels: usize,

    #[arg(long, default_value_t = 10)]
    pub items_per_channel: usize,

    /// Explicit channel id; repeatable. Defaults to the user's subscriptions.
    #[arg(long = "channel", value_name = "CHANNEL_ID")]
    pub channels: Vec<ChannelId>,

    /// Keyword filter for primary-tier search.
    #[arg(long)]
    pub query: Option<String>,

    /// Bypass cache reads; responses are still written.
    #[arg(long)]
    pub no_cache: bool,

    /// Use only the public feed; requires --channel.
    #[arg(long)]
    pub no_auth: bool,

    /// JSON file holding {"access_token", "expires_at"}.
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Remove cached entries.
    Clear {
        /// Endpoint prefix such as `search` or `videos`.
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct PhaseArgs {
    #[command(subcommand)]
    pub command: PhaseCommand,
}

#[derive(Debug, Subcommand)]
pub enum PhaseCommand {
    /// Show cursors of the planned collection.
    Status,
    /// Run a phase until it completes or stops.
    Run {
        /// discovery or enrichment.
        phase: PhaseId,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Ranked items shown after the run.
        #[arg(long, default_value_t = 20)]
        count: usize,
        #[arg(long = "sort", default_value = "views")]
        sort_key: SortKey,
    },
    /// Run one batch of the first unfinished phase.
    Next {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Forget the planned collection and its cursors.
    Reset,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn collect_parses_typed_arguments() {
        let cli = Cli::try_parse_from([
            "tubequota",
            "collect",
            "--window",
            "month",
            "--sort",
            "likes",
            "--channel",
            "UCabc",
            "--channel",
            "UCdef",
            "--no-auth",
        ])
        .expect("valid arguments");

        let Command::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.window, TimeWindow::Month);
        assert_eq!(args.sort_key, SortKey::Likes);
        assert_eq!(args.channels.len(), 2);
        assert!(args.no_auth);
    }

    #[test]
    fn invalid_phase_is_rejected() {
        assert!(Cli::try_parse_from(["tubequota", "phase", "run", "ranking"]).is_err());
    }
}
