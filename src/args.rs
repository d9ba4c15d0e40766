use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Recompute classroom talent totals and rebuild the talent ledger")]
pub struct Cli {
    /// Compute and log the new totals without writing anything back
    #[arg(long)]
    pub dry_run: bool,

    /// File listing every known student, one per line; each ends the run with an explicit total
    #[arg(short, long)]
    pub roster: Option<PathBuf>,

    /// Count records from this instant (RFC 3339) instead of today at the configured hour
    #[arg(long, value_parser = parse_rfc3339)]
    pub cutoff: Option<DateTime<Utc>>,
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

pub fn parse_cli_args() -> Cli {
    let args = Cli::parse();
    tracing::trace!(?args, "parsed command line");
    args
}
