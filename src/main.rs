use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

use crate::db::firestore::FirestoreConfig;
use crate::db::models::MalformedReason;
use crate::db::prelude::*;
use crate::recalc::{RecalcErr, RecalcOptions, RecalcReport, Recalculator};
use crate::scoring::cutoff::SystemClock;
use crate::util::env::{Env, EnvErr};
use crate::util::telemetry::Telemetry;

mod args;
mod constants;
mod db;
mod recalc;
mod scoring;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] StoreErr),

    #[error(transparent)]
    Recalc(#[from] RecalcErr),

    #[error("unable to read roster {}: {source}", path.display())]
    RosterIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid roster {}: {source}", path.display())]
    Roster {
        path: PathBuf,
        source: MalformedReason,
    },
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = args::parse_cli_args();

    let env = match Env::new() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("error: {}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    let telemetry = match Telemetry::new(&env) {
        Ok(telemetry) => telemetry.register(),
        Err(e) => {
            eprintln!("error: unable to set up telemetry: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::debug!(?env, ?cli, "starting talent recalculation");

    let (status, stderr) = conclude(&run(cli, &env).await);
    if let Some(line) = stderr {
        eprintln!("{line}");
    }

    telemetry.shutdown();
    ExitCode::from(status)
}

/// Logs how the run ended. Returns the process exit status and, on failure, the line for stderr.
fn conclude(outcome: &Result<RecalcReport>) -> (u8, Option<String>) {
    match outcome {
        Ok(report) => {
            tracing::info!(
                cutoff = %report.cutoff,
                students = report.totals.len(),
                entries = report.entries_written,
                students_reset = report.students_reset,
                ledger_entries_deleted = report.ledger_entries_deleted,
                skipped = report.skipped_records,
                batches = report.batches_committed,
                dry_run = report.dry_run,
                "talent recalculation complete"
            );
            (0, None)
        }
        Err(e) => {
            tracing::error!(error = ?e, "talent recalculation failed");
            (1, Some(format!("error: {}", error_chain(e))))
        }
    }
}

async fn run(cli: args::Cli, env: &Env) -> Result<RecalcReport> {
    let mut options = RecalcOptions::from_env(env)?;
    options.dry_run = cli.dry_run;
    options.cutoff_override = cli.cutoff;

    if let Some(path) = cli.roster {
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RunnerErr::RosterIo {
                path: path.clone(),
                source,
            })?;
        options.roster =
            recalc::parse_roster(&contents).map_err(|source| RunnerErr::Roster { path, source })?;
        tracing::debug!(students = options.roster.len(), "loaded roster");
    }

    let store = FirestoreStore::new(FirestoreConfig::from(env))?;
    let report = Recalculator::new(store, SystemClock, options).run().await?;
    Ok(report)
}

/// The error's own message followed by any causes it does not already spell out.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(e) = cause {
        let msg = e.to_string();
        if !out.contains(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        cause = e.source();
    }
    out
}
