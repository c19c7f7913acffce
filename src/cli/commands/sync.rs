//! Sync command: reconcile one export snapshot into the live store.

use crate::blob::{DirBlobStore, HttpFetcher};
use crate::cli::SyncArgs;
use crate::config::load_config;
use crate::error::{Error, Result};
use crate::reconcile::report::{log_report, print_report, write_report};
use crate::reconcile::{CancelFlag, Reconciler, SyncOptions, SyncReport};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Serialize)]
struct SyncOutput<'a> {
    #[serde(flatten)]
    report: &'a SyncReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
}

/// A cancel flag raised by Ctrl-C.
///
/// The run stops before its next batch; the batch in flight finishes and
/// the report lists what was left pending.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
    }
    cancel
}

/// Execute the sync command.
///
/// The report is always printed. A run with any recorded error exits
/// non-zero through [`Error::PartialFailure`].
///
/// # Errors
///
/// Returns an error if the store, config or export file cannot be opened,
/// if the report artifact cannot be written, or if the run recorded errors.
pub fn execute(
    args: &SyncArgs,
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    actor: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(super::as_path(config_path))?;
    let mut store = super::open_store(db_path, actor, &config)?;

    let raw = fs::read(&args.export).map_err(|e| {
        Error::InvalidArgument(format!("Cannot read export {}: {e}", args.export.display()))
    })?;

    let mut policy = config.policy;
    if let Some(size) = args.batch_size {
        policy.batch_size = size;
    }
    if let Some(delay) = args.delay_ms {
        policy.batch_delay_ms = delay;
    }
    if policy.batch_size == 0 {
        return Err(Error::InvalidArgument("batch size must be at least 1".to_string()));
    }

    let options = SyncOptions {
        policy,
        dry_run,
        protected_categories: super::protected_categories(&config, &args.protect),
    };
    let mut blobs = DirBlobStore::new(config.blob_dir()?, &config.blob_base_url()?);
    let fetcher = HttpFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?
        .with_local_root(config.local_media_root.clone());

    let report = Reconciler::new(&mut store, &mut blobs, &fetcher, options)
        .with_cancel(cancel_on_ctrl_c())
        .on_complete(log_report)
        .run_sync(&raw);

    let artifact = args
        .report
        .clone()
        .or_else(|| config.report_dir.clone())
        .map(|dir| write_report(&report, &dir))
        .transpose()?;

    if json {
        let output = SyncOutput {
            report: &report,
            artifact,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        let heading = if report.dry_run {
            "Sync plan (dry run)"
        } else {
            "Sync report"
        };
        print_report(heading, &report);
        if let Some(path) = artifact {
            println!();
            println!("Report written to {}", path.display());
        }
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(Error::PartialFailure {
            errors: report.errors.len(),
        })
    }
}
