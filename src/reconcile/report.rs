//! Report output: JSON artifact, log line and terminal summary.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;
use tracing::info;

use crate::error::Result;
use crate::reconcile::types::{OrphanReason, SyncReport};

/// Write `content` to `path` via a temp file, fsync and rename.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Write the report as pretty JSON into `dir` and return the file path.
///
/// Files are named after the run's start time, e.g.
/// `sync-20240301T120000Z.json`.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_report(report: &SyncReport, dir: &Path) -> Result<PathBuf> {
    let stamp = chrono::DateTime::parse_from_rfc3339(&report.started_at)
        .map_or_else(|_| chrono::Utc::now(), |t| t.with_timezone(&chrono::Utc))
        .format("%Y%m%dT%H%M%SZ");
    let kind = if report.dry_run { "plan" } else { "sync" };
    let path = dir.join(format!("{kind}-{stamp}.json"));
    atomic_write(&path, &serde_json::to_string_pretty(report)?)?;
    Ok(path)
}

/// Emit the whole report as one `info` line of JSON.
pub fn log_report(report: &SyncReport) {
    match serde_json::to_string(report) {
        Ok(json) => info!(report = %json, "Sync report"),
        Err(e) => info!(error = %e, "Sync report could not be serialized"),
    }
}

/// Human summary for a terminal.
pub fn print_report(heading: &str, report: &SyncReport) {
    println!("{}", heading.bold());
    println!("  Created:  {}", report.created.to_string().green());
    println!("  Updated:  {}", report.updated.to_string().green());
    println!("  Relinked: {}", report.relinked.to_string().green());
    println!("  Skipped:  {}", report.skipped.to_string().dimmed());
    if report.deleted > 0 {
        println!("  Deleted:  {}", report.deleted.to_string().yellow());
    }
    if report.cancelled {
        println!(
            "  {} {} operations left pending",
            "Cancelled:".yellow().bold(),
            report.pending
        );
    }

    if !report.errors.is_empty() {
        println!();
        println!("{}", format!("Errors ({})", report.errors.len()).red().bold());
        for error in &report.errors {
            println!("  {} {}: {}", "•".red(), error.identifier, error.message);
        }
    }

    if !report.orphan_candidates.is_empty() {
        println!();
        println!(
            "{}",
            format!("Orphan candidates ({})", report.orphan_candidates.len())
                .yellow()
                .bold()
        );
        for candidate in &report.orphan_candidates {
            let reason = match candidate.reason {
                OrphanReason::Duplicate => "duplicate",
                OrphanReason::Unreferenced => "unreferenced",
                OrphanReason::NotInSource => "not in source",
            };
            let kept = candidate
                .kept
                .as_ref()
                .map(|k| format!(" (kept {k})"))
                .unwrap_or_default();
            println!(
                "  {} {} {}{}",
                format!("[{}]", candidate.collection).dimmed(),
                candidate.label,
                reason.dimmed(),
                kept.dimmed()
            );
        }
    }

    for ambiguity in &report.ambiguities {
        println!(
            "  {} {}: kept {} over {}",
            "ambiguous".yellow(),
            ambiguity.key,
            ambiguity.kept,
            ambiguity.candidates.join(", ")
        );
    }
    for anomaly in &report.anomalies {
        println!("  {} {anomaly}", "anomaly".red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_report_is_valid_json() {
        let dir = TempDir::new().unwrap();
        let mut report = SyncReport::started();
        report.created = 3;
        report.record_error("foo", "boom");
        let report = report.finish();

        let path = write_report(&report, dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("sync-"));
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["created"], 3);
        assert_eq!(parsed["errors"][0]["identifier"], "foo");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_dry_run_report_name() {
        let dir = TempDir::new().unwrap();
        let mut report = SyncReport::started();
        report.dry_run = true;
        let path = write_report(&report, &dir.path().join("nested")).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("plan-"));
    }
}
