use crate::commands::{CmdMessage, CmdResult};
use crate::migrate::{MigrationReport, MigrationSummary};

/// Summarize a migration run. The caller runs the migration itself, one kind
/// at a time (see [`crate::api::Marketplace::migrate_all`]).
pub fn run(summary: &MigrationSummary) -> crate::error::Result<CmdResult> {
    let mut result = CmdResult::default();
    let prefix = if summary.dry_run { "[dry run] " } else { "" };

    for (kind, report) in &summary.kinds {
        if report.has_changes() || !report.errors.is_empty() {
            result.add_message(CmdMessage::info(format!(
                "{}{}: {}",
                prefix,
                kind.dir_name(),
                counts(report)
            )));
        }
        for warning in &report.warnings {
            result.add_message(CmdMessage::warning(warning.clone()));
        }
        for error in &report.errors {
            result.add_message(CmdMessage::error(error.clone()));
        }
    }

    let total = &summary.total;
    if !total.has_changes() && total.errors.is_empty() {
        result.add_message(CmdMessage::success(format!(
            "{}Nothing to migrate ({} legacy document(s) already handled).",
            prefix, total.skipped
        )));
    } else if total.errors.is_empty() {
        result.add_message(CmdMessage::success(format!(
            "{}Migration complete: {}",
            prefix,
            counts(total)
        )));
    } else {
        result.add_message(CmdMessage::warning(format!(
            "{}Migration finished with {} error(s): {}",
            prefix,
            total.errors.len(),
            counts(total)
        )));
    }
    result.with_report(summary)
}

fn counts(report: &MigrationReport) -> String {
    format!(
        "{} indexed, {} migrated, {} skipped, {} sub-resource file(s), {} marker(s)",
        report.indexed,
        report.migrated,
        report.skipped,
        report.subresources_migrated,
        report.markers_written
    )
}
