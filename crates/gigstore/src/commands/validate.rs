use crate::commands::{CmdMessage, CmdResult};
use crate::error::Result;
use crate::store::StorageBackend;
use crate::validator::{Severity, ValidationReport, Validator};

pub fn run<B: StorageBackend>(validator: &Validator<'_, B>) -> Result<(CmdResult, ValidationReport)> {
    let report = validator.run();
    let mut result = CmdResult::default();

    if report.is_clean() {
        result.add_message(CmdMessage::success(format!(
            "No inconsistencies found ({} gigs, {} projects, {} applications, {} requests).",
            report.checked_gigs,
            report.checked_projects,
            report.checked_applications,
            report.checked_requests
        )));
    } else {
        result.add_message(CmdMessage::warning(format!(
            "{} inconsistency(ies) found. Nothing was changed.",
            report.issues.len()
        )));
        for issue in &report.issues {
            let line = format!(
                "[{}] {}: {}. Suggested: {}.",
                issue.severity, issue.kind, issue.message, issue.suggested_action
            );
            result.add_message(match issue.severity {
                Severity::Critical | Severity::High => CmdMessage::error(line),
                Severity::Medium | Severity::Low => CmdMessage::warning(line),
            });
        }
    }

    let result = result.with_report(&report)?;
    Ok((result, report))
}
