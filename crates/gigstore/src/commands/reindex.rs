use crate::commands::{CmdMessage, CmdResult};
use crate::error::Result;
use crate::model::Entity;
use crate::store::{EntityStore, ReindexReport, StorageBackend};

pub fn run<T: Entity, B: StorageBackend>(
    store: &EntityStore<T, B>,
    result: &mut CmdResult,
) -> Result<ReindexReport> {
    let report = store.reindex()?;
    let kind = T::KIND.dir_name();

    if report.adopted == 0 && report.removed == 0 {
        result.add_message(CmdMessage::success(format!(
            "{}: index consistent ({} entries).",
            kind, report.indexed
        )));
    } else {
        result.add_message(CmdMessage::warning(format!(
            "{}: index repaired ({} entries).",
            kind, report.indexed
        )));
        if report.removed > 0 {
            result.add_message(CmdMessage::info(format!(
                "  - Removed {} entry(ies) whose document is gone.",
                report.removed
            )));
        }
        if report.adopted > 0 {
            result.add_message(CmdMessage::success(format!(
                "  - Indexed {} document(s) found on disk.",
                report.adopted
            )));
        }
    }
    Ok(report)
}
