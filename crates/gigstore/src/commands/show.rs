use crate::commands::{CmdMessage, CmdResult};
use crate::error::{Result, StoreError};
use crate::model::{Entity, EntityId, Project};
use crate::store::{EntityStore, ResolveSource, StorageBackend};

/// The raw document, so fields outside the typed model are shown too.
pub fn run<T: Entity, B: StorageBackend>(
    store: &EntityStore<T, B>,
    id: &EntityId,
) -> Result<CmdResult> {
    let (resolved, doc) = store
        .read_value(id)?
        .ok_or_else(|| StoreError::not_found(T::KIND.singular(), id))?;

    let mut result = CmdResult::default().with_listed(vec![doc]);
    if resolved.source == ResolveSource::LegacyFallback {
        result.add_message(CmdMessage::warning(format!(
            "{} {} is only in legacy storage; run `migrate`",
            T::KIND,
            id
        )));
    }
    result.resolved = Some(resolved);
    Ok(result)
}

pub fn run_project<B: StorageBackend>(
    store: &EntityStore<Project, B>,
    id: &EntityId,
) -> Result<CmdResult> {
    let mut result = run(store, id)?;
    result.tasks = store.read_tasks(id);
    Ok(result)
}
