use crate::commands::{CmdMessage, CmdResult};
use crate::error::{Result, StoreError};
use crate::model::{Entity, EntityId};
use crate::store::{EntityStore, StorageBackend};

pub fn run<T: Entity, B: StorageBackend>(
    store: &EntityStore<T, B>,
    id: &EntityId,
) -> Result<CmdResult> {
    let resolved = store
        .resolve(id)
        .ok_or_else(|| StoreError::not_found(T::KIND.singular(), id))?;

    let mut result = CmdResult::default();
    result.add_message(CmdMessage::info(format!(
        "{} {} -> {} (via {})",
        T::KIND,
        id,
        resolved.path,
        resolved.source
    )));
    if let Some(marker) = store.marker_of(id) {
        result.add_message(CmdMessage::info(format!(
            "legacy directory carries {}",
            marker.file_name()
        )));
    }
    if let Some(path) = store.document_path(id) {
        result.paths.push(path);
    }
    result.resolved = Some(resolved);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gig;
    use crate::store::mem_backend::MemBackend;
    use crate::store::{ResolveSource, StoreOptions};

    #[test]
    fn reports_path_and_source() {
        let store: EntityStore<Gig, MemBackend> =
            EntityStore::new(MemBackend::new(), StoreOptions::default());
        let rel = store.save(&Gig::new("g1", "9", "Logo")).unwrap();

        let result = run(&store, &"g1".into()).unwrap();
        let resolved = result.resolved.unwrap();
        assert_eq!(resolved.path, rel);
        assert_eq!(resolved.source, ResolveSource::Index);
        assert!(result.messages[0].content.contains("via index"));
        assert_eq!(result.paths.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store: EntityStore<Gig, MemBackend> =
            EntityStore::new(MemBackend::new(), StoreOptions::default());
        assert!(run(&store, &"nope".into()).unwrap_err().is_not_found());
    }
}
