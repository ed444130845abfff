use crate::commands::{CmdMessage, CmdResult};
use crate::error::Result;
use crate::model::{Entity, EntityId};
use crate::store::{EntityStore, StorageBackend};

/// Newest first. With `parent`, only documents whose foreign key matches.
pub fn run<T: Entity, B: StorageBackend>(
    store: &EntityStore<T, B>,
    parent: Option<&EntityId>,
) -> Result<CmdResult> {
    let entities = match parent {
        Some(parent) => store.read_by_parent(parent),
        None => store.read_all(),
    };
    let listed = entities
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = CmdResult::default().with_listed(listed);
    if result.listed.is_empty() {
        result.add_message(CmdMessage::info(format!(
            "No {} found.",
            T::KIND.dir_name()
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Application;
    use crate::store::mem_backend::MemBackend;
    use crate::store::StoreOptions;
    use chrono::{Duration, Utc};

    fn store() -> EntityStore<Application, MemBackend> {
        EntityStore::new(MemBackend::new(), StoreOptions::default())
    }

    #[test]
    fn lists_newest_first() {
        let store = store();
        let mut old = Application::new("a1", "g1", "7");
        old.created_at = Utc::now() - Duration::days(40);
        store.save(&old).unwrap();
        store.save(&Application::new("a2", "g1", "8")).unwrap();

        let result = run(&store, None).unwrap();
        let ids: Vec<&str> = result
            .listed
            .iter()
            .map(|v| v["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a2", "a1"]);
    }

    #[test]
    fn filters_by_parent() {
        let store = store();
        store.save(&Application::new("a1", "g1", "7")).unwrap();
        store.save(&Application::new("a2", "g2", "7")).unwrap();

        let result = run(&store, Some(&"g2".into())).unwrap();
        assert_eq!(result.listed.len(), 1);
        assert_eq!(result.listed[0]["gigId"], "g2");
    }

    #[test]
    fn empty_kind_says_so() {
        let result = run(&store(), None).unwrap();
        assert!(result.messages[0].content.contains("No applications"));
    }
}
