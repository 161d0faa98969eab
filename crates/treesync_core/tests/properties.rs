//! Property tests over the normalizer and store round-trips.

use proptest::prelude::*;
use serde_json::Value;
use treesync_core::{
    compare_attributes, normalize, normalize_snapshot, FetchOptions, SyncError, SyncOptions,
};
use treesync_store::Snapshot;
use treesync_testkit::prelude::*;

proptest! {
    #[test]
    fn primitive_snapshots_are_rejected(key in key_strategy(), value in primitive_strategy()) {
        let snapshot = Snapshot::new(Some(key.clone()), value);
        prop_assert_eq!(
            normalize_snapshot(&snapshot, "id"),
            Err(SyncError::InvalidIdentifier { key })
        );
    }

    #[test]
    fn null_snapshots_become_bare_identifiers(key in key_strategy()) {
        let record = normalize(Value::Null, &key, "id").unwrap();
        prop_assert_eq!(record.len(), 1);
        prop_assert_eq!(&record["id"], &Value::String(key));
    }

    #[test]
    fn saved_records_round_trip(attributes in attributes_strategy()) {
        prop_assume!(!attributes.is_empty());
        let env = TestStore::memory();
        let record = env.model_under("things", attributes.clone());
        record.save(SyncOptions::new()).unwrap();
        let id = record.id().unwrap();

        let stored = env.value(&format!("things/{id}"));
        let normalized = normalize(stored, &id, "id").unwrap();
        let mut expected = attributes;
        expected.insert("id".to_string(), Value::String(id));
        prop_assert_eq!(normalized, expected);
    }

    #[test]
    fn snapshot_fetch_mirrors_the_node(children in children_strategy()) {
        let env = TestStore::memory();
        env.seed("items", children.clone());
        let items = env.snapshot_collection("items");
        items.fetch(FetchOptions::new()).unwrap();

        let expected = children.as_object().map(|m| m.len()).unwrap_or_default();
        prop_assert_eq!(items.len(), expected);
        for model in items.models() {
            let id = model.id().unwrap();
            let remote = normalize(children[&id].clone(), &id, "id").unwrap();
            prop_assert!(compare_attributes(&remote, &model.attributes()).is_empty());
        }
    }
}
