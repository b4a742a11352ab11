//! Property tests for conflict handling against a local store.

use isosync_engine::{ConflictResolver, LocalStore, MemoryStore, ResolutionOutcome};
use isosync_protocol::{detect_conflict, ConflictStrategy};
use isosync_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #[test]
    fn resolution_never_lowers_sync_version(
        (local, remote) in divergent_pair_strategy(),
        strategy in conflict_strategy_strategy(),
    ) {
        let now = local.modified_at.max(remote.modified_at) + 1;
        let Some(conflict) = detect_conflict(&local, &remote, now) else {
            return Ok(());
        };

        let store = MemoryStore::new();
        store.create_node(local.clone()).unwrap();
        let resolver = ConflictResolver::new(strategy);
        let (_, outcome) = resolver.handle(&store, &conflict, now).unwrap();

        match outcome {
            ResolutionOutcome::Written(record) => {
                prop_assert!(record.sync_version >= local.sync_version);
                prop_assert!(record.sync_version >= remote.sync_version);
                prop_assert_eq!(record.crdt.content_hash, record.compute_content_hash());
                prop_assert!(store.pending_conflicts().unwrap().is_empty());
            }
            ResolutionOutcome::Queued => {
                prop_assert_eq!(strategy, ConflictStrategy::Manual);
                let stored = store.get_node(local.id).unwrap().unwrap();
                prop_assert_eq!(stored.crdt.content_hash, local.crdt.content_hash);
                prop_assert_eq!(store.get_sync_state().unwrap().conflict_count, 1);
            }
            ResolutionOutcome::Deleted => prop_assert!(false, "no deletion in an edit conflict"),
        }
    }

    #[test]
    fn resolved_record_does_not_conflict_with_same_remote_again(
        (local, remote) in divergent_pair_strategy(),
        code in 1u8..=4,
    ) {
        let strategy = ConflictStrategy::from_code(code).unwrap();
        let now = local.modified_at.max(remote.modified_at) + 1;
        let Some(conflict) = detect_conflict(&local, &remote, now) else {
            return Ok(());
        };

        let store = MemoryStore::new();
        store.create_node(local.clone()).unwrap();
        let resolver = ConflictResolver::new(strategy);
        let (_, outcome) = resolver.handle(&store, &conflict, now).unwrap();

        if let ResolutionOutcome::Written(record) = outcome {
            prop_assert_eq!(record.base_version, remote.sync_version);
            prop_assert!(detect_conflict(&record, &remote, now + 1).is_none());
        }
    }

    #[test]
    fn manual_choice_clears_the_queue(
        (local, remote) in divergent_pair_strategy(),
        take_remote in any::<bool>(),
    ) {
        let now = local.modified_at.max(remote.modified_at) + 1;
        let Some(conflict) = detect_conflict(&local, &remote, now) else {
            return Ok(());
        };

        let store = MemoryStore::new();
        store.create_node(local.clone()).unwrap();
        let resolver = ConflictResolver::new(ConflictStrategy::Manual);
        resolver.handle(&store, &conflict, now).unwrap();

        let chosen = if take_remote { remote.clone() } else { local.clone() };
        let written = resolver
            .resolve_manual(&store, conflict.id, chosen.clone(), now + 1)
            .unwrap()
            .unwrap();

        prop_assert!(written.sync_version > local.sync_version.max(remote.sync_version));
        prop_assert!(written.has_local_changes());
        prop_assert!(written.same_content(&chosen));
        prop_assert!(store.pending_conflicts().unwrap().is_empty());
        prop_assert_eq!(store.get_sync_state().unwrap().conflict_count, 0);
    }
}
