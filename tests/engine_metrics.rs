mod support;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use persisted_state::cache::SlotState;
use persisted_state::cache::metrics::{
    EXTERNAL_CHANGE_TOTAL, LOAD_FAILED_TOTAL, LOAD_TOTAL, STALE_LOAD_DISCARDED_TOTAL,
    SUBSCRIBERS, WRITE_TOTAL,
};
use persisted_state::notify::ChangeHub;
use persisted_state::storage::{MemoryStorage, StorageError};
use persisted_state::{PersistenceEngine, SlotRead};

use support::{GatedStorage, recorder, some};

#[tokio::test]
async fn engine_paths_emit_expected_metric_keys() {
    let recorder_handle = DebuggingRecorder::new();
    let snapshotter = recorder_handle.snapshotter();
    recorder_handle
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Load, supersede, discard.
    let storage = GatedStorage::new();
    let engine = PersistenceEngine::builder(storage.clone()).manual().build();
    let (_seen, callback) = recorder();
    let _subscription = engine.subscribe("k", callback);
    let SlotRead::Pending(load) = engine.resolve("k").expect("resolve") else {
        panic!("expected pending load");
    };
    let _ = engine.write("k", some("mine"));
    storage.release("k", Some("stale"));
    let _ = load.wait().await;
    assert_eq!(engine.slot_state("k"), SlotState::Resolved(some("mine")));

    // Failed load.
    let SlotRead::Pending(failing) = engine.resolve("broken").expect("resolve") else {
        panic!("expected pending load");
    };
    storage.fail("broken", StorageError::unavailable("gone"));
    assert!(failing.wait().await.is_err());

    // Cross-context change.
    let hub = ChangeHub::new();
    let device = Arc::new(MemoryStorage::new());
    let (_storage_a, endpoint_a) = hub.attach(device.clone());
    let (storage_b, _endpoint_b) = hub.attach(device);
    let observer = PersistenceEngine::builder(Arc::new(MemoryStorage::new()))
        .notifier(Arc::new(endpoint_a))
        .manual()
        .build();
    let (_seen, callback) = recorder();
    let _observed = observer.subscribe("theme", callback);
    let _ = persisted_state::StorageBackend::set_item(&storage_b, "theme", "dark");

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        LOAD_TOTAL,
        STALE_LOAD_DISCARDED_TOTAL,
        LOAD_FAILED_TOTAL,
        WRITE_TOTAL,
        EXTERNAL_CHANGE_TOTAL,
        SUBSCRIBERS,
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let counters: HashMap<String, u64> = snapshot
        .into_iter()
        .filter_map(|(composite_key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((composite_key.key().name().to_string(), count)),
            _ => None,
        })
        .collect();
    assert_eq!(counters.get(STALE_LOAD_DISCARDED_TOTAL), Some(&1));
    assert_eq!(counters.get(LOAD_FAILED_TOTAL), Some(&1));
    assert_eq!(counters.get(EXTERNAL_CHANGE_TOTAL), Some(&1));
}
