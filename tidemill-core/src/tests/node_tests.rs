use super::*;
use crate::checkpoint::{CheckpointRecord, InMemoryCheckpointStore};
use crate::codec;
use crate::operator::EchoOperator;
use crate::queue::tuple_queue;

fn deploy(def: &OperatorDef, starting: WindowId, store: &InMemoryCheckpointStore) -> OperatorRuntime {
    OperatorRuntime::deploy(def, starting, &ComponentRegistry::with_builtins(), store).unwrap()
}

fn echo_def() -> OperatorDef {
    OperatorDef::new("echo", EchoOperator::KIND)
}

#[test]
fn test_window_events_must_alternate() {
    let store = InMemoryCheckpointStore::default();
    let mut node = deploy(&echo_def(), 0, &store);
    assert_eq!(node.state(), RuntimeState::Deployed);

    assert!(matches!(
        node.end_window(1),
        Err(NodeError::Window(WindowError::OutOfOrder { event: "end_window", .. }))
    ));
    node.begin_window(1).unwrap();
    assert!(node.begin_window(2).is_err());
    assert!(node.end_window(2).is_err());
    node.end_window(1).unwrap();
    assert!(matches!(
        node.begin_window(1),
        Err(NodeError::Window(WindowError::OutOfOrder { event: "begin_window", .. }))
    ));
    node.begin_window(2).unwrap();
    assert_eq!(node.current_window(), 2);
}

#[test]
fn test_checkpoint_is_idempotent_within_a_window() {
    let store = InMemoryCheckpointStore::default();
    let mut node = deploy(&echo_def(), 0, &store);
    let (tx, rx) = tuple_queue(8);
    node.attach_input("in", rx, true);
    tx.try_push(vec![1]).unwrap();
    tx.try_push(vec![2]).unwrap();

    node.begin_window(1).unwrap();
    assert_eq!(node.pump(16), PumpOutcome::Drained);
    assert!(node.checkpoint().is_err());
    node.end_window(1).unwrap();

    let (w1, first) = node.checkpoint().unwrap();
    let (w2, second) = node.checkpoint().unwrap();
    assert_eq!((w1, w2), (1, 1));
    assert_eq!(first, second);
    assert_eq!(node.last_checkpoint_window(), Some(1));
    assert_eq!(node.status().last_checkpoint_window, Some(1));
}

#[test]
fn test_full_downstream_halts_intake_without_dropping() {
    let store = InMemoryCheckpointStore::default();
    let mut node = deploy(&echo_def(), 0, &store);
    let (in_tx, in_rx) = tuple_queue(16);
    let (out_tx, out_rx) = tuple_queue(2);
    node.attach_input("in", in_rx, true);
    node.attach_output("out", out_tx);
    for i in 1..=5u8 {
        in_tx.try_push(vec![i]).unwrap();
    }

    node.begin_window(1).unwrap();
    assert_eq!(node.pump(100), PumpOutcome::Blocked);
    assert_eq!(in_tx.len(), 2);
    assert!(!node.is_drained());

    let mut received = Vec::new();
    loop {
        while let Some(t) = out_rx.try_pop() {
            received.push(t);
        }
        if node.pump(100) == PumpOutcome::Drained {
            break;
        }
    }
    while let Some(t) = out_rx.try_pop() {
        received.push(t);
    }
    assert_eq!(received, (1..=5u8).map(|i| vec![i]).collect::<Vec<_>>());
    assert!(node.is_drained());
}

#[test]
fn test_pump_budget_limits_progress() {
    let store = InMemoryCheckpointStore::default();
    let mut node = deploy(&echo_def(), 0, &store);
    let (tx, rx) = tuple_queue(8);
    node.attach_input("in", rx, true);
    for i in 0..3u8 {
        tx.try_push(vec![i]).unwrap();
    }
    node.begin_window(1).unwrap();
    assert_eq!(node.pump(2), PumpOutcome::Progress(2));
    assert_eq!(node.pump(2), PumpOutcome::Drained);
}

#[test]
fn test_operator_error_becomes_fault() {
    let store = InMemoryCheckpointStore::default();
    let def = OperatorDef::new("fail", "builtin::fail").with_property("fail_on", "2");
    let mut node = deploy(&def, 0, &store);
    let (tx, rx) = tuple_queue(8);
    node.attach_input("in", rx, true);
    for i in 0..3u8 {
        tx.try_push(vec![i]).unwrap();
    }

    node.begin_window(1).unwrap();
    assert_eq!(node.pump(16), PumpOutcome::Stopped);
    assert_eq!(node.state(), RuntimeState::Faulted);
    let fault = node.fault().unwrap();
    assert_eq!(fault.window, 1);
    assert!(fault.message.contains("injected fault"));
    assert!(node.status().fault.is_some());
    assert_eq!(node.pump(16), PumpOutcome::Stopped);
    assert!(node.end_window(1).is_err());
}

#[test]
fn test_restores_latest_checkpoint_at_or_before_start() {
    let store = InMemoryCheckpointStore::default();
    let blob = codec::encode(&7u64).unwrap();
    store.put(CheckpointRecord::new("echo", 3, 1, blob.clone())).unwrap();

    let mut node = deploy(&echo_def(), 5, &store);
    assert_eq!(node.starting_window(), 5);
    assert_eq!(node.current_window(), 5);
    assert_eq!(node.last_checkpoint_window(), Some(3));

    let (window, state) = node.checkpoint().unwrap();
    assert_eq!(window, 5);
    assert_eq!(state, blob);
}

#[test]
fn test_undecodable_checkpoint_is_a_restore_error() {
    let store = InMemoryCheckpointStore::default();
    store
        .put(CheckpointRecord::new("echo", 1, 1, vec![0xde, 0xad]))
        .unwrap();
    let err = OperatorRuntime::deploy(
        &echo_def(),
        1,
        &ComponentRegistry::with_builtins(),
        &store,
    )
    .err()
    .unwrap();
    assert!(err.is_unrecoverable());
    assert!(matches!(
        err,
        DeployError::Restore(RestoreError::Undecodable { window: 1, .. })
    ));
}

#[test]
fn test_only_newer_checkpoints_is_a_restore_error() {
    let store = InMemoryCheckpointStore::default();
    store
        .put(CheckpointRecord::new("echo", 4, 1, codec::encode(&1u64).unwrap()))
        .unwrap();
    let err = OperatorRuntime::deploy(
        &echo_def(),
        2,
        &ComponentRegistry::with_builtins(),
        &store,
    )
    .err()
    .unwrap();
    assert!(!err.is_unrecoverable());
    assert!(matches!(
        err,
        DeployError::Restore(RestoreError::Unavailable {
            source: StoreError::MissingWindow { .. },
            ..
        })
    ));
}

#[test]
fn test_deploy_at_initial_window_ignores_stored_checkpoints() {
    let store = InMemoryCheckpointStore::default();
    for window in [2, 3] {
        store
            .put(CheckpointRecord::new("echo", window, 1, codec::encode(&9u64).unwrap()))
            .unwrap();
    }
    let mut node = deploy(&echo_def(), INITIAL_WINDOW, &store);
    assert_eq!(node.last_checkpoint_window(), None);
    assert_eq!(node.current_window(), INITIAL_WINDOW);

    node.begin_window(1).unwrap();
    node.end_window(1).unwrap();
    let (window, state) = node.checkpoint().unwrap();
    assert_eq!(window, 1);
    assert_ne!(state, codec::encode(&9u64).unwrap());
}

#[test]
fn test_end_window_output_is_queued() {
    let store = InMemoryCheckpointStore::default();
    let mut node = deploy(&OperatorDef::new("count", "builtin::counter"), 0, &store);
    let (in_tx, in_rx) = tuple_queue(8);
    let (out_tx, out_rx) = tuple_queue(8);
    node.attach_input("in", in_rx, true);
    node.attach_output("out", out_tx);
    in_tx.try_push(vec![1]).unwrap();

    node.begin_window(1).unwrap();
    node.pump(16);
    node.end_window(1).unwrap();
    assert_eq!(node.pump(16), PumpOutcome::Drained);
    let summary: (u64, u64, u64) = codec::decode(&out_rx.try_pop().unwrap()).unwrap();
    assert_eq!(summary, (1, 1, 1));
}

#[test]
fn test_rejected_property_keeps_runtime_active() {
    let store = InMemoryCheckpointStore::default();
    let mut node = deploy(&echo_def(), 0, &store);
    assert!(node.apply_property("color", "red").is_err());
    assert!(node.is_active());

    node.teardown();
    assert_eq!(node.state(), RuntimeState::TornDown);
    assert!(node.status().shut_down);
    assert_eq!(node.pump(1), PumpOutcome::Stopped);
}
