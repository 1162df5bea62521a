use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::*;
use crate::adapter::{CollectSink, ManualFeed};
use crate::checkpoint::{CheckpointRecord, CheckpointStore, InMemoryCheckpointStore};
use crate::config::{ContainerConfig, HeartbeatConfig, MasterConfig, QueueConfig, WindowConfig};
use crate::error::{DeployError, StoreError};
use crate::graph::{InputAdapterDef, OperatorDef, OperatorGraph, OutputAdapterDef, operator_set};
use crate::master::{ContainerState, Master};
use crate::operator::{EchoOperator, FailingOperator};
use crate::protocol::{
    AckOutcome, ControlKind, ControlRequest, DeployCommand, HeartbeatResponse, RequestAck,
};
use crate::queue::StreamBus;
use crate::registry::ComponentRegistry;
use crate::types::{StreamLocality, WindowId};

/// Store whose writes can be made to fail as if the backend were down.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryCheckpointStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("backend offline".to_string()));
        }
        Ok(())
    }
}

impl CheckpointStore for FlakyStore {
    fn put(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(record)
    }

    fn get(&self, operator: &str, window: WindowId) -> Result<CheckpointRecord, StoreError> {
        self.inner.get(operator, window)
    }

    fn latest(&self, operator: &str) -> Result<WindowId, StoreError> {
        self.inner.latest(operator)
    }

    fn windows(&self, operator: &str) -> Result<Vec<WindowId>, StoreError> {
        self.inner.windows(operator)
    }
}

fn registry(feed: &ManualFeed, sink: &CollectSink) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_builtins();
    let feed = feed.clone();
    registry.register_input("test::manual", move |_| Ok(Box::new(feed.adapter())));
    let sink = sink.clone();
    registry.register_output("test::collect", move |_| Ok(Box::new(sink.adapter())));
    registry
}

fn pipeline(second_kind: &str) -> OperatorGraph {
    OperatorGraph::new()
        .operator(OperatorDef::new("source", EchoOperator::KIND))
        .operator(OperatorDef::new("second", second_kind))
        .stream("s1", "source", "second", StreamLocality::Inline)
        .input(InputAdapterDef::new("feed", "test::manual", "source"))
        .output(OutputAdapterDef::new("out", "test::collect", "second"))
}

fn command(graph: &OperatorGraph, config: ContainerConfig) -> DeployCommand {
    let order = graph.topo_order().unwrap();
    DeployCommand {
        container_id: "container-1".to_string(),
        epoch: 1,
        set: operator_set(graph, &order).unwrap(),
        starting_window: 0,
        config,
    }
}

fn manual_config() -> ContainerConfig {
    ContainerConfig {
        window: WindowConfig::manual(),
        ..ContainerConfig::default()
    }
}

struct Harness {
    feed: ManualFeed,
    sink: CollectSink,
    runtime: ContainerRuntime,
}

fn harness(second_kind: &str, config: ContainerConfig, store: Arc<dyn CheckpointStore>) -> Harness {
    let feed = ManualFeed::new();
    let sink = CollectSink::new();
    let runtime = ContainerRuntime::deploy(
        &command(&pipeline(second_kind), config),
        &registry(&feed, &sink),
        store,
        &StreamBus::new(),
    )
    .unwrap();
    Harness {
        feed,
        sink,
        runtime,
    }
}

fn run_window(runtime: &mut ContainerRuntime) -> WindowId {
    runtime.request_step();
    for _ in 0..1000 {
        if let TickOutcome::Closed(window) = runtime.tick(Instant::now()) {
            return window;
        }
    }
    panic!("window did not close");
}

fn request(id: u64, operator: Option<&str>, kind: ControlKind) -> HeartbeatResponse {
    HeartbeatResponse {
        requests: vec![ControlRequest {
            id,
            operator: operator.map(str::to_string),
            kind,
        }],
        fenced: false,
    }
}

#[test]
fn test_stepped_window_moves_tuples_and_closes() {
    let mut h = harness(
        EchoOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    h.feed.push(1, vec![1]);
    h.feed.push(1, vec![2]);
    h.feed.push(2, vec![3]);

    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Idle);
    assert_eq!(run_window(&mut h.runtime), 1);
    assert_eq!(h.sink.collected(), vec![(1, vec![1]), (1, vec![2])]);
    assert_eq!(h.runtime.last_closed_window(), 1);
    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Idle);

    assert_eq!(run_window(&mut h.runtime), 2);
    assert_eq!(h.sink.collected().last(), Some(&(2, vec![3])));
    assert!(h.runtime.statuses().iter().all(|s| s.current_window == 2));
    assert_eq!(h.feed.resumed_from(), vec![0]);
}

#[test]
fn test_checkpoint_is_written_at_window_close_and_acked() {
    let store = Arc::new(InMemoryCheckpointStore::default());
    let mut h = harness(EchoOperator::KIND, manual_config(), store.clone());

    h.runtime
        .apply_response(request(1, None, ControlKind::Checkpoint));
    assert_eq!(h.runtime.pending_checkpoints(), 1);
    assert!(store.windows("source").unwrap().is_empty());

    run_window(&mut h.runtime);
    assert_eq!(h.runtime.pending_checkpoints(), 0);
    assert_eq!(store.latest("source").unwrap(), 1);
    assert_eq!(store.latest("second").unwrap(), 1);
    assert_eq!(store.get("source", 1).unwrap().epoch, 1);

    let heartbeat = h.runtime.heartbeat();
    assert_eq!(heartbeat.sequence, 1);
    assert_eq!(
        heartbeat.acks,
        vec![RequestAck {
            id: 1,
            operator: None,
            outcome: AckOutcome::Done { window: Some(1) },
        }]
    );
    let next = h.runtime.heartbeat();
    assert_eq!(next.sequence, 2);
    assert!(next.acks.is_empty());
    assert!(
        next.operators
            .iter()
            .all(|s| s.last_checkpoint_window == Some(1))
    );
}

#[test]
fn test_unavailable_store_retries_at_next_window() {
    let store = Arc::new(FlakyStore::default());
    let mut h = harness(EchoOperator::KIND, manual_config(), store.clone());
    store.down.store(true, Ordering::SeqCst);

    h.runtime
        .apply_response(request(4, Some("source"), ControlKind::Checkpoint));
    run_window(&mut h.runtime);
    assert_eq!(h.runtime.pending_checkpoints(), 1);
    assert!(h.runtime.heartbeat().acks.is_empty());

    store.down.store(false, Ordering::SeqCst);
    run_window(&mut h.runtime);
    assert_eq!(h.runtime.pending_checkpoints(), 0);
    assert_eq!(store.windows("source").unwrap(), vec![2]);
    assert_eq!(
        h.runtime.heartbeat().acks[0].outcome,
        AckOutcome::Done { window: Some(2) }
    );
}

#[test]
fn test_throttled_output_stalls_window_without_dropping() {
    let config = ContainerConfig {
        window: WindowConfig {
            window_size: None,
            stall_deadline: Duration::ZERO,
        },
        queue: QueueConfig { capacity: 2 },
        ..ContainerConfig::default()
    };
    let mut h = harness(
        EchoOperator::KIND,
        config,
        Arc::new(InMemoryCheckpointStore::default()),
    );
    for i in 0..10u8 {
        h.feed.push(1, vec![i]);
    }
    h.sink.throttle(true);
    h.runtime.request_step();

    let mut stalled = false;
    for _ in 0..50 {
        match h.runtime.tick(Instant::now()) {
            TickOutcome::Stalled(1) => stalled = true,
            TickOutcome::Closed(_) => panic!("window closed while output was throttled"),
            _ => {}
        }
    }
    assert!(stalled);
    assert!(h.sink.collected().is_empty());
    assert!(h.runtime.statuses().iter().any(|s| s.queue_depth > 0));

    h.sink.throttle(false);
    let mut closed = None;
    for _ in 0..100 {
        if let TickOutcome::Closed(window) = h.runtime.tick(Instant::now()) {
            closed = Some(window);
            break;
        }
    }
    assert_eq!(closed, Some(1));
    let collected: Vec<_> = h.sink.collected().into_iter().map(|(_, t)| t).collect();
    assert_eq!(collected, (0..10u8).map(|i| vec![i]).collect::<Vec<_>>());
}

#[test]
fn test_operator_shutdown_keeps_the_rest_running() {
    let mut h = harness(
        EchoOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    h.runtime
        .apply_response(request(7, Some("second"), ControlKind::Shutdown));
    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Idle);

    let heartbeat = h.runtime.heartbeat();
    assert_eq!(heartbeat.acks[0].id, 7);
    assert_eq!(heartbeat.acks[0].outcome, AckOutcome::Done { window: Some(0) });
    assert!(!heartbeat.terminated);
    let second = heartbeat
        .operators
        .iter()
        .find(|s| s.operator == "second")
        .unwrap();
    assert!(second.shut_down);

    h.feed.push(1, vec![1]);
    assert_eq!(run_window(&mut h.runtime), 1);
    assert!(h.sink.collected().is_empty());

    h.runtime
        .apply_response(request(8, Some("source"), ControlKind::Shutdown));
    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Terminated);
    assert!(h.runtime.heartbeat().terminated);
}

#[test]
fn test_container_shutdown_reports_terminated() {
    let mut h = harness(
        EchoOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    run_window(&mut h.runtime);
    h.runtime
        .apply_response(request(2, None, ControlKind::Shutdown));
    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Terminated);

    let heartbeat = h.runtime.heartbeat();
    assert!(heartbeat.terminated);
    assert_eq!(heartbeat.acks[0].outcome, AckOutcome::Done { window: Some(1) });
    assert!(heartbeat.operators.iter().all(|s| s.shut_down));
}

#[test]
fn test_set_property_applies_at_boundary() {
    let mut h = harness(
        FailingOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    let set = |id, operator: Option<&str>, value: &str| {
        request(
            id,
            operator,
            ControlKind::SetProperty {
                key: "fail_on".to_string(),
                value: value.to_string(),
            },
        )
    };
    h.runtime.apply_response(set(1, Some("second"), "x"));
    h.runtime.apply_response(set(2, None, "1"));
    h.runtime.apply_response(set(3, Some("second"), "1"));
    h.runtime.tick(Instant::now());

    let acks = h.runtime.heartbeat().acks;
    assert!(matches!(acks[0].outcome, AckOutcome::Failed(_)));
    assert!(matches!(acks[1].outcome, AckOutcome::Failed(_)));
    assert_eq!(acks[2].outcome, AckOutcome::Done { window: None });

    h.feed.push(1, vec![1]);
    assert_eq!(run_window(&mut h.runtime), 1);
    let statuses = h.runtime.statuses();
    let second = statuses.iter().find(|s| s.operator == "second").unwrap();
    assert!(second.fault.as_deref().unwrap().contains("injected fault"));
    assert!(h.sink.collected().is_empty());
}

#[test]
fn test_checkpoint_waits_for_close_while_property_applies_at_boundary() {
    let store = Arc::new(InMemoryCheckpointStore::default());
    let mut h = harness(FailingOperator::KIND, manual_config(), store.clone());
    h.runtime.apply_response(HeartbeatResponse {
        requests: vec![
            ControlRequest {
                id: 1,
                operator: None,
                kind: ControlKind::Checkpoint,
            },
            ControlRequest {
                id: 2,
                operator: Some("second".to_string()),
                kind: ControlKind::SetProperty {
                    key: "fail_on".to_string(),
                    value: "9".to_string(),
                },
            },
        ],
        fenced: false,
    });
    assert_eq!(h.runtime.pending_checkpoints(), 1);
    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Idle);

    let acks = h.runtime.heartbeat().acks;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].id, 2);
    assert_eq!(acks[0].outcome, AckOutcome::Done { window: None });
    assert_eq!(h.runtime.pending_checkpoints(), 1);

    assert_eq!(run_window(&mut h.runtime), 1);
    let acks = h.runtime.heartbeat().acks;
    assert_eq!(acks[0].id, 1);
    assert_eq!(acks[0].outcome, AckOutcome::Done { window: Some(1) });
    assert_eq!(store.latest("second").unwrap(), 1);
}

#[test]
fn test_fenced_response_terminates_without_final_heartbeat() {
    let mut h = harness(
        EchoOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    h.runtime.apply_response(HeartbeatResponse::fenced());
    assert!(h.runtime.is_fenced());
    assert_eq!(h.runtime.tick(Instant::now()), TickOutcome::Terminated);
    assert!(!h.runtime.heartbeat().terminated);
}

#[test]
fn test_duplicate_request_ids_are_ignored() {
    let mut h = harness(
        EchoOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    h.runtime
        .apply_response(request(5, None, ControlKind::Checkpoint));
    h.runtime
        .apply_response(request(5, None, ControlKind::Checkpoint));
    assert_eq!(h.runtime.pending_checkpoints(), 1);
}

#[test]
fn test_requeued_acks_go_out_with_the_next_heartbeat() {
    let mut h = harness(
        EchoOperator::KIND,
        manual_config(),
        Arc::new(InMemoryCheckpointStore::default()),
    );
    h.runtime
        .apply_response(request(1, None, ControlKind::Checkpoint));
    run_window(&mut h.runtime);

    let lost = h.runtime.heartbeat();
    assert_eq!(lost.acks.len(), 1);
    h.runtime.requeue_acks(lost.acks.clone());
    let retry = h.runtime.heartbeat();
    assert_eq!(retry.acks, lost.acks);
    assert!(retry.sequence > lost.sequence);
}

#[test]
fn test_inline_stream_must_stay_in_one_container() {
    let feed = ManualFeed::new();
    let sink = CollectSink::new();
    let graph = pipeline(EchoOperator::KIND);
    let command = DeployCommand {
        container_id: "container-1".to_string(),
        epoch: 1,
        set: operator_set(&graph, &["source".to_string()]).unwrap(),
        starting_window: 0,
        config: manual_config(),
    };
    let err = ContainerRuntime::deploy(
        &command,
        &registry(&feed, &sink),
        Arc::new(InMemoryCheckpointStore::default()),
        &StreamBus::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DeployError::Wiring { .. }));
}

fn quiet_master_config() -> MasterConfig {
    MasterConfig::default()
        .with_window(WindowConfig::manual())
        .with_heartbeat(HeartbeatConfig::default().with_interval(Duration::from_secs(3600)))
}

#[tokio::test]
async fn test_handle_steps_windows_and_reports_to_master() {
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::default());
    let master = Arc::new(Master::new(quiet_master_config(), store.clone()));
    master.launch(pipeline(EchoOperator::KIND)).unwrap();
    let command = master.take_container_requests().remove(0);
    master
        .container_provisioned(&command.container_id, Instant::now())
        .unwrap();

    let feed = ManualFeed::new();
    let sink = CollectSink::new();
    feed.push(1, vec![9]);
    let handle = ContainerHandle::spawn(
        &command,
        &registry(&feed, &sink),
        store,
        &StreamBus::new(),
        Arc::new(MasterLink::local(master.clone())),
    )
    .unwrap();

    assert_eq!(handle.step_window().await.unwrap(), 1);
    assert!(handle.heartbeat_now().await.unwrap());
    assert_eq!(
        master.container_state(&command.container_id),
        Some(ContainerState::Running)
    );
    assert_eq!(master.operator_status("source").unwrap().current_window, 1);
    assert_eq!(sink.collected(), vec![(1, vec![9])]);

    handle.kill();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_running());
    assert!(handle.step_window().await.is_err());
}

#[tokio::test]
async fn test_watchdog_terminates_container_cut_off_from_master() {
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::default());
    let config = MasterConfig::default()
        .with_window(WindowConfig::manual())
        .with_heartbeat(HeartbeatConfig::default().with_interval(Duration::from_millis(10)));
    let master = Arc::new(Master::new(config, store.clone()));
    master.launch(pipeline(EchoOperator::KIND)).unwrap();
    let command = master.take_container_requests().remove(0);

    let feed = ManualFeed::new();
    let sink = CollectSink::new();
    let link = Arc::new(MasterLink::local(master));
    link.sever(true);
    let handle = ContainerHandle::spawn(
        &command,
        &registry(&feed, &sink),
        store,
        &StreamBus::new(),
        link,
    )
    .unwrap();

    for _ in 0..100 {
        if !handle.is_heartbeating() && !handle.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!handle.is_heartbeating());
    assert!(!handle.is_running());
    assert!(handle.statuses().iter().all(|s| s.shut_down));
}
