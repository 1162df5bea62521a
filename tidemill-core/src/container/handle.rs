use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle as ThreadHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::checkpoint::CheckpointStore;
use crate::config::HeartbeatConfig;
use crate::error::DeployError;
use crate::protocol::{DeployCommand, OperatorStatus};
use crate::queue::StreamBus;
use crate::registry::ComponentRegistry;
use crate::types::{ContainerId, Epoch, WindowId};

use super::{ContainerRuntime, MasterLink, TickOutcome};

/// How long the execution thread waits for commands when nothing is due.
const IDLE_WAIT: Duration = Duration::from_millis(5);

enum Command {
    Step(oneshot::Sender<Result<WindowId, String>>),
}

/// A running container: an execution thread driving the runtime, and a tokio
/// task sending heartbeats on their own schedule.
pub struct ContainerHandle {
    container_id: ContainerId,
    epoch: Epoch,
    runtime: Arc<Mutex<ContainerRuntime>>,
    link: Arc<MasterLink>,
    commands: Sender<Command>,
    killed: Arc<AtomicBool>,
    /// Serializes heartbeat cycles between the background task and `heartbeat_now`.
    cycle: Arc<tokio::sync::Mutex<()>>,
    shutdown_tx: watch::Sender<bool>,
    heartbeat_task: JoinHandle<()>,
    thread: Mutex<Option<ThreadHandle<()>>>,
    step_timeout: Duration,
}

impl ContainerHandle {
    /// Deploy `command` and start executing it. Must be called within a tokio runtime.
    pub fn spawn(
        command: &DeployCommand,
        registry: &ComponentRegistry,
        store: Arc<dyn CheckpointStore>,
        bus: &StreamBus,
        link: Arc<MasterLink>,
    ) -> Result<Self, DeployError> {
        let runtime = ContainerRuntime::deploy(command, registry, store, bus)?;
        let runtime = Arc::new(Mutex::new(runtime));
        let killed = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = crossbeam_channel::unbounded();

        let thread = {
            let runtime = Arc::clone(&runtime);
            let killed = Arc::clone(&killed);
            std::thread::Builder::new()
                .name(format!("{}-exec", command.container_id))
                .spawn(move || execute(runtime, command_rx, killed))
                .map_err(|e| DeployError::Construction {
                    id: command.container_id.clone(),
                    reason: format!("spawn execution thread: {e}"),
                })?
        };

        let cycle = Arc::new(tokio::sync::Mutex::new(()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            command.container_id.clone(),
            Arc::clone(&runtime),
            Arc::clone(&link),
            Arc::clone(&cycle),
            command.config.heartbeat.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            container_id: command.container_id.clone(),
            epoch: command.epoch,
            runtime,
            link,
            commands,
            killed,
            cycle,
            shutdown_tx,
            heartbeat_task,
            thread: Mutex::new(Some(thread)),
            step_timeout: command.config.window.stall_deadline * 2,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Open one window outside the periodic cadence and wait until it closes.
    pub async fn step_window(&self) -> Result<WindowId> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Step(reply))
            .map_err(|_| anyhow!("container {} is not running", self.container_id))?;
        match tokio::time::timeout(self.step_timeout, done).await {
            Ok(Ok(Ok(window))) => Ok(window),
            Ok(Ok(Err(reason))) => Err(anyhow!("container {}: {}", self.container_id, reason)),
            Ok(Err(_)) => Err(anyhow!("container {} stopped", self.container_id)),
            Err(_) => Err(anyhow!(
                "container {}: window did not close within {:?}",
                self.container_id,
                self.step_timeout
            )),
        }
    }

    /// Run one heartbeat cycle now instead of waiting for the next tick.
    ///
    /// Returns whether heartbeating should continue (`false` after the final
    /// shutdown heartbeat or once fenced).
    pub async fn heartbeat_now(&self) -> Result<bool> {
        heartbeat_cycle(&self.runtime, &self.link, &self.cycle).await
    }

    /// Stop abruptly, as if the process died: no final heartbeat, no teardown.
    pub fn kill(&self) {
        tracing::warn!("container {} killed", self.container_id);
        self.killed.store(true, Ordering::SeqCst);
        self.heartbeat_task.abort();
    }

    /// Cut or restore this container's link to the master.
    pub fn sever(&self, cut: bool) {
        self.link.sever(cut);
    }

    /// Terminate the runtime and stop heartbeating.
    pub fn stop(&self) {
        self.runtime
            .lock()
            .expect("container runtime poisoned")
            .terminate();
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether the execution thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .expect("exec thread poisoned")
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn is_heartbeating(&self) -> bool {
        !self.heartbeat_task.is_finished()
    }

    pub fn statuses(&self) -> Vec<OperatorStatus> {
        self.runtime
            .lock()
            .expect("container runtime poisoned")
            .statuses()
    }

    pub fn last_closed_window(&self) -> WindowId {
        self.runtime
            .lock()
            .expect("container runtime poisoned")
            .last_closed_window()
    }

    /// Wait for the execution thread to exit. Blocks the calling thread.
    pub fn join(&self) {
        let thread = self.thread.lock().expect("exec thread poisoned").take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            tracing::error!("container {} execution thread panicked", self.container_id);
        }
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        self.heartbeat_task.abort();
    }
}

/// Execution thread body: tick the runtime, opening windows on request.
fn execute(runtime: Arc<Mutex<ContainerRuntime>>, commands: Receiver<Command>, killed: Arc<AtomicBool>) {
    let mut waiting: VecDeque<oneshot::Sender<Result<WindowId, String>>> = VecDeque::new();
    loop {
        if killed.load(Ordering::SeqCst) {
            break;
        }
        match commands.try_recv() {
            Ok(Command::Step(reply)) => {
                runtime
                    .lock()
                    .expect("container runtime poisoned")
                    .request_step();
                waiting.push_back(reply);
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let outcome = runtime
            .lock()
            .expect("container runtime poisoned")
            .tick(Instant::now());
        match outcome {
            TickOutcome::Closed(window) => {
                if let Some(reply) = waiting.pop_front() {
                    let _ = reply.send(Ok(window));
                }
            }
            TickOutcome::Progress(_) => std::thread::yield_now(),
            TickOutcome::Terminated => break,
            TickOutcome::Idle | TickOutcome::Stalled(_) => match commands.recv_timeout(IDLE_WAIT) {
                Ok(Command::Step(reply)) => {
                    runtime
                        .lock()
                        .expect("container runtime poisoned")
                        .request_step();
                    waiting.push_back(reply);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            },
        }
    }
    for reply in waiting {
        let _ = reply.send(Err("container stopped before the window closed".to_string()));
    }
}

async fn heartbeat_loop(
    container_id: ContainerId,
    runtime: Arc<Mutex<ContainerRuntime>>,
    link: Arc<MasterLink>,
    cycle: Arc<tokio::sync::Mutex<()>>,
    config: HeartbeatConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    let mut last_success = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match heartbeat_cycle(&runtime, &link, &cycle).await {
                    Ok(true) => last_success = Instant::now(),
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!("container {} heartbeat failed: {:#}", container_id, e);
                        if last_success.elapsed() >= config.watchdog() {
                            tracing::error!(
                                "container {}: no heartbeat reached the master for {:?}, terminating",
                                container_id,
                                config.watchdog()
                            );
                            runtime.lock().expect("container runtime poisoned").terminate();
                            break;
                        }
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Send one heartbeat and apply the response. Acknowledgments of a heartbeat
/// that did not reach the master are kept for the next one.
async fn heartbeat_cycle(
    runtime: &Mutex<ContainerRuntime>,
    link: &MasterLink,
    cycle: &tokio::sync::Mutex<()>,
) -> Result<bool> {
    let _serial = cycle.lock().await;
    let request = runtime
        .lock()
        .expect("container runtime poisoned")
        .heartbeat();
    match link.heartbeat(&request).await {
        Ok(response) => {
            let mut runtime = runtime.lock().expect("container runtime poisoned");
            runtime.apply_response(response);
            Ok(!request.terminated && !runtime.is_fenced())
        }
        Err(e) => {
            runtime
                .lock()
                .expect("container runtime poisoned")
                .requeue_acks(request.acks);
            Err(e)
        }
    }
}
