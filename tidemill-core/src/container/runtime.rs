use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use crate::adapter::{InputAdapter, OutputAdapter};
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::error::{DeployError, StoreError};
use crate::node::{OperatorRuntime, RuntimeState};
use crate::protocol::{
    AckOutcome, ControlKind, ControlRequest, DeployCommand, HeartbeatRequest, HeartbeatResponse,
    OperatorStatus, RequestAck,
};
use crate::queue::{PushError, QueueReceiver, QueueSender, StreamBus, tuple_queue};
use crate::registry::ComponentRegistry;
use crate::types::{
    AdapterId, ContainerId, Epoch, OperatorId, RequestId, Sequence, StreamLocality, Tuple, WindowId,
};
use crate::window::WindowClock;

/// Tuples an operator (or adapter) may move per pass before others get a turn.
const PUMP_BUDGET: usize = 256;

struct InputBinding {
    id: AdapterId,
    target: OperatorId,
    adapter: Box<dyn InputAdapter>,
    sender: QueueSender,
    /// Polled but rejected by a full queue.
    held: Option<Tuple>,
    exhausted: bool,
}

struct OutputBinding {
    id: AdapterId,
    source: OperatorId,
    adapter: Box<dyn OutputAdapter>,
    receiver: QueueReceiver,
    held: Option<Tuple>,
}

/// Control requests deferred to the next window boundary.
enum BoundaryAction {
    SetProperty { key: String, value: String },
    Shutdown,
}

struct BoundaryRequest {
    id: RequestId,
    operator: Option<OperatorId>,
    action: BoundaryAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No window open and none due.
    Idle,
    Progress(WindowId),
    /// The open window exceeded the stall deadline. It stays open.
    Stalled(WindowId),
    Closed(WindowId),
    Terminated,
}

/// Single-threaded engine of one container.
///
/// Owns the operator runtimes (in topological order), the adapters bound to
/// them, and the window clock. [`ContainerRuntime::tick`] does one bounded pass
/// of work so a caller can interleave heartbeats between passes.
pub struct ContainerRuntime {
    container_id: ContainerId,
    epoch: Epoch,
    starting_window: WindowId,
    nodes: Vec<OperatorRuntime>,
    /// Indices of in-container producers for each node.
    upstream: Vec<Vec<usize>>,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    clock: WindowClock,
    store: Arc<dyn CheckpointStore>,
    steps_requested: usize,
    checkpoint_requests: Vec<ControlRequest>,
    boundary_requests: VecDeque<BoundaryRequest>,
    seen_requests: HashSet<RequestId>,
    acks: Vec<RequestAck>,
    sequence: Sequence,
    stall_reported: Option<WindowId>,
    terminated: bool,
    fenced: bool,
}

impl ContainerRuntime {
    /// Instantiate, restore and wire the operator set of `command`.
    pub fn deploy(
        command: &DeployCommand,
        registry: &ComponentRegistry,
        store: Arc<dyn CheckpointStore>,
        bus: &StreamBus,
    ) -> Result<Self, DeployError> {
        let set = &command.set;
        let starting = command.starting_window;
        let capacity = command.config.queue.capacity;

        let mut nodes = Vec::with_capacity(set.operators.len());
        for def in &set.operators {
            nodes.push(OperatorRuntime::deploy(def, starting, registry, store.as_ref())?);
        }
        let index: HashMap<OperatorId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().to_string(), i))
            .collect();

        let mut upstream = vec![Vec::new(); nodes.len()];
        for stream in &set.streams {
            let source = index.get(&stream.source).copied();
            let sink = index.get(&stream.sink).copied();
            let (sender, receiver) = match stream.locality {
                StreamLocality::Inline => {
                    if source.is_none() || sink.is_none() {
                        return Err(DeployError::Wiring {
                            stream: stream.id.clone(),
                            reason: "inline stream must have both ends in one container"
                                .to_string(),
                        });
                    }
                    tuple_queue(capacity)
                }
                StreamLocality::Networked => bus.attach(&stream.id, capacity),
            };
            if let Some(i) = source {
                nodes[i].attach_output(stream.id.clone(), sender);
            }
            if let Some(j) = sink {
                nodes[j].attach_input(stream.id.clone(), receiver, source.is_some());
                if let Some(i) = source {
                    upstream[j].push(i);
                }
            }
        }

        let mut inputs = Vec::with_capacity(set.inputs.len());
        for def in &set.inputs {
            let target = *index.get(&def.target).ok_or_else(|| DeployError::Wiring {
                stream: def.id.clone(),
                reason: format!("target {} is not deployed here", def.target),
            })?;
            let mut adapter = registry.create_input(def)?;
            adapter.resume_from(starting);
            let (sender, receiver) = tuple_queue(capacity);
            nodes[target].attach_input(def.id.clone(), receiver, true);
            inputs.push(InputBinding {
                id: def.id.clone(),
                target: def.target.clone(),
                adapter,
                sender,
                held: None,
                exhausted: false,
            });
        }

        let mut outputs = Vec::with_capacity(set.outputs.len());
        for def in &set.outputs {
            let source = *index.get(&def.source).ok_or_else(|| DeployError::Wiring {
                stream: def.id.clone(),
                reason: format!("source {} is not deployed here", def.source),
            })?;
            let mut adapter = registry.create_output(def)?;
            adapter.resume_from(starting);
            let (sender, receiver) = tuple_queue(capacity);
            nodes[source].attach_output(def.id.clone(), sender);
            outputs.push(OutputBinding {
                id: def.id.clone(),
                source: def.source.clone(),
                adapter,
                receiver,
                held: None,
            });
        }

        let mut clock = WindowClock::starting_after(&command.config.window, starting);
        for node in &nodes {
            clock.register(node.id());
        }

        tracing::info!(
            "container {} deployed {} operators at window {} (epoch {})",
            command.container_id,
            nodes.len(),
            starting,
            command.epoch
        );

        Ok(Self {
            container_id: command.container_id.clone(),
            epoch: command.epoch,
            starting_window: starting,
            nodes,
            upstream,
            inputs,
            outputs,
            clock,
            store,
            steps_requested: 0,
            checkpoint_requests: Vec::new(),
            boundary_requests: VecDeque::new(),
            seen_requests: HashSet::new(),
            acks: Vec::new(),
            sequence: 0,
            stall_reported: None,
            terminated: false,
            fenced: false,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn starting_window(&self) -> WindowId {
        self.starting_window
    }

    pub fn last_closed_window(&self) -> WindowId {
        self.clock.last_closed()
    }

    pub fn current_window(&self) -> Option<WindowId> {
        self.clock.current()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_fenced(&self) -> bool {
        self.fenced
    }

    pub fn pending_checkpoints(&self) -> usize {
        self.checkpoint_requests.len()
    }

    pub fn operator_ids(&self) -> Vec<OperatorId> {
        self.nodes.iter().map(|n| n.id().to_string()).collect()
    }

    /// Ask for one more window regardless of the clock's cadence.
    pub fn request_step(&mut self) {
        self.steps_requested += 1;
    }

    /// One bounded pass: open a window if one is due, move tuples, close the
    /// window once every operator ended it and all output left the container.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.terminated {
            return TickOutcome::Terminated;
        }
        let window = match self.clock.current() {
            Some(window) => window,
            None => {
                self.apply_boundary_requests();
                if self.terminated {
                    return TickOutcome::Terminated;
                }
                if self.steps_requested == 0 && !self.clock.is_due(now) {
                    return TickOutcome::Idle;
                }
                match self.open_window(now) {
                    Some(window) => window,
                    None => return TickOutcome::Idle,
                }
            }
        };

        self.drive(window);

        if self.settled()
            && let Some(closed) = self.clock.try_complete()
        {
            self.stall_reported = None;
            tracing::debug!("container {} closed window {}", self.container_id, closed);
            self.serve_checkpoints();
            self.apply_boundary_requests();
            return TickOutcome::Closed(closed);
        }

        if let Err(e) = self.clock.check_stall(now) {
            if self.stall_reported != Some(window) {
                tracing::warn!("container {}: {}", self.container_id, e);
                self.stall_reported = Some(window);
            }
            return TickOutcome::Stalled(window);
        }
        TickOutcome::Progress(window)
    }

    pub fn statuses(&self) -> Vec<OperatorStatus> {
        self.nodes.iter().map(OperatorRuntime::status).collect()
    }

    /// Build the next heartbeat. Acknowledgments move into the request.
    pub fn heartbeat(&mut self) -> HeartbeatRequest {
        self.sequence += 1;
        HeartbeatRequest {
            container_id: self.container_id.clone(),
            epoch: self.epoch,
            sequence: self.sequence,
            operators: self.statuses(),
            acks: mem::take(&mut self.acks),
            terminated: self.terminated && !self.fenced,
        }
    }

    /// Put back acknowledgments of a heartbeat that never reached the master.
    pub fn requeue_acks(&mut self, mut acks: Vec<RequestAck>) {
        acks.append(&mut self.acks);
        self.acks = acks;
    }

    /// Queue control requests; they take effect at the next window boundary.
    pub fn apply_response(&mut self, response: HeartbeatResponse) {
        if response.fenced {
            tracing::warn!(
                "container {} (epoch {}) fenced by master, terminating",
                self.container_id,
                self.epoch
            );
            self.fence();
            return;
        }
        for request in response.requests {
            if !self.seen_requests.insert(request.id) {
                continue;
            }
            let action = match request.kind {
                ControlKind::Checkpoint => {
                    self.checkpoint_requests.push(request);
                    continue;
                }
                ControlKind::SetProperty { key, value } => {
                    BoundaryAction::SetProperty { key, value }
                }
                ControlKind::Shutdown => BoundaryAction::Shutdown,
            };
            self.boundary_requests.push_back(BoundaryRequest {
                id: request.id,
                operator: request.operator,
                action,
            });
        }
    }

    /// Stop everything immediately. Used by the watchdog and on fencing.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        for node in &mut self.nodes {
            node.teardown();
        }
        for binding in &mut self.inputs {
            binding.adapter.stop();
        }
        for binding in &mut self.outputs {
            binding.adapter.stop();
        }
        self.terminated = true;
        tracing::info!("container {} terminated", self.container_id);
    }

    fn fence(&mut self) {
        self.fenced = true;
        self.terminate();
    }

    fn open_window(&mut self, now: Instant) -> Option<WindowId> {
        let window = match self.clock.open_next(now) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!("container {}: {}", self.container_id, e);
                return None;
            }
        };
        self.steps_requested = self.steps_requested.saturating_sub(1);
        for binding in &mut self.inputs {
            binding.exhausted = false;
        }
        for node in &mut self.nodes {
            if node.is_active()
                && let Err(e) = node.begin_window(window)
            {
                tracing::error!("container {}: {}", self.container_id, e);
            }
        }
        self.retire_inactive();
        Some(window)
    }

    fn drive(&mut self, window: WindowId) {
        self.feed_inputs(window);
        for node in &mut self.nodes {
            node.pump(PUMP_BUDGET);
        }
        self.drain_outputs(window);
        self.end_ready(window);
        self.drain_outputs(window);
        self.retire_inactive();
    }

    /// Poll input adapters until their window is exhausted or the target queue is full.
    fn feed_inputs(&mut self, window: WindowId) {
        for binding in &mut self.inputs {
            let target_active = self
                .nodes
                .iter()
                .any(|n| n.id() == binding.target && n.state() == RuntimeState::InWindow);
            if !target_active {
                continue;
            }
            for _ in 0..PUMP_BUDGET {
                let tuple = match binding.held.take() {
                    Some(tuple) => tuple,
                    None if binding.exhausted => break,
                    None => match binding.adapter.poll(window) {
                        Some(tuple) => tuple,
                        None => {
                            binding.exhausted = true;
                            break;
                        }
                    },
                };
                match binding.sender.try_push(tuple) {
                    Ok(()) => {}
                    Err(PushError::Full(tuple)) => {
                        binding.held = Some(tuple);
                        break;
                    }
                    Err(PushError::Closed(_)) => {
                        tracing::warn!("input {} lost its target queue", binding.id);
                        binding.exhausted = true;
                        break;
                    }
                }
            }
        }
    }

    fn drain_outputs(&mut self, window: WindowId) {
        for binding in &mut self.outputs {
            while binding.adapter.accepting() {
                let Some(tuple) = binding.held.take().or_else(|| binding.receiver.try_pop()) else {
                    break;
                };
                if let Err(e) = binding.adapter.write(window, tuple.clone()) {
                    tracing::warn!(
                        "output {} write failed in window {}: {:#}",
                        binding.id,
                        window,
                        e
                    );
                    binding.held = Some(tuple);
                    break;
                }
            }
        }
    }

    /// End the window for every operator whose input for it is complete, in topological order.
    fn end_ready(&mut self, window: WindowId) {
        for i in 0..self.nodes.len() {
            if self.nodes[i].state() != RuntimeState::InWindow
                || !self.nodes[i].is_drained()
                || !self.upstream_done(i)
            {
                continue;
            }
            match self.nodes[i].end_window(window) {
                Ok(()) => {
                    if let Err(e) = self.clock.mark_closed(self.nodes[i].id(), window) {
                        tracing::warn!("container {}: {}", self.container_id, e);
                    }
                    self.nodes[i].pump(PUMP_BUDGET);
                }
                Err(e) => tracing::error!("container {}: {}", self.container_id, e),
            }
        }
    }

    fn upstream_done(&self, i: usize) -> bool {
        let id = self.nodes[i].id();
        let adapters_done = self
            .inputs
            .iter()
            .filter(|b| b.target == id)
            .all(|b| b.exhausted && b.held.is_none());
        adapters_done
            && self.upstream[i].iter().all(|&j| {
                let up = &self.nodes[j];
                !up.is_active() || (up.state() != RuntimeState::InWindow && up.is_drained())
            })
    }

    fn settled(&self) -> bool {
        let nodes_done = self.nodes.iter().all(|n| {
            !n.is_active() || (n.state() != RuntimeState::InWindow && n.is_drained())
        });
        nodes_done
            && self.outputs.iter().all(|b| {
                !self.is_active(&b.source) || (b.held.is_none() && b.receiver.is_empty())
            })
    }

    fn is_active(&self, operator: &str) -> bool {
        self.nodes
            .iter()
            .any(|n| n.id() == operator && n.is_active())
    }

    fn position(&self, operator: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == operator)
    }

    /// Stop waiting on faulted or torn-down operators; pause inputs feeding a faulted one.
    fn retire_inactive(&mut self) {
        for node in &self.nodes {
            if node.is_active() || !self.clock.participants().iter().any(|p| p == node.id()) {
                continue;
            }
            self.clock.deregister(node.id());
            if node.state() == RuntimeState::Faulted {
                for binding in self.inputs.iter_mut().filter(|b| b.target == node.id()) {
                    binding.adapter.pause();
                }
            }
        }
    }

    fn serve_checkpoints(&mut self) {
        let requests = mem::take(&mut self.checkpoint_requests);
        for request in requests {
            if self.terminated {
                break;
            }
            match self.checkpoint(&request) {
                Some(outcome) => self.acks.push(RequestAck {
                    id: request.id,
                    operator: request.operator.clone(),
                    outcome,
                }),
                None => self.checkpoint_requests.push(request),
            }
        }
    }

    /// Serve one CHECKPOINT request. `None` means the store was unavailable and
    /// the request should be retried at the next boundary.
    fn checkpoint(&mut self, request: &ControlRequest) -> Option<AckOutcome> {
        let targets: Vec<usize> = match &request.operator {
            Some(operator) => match self.position(operator) {
                Some(i) => vec![i],
                None => {
                    return Some(AckOutcome::Failed(format!(
                        "operator {} is not hosted by {}",
                        operator, self.container_id
                    )));
                }
            },
            None => (0..self.nodes.len())
                .filter(|&i| self.nodes[i].is_active())
                .collect(),
        };

        let mut written = None;
        for i in targets {
            let (window, blob) = match self.nodes[i].checkpoint() {
                Ok(snapshot) => snapshot,
                Err(e) => return Some(AckOutcome::Failed(e.to_string())),
            };
            let operator = self.nodes[i].id().to_string();
            match self
                .store
                .put(CheckpointRecord::new(operator.clone(), window, self.epoch, blob))
            {
                Ok(()) => {
                    tracing::info!(
                        "container {} checkpointed {} at window {}",
                        self.container_id,
                        operator,
                        window
                    );
                    written = Some(window);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "checkpoint of {} at window {} skipped, retrying next window: {}",
                        operator,
                        window,
                        e
                    );
                    return None;
                }
                Err(e @ StoreError::Fenced { .. }) => {
                    tracing::error!("container {}: {}", self.container_id, e);
                    self.fence();
                    return Some(AckOutcome::Failed(e.to_string()));
                }
                Err(e) => return Some(AckOutcome::Failed(e.to_string())),
            }
        }
        Some(AckOutcome::Done { window: written })
    }

    fn apply_boundary_requests(&mut self) {
        while let Some(request) = self.boundary_requests.pop_front() {
            let outcome = match &request.action {
                BoundaryAction::SetProperty { key, value } => {
                    self.set_property(request.operator.as_deref(), key, value)
                }
                BoundaryAction::Shutdown => self.shutdown(request.operator.as_deref()),
            };
            self.acks.push(RequestAck {
                id: request.id,
                operator: request.operator,
                outcome,
            });
            if self.terminated {
                break;
            }
        }
    }

    fn set_property(&mut self, operator: Option<&str>, key: &str, value: &str) -> AckOutcome {
        let Some(operator) = operator else {
            return AckOutcome::Failed("SET_PROPERTY needs a target operator".to_string());
        };
        let Some(i) = self.position(operator) else {
            return AckOutcome::Failed(format!(
                "operator {} is not hosted by {}",
                operator, self.container_id
            ));
        };
        match self.nodes[i].apply_property(key, value) {
            Ok(()) => {
                tracing::info!("operator {} property {}={}", operator, key, value);
                AckOutcome::Done { window: None }
            }
            Err(e) => AckOutcome::Failed(format!("{e:#}")),
        }
    }

    /// Cooperative shutdown at a window boundary.
    fn shutdown(&mut self, operator: Option<&str>) -> AckOutcome {
        let window = Some(self.clock.last_closed());
        let Some(operator) = operator else {
            tracing::info!(
                "container {} shutting down after window {}",
                self.container_id,
                self.clock.last_closed()
            );
            self.terminate();
            return AckOutcome::Done { window };
        };
        let Some(i) = self.position(operator) else {
            return AckOutcome::Failed(format!(
                "operator {} is not hosted by {}",
                operator, self.container_id
            ));
        };
        self.nodes[i].pump(PUMP_BUDGET);
        self.nodes[i].teardown();
        self.clock.deregister(operator);
        for binding in self.inputs.iter_mut().filter(|b| b.target == operator) {
            binding.adapter.stop();
        }
        for binding in self.outputs.iter_mut().filter(|b| b.source == operator) {
            binding.adapter.stop();
        }
        tracing::info!("operator {} shut down in {}", operator, self.container_id);
        if self.nodes.iter().all(|n| n.state() == RuntimeState::TornDown) {
            self.terminate();
        }
        AckOutcome::Done { window }
    }
}
