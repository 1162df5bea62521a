//! Application master: container lifecycle, heartbeat supervision, control
//! requests, and recovery of lost operators.
//!
//! All master state is guarded by plain `std::sync` locks. Lock order is
//! container entry first, then the assignment/recovery/retry tables. The
//! container map is only read to clone entry handles, and only written
//! by recovery while no entry is locked.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use anyhow::{Result, anyhow};

use crate::checkpoint::CheckpointStore;
use crate::config::MasterConfig;
use crate::error::{DeployError, StoreError};
use crate::graph::{OperatorGraph, operator_set, plan_containers};
use crate::protocol::{
    AckOutcome, ControlKind, ControlRequest, DeployCommand, HeartbeatRequest, HeartbeatResponse,
    OperatorStatus, RequestAck,
};
use crate::types::{
    ContainerId, INITIAL_WINDOW, OperatorId, RequestId, StreamLocality, WindowId,
};

mod server;
mod state;

pub use state::{Assignment, ContainerState, ContainerSummary, JobState};

use state::{ContainerEntry, Outstanding, Recovery};

pub struct Master {
    config: MasterConfig,
    store: Arc<dyn CheckpointStore>,
    graph: RwLock<Option<OperatorGraph>>,
    containers: RwLock<HashMap<ContainerId, Arc<Mutex<ContainerEntry>>>>,
    assignments: RwLock<BTreeMap<OperatorId, Assignment>>,
    /// Deploy commands not yet picked up by the resource layer.
    requests: Mutex<VecDeque<DeployCommand>>,
    /// Operator sets lost with their container, waiting for the store to answer.
    recoveries: Mutex<Vec<Recovery>>,
    retries: Mutex<HashMap<OperatorId, u32>>,
    next_container: AtomicU64,
    next_epoch: AtomicU64,
    next_request: AtomicU64,
}

impl Master {
    pub fn new(config: MasterConfig, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            config,
            store,
            graph: RwLock::new(None),
            containers: RwLock::new(HashMap::new()),
            assignments: RwLock::new(BTreeMap::new()),
            requests: Mutex::new(VecDeque::new()),
            recoveries: Mutex::new(Vec::new()),
            retries: Mutex::new(HashMap::new()),
            next_container: AtomicU64::new(1),
            next_epoch: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Validate `graph`, partition it and request one container per operator set.
    pub fn launch(&self, graph: OperatorGraph) -> Result<Vec<ContainerId>> {
        let groups = plan_containers(&graph, self.config.num_containers)?;
        {
            let mut current = self.graph.write().expect("graph poisoned");
            if current.is_some() {
                return Err(anyhow!("a graph is already launched"));
            }
            *current = Some(graph);
        }
        let mut ids = Vec::with_capacity(groups.len());
        for operators in groups {
            ids.push(self.request_container(operators, INITIAL_WINDOW)?);
        }
        tracing::info!("launched graph on {} containers", ids.len());
        Ok(ids)
    }

    /// Hand out deploy commands for containers requested since the last call.
    pub fn take_container_requests(&self) -> Vec<DeployCommand> {
        self.requests
            .lock()
            .expect("requests poisoned")
            .drain(..)
            .collect()
    }

    /// The resource layer started the container; heartbeat supervision begins now.
    pub fn container_provisioned(&self, container_id: &str, now: Instant) -> Result<()> {
        let entry = self.entry_or_err(container_id)?;
        let mut entry = entry.lock().expect("container entry poisoned");
        if entry.state != ContainerState::Requested {
            return Err(anyhow!(
                "container {} cannot be provisioned in state {:?}",
                container_id,
                entry.state
            ));
        }
        entry.state = ContainerState::Provisioned;
        entry.provisioned_at = Some(now);
        tracing::info!("container {} provisioned", container_id);
        Ok(())
    }

    /// The container could not instantiate its operator set.
    pub fn container_deploy_failed(&self, container_id: &str, error: &DeployError) -> Result<()> {
        let retried = {
            let entry = self.entry_or_err(container_id)?;
            let mut entry = entry.lock().expect("container entry poisoned");
            entry.state = ContainerState::Failed;
            let operators = entry.operators.clone();
            tracing::error!("container {} failed to deploy: {}", container_id, error);

            if error.is_unrecoverable() {
                self.fail_operators(&operators, &error.to_string());
                false
            } else if self.consume_retry(&operators) {
                self.schedule_recovery(&operators, container_id);
                true
            } else {
                self.fail_operators(
                    &operators,
                    &format!("deployment retries exhausted: {error}"),
                );
                false
            }
        };
        if retried {
            self.drain_recoveries();
        }
        Ok(())
    }

    /// Process one heartbeat and return the control requests for the container.
    pub fn handle_heartbeat(&self, request: &HeartbeatRequest, now: Instant) -> HeartbeatResponse {
        let Some(entry) = self.entry(&request.container_id) else {
            tracing::warn!(
                "heartbeat from unknown container {}, fencing",
                request.container_id
            );
            return HeartbeatResponse::fenced();
        };
        let mut entry = entry.lock().expect("container entry poisoned");

        if request.epoch != entry.epoch {
            tracing::warn!(
                "heartbeat from {} carries epoch {}, expected {}; fencing",
                request.container_id,
                request.epoch,
                entry.epoch
            );
            return HeartbeatResponse::fenced();
        }
        if matches!(
            entry.state,
            ContainerState::TimedOut | ContainerState::Failed | ContainerState::Superseded
        ) {
            tracing::warn!(
                "heartbeat from retired container {} ({:?}), fencing",
                entry.id,
                entry.state
            );
            return HeartbeatResponse::fenced();
        }
        if let Some(last) = entry.last_sequence
            && request.sequence <= last
        {
            tracing::warn!(
                "container {} heartbeat sequence {} not after {}, ignored",
                entry.id,
                request.sequence,
                last
            );
            return HeartbeatResponse::default();
        }

        entry.last_sequence = Some(request.sequence);
        entry.last_heartbeat = Some(now);
        if matches!(
            entry.state,
            ContainerState::Requested | ContainerState::Provisioned
        ) {
            tracing::info!("container {} is running", entry.id);
            entry.state = ContainerState::Running;
        }
        for status in &request.operators {
            entry
                .statuses
                .insert(status.operator.clone(), status.clone());
        }
        for ack in &request.acks {
            acknowledge(&mut entry, ack);
        }

        if request.terminated {
            tracing::info!("container {} finished its shutdown", entry.id);
            entry.state = ContainerState::GracefulShutdown;
            entry.terminated = true;
            entry.outstanding.clear();
            let operators = entry.operators.clone();
            self.stop_operators(&operators, &entry.id);
            return HeartbeatResponse::default();
        }
        self.stop_operators(&shut_down_operators(&request.operators), &entry.id);

        let faults: Vec<(OperatorId, String)> = request
            .operators
            .iter()
            .filter_map(|s| s.fault.clone().map(|f| (s.operator.clone(), f)))
            .collect();
        if !faults.is_empty() {
            self.handle_faults(&mut entry, &faults);
            drop(entry);
            self.drain_recoveries();
            return HeartbeatResponse::fenced();
        }

        let requests = entry
            .outstanding
            .iter_mut()
            .filter(|o| !o.sent)
            .map(|o| {
                o.sent = true;
                o.request.clone()
            })
            .collect();
        HeartbeatResponse {
            requests,
            fenced: false,
        }
    }

    /// Time out silent containers and schedule recovery of their operators.
    ///
    /// Also retries recoveries that were deferred because the checkpoint store
    /// could not be read. Returns the containers timed out by this call.
    pub fn check_heartbeats(&self, now: Instant) -> Vec<ContainerId> {
        let timeout = self.config.heartbeat.timeout();
        let mut timed_out = Vec::new();
        for entry in self.entries() {
            let mut entry = entry.lock().expect("container entry poisoned");
            let Some(reference) = entry.liveness_reference() else {
                continue;
            };
            if now.saturating_duration_since(reference) < timeout {
                continue;
            }
            let was_shutting_down = entry.state == ContainerState::GracefulShutdown;
            entry.state = ContainerState::TimedOut;
            entry.outstanding.clear();
            let operators = entry.operators.clone();
            if was_shutting_down {
                tracing::warn!(
                    "container {} went silent during shutdown, not recovering",
                    entry.id
                );
                self.stop_operators(&operators, &entry.id);
                continue;
            }
            tracing::warn!(
                "container {} timed out after {:?} without a heartbeat",
                entry.id,
                timeout
            );
            self.schedule_recovery(&operators, &entry.id);
            timed_out.push(entry.id.clone());
        }
        self.drain_recoveries();
        timed_out
    }

    /// Window the given operators resume after: the latest window every one of
    /// them still holds a checkpoint for. Falls back to [`INITIAL_WINDOW`] when
    /// they share none, including when any of them never checkpointed.
    pub fn recovery_window(&self, operators: &[OperatorId]) -> Result<WindowId, StoreError> {
        let mut common: Option<BTreeSet<WindowId>> = None;
        for operator in operators {
            let stored: BTreeSet<WindowId> = match self.store.windows(operator) {
                Ok(windows) => windows.into_iter().collect(),
                Err(StoreError::NotFound { .. }) => BTreeSet::new(),
                Err(e) => return Err(e),
            };
            let shared: BTreeSet<WindowId> = match common {
                Some(common) => common.intersection(&stored).copied().collect(),
                None => stored,
            };
            if shared.is_empty() {
                return Ok(INITIAL_WINDOW);
            }
            common = Some(shared);
        }
        Ok(common
            .and_then(|c| c.last().copied())
            .unwrap_or(INITIAL_WINDOW))
    }

    pub fn request_checkpoint(&self, operator: &str) -> Result<RequestId> {
        let container = self.require_container_for(operator)?;
        self.enqueue(&container, Some(operator), ControlKind::Checkpoint)
    }

    pub fn request_container_checkpoint(&self, container_id: &str) -> Result<RequestId> {
        self.enqueue(container_id, None, ControlKind::Checkpoint)
    }

    pub fn set_property(&self, operator: &str, key: &str, value: &str) -> Result<RequestId> {
        let container = self.require_container_for(operator)?;
        self.enqueue(
            &container,
            Some(operator),
            ControlKind::SetProperty {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    pub fn shutdown_operator(&self, operator: &str) -> Result<RequestId> {
        let container = self.require_container_for(operator)?;
        self.enqueue(&container, Some(operator), ControlKind::Shutdown)
    }

    /// Ask a container to stop at its next window boundary. It is no longer
    /// recovered if it goes silent afterwards.
    pub fn shutdown_container(&self, container_id: &str) -> Result<RequestId> {
        let id = self.enqueue(container_id, None, ControlKind::Shutdown)?;
        let entry = self.entry_or_err(container_id)?;
        let mut entry = entry.lock().expect("container entry poisoned");
        if matches!(
            entry.state,
            ContainerState::Provisioned | ContainerState::Running
        ) {
            entry.state = ContainerState::GracefulShutdown;
        }
        Ok(id)
    }

    /// Shut down every live container.
    pub fn shutdown_graph(&self) -> Result<Vec<RequestId>> {
        let live: Vec<ContainerId> = self
            .containers()
            .into_iter()
            .filter(|c| {
                matches!(
                    c.state,
                    ContainerState::Requested
                        | ContainerState::Provisioned
                        | ContainerState::Running
                )
            })
            .map(|c| c.id)
            .collect();
        live.iter().map(|id| self.shutdown_container(id)).collect()
    }

    pub fn container_state(&self, container_id: &str) -> Option<ContainerState> {
        self.entry(container_id)
            .map(|e| e.lock().expect("container entry poisoned").state)
    }

    pub fn containers(&self) -> Vec<ContainerSummary> {
        let mut summaries: Vec<ContainerSummary> = self
            .entries()
            .iter()
            .map(|e| e.lock().expect("container entry poisoned").summary())
            .collect();
        summaries.sort_by(|a, b| a.epoch.cmp(&b.epoch));
        summaries
    }

    pub fn assignment(&self, operator: &str) -> Option<Assignment> {
        self.assignments
            .read()
            .expect("assignments poisoned")
            .get(operator)
            .cloned()
    }

    pub fn container_for(&self, operator: &str) -> Option<ContainerId> {
        match self.assignment(operator)? {
            Assignment::Assigned(id) => Some(id),
            _ => None,
        }
    }

    /// Status last reported for `operator` by the container hosting it.
    pub fn operator_status(&self, operator: &str) -> Option<OperatorStatus> {
        let container = self.container_for(operator)?;
        let entry = self.entry(&container)?;
        let entry = entry.lock().expect("container entry poisoned");
        entry.statuses.get(operator).cloned()
    }

    /// Requests queued or delivered but not yet acknowledged.
    pub fn outstanding_requests(&self, container_id: &str) -> usize {
        self.entry(container_id)
            .map(|e| e.lock().expect("container entry poisoned").outstanding.len())
            .unwrap_or(0)
    }

    pub fn pending_recoveries(&self) -> usize {
        self.recoveries.lock().expect("recoveries poisoned").len()
    }

    pub fn job_state(&self) -> JobState {
        let assignments = self.assignments.read().expect("assignments poisoned").clone();
        if assignments.is_empty() {
            return JobState::NotLaunched;
        }
        if assignments
            .values()
            .any(|a| matches!(a, Assignment::Failed(_)))
        {
            return JobState::Failed;
        }
        if assignments.values().all(|a| *a == Assignment::Stopped) {
            return JobState::Finished;
        }
        let running = assignments.values().all(|a| match a {
            Assignment::Assigned(id) => matches!(
                self.container_state(id),
                Some(ContainerState::Running | ContainerState::GracefulShutdown)
            ),
            Assignment::Stopped => true,
            _ => false,
        });
        if running {
            JobState::Running
        } else {
            JobState::Pending
        }
    }

    fn request_container(
        &self,
        operators: Vec<OperatorId>,
        starting_window: WindowId,
    ) -> Result<ContainerId> {
        let set = {
            let graph = self.graph.read().expect("graph poisoned");
            let graph = graph.as_ref().ok_or_else(|| anyhow!("no graph launched"))?;
            operator_set(graph, &operators)?
        };
        let n = self.next_container.fetch_add(1, Ordering::SeqCst);
        let container_id = format!("container-{n}");
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);

        let entry = ContainerEntry::new(
            container_id.clone(),
            epoch,
            operators.clone(),
            starting_window,
        );
        self.containers
            .write()
            .expect("containers poisoned")
            .insert(container_id.clone(), Arc::new(Mutex::new(entry)));
        {
            let mut assignments = self.assignments.write().expect("assignments poisoned");
            for operator in &operators {
                assignments.insert(operator.clone(), Assignment::Assigned(container_id.clone()));
            }
        }
        self.requests
            .lock()
            .expect("requests poisoned")
            .push_back(DeployCommand {
                container_id: container_id.clone(),
                epoch,
                set,
                starting_window,
                config: self.config.container.clone(),
            });
        tracing::info!(
            "requested {} (epoch {}) for {:?} starting after window {}",
            container_id,
            epoch,
            operators,
            starting_window
        );
        Ok(container_id)
    }

    /// Redeploy every lost operator set whose recovery window can be computed.
    ///
    /// Must not be called with a container entry locked.
    fn drain_recoveries(&self) {
        let mut pending: VecDeque<Recovery> =
            mem::take(&mut *self.recoveries.lock().expect("recoveries poisoned")).into();
        let mut deferred: Vec<Recovery> = Vec::new();
        while let Some(mut recovery) = pending.pop_front() {
            self.widen(&mut recovery, &mut pending, &mut deferred);
            let operators = recovery.operators();
            let window = match self.recovery_window(&operators) {
                Ok(window) => window,
                Err(e) => {
                    tracing::warn!(
                        "recovery of {:?} deferred, checkpoint store unavailable: {}",
                        operators,
                        e
                    );
                    deferred.push(recovery);
                    continue;
                }
            };
            tracing::info!("recovering {:?} after window {}", operators, window);
            let mut failed = Vec::new();
            for group in recovery.groups {
                if let Err(e) = self.request_container(group.clone(), window) {
                    tracing::error!("recovery of {:?} failed: {:#}", group, e);
                    failed.push(group);
                }
            }
            if !failed.is_empty() {
                deferred.push(Recovery { groups: failed });
            }
        }
        self.recoveries
            .lock()
            .expect("recoveries poisoned")
            .extend(deferred);
    }

    /// Pull the producers of every networked stream feeding `recovery` into it.
    ///
    /// Networked queues are consumed destructively, so a consumer resuming at
    /// window `k` only sees its lost input again if the producers rewind to `k`
    /// as well. Producers that are themselves waiting for recovery are merged;
    /// live ones are superseded. Repeats until no producer is left outside.
    fn widen(
        &self,
        recovery: &mut Recovery,
        pending: &mut VecDeque<Recovery>,
        deferred: &mut Vec<Recovery>,
    ) {
        loop {
            let members: HashSet<OperatorId> = recovery.operators().into_iter().collect();
            let producers: Vec<OperatorId> = {
                let graph = self.graph.read().expect("graph poisoned");
                let Some(graph) = graph.as_ref() else {
                    return;
                };
                graph
                    .streams
                    .iter()
                    .filter(|s| {
                        s.locality == StreamLocality::Networked
                            && members.contains(&s.sink)
                            && !members.contains(&s.source)
                    })
                    .map(|s| s.source.clone())
                    .collect()
            };
            let mut grew = false;
            for producer in producers {
                if recovery.contains(&producer) {
                    continue;
                }
                if let Some(i) = pending.iter().position(|r| r.contains(&producer)) {
                    if let Some(other) = pending.remove(i) {
                        recovery.groups.extend(other.groups);
                        grew = true;
                    }
                } else if let Some(i) = deferred.iter().position(|r| r.contains(&producer)) {
                    recovery.groups.extend(deferred.remove(i).groups);
                    grew = true;
                } else if let Some(container) = self.container_for(&producer)
                    && let Some(group) = self.supersede(&container)
                {
                    recovery.groups.push(group);
                    grew = true;
                }
            }
            if !grew {
                return;
            }
        }
    }

    /// Retire a live container so its operators can be redeployed with a recovery.
    /// The container is fenced at its next heartbeat.
    fn supersede(&self, container_id: &str) -> Option<Vec<OperatorId>> {
        let entry = self.entry(container_id)?;
        let mut entry = entry.lock().expect("container entry poisoned");
        if !matches!(
            entry.state,
            ContainerState::Requested | ContainerState::Provisioned | ContainerState::Running
        ) {
            return None;
        }
        entry.state = ContainerState::Superseded;
        entry.outstanding.clear();
        self.requests
            .lock()
            .expect("requests poisoned")
            .retain(|c| c.container_id != entry.id);
        let operators = entry.operators.clone();
        let moved = self.reassign(&operators, &entry.id, Assignment::Unassigned);
        tracing::warn!(
            "container {} superseded to replay its output for recovery of {:?}",
            entry.id,
            moved
        );
        (!moved.is_empty()).then_some(moved)
    }

    fn handle_faults(&self, entry: &mut ContainerEntry, faults: &[(OperatorId, String)]) {
        for (operator, message) in faults {
            tracing::error!(
                "operator {} faulted in container {}: {}",
                operator,
                entry.id,
                message
            );
        }
        entry.state = ContainerState::Failed;
        entry.outstanding.clear();
        let operators = entry.operators.clone();
        let faulted: Vec<OperatorId> = faults.iter().map(|(op, _)| op.clone()).collect();
        if self.consume_retry(&faulted) {
            self.schedule_recovery(&operators, &entry.id);
        } else {
            let reason = format!("retries exhausted after fault: {}", faults[0].1);
            self.fail_operators(&operators, &reason);
        }
    }

    /// Count one more redeployment for each operator. False once any is out of retries.
    fn consume_retry(&self, operators: &[OperatorId]) -> bool {
        let mut retries = self.retries.lock().expect("retries poisoned");
        let mut allowed = true;
        for operator in operators {
            let count = retries.entry(operator.clone()).or_insert(0);
            *count += 1;
            if *count > self.config.max_operator_retries {
                allowed = false;
            }
        }
        allowed
    }

    fn fail_operators(&self, operators: &[OperatorId], reason: &str) {
        let mut assignments = self.assignments.write().expect("assignments poisoned");
        for operator in operators {
            tracing::error!("operator {} failed permanently: {}", operator, reason);
            assignments.insert(operator.clone(), Assignment::Failed(reason.to_string()));
        }
    }

    /// Queue redeployment of the operators `container_id` still hosted. Operators
    /// already stopped or moved elsewhere are left alone.
    fn schedule_recovery(&self, operators: &[OperatorId], container_id: &str) {
        let lost = self.reassign(operators, container_id, Assignment::Unassigned);
        if !lost.is_empty() {
            self.recoveries
                .lock()
                .expect("recoveries poisoned")
                .push(Recovery::new(lost));
        }
    }

    fn stop_operators(&self, operators: &[OperatorId], container_id: &str) {
        for operator in self.reassign(operators, container_id, Assignment::Stopped) {
            tracing::info!("operator {} stopped", operator);
        }
    }

    fn reassign(
        &self,
        operators: &[OperatorId],
        container_id: &str,
        to: Assignment,
    ) -> Vec<OperatorId> {
        let mut assignments = self.assignments.write().expect("assignments poisoned");
        let mut changed = Vec::new();
        for operator in operators {
            if let Some(current) = assignments.get_mut(operator)
                && *current == Assignment::Assigned(container_id.to_string())
            {
                *current = to.clone();
                changed.push(operator.clone());
            }
        }
        changed
    }

    fn enqueue(
        &self,
        container_id: &str,
        operator: Option<&str>,
        kind: ControlKind,
    ) -> Result<RequestId> {
        let entry = self.entry_or_err(container_id)?;
        let mut entry = entry.lock().expect("container entry poisoned");
        let accepts = match entry.state {
            ContainerState::Requested | ContainerState::Provisioned | ContainerState::Running => {
                true
            }
            ContainerState::GracefulShutdown => !entry.terminated,
            ContainerState::TimedOut | ContainerState::Failed | ContainerState::Superseded => false,
        };
        if !accepts {
            return Err(anyhow!(
                "container {} does not accept requests in state {:?}",
                container_id,
                entry.state
            ));
        }
        let id = self.next_request.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "queued request {} {:?} for {} ({:?})",
            id,
            kind,
            container_id,
            operator
        );
        entry.outstanding.push(Outstanding {
            request: ControlRequest {
                id,
                operator: operator.map(str::to_string),
                kind,
            },
            sent: false,
        });
        Ok(id)
    }

    fn require_container_for(&self, operator: &str) -> Result<ContainerId> {
        self.container_for(operator).ok_or_else(|| {
            anyhow!(
                "operator {} is not deployed ({:?})",
                operator,
                self.assignment(operator)
            )
        })
    }

    fn entry(&self, container_id: &str) -> Option<Arc<Mutex<ContainerEntry>>> {
        self.containers
            .read()
            .expect("containers poisoned")
            .get(container_id)
            .cloned()
    }

    fn entry_or_err(&self, container_id: &str) -> Result<Arc<Mutex<ContainerEntry>>> {
        self.entry(container_id)
            .ok_or_else(|| anyhow!("unknown container {}", container_id))
    }

    fn entries(&self) -> Vec<Arc<Mutex<ContainerEntry>>> {
        self.containers
            .read()
            .expect("containers poisoned")
            .values()
            .cloned()
            .collect()
    }
}

fn acknowledge(entry: &mut ContainerEntry, ack: &RequestAck) {
    let Some(pos) = entry
        .outstanding
        .iter()
        .position(|o| o.request.id == ack.id)
    else {
        tracing::debug!("container {} acked unknown request {}", entry.id, ack.id);
        return;
    };
    let done = entry.outstanding.remove(pos);
    match &ack.outcome {
        AckOutcome::Done { window } => tracing::info!(
            "container {} completed request {} {:?} (window {:?})",
            entry.id,
            ack.id,
            done.request.kind,
            window
        ),
        AckOutcome::Failed(reason) => tracing::warn!(
            "container {} failed request {} {:?}: {}",
            entry.id,
            ack.id,
            done.request.kind,
            reason
        ),
    }
}

fn shut_down_operators(statuses: &[OperatorStatus]) -> Vec<OperatorId> {
    statuses
        .iter()
        .filter(|s| s.shut_down && s.fault.is_none())
        .map(|s| s.operator.clone())
        .collect()
}

#[cfg(test)]
#[path = "tests/master_tests.rs"]
mod tests;
