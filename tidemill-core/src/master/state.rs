use std::collections::BTreeMap;
use std::time::Instant;

use crate::protocol::{ControlRequest, OperatorStatus};
use crate::types::{ContainerId, Epoch, OperatorId, Sequence, WindowId};

/// Master-side lifecycle of one container.
///
/// `Requested -> Provisioned -> Running -> {GracefulShutdown, TimedOut}`. `Failed`
/// covers containers retired after an operator fault or a failed deployment.
/// `Superseded` containers were healthy but had to be redeployed so that a
/// recovered consumer gets their output replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Requested,
    Provisioned,
    Running,
    GracefulShutdown,
    TimedOut,
    Failed,
    Superseded,
}

/// Where an operator currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Assigned(ContainerId),
    /// Lost with its container; waiting for redeployment.
    Unassigned,
    Stopped,
    /// Out of retries or unrecoverable. Needs operator intervention.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotLaunched,
    /// Some operators are not (yet) in a running container.
    Pending,
    Running,
    Failed,
    Finished,
}

/// Operator sets redeployed together from one common window, one container each.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recovery {
    pub groups: Vec<Vec<OperatorId>>,
}

impl Recovery {
    pub fn new(operators: Vec<OperatorId>) -> Self {
        Self {
            groups: vec![operators],
        }
    }

    pub fn operators(&self) -> Vec<OperatorId> {
        self.groups.iter().flatten().cloned().collect()
    }

    pub fn contains(&self, operator: &str) -> bool {
        self.groups.iter().flatten().any(|op| op == operator)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Outstanding {
    pub request: ControlRequest,
    pub sent: bool,
}

#[derive(Debug)]
pub(crate) struct ContainerEntry {
    pub id: ContainerId,
    pub epoch: Epoch,
    pub state: ContainerState,
    pub operators: Vec<OperatorId>,
    pub starting_window: WindowId,
    pub provisioned_at: Option<Instant>,
    pub last_heartbeat: Option<Instant>,
    pub last_sequence: Option<Sequence>,
    /// The container reported a completed graceful shutdown.
    pub terminated: bool,
    pub statuses: BTreeMap<OperatorId, OperatorStatus>,
    pub outstanding: Vec<Outstanding>,
}

impl ContainerEntry {
    pub fn new(
        id: ContainerId,
        epoch: Epoch,
        operators: Vec<OperatorId>,
        starting_window: WindowId,
    ) -> Self {
        Self {
            id,
            epoch,
            state: ContainerState::Requested,
            operators,
            starting_window,
            provisioned_at: None,
            last_heartbeat: None,
            last_sequence: None,
            terminated: false,
            statuses: BTreeMap::new(),
            outstanding: Vec::new(),
        }
    }

    /// Instant the heartbeat timeout counts from, if the container is supervised.
    pub fn liveness_reference(&self) -> Option<Instant> {
        match self.state {
            ContainerState::Running | ContainerState::GracefulShutdown if !self.terminated => {
                self.last_heartbeat.or(self.provisioned_at)
            }
            ContainerState::Provisioned => self.last_heartbeat.or(self.provisioned_at),
            _ => None,
        }
    }

    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            epoch: self.epoch,
            state: self.state,
            operators: self.operators.clone(),
            starting_window: self.starting_window,
            statuses: self.statuses.values().cloned().collect(),
            outstanding: self.outstanding.len(),
        }
    }
}

/// Read-only view of a container for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub epoch: Epoch,
    pub state: ContainerState,
    pub operators: Vec<OperatorId>,
    pub starting_window: WindowId,
    pub statuses: Vec<OperatorStatus>,
    pub outstanding: usize,
}
