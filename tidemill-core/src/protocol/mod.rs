//! Messages exchanged between master and containers.
//!
//! Containers only ever talk to the master through heartbeats: a
//! [`HeartbeatRequest`] carries status and acknowledgments, the
//! [`HeartbeatResponse`] carries control requests back.

use serde::{Deserialize, Serialize};

use crate::config::ContainerConfig;
use crate::graph::OperatorSet;
use crate::types::{ContainerId, Epoch, OperatorId, RequestId, Sequence, WindowId};

mod frame;

pub use frame::*;

/// Per-operator slice of a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorStatus {
    pub operator: OperatorId,
    /// Window the operator was deployed at (state as of the end of it).
    pub starting_window: WindowId,
    pub current_window: WindowId,
    pub last_checkpoint_window: Option<WindowId>,
    pub fault: Option<String>,
    /// Buffered tuples waiting on the operator (inputs plus unflushed output).
    pub queue_depth: usize,
    pub shut_down: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    Checkpoint,
    Shutdown,
    SetProperty { key: String, value: String },
}

/// Control request issued by the master. `operator: None` targets the whole container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: RequestId,
    pub operator: Option<OperatorId>,
    pub kind: ControlKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckOutcome {
    /// Applied. Checkpoints carry the window they were durably written for.
    Done { window: Option<WindowId> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAck {
    pub id: RequestId,
    pub operator: Option<OperatorId>,
    pub outcome: AckOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub container_id: ContainerId,
    pub epoch: Epoch,
    pub sequence: Sequence,
    pub operators: Vec<OperatorStatus>,
    pub acks: Vec<RequestAck>,
    /// Last heartbeat of a container that finished a graceful shutdown.
    pub terminated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub requests: Vec<ControlRequest>,
    /// The master no longer recognizes this container; it must stop.
    pub fenced: bool,
}

impl HeartbeatResponse {
    pub fn fenced() -> Self {
        Self {
            requests: Vec::new(),
            fenced: true,
        }
    }
}

/// Everything a freshly provisioned container needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployCommand {
    pub container_id: ContainerId,
    pub epoch: Epoch,
    /// Operators (topological order), their streams and adapters.
    pub set: OperatorSet,
    /// Every operator in the set starts from this window.
    pub starting_window: WindowId,
    pub config: ContainerConfig,
}

impl DeployCommand {
    pub fn operator_ids(&self) -> Vec<OperatorId> {
        self.set.operator_ids()
    }
}
