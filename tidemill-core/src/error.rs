//! Typed errors for the contract seams of the engine.
//!
//! Orchestration code (master, container handle, transports) keeps using
//! `anyhow::Result`; these enums exist where callers must branch on the cause.

use thiserror::Error;

use crate::types::{AdapterId, Epoch, OperatorId, StreamId, WindowId};

/// Failure of the opaque encode/decode boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Checkpoint store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no checkpoint stored for operator {operator}")]
    NotFound { operator: OperatorId },
    #[error("operator {operator} has no checkpoint for window {window}")]
    MissingWindow {
        operator: OperatorId,
        window: WindowId,
    },
    #[error("checkpoint for operator {operator} at window {window} is not newer than {latest}")]
    NotMonotonic {
        operator: OperatorId,
        window: WindowId,
        latest: WindowId,
    },
    #[error("stale epoch {epoch} for operator {operator} (store has seen {current})")]
    Fenced {
        operator: OperatorId,
        epoch: Epoch,
        current: Epoch,
    },
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Errors after which the write should simply be retried at the next window boundary.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Restoring operator state from a stored blob failed. Fatal for the deployment attempt.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("checkpoint of {operator} at window {window} cannot be decoded: {reason}")]
    Undecodable {
        operator: OperatorId,
        window: WindowId,
        reason: String,
    },
    #[error("checkpoint of {operator} at or before window {window} is unavailable: {source}")]
    Unavailable {
        operator: OperatorId,
        window: WindowId,
        #[source]
        source: StoreError,
    },
}

/// Deploying an operator set into a container failed.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("operator {operator} references unknown implementation {kind}")]
    UnknownOperator { operator: OperatorId, kind: String },
    #[error("adapter {adapter} references unknown implementation {kind}")]
    UnknownAdapter { adapter: AdapterId, kind: String },
    #[error("constructing {id} failed: {reason}")]
    Construction { id: String, reason: String },
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error("stream {stream} cannot be wired: {reason}")]
    Wiring { stream: StreamId, reason: String },
}

impl DeployError {
    /// Restore failures need operator-level intervention, except a store that
    /// was only briefly unreachable or a checkpoint retired since the starting
    /// window was chosen. Both are retried with a freshly computed window.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            DeployError::Restore(RestoreError::Unavailable { source, .. }) => {
                !(source.is_transient() || matches!(source, StoreError::MissingWindow { .. }))
            }
            DeployError::Restore(_) => true,
            _ => false,
        }
    }
}

/// Violations of window ordering, and stalls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window {open} is still open")]
    Unclosed { open: WindowId },
    #[error("window {requested} does not advance past {current}")]
    Regression {
        requested: WindowId,
        current: WindowId,
    },
    #[error("window {window} stalled; waiting on {pending:?}")]
    Stalled {
        window: WindowId,
        pending: Vec<OperatorId>,
    },
    #[error("{operator}: {event} for window {window} out of order (state {state})")]
    OutOfOrder {
        operator: OperatorId,
        event: &'static str,
        window: WindowId,
        state: String,
    },
}

/// An operator's tuple handling (or lifecycle hook) returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operator {operator} faulted in window {window}: {message}")]
pub struct OperatorFault {
    pub operator: OperatorId,
    pub window: WindowId,
    pub message: String,
}

/// Failure of a lifecycle call on an operator runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Fault(#[from] OperatorFault),
}

/// Graph validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no operators")]
    Empty,
    #[error("duplicate id {0}")]
    Duplicate(String),
    #[error("{owner} references unknown operator {operator}")]
    UnknownEndpoint { owner: String, operator: OperatorId },
    #[error("graph contains a cycle through {0:?}")]
    Cycle(Vec<OperatorId>),
    #[error("container count must be greater than 0")]
    NoContainers,
}
