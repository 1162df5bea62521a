use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Window identifier. Strictly increasing within one container's lifetime.
pub type WindowId = u64;

/// Deployment generation of an operator set. Bumped on every (re)deployment.
pub type Epoch = u64;

/// Correlation id for control requests issued by the master.
pub type RequestId = u64;

/// Heartbeat sequence number, per container.
pub type Sequence = u64;

/// Encoded tuple flowing between operators.
pub type Tuple = Vec<u8>;

pub type OperatorId = String;
pub type AdapterId = String;
pub type StreamId = String;
pub type ContainerId = String;

/// Window the graph starts from. The first window actually processed is `INITIAL_WINDOW + 1`.
pub const INITIAL_WINDOW: WindowId = 0;

/// Whether a stream edge stays inside one container or crosses container boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StreamLocality {
    /// Both ends must be deployed into the same container.
    Inline,
    /// Ends may live in different containers; the queue is owned by the stream bus.
    #[default]
    Networked,
}

/// String properties attached to operators and adapters.
pub type Properties = std::collections::BTreeMap<String, String>;

pub(crate) fn current_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
