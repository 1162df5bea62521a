use super::*;

/// One operator's serialized state as of the end of `window`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub operator: OperatorId,
    pub window: WindowId,
    /// Deployment epoch of the writer, used to fence stale containers.
    pub epoch: Epoch,
    pub blob: Vec<u8>,
    pub timestamp_ms: i64,
}

impl CheckpointRecord {
    pub fn new(operator: impl Into<OperatorId>, window: WindowId, epoch: Epoch, blob: Vec<u8>) -> Self {
        Self {
            operator: operator.into(),
            window,
            epoch,
            blob,
            timestamp_ms: current_unix_millis(),
        }
    }
}
