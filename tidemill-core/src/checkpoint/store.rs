use super::*;

/// Durable keyed storage from (operator, window) to a state blob.
///
/// Implementations must accept concurrent writers for different operators
/// without cross-operator locking. For one operator, windows are monotonic and
/// the most recent record is only retired after a newer one is written.
pub trait CheckpointStore: Send + Sync {
    /// Write a record, then retire records beyond the retention limit.
    ///
    /// Rejects windows older than the latest stored one (`NotMonotonic`) and
    /// writers from an older epoch than the store has seen (`Fenced`).
    /// Re-writing the latest window replaces it.
    fn put(&self, record: CheckpointRecord) -> Result<(), StoreError>;

    fn get(&self, operator: &str, window: WindowId) -> Result<CheckpointRecord, StoreError>;

    /// Highest stored window; `NotFound` if the operator has none.
    fn latest(&self, operator: &str) -> Result<WindowId, StoreError>;

    /// Retained windows, ascending.
    fn windows(&self, operator: &str) -> Result<Vec<WindowId>, StoreError>;

    /// Highest stored window `<= window`.
    fn latest_at_or_before(&self, operator: &str, window: WindowId) -> Result<WindowId, StoreError> {
        self.windows(operator)?
            .into_iter()
            .rev()
            .find(|w| *w <= window)
            .ok_or_else(|| StoreError::MissingWindow {
                operator: operator.to_string(),
                window,
            })
    }
}

/// Shared precondition check for `put`.
///
/// `stored` are the operator's retained windows (ascending) and `epoch` the
/// highest writer epoch seen so far. Returns windows the write supersedes: a
/// writer from a newer epoch abandons the old timeline at and after its window.
pub(crate) fn plan_put(
    record: &CheckpointRecord,
    stored: &[WindowId],
    epoch: Epoch,
) -> Result<Vec<WindowId>, StoreError> {
    if record.epoch < epoch {
        return Err(StoreError::Fenced {
            operator: record.operator.clone(),
            epoch: record.epoch,
            current: epoch,
        });
    }
    if record.epoch > epoch {
        return Ok(stored
            .iter()
            .copied()
            .filter(|w| *w > record.window)
            .collect());
    }
    if let Some(&latest) = stored.last()
        && record.window < latest
    {
        return Err(StoreError::NotMonotonic {
            operator: record.operator.clone(),
            window: record.window,
            latest,
        });
    }
    Ok(Vec::new())
}

/// Windows to retire so that only the `retained` newest remain.
pub(crate) fn retire_beyond(stored: &[WindowId], retained: usize) -> Vec<WindowId> {
    let keep = retained.max(1);
    if stored.len() <= keep {
        return Vec::new();
    }
    stored[..stored.len() - keep].to_vec()
}
