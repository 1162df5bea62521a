use super::*;

#[derive(Debug, Default)]
struct OperatorCheckpoints {
    records: BTreeMap<WindowId, CheckpointRecord>,
    epoch: Epoch,
}

/// In-memory checkpoint store for tests and single-process clusters.
///
/// The outer map is only write-locked to add a new operator; each operator's
/// records sit behind their own mutex.
pub struct InMemoryCheckpointStore {
    operators: RwLock<HashMap<OperatorId, Arc<Mutex<OperatorCheckpoints>>>>,
    retained: usize,
}

impl InMemoryCheckpointStore {
    pub fn new(retained: usize) -> Self {
        Self {
            operators: RwLock::new(HashMap::new()),
            retained: retained.max(1),
        }
    }

    fn entry(&self, operator: &str) -> Arc<Mutex<OperatorCheckpoints>> {
        if let Some(entry) = self
            .operators
            .read()
            .expect("checkpoint operators poisoned")
            .get(operator)
        {
            return Arc::clone(entry);
        }
        let mut guard = self
            .operators
            .write()
            .expect("checkpoint operators poisoned");
        Arc::clone(guard.entry(operator.to_string()).or_default())
    }

    fn existing(&self, operator: &str) -> Result<Arc<Mutex<OperatorCheckpoints>>, StoreError> {
        self.operators
            .read()
            .expect("checkpoint operators poisoned")
            .get(operator)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                operator: operator.to_string(),
            })
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new(3)
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn put(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        let entry = self.entry(&record.operator);
        let mut guard = entry.lock().expect("operator checkpoints poisoned");
        let stored: Vec<WindowId> = guard.records.keys().copied().collect();
        let superseded = plan_put(&record, &stored, guard.epoch)?;

        guard.epoch = guard.epoch.max(record.epoch);
        guard.records.insert(record.window, record);
        for window in superseded {
            guard.records.remove(&window);
        }
        let stored: Vec<WindowId> = guard.records.keys().copied().collect();
        for window in retire_beyond(&stored, self.retained) {
            guard.records.remove(&window);
        }
        Ok(())
    }

    fn get(&self, operator: &str, window: WindowId) -> Result<CheckpointRecord, StoreError> {
        let entry = self.existing(operator)?;
        let guard = entry.lock().expect("operator checkpoints poisoned");
        guard
            .records
            .get(&window)
            .cloned()
            .ok_or_else(|| StoreError::MissingWindow {
                operator: operator.to_string(),
                window,
            })
    }

    fn latest(&self, operator: &str) -> Result<WindowId, StoreError> {
        let entry = self.existing(operator)?;
        let guard = entry.lock().expect("operator checkpoints poisoned");
        guard
            .records
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| StoreError::NotFound {
                operator: operator.to_string(),
            })
    }

    fn windows(&self, operator: &str) -> Result<Vec<WindowId>, StoreError> {
        match self.existing(operator) {
            Ok(entry) => Ok(entry
                .lock()
                .expect("operator checkpoints poisoned")
                .records
                .keys()
                .copied()
                .collect()),
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
