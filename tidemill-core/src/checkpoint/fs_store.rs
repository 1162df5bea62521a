use super::*;

use crate::codec;

const EPOCH_FILE: &str = "epoch";
const WINDOW_PREFIX: &str = "win-";
const WINDOW_SUFFIX: &str = ".bin";

/// File-system checkpoint store.
///
/// Layout: `<base>/<operator>/win-<window>.bin` holds one bincode-encoded
/// [`CheckpointRecord`], `<base>/<operator>/epoch` the highest writer epoch.
/// Records are written to a temporary file and renamed into place, so a reader
/// never observes a partial checkpoint.
pub struct FsCheckpointStore {
    base_path: PathBuf,
    retained: usize,
    locks: Mutex<HashMap<OperatorId, Arc<Mutex<()>>>>,
}

impl FsCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>, retained: usize) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            retained: retained.max(1),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Operators with at least one directory under the base path, sorted.
    pub fn operators(&self) -> Result<Vec<OperatorId>, StoreError> {
        let mut operators = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                operators.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        operators.sort();
        Ok(operators)
    }

    fn operator_dir(&self, operator: &str) -> Result<PathBuf, StoreError> {
        if operator.is_empty()
            || operator.contains('/')
            || operator.contains('\\')
            || operator.contains("..")
        {
            return Err(StoreError::Unavailable(format!(
                "operator id {operator:?} cannot be used as a directory name"
            )));
        }
        Ok(self.base_path.join(operator))
    }

    fn window_path(dir: &Path, window: WindowId) -> PathBuf {
        dir.join(format!("{WINDOW_PREFIX}{window:020}{WINDOW_SUFFIX}"))
    }

    fn lock_for(&self, operator: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("checkpoint locks poisoned");
        Arc::clone(locks.entry(operator.to_string()).or_default())
    }

    fn read_epoch(dir: &Path) -> Result<Epoch, StoreError> {
        match fs::read_to_string(dir.join(EPOCH_FILE)) {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|e| StoreError::Unavailable(format!("corrupt epoch file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn list_windows(dir: &Path) -> Result<Vec<WindowId>, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut windows = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name
                .strip_prefix(WINDOW_PREFIX)
                .and_then(|rest| rest.strip_suffix(WINDOW_SUFFIX))
                && let Ok(window) = id.parse::<WindowId>()
            {
                windows.push(window);
            }
        }
        windows.sort_unstable();
        Ok(windows)
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn put(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        let dir = self.operator_dir(&record.operator)?;
        let lock = self.lock_for(&record.operator);
        let _guard = lock.lock().expect("operator checkpoint lock poisoned");

        fs::create_dir_all(&dir)?;
        let stored = Self::list_windows(&dir)?;
        let epoch = Self::read_epoch(&dir)?;
        let superseded = plan_put(&record, &stored, epoch)?;

        if record.epoch > epoch {
            Self::write_atomic(&dir.join(EPOCH_FILE), record.epoch.to_string().as_bytes())?;
        }
        let bytes = codec::encode(&record)?;
        Self::write_atomic(&Self::window_path(&dir, record.window), &bytes)?;

        for window in superseded {
            fs::remove_file(Self::window_path(&dir, window))?;
        }
        let stored = Self::list_windows(&dir)?;
        for window in retire_beyond(&stored, self.retained) {
            fs::remove_file(Self::window_path(&dir, window))?;
        }
        Ok(())
    }

    fn get(&self, operator: &str, window: WindowId) -> Result<CheckpointRecord, StoreError> {
        let dir = self.operator_dir(operator)?;
        let bytes = match fs::read(Self::window_path(&dir, window)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingWindow {
                    operator: operator.to_string(),
                    window,
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(codec::decode(&bytes)?)
    }

    fn latest(&self, operator: &str) -> Result<WindowId, StoreError> {
        self.windows(operator)?
            .last()
            .copied()
            .ok_or_else(|| StoreError::NotFound {
                operator: operator.to_string(),
            })
    }

    fn windows(&self, operator: &str) -> Result<Vec<WindowId>, StoreError> {
        let dir = self.operator_dir(operator)?;
        Self::list_windows(&dir)
    }
}
