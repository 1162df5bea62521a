//! Checkpoint records and durable stores keyed by (operator, window).

use crate::error::StoreError;
use crate::types::{Epoch, OperatorId, WindowId, current_unix_millis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

mod fs_store;
mod memory;
mod record;
mod store;

pub use fs_store::*;
pub use memory::*;
pub use record::*;
pub use store::*;

#[cfg(test)]
#[path = "tests/checkpoint_tests.rs"]
mod tests;
