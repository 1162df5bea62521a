//! Input/output adapter contract.
//!
//! Adapters connect the graph to the outside world. The engine only relies on
//! the contract: resume at a window, pause, stop, and report where it resumed.

use anyhow::Result;

use crate::types::{Tuple, WindowId};

mod builtin;

pub use builtin::*;

pub trait InputAdapter: Send {
    /// Everything up to and including `window` was already processed; emit from `window + 1`.
    fn resume_from(&mut self, window: WindowId);

    /// Window passed to the most recent [`InputAdapter::resume_from`].
    fn starting_window(&self) -> WindowId;

    fn pause(&mut self);

    fn stop(&mut self);

    /// Next tuple for `window`, or `None` once the window's input is exhausted.
    ///
    /// Paused or stopped adapters return `None`.
    fn poll(&mut self, window: WindowId) -> Option<Tuple>;
}

pub trait OutputAdapter: Send {
    fn resume_from(&mut self, window: WindowId);

    fn pause(&mut self);

    fn stop(&mut self);

    /// Whether the adapter takes tuples right now. A `false` here leaves tuples
    /// queued and backpressures the producing operator.
    fn accepting(&self) -> bool {
        true
    }

    fn write(&mut self, window: WindowId, tuple: Tuple) -> Result<()>;
}
