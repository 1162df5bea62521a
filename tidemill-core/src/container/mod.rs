//! Worker containers.
//!
//! A container hosts one operator set. [`ContainerRuntime`] is the
//! single-threaded engine (window lifecycle, queues, checkpoints, control
//! requests); [`ContainerHandle`] runs it on a dedicated thread and keeps the
//! heartbeat to the master going through a [`MasterLink`].

mod handle;
mod link;
mod runtime;

pub use handle::ContainerHandle;
pub use link::MasterLink;
pub use runtime::{ContainerRuntime, TickOutcome};

#[cfg(test)]
#[path = "tests/container_tests.rs"]
mod tests;
