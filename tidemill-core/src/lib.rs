//! # Tidemill Core
//!
//! Windowed stream processing with a single application master and
//! checkpoint-based recovery.
//!
//! - [`graph`] — The resolved operator graph and its partitioning into
//!   container-sized [`OperatorSet`](graph::OperatorSet)s.
//! - [`operator`] / [`adapter`] — Contracts for user logic and external I/O,
//!   resolved by name through the [`registry`].
//! - [`node`] — [`OperatorRuntime`](node::OperatorRuntime): one operator, its
//!   queues and its window lifecycle.
//! - [`window`] — Lock-step window clock shared by the operators of a container.
//! - [`container`] — Container engine, execution thread and heartbeat task.
//! - [`checkpoint`] — [`CheckpointStore`](checkpoint::CheckpointStore) with
//!   in-memory and filesystem backends.
//! - [`master`] — Container lifecycle, heartbeat supervision, control requests
//!   and recovery.
//! - [`protocol`] — Heartbeat messages and their TCP framing.
//! - [`cluster`] — In-process resource layer running containers next to the master.

pub mod adapter;
pub mod checkpoint;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod graph;
pub mod master;
pub mod node;
pub mod operator;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod types;
pub mod window;
