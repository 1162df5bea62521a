//! Graph-domain modules: the resolved operator graph and its container partitioning.

pub mod operator_graph;
pub mod plan;

pub use operator_graph::*;
pub use plan::*;

#[cfg(test)]
#[path = "tests/graph_tests.rs"]
mod tests;
