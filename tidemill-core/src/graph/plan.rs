//! Partitioning an operator graph into container-sized operator sets.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::{InputAdapterDef, OperatorDef, OperatorGraph, OutputAdapterDef, StreamDef};
use crate::types::{OperatorId, StreamLocality};

/// Everything one container needs from the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSet {
    /// Operators in topological order.
    pub operators: Vec<OperatorDef>,
    /// Streams with at least one end inside the set.
    pub streams: Vec<StreamDef>,
    pub inputs: Vec<InputAdapterDef>,
    pub outputs: Vec<OutputAdapterDef>,
}

impl OperatorSet {
    pub fn operator_ids(&self) -> Vec<OperatorId> {
        self.operators.iter().map(|op| op.id.clone()).collect()
    }
}

/// Group operators so that inline streams never cross a container boundary, then
/// spread groups round-robin over at most `num_containers` containers.
pub fn plan_containers(
    graph: &OperatorGraph,
    num_containers: usize,
) -> Result<Vec<Vec<OperatorId>>, GraphError> {
    if num_containers == 0 {
        return Err(GraphError::NoContainers);
    }
    graph.validate()?;
    let order = graph.topo_order()?;
    let index: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut parent: Vec<usize> = (0..order.len()).collect();
    for stream in &graph.streams {
        if stream.locality == StreamLocality::Inline {
            union(&mut parent, index[stream.source.as_str()], index[stream.sink.as_str()]);
        }
    }

    // Groups keyed by root, in order of their first operator.
    let mut groups: BTreeMap<usize, Vec<OperatorId>> = BTreeMap::new();
    let mut first_seen: HashMap<usize, usize> = HashMap::new();
    for (i, id) in order.iter().enumerate() {
        let root = find(&mut parent, i);
        let key = *first_seen.entry(root).or_insert(i);
        groups.entry(key).or_default().push(id.clone());
    }

    let mut containers: Vec<Vec<OperatorId>> = vec![Vec::new(); num_containers.min(groups.len())];
    for (cursor, (_, members)) in groups.into_iter().enumerate() {
        let slot = cursor % containers.len();
        containers[slot].extend(members);
    }
    for members in &mut containers {
        members.sort_by_key(|id| index[id.as_str()]);
    }
    Ok(containers)
}

/// Slice the graph down to the pieces a container hosting `operators` needs.
pub fn operator_set(graph: &OperatorGraph, operators: &[OperatorId]) -> Result<OperatorSet, GraphError> {
    let order = graph.topo_order()?;
    let members: Vec<&OperatorId> = order.iter().filter(|id| operators.contains(id)).collect();
    let contains = |id: &OperatorId| operators.contains(id);
    Ok(OperatorSet {
        operators: members
            .into_iter()
            .filter_map(|id| graph.find_operator(id).cloned())
            .collect(),
        streams: graph
            .streams
            .iter()
            .filter(|s| contains(&s.source) || contains(&s.sink))
            .cloned()
            .collect(),
        inputs: graph
            .inputs
            .iter()
            .filter(|a| contains(&a.target))
            .cloned()
            .collect(),
        outputs: graph
            .outputs
            .iter()
            .filter(|a| contains(&a.source))
            .cloned()
            .collect(),
    })
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut cur = i;
    while parent[cur] != root {
        let next = parent[cur];
        parent[cur] = root;
        cur = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Keep the earlier operator as root.
        let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[merge] = keep;
    }
}
