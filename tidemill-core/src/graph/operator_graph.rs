use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::types::{AdapterId, OperatorId, Properties, StreamId, StreamLocality};

/// An operator in the logical graph. `kind` names a registered implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDef {
    pub id: OperatorId,
    pub kind: String,
    pub properties: Properties,
}

impl OperatorDef {
    pub fn new(id: impl Into<OperatorId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A stream edge: the output of `source` feeds the input of `sink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDef {
    pub id: StreamId,
    pub source: OperatorId,
    pub sink: OperatorId,
    pub locality: StreamLocality,
}

/// External input feeding one operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAdapterDef {
    pub id: AdapterId,
    pub kind: String,
    pub properties: Properties,
    pub target: OperatorId,
}

impl InputAdapterDef {
    pub fn new(
        id: impl Into<AdapterId>,
        kind: impl Into<String>,
        target: impl Into<OperatorId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            properties: Properties::new(),
            target: target.into(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// External output consuming one operator's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAdapterDef {
    pub id: AdapterId,
    pub kind: String,
    pub properties: Properties,
    pub source: OperatorId,
}

impl OutputAdapterDef {
    pub fn new(
        id: impl Into<AdapterId>,
        kind: impl Into<String>,
        source: impl Into<OperatorId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            properties: Properties::new(),
            source: source.into(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Resolved operator graph. Immutable once handed to the master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorGraph {
    pub operators: Vec<OperatorDef>,
    pub streams: Vec<StreamDef>,
    pub inputs: Vec<InputAdapterDef>,
    pub outputs: Vec<OutputAdapterDef>,
}

impl OperatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operator(mut self, def: OperatorDef) -> Self {
        self.operators.push(def);
        self
    }

    pub fn stream(
        mut self,
        id: impl Into<StreamId>,
        source: impl Into<OperatorId>,
        sink: impl Into<OperatorId>,
        locality: StreamLocality,
    ) -> Self {
        self.streams.push(StreamDef {
            id: id.into(),
            source: source.into(),
            sink: sink.into(),
            locality,
        });
        self
    }

    pub fn input(mut self, def: InputAdapterDef) -> Self {
        self.inputs.push(def);
        self
    }

    pub fn output(mut self, def: OutputAdapterDef) -> Self {
        self.outputs.push(def);
        self
    }

    pub fn find_operator(&self, id: &str) -> Option<&OperatorDef> {
        self.operators.iter().find(|op| op.id == id)
    }

    /// Check ids, endpoints and acyclicity.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.operators.is_empty() {
            return Err(GraphError::Empty);
        }
        let mut seen = HashSet::new();
        let ids = self
            .operators
            .iter()
            .map(|o| &o.id)
            .chain(self.streams.iter().map(|s| &s.id))
            .chain(self.inputs.iter().map(|a| &a.id))
            .chain(self.outputs.iter().map(|a| &a.id));
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(GraphError::Duplicate(id.clone()));
            }
        }

        let operators: HashSet<&str> = self.operators.iter().map(|o| o.id.as_str()).collect();
        let check = |owner: &str, operator: &str| {
            if operators.contains(operator) {
                Ok(())
            } else {
                Err(GraphError::UnknownEndpoint {
                    owner: owner.to_string(),
                    operator: operator.to_string(),
                })
            }
        };
        for stream in &self.streams {
            check(&stream.id, &stream.source)?;
            check(&stream.id, &stream.sink)?;
        }
        for input in &self.inputs {
            check(&input.id, &input.target)?;
        }
        for output in &self.outputs {
            check(&output.id, &output.source)?;
        }

        self.topo_order().map(|_| ())
    }

    /// Topological order of operator ids (Kahn's algorithm, ties broken by id).
    pub fn topo_order(&self) -> Result<Vec<OperatorId>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut adj: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for op in &self.operators {
            in_degree.entry(op.id.as_str()).or_insert(0);
            adj.entry(op.id.as_str()).or_default();
        }
        for stream in &self.streams {
            *in_degree.entry(stream.sink.as_str()).or_insert(0) += 1;
            adj.entry(stream.source.as_str())
                .or_default()
                .push(stream.sink.as_str());
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for next in adj.get(node).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            let remaining = in_degree
                .into_iter()
                .filter(|(id, _)| !order.iter().any(|o| o == id))
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(GraphError::Cycle(remaining));
        }
        Ok(order)
    }

    /// Streams whose source is `operator`.
    pub fn downstream(&self, operator: &str) -> Vec<&StreamDef> {
        self.streams.iter().filter(|s| s.source == operator).collect()
    }

    /// Streams whose sink is `operator`.
    pub fn upstream(&self, operator: &str) -> Vec<&StreamDef> {
        self.streams.iter().filter(|s| s.sink == operator).collect()
    }
}
