//! Named constructors for operators and adapters, resolved at deploy time.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapter::{GeneratorInputAdapter, InputAdapter, LogOutputAdapter, OutputAdapter};
use crate::error::DeployError;
use crate::graph::{InputAdapterDef, OperatorDef, OutputAdapterDef};
use crate::operator::{CounterOperator, EchoOperator, FailingOperator, Operator};

pub type OperatorConstructor = Arc<dyn Fn(&OperatorDef) -> Result<Box<dyn Operator>> + Send + Sync>;
pub type InputConstructor =
    Arc<dyn Fn(&InputAdapterDef) -> Result<Box<dyn InputAdapter>> + Send + Sync>;
pub type OutputConstructor =
    Arc<dyn Fn(&OutputAdapterDef) -> Result<Box<dyn OutputAdapter>> + Send + Sync>;

/// Explicit registry of named constructors. Cheap to clone; clones share constructors.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    operators: HashMap<String, OperatorConstructor>,
    inputs: HashMap<String, InputConstructor>,
    outputs: HashMap<String, OutputConstructor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `builtin::*` components.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_operator(EchoOperator::KIND, |_| Ok(Box::new(EchoOperator::default())));
        registry.register_operator(CounterOperator::KIND, |_| {
            Ok(Box::new(CounterOperator::default()))
        });
        registry.register_operator(FailingOperator::KIND, |_| {
            Ok(Box::new(FailingOperator::default()))
        });
        registry.register_input(GeneratorInputAdapter::KIND, |def| {
            let per_window = match def.properties.get("tuples_per_window") {
                Some(v) => v
                    .parse()
                    .with_context(|| format!("tuples_per_window must be an integer, got {v}"))?,
                None => 10,
            };
            Ok(Box::new(GeneratorInputAdapter::new(per_window)))
        });
        registry.register_output(LogOutputAdapter::KIND, |def| {
            Ok(Box::new(LogOutputAdapter::new(def.id.clone())))
        });
        registry
    }

    pub fn register_operator<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&OperatorDef) -> Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        self.operators.insert(kind.into(), Arc::new(constructor));
    }

    pub fn register_input<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&InputAdapterDef) -> Result<Box<dyn InputAdapter>> + Send + Sync + 'static,
    {
        self.inputs.insert(kind.into(), Arc::new(constructor));
    }

    pub fn register_output<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&OutputAdapterDef) -> Result<Box<dyn OutputAdapter>> + Send + Sync + 'static,
    {
        self.outputs.insert(kind.into(), Arc::new(constructor));
    }

    pub fn knows_operator(&self, kind: &str) -> bool {
        self.operators.contains_key(kind)
    }

    pub fn create_operator(&self, def: &OperatorDef) -> Result<Box<dyn Operator>, DeployError> {
        let constructor =
            self.operators
                .get(&def.kind)
                .ok_or_else(|| DeployError::UnknownOperator {
                    operator: def.id.clone(),
                    kind: def.kind.clone(),
                })?;
        constructor(def).map_err(|e| DeployError::Construction {
            id: def.id.clone(),
            reason: format!("{e:#}"),
        })
    }

    pub fn create_input(&self, def: &InputAdapterDef) -> Result<Box<dyn InputAdapter>, DeployError> {
        let constructor = self
            .inputs
            .get(&def.kind)
            .ok_or_else(|| DeployError::UnknownAdapter {
                adapter: def.id.clone(),
                kind: def.kind.clone(),
            })?;
        constructor(def).map_err(|e| DeployError::Construction {
            id: def.id.clone(),
            reason: format!("{e:#}"),
        })
    }

    pub fn create_output(
        &self,
        def: &OutputAdapterDef,
    ) -> Result<Box<dyn OutputAdapter>, DeployError> {
        let constructor = self
            .outputs
            .get(&def.kind)
            .ok_or_else(|| DeployError::UnknownAdapter {
                adapter: def.id.clone(),
                kind: def.kind.clone(),
            })?;
        constructor(def).map_err(|e| DeployError::Construction {
            id: def.id.clone(),
            reason: format!("{e:#}"),
        })
    }
}
