//! Operator capability contract.
//!
//! User logic plugs into a fixed window lifecycle by implementing [`Operator`];
//! the runtime ([`crate::node::OperatorRuntime`]) composes one instance and
//! drives it. Implementations are constructed by name through
//! [`crate::registry::ComponentRegistry`].

use anyhow::{Result, anyhow};

use crate::types::{OperatorId, Properties, Tuple, WindowId};

mod builtin;

pub use builtin::*;

/// Deploy-time information handed to [`Operator::setup`].
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub id: OperatorId,
    pub properties: Properties,
    /// State reflects the end of this window; the first processed window is the next one.
    pub starting_window: WindowId,
}

pub trait Operator: Send {
    fn setup(&mut self, _context: &OperatorContext) -> Result<()> {
        Ok(())
    }

    fn begin_window(&mut self, _window: WindowId) -> Result<()> {
        Ok(())
    }

    /// Handle one input tuple, pushing any results to `output`.
    fn process(&mut self, tuple: Tuple, output: &mut Vec<Tuple>) -> Result<()>;

    /// Window boundary; may flush per-window results.
    fn end_window(&mut self, _window: WindowId, _output: &mut Vec<Tuple>) -> Result<()> {
        Ok(())
    }

    fn teardown(&mut self) {}

    /// Serialize state. Stateless operators keep the empty default.
    fn checkpoint_state(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Restore state produced by [`Operator::checkpoint_state`].
    fn restore_state(&mut self, _state: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Apply a SET_PROPERTY control request.
    fn set_property(&mut self, key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("unsupported property {key}"))
    }
}
