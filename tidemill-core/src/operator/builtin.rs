use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::types::{Tuple, WindowId};

use super::{Operator, OperatorContext};

/// Pass-through operator. Its state is the number of tuples it has forwarded.
#[derive(Debug, Default)]
pub struct EchoOperator {
    state: EchoState,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EchoState {
    forwarded: u64,
}

impl EchoOperator {
    pub const KIND: &'static str = "builtin::echo";

    pub fn forwarded(&self) -> u64 {
        self.state.forwarded
    }
}

impl Operator for EchoOperator {
    fn process(&mut self, tuple: Tuple, output: &mut Vec<Tuple>) -> Result<()> {
        self.state.forwarded += 1;
        output.push(tuple);
        Ok(())
    }

    fn checkpoint_state(&self) -> Result<Vec<u8>> {
        Ok(codec::encode(&self.state)?)
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<()> {
        self.state = codec::decode(state)?;
        Ok(())
    }
}

/// Counts tuples and emits `(window, count_in_window, running_total)` at each window end.
#[derive(Debug, Default)]
pub struct CounterOperator {
    in_window: u64,
    total: u64,
}

impl CounterOperator {
    pub const KIND: &'static str = "builtin::counter";
}

impl Operator for CounterOperator {
    fn begin_window(&mut self, _window: WindowId) -> Result<()> {
        self.in_window = 0;
        Ok(())
    }

    fn process(&mut self, _tuple: Tuple, _output: &mut Vec<Tuple>) -> Result<()> {
        self.in_window += 1;
        self.total += 1;
        Ok(())
    }

    fn end_window(&mut self, window: WindowId, output: &mut Vec<Tuple>) -> Result<()> {
        output.push(codec::encode(&(window, self.in_window, self.total))?);
        Ok(())
    }

    fn checkpoint_state(&self) -> Result<Vec<u8>> {
        Ok(codec::encode(&self.total)?)
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<()> {
        self.total = codec::decode(state)?;
        Ok(())
    }
}

/// Pass-through that faults on the `fail_on`-th tuple it sees (1-based).
///
/// `fail_on` can be changed at runtime through SET_PROPERTY; `0` disables the fault.
#[derive(Debug, Default)]
pub struct FailingOperator {
    seen: u64,
    fail_on: u64,
}

impl FailingOperator {
    pub const KIND: &'static str = "builtin::fail";
}

impl Operator for FailingOperator {
    fn setup(&mut self, context: &OperatorContext) -> Result<()> {
        if let Some(value) = context.properties.get("fail_on") {
            self.set_property("fail_on", value)?;
        }
        Ok(())
    }

    fn process(&mut self, tuple: Tuple, output: &mut Vec<Tuple>) -> Result<()> {
        self.seen += 1;
        if self.fail_on != 0 && self.seen == self.fail_on {
            return Err(anyhow!("injected fault at tuple {}", self.seen));
        }
        output.push(tuple);
        Ok(())
    }

    fn checkpoint_state(&self) -> Result<Vec<u8>> {
        Ok(codec::encode(&self.seen)?)
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<()> {
        self.seen = codec::decode(state)?;
        Ok(())
    }

    fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "fail_on" => {
                self.fail_on = value
                    .parse()
                    .with_context(|| format!("fail_on must be an integer, got {value}"))?;
                Ok(())
            }
            other => Err(anyhow!("unsupported property {other}")),
        }
    }
}
