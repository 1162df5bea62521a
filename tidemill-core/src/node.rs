//! Operator runtime: one operator instance, its queues, and its window lifecycle.
//!
//! The runtime composes a [`Operator`] implementation and enforces the window
//! protocol around it:
//!
//! ```text
//! deploy(k) -> begin(k+1) -> pump* -> end(k+1) -> [checkpoint] -> begin(k+2) -> ...
//! ```
//!
//! Output that cannot be pushed because a downstream queue is full stays in a
//! per-port pending buffer, and no further input is pulled until it drains.

use std::collections::VecDeque;

use anyhow::Result;

use crate::checkpoint::CheckpointStore;
use crate::error::{DeployError, NodeError, OperatorFault, RestoreError, StoreError, WindowError};
use crate::graph::OperatorDef;
use crate::operator::{Operator, OperatorContext};
use crate::protocol::OperatorStatus;
use crate::queue::{PushError, QueueReceiver, QueueSender};
use crate::registry::ComponentRegistry;
use crate::types::{INITIAL_WINDOW, OperatorId, StreamId, Tuple, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Deployed,
    InWindow,
    BetweenWindows,
    Faulted,
    TornDown,
}

/// Result of one [`OperatorRuntime::pump`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// No buffered input left and all output flushed.
    Drained,
    /// Processed this many tuples and hit the budget; call again.
    Progress(usize),
    /// A downstream queue is full; input intake is halted until it drains.
    Blocked,
    /// Faulted or torn down. Nothing more will happen.
    Stopped,
}

struct InputPort {
    stream: StreamId,
    receiver: QueueReceiver,
    /// Producer lives in the same container, so the window waits for this queue to drain.
    local: bool,
}

struct OutputPort {
    stream: StreamId,
    sender: QueueSender,
    pending: VecDeque<Tuple>,
}

pub struct OperatorRuntime {
    id: OperatorId,
    operator: Box<dyn Operator>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    next_input: usize,
    state: RuntimeState,
    starting_window: WindowId,
    current_window: WindowId,
    last_checkpoint: Option<WindowId>,
    cached_checkpoint: Option<(WindowId, Vec<u8>)>,
    fault: Option<OperatorFault>,
}

impl OperatorRuntime {
    /// Instantiate `def` and restore the latest checkpoint at or before `starting_window`.
    ///
    /// Deploying at [`INITIAL_WINDOW`], or an operator without any stored checkpoint,
    /// starts from empty state. One that has checkpoints, but none usable for
    /// `starting_window`, fails to deploy.
    pub fn deploy(
        def: &OperatorDef,
        starting_window: WindowId,
        registry: &ComponentRegistry,
        store: &dyn CheckpointStore,
    ) -> Result<Self, DeployError> {
        let mut operator = registry.create_operator(def)?;
        let context = OperatorContext {
            id: def.id.clone(),
            properties: def.properties.clone(),
            starting_window,
        };
        operator
            .setup(&context)
            .map_err(|e| DeployError::Construction {
                id: def.id.clone(),
                reason: format!("{e:#}"),
            })?;

        let restored = restore(operator.as_mut(), &def.id, starting_window, store)?;
        if let Some(window) = restored {
            tracing::info!(
                "operator {} restored checkpoint of window {} (starting window {})",
                def.id,
                window,
                starting_window
            );
        }

        Ok(Self {
            id: def.id.clone(),
            operator,
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_input: 0,
            state: RuntimeState::Deployed,
            starting_window,
            current_window: starting_window,
            last_checkpoint: restored,
            cached_checkpoint: None,
            fault: None,
        })
    }

    pub fn attach_input(&mut self, stream: impl Into<StreamId>, receiver: QueueReceiver, local: bool) {
        self.inputs.push(InputPort {
            stream: stream.into(),
            receiver,
            local,
        });
    }

    pub fn attach_output(&mut self, stream: impl Into<StreamId>, sender: QueueSender) {
        self.outputs.push(OutputPort {
            stream: stream.into(),
            sender,
            pending: VecDeque::new(),
        });
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn starting_window(&self) -> WindowId {
        self.starting_window
    }

    pub fn current_window(&self) -> WindowId {
        self.current_window
    }

    pub fn last_checkpoint_window(&self) -> Option<WindowId> {
        self.last_checkpoint
    }

    pub fn fault(&self) -> Option<&OperatorFault> {
        self.fault.as_ref()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, RuntimeState::Faulted | RuntimeState::TornDown)
    }

    pub fn begin_window(&mut self, window: WindowId) -> Result<(), NodeError> {
        let in_order = matches!(
            self.state,
            RuntimeState::Deployed | RuntimeState::BetweenWindows
        ) && window > self.current_window;
        if !in_order {
            return Err(self.out_of_order("begin_window", window).into());
        }
        self.current_window = window;
        self.state = RuntimeState::InWindow;
        if let Err(e) = self.operator.begin_window(window) {
            return Err(self.record_fault(e).into());
        }
        Ok(())
    }

    /// Close the current window. Output produced by the operator's end hook is
    /// queued like any other output.
    pub fn end_window(&mut self, window: WindowId) -> Result<(), NodeError> {
        if self.state != RuntimeState::InWindow || window != self.current_window {
            return Err(self.out_of_order("end_window", window).into());
        }
        let mut out = Vec::new();
        if let Err(e) = self.operator.end_window(window, &mut out) {
            return Err(self.record_fault(e).into());
        }
        self.enqueue(out);
        self.state = RuntimeState::BetweenWindows;
        Ok(())
    }

    /// Process up to `budget` input tuples.
    ///
    /// Outside a window this only flushes pending output.
    pub fn pump(&mut self, budget: usize) -> PumpOutcome {
        if !self.is_active() {
            return PumpOutcome::Stopped;
        }
        let mut processed = 0;
        loop {
            if !self.flush() {
                return PumpOutcome::Blocked;
            }
            if self.state != RuntimeState::InWindow {
                return PumpOutcome::Drained;
            }
            if processed >= budget {
                return PumpOutcome::Progress(processed);
            }
            let Some(tuple) = self.next_tuple() else {
                return PumpOutcome::Drained;
            };
            let mut out = Vec::new();
            if let Err(e) = self.operator.process(tuple, &mut out) {
                self.record_fault(e);
                return PumpOutcome::Stopped;
            }
            self.enqueue(out);
            processed += 1;
        }
    }

    /// No pending output and nothing left in queues fed from inside the container.
    pub fn is_drained(&self) -> bool {
        self.outputs.iter().all(|p| p.pending.is_empty())
            && self
                .inputs
                .iter()
                .filter(|p| p.local)
                .all(|p| p.receiver.is_empty())
    }

    /// Serialize operator state as of the end of the current window.
    ///
    /// Only valid at a window boundary. Repeated calls for the same window return
    /// the identical blob without consulting the operator again.
    pub fn checkpoint(&mut self) -> Result<(WindowId, Vec<u8>), NodeError> {
        if !matches!(
            self.state,
            RuntimeState::Deployed | RuntimeState::BetweenWindows
        ) {
            return Err(self.out_of_order("checkpoint", self.current_window).into());
        }
        let window = self.current_window;
        if let Some((cached, blob)) = &self.cached_checkpoint
            && *cached == window
        {
            return Ok((window, blob.clone()));
        }
        let blob = match self.operator.checkpoint_state() {
            Ok(blob) => blob,
            Err(e) => return Err(self.record_fault(e).into()),
        };
        self.cached_checkpoint = Some((window, blob.clone()));
        self.last_checkpoint = Some(window);
        Ok((window, blob))
    }

    /// Apply a SET_PROPERTY request. A rejected property is not an operator fault.
    pub fn apply_property(&mut self, key: &str, value: &str) -> Result<()> {
        self.operator.set_property(key, value)
    }

    pub fn teardown(&mut self) {
        if self.state == RuntimeState::TornDown {
            return;
        }
        self.operator.teardown();
        let dropped: usize = self.outputs.iter().map(|p| p.pending.len()).sum();
        if dropped > 0 {
            tracing::warn!(
                "operator {} torn down with {} unflushed tuples",
                self.id,
                dropped
            );
        }
        self.outputs.clear();
        self.inputs.clear();
        self.state = RuntimeState::TornDown;
    }

    pub fn queue_depth(&self) -> usize {
        let inputs: usize = self.inputs.iter().map(|p| p.receiver.len()).sum();
        let pending: usize = self.outputs.iter().map(|p| p.pending.len()).sum();
        inputs + pending
    }

    pub fn status(&self) -> OperatorStatus {
        OperatorStatus {
            operator: self.id.clone(),
            starting_window: self.starting_window,
            current_window: self.current_window,
            last_checkpoint_window: self.last_checkpoint,
            fault: self.fault.as_ref().map(|f| f.message.clone()),
            queue_depth: self.queue_depth(),
            shut_down: self.state == RuntimeState::TornDown,
        }
    }

    fn next_tuple(&mut self) -> Option<Tuple> {
        let n = self.inputs.len();
        for offset in 0..n {
            let index = (self.next_input + offset) % n;
            if let Some(tuple) = self.inputs[index].receiver.try_pop() {
                self.next_input = (index + 1) % n;
                return Some(tuple);
            }
        }
        None
    }

    fn enqueue(&mut self, out: Vec<Tuple>) {
        let Some((last, rest)) = self.outputs.split_last_mut() else {
            return;
        };
        for tuple in out {
            for port in rest.iter_mut() {
                port.pending.push_back(tuple.clone());
            }
            last.pending.push_back(tuple);
        }
    }

    /// Push pending output downstream. Returns whether everything was flushed.
    fn flush(&mut self) -> bool {
        let mut flushed = true;
        for port in &mut self.outputs {
            while let Some(tuple) = port.pending.pop_front() {
                match port.sender.try_push(tuple) {
                    Ok(()) => {}
                    Err(PushError::Full(tuple)) => {
                        port.pending.push_front(tuple);
                        flushed = false;
                        break;
                    }
                    Err(PushError::Closed(_)) => {
                        tracing::warn!(
                            "operator {}: stream {} closed, dropping output",
                            self.id,
                            port.stream
                        );
                        port.pending.clear();
                    }
                }
            }
        }
        flushed
    }

    fn out_of_order(&self, event: &'static str, window: WindowId) -> WindowError {
        WindowError::OutOfOrder {
            operator: self.id.clone(),
            event,
            window,
            state: format!("{:?} at window {}", self.state, self.current_window),
        }
    }

    fn record_fault(&mut self, error: anyhow::Error) -> OperatorFault {
        let fault = OperatorFault {
            operator: self.id.clone(),
            window: self.current_window,
            message: format!("{error:#}"),
        };
        tracing::error!("{}", fault);
        self.state = RuntimeState::Faulted;
        self.fault = Some(fault.clone());
        fault
    }
}

fn restore(
    operator: &mut dyn Operator,
    id: &str,
    starting_window: WindowId,
    store: &dyn CheckpointStore,
) -> Result<Option<WindowId>, RestoreError> {
    let unavailable = |source: StoreError| RestoreError::Unavailable {
        operator: id.to_string(),
        window: starting_window,
        source,
    };
    if starting_window == INITIAL_WINDOW {
        return Ok(None);
    }
    let stored = store.windows(id).map_err(unavailable)?;
    if stored.is_empty() {
        return Ok(None);
    }
    let window = store
        .latest_at_or_before(id, starting_window)
        .map_err(unavailable)?;
    let record = store.get(id, window).map_err(|e| match e {
        StoreError::Codec(codec) => RestoreError::Undecodable {
            operator: id.to_string(),
            window,
            reason: codec.to_string(),
        },
        other => unavailable(other),
    })?;
    operator
        .restore_state(&record.blob)
        .map_err(|e| RestoreError::Undecodable {
            operator: id.to_string(),
            window,
            reason: format!("{e:#}"),
        })?;
    Ok(Some(window))
}

#[cfg(test)]
#[path = "tests/node_tests.rs"]
mod tests;
