use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::WindowConfig;
use crate::error::WindowError;
use crate::types::{INITIAL_WINDOW, OperatorId, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Windows advance only when the driver steps them.
    Manual,
    /// A new window is due every `Duration`.
    Periodic(Duration),
}

#[derive(Debug)]
struct OpenWindow {
    id: WindowId,
    opened_at: Instant,
    closed: HashSet<OperatorId>,
}

/// Logical clock of one container.
///
/// Hands out strictly increasing window ids and tracks which participants have
/// closed the open window. A new window is never opened while the previous one
/// is still open: the clock blocks instead of skipping.
#[derive(Debug)]
pub struct WindowClock {
    mode: ClockMode,
    stall_deadline: Duration,
    participants: Vec<OperatorId>,
    last_closed: WindowId,
    open: Option<OpenWindow>,
    last_opened_at: Option<Instant>,
}

impl WindowClock {
    pub fn new(config: &WindowConfig) -> Self {
        let mode = match config.window_size {
            Some(size) if !size.is_zero() => ClockMode::Periodic(size),
            _ => ClockMode::Manual,
        };
        Self {
            mode,
            stall_deadline: config.stall_deadline,
            participants: Vec::new(),
            last_closed: INITIAL_WINDOW,
            open: None,
            last_opened_at: None,
        }
    }

    /// Clock of a (re)deployed container whose state reflects the end of `window`.
    pub fn starting_after(config: &WindowConfig, window: WindowId) -> Self {
        let mut clock = Self::new(config);
        clock.last_closed = window;
        clock
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Add a participant. Boundary events go to participants in registration order.
    pub fn register(&mut self, operator: impl Into<OperatorId>) {
        let operator = operator.into();
        if !self.participants.contains(&operator) {
            self.participants.push(operator);
        }
    }

    /// Stop waiting on `operator`, e.g. after it was shut down.
    pub fn deregister(&mut self, operator: &str) {
        self.participants.retain(|p| p != operator);
        if let Some(open) = self.open.as_mut() {
            open.closed.remove(operator);
        }
    }

    pub fn participants(&self) -> &[OperatorId] {
        &self.participants
    }

    /// Continue numbering strictly after `window` (recovery).
    pub fn resume_after(&mut self, window: WindowId) -> Result<(), WindowError> {
        if let Some(open) = &self.open {
            return Err(WindowError::Unclosed { open: open.id });
        }
        if window < self.last_closed {
            return Err(WindowError::Regression {
                requested: window,
                current: self.last_closed,
            });
        }
        self.last_closed = window;
        Ok(())
    }

    pub fn last_closed(&self) -> WindowId {
        self.last_closed
    }

    /// Whether `window` has been closed by every participant.
    pub fn is_closed(&self, window: WindowId) -> bool {
        window <= self.last_closed
    }

    pub fn current(&self) -> Option<WindowId> {
        self.open.as_ref().map(|w| w.id)
    }

    /// Whether a periodic clock should open its next window at `now`.
    /// Manual clocks are never due on their own.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.mode {
            ClockMode::Manual => false,
            ClockMode::Periodic(size) => {
                self.open.is_none()
                    && self
                        .last_opened_at
                        .is_none_or(|opened| now.saturating_duration_since(opened) >= size)
            }
        }
    }

    /// Open the next window. Fails while the previous one is still open.
    pub fn open_next(&mut self, now: Instant) -> Result<WindowId, WindowError> {
        self.try_complete();
        if let Some(open) = &self.open {
            return Err(WindowError::Unclosed { open: open.id });
        }
        let id = self.last_closed + 1;
        self.open = Some(OpenWindow {
            id,
            opened_at: now,
            closed: HashSet::new(),
        });
        self.last_opened_at = Some(now);
        Ok(id)
    }

    /// Record that `operator` emitted end-of-window for `window`.
    pub fn mark_closed(&mut self, operator: &str, window: WindowId) -> Result<(), WindowError> {
        let open = self.open.as_mut().ok_or_else(|| WindowError::OutOfOrder {
            operator: operator.to_string(),
            event: "end_window",
            window,
            state: "no open window".to_string(),
        })?;
        if open.id != window {
            return Err(WindowError::OutOfOrder {
                operator: operator.to_string(),
                event: "end_window",
                window,
                state: format!("open window {}", open.id),
            });
        }
        open.closed.insert(operator.to_string());
        Ok(())
    }

    /// Participants that have not closed the open window, in registration order.
    pub fn pending(&self) -> Vec<OperatorId> {
        match &self.open {
            Some(open) => self
                .participants
                .iter()
                .filter(|p| !open.closed.contains(*p))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Close the open window if every participant closed it. Returns the closed id.
    pub fn try_complete(&mut self) -> Option<WindowId> {
        if self.open.is_some() && self.pending().is_empty() {
            let open = self.open.take()?;
            self.last_closed = open.id;
            return Some(open.id);
        }
        None
    }

    /// Report a stall once the open window exceeded the deadline.
    pub fn check_stall(&self, now: Instant) -> Result<(), WindowError> {
        if let Some(open) = &self.open {
            let pending = self.pending();
            if !pending.is_empty()
                && now.saturating_duration_since(open.opened_at) >= self.stall_deadline
            {
                return Err(WindowError::Stalled {
                    window: open.id,
                    pending,
                });
            }
        }
        Ok(())
    }
}
