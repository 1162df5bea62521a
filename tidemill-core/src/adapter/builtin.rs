use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::codec;
use crate::types::{Tuple, WindowId};

use super::{InputAdapter, OutputAdapter};

/// Test/demo input whose tuples are pushed by hand per window.
///
/// Tuples are retained, so every adapter created from the same feed replays a
/// window from the start. Clones share state.
#[derive(Clone, Default)]
pub struct ManualFeed {
    inner: Arc<Mutex<ManualFeedState>>,
}

#[derive(Default)]
struct ManualFeedState {
    windows: BTreeMap<WindowId, Vec<Tuple>>,
    resumed_from: Vec<WindowId>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, window: WindowId, tuple: Tuple) {
        self.inner
            .lock()
            .expect("manual feed poisoned")
            .windows
            .entry(window)
            .or_default()
            .push(tuple);
    }

    /// Every `resume_from` call made by adapters of this feed, in order.
    pub fn resumed_from(&self) -> Vec<WindowId> {
        self.inner
            .lock()
            .expect("manual feed poisoned")
            .resumed_from
            .clone()
    }

    pub fn adapter(&self) -> ManualInputAdapter {
        ManualInputAdapter {
            feed: self.clone(),
            starting_window: 0,
            cursor: None,
            paused: false,
            stopped: false,
        }
    }
}

pub struct ManualInputAdapter {
    feed: ManualFeed,
    starting_window: WindowId,
    cursor: Option<(WindowId, usize)>,
    paused: bool,
    stopped: bool,
}

impl InputAdapter for ManualInputAdapter {
    fn resume_from(&mut self, window: WindowId) {
        self.starting_window = window;
        self.cursor = None;
        self.paused = false;
        self.feed
            .inner
            .lock()
            .expect("manual feed poisoned")
            .resumed_from
            .push(window);
    }

    fn starting_window(&self) -> WindowId {
        self.starting_window
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn poll(&mut self, window: WindowId) -> Option<Tuple> {
        if self.paused || self.stopped || window <= self.starting_window {
            return None;
        }
        let index = match self.cursor {
            Some((w, i)) if w == window => i,
            _ => 0,
        };
        let tuple = self
            .feed
            .inner
            .lock()
            .expect("manual feed poisoned")
            .windows
            .get(&window)
            .and_then(|tuples| tuples.get(index).cloned());
        if tuple.is_some() {
            self.cursor = Some((window, index + 1));
        }
        tuple
    }
}

/// Emits `tuples_per_window` encoded `(window, index)` pairs for every window.
pub struct GeneratorInputAdapter {
    tuples_per_window: u64,
    starting_window: WindowId,
    cursor: Option<(WindowId, u64)>,
    paused: bool,
    stopped: bool,
}

impl GeneratorInputAdapter {
    pub const KIND: &'static str = "builtin::generator";

    pub fn new(tuples_per_window: u64) -> Self {
        Self {
            tuples_per_window,
            starting_window: 0,
            cursor: None,
            paused: false,
            stopped: false,
        }
    }
}

impl InputAdapter for GeneratorInputAdapter {
    fn resume_from(&mut self, window: WindowId) {
        self.starting_window = window;
        self.cursor = None;
        self.paused = false;
    }

    fn starting_window(&self) -> WindowId {
        self.starting_window
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn poll(&mut self, window: WindowId) -> Option<Tuple> {
        if self.paused || self.stopped || window <= self.starting_window {
            return None;
        }
        let index = match self.cursor {
            Some((w, i)) if w == window => i,
            _ => 0,
        };
        if index >= self.tuples_per_window {
            return None;
        }
        self.cursor = Some((window, index + 1));
        codec::encode(&(window, index)).ok()
    }
}

/// Shared sink collecting `(window, tuple)` pairs. Clones share state.
///
/// `throttle(true)` makes every adapter of this sink stop accepting tuples,
/// which backpressures the operator feeding it.
#[derive(Clone, Default)]
pub struct CollectSink {
    tuples: Arc<Mutex<Vec<(WindowId, Tuple)>>>,
    resumed_from: Arc<Mutex<Vec<WindowId>>>,
    throttled: Arc<AtomicBool>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<(WindowId, Tuple)> {
        self.tuples.lock().expect("collect sink poisoned").clone()
    }

    pub fn resumed_from(&self) -> Vec<WindowId> {
        self.resumed_from
            .lock()
            .expect("collect sink poisoned")
            .clone()
    }

    pub fn throttle(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::SeqCst);
    }

    pub fn adapter(&self) -> CollectOutputAdapter {
        CollectOutputAdapter {
            sink: self.clone(),
            paused: false,
            stopped: false,
        }
    }
}

pub struct CollectOutputAdapter {
    sink: CollectSink,
    paused: bool,
    stopped: bool,
}

impl OutputAdapter for CollectOutputAdapter {
    fn resume_from(&mut self, window: WindowId) {
        self.paused = false;
        self.sink
            .resumed_from
            .lock()
            .expect("collect sink poisoned")
            .push(window);
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn accepting(&self) -> bool {
        !self.paused && !self.stopped && !self.sink.throttled.load(Ordering::SeqCst)
    }

    fn write(&mut self, window: WindowId, tuple: Tuple) -> Result<()> {
        self.sink
            .tuples
            .lock()
            .expect("collect sink poisoned")
            .push((window, tuple));
        Ok(())
    }
}

/// Writes every tuple to the tracing log at info level.
#[derive(Debug, Default)]
pub struct LogOutputAdapter {
    name: String,
    stopped: bool,
}

impl LogOutputAdapter {
    pub const KIND: &'static str = "builtin::log";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stopped: false,
        }
    }
}

impl OutputAdapter for LogOutputAdapter {
    fn resume_from(&mut self, window: WindowId) {
        tracing::debug!("output {} resumes after window {}", self.name, window);
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn accepting(&self) -> bool {
        !self.stopped
    }

    fn write(&mut self, window: WindowId, tuple: Tuple) -> Result<()> {
        tracing::info!(
            "output {} window={} bytes={} tuple={:?}",
            self.name,
            window,
            tuple.len(),
            tuple
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_feed_replays_after_resume() {
        let feed = ManualFeed::new();
        feed.push(1, vec![1]);
        feed.push(2, vec![2]);
        feed.push(2, vec![3]);

        let mut first = feed.adapter();
        first.resume_from(0);
        assert_eq!(first.poll(1), Some(vec![1]));
        assert_eq!(first.poll(1), None);
        assert_eq!(first.poll(2), Some(vec![2]));

        let mut second = feed.adapter();
        second.resume_from(1);
        assert_eq!(second.starting_window(), 1);
        assert_eq!(second.poll(1), None);
        assert_eq!(second.poll(2), Some(vec![2]));
        assert_eq!(second.poll(2), Some(vec![3]));
        assert_eq!(second.poll(2), None);
        assert_eq!(feed.resumed_from(), vec![0, 1]);
    }

    #[test]
    fn test_paused_input_emits_nothing() {
        let mut generator = GeneratorInputAdapter::new(3);
        generator.resume_from(0);
        assert!(generator.poll(1).is_some());
        generator.pause();
        assert!(generator.poll(1).is_none());
        generator.resume_from(0);
        let decoded: (u64, u64) = codec::decode(&generator.poll(1).unwrap()).unwrap();
        assert_eq!(decoded, (1, 0));
    }

    #[test]
    fn test_throttled_sink_stops_accepting() {
        let sink = CollectSink::new();
        let mut adapter = sink.adapter();
        assert!(adapter.accepting());
        sink.throttle(true);
        assert!(!adapter.accepting());
        sink.throttle(false);
        adapter.write(4, vec![9]).unwrap();
        assert_eq!(sink.collected(), vec![(4, vec![9])]);
    }
}
