//! Bounded tuple queues between operators.
//!
//! Uses crossbeam-channel bounded channels. A full queue is the backpressure
//! signal: producers get their tuple back instead of blocking or dropping it.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::types::{StreamId, Tuple};

/// Producer side of a tuple queue.
#[derive(Clone)]
pub struct QueueSender {
    sender: Sender<Tuple>,
}

impl QueueSender {
    /// Push without blocking.
    ///
    /// Returns the tuple back when the queue is full so the caller can retry later.
    pub fn try_push(&self, tuple: Tuple) -> Result<(), PushError> {
        self.sender.try_send(tuple).map_err(|e| match e {
            TrySendError::Full(t) => PushError::Full(t),
            TrySendError::Disconnected(t) => PushError::Closed(t),
        })
    }

    pub fn is_full(&self) -> bool {
        self.sender.is_full()
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    Full(Tuple),
    Closed(Tuple),
}

impl PushError {
    pub fn into_tuple(self) -> Tuple {
        match self {
            PushError::Full(t) | PushError::Closed(t) => t,
        }
    }
}

/// Consumer side of a tuple queue.
#[derive(Clone)]
pub struct QueueReceiver {
    receiver: Receiver<Tuple>,
}

impl QueueReceiver {
    /// Returns `None` when nothing is buffered (or every sender is gone).
    pub fn try_pop(&self) -> Option<Tuple> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.receiver.capacity().unwrap_or(usize::MAX)
    }
}

/// Create a bounded queue pair.
pub fn tuple_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (sender, receiver) = bounded(capacity.max(1));
    (QueueSender { sender }, QueueReceiver { receiver })
}

/// Process-wide exchange for networked streams.
///
/// Each stream id maps to one bounded queue that outlives the containers at
/// either end, so a redeployed container re-attaches to the same stream.
#[derive(Default)]
pub struct StreamBus {
    streams: Mutex<HashMap<StreamId, (QueueSender, QueueReceiver)>>,
}

impl StreamBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create with `capacity`) both ends of a networked stream.
    pub fn attach(&self, stream: &str, capacity: usize) -> (QueueSender, QueueReceiver) {
        let mut guard = self.streams.lock().expect("stream bus poisoned");
        guard
            .entry(stream.to_string())
            .or_insert_with(|| tuple_queue(capacity))
            .clone()
    }

    pub fn depth(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .expect("stream bus poisoned")
            .get(stream)
            .map(|(_, rx)| rx.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_returns_tuple() {
        let (tx, rx) = tuple_queue(2);
        tx.try_push(vec![1]).unwrap();
        tx.try_push(vec![2]).unwrap();
        assert!(tx.is_full());

        let err = tx.try_push(vec![3]).unwrap_err();
        assert_eq!(err, PushError::Full(vec![3]));

        assert_eq!(rx.try_pop(), Some(vec![1]));
        tx.try_push(err.into_tuple()).unwrap();
        assert_eq!(rx.try_pop(), Some(vec![2]));
        assert_eq!(rx.try_pop(), Some(vec![3]));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (tx, rx) = tuple_queue(0);
        tx.try_push(vec![9]).unwrap();
        assert_eq!(rx.capacity(), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_stream_bus_reattach_keeps_buffered_tuples() {
        let bus = StreamBus::new();
        {
            let (tx, _) = bus.attach("s1", 4);
            tx.try_push(vec![42]).unwrap();
        }
        let (_, rx) = bus.attach("s1", 4);
        assert_eq!(bus.depth("s1"), 1);
        assert_eq!(rx.try_pop(), Some(vec![42]));
    }
}
