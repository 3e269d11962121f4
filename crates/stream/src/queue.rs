//! Bounded FIFO queue for frames sent before the connection opens.
//!
//! The job stream itself is receive-only, so the queue is disabled by
//! default. When enabled, `send()` calls issued while the client is
//! still `Connecting` land here and are drained strictly in order once
//! the socket opens. The capacity is a hard cap: a full queue rejects
//! the frame so the caller sees backpressure instead of silent loss.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Default capacity when the queue is enabled without an explicit cap.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// The outbound queue is full; the frame was not enqueued.
#[derive(Debug, thiserror::Error)]
#[error("outbound queue full (capacity {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Ordered holding area for frames awaiting an open connection.
pub struct OutboundQueue {
    capacity: usize,
    frames: Mutex<VecDeque<String>>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a frame, failing if the queue is at capacity.
    pub fn push(&self, frame: String) -> Result<(), QueueFull> {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        frames.push_back(frame);
        Ok(())
    }

    /// Remove and return all queued frames in FIFO order.
    pub fn drain(&self) -> Vec<String> {
        self.frames.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let queue = OutboundQueue::new(8);
        queue.push("first".into()).unwrap();
        queue.push("second".into()).unwrap();
        queue.push("third".into()).unwrap();

        assert_eq!(queue.drain(), vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_when_full() {
        let queue = OutboundQueue::new(2);
        queue.push("a".into()).unwrap();
        queue.push("b".into()).unwrap();

        let err = queue.push("c".into()).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_on_empty_queue_is_empty() {
        let queue = OutboundQueue::new(4);
        assert!(queue.drain().is_empty());
    }
}
