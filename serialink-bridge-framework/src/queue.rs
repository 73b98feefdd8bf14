//! Bounded FIFO delivery queue between ingestion and publishing.
//!
//! The queue owns every [`PublishTask`] until a consumer dequeues it. When
//! full, behaviour depends on the [`OverflowPolicy`]: `Backpressure` suspends
//! the producer until a slot frees up, `ShedOldest` evicts the oldest task.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use serialink_common::TelemetryFrame;

/// What to do when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Suspend the producer until space frees up (no loss).
    #[default]
    Backpressure,
    /// Drop the oldest queued task to make room.
    ShedOldest,
}

/// What to do with queued tasks on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Keep publishing until the queue is empty (bounded by a timeout).
    #[default]
    Drain,
    /// Drop whatever is still queued.
    Abandon,
}

/// A frame waiting for delivery, with its delivery metadata.
#[derive(Debug, Clone)]
pub struct PublishTask {
    /// Frame to publish.
    pub frame: TelemetryFrame,
    /// Failed publish attempts so far.
    pub attempt_count: u32,
    /// When the frame entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

impl PublishTask {
    /// Wrap a frame entering the queue now.
    pub fn new(frame: TelemetryFrame) -> Self {
        Self {
            frame,
            attempt_count: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No room and the caller asked not to wait. The frame is handed back.
    #[error("delivery queue is full")]
    Full(TelemetryFrame),
    /// The queue no longer accepts work.
    #[error("delivery queue is closed")]
    Closed(TelemetryFrame),
}

/// Result of an accepted enqueue.
#[derive(Debug)]
pub enum Enqueued {
    /// Task stored, nothing lost.
    Stored,
    /// Task stored after evicting the oldest one (shed-oldest policy).
    Shed(PublishTask),
}

#[derive(Debug, Default)]
struct Inner {
    tasks: VecDeque<PublishTask>,
    closed: bool,
}

/// Bounded, ordered, concurrently usable delivery queue.
#[derive(Debug)]
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
}

impl DeliveryQueue {
    /// Create a queue. A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Maximum number of queued tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Add a frame at the back of the queue.
    ///
    /// Under `Backpressure` this waits for a free slot; under `ShedOldest`
    /// it never waits and reports the evicted task.
    pub async fn enqueue(&self, frame: TelemetryFrame) -> Result<Enqueued, QueueError> {
        let mut frame = frame;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(frame) {
                Err(QueueError::Full(returned)) => frame = returned,
                other => return other,
            }

            notified.await;
        }
    }

    /// Add a frame without waiting. Under `Backpressure` a full queue returns
    /// [`QueueError::Full`] with the frame.
    pub fn try_enqueue(&self, frame: TelemetryFrame) -> Result<Enqueued, QueueError> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(QueueError::Closed(frame));
        }

        let outcome = if inner.tasks.len() < self.capacity {
            Enqueued::Stored
        } else {
            match self.policy {
                OverflowPolicy::Backpressure => return Err(QueueError::Full(frame)),
                OverflowPolicy::ShedOldest => match inner.tasks.pop_front() {
                    Some(evicted) => Enqueued::Shed(evicted),
                    None => Enqueued::Stored,
                },
            }
        };

        inner.tasks.push_back(PublishTask::new(frame));
        drop(inner);

        self.not_empty.notify_one();
        Ok(outcome)
    }

    /// Take the oldest task, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<PublishTask> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(task) = inner.tasks.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(task);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting new frames. Queued tasks can still be dequeued.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Close the queue and drop everything still in it, returning how many
    /// tasks were discarded.
    pub fn abandon(&self) -> usize {
        let dropped = {
            let mut inner = self.lock();
            inner.closed = true;
            let dropped = inner.tasks.len();
            inner.tasks.clear();
            dropped
        };
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner holds no invariants that a panicking holder could break.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
