//! Drop-oldest hand-off between the capture and analysis tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::camera::Frame;
use crate::constants::FRAME_QUEUE_CAPACITY;

#[derive(Debug, Default)]
struct QueueInner {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// Single-producer, single-consumer frame queue. `push` never waits: at
/// capacity the oldest frame is evicted so the consumer always sees the most
/// recent frames.
#[derive(Debug)]
pub struct BoundedFrameQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

impl BoundedFrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues `frame`, evicting the oldest entry when full. Returns false
    /// (and drops the frame) once the queue is closed.
    pub fn push(&self, frame: Frame) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(dropped_total = total, "Frame queue full, dropped oldest");
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next frame. Returns None once the queue is closed and
    /// every buffered frame has been handed out.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<Frame> {
        self.lock().frames.pop_front()
    }

    /// Wakes every waiting consumer; buffered frames stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BoundedFrameQueue {
    fn default() -> Self {
        Self::new(FRAME_QUEUE_CAPACITY)
    }
}
