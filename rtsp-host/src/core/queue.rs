//! Frame queue between the session thread and a decode loop
//!
//! One producer (the session controller) and one consumer (the decode loop).
//! Push never blocks; pop waits at most the given timeout.

use super::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct QueueState {
    frames: VecDeque<Frame>,
    /// Bumped by `interrupt()`; a waiting pop returns when it changes
    wakeups: u64,
}

pub struct FrameQueue {
    name: &'static str,
    state: Mutex<QueueState>,
    available: Condvar,
    pushed: AtomicU64,
    discarded: AtomicU64,
}

impl FrameQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(64),
                wakeups: 0,
            }),
            available: Condvar::new(),
            pushed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // A panic while holding the lock leaves the deque intact, so keep going.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame and wake the consumer
    pub fn push(&self, frame: Frame) {
        let mut state = self.lock();
        state.frames.push_back(frame);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.available.notify_one();
    }

    /// Remove the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when `interrupt()` is called meanwhile.
    pub fn pop(&self, timeout: Duration) -> Option<Frame> {
        self.pop_inner(timeout, None)
    }

    /// Like `pop`, but gives up as soon as `cancel` is set.
    ///
    /// `cancel` is read under the queue lock, so a flag raised just before an
    /// `interrupt()` is never missed.
    pub fn pop_unless(&self, timeout: Duration, cancel: &AtomicBool) -> Option<Frame> {
        self.pop_inner(timeout, Some(cancel))
    }

    fn pop_inner(&self, timeout: Duration, cancel: Option<&AtomicBool>) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        let wakeups = state.wakeups;

        loop {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                return None;
            }
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if state.wakeups != wakeups {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.available.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Drop every queued frame. Returns how many were discarded
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.frames.len();
        state.frames.clear();
        drop(state);
        if count > 0 {
            self.discarded.fetch_add(count as u64, Ordering::Relaxed);
            log_verbose!("QUEUE", "{}: cleared {} frames", self.name, count);
        }
        count
    }

    /// Wake a consumer blocked in `pop` without delivering a frame
    pub fn interrupt(&self) {
        let mut state = self.lock();
        state.wakeups = state.wakeups.wrapping_add(1);
        drop(state);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames ever pushed
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total frames dropped by `clear`
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}
