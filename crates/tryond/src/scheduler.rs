//! Display-refresh frame scheduling.
//!
//! The render loop asks for exactly one frame at a time; the frame id comes
//! back on a channel once the refresh interval has elapsed. Cancelling a
//! request guarantees its id is never delivered.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

pub trait FrameScheduler: Send {
    /// Schedule a frame callback; the returned id is delivered once.
    fn request_frame(&mut self) -> FrameId;
    /// Withdraw a request. Unknown or already-delivered ids are ignored.
    fn cancel_frame(&mut self, id: FrameId);
    /// Requests scheduled but not yet delivered.
    fn pending_frames(&self) -> usize;
}

/// Tokio-timer scheduler ticking at the display refresh rate.
pub struct RefreshScheduler {
    interval: Duration,
    next_id: u64,
    pending: HashMap<FrameId, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<FrameId>,
}

impl RefreshScheduler {
    /// Create a scheduler delivering frame ids on the returned receiver.
    pub fn new(interval: Duration) -> (Self, mpsc::UnboundedReceiver<FrameId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            interval,
            next_id: 0,
            pending: HashMap::new(),
            tx,
        };
        (scheduler, rx)
    }

    fn prune(&mut self) {
        self.pending.retain(|_, task| !task.is_finished());
    }
}

impl FrameScheduler for RefreshScheduler {
    fn request_frame(&mut self) -> FrameId {
        self.prune();
        self.next_id += 1;
        let id = FrameId(self.next_id);
        let tx = self.tx.clone();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(id);
        });
        self.pending.insert(id, task);
        id
    }

    fn cancel_frame(&mut self, id: FrameId) {
        if let Some(task) = self.pending.remove(&id) {
            task.abort();
            tracing::trace!(frame = id.0, "frame request cancelled");
        }
    }

    fn pending_frames(&self) -> usize {
        self.pending.values().filter(|task| !task.is_finished()).count()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }
}

/// Single-step scheduler for deterministic tests: frames fire only when
/// the test calls [`ManualScheduler::fire`].
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ManualScheduler {
    next_id: u64,
    pending: Vec<FrameId>,
}

#[cfg(test)]
impl ManualScheduler {
    /// Deliver the oldest pending request, if any.
    pub(crate) fn fire(&mut self) -> Option<FrameId> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.pending.remove(0))
    }
}

#[cfg(test)]
impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameId {
        self.next_id += 1;
        let id = FrameId(self.next_id);
        self.pending.push(id);
        id
    }

    fn cancel_frame(&mut self, id: FrameId) {
        self.pending.retain(|p| *p != id);
    }

    fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}
