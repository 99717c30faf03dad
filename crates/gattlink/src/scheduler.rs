//! Per-link write scheduling
//!
//! The transport accepts one in-flight submission per link. The scheduler
//! keeps a FIFO fragment queue per link so that fragments of one message are
//! fully drained, in order, before any fragment of a later message starts,
//! and so that a synchronously rejected submission is retried instead of
//! dropped.
//!
//! The scheduler is pure queue state; the session performs the actual adapter
//! submissions and reports their outcome back here.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::adapter::LinkHandle;

#[derive(Debug, Default)]
struct LinkQueue {
    pending: VecDeque<Vec<u8>>,
    in_flight: bool,
}

/// FIFO fragment queues keyed by link.
#[derive(Debug, Default)]
pub struct WriteScheduler {
    queues: HashMap<LinkHandle, LinkQueue>,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append fragments to the link's queue, behind anything already pending.
    pub fn enqueue(&mut self, link: LinkHandle, fragments: impl IntoIterator<Item = Vec<u8>>) {
        let queue = self.queues.entry(link).or_default();
        let before = queue.pending.len();
        queue.pending.extend(fragments);
        debug!(
            link = link.0,
            added = queue.pending.len() - before,
            depth = queue.pending.len(),
            "enqueued fragments"
        );
    }

    /// The next fragment to submit, if the link is idle and has work. The
    /// fragment stays at the head until [`mark_submitted`] confirms the
    /// driver accepted it, so a rejected submission is naturally retried.
    ///
    /// [`mark_submitted`]: WriteScheduler::mark_submitted
    pub fn begin(&mut self, link: LinkHandle) -> Option<Vec<u8>> {
        let queue = self.queues.get_mut(&link)?;
        if queue.in_flight {
            return None;
        }
        queue.pending.front().cloned()
    }

    /// The driver accepted the head fragment; it is now in flight.
    pub fn mark_submitted(&mut self, link: LinkHandle) {
        if let Some(queue) = self.queues.get_mut(&link) {
            queue.pending.pop_front();
            queue.in_flight = true;
        }
    }

    /// The in-flight submission completed (success or failure); the link is
    /// idle again. Empty idle queues are dropped so closed links leave no
    /// state behind.
    pub fn complete(&mut self, link: LinkHandle) {
        if let Some(queue) = self.queues.get_mut(&link) {
            queue.in_flight = false;
            if queue.pending.is_empty() {
                self.queues.remove(&link);
            }
        }
    }

    /// Discard the queue for a closed link. Remaining fragments are dropped
    /// without notification; send is fire-and-forget beyond local queuing.
    pub fn drop_link(&mut self, link: LinkHandle) {
        if let Some(queue) = self.queues.remove(&link) {
            if !queue.pending.is_empty() {
                debug!(
                    link = link.0,
                    discarded = queue.pending.len(),
                    "discarded pending fragments on link teardown"
                );
            }
        }
    }

    pub fn pending(&self, link: LinkHandle) -> usize {
        self.queues.get(&link).map_or(0, |q| q.pending.len())
    }

    pub fn in_flight(&self, link: LinkHandle) -> bool {
        self.queues.get(&link).is_some_and(|q| q.in_flight)
    }
}
