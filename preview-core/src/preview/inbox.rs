use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::packet::Packet;
use crate::sync::lock;

/// Unbounded FIFO of packets received on one channel.
///
/// Filled from the transport thread, drained by a blocking consumer.
/// The lock is only held for the duration of a single queue operation.
#[derive(Debug, Default)]
pub struct ChannelInbox {
    queue: Mutex<VecDeque<Packet>>,
    available: Condvar,
    len: AtomicUsize,
}

impl ChannelInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, packet: Packet) {
        {
            let mut queue = lock(&self.queue);
            queue.push_back(packet);
            self.len.store(queue.len(), Ordering::Release);
        }
        self.available.notify_one();
    }

    pub fn pop(&self) -> Option<Packet> {
        let mut queue = lock(&self.queue);
        let packet = queue.pop_front();
        self.len.store(queue.len(), Ordering::Release);
        packet
    }

    /// Shared handle to the head packet, left in place.
    pub fn front(&self) -> Option<Packet> {
        lock(&self.queue).front().cloned()
    }

    /// Lock-free emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Block until a packet is queued or `timeout` elapses. Returns
    /// whether data is available.
    pub fn wait_not_empty(&self, timeout: Duration) -> bool {
        let queue = lock(&self.queue);
        let (queue, _) = self
            .available
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !queue.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
