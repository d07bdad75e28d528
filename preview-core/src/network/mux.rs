//! Named-channel multiplexing on top of a packet link.
//!
//! [`Muxer`] turns `(channel name, bytes)` into [`Packet`]s queued for the
//! writer task. [`Demuxer`] owns the channel → handler table and is driven
//! by the reader task, which calls [`Demuxer::dispatch`] once per packet in
//! arrival order.
//!
//! Until [`Demuxer::open`] is called only the `ready` channel is delivered.
//! Everything else is held back in arrival order and flushed on open, so
//! no field or video handler runs before the ready handshake completes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

use crate::error::PreviewError;
use crate::packet::Packet;
use crate::protocol::channels::{ChannelSet, names};
use crate::sync::lock;

/// Callback invoked on the transport thread for every packet on a channel.
pub type Handler = Arc<dyn Fn(&Packet) + Send + Sync>;

// ── Liveness ─────────────────────────────────────────────────────

/// Shared "link is up" flag. Cleared once by whichever transport task
/// exits first.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// ── Muxer ────────────────────────────────────────────────────────

/// Sending half of a link. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct Muxer {
    channels: Arc<ChannelSet>,
    tx: mpsc::UnboundedSender<Packet>,
    alive: Liveness,
}

impl Muxer {
    pub fn new(channels: Arc<ChannelSet>, tx: mpsc::UnboundedSender<Packet>, alive: Liveness) -> Self {
        Self { channels, tx, alive }
    }

    /// Queue raw bytes on `channel`.
    pub fn emplace_packet(&self, channel: &str, payload: impl Into<Bytes>) -> Result<(), PreviewError> {
        let id = self.channels.id(channel)?;
        let packet = Packet::new(id, payload)?;
        trace!(channel, len = packet.len(), "packet queued");
        self.tx.send(packet)?;
        Ok(())
    }

    /// Serialize `value` with bincode and queue it on `channel`.
    pub fn send<T: Serialize + ?Sized>(&self, channel: &str, value: &T) -> Result<(), PreviewError> {
        let id = self.channels.id(channel)?;
        self.tx.send(Packet::from_value(id, value)?)?;
        Ok(())
    }

    pub fn ok(&self) -> bool {
        self.alive.is_alive() && !self.tx.is_closed()
    }

    pub fn channels(&self) -> &Arc<ChannelSet> {
        &self.channels
    }
}

impl fmt::Debug for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Muxer")
            .field("version", &self.channels.version())
            .field("ok", &self.ok())
            .finish()
    }
}

// ── Demuxer ──────────────────────────────────────────────────────

/// Packets held before the handshake completes. Later ones are dropped.
pub const MAX_PENDING_PACKETS: usize = 4096;

#[derive(Default)]
struct Gate {
    open: bool,
    pending: VecDeque<Packet>,
    dropped: u64,
}

struct DemuxInner {
    channels: Arc<ChannelSet>,
    ready_id: Option<u32>,
    next_subscription: AtomicU64,
    handlers: Mutex<HashMap<u32, Vec<(u64, Handler)>>>,
    gate: Mutex<Gate>,
    peer_ready: watch::Sender<Option<u32>>,
    alive: Liveness,
}

/// Receiving half of a link.
#[derive(Clone)]
pub struct Demuxer {
    inner: Arc<DemuxInner>,
}

impl Demuxer {
    pub fn new(channels: Arc<ChannelSet>, alive: Liveness) -> Self {
        let ready_id = channels.id(names::READY).ok();
        let (peer_ready, _) = watch::channel(None);
        Self {
            inner: Arc::new(DemuxInner {
                channels,
                ready_id,
                next_subscription: AtomicU64::new(0),
                handlers: Mutex::new(HashMap::new()),
                gate: Mutex::new(Gate::default()),
                peer_ready,
                alive,
            }),
        }
    }

    /// Register `handler` for every packet on `channel`.
    ///
    /// The handler stays registered until the returned [`Subscription`]
    /// is dropped.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Result<Subscription, PreviewError>
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        let id = self.inner.channels.id(channel)?;
        let key = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers)
            .entry(id)
            .or_default()
            .push((key, Arc::new(handler)));
        Ok(Subscription {
            demuxer: Arc::downgrade(&self.inner),
            channel: id,
            key,
        })
    }

    /// Like [`subscribe`](Self::subscribe), decoding each payload as `T`.
    /// Payloads that fail to decode are dropped with a warning.
    pub fn subscribe_value<T, F>(&self, channel: &str, handler: F) -> Result<Subscription, PreviewError>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = channel.to_string();
        self.subscribe(channel, move |packet| match packet.decode_value::<T>() {
            Ok(value) => handler(value),
            Err(e) => warn!(channel = %name, error = %e, "undecodable payload dropped"),
        })
    }

    /// Deliver one packet received from the link.
    pub fn dispatch(&self, packet: Packet) {
        let inner = &self.inner;
        let Some(name) = inner.channels.name(packet.channel()) else {
            warn!(channel = packet.channel(), "packet on unknown channel id dropped");
            return;
        };

        if Some(packet.channel()) == inner.ready_id {
            match packet.decode_value::<u32>() {
                Ok(version) => {
                    trace!(version, "peer ready marker");
                    inner.peer_ready.send_replace(Some(version));
                }
                Err(e) => warn!(error = %e, "malformed ready marker"),
            }
            self.deliver(&packet);
            return;
        }

        let mut gate = lock(&inner.gate);
        if !gate.open {
            if gate.pending.len() >= MAX_PENDING_PACKETS {
                if gate.dropped == 0 {
                    warn!(channel = name, limit = MAX_PENDING_PACKETS, "pre-handshake queue full, dropping packets");
                }
                gate.dropped += 1;
                return;
            }
            trace!(channel = name, "held until handshake completes");
            gate.pending.push_back(packet);
            return;
        }
        // The gate stays locked while handlers run so a concurrent flush
        // cannot reorder packets.
        self.deliver(&packet);
        drop(gate);
    }

    /// Start delivering non-handshake traffic, flushing anything held back.
    pub fn open(&self) {
        let mut gate = lock(&self.inner.gate);
        if gate.open {
            return;
        }
        gate.open = true;
        let pending = std::mem::take(&mut gate.pending);
        if gate.dropped > 0 {
            warn!(dropped = gate.dropped, "packets lost before the handshake completed");
        }
        if !pending.is_empty() {
            trace!(count = pending.len(), "flushing held packets");
        }
        for packet in &pending {
            self.deliver(packet);
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.gate).open
    }

    /// Channel-set version announced by the peer, once its ready marker
    /// has been seen.
    pub fn peer_ready(&self) -> watch::Receiver<Option<u32>> {
        self.inner.peer_ready.subscribe()
    }

    pub fn ok(&self) -> bool {
        self.inner.alive.is_alive()
    }

    pub fn liveness(&self) -> Liveness {
        self.inner.alive.clone()
    }

    pub fn channels(&self) -> &Arc<ChannelSet> {
        &self.inner.channels
    }

    fn deliver(&self, packet: &Packet) {
        let handlers: Vec<Handler> = match lock(&self.inner.handlers).get(&packet.channel()) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };
        for handler in handlers {
            handler(packet);
        }
    }
}

impl fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demuxer")
            .field("version", &self.inner.channels.version())
            .field("ok", &self.ok())
            .finish()
    }
}

// ── Subscription ─────────────────────────────────────────────────

/// Registration guard returned by [`Demuxer::subscribe`].
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    demuxer: Weak<DemuxInner>,
    channel: u32,
    key: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.demuxer.upgrade() else {
            return;
        };
        let mut handlers = lock(&inner.handlers);
        if let Some(list) = handlers.get_mut(&self.channel) {
            list.retain(|(key, _)| *key != self.key);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
