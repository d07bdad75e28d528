//! Shared application state with an atomic "changed" flag.
//!
//! Writers mutate one field at a time from channel callbacks; the owner
//! polls [`SharedState::state_changed`] and takes a consistent copy with
//! [`SharedState::consume_state`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::PreviewError;
use crate::network::mux::{Demuxer, Subscription};
use crate::sync::lock;

#[derive(Debug, Default)]
pub struct SharedState<S> {
    state: Mutex<S>,
    changed: AtomicBool,
}

impl<S: Clone> SharedState<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: Mutex::new(initial),
            changed: AtomicBool::new(false),
        }
    }

    /// Mutate the record and mark it changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = lock(&self.state);
        let result = f(&mut state);
        self.changed.store(true, Ordering::Release);
        result
    }

    /// Like [`update`](Self::update), but only marks the record changed
    /// when `f` succeeds.
    pub fn try_update(&self, f: impl FnOnce(&mut S) -> Result<(), PreviewError>) -> Result<(), PreviewError> {
        let mut state = lock(&self.state);
        f(&mut state)?;
        self.changed.store(true, Ordering::Release);
        Ok(())
    }

    /// Copy the record and clear the changed flag in one critical section.
    pub fn consume_state(&self) -> S {
        let state = lock(&self.state);
        self.changed.store(false, Ordering::Release);
        state.clone()
    }

    /// [`consume_state`](Self::consume_state), then apply `reset` to the
    /// stored record before releasing the lock. Used for one-shot requests.
    pub fn consume_state_with(&self, reset: impl FnOnce(&mut S)) -> S {
        let mut state = lock(&self.state);
        self.changed.store(false, Ordering::Release);
        let copy = state.clone();
        reset(&mut state);
        copy
    }

    pub fn state_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Copy the record without touching the changed flag.
    pub fn snapshot(&self) -> S {
        lock(&self.state).clone()
    }
}

// ── StateBindings ────────────────────────────────────────────────

/// Applies one channel payload to one field of `S`.
pub type FieldUpdate<S> = fn(&mut S, &[u8]) -> Result<(), PreviewError>;

/// Explicit channel → field table, installed once per session.
pub struct StateBindings<S> {
    entries: Vec<(&'static str, FieldUpdate<S>)>,
}

impl<S> StateBindings<S>
where
    S: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn bind(mut self, channel: &'static str, update: FieldUpdate<S>) -> Self {
        self.entries.push((channel, update));
        self
    }

    pub fn channels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(c, _)| *c)
    }

    /// Subscribe every binding against `state`. Malformed payloads are
    /// logged and leave the record untouched.
    pub fn install(
        &self,
        demuxer: &Demuxer,
        state: &Arc<SharedState<S>>,
    ) -> Result<Vec<Subscription>, PreviewError> {
        self.entries
            .iter()
            .map(|&(channel, update)| {
                let state = Arc::clone(state);
                demuxer.subscribe(channel, move |packet| {
                    if let Err(e) = state.try_update(|s| update(s, packet.payload())) {
                        warn!(channel, error = %e, "state update dropped");
                    }
                })
            })
            .collect()
    }
}

impl<S> Default for StateBindings<S>
where
    S: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a bincode field value.
pub fn decode_field<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, PreviewError> {
    Ok(bincode::deserialize(bytes)?)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Dial {
        level: f32,
        label: String,
    }

    #[test]
    fn consume_is_idempotent() {
        let shared = SharedState::new(Dial::default());
        assert!(!shared.state_changed());

        shared.update(|d| d.level = 0.75);
        assert!(shared.state_changed());

        let first = shared.consume_state();
        assert!(!shared.state_changed());
        let second = shared.consume_state();
        assert_eq!(first, second);
        assert_eq!(first.level, 0.75);
    }

    #[test]
    fn failed_update_leaves_flag_clear() {
        let shared = SharedState::new(Dial::default());
        let r = shared.try_update(|_| Err(PreviewError::from("bad payload")));
        assert!(r.is_err());
        assert!(!shared.state_changed());
    }

    #[test]
    fn consume_with_resets_one_shot_fields() {
        let shared = SharedState::new(Dial::default());
        shared.update(|d| d.label = "load me".into());
        let taken = shared.consume_state_with(|d| d.label.clear());
        assert_eq!(taken.label, "load me");
        assert!(shared.snapshot().label.is_empty());
        assert!(!shared.state_changed());
    }

    #[test]
    fn snapshot_keeps_flag() {
        let shared = SharedState::new(Dial::default());
        shared.update(|d| d.label = "sky".into());
        assert_eq!(shared.snapshot().label, "sky");
        assert!(shared.state_changed());
    }

    #[test]
    fn bindings_route_channels_to_fields() {
        use crate::network::mux::Liveness;
        use crate::packet::Packet;
        use crate::protocol::channels::{ChannelSet, names};

        let demuxer = Demuxer::new(Arc::new(ChannelSet::default_set()), Liveness::new());
        demuxer.open();
        let shared = Arc::new(SharedState::new(Dial::default()));
        let bindings = StateBindings::new()
            .bind(names::VALUE, |d: &mut Dial, b| {
                d.level = decode_field(b)?;
                Ok(())
            })
            .bind(names::PROMPT, |d: &mut Dial, b| {
                d.label = decode_field(b)?;
                Ok(())
            });
        let _subs = bindings.install(&demuxer, &shared).unwrap();

        let id = demuxer.channels().id(names::PROMPT).unwrap();
        demuxer.dispatch(Packet::from_value(id, "a red chair").unwrap());
        assert!(shared.state_changed());
        assert_eq!(shared.consume_state().label, "a red chair");

        // Truncated payload: dropped, flag untouched.
        let id = demuxer.channels().id(names::VALUE).unwrap();
        demuxer.dispatch(Packet::new(id, vec![1u8]).unwrap());
        assert!(!shared.state_changed());
    }
}
