//! Where the interface server's single client session stands.
//!
//! ```text
//!  Stopped ──► Waiting { peer: None } ──accept──► Waiting { peer } ──sync──► Synced
//!     ▲                                                                        │
//!     └──────────── thread exit (stop, timeout, disconnect) ◄─────────────────┘
//! ```
//!
//! The server thread owns every change. Leaving for `Stopped` is always
//! allowed; the two forward steps check where they start from.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::PreviewError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No server thread, or it has exited.
    #[default]
    Stopped,

    /// Listening. `peer` is set once a client is accepted and the ready
    /// markers are being exchanged.
    Waiting { peer: Option<SocketAddr> },

    /// Handshake done; state and media flow.
    Synced {
        peer: SocketAddr,
        version: u32,
        since: Instant,
    },
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Waiting { peer: None } => write!(f, "waiting for client"),
            Self::Waiting { peer: Some(peer) } => write!(f, "syncing with {peer}"),
            Self::Synced { peer, version, .. } => write!(f, "synced with {peer} (v{version})"),
        }
    }
}

impl SessionPhase {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    /// Accepted client, in `Waiting` after accept or in `Synced`.
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Self::Stopped => None,
            Self::Waiting { peer } => *peer,
            Self::Synced { peer, .. } => Some(*peer),
        }
    }

    pub fn synced_for(&self) -> Option<Duration> {
        match self {
            Self::Synced { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// A client was accepted while listening.
    pub fn accept(&mut self, peer: SocketAddr) -> Result<(), PreviewError> {
        match self {
            Self::Waiting { peer: slot @ None } => {
                *slot = Some(peer);
                Ok(())
            }
            _ => Err(PreviewError::ProtocolViolation("client accepted while not listening")),
        }
    }

    /// Both ready markers were seen.
    pub fn synced(&mut self, version: u32) -> Result<(), PreviewError> {
        match *self {
            Self::Waiting { peer: Some(peer) } => {
                *self = Self::Synced {
                    peer,
                    version,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(PreviewError::ProtocolViolation("handshake finished without a client")),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
