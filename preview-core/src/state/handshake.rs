//! Mutual ready handshake.
//!
//! Each side sends its channel-set version on `ready` and waits for the
//! peer's. Only then is the demuxer opened for other traffic.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::PreviewError;
use crate::network::mux::{Demuxer, Muxer};
use crate::protocol::channels::names;

const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// Exchange ready markers with the peer.
///
/// Returns the peer's channel-set version. Fails with
/// [`PreviewError::Timeout`] if no marker arrives in time,
/// [`PreviewError::ChannelClosed`] if the link drops first, and
/// [`PreviewError::VersionMismatch`] if the peer uses another set.
pub async fn sync_with_peer(muxer: &Muxer, demuxer: &Demuxer, timeout: Duration) -> Result<u32, PreviewError> {
    let local = demuxer.channels().version();
    let mut peer = demuxer.peer_ready();

    muxer.send(names::READY, &local)?;
    debug!(version = local, "ready marker sent");

    let wait = async {
        loop {
            if let Some(version) = *peer.borrow_and_update() {
                return Ok(version);
            }
            if !demuxer.ok() {
                return Err(PreviewError::ChannelClosed);
            }
            // Wake periodically to notice a dropped link.
            let _ = tokio::time::timeout(LIVENESS_POLL, peer.changed()).await;
        }
    };
    let remote = tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| PreviewError::Timeout(timeout))??;

    if remote != local {
        return Err(PreviewError::VersionMismatch { local, remote });
    }
    demuxer.open();
    info!(version = remote, "comms synchronised");
    Ok(remote)
}

// ── Tests ────────────────────────────────────────────────────────
