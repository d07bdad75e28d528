use std::fmt;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::MuxCodec;
use crate::error::PreviewError;
use crate::network::mux::{Demuxer, Liveness, Muxer};
use crate::protocol::channels::ChannelSet;

/// A multiplexed link to a single peer.
///
/// Owns a background reader task that dispatches incoming packets to the
/// [`Demuxer`] and a writer task draining the [`Muxer`] queue. Both tasks
/// are aborted when the connection is dropped.
pub struct Connection {
    muxer: Muxer,
    demuxer: Demuxer,
    alive: Liveness,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Wrap an established byte stream. Must be called inside a tokio runtime.
    pub fn new<S>(stream: S, channels: Arc<ChannelSet>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut net_writer, mut net_reader) = Framed::new(stream, MuxCodec).split();
        let alive = Liveness::new();

        // User -> Network
        let (tx, mut rx) = mpsc::unbounded_channel();
        let muxer = Muxer::new(Arc::clone(&channels), tx, alive.clone());
        let demuxer = Demuxer::new(channels, alive.clone());

        let writer_alive = alive.clone();
        let writer = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if let Err(e) = net_writer.send(packet).await {
                    warn!(error = %e, "network write error");
                    break;
                }
            }
            let _ = net_writer.close().await;
            writer_alive.mark_dead();
            debug!("writer task finished");
        });

        // Network -> Demuxer
        let reader_alive = alive.clone();
        let dispatcher = demuxer.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = net_reader.next().await {
                match frame {
                    Ok(packet) => dispatcher.dispatch(packet),
                    Err(e) => {
                        warn!(error = %e, "network read error");
                        break;
                    }
                }
            }
            reader_alive.mark_dead();
            debug!("reader task finished");
        });

        Self {
            muxer,
            demuxer,
            alive,
            reader,
            writer,
        }
    }

    pub async fn connect(info: &ConnectionInfo, channels: Arc<ChannelSet>) -> Result<Self, PreviewError> {
        let stream = TcpStream::connect((info.ip(), info.port())).await?;
        stream.set_nodelay(true)?;
        info!(peer = %info, "connected");
        Ok(Self::new(stream, channels))
    }

    pub fn muxer(&self) -> &Muxer {
        &self.muxer
    }

    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    /// `true` while both transport tasks are running.
    pub fn ok(&self) -> bool {
        self.alive.is_alive()
    }

    /// Tear the link down. Pending outbound packets are discarded.
    pub fn close(&self) {
        self.alive.mark_dead();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("ok", &self.ok()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    ip: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// ── Tests ────────────────────────────────────────────────────────
