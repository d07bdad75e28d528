//! Pull-based byte stream over a [`ChannelInbox`].
//!
//! Packets arrive with arbitrary sizes; the decoder asks for arbitrary
//! sizes. [`PacketSource`] keeps a cursor into the head packet so a read
//! can stop mid-packet and the next read resumes at the same byte.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::network::mux::Liveness;
use crate::preview::inbox::ChannelInbox;

/// How long a single condvar wait lasts before cancellation, liveness and
/// the idle deadline are re-checked.
pub const DEFAULT_WAIT_QUANTUM: Duration = Duration::from_secs(1);

pub struct PacketSource {
    inbox: Arc<ChannelInbox>,
    alive: Liveness,
    idle_timeout: Duration,
    wait_quantum: Duration,
    cancel: Option<CancellationToken>,
    /// Bytes of the head packet already handed out.
    offset: usize,
}

impl PacketSource {
    pub fn new(inbox: Arc<ChannelInbox>, alive: Liveness, idle_timeout: Duration) -> Self {
        Self {
            inbox,
            alive,
            idle_timeout,
            wait_quantum: DEFAULT_WAIT_QUANTUM,
            cancel: None,
            offset: 0,
        }
    }

    pub fn with_wait_quantum(mut self, quantum: Duration) -> Self {
        self.wait_quantum = quantum.max(Duration::from_millis(1));
        self
    }

    /// End the stream (read `Ok(0)`) once `token` is cancelled. Checked
    /// before every wait quantum.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Wait for data. `Ok(false)` means the link is gone or the reader
    /// was cancelled.
    fn wait_for_data(&self) -> io::Result<bool> {
        let deadline = Instant::now() + self.idle_timeout;
        while self.inbox.is_empty() {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                debug!("video source closed: cancelled");
                return Ok(false);
            }
            if !self.alive.is_alive() {
                debug!("video source closed: link down");
                return Ok(false);
            }
            let now = Instant::now();
            if now >= deadline {
                error!(timeout = ?self.idle_timeout, "timed out waiting for video data");
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no video data within idle timeout",
                ));
            }
            self.inbox.wait_not_empty(self.wait_quantum.min(deadline - now));
        }
        Ok(true)
    }

    /// Copy queued bytes into `buf` until it is full or the inbox is empty.
    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            let Some(head) = self.inbox.front() else {
                break;
            };
            let payload = head.payload();
            let n = (payload.len() - self.offset).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&payload[self.offset..self.offset + n]);
            written += n;
            self.offset += n;
            if self.offset == payload.len() {
                self.inbox.pop();
                self.offset = 0;
            }
        }
        written
    }
}

impl Read for PacketSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.wait_for_data()? {
                return Ok(0);
            }
            // Zero-length packets are consumed without producing bytes.
            let n = self.drain_into(buf);
            if n > 0 {
                return Ok(n);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use proptest::prelude::*;

    fn source_with(chunks: &[&str]) -> (PacketSource, Arc<ChannelInbox>, Liveness) {
        let inbox = Arc::new(ChannelInbox::new());
        for c in chunks {
            inbox.push(Packet::new(0, c.as_bytes().to_vec()).unwrap());
        }
        let alive = Liveness::new();
        let src = PacketSource::new(Arc::clone(&inbox), alive.clone(), Duration::from_secs(5))
            .with_wait_quantum(Duration::from_millis(10));
        (src, inbox, alive)
    }

    #[test]
    fn resumes_mid_packet() {
        let (mut src, inbox, _alive) = source_with(&["abcde", "fg"]);
        let mut buf = [0u8; 3];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(inbox.len(), 2);

        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(inbox.len(), 1);

        let mut big = [0u8; 8];
        assert_eq!(src.read(&mut big).unwrap(), 1);
        assert_eq!(big[0], b'g');
        assert!(inbox.is_empty());
    }

    #[test]
    fn read_spans_packets() {
        let (mut src, _inbox, _alive) = source_with(&["ab", "", "cd", "e"]);
        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"abcde");
    }

    #[test]
    fn dead_link_reads_eof() {
        let (mut src, _inbox, alive) = source_with(&["xy"]);
        alive.mark_dead();
        let mut buf = [0u8; 4];
        // Queued data is still delivered.
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn idle_timeout_within_one_quantum() {
        let inbox = Arc::new(ChannelInbox::new());
        let timeout = Duration::from_millis(120);
        let quantum = Duration::from_millis(50);
        let mut src = PacketSource::new(inbox, Liveness::new(), timeout).with_wait_quantum(quantum);

        let start = Instant::now();
        let err = src.read(&mut [0u8; 4]).unwrap_err();
        let elapsed = start.elapsed();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(elapsed >= timeout, "{elapsed:?}");
        assert!(elapsed < timeout + quantum + Duration::from_millis(100), "{elapsed:?}");
    }

    #[test]
    fn cancel_ends_wait_on_live_link() {
        let inbox = Arc::new(ChannelInbox::new());
        let quantum = Duration::from_millis(50);
        let token = CancellationToken::new();
        let mut src = PacketSource::new(inbox, Liveness::new(), Duration::from_secs(4))
            .with_wait_quantum(quantum)
            .with_cancel(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            token.cancel();
        });
        let start = Instant::now();
        assert_eq!(src.read(&mut [0u8; 4]).unwrap(), 0);
        let elapsed = start.elapsed();
        assert!(elapsed < quantum + Duration::from_millis(200), "{elapsed:?}");
        canceller.join().unwrap();
    }

    #[test]
    fn queued_data_is_read_before_cancel_takes_effect() {
        let (src, _inbox, _alive) = source_with(&["ok"]);
        let token = CancellationToken::new();
        token.cancel();
        let mut src = src.with_cancel(token);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn late_packet_is_picked_up() {
        let (mut src, inbox, _alive) = source_with(&[]);
        let producer = Arc::clone(&inbox);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.push(Packet::new(0, b"late".to_vec()).unwrap());
        });
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"late");
        handle.join().unwrap();
    }

    proptest! {
        #[test]
        fn any_split_reassembles(
            data in proptest::collection::vec(any::<u8>(), 1..2048),
            cuts in proptest::collection::vec(1usize..97, 1..64),
            reads in proptest::collection::vec(1usize..131, 1..64),
        ) {
            let inbox = Arc::new(ChannelInbox::new());
            let mut at = 0;
            for cut in cuts.iter().cycle() {
                if at >= data.len() {
                    break;
                }
                let end = (at + cut).min(data.len());
                inbox.push(Packet::new(0, data[at..end].to_vec()).unwrap());
                at = end;
            }
            let alive = Liveness::new();
            alive.mark_dead();
            let mut src = PacketSource::new(inbox, alive, Duration::from_secs(1));

            let mut out = Vec::with_capacity(data.len());
            for size in reads.iter().cycle() {
                let mut buf = vec![0u8; *size];
                let n = src.read(&mut buf).unwrap();
                prop_assert!(n <= *size);
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            prop_assert_eq!(out, data);
        }
    }
}
