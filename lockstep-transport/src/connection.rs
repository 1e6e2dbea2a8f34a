//! Framed connections and connection establishment.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::RetryPolicy;
use crate::error::{TransportError, TransportResult};
use crate::wire::{serialize_frame, try_deserialize_frame};
use lockstep_core::{NetworkProvider, TimeProvider};

const READ_CHUNK_SIZE: usize = 4096;

/// One end of a point-to-point channel.
///
/// Delivers whole frames: each [`send`](Connection::send) is matched by
/// exactly one [`receive`](Connection::receive) on the other end, in order.
pub struct Connection<S> {
    stream: S,
    read_buf: Vec<u8>,
    frames_sent: u64,
    frames_received: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established byte stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: Vec::with_capacity(READ_CHUNK_SIZE),
            frames_sent: 0,
            frames_received: 0,
        }
    }

    /// Send one frame carrying `payload`.
    pub async fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
        let frame = serialize_frame(payload)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.frames_sent += 1;
        tracing::trace!(
            "Connection sent frame #{} ({} bytes)",
            self.frames_sent,
            frame.len()
        );
        Ok(())
    }

    /// Wait for the next whole frame and return its payload.
    ///
    /// Returns [`TransportError::Closed`] if the peer closes the stream,
    /// including in the middle of a frame.
    pub async fn receive(&mut self) -> TransportResult<Vec<u8>> {
        loop {
            if let Some((payload, consumed)) = try_deserialize_frame(&self.read_buf)? {
                self.read_buf.drain(..consumed);
                self.frames_received += 1;
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if !self.read_buf.is_empty() {
                    tracing::debug!(
                        "Connection closed with {} unread bytes of a partial frame",
                        self.read_buf.len()
                    );
                }
                return Err(TransportError::Closed);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Number of frames sent so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Number of frames received so far.
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Open a stream to `address`, retrying according to `policy`.
///
/// Every failed attempt (including a per-attempt timeout) is logged and
/// followed by `policy.delay`. With an unbounded policy this only returns
/// once a connection succeeds.
pub async fn connect_with_retry<N, T>(
    network: &N,
    time: &T,
    address: &str,
    policy: &RetryPolicy,
) -> TransportResult<N::Stream>
where
    N: NetworkProvider,
    T: TimeProvider,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);

        let outcome = match policy.connect_timeout {
            Some(timeout) => match time.timeout(timeout, network.connect(address)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(elapsed) => Err(elapsed.to_string()),
            },
            None => network.connect(address).await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(stream) => {
                if attempt > 1 {
                    tracing::info!("Connected to {} after {} attempts", address, attempt);
                }
                return Ok(stream);
            }
            Err(last_error) => {
                if !policy.allows_retry_after(attempt) {
                    return Err(TransportError::ConnectRetriesExhausted {
                        address: address.to_string(),
                        attempts: attempt,
                        last_error,
                    });
                }
                tracing::warn!(
                    "Connection attempt {} to {} failed: {}; retrying in {:?}",
                    attempt,
                    address,
                    last_error,
                    policy.delay
                );
                time.sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_small_reads() {
        // A tiny duplex buffer forces frames to be split across many reads.
        let (a, b) = tokio::io::duplex(5);
        let mut left = Connection::new(a);
        let mut right = Connection::new(b);

        let writer = async {
            left.send(b"envelope for round 0").await.expect("send");
            left.send(b"envelope for round 1").await.expect("send");
            left
        };
        let reader = async {
            let first = right.receive().await.expect("receive");
            let second = right.receive().await.expect("receive");
            (first, second)
        };

        let (left, (first, second)) = tokio::join!(writer, reader);
        assert_eq!(first, b"envelope for round 0");
        assert_eq!(second, b"envelope for round 1");
        assert_eq!(left.frames_sent(), 2);
    }

    #[tokio::test]
    async fn test_receive_reports_closed() {
        let (a, b) = tokio::io::duplex(64);
        let mut right = Connection::new(b);
        drop(a);

        let result = right.receive().await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
