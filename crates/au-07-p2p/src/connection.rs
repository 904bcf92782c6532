//! # Connection Plumbing
//!
//! One [`Connection`] per socket: outbound frames flow through an mpsc
//! channel drained by a writer task (serializing writes per connection),
//! and responses are matched to in-flight requests through the frame's
//! request id.

use crate::errors::P2pError;
use crate::wire::{write_frame, Frame, Message};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Default deadline for a peer request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle to one live socket.
pub struct Connection {
    pub channel_id: u64,
    outbound: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    next_request_id: AtomicU64,
}

impl Connection {
    pub fn new(channel_id: u64, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            channel_id,
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Detached connection whose writer is gone; sends fail cleanly.
    pub fn for_tests(channel_id: u64) -> Self {
        let (outbound, _receiver) = mpsc::channel(1);
        Self::new(channel_id, outbound)
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fire-and-forget send under a fresh request id.
    pub async fn send(&self, message: Message) -> Result<(), P2pError> {
        let frame = Frame {
            request_id: self.next_id(),
            message,
        };
        self.outbound
            .send(frame)
            .await
            .map_err(|_| P2pError::ConnectionClosed)
    }

    /// Answer a peer-initiated request, echoing its id.
    pub async fn respond(&self, request_id: u64, message: Message) -> Result<(), P2pError> {
        self.outbound
            .send(Frame {
                request_id,
                message,
            })
            .await
            .map_err(|_| P2pError::ConnectionClosed)
    }

    /// Send a request and await its response (or time out).
    pub async fn request(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, P2pError> {
        let request_id = self.next_id();
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(request_id, sender);

        let sent = self
            .outbound
            .send(Frame {
                request_id,
                message,
            })
            .await;
        if sent.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(P2pError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(P2pError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(P2pError::Timeout)
            }
        }
    }

    /// Route an inbound frame into a waiting request, if one matches.
    /// Returns false when the frame is peer-initiated.
    pub fn fulfill(&self, request_id: u64, message: &Message) -> bool {
        let Some(sender) = self.pending.lock().remove(&request_id) else {
            return false;
        };
        if sender.send(message.clone()).is_err() {
            debug!(request_id, "response arrived after the requester gave up");
        }
        true
    }

    /// Drop every in-flight request (connection teardown).
    pub fn abort_pending(&self) {
        self.pending.lock().clear();
    }
}

/// Drain outbound frames onto the socket; returns when the channel or the
/// socket closes.
pub async fn run_writer<W>(mut writer: W, mut outbound: mpsc::Receiver<Frame>)
where
    W: AsyncWriteExt + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if write_frame(&mut writer, &frame).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_is_fulfilled_by_matching_id() {
        let (sender, mut receiver) = mpsc::channel(8);
        let connection = std::sync::Arc::new(Connection::new(1, sender));

        let conn = connection.clone();
        let request = tokio::spawn(async move {
            conn.request(Message::GetMempoolHashes, Duration::from_secs(5))
                .await
        });

        // Observe the outgoing frame, then answer it.
        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.message, Message::GetMempoolHashes);
        let answered = connection.fulfill(
            frame.request_id,
            &Message::MempoolHashes {
                hashes: vec![[1u8; 32]],
            },
        );
        assert!(answered);

        let response = request.await.unwrap().unwrap();
        assert!(matches!(response, Message::MempoolHashes { .. }));
    }

    #[tokio::test]
    async fn unmatched_frame_is_not_a_response() {
        let connection = Connection::for_tests(1);
        assert!(!connection.fulfill(99, &Message::Pong));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out() {
        let (sender, _receiver) = mpsc::channel(8);
        let connection = Connection::new(1, sender);

        let result = connection
            .request(Message::Ping, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(P2pError::Timeout)));
    }

    #[tokio::test]
    async fn send_on_closed_connection_fails() {
        // for_tests drops the receiver at construction, so the channel is
        // already closed.
        let connection = Connection::for_tests(7);
        assert!(connection.send(Message::Ping).await.is_err());
    }
}
