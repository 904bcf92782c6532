//! # Event Subscriber
//!
//! Receiving side of the bus. A lagged receiver skips to the oldest
//! retained event rather than failing: every listener here reconciles from
//! the latest canonical state, so missed intermediate events are tolerable.

use crate::events::{EventFilter, NodeEvent};
use tokio::sync::broadcast;
use tracing::warn;

/// A filtered handle onto the event stream.
pub struct Subscription {
    receiver: broadcast::Receiver<NodeEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<NodeEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscription lagged, skipping to oldest retained event");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no matching event is queued.
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
