//! Progress events for chain publishing
//!
//! The bus wraps `tokio::sync::broadcast`. Emitting never blocks and events
//! are dropped when nobody is subscribed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::Platform;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; lagging subscribers lose the oldest events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ChainStarted {
        platform: Platform,
        segments: usize,
    },
    SegmentPublished {
        platform: Platform,
        index: usize,
        post_id: String,
    },
    SegmentFailed {
        platform: Platform,
        index: usize,
        error: String,
    },
    ChainCompleted {
        platform: Platform,
        published: usize,
        total: usize,
    },
    /// The account was deactivated and must be reconnected
    AccountDeactivated {
        platform: Platform,
        account_id: String,
    },
}
