//! Notification channel
//!
//! Bridges the engine's [`NotificationSink`] port onto a bounded tokio
//! channel. Sending never waits: when the consumer falls behind, events are
//! dropped and counted.

use copytrade_core::{EngineEvent, Priority};
use copytrade_ports::NotificationSink;
use log::{debug, error, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

pub struct ChannelNotifier {
    tx: Sender<EngineEvent>,
    dropped: AtomicU64,
}

impl ChannelNotifier {
    /// Create the notifier and the receiving end for the messaging layer
    pub fn new(capacity: usize) -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events discarded because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if event.priority() == Priority::High {
                    error!("[NOTIFY] channel full, dropped high-priority event: {event:?}");
                } else {
                    warn!("[NOTIFY] channel full, event dropped");
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("[NOTIFY] no subscriber, event dropped");
            }
        }
    }
}
