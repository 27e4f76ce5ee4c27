/// Per-user notification fan-out.
///
/// Each connected user holds one bounded channel keyed by wallet.
/// Delivery is fire-and-forget: a full or gone channel drops the event
/// and never blocks the trading path. A wallet that re-subscribes
/// replaces its previous channel (last write wins), which is what a
/// client reconnect looks like.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::core::types::NotificationEvent;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct NotificationBus {
    channels: DashMap<String, mpsc::Sender<NotificationEvent>>,
    capacity: usize,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Register a wallet and get its event stream. An existing channel
    /// for the wallet is replaced.
    #[instrument(skip(self))]
    pub fn subscribe(&self, wallet: &str) -> mpsc::Receiver<NotificationEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.channels.insert(wallet.to_string(), tx).is_some() {
            info!(wallet, "Notification channel replaced");
        } else {
            info!(wallet, "Notification channel opened");
        }
        rx
    }

    pub fn unsubscribe(&self, wallet: &str) {
        if self.channels.remove(wallet).is_some() {
            info!(wallet, "Notification channel closed");
        }
    }

    /// Deliver an event to one wallet. Returns whether it was enqueued.
    pub fn notify(&self, wallet: &str, event: NotificationEvent) -> bool {
        match self.channels.get(wallet) {
            Some(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(wallet, "Notification dropped, channel full");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    drop(tx);
                    self.channels.remove(wallet);
                    debug!(wallet, "Notification channel gone, removed");
                    false
                }
            },
            None => false,
        }
    }

    /// Deliver an event to every connected wallet.
    pub fn broadcast(&self, event: &NotificationEvent) {
        let wallets: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for wallet in wallets {
            self.notify(&wallet, event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}
