//! In-process notification fan-out.

use tokio::sync::broadcast;

use crate::core::{Notification, Notifier};

/// Publishes notifications on a tokio broadcast channel.
///
/// Publishing with no subscriber attached is reported as an error, which the
/// ledger logs and ignores.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    /// Channel buffering up to `capacity` notifications per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New subscriber receiving notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, notification: &Notification) -> Result<(), String> {
        self.tx
            .send(notification.clone())
            .map(|_| ())
            .map_err(|_| "no notification subscribers".to_string())
    }
}
