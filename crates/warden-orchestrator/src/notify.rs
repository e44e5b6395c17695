use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use warden_core::{WardenError, WardenResult};

/// Best-effort delivery of warnings, escalations and reassignment notices.
///
/// A failed send is reported to the caller but must never stop enforcement
/// bookkeeping.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers `message` to `recipient` (an agent id or the coordinator).
    async fn send(&self, recipient: &str, message: &str) -> WardenResult<()>;
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, message: &str) -> WardenResult<()> {
        warn!(recipient = %recipient, message = %message, "notification");
        Ok(())
    }
}

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Agent id or coordinator id.
    pub recipient: String,
    /// Message text.
    pub message: String,
    /// Send time.
    pub sent_at: DateTime<Utc>,
}

/// Forwards notifications into a bounded channel without waiting.
///
/// A full or closed channel is a failed send.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, recipient: &str, message: &str) -> WardenResult<()> {
        self.tx
            .try_send(Notification {
                recipient: recipient.to_string(),
                message: message.to_string(),
                sent_at: Utc::now(),
            })
            .map_err(|e| WardenError::Transport(format!("notification to '{recipient}' dropped: {e}")))
    }
}
