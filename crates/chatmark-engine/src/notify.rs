use async_trait::async_trait;
use tracing::info;

/// What the host notification capability shows when a reminder fires.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub reminder_id: String,
    /// The chat's display name, or a fallback when the mark is gone.
    pub title: String,
    /// The mark's note, clipped for display.
    pub body: String,
    /// Action buttons; UIs wire "view" to opening the chat.
    pub actions: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Default notifier: writes the notification to the log. Desktop shells
/// implement [`Notifier`] against their own toast facility.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            "reminder {} fired for '{}': {}",
            notification.reminder_id, notification.title, notification.body
        );
        Ok(())
    }
}
