use serde::{Deserialize, Serialize};

use crate::models::{ChatMark, Reminder, Settings};

/// Store-change events pushed to every connected UI over the gateway, so
/// panels refresh without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    MarkSaved { mark: ChatMark },
    MarkDeleted { id: String },
    MarksCleared,
    ReminderCreated { reminder: Reminder },
    ReminderDeleted { id: String },
    ReminderSnoozed { reminder: Reminder },
    /// The scheduler delivered this reminder's notification.
    ReminderFired { reminder: Reminder },
    SettingsUpdated { settings: Settings },
    /// A replication pass finished; direction is "upload" or "download".
    SyncCompleted { direction: String },
}
