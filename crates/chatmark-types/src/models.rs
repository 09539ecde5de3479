use serde::{Deserialize, Serialize};

/// Platforms a chat can be marked on. `ChatMark.platform` is kept as a plain
/// string in storage; this list is what the router accepts on save.
pub const SUPPORTED_PLATFORMS: &[&str] = &["whatsapp", "telegram", "messenger", "instagram"];

/// A user-created annotation pinning labels and a note to one external
/// conversation. The `id` is the sole identity: an opaque composite string
/// like `"wa:123"` minted by the collaborator that observed the chat.
///
/// Two marks for the same `(platform, chat_id)` under different ids are
/// allowed; the store enforces id uniqueness only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMark {
    pub id: String,
    pub platform: String,
    pub chat_id: String,
    /// Display name; may be updated in place as the collaborator re-observes it.
    pub chat_name: String,
    /// Label tags; writers deduplicate, order is insignificant.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Free text, bounded by the UI, not the store.
    #[serde(default)]
    pub notes: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A scheduled one-shot notification tied loosely to a ChatMark.
///
/// `message_id` is a soft foreign key: a reminder may outlive its mark and
/// must still be delivered (with a fallback title).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub message_id: String,
    /// Absolute fire time, epoch milliseconds.
    pub reminder_time: i64,
    pub active: bool,
    /// Stamped exactly once when the reminder fires; cleared only by snooze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Catalog entry for the label picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// Built-in label catalog, seeded on first run. Users can extend it; marks
/// are not strictly validated against it.
pub fn default_labels() -> Vec<Label> {
    [
        ("important", "Important", "#e74c3c"),
        ("work", "Work", "#3498db"),
        ("personal", "Personal", "#2ecc71"),
        ("follow-up", "Follow-up", "#f39c12"),
        ("urgent", "Urgent", "#9b59b6"),
    ]
    .iter()
    .map(|(id, name, color)| Label {
        id: (*id).to_string(),
        name: (*name).to_string(),
        color: (*color).to_string(),
    })
    .collect()
}

/// User settings. A single record, default-filled on first read and
/// shallow-merged on save, so a partial update never resets other fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default = "default_reminder_minutes")]
    pub default_reminder_minutes: u32,
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            auto_sync: true,
            default_reminder_minutes: default_reminder_minutes(),
            theme: default_theme(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reminder_minutes() -> u32 {
    60
}

fn default_theme() -> String {
    "system".to_string()
}
