use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMark, Label, Reminder, Settings};

/// Schema version stamped on export bundles and required on import.
pub const EXPORT_VERSION: u32 = 1;

// -- RPC requests --

/// The flat RPC surface. Collaborators and UIs POST one of these as
/// `{"op": "...", "payload": {...}}`; every operation answers with an
/// [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "op",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    SaveMark(SaveMarkRequest),
    GetMark { id: String },
    ListMarks,
    DeleteMark { id: String },
    ClearMarks,
    CreateReminder(CreateReminderRequest),
    DeleteReminder { id: String },
    SnoozeReminder { id: String, minutes: u32 },
    GetSettings,
    UpdateSettings(Value),
    ExportAll,
    ImportAll(Value),
    SyncUpload,
    SyncDownload,
    SessionStart { user_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMarkRequest {
    pub id: String,
    pub platform: String,
    pub chat_id: String,
    pub chat_name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReminderRequest {
    pub message_id: String,
    /// Absolute fire time, epoch milliseconds.
    pub reminder_time: i64,
}

// -- RPC responses --

/// Uniform response envelope: `{success, data?}` or `{success: false, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// -- Export / import --

/// Everything the store holds, in one portable blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    /// Epoch milliseconds at export time.
    pub exported_at: i64,
    pub marks: Vec<ChatMark>,
    pub reminders: Vec<Reminder>,
    pub settings: Settings,
    pub labels: Vec<Label>,
}
