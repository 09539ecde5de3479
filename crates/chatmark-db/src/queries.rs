use anyhow::Result;
use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

use chatmark_types::models::{ChatMark, Label, Reminder, Settings};
use chatmark_types::time::now_ms;

use crate::Database;

impl Database {
    // -- Marks --

    /// Upsert by id. Initializes `created_at` on first insert, preserves it on
    /// update, always stamps `updated_at`. Returns the stored record.
    pub fn save_mark(&self, mark: &ChatMark) -> Result<ChatMark> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO marks (id, platform, chat_id, chat_name, labels, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     platform   = excluded.platform,
                     chat_id    = excluded.chat_id,
                     chat_name  = excluded.chat_name,
                     labels     = excluded.labels,
                     notes      = excluded.notes,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    mark.id,
                    mark.platform,
                    mark.chat_id,
                    mark.chat_name,
                    serde_json::to_string(&mark.labels)?,
                    mark.notes,
                    now,
                ],
            )?;
            query_mark(conn, &mark.id)?
                .ok_or_else(|| anyhow::anyhow!("mark vanished after save: {}", mark.id))
        })
    }

    pub fn get_mark(&self, id: &str) -> Result<Option<ChatMark>> {
        self.with_conn(|conn| query_mark(conn, id))
    }

    /// All marks, in no guaranteed order; callers sort.
    pub fn list_marks(&self) -> Result<Vec<ChatMark>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {MARK_COLS} FROM marks"))?;
            let rows = stmt
                .query_map([], mark_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns true iff a row was removed. Never errors on an unknown id.
    pub fn delete_mark(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM marks WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn clear_marks(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM marks", [])?;
            Ok(())
        })
    }

    /// Full replace: delete-all-then-insert-all in one transaction, keeping
    /// the incoming records' timestamps verbatim. Used by download and import.
    pub fn replace_marks(&self, marks: &[ChatMark]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM marks", [])?;
            for mark in marks {
                tx.execute(
                    "INSERT INTO marks (id, platform, chat_id, chat_name, labels, notes, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        mark.id,
                        mark.platform,
                        mark.chat_id,
                        mark.chat_name,
                        serde_json::to_string(&mark.labels)?,
                        mark.notes,
                        mark.created_at,
                        mark.updated_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Reminders --

    /// Upsert by id, same timestamp rules as marks.
    pub fn save_reminder(&self, reminder: &Reminder) -> Result<Reminder> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reminders (id, message_id, reminder_time, active, fired_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     message_id    = excluded.message_id,
                     reminder_time = excluded.reminder_time,
                     active        = excluded.active,
                     fired_at      = excluded.fired_at,
                     updated_at    = excluded.updated_at",
                rusqlite::params![
                    reminder.id,
                    reminder.message_id,
                    reminder.reminder_time,
                    reminder.active,
                    reminder.fired_at,
                    now,
                ],
            )?;
            query_reminder(conn, &reminder.id)?
                .ok_or_else(|| anyhow::anyhow!("reminder vanished after save: {}", reminder.id))
        })
    }

    pub fn get_reminder(&self, id: &str) -> Result<Option<Reminder>> {
        self.with_conn(|conn| query_reminder(conn, id))
    }

    pub fn list_reminders(&self) -> Result<Vec<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {REMINDER_COLS} FROM reminders"))?;
            let rows = stmt
                .query_map([], reminder_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All reminders loosely attached to one mark (soft FK lookup).
    pub fn reminders_for_message(&self, message_id: &str) -> Result<Vec<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLS} FROM reminders WHERE message_id = ?1"
            ))?;
            let rows = stmt
                .query_map([message_id], reminder_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The at-most-one active reminder for a mark. The store does not enforce
    /// uniqueness; when history leaves more than one active row, the soonest
    /// wins.
    pub fn find_active_reminder(&self, message_id: &str) -> Result<Option<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLS} FROM reminders
                 WHERE message_id = ?1 AND active = 1
                 ORDER BY reminder_time ASC LIMIT 1"
            ))?;
            stmt.query_row([message_id], reminder_from_row).optional()
        })
    }

    pub fn delete_reminder(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM reminders WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn clear_reminders(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM reminders", [])?;
            Ok(())
        })
    }

    /// Retention pass: drop fired reminders whose `fired_at` is older than the
    /// given cutoff. Returns how many were removed.
    pub fn delete_fired_before(&self, cutoff_ms: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM reminders WHERE fired_at IS NOT NULL AND fired_at < ?1",
                [cutoff_ms],
            )?;
            Ok(n)
        })
    }

    pub fn replace_reminders(&self, reminders: &[Reminder]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM reminders", [])?;
            for reminder in reminders {
                tx.execute(
                    "INSERT INTO reminders (id, message_id, reminder_time, active, fired_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        reminder.id,
                        reminder.message_id,
                        reminder.reminder_time,
                        reminder.active,
                        reminder.fired_at,
                        reminder.created_at,
                        reminder.updated_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Settings --

    /// Defaults merged with whatever partial object is stored. Never errors on
    /// an empty table.
    pub fn get_settings(&self) -> Result<Settings> {
        self.with_conn(|conn| {
            let stored = query_settings_value(conn)?;
            Ok(settings_from_value(&stored))
        })
    }

    /// Shallow merge of `partial` over the stored object; fields absent from
    /// the patch keep their current value. Returns the merged settings.
    pub fn update_settings(&self, partial: &Value) -> Result<Settings> {
        self.with_conn(|conn| {
            let mut stored = query_settings_value(conn)?;
            if let (Some(base), Some(patch)) = (stored.as_object_mut(), partial.as_object()) {
                for (key, value) in patch {
                    base.insert(key.clone(), value.clone());
                }
            }
            conn.execute(
                "INSERT INTO settings (id, data) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                [serde_json::to_string(&stored)?],
            )?;
            Ok(settings_from_value(&stored))
        })
    }

    // -- Labels --

    pub fn list_labels(&self) -> Result<Vec<Label>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, color FROM labels")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Label {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        color: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn replace_labels(&self, labels: &[Label]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM labels", [])?;
            for label in labels {
                tx.execute(
                    "INSERT INTO labels (id, name, color) VALUES (?1, ?2, ?3)",
                    rusqlite::params![label.id, label.name, label.color],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}

const MARK_COLS: &str = "id, platform, chat_id, chat_name, labels, notes, created_at, updated_at";
const REMINDER_COLS: &str =
    "id, message_id, reminder_time, active, fired_at, created_at, updated_at";

fn query_mark(conn: &Connection, id: &str) -> Result<Option<ChatMark>> {
    let mut stmt = conn.prepare(&format!("SELECT {MARK_COLS} FROM marks WHERE id = ?1"))?;
    stmt.query_row([id], mark_from_row).optional()
}

fn query_reminder(conn: &Connection, id: &str) -> Result<Option<Reminder>> {
    let mut stmt = conn.prepare(&format!("SELECT {REMINDER_COLS} FROM reminders WHERE id = ?1"))?;
    stmt.query_row([id], reminder_from_row).optional()
}

fn mark_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<ChatMark, rusqlite::Error> {
    let id: String = row.get(0)?;
    let labels_json: String = row.get(4)?;
    let labels = serde_json::from_str(&labels_json).unwrap_or_else(|e| {
        warn!("Corrupt labels on mark '{}': {}", id, e);
        Vec::new()
    });
    Ok(ChatMark {
        id,
        platform: row.get(1)?,
        chat_id: row.get(2)?,
        chat_name: row.get(3)?,
        labels,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn reminder_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<Reminder, rusqlite::Error> {
    Ok(Reminder {
        id: row.get(0)?,
        message_id: row.get(1)?,
        reminder_time: row.get(2)?,
        active: row.get(3)?,
        fired_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn query_settings_value(conn: &Connection) -> Result<Value> {
    let mut stmt = conn.prepare("SELECT data FROM settings WHERE id = 1")?;
    let stored: Option<String> = stmt.query_row([], |row| row.get(0)).optional()?;
    match stored {
        Some(json) => Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Corrupt settings blob, falling back to defaults: {}", e);
            Value::Object(serde_json::Map::new())
        })),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

fn settings_from_value(value: &Value) -> Settings {
    serde_json::from_value(value.clone()).unwrap_or_else(|e| {
        warn!("Unreadable settings fields, using defaults: {}", e);
        Settings::default()
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
