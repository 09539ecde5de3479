use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use chatmark_db::Database;
use chatmark_gateway::dispatcher::Dispatcher;
use chatmark_types::events::StoreEvent;
use chatmark_types::models::Reminder;
use chatmark_types::time::now_ms;

use crate::notify::{Notification, Notifier};

/// Delays under this floor still arm, but delivery is not guaranteed: the
/// host timer facility the source system wraps cannot fire sooner than this.
pub const MIN_DELAY_MS: i64 = 60_000;

/// Fired reminders stay in the store as history for this long before the
/// startup retention pass removes them.
pub const RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Notification bodies are clipped to this many characters.
const MAX_BODY_CHARS: usize = 100;

/// Outcome of arming a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmStatus {
    Armed,
    /// Armed anyway, but under the host timer floor: the operation succeeds
    /// and the caller must surface the warning.
    BelowFloor,
}

/// Turns reminder records into armed timers and delivers notifications when
/// they fire. Arm state lives in memory only; [`Scheduler::restore`] rebuilds
/// it from storage after a restart.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Dispatcher,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                db,
                notifier,
                dispatcher,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create-and-arm. Mints the id; callers replace any existing active
    /// reminder for the same mark themselves (the one-per-mark invariant is
    /// soft and lives with them).
    pub async fn create(
        &self,
        message_id: &str,
        reminder_time: i64,
    ) -> anyhow::Result<(Reminder, ArmStatus)> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            reminder_time,
            active: true,
            fired_at: None,
            created_at: 0,
            updated_at: 0,
        };
        let stored = self.inner.db.save_reminder(&reminder)?;
        let status = self.arm(&stored).await;
        Ok((stored, status))
    }

    /// Register a delayed fire for the reminder. Re-arming an id replaces the
    /// previous timer.
    pub async fn arm(&self, reminder: &Reminder) -> ArmStatus {
        let delay_ms = reminder.reminder_time - now_ms();
        let status = if delay_ms < MIN_DELAY_MS {
            warn!(
                "reminder {} armed {}ms out, under the {}ms host floor: delivery is not guaranteed",
                reminder.id, delay_ms, MIN_DELAY_MS
            );
            ArmStatus::BelowFloor
        } else {
            ArmStatus::Armed
        };

        let scheduler = self.clone();
        let id = reminder.id.clone();
        let sleep = Duration::from_millis(delay_ms.max(0) as u64);
        let fire_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(sleep).await;
            scheduler.fire(&fire_id).await;
        });

        let mut timers = self.inner.timers.lock().await;
        if let Some(previous) = timers.insert(id, task) {
            previous.abort();
        }
        status
    }

    /// Abort the timer and delete the record in one operation, so no late
    /// fire can follow a cancel. Returns false for an unknown id.
    pub async fn cancel(&self, id: &str) -> anyhow::Result<bool> {
        if let Some(task) = self.inner.timers.lock().await.remove(id) {
            task.abort();
        }
        self.inner.db.delete_reminder(id)
    }

    /// Push the fire time out `minutes` from now, clear any earlier fire
    /// stamp, reactivate, re-arm. Returns None for an unknown id.
    pub async fn snooze(&self, id: &str, minutes: u32) -> anyhow::Result<Option<Reminder>> {
        let Some(mut reminder) = self.inner.db.get_reminder(id)? else {
            return Ok(None);
        };
        reminder.reminder_time = now_ms() + i64::from(minutes) * 60_000;
        reminder.fired_at = None;
        reminder.active = true;
        let stored = self.inner.db.save_reminder(&reminder)?;
        self.arm(&stored).await;
        self.inner.dispatcher.broadcast(StoreEvent::ReminderSnoozed {
            reminder: stored.clone(),
        });
        Ok(Some(stored))
    }

    /// Startup recovery: in-memory arm state does not survive a restart, so
    /// re-arm every active reminder with a future fire time. The same pass
    /// applies the retention horizon to fired history. Returns how many
    /// reminders were armed.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let removed = self.inner.db.delete_fired_before(now_ms() - RETENTION_MS)?;
        if removed > 0 {
            info!("retention removed {} fired reminders", removed);
        }

        let now = now_ms();
        let mut armed = 0;
        for reminder in self.inner.db.list_reminders()? {
            if reminder.active && reminder.fired_at.is_none() && reminder.reminder_time > now {
                self.arm(&reminder).await;
                armed += 1;
            }
        }
        info!("scheduler restored, {} reminders armed", armed);
        Ok(armed)
    }

    /// Number of currently armed timers.
    pub async fn armed_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }

    async fn fire(&self, id: &str) {
        // Re-read instead of trusting captured state: the reminder may have
        // been deleted, deactivated or snoozed while the timer slept.
        let reminder = match self.inner.db.get_reminder(id) {
            Ok(Some(reminder)) => reminder,
            Ok(None) => {
                self.inner.timers.lock().await.remove(id);
                return;
            }
            Err(e) => {
                error!("failed to read reminder {} on fire: {}", id, e);
                self.inner.timers.lock().await.remove(id);
                return;
            }
        };
        if !reminder.active || reminder.fired_at.is_some() {
            self.inner.timers.lock().await.remove(id);
            return;
        }

        // Tolerate a missing mark: orphaned reminders still deliver.
        let mark = match self.inner.db.get_mark(&reminder.message_id) {
            Ok(mark) => mark,
            Err(e) => {
                warn!("failed to read mark {} on fire: {}", reminder.message_id, e);
                None
            }
        };
        let title = mark
            .as_ref()
            .map(|m| m.chat_name.clone())
            .unwrap_or_else(|| "Chat reminder".to_string());
        let body = truncate_chars(
            mark.as_ref().map(|m| m.notes.as_str()).unwrap_or(""),
            MAX_BODY_CHARS,
        );
        let notification = Notification {
            reminder_id: reminder.id.clone(),
            title,
            body,
            actions: vec!["view".to_string()],
        };
        let notifications_enabled = match self.inner.db.get_settings() {
            Ok(settings) => settings.notifications_enabled,
            Err(e) => {
                warn!("failed to read settings on fire: {}", e);
                true
            }
        };
        if notifications_enabled {
            if let Err(e) = self.inner.notifier.notify(notification).await {
                error!("notification for reminder {} failed: {}", reminder.id, e);
            }
        } else {
            info!("notifications disabled, reminder {} fires silently", reminder.id);
        }

        // Stamp fired_at exactly once; active stays as-is. The record remains
        // as history until the retention pass.
        let mut fired = reminder;
        fired.fired_at = Some(now_ms());
        match self.inner.db.save_reminder(&fired) {
            Ok(stored) => self
                .inner
                .dispatcher
                .broadcast(StoreEvent::ReminderFired { reminder: stored }),
            Err(e) => error!("failed to persist fire stamp for {}: {}", fired.id, e),
        }
        self.inner.timers.lock().await.remove(id);
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        value.chars().take(max_chars).collect()
    }
}
