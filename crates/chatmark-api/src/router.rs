use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use serde_json::{Value, json};
use tracing::{debug, warn};

use chatmark_db::Database;
use chatmark_engine::scheduler::{ArmStatus, MIN_DELAY_MS};
use chatmark_engine::{ReplicationEngine, Scheduler, SessionGuard, SyncOutcome};
use chatmark_gateway::dispatcher::Dispatcher;
use chatmark_types::api::{
    CreateReminderRequest, Envelope, ExportBundle, EXPORT_VERSION, Request, SaveMarkRequest,
};
use chatmark_types::events::StoreEvent;
use chatmark_types::models::{ChatMark, Label, Reminder, SUPPORTED_PLATFORMS};
use chatmark_types::time::now_ms;

/// The Message Router: validates the requested operation, forwards it to the
/// matching component, and wraps the result in the uniform envelope. No
/// retries, no queuing; every operation is best-effort single-shot.
pub struct Router {
    db: Arc<Database>,
    scheduler: Scheduler,
    replication: ReplicationEngine,
    sessions: Arc<SessionGuard>,
    dispatcher: Dispatcher,
}

impl Router {
    pub fn new(
        db: Arc<Database>,
        scheduler: Scheduler,
        replication: ReplicationEngine,
        sessions: Arc<SessionGuard>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            db,
            scheduler,
            replication,
            sessions,
            dispatcher,
        }
    }

    /// Dispatch a raw request value. An unrecognized or malformed operation
    /// becomes an error envelope rather than a transport-level failure.
    pub async fn dispatch_value(&self, raw: Value) -> Envelope {
        match serde_json::from_value::<Request>(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Envelope::err(format!("invalid request: {e}")),
        }
    }

    pub async fn dispatch(&self, request: Request) -> Envelope {
        match self.handle(request).await {
            Ok(data) => Envelope::ok(data),
            Err(e) => {
                debug!("operation failed: {:#}", e);
                Envelope::err(e.to_string())
            }
        }
    }

    async fn handle(&self, request: Request) -> anyhow::Result<Value> {
        match request {
            Request::SaveMark(req) => self.save_mark(req).await,
            Request::GetMark { id } => Ok(json!(self.db.get_mark(&id)?)),
            Request::ListMarks => Ok(json!(self.db.list_marks()?)),
            Request::DeleteMark { id } => self.delete_mark(&id).await,
            Request::ClearMarks => self.clear_marks().await,
            Request::CreateReminder(req) => self.create_reminder(req).await,
            Request::DeleteReminder { id } => self.delete_reminder(&id).await,
            Request::SnoozeReminder { id, minutes } => self.snooze_reminder(&id, minutes).await,
            Request::GetSettings => Ok(json!(self.db.get_settings()?)),
            Request::UpdateSettings(partial) => self.update_settings(partial).await,
            Request::ExportAll => self.export_all(),
            Request::ImportAll(blob) => self.import_all(blob).await,
            Request::SyncUpload => self.sync_upload().await,
            Request::SyncDownload => self.sync_download().await,
            Request::SessionStart { user_id } => self.session_start(user_id).await,
        }
    }

    async fn save_mark(&self, req: SaveMarkRequest) -> anyhow::Result<Value> {
        if req.id.trim().is_empty() {
            bail!("mark id must not be empty");
        }
        if !SUPPORTED_PLATFORMS.contains(&req.platform.as_str()) {
            bail!("unsupported platform: {}", req.platform);
        }

        // Writers own label dedup; order of first appearance is kept
        let mut seen = HashSet::new();
        let labels: Vec<String> = req
            .labels
            .into_iter()
            .filter(|label| seen.insert(label.clone()))
            .collect();

        let mark = ChatMark {
            id: req.id,
            platform: req.platform,
            chat_id: req.chat_id,
            chat_name: req.chat_name,
            labels,
            notes: req.notes,
            created_at: 0,
            updated_at: 0,
        };
        let stored = self.db.save_mark(&mark)?;

        self.dispatcher.broadcast(StoreEvent::MarkSaved {
            mark: stored.clone(),
        });
        self.auto_upload().await;
        Ok(json!(stored))
    }

    async fn delete_mark(&self, id: &str) -> anyhow::Result<Value> {
        let deleted = self.db.delete_mark(id)?;

        // Independent best-effort pass over loosely attached reminders; the
        // mark delete above stands even if this part fails.
        match self.db.reminders_for_message(id) {
            Ok(reminders) => {
                for reminder in reminders {
                    if let Err(e) = self.scheduler.cancel(&reminder.id).await {
                        warn!("failed to cancel reminder {}: {}", reminder.id, e);
                    }
                }
            }
            Err(e) => warn!("failed to look up reminders for mark {}: {}", id, e),
        }

        if deleted {
            self.dispatcher.broadcast(StoreEvent::MarkDeleted {
                id: id.to_string(),
            });
            self.auto_upload().await;
        }
        Ok(json!({ "deleted": deleted }))
    }

    async fn clear_marks(&self) -> anyhow::Result<Value> {
        self.db.clear_marks()?;
        self.dispatcher.broadcast(StoreEvent::MarksCleared);
        self.auto_upload().await;
        Ok(json!({ "cleared": true }))
    }

    async fn create_reminder(&self, req: CreateReminderRequest) -> anyhow::Result<Value> {
        if req.message_id.trim().is_empty() {
            bail!("reminder message id must not be empty");
        }
        if req.reminder_time <= 0 {
            bail!("reminder time must be a positive epoch-millisecond timestamp");
        }

        // At most one active reminder per mark: find-existing-then-replace
        if let Some(existing) = self.db.find_active_reminder(&req.message_id)? {
            self.scheduler.cancel(&existing.id).await?;
        }

        let (reminder, status) = self
            .scheduler
            .create(&req.message_id, req.reminder_time)
            .await?;

        self.dispatcher.broadcast(StoreEvent::ReminderCreated {
            reminder: reminder.clone(),
        });
        self.auto_upload().await;

        let mut data = json!({ "reminder": reminder });
        if status == ArmStatus::BelowFloor {
            data["warning"] = json!(format!(
                "delivery within {}s of now is not guaranteed",
                MIN_DELAY_MS / 1000
            ));
        }
        Ok(data)
    }

    async fn delete_reminder(&self, id: &str) -> anyhow::Result<Value> {
        let deleted = self.scheduler.cancel(id).await?;
        if deleted {
            self.dispatcher.broadcast(StoreEvent::ReminderDeleted {
                id: id.to_string(),
            });
            self.auto_upload().await;
        }
        Ok(json!({ "deleted": deleted }))
    }

    async fn snooze_reminder(&self, id: &str, minutes: u32) -> anyhow::Result<Value> {
        match self.scheduler.snooze(id, minutes).await? {
            Some(reminder) => {
                self.auto_upload().await;
                Ok(json!(reminder))
            }
            None => Ok(Value::Null),
        }
    }

    async fn update_settings(&self, partial: Value) -> anyhow::Result<Value> {
        if !partial.is_object() {
            bail!("settings update must be an object");
        }
        let settings = self.db.update_settings(&partial)?;
        self.dispatcher.broadcast(StoreEvent::SettingsUpdated {
            settings: settings.clone(),
        });
        Ok(json!(settings))
    }

    fn export_all(&self) -> anyhow::Result<Value> {
        let bundle = ExportBundle {
            version: EXPORT_VERSION,
            exported_at: now_ms(),
            marks: self.db.list_marks()?,
            reminders: self.db.list_reminders()?,
            settings: self.db.get_settings()?,
            labels: self.db.list_labels()?,
        };
        Ok(json!(bundle))
    }

    /// Per-kind replace. The blob must carry a version and at least one
    /// recognized collection; a kind that fails to parse is skipped without
    /// touching that collection, while the kinds that validate still apply.
    async fn import_all(&self, blob: Value) -> anyhow::Result<Value> {
        let Some(obj) = blob.as_object() else {
            bail!("import blob must be an object");
        };
        if !obj.contains_key("version") {
            bail!("import blob is missing its version");
        }
        let recognized = ["marks", "reminders", "settings", "labels"];
        if !recognized.iter().any(|key| obj.contains_key(*key)) {
            bail!("import blob contains no recognized collections");
        }

        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        if let Some(value) = obj.get("marks") {
            match serde_json::from_value::<Vec<ChatMark>>(value.clone()) {
                Ok(marks) => {
                    self.db.replace_marks(&marks)?;
                    applied.push("marks");
                }
                Err(e) => {
                    warn!("import skipped malformed marks: {}", e);
                    skipped.push("marks");
                }
            }
        }
        if let Some(value) = obj.get("reminders") {
            match serde_json::from_value::<Vec<Reminder>>(value.clone()) {
                Ok(reminders) => {
                    self.db.replace_reminders(&reminders)?;
                    applied.push("reminders");
                }
                Err(e) => {
                    warn!("import skipped malformed reminders: {}", e);
                    skipped.push("reminders");
                }
            }
        }
        if let Some(value) = obj.get("settings") {
            if value.is_object() {
                self.db.update_settings(value)?;
                applied.push("settings");
            } else {
                warn!("import skipped malformed settings");
                skipped.push("settings");
            }
        }
        if let Some(value) = obj.get("labels") {
            match serde_json::from_value::<Vec<Label>>(value.clone()) {
                Ok(labels) => {
                    self.db.replace_labels(&labels)?;
                    applied.push("labels");
                }
                Err(e) => {
                    warn!("import skipped malformed labels: {}", e);
                    skipped.push("labels");
                }
            }
        }

        // Imported reminders need fresh timers
        if applied.contains(&"reminders") {
            self.scheduler.restore().await?;
        }
        self.dispatcher.broadcast(StoreEvent::SyncCompleted {
            direction: "import".to_string(),
        });
        self.auto_upload().await;
        Ok(json!({ "applied": applied, "skipped": skipped }))
    }

    async fn sync_upload(&self) -> anyhow::Result<Value> {
        let outcome = self.replication.upload().await?;
        Ok(json!({ "status": outcome_label(outcome) }))
    }

    async fn sync_download(&self) -> anyhow::Result<Value> {
        let outcome = self.replication.download().await?;
        if outcome == SyncOutcome::Completed {
            // Downloaded reminders need fresh timers
            self.scheduler.restore().await?;
        }
        Ok(json!({ "status": outcome_label(outcome) }))
    }

    /// Sign-in trigger: record the user, then run the one-time download this
    /// session owes. Reopening the UI later in the same session must not
    /// re-download, or marks created while the UI was closed would be wiped
    /// by a stale remote snapshot.
    async fn session_start(&self, user_id: String) -> anyhow::Result<Value> {
        if user_id.trim().is_empty() {
            bail!("user id must not be empty");
        }
        self.replication.set_user(Some(user_id.clone())).await;

        if self.sessions.has_synced_this_session(&user_id).await {
            return Ok(json!({ "downloaded": false }));
        }

        let outcome = self.replication.download().await?;
        if outcome == SyncOutcome::Skipped {
            // A pass was already in flight; leave the session un-marked so
            // the next sign-in event retries
            return Ok(json!({ "downloaded": false }));
        }

        self.scheduler.restore().await?;
        self.sessions.mark_synced(&user_id).await;
        Ok(json!({ "downloaded": true }))
    }

    /// Debounced upload trigger, gated by the auto-sync setting.
    async fn auto_upload(&self) {
        match self.db.get_settings() {
            Ok(settings) if settings.auto_sync => self.replication.mark_dirty().await,
            Ok(_) => debug!("auto-sync disabled, skipping debounced upload"),
            Err(e) => warn!("failed to read settings for auto-sync: {}", e),
        }
    }
}

fn outcome_label(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Completed => "completed",
        SyncOutcome::Skipped => "skipped",
    }
}
