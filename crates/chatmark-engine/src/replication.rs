use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatmark_db::Database;
use chatmark_gateway::dispatcher::Dispatcher;
use chatmark_types::events::StoreEvent;

use crate::error::{RemoteError, SyncError};
use crate::remote::RemoteStore;

/// Trailing-edge debounce window for auto-upload after local mutations.
pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(3);

/// Result of asking for a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// Another pass was in flight; this request was dropped, not queued. The
    /// next debounced trigger retries.
    Skipped,
}

/// One-way-at-a-time replication of the local mark and reminder collections
/// against the remote replica. Every sync is a full-collection overwrite in
/// one direction; there is deliberately no per-record merge.
#[derive(Clone)]
pub struct ReplicationEngine {
    inner: Arc<ReplicationInner>,
}

struct ReplicationInner {
    db: Arc<Database>,
    remote: Arc<dyn RemoteStore>,
    dispatcher: Dispatcher,
    /// Signed-in user the remote collections are scoped under.
    user_id: RwLock<Option<String>>,
    /// One flag for both directions: upload and download are mutually
    /// exclusive, and a concurrent request is dropped.
    busy: AtomicBool,
    /// Pending debounced upload, re-armed on every mutation.
    pending_upload: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
}

impl ReplicationEngine {
    pub fn new(db: Arc<Database>, remote: Arc<dyn RemoteStore>, dispatcher: Dispatcher) -> Self {
        Self::with_debounce(db, remote, dispatcher, DEBOUNCE_DELAY)
    }

    pub fn with_debounce(
        db: Arc<Database>,
        remote: Arc<dyn RemoteStore>,
        dispatcher: Dispatcher,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ReplicationInner {
                db,
                remote,
                dispatcher,
                user_id: RwLock::new(None),
                busy: AtomicBool::new(false),
                pending_upload: Mutex::new(None),
                debounce,
            }),
        }
    }

    pub async fn set_user(&self, user_id: Option<String>) {
        *self.inner.user_id.write().await = user_id;
    }

    pub async fn user(&self) -> Option<String> {
        self.inner.user_id.read().await.clone()
    }

    /// Local to remote, full replace: the remote collections become exactly
    /// the local ones.
    pub async fn upload(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.inner.busy) else {
            debug!("upload skipped: replication already in flight");
            return Ok(SyncOutcome::Skipped);
        };
        let user_id = self.user().await.ok_or(RemoteError::NoUser)?;

        let marks = self.inner.db.list_marks()?;
        let reminders = self.inner.db.list_reminders()?;
        self.inner.remote.replace_marks(&user_id, &marks).await?;
        self.inner
            .remote
            .replace_reminders(&user_id, &reminders)
            .await?;

        info!(
            "upload complete: {} marks, {} reminders",
            marks.len(),
            reminders.len()
        );
        self.inner.dispatcher.broadcast(StoreEvent::SyncCompleted {
            direction: "upload".to_string(),
        });
        Ok(SyncOutcome::Completed)
    }

    /// Remote to local, full replace: remote is truth, including replacing
    /// local with nothing when the remote is empty. Local-only records that
    /// were never uploaded are discarded; callers must not invoke this
    /// casually.
    pub async fn download(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_busy) = BusyGuard::acquire(&self.inner.busy) else {
            debug!("download skipped: replication already in flight");
            return Ok(SyncOutcome::Skipped);
        };
        let user_id = self.user().await.ok_or(RemoteError::NoUser)?;

        let marks = self.inner.remote.fetch_marks(&user_id).await?;
        let reminders = self.inner.remote.fetch_reminders(&user_id).await?;
        self.inner.db.replace_marks(&marks)?;
        self.inner.db.replace_reminders(&reminders)?;

        info!(
            "download complete: {} marks, {} reminders",
            marks.len(),
            reminders.len()
        );
        self.inner.dispatcher.broadcast(StoreEvent::SyncCompleted {
            direction: "download".to_string(),
        });
        Ok(SyncOutcome::Completed)
    }

    /// Trailing-edge debounce: each call cancels and reschedules the pending
    /// upload, so N mutations inside the window produce exactly one upload. A
    /// pending upload lost to process teardown is accepted; sync is
    /// best-effort.
    pub async fn mark_dirty(&self) {
        let engine = self.clone();
        let delay = self.inner.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.upload().await {
                Ok(SyncOutcome::Completed) => {}
                Ok(SyncOutcome::Skipped) => {
                    debug!("debounced upload skipped: replication busy")
                }
                Err(SyncError::Remote(RemoteError::NoUser)) => {
                    debug!("debounced upload dropped: no signed-in user")
                }
                Err(e) => warn!("debounced upload failed: {}", e),
            }
        });

        let mut pending = self.inner.pending_upload.lock().await;
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }
}

/// Clears the busy flag when the pass ends, even on error: a failed sync must
/// never wedge future attempts.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use chatmark_types::models::ChatMark;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> Arc<Database> {
        Arc::new(Database::open(&dir.path().join("test.db")).unwrap())
    }

    fn mark(id: &str) -> ChatMark {
        ChatMark {
            id: id.to_string(),
            platform: "whatsapp".to_string(),
            chat_id: id.to_string(),
            chat_name: "Ann".to_string(),
            labels: vec![],
            notes: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn engine_with(
        db: Arc<Database>,
        remote: Arc<MemoryRemoteStore>,
        debounce: Duration,
    ) -> ReplicationEngine {
        ReplicationEngine::with_debounce(db, remote, Dispatcher::new(), debounce)
    }

    #[tokio::test]
    async fn upload_replaces_remote_wholesale() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = engine_with(db.clone(), remote.clone(), DEBOUNCE_DELAY);
        engine.set_user(Some("alice".to_string())).await;

        remote.seed_marks("alice", vec![mark("stale:1"), mark("stale:2")]);
        db.save_mark(&mark("wa:1")).unwrap();

        let outcome = engine.upload().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Completed);

        let remote_marks = remote.marks("alice");
        assert_eq!(remote_marks.len(), 1);
        assert_eq!(remote_marks[0].id, "wa:1");
    }

    #[tokio::test]
    async fn download_replaces_local_including_empty() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = engine_with(db.clone(), remote.clone(), DEBOUNCE_DELAY);
        engine.set_user(Some("alice".to_string())).await;

        db.save_mark(&mark("local:only")).unwrap();

        // Remote is empty: download still wins and wipes local
        let outcome = engine.download().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Completed);
        assert!(db.list_marks().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_then_download_is_a_fixed_point() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = engine_with(db.clone(), remote.clone(), DEBOUNCE_DELAY);
        engine.set_user(Some("alice".to_string())).await;

        db.save_mark(&mark("wa:1")).unwrap();
        db.save_mark(&mark("tg:2")).unwrap();
        let before = db.list_marks().unwrap();

        engine.upload().await.unwrap();
        engine.download().await.unwrap();

        let mut after = db.list_marks().unwrap();
        let mut expected = before;
        after.sort_by(|a, b| a.id.cmp(&b.id));
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(after, expected);
    }

    #[tokio::test]
    async fn concurrent_pass_is_dropped_not_queued() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let remote = Arc::new(MemoryRemoteStore::with_latency(Duration::from_millis(200)));
        let engine = engine_with(db.clone(), remote.clone(), DEBOUNCE_DELAY);
        engine.set_user(Some("alice".to_string())).await;

        let uploader = engine.clone();
        let upload = tokio::spawn(async move { uploader.upload().await });

        // Give the upload time to take the busy flag, then try to download
        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = engine.download().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(remote.fetch_calls(), 0);

        assert_eq!(upload.await.unwrap().unwrap(), SyncOutcome::Completed);

        // The flag is released afterwards, so the next pass runs
        assert_eq!(engine.download().await.unwrap(), SyncOutcome::Completed);
    }

    #[tokio::test]
    async fn mark_dirty_coalesces_into_one_upload() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = engine_with(db.clone(), remote.clone(), Duration::from_millis(50));
        engine.set_user(Some("alice".to_string())).await;

        for i in 0..5 {
            db.save_mark(&mark(&format!("wa:{i}"))).unwrap();
            engine.mark_dirty().await;
        }

        tokio::time::sleep(Duration::from_millis(300)).await;

        // One upload for five mutations: two replace calls (marks, reminders)
        assert_eq!(remote.replace_calls(), 2);
        assert_eq!(remote.marks("alice").len(), 5);
    }

    #[tokio::test]
    async fn upload_without_user_fails_and_releases_flag() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = engine_with(db.clone(), remote.clone(), DEBOUNCE_DELAY);

        let err = engine.upload().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::NoUser)));

        // A failed pass must not leave the engine wedged
        engine.set_user(Some("alice".to_string())).await;
        assert_eq!(engine.upload().await.unwrap(), SyncOutcome::Completed);
    }
}
