use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chatmark_types::models::{ChatMark, Reminder};

use crate::error::RemoteError;

/// The remote replica. Collections are scoped per signed-in user and replaced
/// wholesale in either direction; there is deliberately no per-record API.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_marks(&self, user_id: &str) -> Result<Vec<ChatMark>, RemoteError>;
    async fn fetch_reminders(&self, user_id: &str) -> Result<Vec<Reminder>, RemoteError>;
    async fn replace_marks(&self, user_id: &str, marks: &[ChatMark]) -> Result<(), RemoteError>;
    async fn replace_reminders(
        &self,
        user_id: &str,
        reminders: &[Reminder],
    ) -> Result<(), RemoteError>;
}

#[derive(Serialize)]
struct ReplacePayload<'a, T> {
    items: &'a [T],
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct FetchPayload<T> {
    #[serde(default)]
    items: Vec<T>,
}

/// HTTP remote: `GET`/`PUT /users/{id}/marks|reminders` with `{"items": []}`
/// bodies. The server stamps a `syncedAt` field on each stored record; it is
/// stripped here simply by not being part of the local models.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn collection_url(&self, user_id: &str, kind: &str) -> String {
        format!("{}/users/{}/{}", self.base_url, user_id, kind)
    }

    async fn fetch<T>(&self, user_id: &str, kind: &str) -> Result<Vec<T>, RemoteError>
    where
        T: DeserializeOwned + Send,
    {
        let resp = self
            .client
            .get(self.collection_url(user_id, kind))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(resp.status().as_u16()));
        }
        let payload: FetchPayload<T> = resp.json().await?;
        Ok(payload.items)
    }

    async fn replace<T>(&self, user_id: &str, kind: &str, items: &[T]) -> Result<(), RemoteError>
    where
        T: Serialize + Sync,
    {
        let resp = self
            .client
            .put(self.collection_url(user_id, kind))
            .json(&ReplacePayload { items })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_marks(&self, user_id: &str) -> Result<Vec<ChatMark>, RemoteError> {
        self.fetch(user_id, "marks").await
    }

    async fn fetch_reminders(&self, user_id: &str) -> Result<Vec<Reminder>, RemoteError> {
        self.fetch(user_id, "reminders").await
    }

    async fn replace_marks(&self, user_id: &str, marks: &[ChatMark]) -> Result<(), RemoteError> {
        self.replace(user_id, "marks", marks).await
    }

    async fn replace_reminders(
        &self,
        user_id: &str,
        reminders: &[Reminder],
    ) -> Result<(), RemoteError> {
        self.replace(user_id, "reminders", reminders).await
    }
}

#[derive(Default, Clone)]
struct UserCollections {
    marks: Vec<ChatMark>,
    reminders: Vec<Reminder>,
}

/// In-process remote, used when no remote URL is configured and by the
/// replication tests. Counts calls so tests can verify debouncing and the
/// busy-skip behavior; an optional artificial latency widens the in-flight
/// window.
#[derive(Default)]
pub struct MemoryRemoteStore {
    collections: Mutex<HashMap<String, UserCollections>>,
    fetch_calls: AtomicUsize,
    replace_calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub fn seed_marks(&self, user_id: &str, marks: Vec<ChatMark>) {
        let mut collections = self.lock_collections();
        collections.entry(user_id.to_string()).or_default().marks = marks;
    }

    pub fn seed_reminders(&self, user_id: &str, reminders: Vec<Reminder>) {
        let mut collections = self.lock_collections();
        collections.entry(user_id.to_string()).or_default().reminders = reminders;
    }

    /// Snapshot of a user's remote marks, for assertions.
    pub fn marks(&self, user_id: &str) -> Vec<ChatMark> {
        self.lock_collections()
            .get(user_id)
            .map(|c| c.marks.clone())
            .unwrap_or_default()
    }

    pub fn reminders(&self, user_id: &str) -> Vec<Reminder> {
        self.lock_collections()
            .get(user_id)
            .map(|c| c.reminders.clone())
            .unwrap_or_default()
    }

    fn lock_collections(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserCollections>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_marks(&self, user_id: &str) -> Result<Vec<ChatMark>, RemoteError> {
        self.simulate_latency().await;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.marks(user_id))
    }

    async fn fetch_reminders(&self, user_id: &str) -> Result<Vec<Reminder>, RemoteError> {
        self.simulate_latency().await;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reminders(user_id))
    }

    async fn replace_marks(&self, user_id: &str, marks: &[ChatMark]) -> Result<(), RemoteError> {
        self.simulate_latency().await;
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.seed_marks(user_id, marks.to_vec());
        Ok(())
    }

    async fn replace_reminders(
        &self,
        user_id: &str,
        reminders: &[Reminder],
    ) -> Result<(), RemoteError> {
        self.simulate_latency().await;
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.seed_reminders(user_id, reminders.to_vec());
        Ok(())
    }
}
