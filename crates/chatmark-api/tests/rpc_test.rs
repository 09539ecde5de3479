use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use chatmark_api::Router;
use chatmark_db::Database;
use chatmark_engine::notify::LogNotifier;
use chatmark_engine::remote::MemoryRemoteStore;
use chatmark_engine::{ReplicationEngine, Scheduler, SessionGuard};
use chatmark_gateway::dispatcher::Dispatcher;
use chatmark_types::api::Envelope;
use chatmark_types::models::ChatMark;
use chatmark_types::time::now_ms;

struct Harness {
    _dir: tempfile::TempDir,
    router: Router,
    db: Arc<Database>,
    remote: Arc<MemoryRemoteStore>,
}

/// A long debounce keeps auto-uploads from racing the assertions.
fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("test.db")).unwrap());
    let remote = Arc::new(MemoryRemoteStore::new());
    let dispatcher = Dispatcher::new();
    let scheduler = Scheduler::new(db.clone(), Arc::new(LogNotifier), dispatcher.clone());
    let replication = ReplicationEngine::with_debounce(
        db.clone(),
        remote.clone(),
        dispatcher.clone(),
        Duration::from_secs(30),
    );
    let router = Router::new(
        db.clone(),
        scheduler,
        replication,
        Arc::new(SessionGuard::new()),
        dispatcher,
    );
    Harness {
        _dir: dir,
        router,
        db,
        remote,
    }
}

async fn rpc(harness: &Harness, raw: Value) -> Envelope {
    harness.router.dispatch_value(raw).await
}

fn data(envelope: &Envelope) -> &Value {
    assert!(
        envelope.success,
        "expected success, got error: {:?}",
        envelope.error
    );
    envelope.data.as_ref().expect("success envelope carries data")
}

#[tokio::test]
async fn save_then_list_round_trips() {
    let h = harness();

    let saved = rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "wa:1", "platform": "whatsapp",
            "chatId": "1", "chatName": "Ann",
            "labels": ["work", "work", "urgent"],
            "notes": "call back"
        }}),
    )
    .await;
    let mark = data(&saved);
    assert_eq!(mark["createdAt"], mark["updatedAt"]);
    // The writer deduplicates labels
    assert_eq!(mark["labels"], json!(["work", "urgent"]));

    let listed = rpc(&h, json!({"op": "list_marks"})).await;
    let marks = data(&listed).as_array().unwrap().clone();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0]["chatName"], "Ann");
}

#[tokio::test]
async fn save_rejects_missing_id_and_unknown_platform() {
    let h = harness();

    let missing_id = rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "  ", "platform": "whatsapp", "chatId": "1", "chatName": "Ann"
        }}),
    )
    .await;
    assert!(!missing_id.success);

    let bad_platform = rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "icq:1", "platform": "icq", "chatId": "1", "chatName": "Ann"
        }}),
    )
    .await;
    assert!(!bad_platform.success);
    assert!(bad_platform.error.unwrap().contains("platform"));

    // Nothing reached storage
    assert!(h.db.list_marks().unwrap().is_empty());
}

#[tokio::test]
async fn delete_mark_reports_first_true_then_false() {
    let h = harness();
    rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "wa:1", "platform": "whatsapp", "chatId": "1", "chatName": "Ann"
        }}),
    )
    .await;

    let first = rpc(&h, json!({"op": "delete_mark", "payload": {"id": "wa:1"}})).await;
    assert_eq!(data(&first)["deleted"], json!(true));

    let second = rpc(&h, json!({"op": "delete_mark", "payload": {"id": "wa:1"}})).await;
    assert_eq!(data(&second)["deleted"], json!(false));
}

#[tokio::test]
async fn create_reminder_below_floor_succeeds_with_warning() {
    let h = harness();

    let envelope = rpc(
        &h,
        json!({"op": "create_reminder", "payload": {
            "messageId": "wa:1", "reminderTime": now_ms() + 30_000
        }}),
    )
    .await;
    let payload = data(&envelope);
    assert!(payload["reminder"]["id"].is_string());
    assert!(payload["warning"].is_string());

    let far = rpc(
        &h,
        json!({"op": "create_reminder", "payload": {
            "messageId": "wa:2", "reminderTime": now_ms() + 600_000
        }}),
    )
    .await;
    assert!(data(&far)["warning"].is_null());
}

#[tokio::test]
async fn create_reminder_replaces_the_existing_active_one() {
    let h = harness();

    rpc(
        &h,
        json!({"op": "create_reminder", "payload": {
            "messageId": "wa:1", "reminderTime": now_ms() + 600_000
        }}),
    )
    .await;
    let second = rpc(
        &h,
        json!({"op": "create_reminder", "payload": {
            "messageId": "wa:1", "reminderTime": now_ms() + 900_000
        }}),
    )
    .await;
    let kept_id = data(&second)["reminder"]["id"].as_str().unwrap().to_string();

    let reminders = h.db.list_reminders().unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].id, kept_id);
}

#[tokio::test]
async fn snooze_unknown_reminder_returns_null_data() {
    let h = harness();
    let envelope = rpc(
        &h,
        json!({"op": "snooze_reminder", "payload": {"id": "missing", "minutes": 10}}),
    )
    .await;
    assert!(envelope.success);
    assert_eq!(envelope.data, Some(Value::Null));
}

#[tokio::test]
async fn export_then_import_restores_the_store() {
    let h = harness();
    rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "wa:1", "platform": "whatsapp", "chatId": "1", "chatName": "Ann",
            "labels": ["work"], "notes": "call back"
        }}),
    )
    .await;
    rpc(
        &h,
        json!({"op": "update_settings", "payload": {"theme": "dark"}}),
    )
    .await;

    let exported = rpc(&h, json!({"op": "export_all"})).await;
    let bundle = data(&exported).clone();
    assert_eq!(bundle["version"], json!(1));
    assert!(bundle["exportedAt"].as_i64().unwrap() > 0);

    rpc(&h, json!({"op": "clear_marks"})).await;
    assert!(h.db.list_marks().unwrap().is_empty());

    let imported = rpc(&h, json!({"op": "import_all", "payload": bundle})).await;
    assert!(data(&imported)["applied"]
        .as_array()
        .unwrap()
        .contains(&json!("marks")));

    let marks = h.db.list_marks().unwrap();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0].chat_name, "Ann");
    assert_eq!(h.db.get_settings().unwrap().theme, "dark");
}

#[tokio::test]
async fn import_requires_version_and_a_known_collection() {
    let h = harness();

    let no_version = rpc(&h, json!({"op": "import_all", "payload": {"marks": []}})).await;
    assert!(!no_version.success);

    let nothing_known = rpc(
        &h,
        json!({"op": "import_all", "payload": {"version": 1, "bookmarks": []}}),
    )
    .await;
    assert!(!nothing_known.success);
}

#[tokio::test]
async fn import_applies_valid_kinds_and_skips_malformed_ones() {
    let h = harness();

    let envelope = rpc(
        &h,
        json!({"op": "import_all", "payload": {
            "version": 1,
            "marks": [{
                "id": "wa:1", "platform": "whatsapp", "chatId": "1", "chatName": "Ann",
                "labels": [], "notes": "", "createdAt": 5, "updatedAt": 5
            }],
            "reminders": "garbage"
        }}),
    )
    .await;
    let report = data(&envelope);
    assert_eq!(report["applied"], json!(["marks"]));
    assert_eq!(report["skipped"], json!(["reminders"]));

    assert_eq!(h.db.list_marks().unwrap().len(), 1);
    assert!(h.db.list_reminders().unwrap().is_empty());
}

#[tokio::test]
async fn session_start_downloads_exactly_once_per_session() {
    let h = harness();
    h.remote.seed_marks(
        "alice",
        vec![ChatMark {
            id: "remote:1".to_string(),
            platform: "telegram".to_string(),
            chat_id: "9".to_string(),
            chat_name: "Bob".to_string(),
            labels: vec![],
            notes: String::new(),
            created_at: 1,
            updated_at: 1,
        }],
    );

    let first = rpc(
        &h,
        json!({"op": "session_start", "payload": {"userId": "alice"}}),
    )
    .await;
    assert_eq!(data(&first)["downloaded"], json!(true));
    assert_eq!(h.db.list_marks().unwrap().len(), 1);

    // A mark created after sign-in, e.g. while the UI is closed
    rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "wa:2", "platform": "whatsapp", "chatId": "2", "chatName": "Carol"
        }}),
    )
    .await;

    // Reopening the UI re-sends session_start; it must not re-download and
    // wipe the new mark with the stale remote snapshot
    let second = rpc(
        &h,
        json!({"op": "session_start", "payload": {"userId": "alice"}}),
    )
    .await;
    assert_eq!(data(&second)["downloaded"], json!(false));
    assert_eq!(h.db.list_marks().unwrap().len(), 2);
}

#[tokio::test]
async fn manual_upload_then_download_is_a_fixed_point() {
    let h = harness();
    rpc(
        &h,
        json!({"op": "session_start", "payload": {"userId": "alice"}}),
    )
    .await;
    rpc(
        &h,
        json!({"op": "save_mark", "payload": {
            "id": "wa:1", "platform": "whatsapp", "chatId": "1", "chatName": "Ann"
        }}),
    )
    .await;
    let before = h.db.list_marks().unwrap();

    let upload = rpc(&h, json!({"op": "sync_upload"})).await;
    assert_eq!(data(&upload)["status"], json!("completed"));

    let download = rpc(&h, json!({"op": "sync_download"})).await;
    assert_eq!(data(&download)["status"], json!("completed"));

    assert_eq!(h.db.list_marks().unwrap(), before);
    assert_eq!(h.remote.marks("alice").len(), 1);
}

#[tokio::test]
async fn unknown_operation_becomes_an_error_envelope() {
    let h = harness();
    let envelope = rpc(&h, json!({"op": "reticulate_splines"})).await;
    assert!(!envelope.success);
    assert!(envelope.error.unwrap().contains("invalid request"));
}
