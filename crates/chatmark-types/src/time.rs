use chrono::Utc;

/// Current wall-clock time as epoch milliseconds.
///
/// All persisted timestamps (`created_at`, `updated_at`, `reminder_time`,
/// `fired_at`) use this representation, matching what the JavaScript-side
/// collaborators produce and consume.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
