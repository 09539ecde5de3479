use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use chatmark_types::models::default_labels;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS marks (
            id          TEXT PRIMARY KEY,
            platform    TEXT NOT NULL,
            chat_id     TEXT NOT NULL,
            chat_name   TEXT NOT NULL,
            labels      TEXT NOT NULL DEFAULT '[]',
            notes       TEXT NOT NULL DEFAULT '',
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        -- message_id is deliberately NOT a foreign key: a reminder may
        -- outlive its mark and must still be deliverable.
        CREATE TABLE IF NOT EXISTS reminders (
            id             TEXT PRIMARY KEY,
            message_id     TEXT NOT NULL,
            reminder_time  INTEGER NOT NULL,
            active         INTEGER NOT NULL DEFAULT 1,
            fired_at       INTEGER,
            created_at     INTEGER NOT NULL,
            updated_at     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reminders_message
            ON reminders(message_id);

        CREATE TABLE IF NOT EXISTS labels (
            id     TEXT PRIMARY KEY,
            name   TEXT NOT NULL,
            color  TEXT NOT NULL
        );

        -- Single-row partial settings blob; defaults are merged in on read.
        CREATE TABLE IF NOT EXISTS settings (
            id    INTEGER PRIMARY KEY CHECK (id = 1),
            data  TEXT NOT NULL
        );
        ",
    )?;

    // Seed the built-in label catalog
    for label in default_labels() {
        conn.execute(
            "INSERT OR IGNORE INTO labels (id, name, color) VALUES (?1, ?2, ?3)",
            (&label.id, &label.name, &label.color),
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
