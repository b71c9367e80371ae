//! SQLite DDL definitions for the companion store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL for the companion database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
/// Timestamps are epoch milliseconds; calendar dates are ISO `YYYY-MM-DD`.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    user_id                INTEGER PRIMARY KEY,
    timezone               TEXT    NOT NULL DEFAULT 'Asia/Shanghai',
    default_step_minutes   INTEGER NOT NULL DEFAULT 8,
    tone                   TEXT    NOT NULL DEFAULT 'firm_kind',
    low_energy_mode        INTEGER NOT NULL DEFAULT 0,
    weekly_summary_enabled INTEGER NOT NULL DEFAULT 0,
    streak_days            INTEGER NOT NULL DEFAULT 0,
    last_progress_date     TEXT,
    created_at             INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS goals (
    goal_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER NOT NULL REFERENCES users(user_id),
    title         TEXT    NOT NULL,
    deadline_date TEXT,
    track         TEXT,
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    INTEGER NOT NULL DEFAULT 0
);

-- Phases are owned by their goal.
CREATE TABLE IF NOT EXISTS phases (
    phase_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    goal_id    INTEGER NOT NULL REFERENCES goals(goal_id) ON DELETE CASCADE,
    title      TEXT    NOT NULL,
    is_active  INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT 0
);

-- Tasks are owned by their phase.
CREATE TABLE IF NOT EXISTS tasks (
    task_id                INTEGER PRIMARY KEY AUTOINCREMENT,
    phase_id               INTEGER NOT NULL REFERENCES phases(phase_id) ON DELETE CASCADE,
    title                  TEXT    NOT NULL,
    type                   TEXT    NOT NULL DEFAULT 'misc',
    status                 TEXT    NOT NULL DEFAULT 'not_started',
    tags                   TEXT    NOT NULL DEFAULT '[]',  -- JSON array of strings
    difficulty_self_rating INTEGER,
    source                 TEXT    NOT NULL DEFAULT 'manual',
    created_at             INTEGER NOT NULL DEFAULT 0,
    updated_at             INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_phase_status ON tasks(phase_id, status);

-- task_id_ref is a weak back-reference: no foreign key, deleting a task
-- leaves the mainline intact.
CREATE TABLE IF NOT EXISTS mainlines (
    mainline_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(user_id),
    goal_id     INTEGER,
    phase_id    INTEGER,
    date        TEXT    NOT NULL,
    title       TEXT    NOT NULL,
    source      TEXT    NOT NULL DEFAULT 'manual',
    task_id_ref INTEGER,
    created_at  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_mainlines_user_date ON mainlines(user_id, date);

CREATE TABLE IF NOT EXISTS steps (
    step_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    mainline_id         INTEGER NOT NULL REFERENCES mainlines(mainline_id) ON DELETE CASCADE,
    kind                TEXT    NOT NULL DEFAULT 'micro',
    duration_min        INTEGER NOT NULL DEFAULT 2,
    instruction         TEXT    NOT NULL,
    acceptance_criteria TEXT    NOT NULL,
    difficulty          INTEGER NOT NULL DEFAULT 1,
    status              TEXT    NOT NULL DEFAULT 'ready',
    created_at          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_steps_mainline_status ON steps(mainline_id, status);

CREATE TABLE IF NOT EXISTS deferred_links (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(user_id),
    step_id     INTEGER NOT NULL,
    mainline_id INTEGER NOT NULL,
    reason      TEXT    NOT NULL DEFAULT 'exit',
    created_at  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS stuck_events (
    event_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    step_id       INTEGER NOT NULL,
    stuck_type    TEXT    NOT NULL,
    emotion_label TEXT,
    user_note     TEXT,
    created_at    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS evidence (
    evidence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(user_id),
    description TEXT    NOT NULL,
    tags        TEXT    NOT NULL DEFAULT '["small_win"]',
    created_at  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_evidence_user ON evidence(user_id, created_at);

CREATE TABLE IF NOT EXISTS if_then_plans (
    plan_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(user_id),
    date        TEXT    NOT NULL,
    if_trigger  TEXT    NOT NULL,
    then_action TEXT    NOT NULL,
    reward      TEXT,
    created_at  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS import_drafts (
    import_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL REFERENCES users(user_id),
    phase_id     INTEGER NOT NULL REFERENCES phases(phase_id),
    source       TEXT    NOT NULL DEFAULT 'paste',
    raw_text     TEXT    NOT NULL DEFAULT '',
    parsed_items TEXT    NOT NULL DEFAULT '[]',  -- JSON array of ImportItem
    state        TEXT    NOT NULL DEFAULT 'draft',
    created_at   INTEGER NOT NULL DEFAULT 0
);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version on a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the current schema version from the database.
///
/// Returns `None` if the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
