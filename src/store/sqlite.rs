//! SQLite-backed durable store.
//!
//! Every entity write is a single statement or a short explicit transaction;
//! the connection mutex serializes writers across concurrent user turns.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::types::{
    DeferredLink, Evidence, Goal, IfThenPlanRow, ImportDraft, ImportItem, ImportState, Mainline,
    MainlineSource, NewMainline, NewStep, NewTask, Phase, RecordedWin, Step, StepKind, StepStatus,
    StuckEvent, StuckType, Task, TaskStatus, User, UserId, now_epoch_millis,
};

/// Errors from the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("step {step_id} cannot move from {from} to {to}")]
    InvalidTransition {
        step_id: i64,
        from: &'static str,
        to: &'static str,
    },

    #[error("invalid update: {0}")]
    InvalidUpdate(String),
}

/// SQLite-backed store for users, goals, the daily chain and its logs.
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`, creating parent
    /// directories as needed.
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(db_path).map_err(StoreError::Sqlite)?;
        apply_schema(&conn).map_err(StoreError::Sqlite)?;
        Ok(Self {
            path: Some(db_path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        apply_schema(&conn).map_err(StoreError::Sqlite)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        read_schema_version(&conn).map_err(StoreError::Sqlite)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Insert the user with default preferences if absent, then return it.
    pub fn ensure_user(&self, user_id: UserId) -> Result<User, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
            params![user_id, now_epoch_millis()],
        )?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            row_to_user,
        )
        .map_err(StoreError::Sqlite)
    }

    pub fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            row_to_user,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Set the sticky low-energy preference.
    pub fn set_low_energy(&self, user_id: UserId, enabled: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE users SET low_energy_mode = ?1 WHERE user_id = ?2",
            params![enabled, user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        Ok(())
    }

    /// Count `today` as a progress day and return the resulting streak.
    ///
    /// Idempotent per calendar day: a second call with the same date leaves
    /// the counter unchanged.
    pub fn advance_streak(&self, user_id: UserId, today: NaiveDate) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let streak = bump_streak(&tx, user_id, today)?;
        tx.commit()?;
        Ok(streak)
    }

    // -----------------------------------------------------------------------
    // Goals and phases
    // -----------------------------------------------------------------------

    pub fn create_goal(
        &self,
        user_id: UserId,
        title: &str,
        deadline_date: Option<NaiveDate>,
        track: Option<&str>,
    ) -> Result<Goal, StoreError> {
        let title = non_empty(title, "goal title")?;
        let conn = self.lock()?;
        let now = now_epoch_millis();
        conn.execute(
            "INSERT INTO goals (user_id, title, deadline_date, track, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![user_id, title, deadline_date.map(date_to_str), track, now],
        )?;
        Ok(Goal {
            goal_id: conn.last_insert_rowid(),
            user_id,
            title: title.to_owned(),
            deadline_date,
            track: track.map(str::to_owned),
            is_active: true,
            created_at: now,
        })
    }

    /// The user's current goal: the most recently created active one.
    pub fn active_goal(&self, user_id: UserId) -> Result<Option<Goal>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT goal_id, user_id, title, deadline_date, track, is_active, created_at \
             FROM goals WHERE user_id = ?1 AND is_active = 1 \
             ORDER BY created_at DESC, goal_id DESC LIMIT 1",
            params![user_id],
            row_to_goal,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Insert a phase. When `activate` is set, every sibling is deactivated
    /// in the same transaction.
    pub fn create_phase(
        &self,
        goal_id: i64,
        title: &str,
        activate: bool,
    ) -> Result<Phase, StoreError> {
        let title = non_empty(title, "phase title")?;
        let conn = self.lock()?;
        let now = now_epoch_millis();
        let tx = conn.unchecked_transaction()?;
        if activate {
            tx.execute(
                "UPDATE phases SET is_active = 0 WHERE goal_id = ?1",
                params![goal_id],
            )?;
        }
        tx.execute(
            "INSERT INTO phases (goal_id, title, is_active, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![goal_id, title, activate, now],
        )?;
        let phase_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Phase {
            phase_id,
            goal_id,
            title: title.to_owned(),
            is_active: activate,
            created_at: now,
        })
    }

    pub fn list_phases(&self, goal_id: i64) -> Result<Vec<Phase>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT phase_id, goal_id, title, is_active, created_at \
             FROM phases WHERE goal_id = ?1 ORDER BY phase_id",
        )?;
        let rows = stmt.query_map(params![goal_id], row_to_phase)?;
        collect_rows(rows)
    }

    pub fn active_phase(&self, goal_id: i64) -> Result<Option<Phase>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT phase_id, goal_id, title, is_active, created_at \
             FROM phases WHERE goal_id = ?1 AND is_active = 1 \
             ORDER BY phase_id DESC LIMIT 1",
            params![goal_id],
            row_to_phase,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Make `phase_id` the only active phase of its goal.
    pub fn activate_phase(&self, goal_id: i64, phase_id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT phase_id FROM phases WHERE phase_id = ?1 AND goal_id = ?2",
                params![phase_id, goal_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                entity: "phase",
                id: phase_id,
            });
        }
        tx.execute(
            "UPDATE phases SET is_active = CASE WHEN phase_id = ?1 THEN 1 ELSE 0 END \
             WHERE goal_id = ?2",
            params![phase_id, goal_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn create_task(&self, task: &NewTask<'_>) -> Result<Task, StoreError> {
        let title = non_empty(task.title, "task title")?;
        let conn = self.lock()?;
        insert_task(&conn, task, title)
    }

    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
            params![task_id],
            row_to_task,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Tasks of a phase in insertion order, optionally filtered by status.
    pub fn list_tasks(
        &self,
        phase_id: i64,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock()?;
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE phase_id = ?1 AND status = ?2 ORDER BY task_id"
                ))?;
                let rows = stmt.query_map(params![phase_id, status.as_str()], row_to_task)?;
                collect_rows(rows)
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE phase_id = ?1 ORDER BY task_id"
                ))?;
                let rows = stmt.query_map(params![phase_id], row_to_task)?;
                collect_rows(rows)
            }
        }
    }

    /// Open tasks (`in_progress` or `not_started`) of a phase in insertion order.
    pub fn task_pool(&self, phase_id: i64) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE phase_id = ?1 AND status IN ('in_progress', 'not_started') \
             ORDER BY task_id"
        ))?;
        let rows = stmt.query_map(params![phase_id], row_to_task)?;
        collect_rows(rows)
    }

    pub fn set_task_status(&self, task_id: i64, status: TaskStatus) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE task_id = ?3",
            params![status.as_str(), now_epoch_millis(), task_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound {
                entity: "task",
                id: task_id,
            });
        }
        Ok(())
    }

    /// Delete a task. Mainlines referencing it keep their dangling reference.
    pub fn delete_task(&self, task_id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
        Ok(rows > 0)
    }

    /// `(completed, total)` task counts for a phase.
    pub fn task_counts(&self, phase_id: i64) -> Result<(u64, u64), StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0), COUNT(*) \
             FROM tasks WHERE phase_id = ?1",
            params![phase_id],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )
        .map_err(StoreError::Sqlite)
    }

    // -----------------------------------------------------------------------
    // Mainlines
    // -----------------------------------------------------------------------

    pub fn create_mainline(&self, mainline: &NewMainline<'_>) -> Result<Mainline, StoreError> {
        let title = non_empty(mainline.title, "mainline title")?;
        let conn = self.lock()?;
        let now = now_epoch_millis();
        conn.execute(
            "INSERT INTO mainlines \
             (user_id, goal_id, phase_id, date, title, source, task_id_ref, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                mainline.user_id,
                mainline.goal_id,
                mainline.phase_id,
                date_to_str(mainline.date),
                title,
                mainline.source.as_str(),
                mainline.task_id_ref,
                now
            ],
        )?;
        Ok(Mainline {
            mainline_id: conn.last_insert_rowid(),
            user_id: mainline.user_id,
            goal_id: mainline.goal_id,
            phase_id: mainline.phase_id,
            date: mainline.date,
            title: title.to_owned(),
            source: mainline.source,
            task_id_ref: mainline.task_id_ref,
            created_at: now,
        })
    }

    pub fn get_mainline(&self, mainline_id: i64) -> Result<Option<Mainline>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {MAINLINE_COLUMNS} FROM mainlines WHERE mainline_id = ?1"),
            params![mainline_id],
            row_to_mainline,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Today's mainline: the newest row dated `date` for the user.
    /// Older same-day rows are silently superseded.
    pub fn today_mainline(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<Mainline>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {MAINLINE_COLUMNS} FROM mainlines WHERE user_id = ?1 AND date = ?2 \
                 ORDER BY created_at DESC, mainline_id DESC LIMIT 1"
            ),
            params![user_id, date_to_str(date)],
            row_to_mainline,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Replace a mainline's title. The only field a candidate switch may touch.
    pub fn retitle_mainline(&self, mainline_id: i64, title: &str) -> Result<(), StoreError> {
        let title = non_empty(title, "mainline title")?;
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE mainlines SET title = ?1 WHERE mainline_id = ?2",
            params![title, mainline_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound {
                entity: "mainline",
                id: mainline_id,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Insert a new step in `ready`.
    pub fn create_step(&self, step: &NewStep<'_>) -> Result<Step, StoreError> {
        let instruction = non_empty(step.instruction, "step instruction")?;
        let acceptance = non_empty(step.acceptance_criteria, "acceptance criteria")?;
        let conn = self.lock()?;
        let now = now_epoch_millis();
        conn.execute(
            "INSERT INTO steps \
             (mainline_id, kind, duration_min, instruction, acceptance_criteria, difficulty, \
              status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'ready', ?7)",
            params![
                step.mainline_id,
                step.kind.as_str(),
                step.duration_min,
                instruction,
                acceptance,
                step.difficulty,
                now
            ],
        )?;
        Ok(Step {
            step_id: conn.last_insert_rowid(),
            mainline_id: step.mainline_id,
            kind: step.kind,
            duration_min: step.duration_min,
            instruction: instruction.to_owned(),
            acceptance_criteria: acceptance.to_owned(),
            difficulty: step.difficulty,
            status: StepStatus::Ready,
            created_at: now,
        })
    }

    pub fn get_step(&self, step_id: i64) -> Result<Option<Step>, StoreError> {
        let conn = self.lock()?;
        select_step(&conn, step_id)
    }

    /// Move a step to `next`, rejecting writes outside the step lifecycle.
    pub fn transition_step(&self, step_id: i64, next: StepStatus) -> Result<Step, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut step = select_step(&tx, step_id)?.ok_or(StoreError::NotFound {
            entity: "step",
            id: step_id,
        })?;
        if !step.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                step_id,
                from: step.status.as_str(),
                to: next.as_str(),
            });
        }
        tx.execute(
            "UPDATE steps SET status = ?1 WHERE step_id = ?2 AND status = ?3",
            params![next.as_str(), step_id, step.status.as_str()],
        )?;
        tx.commit()?;
        step.status = next;
        Ok(step)
    }

    /// The mainline's live step: newest row in `ready` or `executing`.
    pub fn live_step(&self, mainline_id: i64) -> Result<Option<Step>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {STEP_COLUMNS} FROM steps \
                 WHERE mainline_id = ?1 AND status IN ('ready', 'executing') \
                 ORDER BY created_at DESC, step_id DESC LIMIT 1"
            ),
            params![mainline_id],
            row_to_step,
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// All steps of a mainline, oldest first.
    pub fn list_steps(&self, mainline_id: i64) -> Result<Vec<Step>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM steps WHERE mainline_id = ?1 ORDER BY step_id"
        ))?;
        let rows = stmt.query_map(params![mainline_id], row_to_step)?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Deferrals
    // -----------------------------------------------------------------------

    /// Record a deferral. Earlier rows are not removed; lookup only sees the newest.
    pub fn create_deferred(
        &self,
        user_id: UserId,
        step_id: i64,
        mainline_id: i64,
        reason: &str,
    ) -> Result<DeferredLink, StoreError> {
        let conn = self.lock()?;
        let now = now_epoch_millis();
        conn.execute(
            "INSERT INTO deferred_links (user_id, step_id, mainline_id, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, step_id, mainline_id, reason, now],
        )?;
        Ok(DeferredLink {
            id: conn.last_insert_rowid(),
            user_id,
            step_id,
            mainline_id,
            reason: reason.to_owned(),
            created_at: now,
        })
    }

    pub fn latest_deferred(&self, user_id: UserId) -> Result<Option<DeferredLink>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, user_id, step_id, mainline_id, reason, created_at \
             FROM deferred_links WHERE user_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![user_id],
            |row| {
                Ok(DeferredLink {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    step_id: row.get(2)?,
                    mainline_id: row.get(3)?,
                    reason: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::Sqlite)
    }

    /// Remove every deferral of the user. Returns the number of rows removed.
    pub fn clear_deferred(&self, user_id: UserId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM deferred_links WHERE user_id = ?1",
            params![user_id],
        )
        .map_err(StoreError::Sqlite)
    }

    // -----------------------------------------------------------------------
    // Append-only logs
    // -----------------------------------------------------------------------

    pub fn record_stuck_event(
        &self,
        step_id: i64,
        stuck_type: StuckType,
        emotion_label: Option<&str>,
        user_note: Option<&str>,
    ) -> Result<StuckEvent, StoreError> {
        let conn = self.lock()?;
        let now = now_epoch_millis();
        conn.execute(
            "INSERT INTO stuck_events (step_id, stuck_type, emotion_label, user_note, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![step_id, stuck_type.as_str(), emotion_label, user_note, now],
        )?;
        Ok(StuckEvent {
            event_id: conn.last_insert_rowid(),
            step_id,
            stuck_type,
            emotion_label: emotion_label.map(str::to_owned),
            user_note: user_note.map(str::to_owned),
            created_at: now,
        })
    }

    pub fn list_stuck_events(&self, step_id: i64) -> Result<Vec<StuckEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, step_id, stuck_type, emotion_label, user_note, created_at \
             FROM stuck_events WHERE step_id = ?1 ORDER BY event_id",
        )?;
        let rows = stmt.query_map(params![step_id], |row| {
            let raw: String = row.get(2)?;
            Ok(StuckEvent {
                event_id: row.get(0)?,
                step_id: row.get(1)?,
                stuck_type: StuckType::parse(&raw).ok_or_else(|| bad_value(2, &raw))?,
                emotion_label: row.get(3)?,
                user_note: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn append_evidence(
        &self,
        user_id: UserId,
        description: &str,
        tags: &[String],
    ) -> Result<Evidence, StoreError> {
        let conn = self.lock()?;
        insert_evidence(&conn, user_id, description, tags)
    }

    /// Append the evidence row, advance the streak and count evidence as one
    /// unit. Nothing is written unless every step succeeds.
    pub fn record_win(
        &self,
        user_id: UserId,
        description: &str,
        tags: &[String],
        today: NaiveDate,
    ) -> Result<RecordedWin, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let evidence = insert_evidence(&tx, user_id, description, tags)?;
        let streak_days = bump_streak(&tx, user_id, today)?;
        let evidence_count = count_user_evidence(&tx, user_id)?;
        tx.commit()?;
        Ok(RecordedWin {
            evidence,
            streak_days,
            evidence_count,
        })
    }

    /// Most recent evidence first.
    pub fn recent_evidence(&self, user_id: UserId, limit: usize) -> Result<Vec<Evidence>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT evidence_id, user_id, description, tags, created_at FROM evidence \
             WHERE user_id = ?1 ORDER BY created_at DESC, evidence_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let tags_json: String = row.get(3)?;
            Ok(Evidence {
                evidence_id: row.get(0)?,
                user_id: row.get(1)?,
                description: row.get(2)?,
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                created_at: row.get(4)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn count_evidence(&self, user_id: UserId) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        count_user_evidence(&conn, user_id)
    }

    pub fn save_if_then(
        &self,
        user_id: UserId,
        date: NaiveDate,
        if_trigger: &str,
        then_action: &str,
        reward: Option<&str>,
    ) -> Result<IfThenPlanRow, StoreError> {
        let conn = self.lock()?;
        let now = now_epoch_millis();
        conn.execute(
            "INSERT INTO if_then_plans (user_id, date, if_trigger, then_action, reward, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, date_to_str(date), if_trigger, then_action, reward, now],
        )?;
        Ok(IfThenPlanRow {
            plan_id: conn.last_insert_rowid(),
            user_id,
            date,
            if_trigger: if_trigger.to_owned(),
            then_action: then_action.to_owned(),
            reward: reward.map(str::to_owned),
            created_at: now,
        })
    }

    pub fn list_if_then(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Vec<IfThenPlanRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT plan_id, user_id, date, if_trigger, then_action, reward, created_at \
             FROM if_then_plans WHERE user_id = ?1 AND date = ?2 ORDER BY plan_id",
        )?;
        let rows = stmt.query_map(params![user_id, date_to_str(date)], |row| {
            let date_raw: String = row.get(2)?;
            Ok(IfThenPlanRow {
                plan_id: row.get(0)?,
                user_id: row.get(1)?,
                date: str_to_date(2, &date_raw)?,
                if_trigger: row.get(3)?,
                then_action: row.get(4)?,
                reward: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Import drafts
    // -----------------------------------------------------------------------

    pub fn create_import_draft(
        &self,
        user_id: UserId,
        phase_id: i64,
        source: &str,
        raw_text: &str,
        items: &[ImportItem],
    ) -> Result<ImportDraft, StoreError> {
        let conn = self.lock()?;
        let now = now_epoch_millis();
        let items_json = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_owned());
        conn.execute(
            "INSERT INTO import_drafts \
             (user_id, phase_id, source, raw_text, parsed_items, state, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'draft', ?6)",
            params![user_id, phase_id, source, raw_text, items_json, now],
        )?;
        Ok(ImportDraft {
            import_id: conn.last_insert_rowid(),
            user_id,
            phase_id,
            source: source.to_owned(),
            raw_text: raw_text.to_owned(),
            parsed_items: items.to_vec(),
            state: ImportState::Draft,
            created_at: now,
        })
    }

    pub fn get_import_draft(&self, import_id: i64) -> Result<Option<ImportDraft>, StoreError> {
        let conn = self.lock()?;
        select_import_draft(&conn, import_id)
    }

    /// Create one task per parsed item and mark the draft confirmed.
    ///
    /// Returns `None` when the draft is missing or no longer a draft.
    pub fn confirm_import(&self, import_id: i64) -> Result<Option<Vec<Task>>, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(draft) = select_import_draft(&tx, import_id)? else {
            return Ok(None);
        };
        if draft.state != ImportState::Draft {
            return Ok(None);
        }

        let mut created = Vec::with_capacity(draft.parsed_items.len());
        for item in &draft.parsed_items {
            let title = item.title.trim();
            if title.is_empty() {
                continue;
            }
            let new_task = NewTask {
                phase_id: draft.phase_id,
                title,
                task_type: &item.task_type,
                status: item.status,
                tags: &item.tags,
                difficulty_self_rating: item.difficulty_self_rating,
                source: &draft.source,
            };
            created.push(insert_task(&tx, &new_task, title)?);
        }

        tx.execute(
            "UPDATE import_drafts SET state = 'confirmed' WHERE import_id = ?1",
            params![import_id],
        )?;
        tx.commit()?;
        Ok(Some(created))
    }

    /// Mark a pending draft discarded. Returns whether a draft was changed.
    pub fn discard_import(&self, import_id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE import_drafts SET state = 'discarded' WHERE import_id = ?1 AND state = 'draft'",
            params![import_id],
        )?;
        Ok(rows > 0)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Shared statements
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str = "user_id, timezone, default_step_minutes, tone, low_energy_mode, \
     weekly_summary_enabled, streak_days, last_progress_date, created_at";

const TASK_COLUMNS: &str = "task_id, phase_id, title, type, status, tags, \
     difficulty_self_rating, source, created_at, updated_at";

const MAINLINE_COLUMNS: &str =
    "mainline_id, user_id, goal_id, phase_id, date, title, source, task_id_ref, created_at";

const STEP_COLUMNS: &str = "step_id, mainline_id, kind, duration_min, instruction, \
     acceptance_criteria, difficulty, status, created_at";

/// Count `today` as a progress day; idempotent per calendar day.
fn bump_streak(conn: &Connection, user_id: UserId, today: NaiveDate) -> Result<u32, StoreError> {
    let (streak, last): (u32, Option<String>) = conn
        .query_row(
            "SELECT streak_days, last_progress_date FROM users WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(StoreError::NotFound {
            entity: "user",
            id: user_id,
        })?;

    let today_str = date_to_str(today);
    if last.as_deref() == Some(today_str.as_str()) {
        return Ok(streak);
    }

    let next = streak.saturating_add(1);
    conn.execute(
        "UPDATE users SET streak_days = ?1, last_progress_date = ?2 WHERE user_id = ?3",
        params![next, today_str, user_id],
    )?;
    Ok(next)
}

fn insert_evidence(
    conn: &Connection,
    user_id: UserId,
    description: &str,
    tags: &[String],
) -> Result<Evidence, StoreError> {
    let now = now_epoch_millis();
    let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_owned());
    conn.execute(
        "INSERT INTO evidence (user_id, description, tags, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, description, tags_json, now],
    )?;
    Ok(Evidence {
        evidence_id: conn.last_insert_rowid(),
        user_id,
        description: description.to_owned(),
        tags: tags.to_vec(),
        created_at: now,
    })
}

fn count_user_evidence(conn: &Connection, user_id: UserId) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM evidence WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn insert_task(conn: &Connection, task: &NewTask<'_>, title: &str) -> Result<Task, StoreError> {
    let now = now_epoch_millis();
    let tags_json = serde_json::to_string(task.tags).unwrap_or_else(|_| "[]".to_owned());
    conn.execute(
        "INSERT INTO tasks \
         (phase_id, title, type, status, tags, difficulty_self_rating, source, \
          created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            task.phase_id,
            title,
            task.task_type,
            task.status.as_str(),
            tags_json,
            task.difficulty_self_rating,
            task.source,
            now,
            now
        ],
    )?;
    Ok(Task {
        task_id: conn.last_insert_rowid(),
        phase_id: task.phase_id,
        title: title.to_owned(),
        task_type: task.task_type.to_owned(),
        status: task.status,
        tags: task.tags.to_vec(),
        difficulty_self_rating: task.difficulty_self_rating,
        source: task.source.to_owned(),
        created_at: now,
        updated_at: now,
    })
}

fn select_step(conn: &Connection, step_id: i64) -> Result<Option<Step>, StoreError> {
    conn.query_row(
        &format!("SELECT {STEP_COLUMNS} FROM steps WHERE step_id = ?1"),
        params![step_id],
        row_to_step,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

fn select_import_draft(
    conn: &Connection,
    import_id: i64,
) -> Result<Option<ImportDraft>, StoreError> {
    conn.query_row(
        "SELECT import_id, user_id, phase_id, source, raw_text, parsed_items, state, created_at \
         FROM import_drafts WHERE import_id = ?1",
        params![import_id],
        |row| {
            let items_json: String = row.get(5)?;
            let state: String = row.get(6)?;
            Ok(ImportDraft {
                import_id: row.get(0)?,
                user_id: row.get(1)?,
                phase_id: row.get(2)?,
                source: row.get(3)?,
                raw_text: row.get(4)?,
                parsed_items: serde_json::from_str(&items_json).unwrap_or_default(),
                state: ImportState::parse(&state),
                created_at: row.get(7)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(StoreError::Sqlite)?);
    }
    Ok(out)
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidUpdate(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn date_to_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn str_to_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn bad_value(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value {raw:?}").into(),
    )
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let last: Option<String> = row.get(7)?;
    Ok(User {
        user_id: row.get(0)?,
        timezone: row.get(1)?,
        default_step_minutes: row.get(2)?,
        tone: row.get(3)?,
        low_energy_mode: row.get(4)?,
        weekly_summary_enabled: row.get(5)?,
        streak_days: row.get(6)?,
        last_progress_date: last.as_deref().map(|d| str_to_date(7, d)).transpose()?,
        created_at: row.get(8)?,
    })
}

fn row_to_goal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Goal> {
    let deadline: Option<String> = row.get(3)?;
    Ok(Goal {
        goal_id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        deadline_date: deadline.as_deref().map(|d| str_to_date(3, d)).transpose()?,
        track: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_phase(row: &rusqlite::Row<'_>) -> rusqlite::Result<Phase> {
    Ok(Phase {
        phase_id: row.get(0)?,
        goal_id: row.get(1)?,
        title: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    let tags_json: String = row.get(5)?;
    Ok(Task {
        task_id: row.get(0)?,
        phase_id: row.get(1)?,
        title: row.get(2)?,
        task_type: row.get(3)?,
        status: TaskStatus::parse(&status).ok_or_else(|| bad_value(4, &status))?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        difficulty_self_rating: row.get(6)?,
        source: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_mainline(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mainline> {
    let date: String = row.get(4)?;
    let source: String = row.get(6)?;
    Ok(Mainline {
        mainline_id: row.get(0)?,
        user_id: row.get(1)?,
        goal_id: row.get(2)?,
        phase_id: row.get(3)?,
        date: str_to_date(4, &date)?,
        title: row.get(5)?,
        source: MainlineSource::parse(&source),
        task_id_ref: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<Step> {
    let kind: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Step {
        step_id: row.get(0)?,
        mainline_id: row.get(1)?,
        kind: StepKind::parse(&kind).ok_or_else(|| bad_value(2, &kind))?,
        duration_min: row.get(3)?,
        instruction: row.get(4)?,
        acceptance_criteria: row.get(5)?,
        difficulty: row.get(6)?,
        status: StepStatus::parse(&status).ok_or_else(|| bad_value(7, &status))?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::types::{CURRENT_SCHEMA_VERSION, SMALL_WIN_TAG};
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("open in-memory store")
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).expect("valid date")
    }

    fn mainline(store: &SqliteStore, user: UserId, date: NaiveDate, title: &str) -> Mainline {
        store
            .create_mainline(&NewMainline {
                user_id: user,
                goal_id: None,
                phase_id: None,
                date,
                title,
                source: MainlineSource::Manual,
                task_id_ref: None,
            })
            .expect("create mainline")
    }

    fn micro(store: &SqliteStore, mainline_id: i64, instruction: &str) -> Step {
        store
            .create_step(&NewStep {
                mainline_id,
                kind: StepKind::Micro,
                duration_min: 2,
                instruction,
                acceptance_criteria: "done",
                difficulty: 1,
            })
            .expect("create step")
    }

    #[test]
    fn on_disk_store_creates_parent_dirs_and_schema() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let path = dir.path().join("nested").join("ecos.db");
        let store = SqliteStore::new(&path).expect("open store");
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(
            store.schema_version().expect("schema_version"),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn ensure_user_is_idempotent_with_defaults() {
        let store = store();
        let first = store.ensure_user(7).expect("ensure");
        let second = store.ensure_user(7).expect("ensure again");
        assert_eq!(first, second);
        assert_eq!(first.timezone, "Asia/Shanghai");
        assert_eq!(first.default_step_minutes, 8);
        assert_eq!(first.streak_days, 0);
        assert!(!first.low_energy_mode);
        assert!(first.last_progress_date.is_none());
    }

    #[test]
    fn low_energy_flag_persists() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        store.set_low_energy(1, true).expect("set");
        assert!(store.get_user(1).expect("get").expect("exists").low_energy_mode);
        assert!(matches!(
            store.set_low_energy(99, true),
            Err(StoreError::NotFound { entity: "user", .. })
        ));
    }

    #[test]
    fn streak_advances_once_per_day() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        assert_eq!(store.advance_streak(1, day(1)).expect("advance"), 1);
        assert_eq!(store.advance_streak(1, day(1)).expect("advance"), 1);
        assert_eq!(store.advance_streak(1, day(1)).expect("advance"), 1);
        assert_eq!(store.advance_streak(1, day(2)).expect("advance"), 2);
        let user = store.get_user(1).expect("get").expect("exists");
        assert_eq!(user.last_progress_date, Some(day(2)));
    }

    #[test]
    fn record_win_writes_evidence_and_streak_together() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let tags = vec![SMALL_WIN_TAG.to_owned()];

        let first = store
            .record_win(1, "完成了：读书", &tags, day(1))
            .expect("record");
        assert_eq!(first.streak_days, 1);
        assert_eq!(first.evidence_count, 1);
        assert_eq!(first.evidence.tags, tags);

        let second = store
            .record_win(1, "完成了：写作", &tags, day(1))
            .expect("record");
        assert_eq!(second.streak_days, 1);
        assert_eq!(second.evidence_count, 2);
    }

    #[test]
    fn record_win_leaves_no_evidence_when_the_streak_fails() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        store
            .lock()
            .expect("lock")
            .execute_batch(
                "CREATE TRIGGER refuse_streak BEFORE UPDATE ON users \
                 BEGIN SELECT RAISE(ABORT, 'streak write refused'); END;",
            )
            .expect("trigger");

        let tags = vec![SMALL_WIN_TAG.to_owned()];
        assert!(matches!(
            store.record_win(1, "完成了：读书", &tags, day(1)),
            Err(StoreError::Sqlite(_))
        ));
        assert_eq!(store.count_evidence(1).expect("count"), 0);
        let user = store.get_user(1).expect("get").expect("exists");
        assert_eq!(user.streak_days, 0);
    }

    #[test]
    fn activating_a_phase_deactivates_siblings() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let goal = store.create_goal(1, "考研", None, None).expect("goal");
        let p1 = store.create_phase(goal.goal_id, "基础", true).expect("p1");
        let p2 = store.create_phase(goal.goal_id, "强化", true).expect("p2");

        let active = store.active_phase(goal.goal_id).expect("active").expect("some");
        assert_eq!(active.phase_id, p2.phase_id);

        store.activate_phase(goal.goal_id, p1.phase_id).expect("activate");
        let phases = store.list_phases(goal.goal_id).expect("list");
        let active: Vec<_> = phases.iter().filter(|p| p.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].phase_id, p1.phase_id);

        assert!(matches!(
            store.activate_phase(goal.goal_id, 999),
            Err(StoreError::NotFound { entity: "phase", .. })
        ));
    }

    #[test]
    fn active_goal_is_most_recent() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        store.create_goal(1, "旧目标", None, None).expect("goal");
        let newer = store
            .create_goal(1, "新目标", Some(day(30)), Some("exam"))
            .expect("goal");
        let active = store.active_goal(1).expect("active").expect("some");
        assert_eq!(active.goal_id, newer.goal_id);
        assert_eq!(active.deadline_date, Some(day(30)));
        assert_eq!(active.track.as_deref(), Some("exam"));
        assert!(store.active_goal(2).expect("active").is_none());
    }

    #[test]
    fn task_pool_keeps_insertion_order_and_skips_closed() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let goal = store.create_goal(1, "g", None, None).expect("goal");
        let phase = store.create_phase(goal.goal_id, "p", true).expect("phase");

        let t1 = store.create_task(&NewTask::manual(phase.phase_id, "一")).expect("t1");
        let t2 = store.create_task(&NewTask::manual(phase.phase_id, "二")).expect("t2");
        let t3 = store.create_task(&NewTask::manual(phase.phase_id, "三")).expect("t3");
        store.set_task_status(t2.task_id, TaskStatus::Completed).expect("complete");
        store.set_task_status(t3.task_id, TaskStatus::InProgress).expect("progress");

        let pool: Vec<i64> = store
            .task_pool(phase.phase_id)
            .expect("pool")
            .iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(pool, vec![t1.task_id, t3.task_id]);

        let completed = store
            .list_tasks(phase.phase_id, Some(TaskStatus::Completed))
            .expect("list");
        assert_eq!(completed.len(), 1);
        assert_eq!(store.task_counts(phase.phase_id).expect("counts"), (1, 3));
    }

    #[test]
    fn deleting_a_task_leaves_mainline_reference() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let goal = store.create_goal(1, "g", None, None).expect("goal");
        let phase = store.create_phase(goal.goal_id, "p", true).expect("phase");
        let task = store.create_task(&NewTask::manual(phase.phase_id, "读书")).expect("task");
        let ml = store
            .create_mainline(&NewMainline {
                user_id: 1,
                goal_id: Some(goal.goal_id),
                phase_id: Some(phase.phase_id),
                date: day(1),
                title: "推进「读书」",
                source: MainlineSource::AutoFromPhase,
                task_id_ref: Some(task.task_id),
            })
            .expect("mainline");

        assert!(store.delete_task(task.task_id).expect("delete"));
        assert!(!store.delete_task(task.task_id).expect("delete again"));
        let kept = store.get_mainline(ml.mainline_id).expect("get").expect("kept");
        assert_eq!(kept.task_id_ref, Some(task.task_id));
    }

    #[test]
    fn newest_same_day_mainline_wins() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        mainline(&store, 1, day(1), "早");
        let later = mainline(&store, 1, day(1), "晚");
        mainline(&store, 1, day(2), "明天");

        let today = store.today_mainline(1, day(1)).expect("today").expect("some");
        assert_eq!(today.mainline_id, later.mainline_id);
        assert!(store.today_mainline(1, day(3)).expect("today").is_none());
    }

    #[test]
    fn retitle_rejects_empty_title() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let ml = mainline(&store, 1, day(1), "A");
        assert!(matches!(
            store.retitle_mainline(ml.mainline_id, "  "),
            Err(StoreError::InvalidUpdate(_))
        ));
        store.retitle_mainline(ml.mainline_id, "B").expect("retitle");
        let got = store.get_mainline(ml.mainline_id).expect("get").expect("some");
        assert_eq!(got.title, "B");
    }

    #[test]
    fn step_transitions_are_validated() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let ml = mainline(&store, 1, day(1), "m");
        let step = micro(&store, ml.mainline_id, "打开材料");
        assert_eq!(step.status, StepStatus::Ready);

        assert!(matches!(
            store.transition_step(step.step_id, StepStatus::Done),
            Err(StoreError::InvalidTransition { .. })
        ));
        let exec = store
            .transition_step(step.step_id, StepStatus::Executing)
            .expect("start");
        assert_eq!(exec.status, StepStatus::Executing);
        store
            .transition_step(step.step_id, StepStatus::Deferred)
            .expect("defer");
        store
            .transition_step(step.step_id, StepStatus::Ready)
            .expect("resume");
        assert!(matches!(
            store.transition_step(424242, StepStatus::Ready),
            Err(StoreError::NotFound { entity: "step", .. })
        ));
    }

    #[test]
    fn live_step_is_newest_ready_or_executing() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let ml = mainline(&store, 1, day(1), "m");
        let first = micro(&store, ml.mainline_id, "一");
        let second = micro(&store, ml.mainline_id, "二");

        let live = store.live_step(ml.mainline_id).expect("live").expect("some");
        assert_eq!(live.step_id, second.step_id);

        store
            .transition_step(second.step_id, StepStatus::Executing)
            .expect("start");
        store
            .transition_step(second.step_id, StepStatus::Done)
            .expect("done");
        let live = store.live_step(ml.mainline_id).expect("live").expect("some");
        assert_eq!(live.step_id, first.step_id);
        assert_eq!(store.list_steps(ml.mainline_id).expect("list").len(), 2);
    }

    #[test]
    fn latest_deferred_returns_newest_and_clear_removes_all() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        store.create_deferred(1, 10, 1, "exit").expect("first");
        let second = store.create_deferred(1, 11, 1, "exit").expect("second");

        let latest = store.latest_deferred(1).expect("latest").expect("some");
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.step_id, 11);

        assert_eq!(store.clear_deferred(1).expect("clear"), 2);
        assert!(store.latest_deferred(1).expect("latest").is_none());
    }

    #[test]
    fn evidence_is_listed_newest_first() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let tags = vec![SMALL_WIN_TAG.to_owned()];
        for i in 0..4 {
            store
                .append_evidence(1, &format!("完成了：{i}"), &tags)
                .expect("append");
        }
        let recent = store.recent_evidence(1, 3).expect("recent");
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].description, "完成了：3");
        assert_eq!(recent[0].tags, tags);
        assert_eq!(store.count_evidence(1).expect("count"), 4);
        assert_eq!(store.count_evidence(2).expect("count"), 0);
    }

    #[test]
    fn stuck_events_and_plans_are_appended() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        store
            .record_stuck_event(5, StuckType::Overthinking, Some("焦虑"), None)
            .expect("stuck");
        let events = store.list_stuck_events(5).expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stuck_type, StuckType::Overthinking);
        assert_eq!(events[0].emotion_label.as_deref(), Some("焦虑"));

        store
            .save_if_then(1, day(1), "如果我想刷手机", "我先做2分钟", Some("休息"))
            .expect("plan");
        let plans = store.list_if_then(1, day(1)).expect("plans");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].date, day(1));
        assert!(store.list_if_then(1, day(2)).expect("plans").is_empty());
    }

    #[test]
    fn confirm_import_creates_tasks_once() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let goal = store.create_goal(1, "g", None, None).expect("goal");
        let phase = store.create_phase(goal.goal_id, "p", true).expect("phase");
        let items = vec![
            ImportItem {
                title: "第一章".to_owned(),
                task_type: "chapter".to_owned(),
                status: TaskStatus::InProgress,
                tags: vec!["数学".to_owned()],
                difficulty_self_rating: None,
            },
            ImportItem {
                title: "模拟考试".to_owned(),
                task_type: "exam".to_owned(),
                status: TaskStatus::NotStarted,
                tags: vec![],
                difficulty_self_rating: Some(3),
            },
        ];
        let draft = store
            .create_import_draft(1, phase.phase_id, "paste", "raw", &items)
            .expect("draft");
        let reloaded = store
            .get_import_draft(draft.import_id)
            .expect("get")
            .expect("some");
        assert_eq!(reloaded.parsed_items, items);

        let created = store
            .confirm_import(draft.import_id)
            .expect("confirm")
            .expect("was a draft");
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].status, TaskStatus::InProgress);
        assert_eq!(created[0].source, "paste");
        assert_eq!(created[1].difficulty_self_rating, Some(3));

        assert!(store.confirm_import(draft.import_id).expect("again").is_none());
        assert!(!store.discard_import(draft.import_id).expect("discard"));
        assert_eq!(store.list_tasks(phase.phase_id, None).expect("list").len(), 2);
    }

    #[test]
    fn discarded_draft_cannot_be_confirmed() {
        let store = store();
        store.ensure_user(1).expect("ensure");
        let goal = store.create_goal(1, "g", None, None).expect("goal");
        let phase = store.create_phase(goal.goal_id, "p", true).expect("phase");
        let draft = store
            .create_import_draft(1, phase.phase_id, "paste", "raw", &[])
            .expect("draft");
        assert!(store.discard_import(draft.import_id).expect("discard"));
        assert!(store.confirm_import(draft.import_id).expect("confirm").is_none());
        let got = store.get_import_draft(draft.import_id).expect("get").expect("some");
        assert_eq!(got.state, ImportState::Discarded);
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let store = std::sync::Arc::new(
            SqliteStore::new(&dir.path().join("ecos.db")).expect("open store"),
        );
        for user in 1..=4 {
            store.ensure_user(user).expect("ensure");
        }

        let handles: Vec<_> = (1..=4)
            .map(|user| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .append_evidence(user, &format!("win {i}"), &[])
                            .expect("append");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread");
        }
        for user in 1..=4 {
            assert_eq!(store.count_evidence(user).expect("count"), 10);
        }
    }
}
