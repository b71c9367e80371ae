//! Durable entities and their SQLite store.
//!
//! Goals own phases, phases own tasks, mainlines own steps. Deferrals,
//! stuck events, evidence and if-then plans are independent logs that point
//! at steps and mainlines by id.

mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::{SqliteStore, StoreError};
pub use types::{
    DeferredLink, Emotion, Evidence, Goal, IfThenPlanRow, ImportDraft, ImportItem, ImportState,
    Mainline, MainlineSource, NewMainline, NewStep, NewTask, Phase, RecordedWin, SMALL_WIN_TAG, Step,
    StepKind, StepStatus, StuckEvent, StuckType, Task, TaskStatus, User, UserId, clip_chars,
};
