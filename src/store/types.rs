//! Durable entity types shared by the store and the progression engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Logical user identifier (transport maps physical users onto this).
pub type UserId = i64;

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Tag present on every evidence row.
pub const SMALL_WIN_TAG: &str = "small_win";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle of a task in a phase's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
    Dropped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "dropped" => Some(Self::Dropped),
            _ => None,
        }
    }

    /// Status reached by the manual toggle action.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::NotStarted => Self::InProgress,
            Self::InProgress => Self::Completed,
            Self::Completed | Self::Dropped => Self::NotStarted,
        }
    }

    /// Whether the task is eligible for candidate selection.
    pub fn is_open(self) -> bool {
        matches!(self, Self::NotStarted | Self::InProgress)
    }
}

/// Kind of step within a mainline's action chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Short starter action.
    Micro,
    /// Follow-on action spawned after a micro step completes.
    Upgrade,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Micro => "micro",
            Self::Upgrade => "upgrade",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "micro" => Some(Self::Micro),
            "upgrade" => Some(Self::Upgrade),
            _ => None,
        }
    }
}

/// Status of a step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ready,
    Executing,
    Done,
    Deferred,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Deferred => "deferred",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ready" => Some(Self::Ready),
            "executing" => Some(Self::Executing),
            "done" => Some(Self::Done),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }

    /// Allowed status writes. Everything else is rejected by the store.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::Executing)
                | (Self::Executing, Self::Done)
                | (Self::Executing, Self::Deferred)
                | (Self::Deferred, Self::Ready)
        )
    }
}

/// Closed set of stall classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StuckType {
    Perfectionism,
    GoalTooBig,
    Overthinking,
    EmotionalFriction,
    RewardMismatch,
    SelfLimiting,
}

impl StuckType {
    pub const ALL: [Self; 6] = [
        Self::Perfectionism,
        Self::GoalTooBig,
        Self::Overthinking,
        Self::EmotionalFriction,
        Self::RewardMismatch,
        Self::SelfLimiting,
    ];

    /// Subset offered as an optional tag during review.
    pub const REVIEW_TAGS: [Self; 4] = [
        Self::Perfectionism,
        Self::Overthinking,
        Self::RewardMismatch,
        Self::SelfLimiting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Perfectionism => "PERFECTIONISM",
            Self::GoalTooBig => "GOAL_TOO_BIG",
            Self::Overthinking => "OVERTHINKING",
            Self::EmotionalFriction => "EMOTIONAL_FRICTION",
            Self::RewardMismatch => "REWARD_MISMATCH",
            Self::SelfLimiting => "SELF_LIMITING",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    pub fn is_review_tag(self) -> bool {
        Self::REVIEW_TAGS.contains(&self)
    }
}

/// Fixed emotion label set offered in the first stage of stuck recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Irritated,
    Anxious,
    Tired,
    Numb,
    Discouraged,
    Unsure,
}

impl Emotion {
    pub const ALL: [Self; 6] = [
        Self::Irritated,
        Self::Anxious,
        Self::Tired,
        Self::Numb,
        Self::Discouraged,
        Self::Unsure,
    ];

    /// Label stored on the stuck event and passed to the generator.
    pub fn label(self) -> &'static str {
        match self {
            Self::Irritated => "烦躁",
            Self::Anxious => "焦虑",
            Self::Tired => "疲惫",
            Self::Numb => "麻木",
            Self::Discouraged => "沮丧",
            Self::Unsure => "不知道",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.label() == raw)
    }
}

/// Where a mainline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainlineSource {
    Manual,
    AutoFromPhase,
}

impl MainlineSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoFromPhase => "auto_from_phase",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "auto_from_phase" => Self::AutoFromPhase,
            _ => Self::Manual,
        }
    }
}

/// Lifecycle of an import draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Draft,
    Confirmed,
    Discarded,
}

impl ImportState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirmed => "confirmed",
            Self::Discarded => "discarded",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "confirmed" => Self::Confirmed,
            "discarded" => Self::Discarded,
            _ => Self::Draft,
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    /// Stored but not applied to day-boundary computation.
    pub timezone: String,
    pub default_step_minutes: u32,
    pub tone: String,
    pub low_energy_mode: bool,
    pub weekly_summary_enabled: bool,
    pub streak_days: u32,
    pub last_progress_date: Option<NaiveDate>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: i64,
    pub user_id: UserId,
    pub title: String,
    pub deadline_date: Option<NaiveDate>,
    pub track: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase_id: i64,
    pub goal_id: i64,
    pub title: String,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub phase_id: i64,
    pub title: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub tags: Vec<String>,
    pub difficulty_self_rating: Option<i64>,
    pub source: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mainline {
    pub mainline_id: i64,
    pub user_id: UserId,
    pub goal_id: Option<i64>,
    pub phase_id: Option<i64>,
    pub date: NaiveDate,
    pub title: String,
    pub source: MainlineSource,
    /// Weak back-reference; the task may have been deleted since.
    pub task_id_ref: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: i64,
    pub mainline_id: i64,
    pub kind: StepKind,
    pub duration_min: u32,
    pub instruction: String,
    pub acceptance_criteria: String,
    pub difficulty: u32,
    pub status: StepStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredLink {
    pub id: i64,
    pub user_id: UserId,
    pub step_id: i64,
    pub mainline_id: i64,
    pub reason: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckEvent {
    pub event_id: i64,
    pub step_id: i64,
    pub stuck_type: StuckType,
    pub emotion_label: Option<String>,
    pub user_note: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: i64,
    pub user_id: UserId,
    pub description: String,
    pub tags: Vec<String>,
    pub created_at: i64,
}

/// Outcome of recording a completed review in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWin {
    pub evidence: Evidence,
    pub streak_days: u32,
    pub evidence_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfThenPlanRow {
    pub plan_id: i64,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub if_trigger: String,
    pub then_action: String,
    pub reward: Option<String>,
    pub created_at: i64,
}

/// One parsed line of a pasted task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportItem {
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub tags: Vec<String>,
    #[serde(default)]
    pub difficulty_self_rating: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDraft {
    pub import_id: i64,
    pub user_id: UserId,
    pub phase_id: i64,
    pub source: String,
    pub raw_text: String,
    pub parsed_items: Vec<ImportItem>,
    pub state: ImportState,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Insert commands
// ---------------------------------------------------------------------------

/// Parameters for inserting a task.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub phase_id: i64,
    pub title: &'a str,
    pub task_type: &'a str,
    pub status: TaskStatus,
    pub tags: &'a [String],
    pub difficulty_self_rating: Option<i64>,
    pub source: &'a str,
}

impl<'a> NewTask<'a> {
    /// A manually added, untagged `not_started` task.
    pub fn manual(phase_id: i64, title: &'a str) -> Self {
        Self {
            phase_id,
            title,
            task_type: "misc",
            status: TaskStatus::NotStarted,
            tags: &[],
            difficulty_self_rating: None,
            source: "manual",
        }
    }
}

/// Parameters for inserting a mainline.
#[derive(Debug, Clone)]
pub struct NewMainline<'a> {
    pub user_id: UserId,
    pub goal_id: Option<i64>,
    pub phase_id: Option<i64>,
    pub date: NaiveDate,
    pub title: &'a str,
    pub source: MainlineSource,
    pub task_id_ref: Option<i64>,
}

/// Parameters for inserting a step. New steps always start `ready`.
#[derive(Debug, Clone)]
pub struct NewStep<'a> {
    pub mainline_id: i64,
    pub kind: StepKind,
    pub duration_min: u32,
    pub instruction: &'a str,
    pub acceptance_criteria: &'a str,
    pub difficulty: u32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn now_epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Take at most `max_chars` characters (not bytes) from `text`.
pub fn clip_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_transitions_follow_lifecycle() {
        assert!(StepStatus::Ready.can_transition_to(StepStatus::Executing));
        assert!(StepStatus::Executing.can_transition_to(StepStatus::Done));
        assert!(StepStatus::Executing.can_transition_to(StepStatus::Deferred));
        assert!(StepStatus::Deferred.can_transition_to(StepStatus::Ready));

        assert!(!StepStatus::Ready.can_transition_to(StepStatus::Done));
        assert!(!StepStatus::Done.can_transition_to(StepStatus::Ready));
        assert!(!StepStatus::Deferred.can_transition_to(StepStatus::Executing));
    }

    #[test]
    fn task_toggle_cycles() {
        assert_eq!(TaskStatus::NotStarted.toggled(), TaskStatus::InProgress);
        assert_eq!(TaskStatus::InProgress.toggled(), TaskStatus::Completed);
        assert_eq!(TaskStatus::Completed.toggled(), TaskStatus::NotStarted);
        assert_eq!(TaskStatus::Dropped.toggled(), TaskStatus::NotStarted);
    }

    #[test]
    fn stuck_type_wire_names() {
        for t in StuckType::ALL {
            assert_eq!(StuckType::parse(t.as_str()), Some(t));
        }
        let json = serde_json::to_string(&StuckType::GoalTooBig).expect("serialize");
        assert_eq!(json, "\"GOAL_TOO_BIG\"");
        assert!(!StuckType::GoalTooBig.is_review_tag());
        assert!(StuckType::SelfLimiting.is_review_tag());
    }

    #[test]
    fn emotion_labels_round_trip() {
        for e in Emotion::ALL {
            assert_eq!(Emotion::from_label(e.label()), Some(e));
        }
        assert_eq!(Emotion::from_label("开心"), None);
    }

    #[test]
    fn clip_chars_counts_characters_not_bytes() {
        assert_eq!(clip_chars("打开材料开始读", 2), "打开");
        assert_eq!(clip_chars("abc", 10), "abc");
    }
}
