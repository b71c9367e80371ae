//! Inbound events and outbound replies.
//!
//! Every action offered in a reply is itself an [`Event`] the transport can
//! send back verbatim.

use serde::{Deserialize, Serialize};

use super::session::Awaiting;
use crate::content::Intervention;
use crate::store::{Emotion, ImportItem, Mainline, Step, StepKind, StepStatus, StuckType, TaskStatus};

/// A user input, already mapped from the transport's command/button/text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Welcome,
    /// Entry resolution: deferral, then today's live step, then fresh.
    Today,
    /// Drop any deferral and generate a fresh mainline.
    TodayFresh,
    /// Replace today's mainline with candidate B.
    Switch,
    LowEnergy,
    StartStep,
    CompleteStep,
    /// Skip the upgrade and go straight to review.
    EndAsWin,
    Stuck,
    ChooseEmotion {
        emotion: Emotion,
    },
    ClassifyStuck {
        stuck_type: StuckType,
    },
    Shrink,
    Exit,
    /// Finalize review with an optional stall tag.
    ReviewTag {
        #[serde(default)]
        stuck_type: Option<StuckType>,
    },
    Manage,
    ShowGoal,
    ShowPhases,
    ShowTasks,
    RequestGoalTitle,
    RequestPhaseTitle,
    RequestTaskTitle,
    RequestImport,
    ActivatePhase {
        phase_id: i64,
    },
    ToggleTask {
        task_id: i64,
    },
    DeleteTask {
        task_id: i64,
    },
    ConfirmImport {
        import_id: i64,
    },
    DiscardImport {
        import_id: i64,
    },
    Text {
        text: String,
    },
    Status,
    Evidence,
}

impl Event {
    /// Stable event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Today => "today",
            Self::TodayFresh => "today_fresh",
            Self::Switch => "switch",
            Self::LowEnergy => "low_energy",
            Self::StartStep => "start_step",
            Self::CompleteStep => "complete_step",
            Self::EndAsWin => "end_as_win",
            Self::Stuck => "stuck",
            Self::ChooseEmotion { .. } => "choose_emotion",
            Self::ClassifyStuck { .. } => "classify_stuck",
            Self::Shrink => "shrink",
            Self::Exit => "exit",
            Self::ReviewTag { .. } => "review_tag",
            Self::Manage => "manage",
            Self::ShowGoal => "show_goal",
            Self::ShowPhases => "show_phases",
            Self::ShowTasks => "show_tasks",
            Self::RequestGoalTitle => "request_goal_title",
            Self::RequestPhaseTitle => "request_phase_title",
            Self::RequestTaskTitle => "request_task_title",
            Self::RequestImport => "request_import",
            Self::ActivatePhase { .. } => "activate_phase",
            Self::ToggleTask { .. } => "toggle_task",
            Self::DeleteTask { .. } => "delete_task",
            Self::ConfirmImport { .. } => "confirm_import",
            Self::DiscardImport { .. } => "discard_import",
            Self::Text { .. } => "text",
            Self::Status => "status",
            Self::Evidence => "evidence",
        }
    }
}

/// How the step shown in a [`ReplyBody::StepReady`] came to be current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    /// A deferred step was put back to `ready`.
    ResumedDeferred,
    /// Today's mainline already had a live step.
    ResumedLive,
    /// A new mainline was generated from the candidates.
    Fresh,
    Switched,
    Shrunk,
    /// Free text locked in as a manual mainline.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepView {
    pub step_id: i64,
    pub mainline_id: i64,
    pub mainline_title: String,
    pub kind: StepKind,
    pub status: StepStatus,
    pub duration_min: u32,
    pub instruction: String,
    pub acceptance_criteria: String,
}

impl StepView {
    pub fn new(mainline: &Mainline, step: &Step) -> Self {
        Self {
            step_id: step.step_id,
            mainline_id: mainline.mainline_id,
            mainline_title: mainline.title.clone(),
            kind: step.kind,
            status: step.status,
            duration_min: step.duration_min,
            instruction: step.instruction.clone(),
            acceptance_criteria: step.acceptance_criteria.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseView {
    pub phase_id: i64,
    pub title: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: i64,
    pub title: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Overview {
    pub goal_title: Option<String>,
    pub phase_title: Option<String>,
    pub tasks_completed: u64,
    pub tasks_total: u64,
    pub streak_days: u32,
    pub deferred_pending: bool,
}

/// What the turn produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyBody {
    Welcome,
    StepReady {
        source: StepSource,
        step: StepView,
    },
    StepRunning {
        step: StepView,
    },
    /// Micro step done; an upgrade step is ready.
    UpgradeOffered {
        step: StepView,
    },
    ChooseEmotion {
        options: Vec<Emotion>,
    },
    ChooseStuckType {
        emotion: Option<Emotion>,
        options: Vec<StuckType>,
    },
    Intervention {
        intervention: Intervention,
        restart: StepView,
    },
    Deferred {
        step_id: i64,
    },
    ReviewPrompt {
        options: Vec<StuckType>,
    },
    ReviewRecorded {
        evidence: String,
        streak_days: u32,
        evidence_count: u64,
    },
    BigGoal {
        excerpt: String,
    },
    AwaitingInput {
        awaiting: Awaiting,
    },
    GoalCreated {
        goal_id: i64,
        title: String,
        phase_title: String,
    },
    GoalView {
        title: Option<String>,
        deadline_date: Option<chrono::NaiveDate>,
    },
    PhaseCreated {
        phase_id: i64,
        title: String,
    },
    PhaseActivated {
        phase_id: i64,
    },
    Phases {
        phases: Vec<PhaseView>,
    },
    Tasks {
        phase_title: String,
        tasks: Vec<TaskView>,
    },
    TaskAdded {
        task_id: i64,
        title: String,
    },
    ImportPreview {
        import_id: i64,
        items: Vec<ImportItem>,
    },
    ImportEmpty,
    ImportConfirmed {
        count: usize,
    },
    ImportDiscarded,
    /// Management needs an active goal and phase first.
    NeedsGoal,
    Overview(Overview),
    Status(Overview),
    EvidenceList {
        entries: Vec<String>,
        streak_days: u32,
    },
    /// A prerequisite was missing; nothing changed.
    Nothing {
        reason: String,
    },
}

/// Reply plus the actions the user may take next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub body: ReplyBody,
    pub actions: Vec<Event>,
}

impl Reply {
    pub fn new(body: ReplyBody, actions: Vec<Event>) -> Self {
        Self { body, actions }
    }

    pub fn nothing(reason: impl Into<String>) -> Self {
        Self::new(
            ReplyBody::Nothing {
                reason: reason.into(),
            },
            vec![Event::Today],
        )
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self.body, ReplyBody::Nothing { .. })
    }

    /// The step carried by this reply, if any.
    pub fn step(&self) -> Option<&StepView> {
        match &self.body {
            ReplyBody::StepReady { step, .. }
            | ReplyBody::StepRunning { step }
            | ReplyBody::UpgradeOffered { step } => Some(step),
            ReplyBody::Intervention { restart, .. } => Some(restart),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_tagged_wire_format() {
        let ev: Event =
            serde_json::from_str(r#"{"type":"classify_stuck","stuck_type":"SELF_LIMITING"}"#)
                .expect("parse");
        assert_eq!(
            ev,
            Event::ClassifyStuck {
                stuck_type: StuckType::SelfLimiting
            }
        );

        let ev: Event = serde_json::from_str(r#"{"type":"review_tag"}"#).expect("parse");
        assert_eq!(ev, Event::ReviewTag { stuck_type: None });

        let json = serde_json::to_string(&Event::ChooseEmotion {
            emotion: Emotion::Anxious,
        })
        .expect("serialize");
        assert_eq!(json, r#"{"type":"choose_emotion","emotion":"anxious"}"#);
    }

    #[test]
    fn unknown_emotion_is_rejected() {
        let parsed: Result<Event, _> =
            serde_json::from_str(r#"{"type":"choose_emotion","emotion":"happy"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn nothing_reply_offers_today() {
        let reply = Reply::nothing("no current step");
        assert!(reply.is_nothing());
        assert_eq!(reply.actions, vec![Event::Today]);
        assert!(reply.step().is_none());
    }
}
