//! Structured content requests and responses.

use serde::{Deserialize, Serialize};

use crate::store::StuckType;

/// What the progression engine is asking the generator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    MicroStep,
    UpgradeStep,
    IfThenPlan,
    Intervention,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MicroStep => "micro_step",
            Self::UpgradeStep => "upgrade_step",
            Self::IfThenPlan => "if_then_plan",
            Self::Intervention => "intervention",
        }
    }
}

/// Free-form context for one content request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub kind: ContentKind,
    pub mainline_title: String,
    pub task_title: Option<String>,
    /// Instruction of the step that was just completed or got stuck.
    pub prior_instruction: Option<String>,
    pub stuck_type: Option<StuckType>,
    pub emotion_label: Option<String>,
    /// Recent evidence descriptions, newest first.
    pub evidence: Vec<String>,
}

impl ContentRequest {
    fn base(kind: ContentKind, mainline_title: &str) -> Self {
        Self {
            kind,
            mainline_title: mainline_title.to_owned(),
            task_title: None,
            prior_instruction: None,
            stuck_type: None,
            emotion_label: None,
            evidence: Vec::new(),
        }
    }

    pub fn micro_step(mainline_title: &str) -> Self {
        Self::base(ContentKind::MicroStep, mainline_title)
    }

    pub fn upgrade_step(mainline_title: &str, completed_instruction: &str) -> Self {
        Self {
            prior_instruction: Some(completed_instruction.to_owned()),
            ..Self::base(ContentKind::UpgradeStep, mainline_title)
        }
    }

    pub fn if_then_plan(mainline_title: &str) -> Self {
        Self::base(ContentKind::IfThenPlan, mainline_title)
    }

    pub fn intervention(stuck_type: StuckType, mainline_title: &str) -> Self {
        Self {
            stuck_type: Some(stuck_type),
            ..Self::base(ContentKind::Intervention, mainline_title)
        }
    }

    #[must_use]
    pub fn with_task_title(mut self, title: Option<&str>) -> Self {
        self.task_title = title.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn with_prior_instruction(mut self, instruction: &str) -> Self {
        self.prior_instruction = Some(instruction.to_owned());
        self
    }

    #[must_use]
    pub fn with_emotion(mut self, label: Option<&str>) -> Self {
        self.emotion_label = label.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// A concrete instructable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContent {
    pub duration_min: u32,
    pub instruction: String,
    pub acceptance_criteria: String,
    #[serde(default)]
    pub difficulty: Option<u32>,
}

/// Implementation intention for the day's most likely distraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfThenPlan {
    pub if_trigger: String,
    pub then_action: String,
    pub reward: String,
}

/// Stall intervention: a body reset, a short text and a restart step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    pub stuck_type: StuckType,
    pub emotion_label: Option<String>,
    pub body_reset: String,
    pub intervention_text: String,
    pub restart_step: StepContent,
    pub push_line: String,
    pub evidence_quotes: Option<Vec<String>>,
}

/// Content returned by the broker. Always schema-valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredContent {
    Step(StepContent),
    Plan(IfThenPlan),
    Intervention(Intervention),
}

/// Outcome of checking a generator response against the schema for its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validated<T> {
    Valid(T),
    Invalid { reason: String },
}

impl<T> From<Result<T, String>> for Validated<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(v) => Self::Valid(v),
            Err(reason) => Self::Invalid { reason },
        }
    }
}

/// Whether delivered content came from the generator or the fixed fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    Generated,
    Fallback,
}
