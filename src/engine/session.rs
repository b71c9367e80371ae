//! Per-user scratch state and its registry.
//!
//! A [`SessionContext`] lives only for the process lifetime. Everything in it
//! can be rebuilt from durable rows: entry resolution doubles as recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::candidates::CandidatePair;
use crate::store::{Emotion, UserId};

/// Which free-text input the next `Text` event answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum Awaiting {
    GoalTitle,
    PhaseTitle { goal_id: i64 },
    TaskTitle { phase_id: i64 },
    ImportPaste { phase_id: i64 },
}

/// Stuck recovery in progress: the stalled step plus the emotion chosen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    pub step_id: i64,
    pub emotion: Option<Emotion>,
}

/// Review entered but not yet finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReview {
    pub mainline_id: i64,
    pub step_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub current_mainline_id: Option<i64>,
    pub current_step_id: Option<i64>,
    /// Last computed pair; only set right after fresh generation.
    pub candidates: Option<CandidatePair>,
    pub awaiting: Option<Awaiting>,
    /// Cache of the sticky preference; the user row is authoritative.
    pub low_energy: bool,
    pub recovery: Option<Recovery>,
    pub review: Option<PendingReview>,
    /// Set by Exit: nothing is current until the next entry resolution,
    /// and today's live step must not be adopted implicitly.
    pub released: bool,
}

impl SessionContext {
    /// Point the session at a new current step, dropping any in-flight
    /// recovery or review.
    pub fn adopt(&mut self, mainline_id: i64, step_id: i64) {
        self.current_mainline_id = Some(mainline_id);
        self.current_step_id = Some(step_id);
        self.recovery = None;
        self.review = None;
        self.released = false;
    }

    /// Nothing is current any more.
    pub fn release(&mut self) {
        self.current_mainline_id = None;
        self.current_step_id = None;
        self.candidates = None;
        self.recovery = None;
        self.released = true;
    }
}

/// Registry of live sessions keyed by user.
///
/// The outer lock is held only for lookup; each session has its own async
/// lock that the engine keeps for a whole turn, so turns for one user are
/// serialized while different users run concurrently.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<SessionContext>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for `user_id`, creating an empty one on first use.
    pub fn get_or_create(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<SessionContext>> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(sessions.entry(user_id).or_default())
    }

    /// Drop a user's scratch state, as a process restart would.
    pub fn forget(&self, user_id: UserId) -> bool {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.remove(&user_id).is_some()
    }

    pub fn len(&self) -> usize {
        match self.sessions.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_user_shares_one_session() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create(1);
        a.lock().await.current_step_id = Some(9);

        let b = registry.get_or_create(1);
        assert_eq!(b.lock().await.current_step_id, Some(9));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let registry = SessionRegistry::new();
        registry.get_or_create(1).lock().await.low_energy = true;
        assert!(!registry.get_or_create(2).lock().await.low_energy);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn forget_drops_state() {
        let registry = SessionRegistry::new();
        let _ = registry.get_or_create(1);
        assert!(registry.forget(1));
        assert!(!registry.forget(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn adopt_clears_recovery_and_review() {
        let mut ctx = SessionContext {
            recovery: Some(Recovery {
                step_id: 1,
                emotion: None,
            }),
            review: Some(PendingReview {
                mainline_id: 1,
                step_id: 1,
            }),
            ..SessionContext::default()
        };
        ctx.adopt(2, 3);
        assert_eq!(ctx.current_mainline_id, Some(2));
        assert_eq!(ctx.current_step_id, Some(3));
        assert!(ctx.recovery.is_none());
        assert!(ctx.review.is_none());
    }

    #[test]
    fn release_marks_session_until_next_adopt() {
        let mut ctx = SessionContext::default();
        ctx.adopt(1, 2);
        ctx.release();
        assert!(ctx.released);
        assert!(ctx.current_step_id.is_none());

        ctx.adopt(1, 3);
        assert!(!ctx.released);
        assert_eq!(ctx.current_step_id, Some(3));
    }

    #[test]
    fn awaiting_wire_format() {
        let json = serde_json::to_string(&Awaiting::TaskTitle { phase_id: 4 }).expect("json");
        assert_eq!(json, r#"{"field":"task_title","phase_id":4}"#);
    }
}
