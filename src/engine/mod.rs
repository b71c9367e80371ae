//! Progression engine: today's mainline, its step chain, stall recovery,
//! deferral and review.
//!
//! One [`ProgressionEngine`] serves every user. A turn takes the user's
//! session lock for its whole duration, so turns for one user never
//! interleave while different users proceed concurrently. The durable store
//! is the only state shared across users.

pub mod candidates;
pub mod clock;
mod machine;
mod manage;
mod recovery;
pub mod reply;
mod review;
pub mod session;

use std::sync::Arc;

use tracing::{debug, info};

pub use candidates::{Candidate, CandidatePair, select_candidates};
pub use clock::{Clock, FixedClock, SystemClock};
pub use machine::shrink_instruction;
pub use manage::DEFAULT_PHASE_TITLE;
pub use reply::{Event, Overview, PhaseView, Reply, ReplyBody, StepSource, StepView, TaskView};
pub use review::evidence_description;
pub use session::{Awaiting, SessionContext, SessionRegistry};

use crate::config::EcosConfig;
use crate::content::ContentBroker;
use crate::store::{Mainline, SqliteStore, Step, StepStatus, UserId};

pub struct ProgressionEngine {
    store: Arc<SqliteStore>,
    broker: Arc<ContentBroker>,
    clock: Arc<dyn Clock>,
    sessions: SessionRegistry,
}

impl ProgressionEngine {
    pub fn new(store: Arc<SqliteStore>, broker: Arc<ContentBroker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            broker,
            clock,
            sessions: SessionRegistry::new(),
        }
    }

    /// Open the configured store and wire the broker with the system clock.
    pub fn from_config(config: &EcosConfig) -> crate::Result<Self> {
        let path = config.store.effective_db_path();
        let store = SqliteStore::new(&path)?;
        info!(path = %path.display(), "store opened");
        Ok(Self::new(
            Arc::new(store),
            Arc::new(ContentBroker::from_config(config)),
            Arc::new(SystemClock),
        ))
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run one turn for `user_id`.
    ///
    /// Returns `Err` only when a required store write or read failed; a
    /// missing prerequisite yields a [`ReplyBody::Nothing`] reply instead.
    pub async fn handle(&self, user_id: UserId, event: Event) -> crate::Result<Reply> {
        let session = self.sessions.get_or_create(user_id);
        let mut ctx = session.lock().await;

        let user = self.store.ensure_user(user_id)?;
        ctx.low_energy = user.low_energy_mode;
        debug!(user_id, event = event.name(), "turn started");

        let reply = match event {
            Event::Welcome => Ok(self.welcome()),
            Event::Today => self.enter_today(user_id, &mut ctx).await,
            Event::TodayFresh => self.today_fresh(user_id, &mut ctx).await,
            Event::Switch => self.switch_candidate(user_id, &mut ctx).await,
            Event::LowEnergy => self.enable_low_energy(user_id, &mut ctx).await,
            Event::StartStep => self.start_step(user_id, &mut ctx),
            Event::CompleteStep => self.complete_step(user_id, &mut ctx).await,
            Event::EndAsWin => self.end_as_win(user_id, &mut ctx),
            Event::Stuck => self.stuck(user_id, &mut ctx),
            Event::ChooseEmotion { emotion } => Ok(self.choose_emotion(&mut ctx, emotion)),
            Event::ClassifyStuck { stuck_type } => {
                self.classify_stuck(user_id, &mut ctx, stuck_type).await
            }
            Event::Shrink => self.shrink(user_id, &mut ctx),
            Event::Exit => self.exit(user_id, &mut ctx),
            Event::ReviewTag { stuck_type } => self.finalize_review(user_id, &mut ctx, stuck_type),
            Event::Manage => self.manage_overview(user_id),
            Event::ShowGoal => self.show_goal(user_id),
            Event::ShowPhases => self.show_phases(user_id),
            Event::ShowTasks => self.show_tasks(user_id),
            Event::RequestGoalTitle => Ok(self.request_goal_title(&mut ctx)),
            Event::RequestPhaseTitle => self.request_phase_title(user_id, &mut ctx),
            Event::RequestTaskTitle => self.request_task_title(user_id, &mut ctx),
            Event::RequestImport => self.request_import(user_id, &mut ctx),
            Event::ActivatePhase { phase_id } => self.activate_phase(user_id, phase_id),
            Event::ToggleTask { task_id } => self.toggle_task(user_id, task_id),
            Event::DeleteTask { task_id } => self.delete_task(user_id, task_id),
            Event::ConfirmImport { import_id } => self.confirm_import(user_id, import_id),
            Event::DiscardImport { import_id } => self.discard_import(user_id, import_id),
            Event::Text { text } => self.route_text(user_id, &mut ctx, &text).await,
            Event::Status => self.status(user_id),
            Event::Evidence => self.evidence_list(user_id),
        }?;

        debug!(
            user_id,
            nothing = reply.is_nothing(),
            step_id = ?ctx.current_step_id,
            "turn finished"
        );
        Ok(reply)
    }

    fn welcome(&self) -> Reply {
        Reply::new(
            ReplyBody::Welcome,
            vec![Event::Today, Event::Manage, Event::Status],
        )
    }

    /// The session's current mainline and step.
    ///
    /// When the session is empty (first turn after a restart) this falls
    /// back to today's mainline and its live step. A session released by
    /// Exit has nothing current until the next entry resolution.
    fn resolve_current(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Option<(Mainline, Step)>> {
        if ctx.released {
            return Ok(None);
        }
        if let (Some(mainline_id), Some(step_id)) = (ctx.current_mainline_id, ctx.current_step_id)
        {
            let mainline = self.store.get_mainline(mainline_id)?;
            let step = self.store.get_step(step_id)?;
            return Ok(mainline.zip(step));
        }

        let Some(mainline) = self.store.today_mainline(user_id, self.clock.today())? else {
            return Ok(None);
        };
        let Some(step) = self.store.live_step(mainline.mainline_id)? else {
            return Ok(None);
        };
        debug!(
            user_id,
            mainline_id = mainline.mainline_id,
            step_id = step.step_id,
            "session rebuilt from today's live step"
        );
        ctx.adopt(mainline.mainline_id, step.step_id);
        Ok(Some((mainline, step)))
    }

    /// Title of the task a mainline points at, if it still exists.
    fn task_title(&self, mainline: &Mainline) -> crate::Result<Option<String>> {
        match mainline.task_id_ref {
            Some(task_id) => Ok(self.store.get_task(task_id)?.map(|t| t.title)),
            None => Ok(None),
        }
    }
}

/// Actions offered next to a step, by its status.
pub(crate) fn step_actions(step: &Step) -> Vec<Event> {
    match step.status {
        StepStatus::Ready => vec![Event::StartStep],
        StepStatus::Executing => {
            vec![Event::CompleteStep, Event::Stuck, Event::Shrink, Event::Exit]
        }
        StepStatus::Done | StepStatus::Deferred => vec![Event::Today],
    }
}
