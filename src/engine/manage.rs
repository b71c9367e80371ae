//! Goal, phase and task management, free-text routing and read-only views.

use tracing::info;

use super::ProgressionEngine;
use super::reply::{Event, Overview, PhaseView, Reply, ReplyBody, TaskView};
use super::session::{Awaiting, SessionContext};
use crate::import::parse_import;
use crate::intent::is_big_goal;
use crate::store::{Goal, NewTask, Phase, UserId, clip_chars};

/// Phase created and activated together with every new goal.
pub const DEFAULT_PHASE_TITLE: &str = "默认阶段";

const IMPORT_SOURCE: &str = "paste";
const EVIDENCE_VIEW_LIMIT: usize = 10;
const EVIDENCE_VIEW_CHARS: usize = 60;
const BIG_GOAL_EXCERPT_CHARS: usize = 30;

fn needs_goal() -> Reply {
    Reply::new(ReplyBody::NeedsGoal, vec![Event::RequestGoalTitle])
}

impl ProgressionEngine {
    fn active_goal_and_phase(
        &self,
        user_id: UserId,
    ) -> crate::Result<(Option<Goal>, Option<Phase>)> {
        let goal = self.store.active_goal(user_id)?;
        let phase = match &goal {
            Some(goal) => self.store.active_phase(goal.goal_id)?,
            None => None,
        };
        Ok((goal, phase))
    }

    fn overview(&self, user_id: UserId) -> crate::Result<Overview> {
        let (goal, phase) = self.active_goal_and_phase(user_id)?;
        let (tasks_completed, tasks_total) = match &phase {
            Some(phase) => self.store.task_counts(phase.phase_id)?,
            None => (0, 0),
        };
        let streak_days = self
            .store
            .get_user(user_id)?
            .map_or(0, |u| u.streak_days);
        Ok(Overview {
            goal_title: goal.map(|g| g.title),
            phase_title: phase.map(|p| p.title),
            tasks_completed,
            tasks_total,
            streak_days,
            deferred_pending: self.store.latest_deferred(user_id)?.is_some(),
        })
    }

    /// Whether `phase_id` belongs to the user's active goal.
    fn owns_phase(&self, user_id: UserId, phase_id: i64) -> crate::Result<bool> {
        let Some(goal) = self.store.active_goal(user_id)? else {
            return Ok(false);
        };
        Ok(self
            .store
            .list_phases(goal.goal_id)?
            .iter()
            .any(|p| p.phase_id == phase_id))
    }

    pub(super) fn manage_overview(&self, user_id: UserId) -> crate::Result<Reply> {
        let overview = self.overview(user_id)?;
        if overview.goal_title.is_none() {
            return Ok(needs_goal());
        }
        Ok(Reply::new(
            ReplyBody::Overview(overview),
            vec![
                Event::ShowGoal,
                Event::ShowPhases,
                Event::ShowTasks,
                Event::RequestImport,
            ],
        ))
    }

    pub(super) fn show_goal(&self, user_id: UserId) -> crate::Result<Reply> {
        let goal = self.store.active_goal(user_id)?;
        Ok(Reply::new(
            ReplyBody::GoalView {
                title: goal.as_ref().map(|g| g.title.clone()),
                deadline_date: goal.and_then(|g| g.deadline_date),
            },
            vec![Event::RequestGoalTitle, Event::ShowPhases],
        ))
    }

    pub(super) fn show_phases(&self, user_id: UserId) -> crate::Result<Reply> {
        let Some(goal) = self.store.active_goal(user_id)? else {
            return Ok(needs_goal());
        };
        let phases = self.store.list_phases(goal.goal_id)?;
        let mut actions: Vec<Event> = phases
            .iter()
            .filter(|p| !p.is_active)
            .map(|p| Event::ActivatePhase {
                phase_id: p.phase_id,
            })
            .collect();
        actions.push(Event::RequestPhaseTitle);

        Ok(Reply::new(
            ReplyBody::Phases {
                phases: phases
                    .into_iter()
                    .map(|p| PhaseView {
                        phase_id: p.phase_id,
                        title: p.title,
                        is_active: p.is_active,
                    })
                    .collect(),
            },
            actions,
        ))
    }

    pub(super) fn show_tasks(&self, user_id: UserId) -> crate::Result<Reply> {
        let (_, Some(phase)) = self.active_goal_and_phase(user_id)? else {
            return Ok(needs_goal());
        };
        let tasks = self.store.list_tasks(phase.phase_id, None)?;
        let mut actions: Vec<Event> = tasks
            .iter()
            .map(|t| Event::ToggleTask { task_id: t.task_id })
            .collect();
        actions.extend([Event::RequestTaskTitle, Event::RequestImport]);

        Ok(Reply::new(
            ReplyBody::Tasks {
                phase_title: phase.title,
                tasks: tasks
                    .into_iter()
                    .map(|t| TaskView {
                        task_id: t.task_id,
                        title: t.title,
                        status: t.status,
                    })
                    .collect(),
            },
            actions,
        ))
    }

    pub(super) fn request_goal_title(&self, ctx: &mut SessionContext) -> Reply {
        self.await_input(ctx, Awaiting::GoalTitle)
    }

    pub(super) fn request_phase_title(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let Some(goal) = self.store.active_goal(user_id)? else {
            return Ok(needs_goal());
        };
        Ok(self.await_input(
            ctx,
            Awaiting::PhaseTitle {
                goal_id: goal.goal_id,
            },
        ))
    }

    pub(super) fn request_task_title(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let (_, Some(phase)) = self.active_goal_and_phase(user_id)? else {
            return Ok(needs_goal());
        };
        Ok(self.await_input(
            ctx,
            Awaiting::TaskTitle {
                phase_id: phase.phase_id,
            },
        ))
    }

    pub(super) fn request_import(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let (_, Some(phase)) = self.active_goal_and_phase(user_id)? else {
            return Ok(needs_goal());
        };
        Ok(self.await_input(
            ctx,
            Awaiting::ImportPaste {
                phase_id: phase.phase_id,
            },
        ))
    }

    fn await_input(&self, ctx: &mut SessionContext, awaiting: Awaiting) -> Reply {
        ctx.awaiting = Some(awaiting);
        Reply::new(ReplyBody::AwaitingInput { awaiting }, Vec::new())
    }

    pub(super) fn activate_phase(&self, user_id: UserId, phase_id: i64) -> crate::Result<Reply> {
        let Some(goal) = self.store.active_goal(user_id)? else {
            return Ok(needs_goal());
        };
        if !self.owns_phase(user_id, phase_id)? {
            return Ok(Reply::nothing("找不到这个阶段"));
        }
        self.store.activate_phase(goal.goal_id, phase_id)?;
        info!(user_id, phase_id, "phase activated");
        Ok(Reply::new(
            ReplyBody::PhaseActivated { phase_id },
            vec![Event::ShowTasks, Event::Today],
        ))
    }

    pub(super) fn toggle_task(&self, user_id: UserId, task_id: i64) -> crate::Result<Reply> {
        let Some(task) = self.store.get_task(task_id)? else {
            return Ok(Reply::nothing("找不到这个任务"));
        };
        if !self.owns_phase(user_id, task.phase_id)? {
            return Ok(Reply::nothing("找不到这个任务"));
        }
        let next = task.status.toggled();
        self.store.set_task_status(task_id, next)?;
        info!(
            user_id,
            task_id,
            from = task.status.as_str(),
            to = next.as_str(),
            "task toggled"
        );
        self.show_tasks(user_id)
    }

    pub(super) fn delete_task(&self, user_id: UserId, task_id: i64) -> crate::Result<Reply> {
        let Some(task) = self.store.get_task(task_id)? else {
            return Ok(Reply::nothing("找不到这个任务"));
        };
        if !self.owns_phase(user_id, task.phase_id)? {
            return Ok(Reply::nothing("找不到这个任务"));
        }
        self.store.delete_task(task_id)?;
        info!(user_id, task_id, "task deleted");
        self.show_tasks(user_id)
    }

    pub(super) fn confirm_import(&self, user_id: UserId, import_id: i64) -> crate::Result<Reply> {
        match self.store.get_import_draft(import_id)? {
            Some(draft) if draft.user_id == user_id => {}
            _ => return Ok(Reply::nothing("找不到这次导入")),
        }
        let Some(tasks) = self.store.confirm_import(import_id)? else {
            return Ok(Reply::nothing("这次导入已经处理过了"));
        };
        info!(user_id, import_id, count = tasks.len(), "import confirmed");
        Ok(Reply::new(
            ReplyBody::ImportConfirmed { count: tasks.len() },
            vec![Event::Today, Event::ShowTasks],
        ))
    }

    pub(super) fn discard_import(&self, user_id: UserId, import_id: i64) -> crate::Result<Reply> {
        match self.store.get_import_draft(import_id)? {
            Some(draft) if draft.user_id == user_id => {}
            _ => return Ok(Reply::nothing("找不到这次导入")),
        }
        if !self.store.discard_import(import_id)? {
            return Ok(Reply::nothing("这次导入已经处理过了"));
        }
        info!(user_id, import_id, "import discarded");
        Ok(Reply::new(ReplyBody::ImportDiscarded, vec![Event::RequestImport]))
    }

    /// Route free text to the awaited input, else treat it as today's work.
    pub(super) async fn route_text(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
        text: &str,
    ) -> crate::Result<Reply> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Reply::nothing("没有收到内容"));
        }

        match ctx.awaiting.take() {
            Some(Awaiting::GoalTitle) => self.create_goal(user_id, text),
            Some(Awaiting::PhaseTitle { goal_id }) => self.create_phase(user_id, goal_id, text),
            Some(Awaiting::TaskTitle { phase_id }) => self.add_task(user_id, phase_id, text),
            Some(Awaiting::ImportPaste { phase_id }) => self.draft_import(user_id, phase_id, text),
            None if is_big_goal(text) => Ok(Reply::new(
                ReplyBody::BigGoal {
                    excerpt: clip_chars(text, BIG_GOAL_EXCERPT_CHARS),
                },
                vec![Event::RequestGoalTitle, Event::Manage],
            )),
            None => self.manual_mainline(user_id, ctx, text).await,
        }
    }

    fn create_goal(&self, user_id: UserId, title: &str) -> crate::Result<Reply> {
        let goal = self.store.create_goal(user_id, title, None, None)?;
        let phase = self
            .store
            .create_phase(goal.goal_id, DEFAULT_PHASE_TITLE, true)?;
        info!(user_id, goal_id = goal.goal_id, phase_id = phase.phase_id, "goal created");
        Ok(Reply::new(
            ReplyBody::GoalCreated {
                goal_id: goal.goal_id,
                title: goal.title,
                phase_title: phase.title,
            },
            vec![Event::RequestTaskTitle, Event::RequestImport, Event::Today],
        ))
    }

    /// A created phase becomes the goal's only active phase.
    fn create_phase(&self, user_id: UserId, goal_id: i64, title: &str) -> crate::Result<Reply> {
        let phase = self.store.create_phase(goal_id, title, true)?;
        info!(user_id, goal_id, phase_id = phase.phase_id, "phase created and activated");
        Ok(Reply::new(
            ReplyBody::PhaseCreated {
                phase_id: phase.phase_id,
                title: phase.title,
            },
            vec![Event::RequestTaskTitle, Event::RequestImport, Event::ShowPhases],
        ))
    }

    fn add_task(&self, user_id: UserId, phase_id: i64, title: &str) -> crate::Result<Reply> {
        let task = self.store.create_task(&NewTask::manual(phase_id, title))?;
        info!(user_id, phase_id, task_id = task.task_id, "task added");
        Ok(Reply::new(
            ReplyBody::TaskAdded {
                task_id: task.task_id,
                title: task.title,
            },
            vec![Event::RequestTaskTitle, Event::ShowTasks, Event::Today],
        ))
    }

    fn draft_import(&self, user_id: UserId, phase_id: i64, raw: &str) -> crate::Result<Reply> {
        let items = parse_import(raw);
        if items.is_empty() {
            return Ok(Reply::new(ReplyBody::ImportEmpty, vec![Event::RequestImport]));
        }
        let draft = self
            .store
            .create_import_draft(user_id, phase_id, IMPORT_SOURCE, raw, &items)?;
        info!(
            user_id,
            import_id = draft.import_id,
            items = draft.parsed_items.len(),
            "import drafted"
        );
        Ok(Reply::new(
            ReplyBody::ImportPreview {
                import_id: draft.import_id,
                items: draft.parsed_items,
            },
            vec![
                Event::ConfirmImport {
                    import_id: draft.import_id,
                },
                Event::DiscardImport {
                    import_id: draft.import_id,
                },
            ],
        ))
    }

    pub(super) fn status(&self, user_id: UserId) -> crate::Result<Reply> {
        Ok(Reply::new(
            ReplyBody::Status(self.overview(user_id)?),
            vec![Event::Today, Event::Evidence, Event::Manage],
        ))
    }

    pub(super) fn evidence_list(&self, user_id: UserId) -> crate::Result<Reply> {
        let entries = self
            .store
            .recent_evidence(user_id, EVIDENCE_VIEW_LIMIT)?
            .into_iter()
            .map(|e| clip_chars(&e.description, EVIDENCE_VIEW_CHARS))
            .collect();
        let streak_days = self
            .store
            .get_user(user_id)?
            .map_or(0, |u| u.streak_days);
        Ok(Reply::new(
            ReplyBody::EvidenceList {
                entries,
                streak_days,
            },
            vec![Event::Today],
        ))
    }
}
