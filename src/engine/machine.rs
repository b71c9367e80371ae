//! Mainline and step lifecycle transitions.

use chrono::NaiveDate;
use tracing::{info, warn};

use super::candidates::select_candidates;
use super::reply::{Event, Reply, ReplyBody, StepSource, StepView};
use super::session::SessionContext;
use super::{ProgressionEngine, step_actions};
use crate::content::{ContentRequest, StepContent};
use crate::store::{
    Mainline, MainlineSource, NewMainline, NewStep, Step, StepKind, StepStatus, StuckType,
    TaskStatus, UserId,
};

const SHRINK_ACCEPTANCE: &str = "完成了这一个动作";

/// Reduce an instruction to its first clause, wrapped as a single action.
///
/// Splits on `，` when present, otherwise on `。`. An empty first clause
/// keeps the whole instruction.
pub fn shrink_instruction(instruction: &str) -> String {
    let trimmed = instruction.trim();
    let delimiter = if trimmed.contains('，') { '，' } else { '。' };
    let first = trimmed
        .split(delimiter)
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed);
    format!("只做一件事：{first}。做完就算赢。")
}

impl ProgressionEngine {
    /// Entry resolution: resume a deferral, else today's live step, else
    /// generate a fresh mainline.
    pub(super) async fn enter_today(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        if let Some(reply) = self.resume_deferred(user_id, ctx)? {
            return Ok(reply);
        }
        if let Some(reply) = self.resume_live(user_id, ctx)? {
            return Ok(reply);
        }
        self.fresh_generation(user_id, ctx).await
    }

    fn resume_deferred(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Option<Reply>> {
        let Some(link) = self.store.latest_deferred(user_id)? else {
            return Ok(None);
        };

        let step = self.store.get_step(link.step_id)?;
        let mainline = self.store.get_mainline(link.mainline_id)?;
        let (Some(step), Some(mainline)) = (step, mainline) else {
            warn!(user_id, step_id = link.step_id, "deferral points at a missing step, clearing");
            self.store.clear_deferred(user_id)?;
            return Ok(None);
        };
        if step.status != StepStatus::Deferred {
            warn!(
                user_id,
                step_id = step.step_id,
                status = step.status.as_str(),
                "deferral points at a step that is no longer deferred, clearing"
            );
            self.store.clear_deferred(user_id)?;
            return Ok(None);
        }

        let step = self.store.transition_step(step.step_id, StepStatus::Ready)?;
        self.store.clear_deferred(user_id)?;
        ctx.adopt(mainline.mainline_id, step.step_id);
        ctx.candidates = None;
        info!(
            user_id,
            mainline_id = mainline.mainline_id,
            step_id = step.step_id,
            "deferred step resumed"
        );

        Ok(Some(Reply::new(
            ReplyBody::StepReady {
                source: StepSource::ResumedDeferred,
                step: StepView::new(&mainline, &step),
            },
            vec![Event::StartStep, Event::TodayFresh],
        )))
    }

    fn resume_live(&self, user_id: UserId, ctx: &mut SessionContext) -> crate::Result<Option<Reply>> {
        let Some(mainline) = self.store.today_mainline(user_id, self.clock.today())? else {
            return Ok(None);
        };
        let Some(step) = self.store.live_step(mainline.mainline_id)? else {
            return Ok(None);
        };

        ctx.adopt(mainline.mainline_id, step.step_id);
        info!(
            user_id,
            mainline_id = mainline.mainline_id,
            step_id = step.step_id,
            status = step.status.as_str(),
            "live step resumed"
        );
        Ok(Some(Reply::new(
            ReplyBody::StepReady {
                source: StepSource::ResumedLive,
                step: StepView::new(&mainline, &step),
            },
            step_actions(&step),
        )))
    }

    /// Select candidates, persist a new mainline for the preferred one and
    /// give it a micro step. Always creates a new mainline.
    pub(super) async fn fresh_generation(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let today = self.clock.today();
        let goal = self.store.active_goal(user_id)?;
        let phase = match &goal {
            Some(goal) => self.store.active_phase(goal.goal_id)?,
            None => None,
        };
        let pool = match &phase {
            Some(phase) => self.store.task_pool(phase.phase_id)?,
            None => Vec::new(),
        };

        let pair = select_candidates(&pool, ctx.low_energy);
        let chosen = pair.preferred().clone();

        let mainline = self.store.create_mainline(&NewMainline {
            user_id,
            goal_id: goal.as_ref().map(|g| g.goal_id),
            phase_id: phase.as_ref().map(|p| p.phase_id),
            date: today,
            title: &chosen.title,
            source: if phase.is_some() {
                MainlineSource::AutoFromPhase
            } else {
                MainlineSource::Manual
            },
            task_id_ref: chosen.task_id,
        })?;
        if let Some(task_id) = chosen.task_id {
            self.store.set_task_status(task_id, TaskStatus::InProgress)?;
        }

        let request = ContentRequest::micro_step(&mainline.title)
            .with_task_title(chosen.task_title.as_deref());
        let content = self.broker.micro_step(&request).await;
        let step = self.insert_step(&mainline, StepKind::Micro, &content)?;

        self.store_if_then(user_id, today, &mainline, chosen.task_title.as_deref())
            .await;

        ctx.adopt(mainline.mainline_id, step.step_id);
        info!(
            user_id,
            mainline_id = mainline.mainline_id,
            step_id = step.step_id,
            task_id = ?chosen.task_id,
            low_energy = ctx.low_energy,
            "fresh mainline created"
        );

        let mut actions = vec![Event::StartStep];
        if pair.allows_switch() {
            actions.push(Event::Switch);
        }
        if !ctx.low_energy {
            actions.push(Event::LowEnergy);
        }
        ctx.candidates = Some(pair);

        Ok(Reply::new(
            ReplyBody::StepReady {
                source: StepSource::Fresh,
                step: StepView::new(&mainline, &step),
            },
            actions,
        ))
    }

    /// Auxiliary coping plan. A failed write is logged and never blocks entry.
    async fn store_if_then(
        &self,
        user_id: UserId,
        date: NaiveDate,
        mainline: &Mainline,
        task_title: Option<&str>,
    ) {
        let request = ContentRequest::if_then_plan(&mainline.title).with_task_title(task_title);
        let plan = self.broker.if_then_plan(&request).await;
        let reward = Some(plan.reward.as_str()).filter(|r| !r.trim().is_empty());
        if let Err(e) =
            self.store
                .save_if_then(user_id, date, &plan.if_trigger, &plan.then_action, reward)
        {
            warn!(user_id, mainline_id = mainline.mainline_id, "if-then plan not saved: {e}");
        }
    }

    /// Retitle today's mainline to candidate B and give it a new micro step.
    pub(super) async fn switch_candidate(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        if ctx.low_energy {
            return Ok(Reply::nothing("低能量模式下不提供切换"));
        }
        let Some(pair) = ctx.candidates.clone() else {
            return Ok(Reply::nothing("没有可切换的候选"));
        };
        let Some((mainline, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前主线"));
        };
        if step.status != StepStatus::Ready {
            return Ok(Reply::nothing("已经开始计时，不能切换"));
        }

        self.store
            .retitle_mainline(mainline.mainline_id, &pair.b.title)?;
        let mainline = Mainline {
            title: pair.b.title.clone(),
            ..mainline
        };
        let request = ContentRequest::micro_step(&mainline.title)
            .with_task_title(pair.b.task_title.as_deref());
        let content = self.broker.micro_step(&request).await;
        let new_step = self.insert_step(&mainline, StepKind::Micro, &content)?;

        ctx.adopt(mainline.mainline_id, new_step.step_id);
        ctx.candidates = None;
        info!(
            user_id,
            mainline_id = mainline.mainline_id,
            abandoned_step_id = step.step_id,
            step_id = new_step.step_id,
            "switched to candidate B"
        );

        Ok(Reply::new(
            ReplyBody::StepReady {
                source: StepSource::Switched,
                step: StepView::new(&mainline, &new_step),
            },
            vec![Event::StartStep],
        ))
    }

    pub(super) async fn enable_low_energy(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        self.store.set_low_energy(user_id, true)?;
        ctx.low_energy = true;
        info!(user_id, "low-energy mode enabled");
        self.fresh_generation(user_id, ctx).await
    }

    /// Drop every deferral and start over with a fresh mainline.
    pub(super) async fn today_fresh(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let cleared = self.store.clear_deferred(user_id)?;
        if cleared > 0 {
            info!(user_id, cleared, "deferrals dropped for a fresh start");
        }
        self.fresh_generation(user_id, ctx).await
    }

    pub(super) fn start_step(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let Some((mainline, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前步骤"));
        };
        let step = match step.status {
            StepStatus::Ready => {
                let step = self
                    .store
                    .transition_step(step.step_id, StepStatus::Executing)?;
                ctx.candidates = None;
                info!(user_id, step_id = step.step_id, "step started");
                step
            }
            StepStatus::Executing => step,
            StepStatus::Done | StepStatus::Deferred => {
                return Ok(Reply::nothing("当前步骤已结束"));
            }
        };
        Ok(Reply::new(
            ReplyBody::StepRunning {
                step: StepView::new(&mainline, &step),
            },
            step_actions(&step),
        ))
    }

    /// Micro done spawns one upgrade step; upgrade done enters review.
    pub(super) async fn complete_step(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let Some((mainline, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前步骤"));
        };
        if step.status != StepStatus::Executing {
            return Ok(Reply::nothing("步骤还没有开始"));
        }
        let step = self.store.transition_step(step.step_id, StepStatus::Done)?;
        info!(
            user_id,
            step_id = step.step_id,
            kind = step.kind.as_str(),
            "step completed"
        );

        match step.kind {
            StepKind::Micro => {
                let task_title = self.task_title(&mainline)?;
                let request = ContentRequest::upgrade_step(&mainline.title, &step.instruction)
                    .with_task_title(task_title.as_deref());
                let content = self.broker.upgrade_step(&request).await;
                let upgrade = self.insert_step(&mainline, StepKind::Upgrade, &content)?;
                ctx.adopt(mainline.mainline_id, upgrade.step_id);
                Ok(Reply::new(
                    ReplyBody::UpgradeOffered {
                        step: StepView::new(&mainline, &upgrade),
                    },
                    vec![Event::StartStep, Event::EndAsWin],
                ))
            }
            StepKind::Upgrade => Ok(self.enter_review(ctx, &mainline, &step)),
        }
    }

    /// Skip the upgrade and review the current step as a win.
    pub(super) fn end_as_win(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
    ) -> crate::Result<Reply> {
        let Some((mainline, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前步骤"));
        };
        if step.status == StepStatus::Deferred {
            return Ok(Reply::nothing("步骤已暂存"));
        }
        Ok(self.enter_review(ctx, &mainline, &step))
    }

    pub(super) fn shrink(&self, user_id: UserId, ctx: &mut SessionContext) -> crate::Result<Reply> {
        let Some((mainline, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前步骤"));
        };
        if step.status != StepStatus::Executing {
            return Ok(Reply::nothing("只有进行中的步骤可以处理"));
        }

        let instruction = shrink_instruction(&step.instruction);
        let shrunk = self.store.create_step(&NewStep {
            mainline_id: mainline.mainline_id,
            kind: StepKind::Micro,
            duration_min: self.broker.flow().shrink_minutes,
            instruction: &instruction,
            acceptance_criteria: SHRINK_ACCEPTANCE,
            difficulty: 1,
        })?;
        ctx.adopt(mainline.mainline_id, shrunk.step_id);
        info!(
            user_id,
            from_step_id = step.step_id,
            step_id = shrunk.step_id,
            "step shrunk"
        );

        Ok(Reply::new(
            ReplyBody::StepReady {
                source: StepSource::Shrunk,
                step: StepView::new(&mainline, &shrunk),
            },
            vec![Event::StartStep],
        ))
    }

    /// Park the executing step for the next entry resolution.
    pub(super) fn exit(&self, user_id: UserId, ctx: &mut SessionContext) -> crate::Result<Reply> {
        let Some((mainline, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前步骤"));
        };
        if step.status != StepStatus::Executing {
            return Ok(Reply::nothing("只有进行中的步骤可以暂存"));
        }

        let step = self
            .store
            .transition_step(step.step_id, StepStatus::Deferred)?;
        self.store
            .create_deferred(user_id, step.step_id, mainline.mainline_id, "exit")?;
        ctx.release();
        info!(
            user_id,
            mainline_id = mainline.mainline_id,
            step_id = step.step_id,
            "step deferred"
        );

        Ok(Reply::new(
            ReplyBody::Deferred {
                step_id: step.step_id,
            },
            vec![Event::Today],
        ))
    }

    /// Lock free text in as today's manual mainline.
    pub(super) async fn manual_mainline(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
        title: &str,
    ) -> crate::Result<Reply> {
        let goal = self.store.active_goal(user_id)?;
        let phase = match &goal {
            Some(goal) => self.store.active_phase(goal.goal_id)?,
            None => None,
        };
        let mainline = self.store.create_mainline(&NewMainline {
            user_id,
            goal_id: goal.as_ref().map(|g| g.goal_id),
            phase_id: phase.as_ref().map(|p| p.phase_id),
            date: self.clock.today(),
            title,
            source: MainlineSource::Manual,
            task_id_ref: None,
        })?;
        let content = self
            .broker
            .micro_step(&ContentRequest::micro_step(&mainline.title))
            .await;
        let step = self.insert_step(&mainline, StepKind::Micro, &content)?;

        ctx.adopt(mainline.mainline_id, step.step_id);
        ctx.candidates = None;
        info!(
            user_id,
            mainline_id = mainline.mainline_id,
            step_id = step.step_id,
            "manual mainline locked"
        );

        Ok(Reply::new(
            ReplyBody::StepReady {
                source: StepSource::Manual,
                step: StepView::new(&mainline, &step),
            },
            vec![Event::StartStep],
        ))
    }

    fn enter_review(&self, ctx: &mut SessionContext, mainline: &Mainline, step: &Step) -> Reply {
        ctx.review = Some(super::session::PendingReview {
            mainline_id: mainline.mainline_id,
            step_id: step.step_id,
        });
        ctx.recovery = None;
        let mut actions: Vec<Event> = StuckType::REVIEW_TAGS
            .into_iter()
            .map(|t| Event::ReviewTag {
                stuck_type: Some(t),
            })
            .collect();
        actions.push(Event::ReviewTag { stuck_type: None });
        Reply::new(
            ReplyBody::ReviewPrompt {
                options: StuckType::REVIEW_TAGS.to_vec(),
            },
            actions,
        )
    }

    pub(super) fn insert_step(
        &self,
        mainline: &Mainline,
        kind: StepKind,
        content: &StepContent,
    ) -> crate::Result<Step> {
        Ok(self.store.create_step(&NewStep {
            mainline_id: mainline.mainline_id,
            kind,
            duration_min: content.duration_min,
            instruction: &content.instruction,
            acceptance_criteria: &content.acceptance_criteria,
            difficulty: content.difficulty.unwrap_or(1),
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_takes_first_comma_clause() {
        assert_eq!(
            shrink_instruction("读第一章，写总结"),
            "只做一件事：读第一章。做完就算赢。"
        );
    }

    #[test]
    fn shrink_falls_back_to_period() {
        assert_eq!(
            shrink_instruction("打开文档。写标题"),
            "只做一件事：打开文档。做完就算赢。"
        );
    }

    #[test]
    fn shrink_without_delimiter_keeps_whole_instruction() {
        assert_eq!(shrink_instruction("深呼吸"), "只做一件事：深呼吸。做完就算赢。");
    }

    #[test]
    fn shrink_with_leading_delimiter_keeps_whole_instruction() {
        assert_eq!(
            shrink_instruction("，写总结"),
            "只做一件事：，写总结。做完就算赢。"
        );
    }
}
