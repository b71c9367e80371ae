//! Two-stage stuck recovery: emotion, then stuck type, then a restart step.

use tracing::info;

use super::ProgressionEngine;
use super::reply::{Event, Reply, ReplyBody, StepView};
use super::session::{Recovery, SessionContext};
use crate::content::ContentRequest;
use crate::store::{Emotion, StepKind, StepStatus, StuckType, UserId};

impl ProgressionEngine {
    pub(super) fn stuck(&self, user_id: UserId, ctx: &mut SessionContext) -> crate::Result<Reply> {
        let Some((_, step)) = self.resolve_current(user_id, ctx)? else {
            return Ok(Reply::nothing("没有当前步骤"));
        };
        if step.status != StepStatus::Executing {
            return Ok(Reply::nothing("只有进行中的步骤可以处理"));
        }
        ctx.recovery = Some(Recovery {
            step_id: step.step_id,
            emotion: None,
        });
        info!(user_id, step_id = step.step_id, "stuck recovery started");

        Ok(Reply::new(
            ReplyBody::ChooseEmotion {
                options: Emotion::ALL.to_vec(),
            },
            Emotion::ALL
                .into_iter()
                .map(|emotion| Event::ChooseEmotion { emotion })
                .collect(),
        ))
    }

    pub(super) fn choose_emotion(&self, ctx: &mut SessionContext, emotion: Emotion) -> Reply {
        let Some(recovery) = ctx.recovery.as_mut() else {
            return Reply::nothing("没有进行中的卡点处理");
        };
        recovery.emotion = Some(emotion);

        Reply::new(
            ReplyBody::ChooseStuckType {
                emotion: Some(emotion),
                options: StuckType::ALL.to_vec(),
            },
            StuckType::ALL
                .into_iter()
                .map(|stuck_type| Event::ClassifyStuck { stuck_type })
                .collect(),
        )
    }

    /// Log the stall, fetch an intervention and make its restart step current.
    pub(super) async fn classify_stuck(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
        stuck_type: StuckType,
    ) -> crate::Result<Reply> {
        let Some(recovery) = ctx.recovery else {
            return Ok(Reply::nothing("没有进行中的卡点处理"));
        };
        let Some(step) = self.store.get_step(recovery.step_id)? else {
            ctx.recovery = None;
            return Ok(Reply::nothing("卡住的步骤已不存在"));
        };
        let Some(mainline) = self.store.get_mainline(step.mainline_id)? else {
            ctx.recovery = None;
            return Ok(Reply::nothing("卡住的主线已不存在"));
        };

        let evidence = if stuck_type == StuckType::SelfLimiting {
            self.store
                .recent_evidence(user_id, self.broker.flow().self_limiting_lookup)?
                .into_iter()
                .map(|e| e.description)
                .collect()
        } else {
            Vec::new()
        };
        let emotion_label = recovery.emotion.map(Emotion::label);
        let task_title = self.task_title(&mainline)?;

        let request = ContentRequest::intervention(stuck_type, &mainline.title)
            .with_task_title(task_title.as_deref())
            .with_prior_instruction(&step.instruction)
            .with_emotion(emotion_label)
            .with_evidence(evidence);
        let intervention = self.broker.intervention(&request).await;

        self.store
            .record_stuck_event(step.step_id, stuck_type, emotion_label, None)?;
        let restart = self.insert_step(&mainline, StepKind::Micro, &intervention.restart_step)?;
        ctx.adopt(mainline.mainline_id, restart.step_id);
        info!(
            user_id,
            stuck_step_id = step.step_id,
            step_id = restart.step_id,
            stuck_type = stuck_type.as_str(),
            "restart step created"
        );

        Ok(Reply::new(
            ReplyBody::Intervention {
                intervention,
                restart: StepView::new(&mainline, &restart),
            },
            vec![Event::StartStep],
        ))
    }
}
