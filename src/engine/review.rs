//! Review finalization: evidence and streak.

use tracing::info;

use super::ProgressionEngine;
use super::reply::{Event, Reply, ReplyBody};
use super::session::SessionContext;
use crate::store::{SMALL_WIN_TAG, StuckType, UserId, clip_chars};

/// Evidence text for a completed step: the mainline title plus a clipped
/// excerpt of the step's instruction.
pub fn evidence_description(
    mainline_title: &str,
    instruction: Option<&str>,
    excerpt_chars: usize,
) -> String {
    let mut text = format!("完成了：{mainline_title}");
    if let Some(instruction) = instruction {
        text.push_str(&format!(" → {}…", clip_chars(instruction, excerpt_chars)));
    }
    text
}

impl ProgressionEngine {
    pub(super) fn finalize_review(
        &self,
        user_id: UserId,
        ctx: &mut SessionContext,
        tag: Option<StuckType>,
    ) -> crate::Result<Reply> {
        let Some(pending) = ctx.review else {
            return Ok(Reply::nothing("没有待记录的复盘"));
        };
        if let Some(tag) = tag
            && !tag.is_review_tag()
        {
            return Ok(Reply::nothing("这个标签不能用于复盘"));
        }

        let mainline = self.store.get_mainline(pending.mainline_id)?;
        let step = self.store.get_step(pending.step_id)?;
        let title = mainline.as_ref().map_or("任务", |m| m.title.as_str());
        let description = evidence_description(
            title,
            step.as_ref().map(|s| s.instruction.as_str()),
            self.broker.flow().evidence_excerpt_chars,
        );

        let mut tags = vec![SMALL_WIN_TAG.to_owned()];
        if let Some(tag) = tag {
            tags.push(tag.as_str().to_owned());
        }

        let win = self
            .store
            .record_win(user_id, &description, &tags, self.clock.today())?;
        ctx.review = None;
        info!(
            user_id,
            step_id = pending.step_id,
            streak_days = win.streak_days,
            evidence_count = win.evidence_count,
            "review recorded"
        );

        Ok(Reply::new(
            ReplyBody::ReviewRecorded {
                evidence: description,
                streak_days: win.streak_days,
                evidence_count: win.evidence_count,
            },
            vec![Event::Today, Event::Evidence],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_clips_instruction() {
        let text = evidence_description("读书", Some("打开材料，开始读第一页"), 4);
        assert_eq!(text, "完成了：读书 → 打开材料…");
    }

    #[test]
    fn description_without_step() {
        assert_eq!(evidence_description("读书", None, 40), "完成了：读书");
    }
}
