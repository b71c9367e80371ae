//! Deterministic fallback content.
//!
//! Used whenever the generator is unavailable or returns invalid data. Every
//! value produced here is schema-valid.

use super::types::{
    ContentKind, ContentRequest, IfThenPlan, Intervention, StepContent, StructuredContent,
};
use crate::config::FlowConfig;
use crate::store::{StuckType, clip_chars};

/// Characters of the mainline title quoted in fallback step instructions.
const TITLE_CHARS: usize = 20;

struct InterventionTemplate {
    body_reset: &'static str,
    intervention_text: &'static str,
    restart_instruction: &'static str,
    restart_acceptance: &'static str,
    push_line: &'static str,
}

fn template(stuck_type: StuckType) -> InterventionTemplate {
    match stuck_type {
        StuckType::Perfectionism => InterventionTemplate {
            body_reset: "双手握拳3秒，用力，然后松开。感受手指放松。",
            intervention_text: "完美是陷阱。我们现在只做一个烂版本，比空白好一万倍。",
            restart_instruction: "写下关于这个任务你知道的3个词。不准修改。",
            restart_acceptance: "3个词出现在屏幕上",
            push_line: "烂版本 > 空白。开始 →",
        },
        StuckType::GoalTooBig => InterventionTemplate {
            body_reset: "站起来，伸展双臂过头顶，保持5秒，放下。",
            intervention_text: "你不需要看到终点，只看下一步。现在这一步只有2分钟。",
            restart_instruction: "打开你需要的页面或文件。只是打开。",
            restart_acceptance: "页面/文件已打开",
            push_line: "打开了就是开始。继续 →",
        },
        StuckType::Overthinking => InterventionTemplate {
            body_reset: "做两轮生理叹息：鼻子吸气，再吸一点，嘴巴长呼气。",
            intervention_text: "大脑在转圈不是在前进。不需要想清楚才开始，开始了才会想清楚。",
            restart_instruction: "不做选择，直接做第一个动作：打开、点击或写第一个字。",
            restart_acceptance: "已动手做了第一个物理动作",
            push_line: "动了就对了 →",
        },
        StuckType::EmotionalFriction => InterventionTemplate {
            body_reset: "双脚踩实地面，感受脚底压力，保持10秒。",
            intervention_text: "给情绪取个名字。说出来。情绪不需要消失，我们带着它做2分钟。",
            restart_instruction: "带着这个情绪，写下今天任务的标题。",
            restart_acceptance: "写下了标题",
            push_line: "情绪还在？没关系，我们已经在动了 →",
        },
        StuckType::RewardMismatch => InterventionTemplate {
            body_reset: "把手机翻面朝下，推到伸手够不到的地方。",
            intervention_text: "先做2分钟，做完再刷。带着「完成了一步」的感觉刷，完全不一样。",
            restart_instruction: "手机远离后，打开任务材料。",
            restart_acceptance: "手机已远离+材料已打开",
            push_line: "2分钟后你自由了 →",
        },
        StuckType::SelfLimiting => InterventionTemplate {
            body_reset: "双手放在桌上，手指用力按压桌面5秒，然后松开。",
            intervention_text: "「我不行」是想法，不是事实。现在只需要「试2分钟」。",
            restart_instruction: "写下：「我不确定我行，但我可以试2分钟。」然后开始。",
            restart_acceptance: "写下了这句话",
            push_line: "试了就是证据 →",
        },
    }
}

/// Fallback content for any request kind.
pub fn fallback_content(request: &ContentRequest, flow: &FlowConfig) -> StructuredContent {
    match request.kind {
        ContentKind::MicroStep => StructuredContent::Step(micro_step(&request.mainline_title, flow)),
        ContentKind::UpgradeStep => {
            StructuredContent::Step(upgrade_step(&request.mainline_title, flow))
        }
        ContentKind::IfThenPlan => StructuredContent::Plan(if_then_plan()),
        ContentKind::Intervention => StructuredContent::Intervention(intervention(request, flow)),
    }
}

pub fn micro_step(mainline_title: &str, flow: &FlowConfig) -> StepContent {
    let title = clip_chars(mainline_title, TITLE_CHARS);
    StepContent {
        duration_min: flow.micro_minutes,
        instruction: format!("打开「{title}」相关材料，找到你要开始的位置。只是打开，不用做别的。"),
        acceptance_criteria: "材料已打开在屏幕上".to_owned(),
        difficulty: None,
    }
}

pub fn upgrade_step(mainline_title: &str, flow: &FlowConfig) -> StepContent {
    let title = clip_chars(mainline_title, TITLE_CHARS);
    StepContent {
        duration_min: flow.upgrade_minutes,
        instruction: format!("继续推进「{title}」，完成下一个小节或练习题。"),
        acceptance_criteria: "能用1句话说出完成了什么".to_owned(),
        difficulty: Some(1),
    }
}

pub fn if_then_plan() -> IfThenPlan {
    IfThenPlan {
        if_trigger: "如果我开始犹豫或想刷手机".to_owned(),
        then_action: "我先做2分钟起步动作".to_owned(),
        reward: "完成后允许自己休息3分钟".to_owned(),
    }
}

/// Fallback intervention keyed by stuck type; unknown types use overthinking.
pub fn intervention(request: &ContentRequest, flow: &FlowConfig) -> Intervention {
    let stuck_type = request.stuck_type.unwrap_or(StuckType::Overthinking);
    let t = template(stuck_type);
    Intervention {
        stuck_type,
        emotion_label: request.emotion_label.clone(),
        body_reset: t.body_reset.to_owned(),
        intervention_text: t.intervention_text.to_owned(),
        restart_step: StepContent {
            duration_min: flow.micro_minutes,
            instruction: t.restart_instruction.to_owned(),
            acceptance_criteria: t.restart_acceptance.to_owned(),
            difficulty: None,
        },
        push_line: t.push_line.to_owned(),
        evidence_quotes: evidence_quotes(stuck_type, &request.evidence, flow),
    }
}

/// Clipped evidence quotes, only for self-limiting stalls with evidence on file.
pub fn evidence_quotes(
    stuck_type: StuckType,
    evidence: &[String],
    flow: &FlowConfig,
) -> Option<Vec<String>> {
    if stuck_type != StuckType::SelfLimiting || evidence.is_empty() {
        return None;
    }
    Some(
        evidence
            .iter()
            .take(flow.evidence_quote_limit)
            .map(|e| clip_chars(e, flow.evidence_quote_chars))
            .collect(),
    )
}
