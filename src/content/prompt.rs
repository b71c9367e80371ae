//! Prompt construction for the content generator.

use super::types::{ContentKind, ContentRequest};
use crate::store::StuckType;

/// System + user prompt pair for a single generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_BASE: &str = "你是\"执行陪伴系统\"的内容引擎。你只输出JSON，不输出任何其他文字。\n\
语气：坚定、温和、短句。不说教，不用\"你应该/你必须\"。用\"我们现在只做…\"\"下一步是…\"。\n\
所有中文输出。";

const RETRY_HINT: &str = "\n\n上一次你的回复不是合法JSON或缺少字段。这次你必须只输出一个JSON对象，\
不包含任何其他文字、markdown、代码块。";

/// Build the prompt for `request`. `retry` appends a stricter format reminder.
pub fn build_prompt(request: &ContentRequest, retry: bool) -> GenerationPrompt {
    let mut system = format!("{SYSTEM_BASE}\n{}", format_section(request));
    if retry {
        system.push_str(RETRY_HINT);
    }
    GenerationPrompt {
        system,
        user: user_prompt(request),
    }
}

fn format_section(request: &ContentRequest) -> String {
    match request.kind {
        ContentKind::MicroStep => "输出格式（严格JSON）：\n\
{\"type\":\"micro_step\",\"micro_step\":{\"duration_min\":2,\"instruction\":\"具体动作指令\",\"acceptance_criteria\":\"可验证的完成标准\"}}\n\
instruction必须是2分钟内可完成的具体动作。不能用抽象词（研究/优化/弄清楚）。"
            .to_owned(),
        ContentKind::UpgradeStep => "输出格式（严格JSON）：\n\
{\"type\":\"next_step\",\"step\":{\"duration_min\":8,\"instruction\":\"具体动作指令\",\"acceptance_criteria\":\"可验证的完成标准\",\"difficulty\":1}}\n\
这是用户完成2分钟起步后的升级动作（8分钟）。基于他刚完成的内容，给下一步。"
            .to_owned(),
        ContentKind::IfThenPlan => "输出格式（严格JSON）：\n\
{\"type\":\"if_then_plan\",\"plan\":{\"if_trigger\":\"如果…的情境\",\"then_action\":\"那么我会…的具体动作\",\"reward\":\"完成后…的小奖励\"}}\n\
生成一个实施意图，帮用户应对最可能的分心/犹豫场景。"
            .to_owned(),
        ContentKind::Intervention => intervention_section(request),
    }
}

fn intervention_section(request: &ContentRequest) -> String {
    let stuck_type = request.stuck_type.unwrap_or(StuckType::Overthinking);
    let mut section = format!(
        "输出格式（严格JSON）：\n\
{{\"type\":\"intervention\",\"stuck_type\":\"{}\",\"emotion_label\":\"用户选择的情绪\",\
\"body_reset\":\"30秒身体动作指令\",\
\"intervention_text\":\"30-90秒的干预文字，短句，行动导向\",\
\"restart_step\":{{\"duration_min\":2,\"instruction\":\"2分钟起步动作\",\"acceptance_criteria\":\"验收标准\"}},\
\"push_line\":\"一句话推回计时器\",\"evidence_quotes\":null}}",
        stuck_type.as_str()
    );
    if stuck_type == StuckType::SelfLimiting && !request.evidence.is_empty() {
        let evidence = serde_json::to_string(&request.evidence).unwrap_or_else(|_| "[]".to_owned());
        section.push_str(&format!(
            "\n这是SELF_LIMITING卡点，你必须在输出中包含 evidence_quotes 数组（1-3条），从下面的证据中选取：\n{evidence}"
        ));
    }
    section.push_str(
        "\nintervention_text要短（<150字），不说教。body_reset必须是具体的身体动作（深呼吸/握拳松开/站起来等）。",
    );
    section
}

fn user_prompt(request: &ContentRequest) -> String {
    let mut lines = Vec::new();
    if request.kind == ContentKind::Intervention {
        let stuck_type = request.stuck_type.unwrap_or(StuckType::Overthinking);
        lines.push(format!("卡点类型：{}", stuck_type.as_str()));
        if let Some(emotion) = &request.emotion_label {
            lines.push(format!("情绪：{emotion}"));
        }
    }
    lines.push(format!("今日主线：{}", request.mainline_title));
    if let Some(task) = &request.task_title {
        lines.push(format!("关联任务：{task}"));
    }
    if let Some(prior) = &request.prior_instruction {
        let label = match request.kind {
            ContentKind::UpgradeStep => "刚完成的起步动作",
            _ => "当前步骤",
        };
        lines.push(format!("{label}：{prior}"));
    }

    let ask = match request.kind {
        ContentKind::MicroStep => "请生成一个2分钟起步动作。",
        ContentKind::UpgradeStep => "请生成一个8分钟的升级动作。",
        ContentKind::IfThenPlan => "请生成一个if-then实施意图。",
        ContentKind::Intervention => "请生成干预内容。",
    };
    format!("{}\n\n{ask}", lines.join("\n"))
}
