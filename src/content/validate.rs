//! Schema validation for generator responses.
//!
//! Every required field of every kind is checked here. A response that is
//! not JSON, or is missing any required field, is `Invalid`.

use serde_json::{Map, Value};

use super::types::{
    ContentKind, ContentRequest, IfThenPlan, Intervention, StepContent, StructuredContent,
    Validated,
};
use crate::store::StuckType;

/// Wrapper keys a generator may nest the payload under.
const PAYLOAD_KEYS: [&str; 3] = ["micro_step", "step", "plan"];

/// Validate a raw generator response for `request.kind`.
pub fn validate_response(request: &ContentRequest, raw: &str) -> Validated<StructuredContent> {
    let json_str = extract_json_block(raw);
    let value: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            return Validated::Invalid {
                reason: format!("not JSON: {e}"),
            };
        }
    };
    let Some(root) = value.as_object() else {
        return Validated::Invalid {
            reason: "response is not a JSON object".to_owned(),
        };
    };

    let result = match request.kind {
        ContentKind::MicroStep | ContentKind::UpgradeStep => {
            parse_step(payload(root)).map(StructuredContent::Step)
        }
        ContentKind::IfThenPlan => parse_plan(payload(root)).map(StructuredContent::Plan),
        ContentKind::Intervention => {
            let stuck_type = request.stuck_type.unwrap_or(StuckType::Overthinking);
            parse_intervention(root, stuck_type).map(StructuredContent::Intervention)
        }
    };
    result.into()
}

/// Extract the JSON body from a potentially markdown-fenced response.
pub(crate) fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let Some(start) = trimmed.find('{')
        && let Some(end) = trimmed.rfind('}')
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

fn payload(root: &Map<String, Value>) -> &Map<String, Value> {
    PAYLOAD_KEYS
        .iter()
        .find_map(|key| root.get(*key).and_then(Value::as_object))
        .unwrap_or(root)
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    match obj.get(key).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_owned()),
        Some(_) => Err(format!("field `{key}` is empty")),
        None => Err(format!("missing field `{key}`")),
    }
}

fn parse_step(obj: &Map<String, Value>) -> Result<StepContent, String> {
    let duration = obj
        .get("duration_min")
        .or_else(|| obj.get("duration"))
        .and_then(Value::as_u64)
        .ok_or_else(|| "missing field `duration_min`".to_owned())?;
    let duration_min = u32::try_from(duration)
        .ok()
        .filter(|d| *d > 0)
        .ok_or_else(|| format!("duration {duration} out of range"))?;
    let difficulty = obj
        .get("difficulty")
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok());

    Ok(StepContent {
        duration_min,
        instruction: required_str(obj, "instruction")?,
        acceptance_criteria: required_str(obj, "acceptance_criteria")?,
        difficulty,
    })
}

fn parse_plan(obj: &Map<String, Value>) -> Result<IfThenPlan, String> {
    Ok(IfThenPlan {
        if_trigger: required_str(obj, "if_trigger")?,
        then_action: required_str(obj, "then_action")?,
        reward: required_str(obj, "reward")?,
    })
}

fn parse_intervention(
    obj: &Map<String, Value>,
    stuck_type: StuckType,
) -> Result<Intervention, String> {
    let restart = obj
        .get("restart_step")
        .and_then(Value::as_object)
        .ok_or_else(|| "missing field `restart_step`".to_owned())?;

    let evidence_quotes = obj.get("evidence_quotes").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect::<Vec<_>>()
    });

    Ok(Intervention {
        stuck_type,
        emotion_label: obj
            .get("emotion_label")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        body_reset: required_str(obj, "body_reset")?,
        intervention_text: required_str(obj, "intervention_text")?,
        restart_step: parse_step(restart)?,
        push_line: required_str(obj, "push_line")?,
        evidence_quotes: evidence_quotes.filter(|q| !q.is_empty()),
    })
}
