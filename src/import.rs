//! Pasted task-list parsing.
//!
//! One task per non-empty line: `title - status - tags:a,b - type:exam`.
//! Fields are separated by `-` or `—`; anything unrecognised is ignored.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::{ImportItem, TaskStatus};

static FIELD_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[-—]\s*").expect("field separator pattern"));

const DEFAULT_TYPE: &str = "misc";

/// Title keywords that pick a task type when none is given.
const TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("exam", &["exam", "考试", "测验"]),
    ("chapter", &["chapter", "章", "节", "单元"]),
    ("video", &["video", "视频"]),
    ("course", &["course", "课程"]),
];

/// Parse pasted text into import items. Lines whose title is empty are dropped.
pub fn parse_import(raw: &str) -> Vec<ImportItem> {
    raw.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<ImportItem> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = FIELD_SEPARATOR.split(line).collect();
    let title = parts.first().map(|t| t.trim()).unwrap_or_default();
    if title.is_empty() {
        return None;
    }

    let mut status = TaskStatus::NotStarted;
    let mut tags = Vec::new();
    let mut task_type = DEFAULT_TYPE.to_owned();

    for part in &parts[1..] {
        let field = part.trim().to_lowercase();
        if let Some(parsed) = TaskStatus::parse(&field) {
            status = parsed;
        } else if let Some(list) = field.strip_prefix("tags:") {
            tags = list
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect();
        } else if let Some(kind) = field.strip_prefix("type:") {
            task_type = kind.trim().to_owned();
        }
    }

    if task_type.is_empty() || task_type == DEFAULT_TYPE {
        task_type = detect_type(title).unwrap_or(DEFAULT_TYPE).to_owned();
    }

    Some(ImportItem {
        title: title.to_owned(),
        task_type,
        status,
        tags,
        difficulty_self_rating: None,
    })
}

fn detect_type(title: &str) -> Option<&'static str> {
    let lowered = title.to_lowercase();
    TYPE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(kind, _)| *kind)
}
