//! Free-text classification kept outside the progression engine.
//!
//! Table-driven so the keyword list can change without touching any state
//! transition.

use std::sync::LazyLock;

use regex::Regex;

/// Patterns that mark text as a long-horizon goal rather than today's work.
/// Matched against the lowercased input.
const BIG_GOAL_PATTERNS: &[&str] = &[
    r"\d+天",
    r"\d+个月",
    r"学位",
    r"毕业",
    r"全部",
    r"所有",
    r"完成整个",
    r"master",
    r"degree",
    r"finish all",
    r"月内",
    r"半年",
    r"一年",
    r"拿到.*证",
];

static BIG_GOAL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BIG_GOAL_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("big-goal pattern"))
        .collect()
});

/// Whether `text` reads like a whole goal ("3个月内拿到证书") instead of a
/// single day's mainline.
pub fn is_big_goal(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BIG_GOAL.iter().any(|re| re.is_match(&lowered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(BIG_GOAL.len(), BIG_GOAL_PATTERNS.len());
    }

    #[test]
    fn detects_long_horizon_goals() {
        assert!(is_big_goal("30天学完线代"));
        assert!(is_big_goal("3个月内拿到教师资格证"));
        assert!(is_big_goal("Finish ALL the chapters"));
        assert!(is_big_goal("get my Master degree"));
        assert!(is_big_goal("半年减重"));
    }

    #[test]
    fn day_sized_work_is_not_big() {
        assert!(!is_big_goal("读第一章"));
        assert!(!is_big_goal("写周报"));
        assert!(!is_big_goal(""));
    }
}
