//! Candidate selection for today's mainline.
//!
//! Pure: given the open task pool of the active phase, produce the committed
//! option (A) and the low-effort option (B).

use serde::{Deserialize, Serialize};

use crate::store::{Task, TaskStatus};

/// One selectable option for today's mainline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub reason: String,
    /// Task this candidate advances. `None` for the pool bootstrap options.
    pub task_id: Option<i64>,
    pub task_title: Option<String>,
}

/// The A/B pair plus the low-energy flag it was computed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub a: Candidate,
    pub b: Candidate,
    pub low_energy: bool,
}

impl CandidatePair {
    /// The candidate presented by default: B in low-energy mode, A otherwise.
    pub fn preferred(&self) -> &Candidate {
        if self.low_energy { &self.b } else { &self.a }
    }

    /// Switching to B is only offered outside low-energy mode.
    pub fn allows_switch(&self) -> bool {
        !self.low_energy
    }
}

/// Compute the A/B pair for an open task pool.
///
/// The pool is ranked `in_progress` before `not_started`, each group in
/// insertion order; no other ranking applies.
pub fn select_candidates(pool: &[Task], low_energy: bool) -> CandidatePair {
    let ranked: Vec<&Task> = pool
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .chain(pool.iter().filter(|t| t.status == TaskStatus::NotStarted))
        .collect();

    let Some(primary) = ranked.first().copied() else {
        return bootstrap_pair(low_energy);
    };
    let secondary = ranked
        .iter()
        .copied()
        .find(|t| t.task_id != primary.task_id);

    let a = Candidate {
        title: format!("推进「{}」", primary.title),
        reason: if primary.status == TaskStatus::InProgress {
            "继续进行中".to_owned()
        } else {
            "优先启动".to_owned()
        },
        task_id: Some(primary.task_id),
        task_title: Some(primary.title.clone()),
    };

    let b = match secondary {
        Some(task) => Candidate {
            title: format!("轻量推进「{}」— 阅读/整理/预习", task.title),
            reason: "低能量也能推进".to_owned(),
            task_id: Some(task.task_id),
            task_title: Some(task.title.clone()),
        },
        None => Candidate {
            title: format!("「{}」— 只做最小起步动作", primary.title),
            reason: "低能量也能推进".to_owned(),
            task_id: Some(primary.task_id),
            task_title: Some(primary.title.clone()),
        },
    };

    CandidatePair { a, b, low_energy }
}

fn bootstrap_pair(low_energy: bool) -> CandidatePair {
    CandidatePair {
        a: Candidate {
            title: "建立任务池 — 写出5个待办任务标题".to_owned(),
            reason: "还没有任务，先列出来".to_owned(),
            task_id: None,
            task_title: None,
        },
        b: Candidate {
            title: "建立任务池 — 写出3个关键任务标题".to_owned(),
            reason: "轻量版，只写3个最重要的".to_owned(),
            task_id: None,
            task_title: None,
        },
        low_energy,
    }
}
