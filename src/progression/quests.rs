//! Points milestones. Progress is derived from the learner's total points on
//! every read; nothing about quests is stored.

use serde::Serialize;

pub const QUEST_MILESTONES: [u64; 6] = [20, 50, 100, 250, 500, 1000];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestProgress {
    pub title: String,
    pub target: u64,
    /// Points counted towards the target, capped at it.
    pub earned: u64,
    /// Whole percent, 0..=100.
    pub percent: u8,
    pub completed: bool,
}

pub fn quest_progress(points: u64) -> Vec<QuestProgress> {
    QUEST_MILESTONES
        .iter()
        .map(|&target| {
            let earned = points.min(target);
            QuestProgress {
                title: format!("Earn {target} XP"),
                target,
                earned,
                percent: (earned * 100 / target) as u8,
                completed: points >= target,
            }
        })
        .collect()
}
