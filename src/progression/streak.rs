use chrono::NaiveDate;
use serde::Serialize;

/// Decay as a share of the current streak in basis points, by missed days.
fn decay_basis_points(missed_days: i64) -> u64 {
    match missed_days {
        i64::MIN..=0 => 0,
        1 => 200,
        2 => 400,
        3 => 800,
        4 => 2_000,
        5..=9 => 5_000,
        _ => 10_000,
    }
}

/// Points lost after `missed_days` of inactivity: `max(1, round(streak * pct))`,
/// rounding half up.
pub fn decay(current_streak: u32, missed_days: i64) -> u32 {
    let bp = decay_basis_points(missed_days);
    if bp == 0 {
        return 0;
    }
    let scaled = (current_streak as u64 * bp + 5_000) / 10_000;
    scaled.max(1).min(u32::MAX as u64) as u32
}

/// Streak after activity on `today`.
///
/// First activity starts at 1; a repeat on the same day (or a last activity
/// dated after `today`) leaves it unchanged; the next day grows it by one; a
/// longer gap decays it by the missed days and then counts today.
pub fn next_streak(current_streak: u32, last_activity: Option<NaiveDate>, today: NaiveDate) -> u32 {
    let Some(last) = last_activity else {
        return 1;
    };
    let gap = (today - last).num_days();
    match gap {
        i64::MIN..=0 => current_streak,
        1 => current_streak.saturating_add(1),
        _ => {
            let lost = decay(current_streak, gap - 1);
            current_streak.saturating_sub(lost).saturating_add(1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreakHealth {
    Healthy,
    Warning,
    Danger,
    Critical,
    Dead,
}

/// Display-only view of a streak; plays no part in the decay math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub health: StreakHealth,
    pub days_inactive: u32,
    pub health_pct: u32,
}

pub fn streak_state(
    current_streak: u32,
    last_activity: Option<NaiveDate>,
    today: NaiveDate,
) -> StreakState {
    let days_inactive = last_activity
        .map(|last| (today - last).num_days().max(0))
        .unwrap_or(0)
        .min(u32::MAX as i64) as u32;

    let (health, health_pct) = if current_streak == 0 {
        (StreakHealth::Dead, 0)
    } else {
        let d = days_inactive as i64;
        match days_inactive {
            0 => (StreakHealth::Healthy, 100),
            1 => (StreakHealth::Warning, 85),
            2..=3 => (StreakHealth::Danger, (70 - 20 * d).max(10) as u32),
            4..=5 => (StreakHealth::Critical, (30 - 5 * d).max(5) as u32),
            _ => (StreakHealth::Dead, 0),
        }
    };

    StreakState {
        health,
        days_inactive,
        health_pct,
    }
}
