//! Band + sub-level labels ("B1.2") and their ordered numeric mirror
//! (`band + sub/10`, A1 = 1 through C1 = 5).

const BANDS: [&str; 5] = ["A1", "A2", "B1", "B2", "C1"];
const MIN_SUB: u32 = 1;
const MAX_SUB: u32 = 3;

pub const MIN_LEVEL: f64 = 1.1;
pub const MAX_LEVEL: f64 = 5.3;
/// One advancement increment.
pub const STEP: f64 = 0.1;

/// Value in whole tenths, the unit every level comparison is made in.
pub fn to_tenths(value: f64) -> i64 {
    (value * 10.0).round() as i64
}

fn from_tenths(tenths: i64) -> f64 {
    tenths as f64 / 10.0
}

/// Clamps to the valid range and rounds to one decimal.
pub fn normalize(value: f64) -> f64 {
    if !value.is_finite() {
        return MIN_LEVEL;
    }
    from_tenths(to_tenths(value.clamp(MIN_LEVEL, MAX_LEVEL)))
}

pub fn encode(value: f64) -> String {
    let tenths = to_tenths(normalize(value));
    let band = (tenths / 10).clamp(1, BANDS.len() as i64) as usize;
    let sub = ((tenths % 10) as u32).clamp(MIN_SUB, MAX_SUB);
    format!("{}.{}", BANDS[band - 1], sub)
}

/// Unknown bands decode to [`MIN_LEVEL`]; a missing or unreadable sub-level
/// reads as 1 and an out-of-range one is clamped to 1..=3.
pub fn decode(label: &str) -> f64 {
    let label = label.trim();
    let (band, sub) = match label.split_once('.') {
        Some((band, sub)) => (band, Some(sub)),
        None => (label, None),
    };

    let Some(index) = BANDS.iter().position(|b| b.eq_ignore_ascii_case(band)) else {
        return MIN_LEVEL;
    };
    let sub = sub
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(MIN_SUB)
        .clamp(MIN_SUB, MAX_SUB);

    from_tenths((index as i64 + 1) * 10 + sub as i64)
}

/// Canonical form of a possibly sloppy label ("b1" -> "B1.1").
pub fn canonical(label: &str) -> String {
    encode(decode(label))
}

/// Band part of a label, used for unit titles ("B1.2" -> "B1").
pub fn band_of(label: &str) -> &'static str {
    let index = (to_tenths(decode(label)) / 10).clamp(1, BANDS.len() as i64) as usize;
    BANDS[index - 1]
}

/// One rung up the ladder from `label`, saturating at [`MAX_LEVEL`].
/// Within a band this is `+STEP`; from sub-level 3 it moves to the next band's 1.
pub fn next_level(label: &str) -> String {
    let current = decode(label);
    let tenths = to_tenths(current);
    if tenths % 10 >= MAX_SUB as i64 {
        encode(from_tenths((tenths / 10 + 1) * 10 + MIN_SUB as i64))
    } else {
        encode(current + STEP)
    }
}

pub fn same_level(a: &str, b: &str) -> bool {
    to_tenths(decode(a)) == to_tenths(decode(b))
}
