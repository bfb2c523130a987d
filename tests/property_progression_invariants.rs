use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use progression_backend::progression::advancement::{self, AdvancementRules, Assessment};
use progression_backend::progression::level;
use progression_backend::progression::streak;
use progression_backend::progression::weak_topics;
use progression_backend::store::operations::performance::PerformanceRecord;

const BANDS: [&str; 5] = ["A1", "A2", "B1", "B2", "C1"];

fn label(band: usize, sub: u32) -> String {
    format!("{}.{}", BANDS[band], sub)
}

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(offset)
}

fn record(tag: &str, correct: bool) -> PerformanceRecord {
    PerformanceRecord::new(
        "u1",
        1,
        correct,
        Some(3),
        vec![tag.to_string()],
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn pt_level_labels_round_trip(band in 0_usize..5, sub in 1_u32..=3) {
        let l = label(band, sub);
        prop_assert_eq!(level::encode(level::decode(&l)), l.clone());
        let value = level::decode(&l);
        prop_assert!(value >= level::MIN_LEVEL && value <= level::MAX_LEVEL);
    }

    #[test]
    fn pt_numeric_values_round_to_their_rung(
        band in 1_i64..=5,
        sub in 1_i64..=3,
        noise in -0.049_f64..0.049,
    ) {
        let rung = (band * 10 + sub) as f64 / 10.0;
        let x = rung + noise;
        let back = level::decode(&level::encode(x));
        prop_assert!((back - rung).abs() < 1e-9, "x={} decoded to {}", x, back);
    }

    #[test]
    fn pt_out_of_range_values_clamp_to_the_ends(
        low in -10.0_f64..1.05,
        high in 5.35_f64..50.0,
    ) {
        prop_assert_eq!(level::encode(low), "A1.1");
        prop_assert_eq!(level::to_tenths(level::decode(&level::encode(low))), 11);
        prop_assert_eq!(level::encode(high), "C1.3");
        prop_assert_eq!(level::to_tenths(level::decode(&level::encode(high))), 53);
    }

    #[test]
    fn pt_level_order_matches_ladder(
        a in (0_usize..5, 1_u32..=3),
        b in (0_usize..5, 1_u32..=3),
    ) {
        let (la, lb) = (label(a.0, a.1), label(b.0, b.1));
        let ta = level::to_tenths(level::decode(&la));
        let tb = level::to_tenths(level::decode(&lb));
        prop_assert_eq!(a.cmp(&b), ta.cmp(&tb));
    }

    #[test]
    fn pt_any_label_decodes_in_range(raw in ".{0,8}") {
        let value = level::decode(&raw);
        prop_assert!(value >= level::MIN_LEVEL && value <= level::MAX_LEVEL);
        let canonical = level::canonical(&raw);
        prop_assert_eq!(level::canonical(&canonical), canonical);
    }
}

proptest! {
    #[test]
    fn pt_next_day_grows_by_one(current in 0_u32..10_000) {
        prop_assert_eq!(streak::next_streak(current, Some(day(0)), day(1)), current + 1);
    }

    #[test]
    fn pt_same_or_earlier_day_is_unchanged(current in 0_u32..10_000, back in 0_i64..30) {
        prop_assert_eq!(streak::next_streak(current, Some(day(back)), day(0)), current);
    }

    #[test]
    fn pt_gap_never_grows_streak(current in 0_u32..10_000, gap in 2_i64..400) {
        let next = streak::next_streak(current, Some(day(0)), day(gap));
        prop_assert!(next >= 1);
        prop_assert!(next <= current.max(1));
    }

    #[test]
    fn pt_longer_gap_never_helps(current in 0_u32..10_000, gap in 2_i64..400, extra in 0_i64..30) {
        let shorter = streak::next_streak(current, Some(day(0)), day(gap));
        let longer = streak::next_streak(current, Some(day(0)), day(gap + extra));
        prop_assert!(longer <= shorter);
    }

    #[test]
    fn pt_decay_is_at_least_one(current in 1_u32..10_000, missed in 1_i64..400) {
        let lost = streak::decay(current, missed);
        prop_assert!(lost >= 1);
        prop_assert!(lost <= current.max(1));
    }

    #[test]
    fn pt_longest_never_below_current(gaps in proptest::collection::vec(0_i64..15, 1..40)) {
        let mut current = 0_u32;
        let mut longest = 0_u32;
        let mut last: Option<NaiveDate> = None;
        let mut today = day(0);
        for gap in gaps {
            today += Duration::days(gap);
            current = streak::next_streak(current, last, today);
            longest = longest.max(current);
            last = Some(last.map_or(today, |l| l.max(today)));
            prop_assert!(longest >= current);
            prop_assert!(current >= 1);
        }
    }

    #[test]
    fn pt_health_pct_in_bounds(current in 0_u32..100, inactive in 0_i64..30) {
        let state = streak::streak_state(current, Some(day(0)), day(inactive));
        prop_assert!(state.health_pct <= 100);
        if current == 0 {
            prop_assert_eq!(state.health_pct, 0);
        }
    }

    #[test]
    fn pt_all_correct_history_has_no_weak_tags(tags in proptest::collection::vec("[a-e]", 0..50)) {
        let records: Vec<_> = tags.iter().map(|t| record(t, true)).collect();
        prop_assert!(weak_topics::detect_weak_tags(&records).is_empty());
    }

    #[test]
    fn pt_weak_tags_are_sparse_and_sorted(
        answers in proptest::collection::vec(("[a-e]", any::<bool>()), 0..60),
    ) {
        let records: Vec<_> = answers.iter().map(|(t, c)| record(t, *c)).collect();
        let weak = weak_topics::detect_weak_tags(&records);
        let mut sorted = weak.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(&weak, &sorted);
        for tag in &weak {
            let seen = answers.iter().filter(|(t, _)| t == tag).count();
            let wrong = answers.iter().filter(|(t, c)| t == tag && !c).count();
            prop_assert!(seen >= 2);
            prop_assert!(wrong * 10 > seen * 4);
        }
    }

    #[test]
    fn pt_advancement_never_decreases(
        band in 0_usize..5,
        sub in 1_u32..=3,
        perfect in 0_usize..100,
        fast in 0_usize..100,
    ) {
        let rules = AdvancementRules {
            perfect_lessons: 60,
            fast_lessons: 20,
            fast_seconds_per_challenge: 5.0,
        };
        let current = label(band, sub);
        let assessment = Assessment { perfect, fast };
        match advancement::advance(&current, &assessment, &rules) {
            Some(next) => {
                prop_assert!(assessment.qualifies(&rules));
                prop_assert!(
                    level::to_tenths(level::decode(&next)) > level::to_tenths(level::decode(&current))
                );
                prop_assert_eq!(level::next_level(&current), next);
            }
            None => prop_assert!(!assessment.qualifies(&rules) || current == "C1.3"),
        }
    }
}
