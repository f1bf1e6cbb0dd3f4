//! Property tests for step alignment and interval generation.

use proptest::prelude::*;
use tsrollup::{Duration, IntervalGenerator, Timestamp};

proptest! {
    #[test]
    fn stamps_are_aligned_and_inside_the_closed_range(
        start in 0i64..10_000_000,
        len in 0i64..200_000,
        step in 1u64..7_200,
    ) {
        let (start, end) = (Timestamp::from_epoch_seconds(start), Timestamp::from_epoch_seconds(start + len));
        let step = Duration::seconds(step);
        let stamps: Vec<_> = IntervalGenerator::forward(start, end, step).unwrap().collect();

        prop_assert!(!stamps.is_empty());
        prop_assert_eq!(stamps[0], start.step_floor(step));
        prop_assert_eq!(*stamps.last().unwrap(), end.step_ceiling(step));
        for pair in stamps.windows(2) {
            prop_assert_eq!(pair[1].duration_since(&pair[0]).unwrap(), step);
        }
        for ts in &stamps {
            prop_assert_eq!(ts.step_floor(step), *ts);
        }
    }

    #[test]
    fn reversed_generator_mirrors_forward(
        start in 0i64..1_000_000,
        len in 0i64..50_000,
        step in 1u64..3_600,
    ) {
        let (start, end) = (Timestamp::from_epoch_seconds(start), Timestamp::from_epoch_seconds(start + len));
        let step = Duration::seconds(step);
        let mut forward: Vec<_> = IntervalGenerator::new(start, end, step, false).unwrap().collect();
        let reversed: Vec<_> = IntervalGenerator::new(start, end, step, true).unwrap().collect();
        forward.reverse();
        prop_assert_eq!(forward, reversed);
    }

    #[test]
    fn floor_and_ceiling_bracket_the_timestamp(secs in -1_000_000i64..1_000_000, step in 1u64..86_400) {
        let ts = Timestamp::from_epoch_seconds(secs);
        let step = Duration::seconds(step);
        let (floor, ceiling) = (ts.step_floor(step), ts.step_ceiling(step));
        prop_assert!(floor <= ts && ts <= ceiling);
        prop_assert!(ceiling.duration_since(&floor).unwrap() <= step);
        prop_assert_eq!(floor == ceiling, floor == ts);
    }
}
