//! Property tests for TimeGrid generation.

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use series_common::{Cadence, TimeGrid, TimeStep};

fn any_cadence() -> impl Strategy<Value = Cadence> {
    prop_oneof![Just(Cadence::Daily), Just(Cadence::Dekad), Just(Cadence::Monthly)]
}

fn any_date() -> impl Strategy<Value = NaiveDate> {
    // 1990-01-01 plus up to ~60 years
    (0u64..22_000).prop_map(|offset| NaiveDate::from_ymd_opt(1990, 1, 1).unwrap() + Days::new(offset))
}

proptest! {
    #[test]
    fn steps_are_strictly_increasing_and_contiguous(
        start in any_date(),
        span in 0u64..800,
        cadence in any_cadence(),
    ) {
        let end = start + Days::new(span);
        let steps = TimeGrid::generate(start, end, cadence).unwrap();

        prop_assert!(!steps.is_empty());
        for pair in steps.windows(2) {
            prop_assert!(pair[0] < pair[1]);
            prop_assert_eq!(pair[0].next(), pair[1]);
            prop_assert_eq!(pair[0].end() + Days::new(1), pair[1].start());
        }
    }

    #[test]
    fn steps_cover_exactly_the_range(
        start in any_date(),
        span in 0u64..800,
        cadence in any_cadence(),
    ) {
        let end = start + Days::new(span);
        let steps = TimeGrid::generate(start, end, cadence).unwrap();

        prop_assert_eq!(steps[0], TimeStep::containing(start, cadence));
        prop_assert_eq!(*steps.last().unwrap(), TimeStep::containing(end, cadence));
        prop_assert!(steps[0].contains(start));
        prop_assert!(steps.last().unwrap().contains(end));
    }

    #[test]
    fn checked_add_matches_repeated_next(
        start in any_date(),
        n in 0i64..120,
        cadence in any_cadence(),
    ) {
        let step = TimeStep::containing(start, cadence);
        let mut walked = step;
        for _ in 0..n {
            walked = walked.next();
        }
        prop_assert_eq!(step.checked_add(n), Some(walked));
        prop_assert_eq!(walked.diff(&step), n);
    }

    #[test]
    fn generation_is_idempotent(start in any_date(), span in 0u64..400, cadence in any_cadence()) {
        let end = start + Days::new(span);
        prop_assert_eq!(
            TimeGrid::generate(start, end, cadence).unwrap(),
            TimeGrid::generate(start, end, cadence).unwrap()
        );
    }
}

#[test]
fn test_dekad_scenario_two_steps() {
    let start = NaiveDate::from_ymd_opt(2020, 6, 21).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 7, 1).unwrap();
    let steps = TimeGrid::generate(start, end, Cadence::Dekad).unwrap();
    let labels: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
    assert_eq!(labels, vec!["2020-06-d3", "2020-07-d1"]);
}
