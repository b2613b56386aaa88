//! Property-based tests over the pure reconciliation rules.
//!
//! These drive the status lattice, the window arithmetic and the unit
//! conservation rule across a wide range of inputs, catching edge cases
//! the scenario tests do not reach.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use medcab_api::entities::dispense_unit::{self, ItemStatus};
use medcab_api::entities::ComparisonStatus;
use medcab_api::services::ledger::DeltaSign;
use medcab_api::services::reconciliation::{derive_comparison_status, window_bounds};
use proptest::prelude::*;
use uuid::Uuid;

fn tally_strategy() -> impl Strategy<Value = i64> {
    0i64..10_000
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2020i32..2030, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).expect("valid date"))
}

/// A unit whose claims never exceeded what was dispensed.
fn balanced_unit_strategy() -> impl Strategy<Value = dispense_unit::Model> {
    (1i32..500, 0i32..500, 0i32..500)
        .prop_filter("claims must fit the dispense", |(d, u, r)| u + r <= *d)
        .prop_map(|(dispensed, used, returned)| {
            let now = Utc::now();
            dispense_unit::Model {
                id: Uuid::new_v4(),
                unit_id: "RFID-PROP".to_string(),
                item_code: "KIT-SUTURE".to_string(),
                cabinet_id: "CAB-01".to_string(),
                slot_no: 1,
                actor_id: "nurse-17".to_string(),
                qty_dispensed: dispensed,
                qty_used: used,
                qty_returned: returned,
                qty_pending: dispensed - used - returned,
                status: ItemStatus::Pending,
                reported_status: None,
                dispensed_at: now,
                version: 1,
                created_at: now,
                updated_at: now,
            }
        })
}

proptest! {
    #[test]
    fn matched_means_fully_accounted(
        dispensed in tally_strategy(),
        used in tally_strategy(),
        returned in tally_strategy(),
        pending in tally_strategy(),
    ) {
        let status = derive_comparison_status(dispensed, used, returned, pending);
        if status == ComparisonStatus::Matched {
            prop_assert_eq!(pending, 0);
            prop_assert_eq!(used + returned, dispensed);
        }
    }

    #[test]
    fn usage_without_dispense_always_flags(
        used in 1i64..10_000,
        returned in tally_strategy(),
        pending in tally_strategy(),
    ) {
        let status = derive_comparison_status(0, used, returned, pending);
        prop_assert_eq!(status, ComparisonStatus::UsedWithoutDispense);
    }

    #[test]
    fn dispensed_not_used_never_has_usage(
        dispensed in tally_strategy(),
        used in tally_strategy(),
        returned in tally_strategy(),
        pending in tally_strategy(),
    ) {
        let status = derive_comparison_status(dispensed, used, returned, pending);
        if status == ComparisonStatus::DispensedNotUsed {
            prop_assert_eq!(used, 0);
            prop_assert!(dispensed > 0);
        }
    }

    #[test]
    fn over_usage_is_always_visible(
        dispensed in tally_strategy(),
        excess in 1i64..10_000,
        returned in tally_strategy(),
        pending in tally_strategy(),
    ) {
        let used = dispensed + excess;
        let status = derive_comparison_status(dispensed, used, returned, pending);
        prop_assert!(
            status == ComparisonStatus::UsedWithoutDispense
                || status == ComparisonStatus::UsageExceedsDispense,
            "used {} > dispensed {} must surface, got {:?}",
            used,
            dispensed,
            status
        );
    }

    #[test]
    fn window_bounds_cover_exactly_one_day(window in date_strategy()) {
        let (start, end) = window_bounds(window);
        prop_assert_eq!(end - start, Duration::hours(24));
        prop_assert_eq!(start.date_naive(), window);
    }

    #[test]
    fn every_minute_of_the_day_is_inside_its_window(
        window in date_strategy(),
        minute in 0i64..1440,
    ) {
        let (start, end) = window_bounds(window);
        let ts = start + Duration::minutes(minute);
        prop_assert!(ts >= start && ts < end);
        prop_assert_eq!(ts.date_naive(), window);
    }

    #[test]
    fn balanced_units_conserve_quantity(unit in balanced_unit_strategy()) {
        prop_assert!(unit.conserves_quantity());

        let derived = unit.derived_status();
        if unit.qty_pending == 0 {
            prop_assert_eq!(derived, ItemStatus::Completed);
        } else if unit.qty_used > 0 || unit.qty_returned > 0 {
            prop_assert_eq!(derived, ItemStatus::Partial);
        } else {
            prop_assert_eq!(derived, ItemStatus::Pending);
        }
        prop_assert_eq!(unit.is_open(), unit.qty_pending > 0);
    }

    #[test]
    fn consuming_pending_quantity_never_regresses_status(unit in balanced_unit_strategy()) {
        prop_assume!(unit.qty_pending > 0);
        let before = unit.derived_status();

        let mut after = unit.clone();
        after.qty_used += 1;
        after.qty_pending -= 1;

        prop_assert!(after.derived_status().rank() >= before.rank());
    }

    #[test]
    fn sign_parsing_ignores_case_and_padding(
        word in prop_oneof![Just("take"), Just("refill")],
        upper in any::<bool>(),
        pad in " {0,3}",
    ) {
        let raw = if upper { word.to_uppercase() } else { word.to_string() };
        let padded = format!("{}{}{}", pad, raw, pad);
        let expected = if word == "take" {
            DeltaSign::Take
        } else {
            DeltaSign::Refill
        };
        prop_assert_eq!(DeltaSign::parse(&padded), Some(expected));
    }

    #[test]
    fn garbage_signs_never_parse(raw in "[a-z0-9]{3,12}") {
        prop_assume!(raw != "take" && raw != "refill");
        prop_assert_eq!(DeltaSign::parse(&raw), None);
    }

    #[test]
    fn reported_status_parsing_is_case_insensitive(
        word in prop_oneof![Just("pending"), Just("partial"), Just("completed")],
        upper in any::<bool>(),
    ) {
        let raw = if upper { word.to_uppercase() } else { word.to_string() };
        let parsed = medcab_api::entities::ItemStatus::parse_reported(&raw);
        prop_assert!(parsed.is_some());
    }

    #[test]
    fn timestamps_on_either_side_of_midnight_get_different_windows(
        window in date_strategy(),
        minute in 1i64..1440,
    ) {
        let (start, _) = window_bounds(window);
        let before = start - Duration::minutes(minute);
        let after = start + Duration::minutes(minute - 1);
        prop_assert_ne!(before.date_naive(), window);
        prop_assert_eq!(after.date_naive(), window);
    }
}

#[test]
fn utc_conversion_pins_the_window() {
    // 23:30 UTC on the ninth stays in the ninth even though local clocks
    // further east already show the tenth.
    let ts = Utc.with_ymd_and_hms(2026, 3, 9, 23, 30, 0).single().unwrap();
    assert_eq!(ts.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());

    let (start, end) = window_bounds(ts.date_naive());
    assert!(ts >= start && ts < end);
}
