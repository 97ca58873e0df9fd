use clinic_import::birthdate::derive_birthdate;
use clinic_import::data::{FieldValue, coerce_float, coerce_integer, round_float};
use clinic_import::normalize::{canonical_headers, collapse_header, normalize_field};
use clinic_import::schema::FieldKind;
use proptest::prelude::*;

fn key_prefix_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(prop_oneof![Just('A'), Just('J'), Just('Z'), Just('0')], 2..6)
        .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #[test]
    fn one_decimal_rounding_is_stable(value in -10_000.0f64..10_000.0) {
        let rounded = round_float(value, 1);
        prop_assert!((rounded - value).abs() <= 0.05 + 1e-9);
        prop_assert_eq!(round_float(rounded, 1), rounded);
        let cell = format!("{value}");
        prop_assert_eq!(coerce_float(&cell, 1), Some(rounded));
    }

    #[test]
    fn integer_cells_truncate_float_exports(whole in -5_000i64..5_000, tenths in 0u8..10) {
        let cell = format!("{whole}.{tenths}");
        prop_assert_eq!(coerce_integer(&cell), Some(whole));
        prop_assert_eq!(
            normalize_field(FieldKind::Integer, &format!(" {whole}.0 ")),
            Some(FieldValue::Integer(whole))
        );
    }

    #[test]
    fn birthdate_reads_the_numeric_suffix(
        prefix in key_prefix_strategy(),
        month in 1u8..=12,
        day in 1u8..=31,
        year in 0u8..=99,
    ) {
        let key = format!("{prefix}{month:02}{day:02}{year:02}");
        prop_assert_eq!(
            derive_birthdate(&key),
            Some(format!("{month:02}/{day:02}/{year:02}"))
        );
    }

    #[test]
    fn birthdate_is_unknown_for_non_numeric_suffix(
        prefix in key_prefix_strategy(),
        digits in "[0-9]{5}",
        letter in "[A-Z]",
    ) {
        let key = format!("{prefix}{digits}{letter}");
        prop_assert_eq!(derive_birthdate(&key), None);
    }

    #[test]
    fn short_keys_have_no_birthdate(key in "[A-Z0-9]{0,7}") {
        prop_assert_eq!(derive_birthdate(&key), None);
    }

    #[test]
    fn header_collapsing_is_idempotent(raw in "[ A-Z\t\n/]{0,24}") {
        let once = collapse_header(&raw);
        prop_assert_eq!(collapse_header(&once), once.clone());
        prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
    }
}

#[test]
fn repeated_headers_are_suffixed_in_order() {
    let raw = ["A1C", "A1C", "A1C"].map(str::to_string);
    assert_eq!(canonical_headers(&raw), vec!["A1C", "A1C.1", "A1C.2"]);
}
