// Property-based coverage of the numeric normalization every integer/number
// property funnels through before a validator ever sees it (§4.1).
use fulcrum_core::schema::validators::{parse_integer, parse_number};
use proptest::prelude::*;

proptest! {
    #[test]
    fn parse_integer_round_trips_any_i64(n in any::<i64>()) {
        let value = serde_json::json!(n);
        prop_assert_eq!(parse_integer(&value), Some(n));
    }

    #[test]
    fn parse_integer_round_trips_through_a_decimal_string(n in any::<i64>()) {
        let value = serde_json::Value::String(format!("{n}.0"));
        prop_assert_eq!(parse_integer(&value), Some(n));
    }

    #[test]
    fn parse_integer_rejects_a_nonzero_fraction(n in any::<i32>(), frac in 1u32..999) {
        let value = serde_json::Value::String(format!("{n}.{frac}"));
        prop_assert_eq!(parse_integer(&value), None);
    }

    #[test]
    fn parse_number_round_trips_any_finite_f64(n in -1.0e9f64..1.0e9f64) {
        let value = serde_json::json!(n);
        let parsed = parse_number(&value).unwrap();
        prop_assert!((parsed - n).abs() < 1e-6);
    }

    #[test]
    fn parse_number_rejects_non_numeric_strings(s in "[a-zA-Z]{1,16}") {
        let value = serde_json::Value::String(s);
        prop_assert_eq!(parse_number(&value), None);
    }
}
