// crates/tally-policy/tests/rule_validation.rs
// ============================================================================
// Module: Rule Validation Tests
// Description: Type, bound, and default behavior of individual rules.
// Purpose: Ensure rules reject mismatched types before checking ranges.
// ============================================================================

//! ## Overview
//! Exercises construction, type checks, bounds, and defaults for every rule
//! variant.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use proptest::prelude::*;
use tally_policy::ConfigValue;
use tally_policy::ConfigValueType;
use tally_policy::FloatRule;
use tally_policy::IntegerRule;
use tally_policy::NumericValue;
use tally_policy::Rule;
use tally_policy::RuleError;
use tally_policy::StringRule;
use tally_policy::ValidationError;

/// One bounded rule per variant.
fn bounded_rules() -> Vec<Rule> {
    let mut integer = IntegerRule::new("int", false, Some(1)).unwrap();
    integer.set_minimum(-10);
    integer.set_maximum(10);
    let mut float = FloatRule::new("float", false, Some(1.0)).unwrap();
    float.set_minimum(-10.0);
    float.set_maximum(10.0);
    let string = StringRule::new("string", false, Some("x".to_string())).unwrap();
    vec![integer.into(), float.into(), string.into()]
}

/// Values of every type, inside and outside the bounds.
fn probe_values() -> Vec<ConfigValue> {
    vec![
        ConfigValue::Int(0),
        ConfigValue::Int(1_000),
        ConfigValue::Float(0.0),
        ConfigValue::Float(1_000.0),
        ConfigValue::Str("0".to_string()),
    ]
}

#[test]
fn empty_key_is_rejected_for_every_variant() {
    assert_eq!(IntegerRule::new("", true, None), Err(RuleError::EmptyKey));
    assert_eq!(StringRule::new("", true, None), Err(RuleError::EmptyKey));
    assert_eq!(FloatRule::new("", true, None), Err(RuleError::EmptyKey));
}

#[test]
fn mismatched_types_fail_as_type_errors_regardless_of_bounds() {
    for rule in bounded_rules() {
        for value in probe_values() {
            let result = rule.validate(&value);
            if value.value_type() == rule.kind().value_type() {
                assert!(
                    !matches!(result, Err(ValidationError::WrongType { .. })),
                    "{value:?} should type-check against {}",
                    rule.key()
                );
            } else {
                assert_eq!(
                    result,
                    Err(ValidationError::WrongType {
                        key: rule.key().to_string(),
                        expected: rule.kind().value_type(),
                        actual: value.value_type(),
                    })
                );
            }
        }
    }
}

#[test]
fn float_rule_reports_string_type_mismatch() {
    let rule = FloatRule::new("ratio", true, None).unwrap();
    let err = rule.validate(&ConfigValue::from("high")).unwrap_err();
    assert_eq!(
        err.to_string(),
        "type mismatch (ratio wanted type 'float' but provided type 'string')"
    );
    assert_eq!(err.key(), "ratio");
    assert!(matches!(
        err,
        ValidationError::WrongType {
            expected: ConfigValueType::Float,
            actual: ConfigValueType::String,
            ..
        }
    ));
}

#[test]
fn integer_bounds_carry_value_and_violated_bound() {
    let mut rule = IntegerRule::new("interval", true, None).unwrap();
    rule.set_minimum(1);
    rule.set_maximum(60);
    assert_eq!(rule.validate(&ConfigValue::Int(1)), Ok(()));
    assert_eq!(rule.validate(&ConfigValue::Int(60)), Ok(()));
    let low = rule.validate(&ConfigValue::Int(0)).unwrap_err();
    assert_eq!(
        low,
        ValidationError::BelowMinimum {
            key: "interval".to_string(),
            value: NumericValue::Int(0),
            minimum: NumericValue::Int(1),
        }
    );
    assert_eq!(low.to_string(), "value is under minimum (interval value 0 < 1)");
    let high = rule.validate(&ConfigValue::Int(61)).unwrap_err();
    assert_eq!(high.to_string(), "value is over maximum (interval value 61 > 60)");
}

#[test]
fn bounds_are_independent_and_order_free() {
    let mut only_max = IntegerRule::new("a", false, None).unwrap();
    only_max.set_maximum(5);
    assert_eq!(only_max.minimum(), None);
    assert_eq!(only_max.validate(&ConfigValue::Int(i64::MIN)), Ok(()));

    let mut first = FloatRule::new("b", false, None).unwrap();
    first.set_minimum(1.0);
    first.set_maximum(2.0);
    let mut second = FloatRule::new("b", false, None).unwrap();
    second.set_maximum(2.0);
    second.set_minimum(1.0);
    second.set_minimum(1.0);
    assert_eq!(first, second);
}

#[test]
fn inverted_bounds_reject_every_value() {
    let mut rule = IntegerRule::new("inverted", false, None).unwrap();
    rule.set_minimum(10);
    rule.set_maximum(1);
    for value in [0, 5, 11] {
        assert!(rule.validate(&ConfigValue::Int(value)).is_err());
    }
}

#[test]
fn unset_default_is_absent_not_zero() {
    let integer: Rule = IntegerRule::new("i", false, None).unwrap().into();
    let string: Rule = StringRule::new("s", false, None).unwrap().into();
    let float: Rule = FloatRule::new("f", true, Some(0.5)).unwrap().into();
    assert_eq!(integer.default_value(), None);
    assert_eq!(string.default_value(), None);
    assert_eq!(float.default_value(), Some(ConfigValue::Float(0.5)));
    assert!(float.required());
    assert!(!integer.required());
}

proptest! {
    #[test]
    fn float_bounds_accept_exactly_the_closed_interval(
        minimum in -1.0e6_f64..1.0e6,
        span in 0.0_f64..1.0e6,
        value in -3.0e6_f64..3.0e6,
    ) {
        let maximum = minimum + span;
        let mut rule = FloatRule::new("load", false, None).unwrap();
        rule.set_minimum(minimum);
        rule.set_maximum(maximum);
        let result = rule.validate(&ConfigValue::Float(value));
        if value < minimum {
            let is_below = matches!(result, Err(ValidationError::BelowMinimum { .. }));
            prop_assert!(is_below);
        } else if value > maximum {
            let is_above = matches!(result, Err(ValidationError::AboveMaximum { .. }));
            prop_assert!(is_above);
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn integer_rule_never_range_checks_foreign_types(text in ".*", number in any::<f64>()) {
        let mut rule = IntegerRule::new("count", false, None).unwrap();
        rule.set_minimum(0);
        rule.set_maximum(0);
        let is_wrong_type =
            matches!(rule.validate(&ConfigValue::Str(text)), Err(ValidationError::WrongType { .. }));
        prop_assert!(is_wrong_type);
        let is_wrong_type = matches!(
            rule.validate(&ConfigValue::Float(number)),
            Err(ValidationError::WrongType { .. })
        );
        prop_assert!(is_wrong_type);
    }
}
