// crates/tally-policy/src/rule.rs
// ============================================================================
// Module: Policy Rules
// Description: Per-key validation contracts for integer, string, and float config.
// Purpose: Validate and default individual config values.
// Dependencies: crate::{error, value}
// ============================================================================

//! ## Overview
//! A [`Rule`] is a closed sum over the three rule variants. Each variant
//! carries a non-empty key, a required flag, an optional default and, for the
//! numeric variants, optional bounds. The [`RuleKind`] table is the single
//! place that maps variants to their JSON discriminator and binary tag.
//!
//! Bounds are not cross-checked when set: a rule whose minimum exceeds its
//! maximum rejects every value at validation time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::error::NumericValue;
use crate::error::RuleError;
use crate::error::ValidationError;
use crate::value::ConfigValue;
use crate::value::ConfigValueType;

// ============================================================================
// SECTION: Variant Table
// ============================================================================

/// Rule variant discriminator.
///
/// # Invariants
/// - Discriminator strings and wire tags are stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// [`IntegerRule`].
    Integer,
    /// [`StringRule`].
    String,
    /// [`FloatRule`].
    Float,
}

impl RuleKind {
    /// Every rule variant, in wire-tag order.
    pub const ALL: [Self; 3] = [Self::Integer, Self::String, Self::Float];

    /// Returns the JSON `type` discriminator.
    #[must_use]
    pub const fn discriminator(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::Float => "float",
        }
    }

    /// Returns the binary tag byte.
    #[must_use]
    pub const fn wire_tag(self) -> u8 {
        match self {
            Self::Integer => 1,
            Self::String => 2,
            Self::Float => 3,
        }
    }

    /// Returns the config value type validated by this variant.
    #[must_use]
    pub const fn value_type(self) -> ConfigValueType {
        match self {
            Self::Integer => ConfigValueType::Integer,
            Self::String => ConfigValueType::String,
            Self::Float => ConfigValueType::Float,
        }
    }

    /// Looks up a variant by JSON discriminator.
    #[must_use]
    pub fn from_discriminator(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.discriminator() == value)
    }

    /// Looks up a variant by binary tag.
    #[must_use]
    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_tag() == tag)
    }
}

// ============================================================================
// SECTION: Rule
// ============================================================================

/// Validation rule for a single config key.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Integer-typed rule.
    Integer(IntegerRule),
    /// String-typed rule.
    String(StringRule),
    /// Float-typed rule.
    Float(FloatRule),
}

impl Rule {
    /// Returns the rule key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Integer(rule) => rule.key(),
            Self::String(rule) => rule.key(),
            Self::Float(rule) => rule.key(),
        }
    }

    /// Returns whether the key must be present.
    #[must_use]
    pub const fn required(&self) -> bool {
        match self {
            Self::Integer(rule) => rule.required(),
            Self::String(rule) => rule.required(),
            Self::Float(rule) => rule.required(),
        }
    }

    /// Returns the default value, if one was configured.
    #[must_use]
    pub fn default_value(&self) -> Option<ConfigValue> {
        match self {
            Self::Integer(rule) => rule.default_value(),
            Self::String(rule) => rule.default_value(),
            Self::Float(rule) => rule.default_value(),
        }
    }

    /// Returns the variant discriminator.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::Integer(_) => RuleKind::Integer,
            Self::String(_) => RuleKind::String,
            Self::Float(_) => RuleKind::Float,
        }
    }

    /// Validates a config value against this rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on type mismatch or bound violation.
    pub fn validate(&self, value: &ConfigValue) -> Result<(), ValidationError> {
        match self {
            Self::Integer(rule) => rule.validate(value),
            Self::String(rule) => rule.validate(value),
            Self::Float(rule) => rule.validate(value),
        }
    }
}

impl From<IntegerRule> for Rule {
    fn from(rule: IntegerRule) -> Self {
        Self::Integer(rule)
    }
}

impl From<StringRule> for Rule {
    fn from(rule: StringRule) -> Self {
        Self::String(rule)
    }
}

impl From<FloatRule> for Rule {
    fn from(rule: FloatRule) -> Self {
        Self::Float(rule)
    }
}

// ============================================================================
// SECTION: Integer Rule
// ============================================================================

/// Rule validating integer-typed config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerRule {
    /// Config key.
    key: String,
    /// Whether the key must be present.
    required: bool,
    /// Default injected when the key is absent.
    default: Option<i64>,
    /// Inclusive lower bound.
    minimum: Option<i64>,
    /// Inclusive upper bound.
    maximum: Option<i64>,
}

impl IntegerRule {
    /// Creates an integer rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::EmptyKey`] when `key` is empty.
    pub fn new(
        key: impl Into<String>,
        required: bool,
        default: Option<i64>,
    ) -> Result<Self, RuleError> {
        let key = non_empty_key(key)?;
        Ok(Self {
            key,
            required,
            default,
            minimum: None,
            maximum: None,
        })
    }

    /// Returns the rule key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns whether the key must be present.
    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }

    /// Returns the default as a config value.
    #[must_use]
    pub fn default_value(&self) -> Option<ConfigValue> {
        self.default.map(ConfigValue::Int)
    }

    /// Returns the raw default.
    #[must_use]
    pub const fn default(&self) -> Option<i64> {
        self.default
    }

    /// Returns the minimum bound.
    #[must_use]
    pub const fn minimum(&self) -> Option<i64> {
        self.minimum
    }

    /// Returns the maximum bound.
    #[must_use]
    pub const fn maximum(&self) -> Option<i64> {
        self.maximum
    }

    /// Sets the inclusive minimum.
    pub const fn set_minimum(&mut self, minimum: i64) {
        self.minimum = Some(minimum);
    }

    /// Sets the inclusive maximum.
    pub const fn set_maximum(&mut self, maximum: i64) {
        self.maximum = Some(maximum);
    }

    /// Validates a config value against this rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on type mismatch or bound violation.
    pub fn validate(&self, value: &ConfigValue) -> Result<(), ValidationError> {
        let ConfigValue::Int(number) = value else {
            return Err(wrong_type(&self.key, ConfigValueType::Integer, value));
        };
        if let Some(minimum) = self.minimum
            && *number < minimum
        {
            return Err(ValidationError::BelowMinimum {
                key: self.key.clone(),
                value: NumericValue::Int(*number),
                minimum: NumericValue::Int(minimum),
            });
        }
        if let Some(maximum) = self.maximum
            && *number > maximum
        {
            return Err(ValidationError::AboveMaximum {
                key: self.key.clone(),
                value: NumericValue::Int(*number),
                maximum: NumericValue::Int(maximum),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: String Rule
// ============================================================================

/// Rule validating string-typed config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRule {
    /// Config key.
    key: String,
    /// Whether the key must be present.
    required: bool,
    /// Default injected when the key is absent.
    default: Option<String>,
}

impl StringRule {
    /// Creates a string rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::EmptyKey`] when `key` is empty.
    pub fn new(
        key: impl Into<String>,
        required: bool,
        default: Option<String>,
    ) -> Result<Self, RuleError> {
        let key = non_empty_key(key)?;
        Ok(Self {
            key,
            required,
            default,
        })
    }

    /// Returns the rule key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns whether the key must be present.
    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }

    /// Returns the default as a config value.
    #[must_use]
    pub fn default_value(&self) -> Option<ConfigValue> {
        self.default.clone().map(ConfigValue::Str)
    }

    /// Returns the raw default.
    #[must_use]
    pub fn default(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Validates a config value against this rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WrongType`] for non-string values.
    pub fn validate(&self, value: &ConfigValue) -> Result<(), ValidationError> {
        match value {
            ConfigValue::Str(_) => Ok(()),
            other => Err(wrong_type(&self.key, ConfigValueType::String, other)),
        }
    }
}

// ============================================================================
// SECTION: Float Rule
// ============================================================================

/// Rule validating float-typed config.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatRule {
    /// Config key.
    key: String,
    /// Whether the key must be present.
    required: bool,
    /// Default injected when the key is absent.
    default: Option<f64>,
    /// Inclusive lower bound.
    minimum: Option<f64>,
    /// Inclusive upper bound.
    maximum: Option<f64>,
}

impl FloatRule {
    /// Creates a float rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::EmptyKey`] when `key` is empty.
    pub fn new(
        key: impl Into<String>,
        required: bool,
        default: Option<f64>,
    ) -> Result<Self, RuleError> {
        let key = non_empty_key(key)?;
        Ok(Self {
            key,
            required,
            default,
            minimum: None,
            maximum: None,
        })
    }

    /// Returns the rule key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns whether the key must be present.
    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }

    /// Returns the default as a config value.
    #[must_use]
    pub fn default_value(&self) -> Option<ConfigValue> {
        self.default.map(ConfigValue::Float)
    }

    /// Returns the raw default.
    #[must_use]
    pub const fn default(&self) -> Option<f64> {
        self.default
    }

    /// Returns the minimum bound.
    #[must_use]
    pub const fn minimum(&self) -> Option<f64> {
        self.minimum
    }

    /// Returns the maximum bound.
    #[must_use]
    pub const fn maximum(&self) -> Option<f64> {
        self.maximum
    }

    /// Sets the inclusive minimum.
    pub const fn set_minimum(&mut self, minimum: f64) {
        self.minimum = Some(minimum);
    }

    /// Sets the inclusive maximum.
    pub const fn set_maximum(&mut self, maximum: f64) {
        self.maximum = Some(maximum);
    }

    /// Validates a config value against this rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on type mismatch or bound violation.
    pub fn validate(&self, value: &ConfigValue) -> Result<(), ValidationError> {
        let ConfigValue::Float(number) = value else {
            return Err(wrong_type(&self.key, ConfigValueType::Float, value));
        };
        if let Some(minimum) = self.minimum
            && *number < minimum
        {
            return Err(ValidationError::BelowMinimum {
                key: self.key.clone(),
                value: NumericValue::Float(*number),
                minimum: NumericValue::Float(minimum),
            });
        }
        if let Some(maximum) = self.maximum
            && *number > maximum
        {
            return Err(ValidationError::AboveMaximum {
                key: self.key.clone(),
                value: NumericValue::Float(*number),
                maximum: NumericValue::Float(maximum),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects empty rule keys.
fn non_empty_key(key: impl Into<String>) -> Result<String, RuleError> {
    let key = key.into();
    if key.is_empty() {
        return Err(RuleError::EmptyKey);
    }
    Ok(key)
}

/// Builds a type mismatch error for `value`.
fn wrong_type(key: &str, expected: ConfigValueType, value: &ConfigValue) -> ValidationError {
    ValidationError::WrongType {
        key: key.to_string(),
        expected,
        actual: value.value_type(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
