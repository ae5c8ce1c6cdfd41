// crates/tally-policy/src/error.rs
// ============================================================================
// Module: Policy Errors
// Description: Error types for rule construction, validation, and codecs.
// Purpose: Give callers typed failures they can match on and report.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Construction failures ([`RuleError`]), per-value validation failures
//! ([`ValidationError`]), path failures ([`PolicyError`]) and codec failures
//! ([`CodecError`]) are kept distinct so validation results can be reported
//! back to a control process without mixing in transport concerns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use thiserror::Error;

use crate::value::ConfigValueType;

// ============================================================================
// SECTION: Numeric Values
// ============================================================================

/// Numeric value reported by range validation errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    /// Integer operand.
    Int(i64),
    /// Float operand.
    Float(f64),
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => value.fmt(f),
            Self::Float(value) => write!(f, "{value:.6}"),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rule construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The rule key was empty.
    #[error("key cannot be empty")]
    EmptyKey,
}

/// Validation failures produced while processing a config map.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value type does not match the rule type.
    #[error("type mismatch ({key} wanted type '{expected}' but provided type '{actual}')")]
    WrongType {
        /// Rule key.
        key: String,
        /// Type the rule accepts.
        expected: ConfigValueType,
        /// Type that was supplied.
        actual: ConfigValueType,
    },
    /// Value is below the rule minimum.
    #[error("value is under minimum ({key} value {value} < {minimum})")]
    BelowMinimum {
        /// Rule key.
        key: String,
        /// Offending value.
        value: NumericValue,
        /// Violated bound.
        minimum: NumericValue,
    },
    /// Value is above the rule maximum.
    #[error("value is over maximum ({key} value {value} > {maximum})")]
    AboveMaximum {
        /// Rule key.
        key: String,
        /// Offending value.
        value: NumericValue,
        /// Violated bound.
        maximum: NumericValue,
    },
    /// Required key is absent from the config map.
    #[error("required key missing ({key})")]
    MissingRequired {
        /// Rule key.
        key: String,
    },
}

impl ValidationError {
    /// Returns the rule key the error refers to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::WrongType {
                key, ..
            }
            | Self::BelowMinimum {
                key, ..
            }
            | Self::AboveMaximum {
                key, ..
            }
            | Self::MissingRequired {
                key,
            } => key,
        }
    }
}

/// Policy tree errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A namespace path segment was empty or contained a separator.
    #[error("invalid policy path segment: {0:?}")]
    InvalidPathSegment(String),
}

/// Encoding and decoding errors for the binary and JSON forms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before a complete record was read.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the next field.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// Input carried bytes after the final record.
    #[error("trailing bytes after record: {0}")]
    TrailingBytes(usize),
    /// Rule type discriminator is not in the variant table.
    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),
    /// Config value tag is not recognized.
    #[error("unknown config value tag: {0}")]
    UnknownValueTag(u8),
    /// Presence marker or boolean was not 0 or 1.
    #[error("invalid marker byte: {0}")]
    InvalidMarker(u8),
    /// String payload was not valid UTF-8.
    #[error("invalid utf-8 string")]
    InvalidUtf8,
    /// Decoded content violated a model invariant.
    #[error("invalid record: {0}")]
    Invalid(String),
}

impl From<RuleError> for CodecError {
    fn from(err: RuleError) -> Self {
        Self::Invalid(err.to_string())
    }
}

impl From<PolicyError> for CodecError {
    fn from(err: PolicyError) -> Self {
        Self::Invalid(err.to_string())
    }
}
