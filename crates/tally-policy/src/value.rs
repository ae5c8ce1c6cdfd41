// crates/tally-policy/src/value.rs
// ============================================================================
// Module: Config Values
// Description: Concrete scalar values supplied by operators as plugin config.
// Purpose: Provide the tagged value union that policy rules validate.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Operator configuration arrives untyped; each entry is carried as a
//! [`ConfigValue`] whose declared type drives rule validation. Values are
//! immutable once constructed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Configuration map passed to collect/process calls, keyed by config key.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Concrete configuration scalar.
///
/// # Invariants
/// - The JSON form is `{"type": "<label>", "value": <scalar>}` with labels
///   matching [`ConfigValueType::as_str`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ConfigValue {
    /// Signed 64-bit integer value.
    #[serde(rename = "integer")]
    Int(i64),
    /// UTF-8 string value.
    #[serde(rename = "string")]
    Str(String),
    /// 64-bit float value.
    #[serde(rename = "float")]
    Float(f64),
}

impl ConfigValue {
    /// Returns the declared type of this value.
    #[must_use]
    pub const fn value_type(&self) -> ConfigValueType {
        match self {
            Self::Int(_) => ConfigValueType::Integer,
            Self::Str(_) => ConfigValueType::String,
            Self::Float(_) => ConfigValueType::Float,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => value.fmt(f),
            Self::Str(value) => value.fmt(f),
            Self::Float(value) => value.fmt(f),
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Declared type of a [`ConfigValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValueType {
    /// Integer values.
    Integer,
    /// String values.
    String,
    /// Float values.
    Float,
}

impl ConfigValueType {
    /// Returns the stable label for the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::Float => "float",
        }
    }
}

impl fmt::Display for ConfigValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
