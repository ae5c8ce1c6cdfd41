// crates/tally-policy/src/serde_support.rs
// ============================================================================
// Module: Policy Serde Support
// Description: Structured textual form for rules, nodes, and trees.
// Purpose: Import/export policies as JSON with explicit type discriminators.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Rules serialize as records tagged by `type` (`"integer"`, `"string"`,
//! `"float"`). Nodes serialize as `{"rules": {key: record}}` with the map key
//! carrying the rule key, and trees as `{"nodes": [{"path": [...], "rules":
//! {...}}]}`. Decoding resolves the discriminator through
//! [`RuleKind::from_discriminator`] and fails on unknown types rather than
//! dropping the rule. Float defaults and bounds must be finite to encode;
//! JSON has no representation for NaN or infinities.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde_json::Number;
use serde_json::Value;

use crate::error::CodecError;
use crate::node::ConfigPolicyNode;
use crate::rule::FloatRule;
use crate::rule::IntegerRule;
use crate::rule::Rule;
use crate::rule::RuleKind;
use crate::rule::StringRule;
use crate::tree::ConfigPolicyTree;
use crate::tree::PolicyPath;

// ============================================================================
// SECTION: Records
// ============================================================================

/// Serialized rule record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRecord {
    /// Variant discriminator.
    #[serde(rename = "type")]
    kind: String,
    /// Rule key (omitted inside node maps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    /// Required flag.
    #[serde(default)]
    required: bool,
    /// Optional default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    /// Optional inclusive minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minimum: Option<Value>,
    /// Optional inclusive maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    maximum: Option<Value>,
}

/// Serialized node record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeRecord {
    /// Rules keyed by config key.
    #[serde(default)]
    rules: BTreeMap<String, RuleRecord>,
}

/// Serialized tree entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeEntryRecord {
    /// Namespace path segments.
    #[serde(default)]
    path: Vec<String>,
    /// Rules keyed by config key.
    #[serde(default)]
    rules: BTreeMap<String, RuleRecord>,
}

/// Serialized tree record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TreeRecord {
    /// Attached nodes.
    #[serde(default)]
    nodes: Vec<TreeEntryRecord>,
}

// ============================================================================
// SECTION: Rule Conversion
// ============================================================================

impl RuleRecord {
    /// Builds a record from a rule, optionally omitting the key.
    fn from_rule(rule: &Rule, include_key: bool) -> Result<Self, CodecError> {
        let key = include_key.then(|| rule.key().to_string());
        let kind = rule.kind().discriminator().to_string();
        Ok(match rule {
            Rule::Integer(rule) => Self {
                kind,
                key,
                required: rule.required(),
                default: rule.default().map(Value::from),
                minimum: rule.minimum().map(Value::from),
                maximum: rule.maximum().map(Value::from),
            },
            Rule::String(rule) => Self {
                kind,
                key,
                required: rule.required(),
                default: rule.default().map(Value::from),
                minimum: None,
                maximum: None,
            },
            Rule::Float(rule) => Self {
                kind,
                key,
                required: rule.required(),
                default: finite_field(rule.key(), "default", rule.default())?,
                minimum: finite_field(rule.key(), "minimum", rule.minimum())?,
                maximum: finite_field(rule.key(), "maximum", rule.maximum())?,
            },
        })
    }

    /// Rebuilds the rule this record describes under `key`.
    fn into_rule(self, key: &str) -> Result<Rule, CodecError> {
        let kind = RuleKind::from_discriminator(&self.kind)
            .ok_or_else(|| CodecError::UnknownRuleType(self.kind.clone()))?;
        match kind {
            RuleKind::Integer => {
                let default =
                    self.default.as_ref().map(|v| int_field(key, "default", v)).transpose()?;
                let mut rule = IntegerRule::new(key, self.required, default)?;
                if let Some(minimum) = &self.minimum {
                    rule.set_minimum(int_field(key, "minimum", minimum)?);
                }
                if let Some(maximum) = &self.maximum {
                    rule.set_maximum(int_field(key, "maximum", maximum)?);
                }
                Ok(rule.into())
            }
            RuleKind::String => {
                let default = match &self.default {
                    Some(Value::String(value)) => Some(value.clone()),
                    Some(_) => {
                        return Err(CodecError::Invalid(format!("{key}: default must be a string")));
                    }
                    None => None,
                };
                Ok(StringRule::new(key, self.required, default)?.into())
            }
            RuleKind::Float => {
                let default =
                    self.default.as_ref().map(|v| float_field(key, "default", v)).transpose()?;
                let mut rule = FloatRule::new(key, self.required, default)?;
                if let Some(minimum) = &self.minimum {
                    rule.set_minimum(float_field(key, "minimum", minimum)?);
                }
                if let Some(maximum) = &self.maximum {
                    rule.set_maximum(float_field(key, "maximum", maximum)?);
                }
                Ok(rule.into())
            }
        }
    }
}

/// Reads an integer field.
fn int_field(key: &str, field: &str, value: &Value) -> Result<i64, CodecError> {
    value
        .as_i64()
        .ok_or_else(|| CodecError::Invalid(format!("{key}: {field} must be an integer")))
}

/// Reads a float field, accepting integral JSON numbers.
fn float_field(key: &str, field: &str, value: &Value) -> Result<f64, CodecError> {
    value.as_f64().ok_or_else(|| CodecError::Invalid(format!("{key}: {field} must be a number")))
}

/// Encodes an optional float field, rejecting NaN and infinities.
fn finite_field(key: &str, field: &str, value: Option<f64>) -> Result<Option<Value>, CodecError> {
    value
        .map(|value| {
            Number::from_f64(value)
                .map(Value::Number)
                .ok_or_else(|| CodecError::Invalid(format!("{key}: {field} must be finite")))
        })
        .transpose()
}

/// Converts a record map into rules.
fn rules_from_records(records: BTreeMap<String, RuleRecord>) -> Result<Vec<Rule>, CodecError> {
    records.into_iter().map(|(key, record)| record.into_rule(&key)).collect()
}

/// Converts rules into a record map keyed by rule key.
fn records_from_rules(rules: Vec<Rule>) -> Result<BTreeMap<String, RuleRecord>, CodecError> {
    rules
        .into_iter()
        .map(|rule| -> Result<_, CodecError> {
            Ok((rule.key().to_string(), RuleRecord::from_rule(&rule, false)?))
        })
        .collect()
}

// ============================================================================
// SECTION: Serde Impls
// ============================================================================

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RuleRecord::from_rule(self, true).map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut record = RuleRecord::deserialize(deserializer)?;
        let key = record.key.take().unwrap_or_default();
        record.into_rule(&key).map_err(D::Error::custom)
    }
}

impl Serialize for ConfigPolicyNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        NodeRecord {
            rules: records_from_rules(self.rules()).map_err(S::Error::custom)?,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigPolicyNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = NodeRecord::deserialize(deserializer)?;
        let rules = rules_from_records(record.rules).map_err(D::Error::custom)?;
        Ok(Self::with_rules(rules))
    }
}

impl Serialize for ConfigPolicyTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let nodes = self
            .entries()
            .into_iter()
            .map(|(path, node)| -> Result<_, CodecError> {
                Ok(TreeEntryRecord {
                    path: path.segments().to_vec(),
                    rules: records_from_rules(node.rules())?,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()
            .map_err(S::Error::custom)?;
        TreeRecord {
            nodes,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigPolicyTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = TreeRecord::deserialize(deserializer)?;
        let tree = Self::new();
        for entry in record.nodes {
            let path = PolicyPath::new(&entry.path).map_err(D::Error::custom)?;
            let rules = rules_from_records(entry.rules).map_err(D::Error::custom)?;
            tree.add_at(path, ConfigPolicyNode::with_rules(rules));
        }
        Ok(tree)
    }
}
