// crates/tally-policy/src/lib.rs
// ============================================================================
// Module: Tally Policy Library
// Description: Public API surface for the configuration policy engine.
// Purpose: Expose config values, rules, policy nodes/trees, and their codecs.
// Dependencies: crate::{error, node, rule, serde_support, tree, value, wire}
// ============================================================================

//! ## Overview
//! `tally-policy` validates, defaults, and merges untyped operator config
//! before it reaches a plugin. Rules are grouped into nodes, nodes are
//! arranged in a namespace tree, and every entity has both a JSON form and a
//! compact binary form so policies survive the plugin RPC boundary.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod error;
pub mod node;
pub mod rule;
mod serde_support;
pub mod tree;
pub mod value;
pub mod wire;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::CodecError;
pub use error::NumericValue;
pub use error::PolicyError;
pub use error::RuleError;
pub use error::ValidationError;
pub use node::ConfigPolicyNode;
pub use node::ProcessingErrors;
pub use rule::FloatRule;
pub use rule::IntegerRule;
pub use rule::Rule;
pub use rule::RuleKind;
pub use rule::StringRule;
pub use tree::ConfigPolicyTree;
pub use tree::PolicyPath;
pub use value::ConfigMap;
pub use value::ConfigValue;
pub use value::ConfigValueType;
pub use wire::WireDecode;
pub use wire::WireEncode;
pub use wire::from_wire_bytes;
pub use wire::to_wire_bytes;
