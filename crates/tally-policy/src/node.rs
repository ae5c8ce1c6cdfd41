// crates/tally-policy/src/node.rs
// ============================================================================
// Module: Config Policy Node
// Description: Keyed rule set with validate/default/merge operations.
// Purpose: Turn an operator config map into a validated, defaulted map.
// Dependencies: crate::{error, rule, value}
// ============================================================================

//! ## Overview
//! A [`ConfigPolicyNode`] maps config keys to [`Rule`]s behind its own mutex,
//! so concurrent RPC calls can process configs while rules are added or
//! merged. Processing always runs a full validation pass before deciding the
//! outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::error::ValidationError;
use crate::rule::Rule;
use crate::value::ConfigMap;

// ============================================================================
// SECTION: Processing Errors
// ============================================================================

/// Validation errors accumulated by one [`ConfigPolicyNode::process`] call.
#[derive(Debug, Default)]
pub struct ProcessingErrors {
    /// Errors in the order they were recorded.
    errors: Mutex<Vec<ValidationError>>,
}

impl ProcessingErrors {
    /// Creates an empty error set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error.
    pub fn add(&self, error: ValidationError) {
        self.lock().push(error);
    }

    /// Returns a snapshot of the recorded errors.
    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        self.lock().clone()
    }

    /// Returns true when at least one error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Returns the number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when no errors were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Consumes the set and returns the recorded errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the error list, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, Vec<ValidationError>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Display for ProcessingErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.lock().iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for ProcessingErrors {}

// ============================================================================
// SECTION: Policy Node
// ============================================================================

/// Set of rules keyed by config key.
#[derive(Debug, Default)]
pub struct ConfigPolicyNode {
    /// Rules keyed by [`Rule::key`].
    rules: Mutex<BTreeMap<String, Rule>>,
}

impl ConfigPolicyNode {
    /// Creates an empty node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node holding `rules`.
    #[must_use]
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let node = Self::new();
        node.add(rules);
        node
    }

    /// Inserts rules, replacing any rule with the same key.
    pub fn add(&self, rules: impl IntoIterator<Item = Rule>) {
        let mut guard = self.lock();
        for rule in rules {
            guard.insert(rule.key().to_string(), rule);
        }
    }

    /// Returns the rule for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Rule> {
        self.lock().get(key).cloned()
    }

    /// Returns the rule keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Returns a snapshot of the rules in key order.
    #[must_use]
    pub fn rules(&self) -> Vec<Rule> {
        self.lock().values().cloned().collect()
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when the node has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Validates `config` and injects defaults for absent keys.
    ///
    /// An absent key takes the rule default when one exists; an absent
    /// required key without a default is an error. Every rule is evaluated
    /// before the outcome is decided; one failing key never hides failures on
    /// another.
    ///
    /// # Errors
    ///
    /// Returns the accumulated [`ProcessingErrors`] when any rule fails.
    pub fn process(&self, mut config: ConfigMap) -> Result<ConfigMap, ProcessingErrors> {
        let guard = self.lock();
        let errors = ProcessingErrors::new();
        for (key, rule) in guard.iter() {
            if let Some(value) = config.get(key) {
                if let Err(err) = rule.validate(value) {
                    errors.add(err);
                }
            } else if let Some(default) = rule.default_value() {
                config.insert(key.clone(), default);
            } else if rule.required() {
                errors.add(ValidationError::MissingRequired {
                    key: key.clone(),
                });
            }
        }
        drop(guard);
        if errors.has_errors() {
            return Err(errors);
        }
        Ok(config)
    }

    /// Returns a new node with `other` layered over this one.
    ///
    /// Rules in `other` win on key collisions; `other` is not modified.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.snapshot();
        merged.extend(other.snapshot());
        Self {
            rules: Mutex::new(merged),
        }
    }

    /// Layers `other` over this node in place.
    pub fn merge_from(&self, other: &Self) {
        let incoming = other.snapshot();
        self.lock().extend(incoming);
    }

    /// Clones the rule map under the lock.
    fn snapshot(&self) -> BTreeMap<String, Rule> {
        self.lock().clone()
    }

    /// Locks the rule map, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Rule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for ConfigPolicyNode {
    fn clone(&self) -> Self {
        Self {
            rules: Mutex::new(self.snapshot()),
        }
    }
}

impl PartialEq for ConfigPolicyNode {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl FromIterator<Rule> for ConfigPolicyNode {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self::with_rules(iter)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
