// crates/tally-policy/src/tree.rs
// ============================================================================
// Module: Config Policy Tree
// Description: Namespace-indexed hierarchy of policy nodes.
// Purpose: Resolve the effective policy for a metric namespace path.
// Dependencies: crate::{error, node, value}
// ============================================================================

//! ## Overview
//! The tree is an index of [`ConfigPolicyNode`]s keyed by normalized path
//! string rather than linked nodes. Resolving a path merges every node from
//! the root down to the path so the most specific node wins per key while
//! ancestor rules still apply to keys it does not define.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::error::PolicyError;
use crate::node::ConfigPolicyNode;
use crate::node::ProcessingErrors;
use crate::value::ConfigMap;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator used in normalized path keys.
pub const PATH_SEPARATOR: char = '/';

// ============================================================================
// SECTION: Policy Path
// ============================================================================

/// Validated namespace path into a policy tree.
///
/// # Invariants
/// - Segments are non-empty and never contain [`PATH_SEPARATOR`].
/// - The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyPath {
    /// Ordered path segments.
    segments: Vec<String>,
}

impl PolicyPath {
    /// Returns the root path.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Builds a path from segments.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPathSegment`] for an empty segment or one
    /// containing the separator.
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Result<Self, PolicyError> {
        let mut validated = Vec::with_capacity(segments.len());
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() || segment.contains(PATH_SEPARATOR) {
                return Err(PolicyError::InvalidPathSegment(segment.to_string()));
            }
            validated.push(segment.to_string());
        }
        Ok(Self {
            segments: validated,
        })
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the normalized index key.
    #[must_use]
    pub fn key(&self) -> String {
        self.segments.join("/")
    }

    /// Returns the normalized keys of every prefix, root first.
    fn prefix_keys(&self) -> impl Iterator<Item = String> + '_ {
        (0..=self.segments.len()).map(|depth| self.segments[..depth].join("/"))
    }
}

impl fmt::Display for PolicyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.key())
    }
}

// ============================================================================
// SECTION: Policy Tree
// ============================================================================

/// Hierarchy of policy nodes addressed by namespace path.
#[derive(Debug, Default)]
pub struct ConfigPolicyTree {
    /// Entries keyed by normalized path.
    nodes: RwLock<BTreeMap<String, TreeEntry>>,
}

/// Node stored at a path.
#[derive(Debug, Clone)]
struct TreeEntry {
    /// Path the node is attached to.
    path: PolicyPath,
    /// Rules attached at this path.
    node: ConfigPolicyNode,
}

impl ConfigPolicyTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `node` at `path`, merging over any node already there.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when `path` is not a valid policy path.
    pub fn add_policy_node<S: AsRef<str>>(
        &self,
        path: &[S],
        node: ConfigPolicyNode,
    ) -> Result<(), PolicyError> {
        let path = PolicyPath::new(path)?;
        self.add_at(path, node);
        Ok(())
    }

    /// Attaches `node` at a validated path, merging over any existing node.
    pub fn add_at(&self, path: PolicyPath, node: ConfigPolicyNode) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(&path.key()) {
            Some(existing) => existing.node.merge_from(&node),
            None => {
                nodes.insert(
                    path.key(),
                    TreeEntry {
                        path,
                        node,
                    },
                );
            }
        }
    }

    /// Returns a copy of the node attached exactly at `path`.
    #[must_use]
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<ConfigPolicyNode> {
        let path = PolicyPath::new(path).ok()?;
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(&path.key()).map(|entry| entry.node.clone())
    }

    /// Resolves the effective policy for `path`.
    ///
    /// Nodes are merged root first so deeper nodes override shallower ones.
    /// Missing nodes along the way contribute no rules. A path with an
    /// invalid segment cannot match any node beyond its valid prefix.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> ConfigPolicyNode {
        let valid: Vec<&str> = path
            .iter()
            .map(AsRef::as_ref)
            .take_while(|segment| !segment.is_empty() && !segment.contains(PATH_SEPARATOR))
            .collect();
        let resolved = ConfigPolicyNode::new();
        let Ok(path) = PolicyPath::new(&valid) else {
            return resolved;
        };
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        for key in path.prefix_keys() {
            if let Some(entry) = nodes.get(&key) {
                resolved.merge_from(&entry.node);
            }
        }
        resolved
    }

    /// Resolves `path` and processes `config` against the result.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingErrors`] when validation fails.
    pub fn process<S: AsRef<str>>(
        &self,
        path: &[S],
        config: ConfigMap,
    ) -> Result<ConfigMap, ProcessingErrors> {
        self.resolve(path).process(config)
    }

    /// Returns every attached node with its path, in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(PolicyPath, ConfigPolicyNode)> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.values().map(|entry| (entry.path.clone(), entry.node.clone())).collect()
    }

    /// Returns the number of attached nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no nodes are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Clone for ConfigPolicyTree {
    fn clone(&self) -> Self {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner).clone();
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        reason = "Test-only assertions."
    )]

    use super::PolicyPath;
    use crate::error::PolicyError;

    #[test]
    fn path_rejects_empty_and_separator_segments() {
        assert_eq!(
            PolicyPath::new(&["intel", ""]),
            Err(PolicyError::InvalidPathSegment(String::new()))
        );
        assert_eq!(
            PolicyPath::new(&["a/b"]),
            Err(PolicyError::InvalidPathSegment("a/b".to_string()))
        );
    }

    #[test]
    fn prefix_keys_walk_from_root() {
        let path = PolicyPath::new(&["intel", "cpu", "load"]).unwrap();
        let keys: Vec<String> = path.prefix_keys().collect();
        assert_eq!(keys, vec!["", "intel", "intel/cpu", "intel/cpu/load"]);
        assert_eq!(path.to_string(), "/intel/cpu/load");
        assert_eq!(PolicyPath::root().key(), "");
    }
}
