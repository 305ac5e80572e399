pub mod engine;
pub mod errors;
pub mod loader;
pub mod matcher;
pub mod model;
pub mod policy;
pub mod roles;
pub mod types;
pub mod web;

use std::collections::{HashMap, HashSet};

use matcher::PatternCache;
use roles::RoleGraph;
use types::{PolicyRule, RoleEdge};

pub use engine::Enforcer;
pub use errors::AuthzError;
pub use loader::PolicySource;
pub use model::{load_model, Model};

/// One complete, consistent view of the policy: rules plus one role graph
/// per role definition. The enforcer swaps whole snapshots on reload.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    /// In evaluation order (ascending priority when the model declares one).
    pub rules: Vec<PolicyRule>,
    /// role definition name (`g`, `g2`, ...) -> graph
    pub roles: HashMap<String, RoleGraph>,
    /// compiled `regexMatch` patterns of `rules`
    pub patterns: PatternCache,
}

impl PolicySnapshot {
    pub fn edge_count(&self) -> usize {
        self.roles.values().map(RoleGraph::edge_count).sum()
    }

    pub fn contains_rule(&self, fields: &[String]) -> bool {
        self.rules.iter().any(|r| r.fields == fields)
    }

    pub(crate) fn insert_edge(&mut self, edge: &RoleEdge) -> bool {
        self.roles
            .entry(edge.ptype.clone())
            .or_default()
            .add_edge_in(&edge.member, &edge.role, edge.domain())
    }

    pub(crate) fn delete_edge(&mut self, edge: &RoleEdge) -> bool {
        self.roles
            .get_mut(&edge.ptype)
            .is_some_and(|g| g.remove_edge_in(&edge.member, &edge.role, edge.domain()))
    }

    /// Drop exact duplicates, keeping the first occurrence.
    pub(crate) fn dedup_rules(rules: Vec<PolicyRule>) -> Vec<PolicyRule> {
        let mut seen = HashSet::new();
        rules
            .into_iter()
            .filter(|r| seen.insert(r.fields.clone()))
            .collect()
    }
}
