use std::path::{Path, PathBuf};

use crate::authz::errors::AuthzError;
use crate::authz::matcher::PatternCache;
use crate::authz::model::Model;
use crate::authz::policy::{parse_policy, rule_priority};
use crate::authz::roles::RoleGraph;
use crate::authz::types::*;
use crate::authz::PolicySnapshot;

/// Where the enforcer (re)loads its policy from.
#[derive(Debug, Clone)]
pub enum PolicySource {
    File(PathBuf),
    Inline(String),
}

impl PolicySource {
    pub fn read(&self) -> Result<String, AuthzError> {
        match self {
            PolicySource::File(path) => {
                std::fs::read_to_string(path).map_err(|source| AuthzError::SourceLoad {
                    path: path.display().to_string(),
                    source,
                })
            }
            PolicySource::Inline(text) => Ok(text.clone()),
        }
    }

    fn describe(&self) -> String {
        match self {
            PolicySource::File(path) => path.display().to_string(),
            PolicySource::Inline(_) => "<inline>".to_string(),
        }
    }
}

impl From<&Path> for PolicySource {
    fn from(path: &Path) -> Self {
        PolicySource::File(path.to_path_buf())
    }
}

impl From<PathBuf> for PolicySource {
    fn from(path: PathBuf) -> Self {
        PolicySource::File(path)
    }
}

/// Read, parse and compile a policy source into a fresh snapshot. Nothing is
/// shared with any existing snapshot, so a failure here leaves the caller's
/// current policy untouched.
pub fn load_policy(source: &PolicySource, model: &Model) -> Result<PolicySnapshot, AuthzError> {
    let text = source.read()?;
    let parsed = parse_policy(&text, model)?;
    let snapshot = compile_policy(parsed, model)?;

    tracing::info!(
        source = %source.describe(),
        rules = snapshot.rules.len(),
        role_edges = snapshot.edge_count(),
        "Loaded authorization policy"
    );

    Ok(snapshot)
}

/// Turn parsed rules and edges into an evaluable snapshot: duplicates are
/// collapsed, rules are ordered by priority when the model has one, role
/// edges are indexed into one graph per role definition and `regexMatch`
/// patterns are compiled.
pub fn compile_policy(parsed: ParsedPolicy, model: &Model) -> Result<PolicySnapshot, AuthzError> {
    let mut rules = PolicySnapshot::dedup_rules(parsed.rules);

    if let Some(idx) = model.priority_index() {
        let mut keyed = rules
            .into_iter()
            .map(|rule| {
                let priority = rule_priority(&rule.fields[idx]).map_err(AuthzError::InvalidRule)?;
                Ok((priority, rule))
            })
            .collect::<Result<Vec<_>, AuthzError>>()?;
        // stable: equal priorities keep file order
        keyed.sort_by_key(|(priority, _)| *priority);
        rules = keyed.into_iter().map(|(_, rule)| rule).collect();
    }

    let mut snapshot = PolicySnapshot {
        rules,
        roles: model
            .role_definitions()
            .map(|name| (name.to_string(), RoleGraph::new()))
            .collect(),
        patterns: PatternCache::default(),
    };
    for rule in &snapshot.rules {
        snapshot.patterns.add_rule(model, rule)?;
    }
    for edge in &parsed.edges {
        snapshot.insert_edge(edge);
    }

    Ok(snapshot)
}
