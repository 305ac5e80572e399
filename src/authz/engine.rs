use std::path::Path;

use parking_lot::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::loader::{load_policy, PolicySource};
use crate::authz::matcher::Matcher;
use crate::authz::model::{load_model_file, Model};
use crate::authz::policy::{edge_from_fields, rule_from_fields, rule_priority};
use crate::authz::roles::RoleGraph;
use crate::authz::types::*;
use crate::authz::PolicySnapshot;

/// Role definition used by the `*_role*` convenience methods.
const DEFAULT_ROLE_TYPE: &str = "g";

/// Evaluates requests against a model and the current policy snapshot.
///
/// `enforce` holds a read lock for the whole evaluation; reloads and rule or
/// role mutations take the write lock, so every call sees one consistent
/// snapshot. Share it across tasks with `Arc<Enforcer>`.
#[derive(Debug)]
pub struct Enforcer {
    model: Model,
    source: PolicySource,
    state: RwLock<PolicySnapshot>,
}

impl Enforcer {
    pub fn new(model: Model, source: PolicySource) -> Result<Self, AuthzError> {
        let snapshot = load_policy(&source, &model)?;
        Ok(Self {
            model,
            source,
            state: RwLock::new(snapshot),
        })
    }

    pub fn from_files(
        model_path: impl AsRef<Path>,
        policy_path: impl AsRef<Path>,
    ) -> Result<Self, AuthzError> {
        let model = load_model_file(model_path.as_ref())?;
        Self::new(model, PolicySource::from(policy_path.as_ref()))
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Decide a `(subject, object, action)` request with the default matcher.
    pub fn enforce(&self, sub: &str, obj: &str, act: &str) -> Result<bool, AuthzError> {
        self.enforce_request(&[sub, obj, act])
    }

    /// Decide a request with one value per declared request field.
    pub fn enforce_request(&self, request: &[&str]) -> Result<bool, AuthzError> {
        self.decide(self.model.default_matcher(), request)
    }

    /// Decide a request with a secondary matcher from the `[matchers]` section.
    pub fn enforce_with_matcher(&self, name: &str, request: &[&str]) -> Result<bool, AuthzError> {
        let matcher = self
            .model
            .matcher(name)
            .ok_or_else(|| AuthzError::Matcher(format!("model has no matcher `{name}`")))?;
        self.decide(matcher, request)
    }

    fn decide(&self, matcher: &Matcher, request: &[&str]) -> Result<bool, AuthzError> {
        let expected = self.model.request_fields().len();
        if request.len() != expected {
            return Err(AuthzError::Matcher(format!(
                "request has {} values, model declares {expected} ({})",
                request.len(),
                self.model.request_fields().join(", ")
            )));
        }

        let state = self.state.read();
        // every rule is evaluated so a broken rule can't hide behind an
        // earlier match
        let mut matched = Vec::new();
        for rule in &state.rules {
            if matcher.evaluate(request, rule, &state)? {
                matched.push(rule.effect);
            }
        }
        let allowed = self.model.effect().combine(matched.iter().copied());

        tracing::debug!(
            ?request,
            matched = matched.len(),
            allowed,
            "authorization decision"
        );
        Ok(allowed)
    }

    /// Re-read the configured policy source and swap it in as a whole. On
    /// failure the current snapshot stays in effect.
    pub fn reload(&self) -> Result<(), AuthzError> {
        let snapshot = load_policy(&self.source, &self.model)?;
        *self.state.write() = snapshot;
        Ok(())
    }

    /// Copy of the current rules, in evaluation order.
    pub fn policy(&self) -> Vec<PolicyRule> {
        self.state.read().rules.clone()
    }

    pub fn rule_count(&self) -> usize {
        self.state.read().rules.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edge_count()
    }

    /// Add a policy rule. Returns `false` if an identical rule exists.
    pub fn add_policy(&self, fields: &[&str]) -> Result<bool, AuthzError> {
        let rule = rule_from_fields(owned(fields), &self.model).map_err(AuthzError::InvalidRule)?;
        let priority_idx = self.model.priority_index();
        let new_priority = match priority_idx {
            Some(i) => Some(rule_priority(&rule.fields[i]).map_err(AuthzError::InvalidRule)?),
            None => None,
        };

        let mut state = self.state.write();
        if state.contains_rule(&rule.fields) {
            return Ok(false);
        }
        state.patterns.add_rule(&self.model, &rule)?;
        let at = match (priority_idx, new_priority) {
            (Some(i), Some(new)) => state
                .rules
                .iter()
                .position(|r| rule_priority(&r.fields[i]).is_ok_and(|p| p > new))
                .unwrap_or(state.rules.len()),
            _ => state.rules.len(),
        };
        tracing::info!(%rule, "Added policy rule");
        state.rules.insert(at, rule);
        Ok(true)
    }

    /// Remove a policy rule. Returns `false` if no identical rule exists.
    pub fn remove_policy(&self, fields: &[&str]) -> bool {
        let mut state = self.state.write();
        let before = state.rules.len();
        state
            .rules
            .retain(|r| r.fields.iter().map(String::as_str).ne(fields.iter().map(|f| f.trim())));
        let removed = state.rules.len() != before;
        if removed {
            tracing::info!(rule = ?fields, "Removed policy rule");
        }
        removed
    }

    /// Add an edge for any role definition, e.g. `("g2", &["alice", "admin", "tenant1"])`.
    pub fn add_grouping(&self, ptype: &str, fields: &[&str]) -> Result<bool, AuthzError> {
        let edge = edge_from_fields(ptype, owned(fields), &self.model).map_err(AuthzError::InvalidRule)?;
        let added = self.state.write().insert_edge(&edge);
        if added {
            tracing::info!(%edge, "Added role edge");
        }
        Ok(added)
    }

    pub fn remove_grouping(&self, ptype: &str, fields: &[&str]) -> Result<bool, AuthzError> {
        let edge = edge_from_fields(ptype, owned(fields), &self.model).map_err(AuthzError::InvalidRule)?;
        let removed = self.state.write().delete_edge(&edge);
        if removed {
            tracing::info!(%edge, "Removed role edge");
        }
        Ok(removed)
    }

    pub fn add_role_for(&self, member: &str, role: &str) -> Result<bool, AuthzError> {
        self.add_grouping(DEFAULT_ROLE_TYPE, &[member, role])
    }

    pub fn delete_role_for(&self, member: &str, role: &str) -> Result<bool, AuthzError> {
        self.remove_grouping(DEFAULT_ROLE_TYPE, &[member, role])
    }

    /// Revoke every role `member` holds through `g`, in every domain.
    /// Takes effect for the next `enforce` call.
    pub fn delete_roles_for(&self, member: &str) -> Result<usize, AuthzError> {
        self.require_role_type(DEFAULT_ROLE_TYPE)?;
        let mut state = self.state.write();
        let removed = state
            .roles
            .get_mut(DEFAULT_ROLE_TYPE)
            .map(|graph| graph.remove_all_edges_for(member))
            .unwrap_or(0);
        tracing::info!(member, removed, "Revoked all roles");
        Ok(removed)
    }

    pub fn has_role(&self, member: &str, role: &str) -> Result<bool, AuthzError> {
        self.with_graph(|graph| graph.has_role(member, role))
    }

    pub fn roles_for(&self, member: &str) -> Result<Vec<String>, AuthzError> {
        self.with_graph(|graph| graph.roles_for(member, DEFAULT_DOMAIN))
    }

    pub fn implicit_roles_for(&self, member: &str) -> Result<Vec<String>, AuthzError> {
        self.with_graph(|graph| graph.implicit_roles_for(member, DEFAULT_DOMAIN))
    }

    pub fn members_of(&self, role: &str) -> Result<Vec<String>, AuthzError> {
        self.with_graph(|graph| graph.members_of(role, DEFAULT_DOMAIN))
    }

    fn with_graph<T>(
        &self,
        f: impl FnOnce(&RoleGraph) -> T,
    ) -> Result<T, AuthzError> {
        self.require_role_type(DEFAULT_ROLE_TYPE)?;
        let state = self.state.read();
        let empty = RoleGraph::new();
        Ok(f(state.roles.get(DEFAULT_ROLE_TYPE).unwrap_or(&empty)))
    }

    fn require_role_type(&self, ptype: &str) -> Result<(), AuthzError> {
        match self.model.role_arity(ptype) {
            Some(_) => Ok(()),
            None => Err(AuthzError::InvalidRule(format!(
                "model declares no role definition `{ptype}`"
            ))),
        }
    }
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.trim().to_string()).collect()
}
