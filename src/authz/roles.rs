//! Role inheritance graph.
//!
//! Edges read "member inherits role" and are partitioned by domain. Role names
//! and user names share one namespace; a role is just a node that has
//! incoming edges. Traversal is breadth-first with a visited set, so cyclic
//! input terminates and deep hierarchies are never cut short.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::authz::types::DEFAULT_DOMAIN;

#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    /// domain -> member -> direct roles
    edges: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, member: &str, role: &str) -> bool {
        self.add_edge_in(member, role, DEFAULT_DOMAIN)
    }

    /// Returns `false` if the edge already existed.
    pub fn add_edge_in(&mut self, member: &str, role: &str, domain: &str) -> bool {
        self.edges
            .entry(domain.to_string())
            .or_default()
            .entry(member.to_string())
            .or_default()
            .insert(role.to_string())
    }

    pub fn remove_edge(&mut self, member: &str, role: &str) -> bool {
        self.remove_edge_in(member, role, DEFAULT_DOMAIN)
    }

    /// Returns `false` if there was no such edge.
    pub fn remove_edge_in(&mut self, member: &str, role: &str, domain: &str) -> bool {
        let Some(graph) = self.edges.get_mut(domain) else {
            return false;
        };
        let Some(roles) = graph.get_mut(member) else {
            return false;
        };
        let removed = roles.remove(role);
        if roles.is_empty() {
            graph.remove(member);
        }
        if graph.is_empty() {
            self.edges.remove(domain);
        }
        removed
    }

    /// Drop every edge where `member` is the inheriting side, in all domains.
    /// Edges pointing *at* `member` (if it is itself a role) are kept.
    pub fn remove_all_edges_for(&mut self, member: &str) -> usize {
        let mut removed = 0;
        for graph in self.edges.values_mut() {
            if let Some(roles) = graph.remove(member) {
                removed += roles.len();
            }
        }
        self.edges.retain(|_, graph| !graph.is_empty());
        removed
    }

    pub fn has_role(&self, member: &str, role: &str) -> bool {
        self.has_role_in(member, role, DEFAULT_DOMAIN)
    }

    /// Reflexive, transitive reachability of `role` from `member`.
    pub fn has_role_in(&self, member: &str, role: &str, domain: &str) -> bool {
        if member == role {
            return true;
        }
        self.walk(member, domain, |reached| reached == role)
    }

    /// Direct roles of `member`, sorted.
    pub fn roles_for(&self, member: &str, domain: &str) -> Vec<String> {
        self.edges
            .get(domain)
            .and_then(|graph| graph.get(member))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every role reachable from `member`, excluding `member` itself, sorted.
    pub fn implicit_roles_for(&self, member: &str, domain: &str) -> Vec<String> {
        let mut reached = BTreeSet::new();
        self.walk(member, domain, |role| {
            if role != member {
                reached.insert(role.to_string());
            }
            false
        });
        reached.into_iter().collect()
    }

    /// Direct members of `role`, sorted.
    pub fn members_of(&self, role: &str, domain: &str) -> Vec<String> {
        let Some(graph) = self.edges.get(domain) else {
            return Vec::new();
        };
        let mut members: Vec<String> = graph
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(member, _)| member.clone())
            .collect();
        members.sort();
        members
    }

    pub fn edge_count(&self) -> usize {
        self.edges
            .values()
            .flat_map(|graph| graph.values())
            .map(BTreeSet::len)
            .sum()
    }

    /// Breadth-first walk over the roles reachable from `member`. Stops early
    /// and returns `true` as soon as `visit` does.
    fn walk(&self, member: &str, domain: &str, mut visit: impl FnMut(&str) -> bool) -> bool {
        let Some(graph) = self.edges.get(domain) else {
            return false;
        };
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        if let Some(direct) = graph.get(member) {
            queue.extend(direct.iter().map(String::as_str));
        }

        while let Some(role) = queue.pop_front() {
            if !visited.insert(role) {
                continue;
            }
            if visit(role) {
                return true;
            }
            if let Some(next) = graph.get(role) {
                queue.extend(
                    next.iter()
                        .map(String::as_str)
                        .filter(|r| !visited.contains(r)),
                );
            }
        }
        false
    }
}
