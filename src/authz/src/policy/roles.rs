//! Role inheritance graph with memoized flattening
//!
//! Parent links must form a DAG. Cycles are detected once at build time with a
//! three-state DFS (unvisited, on the current path, finished); after that every
//! flattening walk terminates.

use crate::error::AuthzError;
use crate::types::RoleId;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Graph-related errors
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// A parent role is not defined
    #[error("Unknown parent role \"{parent}\" of \"{role}\"")]
    UnknownParent { role: RoleId, parent: RoleId },

    /// Circular inheritance, as a path
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// A role asked to be flattened is not defined
    #[error("Unknown role: {0}")]
    UnknownRole(RoleId),
}

impl From<GraphError> for AuthzError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::UnknownParent { role, parent } => AuthzError::UnknownRole {
                role: parent,
                referenced_by: format!("role \"{}\"", role),
            },
            GraphError::CircularDependency(path) => AuthzError::CyclicRoleInheritance(path),
            GraphError::UnknownRole(role) => AuthzError::UnknownRole {
                role,
                referenced_by: "the active role set".to_string(),
            },
        }
    }
}

/// Parent links between roles
#[derive(Debug)]
pub struct RoleGraph {
    parents: BTreeMap<RoleId, Vec<RoleId>>,

    /// Role to itself plus all of its ancestors
    closure: DashMap<RoleId, Arc<BTreeSet<RoleId>>>,
}

impl RoleGraph {
    /// Build the graph, rejecting unknown parents and cycles
    pub fn build(parents: BTreeMap<RoleId, Vec<RoleId>>) -> Result<Self, GraphError> {
        for (role, role_parents) in &parents {
            if let Some(parent) = role_parents.iter().find(|parent| !parents.contains_key(*parent)) {
                return Err(GraphError::UnknownParent {
                    role: role.clone(),
                    parent: parent.clone(),
                });
            }
        }

        let graph = Self {
            parents,
            closure: DashMap::new(),
        };
        graph.check_cycles()?;
        Ok(graph)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.parents.contains_key(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleId> {
        self.parents.keys()
    }

    pub fn parents_of(&self, role: &str) -> &[RoleId] {
        self.parents.get(role).map(Vec::as_slice).unwrap_or_default()
    }

    /// The role and every role it inherits from
    pub fn ancestors(&self, role: &str) -> Result<Arc<BTreeSet<RoleId>>, GraphError> {
        if let Some(cached) = self.closure.get(role) {
            return Ok(cached.clone());
        }
        let role_parents = self
            .parents
            .get(role)
            .ok_or_else(|| GraphError::UnknownRole(role.to_string()))?;

        let mut set = BTreeSet::new();
        set.insert(role.to_string());
        for parent in role_parents {
            set.extend(self.ancestors(parent)?.iter().cloned());
        }

        let set = Arc::new(set);
        self.closure.insert(role.to_string(), set.clone());
        Ok(set)
    }

    /// Union of the ancestor sets of `roles`
    pub fn flatten<'a>(&self, roles: impl IntoIterator<Item = &'a RoleId>) -> Result<BTreeSet<RoleId>, GraphError> {
        let mut flattened = BTreeSet::new();
        for role in roles {
            flattened.extend(self.ancestors(role)?.iter().cloned());
        }
        Ok(flattened)
    }

    fn check_cycles(&self) -> Result<(), GraphError> {
        // State: 0 = unvisited, 1 = visiting (gray), 2 = visited (black)
        let mut state: BTreeMap<&str, u8> = self.parents.keys().map(|role| (role.as_str(), 0)).collect();
        let mut path = Vec::new();

        for role in self.parents.keys() {
            if state[role.as_str()] == 0 {
                self.dfs_cycle_detect(role, &mut state, &mut path)?;
            }
        }
        Ok(())
    }

    fn dfs_cycle_detect<'a>(
        &'a self,
        node: &'a str,
        state: &mut BTreeMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        match state.get(node) {
            Some(1) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let cycle: Vec<&str> = path[start..].iter().copied().chain(std::iter::once(node)).collect();
                return Err(GraphError::CircularDependency(cycle.join(" -> ")));
            }
            Some(2) => return Ok(()),
            _ => {}
        }

        state.insert(node, 1);
        path.push(node);

        for parent in self.parents_of(node) {
            self.dfs_cycle_detect(parent, state, path)?;
        }

        state.insert(node, 2);
        path.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> Result<RoleGraph, GraphError> {
        RoleGraph::build(
            edges
                .iter()
                .map(|(role, parents)| (role.to_string(), parents.iter().map(|p| p.to_string()).collect()))
                .collect(),
        )
    }

    #[test]
    fn test_flatten_diamond() {
        let graph = graph(&[
            ("A:Admin", &["A:Editor", "A:Reviewer"]),
            ("A:Editor", &["A:Reader"]),
            ("A:Reviewer", &["A:Reader"]),
            ("A:Reader", &[]),
        ])
        .unwrap();

        let flattened = graph.flatten(&["A:Admin".to_string()]).unwrap();
        assert_eq!(
            flattened.into_iter().collect::<Vec<_>>(),
            vec!["A:Admin", "A:Editor", "A:Reader", "A:Reviewer"]
        );

        let first = graph.ancestors("A:Editor").unwrap();
        let second = graph.ancestors("A:Editor").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cycle_detected() {
        let err = graph(&[("A:One", &["A:Two"]), ("A:Two", &["A:Three"]), ("A:Three", &["A:One"])]).unwrap_err();
        match err {
            GraphError::CircularDependency(path) => {
                assert!(path.contains(" -> "));
                assert_eq!(path.split(" -> ").count(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }

        assert!(matches!(graph(&[("A:Self", &["A:Self"])]), Err(GraphError::CircularDependency(_))));
    }

    #[test]
    fn test_unknown_parent() {
        let err = graph(&[("A:Editor", &["A:Missing"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownParent {
                role: "A:Editor".into(),
                parent: "A:Missing".into()
            }
        );
        assert!(matches!(AuthzError::from(err), AuthzError::UnknownRole { .. }));
    }

    #[test]
    fn test_flatten_unknown_role() {
        let graph = graph(&[("A:Reader", &[])]).unwrap();
        assert_eq!(
            graph.flatten(&["A:Ghost".to_string()]).unwrap_err(),
            GraphError::UnknownRole("A:Ghost".into())
        );
    }
}
