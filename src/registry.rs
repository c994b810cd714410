//! Work type registry.
//!
//! Populated once at startup, then shared read-only as `Arc<Registry>`.
//! Registration validates ids and the dependency graph so the scheduler
//! never has to.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::work::WorkType;

#[derive(Debug, Default)]
pub struct Registry {
    /// Registration order.
    types: Vec<WorkType>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one work type. Its dependencies must already be registered.
    pub fn register(&mut self, work_type: WorkType) -> Result<()> {
        self.register_all(vec![work_type])
    }

    /// Register a batch atomically. Dependencies may point forward within the
    /// batch; nothing is registered if any entry is invalid.
    pub fn register_all(&mut self, batch: Vec<WorkType>) -> Result<()> {
        let mut batch_ids: HashSet<&str> = HashSet::new();
        for wt in &batch {
            if self.index.contains_key(&wt.id) || !batch_ids.insert(wt.id.as_str()) {
                return Err(Error::DuplicateWorkType(wt.id.clone()));
            }
        }

        for wt in &batch {
            for dep in &wt.depends_on {
                if !self.index.contains_key(dep) && !batch_ids.contains(dep.as_str()) {
                    return Err(Error::UnknownDependency {
                        work_type: wt.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Existing entries were acyclic when registered and can't point at the
        // batch, so any cycle runs through a batch entry.
        let deps: HashMap<&str, &[String]> = self
            .types
            .iter()
            .chain(batch.iter())
            .map(|wt| (wt.id.as_str(), wt.depends_on.as_slice()))
            .collect();
        for wt in &batch {
            if let Some(cycle) = find_cycle(&deps, &wt.id) {
                return Err(Error::CircularDependency(cycle));
            }
        }

        for wt in batch {
            debug!(work_type = %wt.id, priority = %wt.priority, "registered work type");
            self.index.insert(wt.id.clone(), self.types.len());
            self.types.push(wt);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkType> {
        self.index.get(id).map(|&i| &self.types[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All work types, Critical first, ties in registration order.
    pub fn all(&self) -> Vec<&WorkType> {
        let mut all: Vec<&WorkType> = self.types.iter().collect();
        // Stable sort keeps registration order within a priority.
        all.sort_by_key(|wt| wt.priority);
        all
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Depth-first search for a dependency path from `start` back to itself.
fn find_cycle(deps: &HashMap<&str, &[String]>, start: &str) -> Option<Vec<String>> {
    fn visit<'a>(
        deps: &HashMap<&'a str, &'a [String]>,
        node: &'a str,
        start: &str,
        path: &mut Vec<&'a str>,
        seen: &mut HashSet<&'a str>,
    ) -> bool {
        let Some(&edges) = deps.get(node) else {
            return false;
        };
        for dep in edges {
            if dep == start {
                path.push(dep.as_str());
                return true;
            }
            if seen.insert(dep.as_str()) {
                path.push(dep.as_str());
                if visit(deps, dep.as_str(), start, path, seen) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let (&key, _) = deps.get_key_value(start)?;
    let mut path = vec![key];
    let mut seen = HashSet::new();
    if visit(deps, key, start, &mut path, &mut seen) {
        Some(path.into_iter().map(str::to_string).collect())
    } else {
        None
    }
}
