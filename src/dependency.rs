//! Dependency-ordered module initialization.
//!
//! [`order`] takes a list of [`ModuleNode`]s and returns the ids in an order in which every module
//! follows all of the modules it depends on. Each module is assigned a depth: zero for a module
//! with no dependencies, otherwise one more than the deepest of its dependencies. Modules are
//! ordered by depth and then by declaration order, so a given input always produces the same
//! order.
//!
//! If the dependencies contain a cycle, no depth assignment exists and `order` instead diagnoses
//! the cycle by cutting the graph down to the modules that are actually involved:
//!
//! 1. nodes with no incoming or no outgoing edges are removed, repeatedly;
//! 2. every edge that lies on no cycle (its target cannot reach its source) is removed;
//! 3. the two steps repeat until nothing changes, and the remaining graph is split into
//!    connected components.
//!
//! Each component of the resulting [`CycleReport`] lists its modules together with their direct
//! dependencies inside the component.
//!
//! The graph is held as adjacency sets over declaration indexes, never over references, and all
//! iteration follows declaration order.

use crate::error::KernelError;
use crate::hashing::{HashMap, HashMapExt};
use crate::ids::ModuleId;
use indexmap::IndexMap;
use std::collections::{BTreeSet, VecDeque};
use std::fmt::{self, Display};

/// A module and the modules it depends on, used only while computing initialization order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub dependencies: Vec<ModuleId>,
}

impl ModuleNode {
    pub fn new<D: Into<ModuleId>>(
        id: impl Into<ModuleId>,
        dependencies: impl IntoIterator<Item = D>,
    ) -> Self {
        ModuleNode {
            id: id.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// A dependency that names no registered module, with every module that declared it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingDependency {
    pub missing: ModuleId,
    /// In declaration order.
    pub dependents: Vec<ModuleId>,
}

impl Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "module {} is not registered but is required by ", self.missing)?;
        for (i, dependent) in self.dependents.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dependent}")?;
        }
        Ok(())
    }
}

/// One set of modules that depend on each other circularly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleComponent {
    /// Each module in the component, in declaration order, with its dependencies inside the
    /// component.
    pub modules: Vec<(ModuleId, Vec<ModuleId>)>,
}

impl CycleComponent {
    pub fn module_ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.modules.iter().map(|(id, _)| id)
    }
}

/// The minimal sets of modules involved in dependency cycles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub components: Vec<CycleComponent>,
}

impl CycleReport {
    /// Every module involved in some cycle, in declaration order within each component.
    #[must_use]
    pub fn involved_modules(&self) -> Vec<ModuleId> {
        self.components
            .iter()
            .flat_map(|component| component.module_ids().cloned())
            .collect()
    }
}

impl Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("circular module dependencies:")?;
        for (i, component) in self.components.iter().enumerate() {
            write!(f, " [cycle {}:", i + 1)?;
            for (id, dependencies) in &component.modules {
                write!(f, " {id} -> {{")?;
                for (j, dependency) in dependencies.iter().enumerate() {
                    if j > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{dependency}")?;
                }
                f.write_str("}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Computes an initialization order in which every module follows its dependencies.
///
/// # Errors
/// * `DuplicateModule` if an id is declared twice;
/// * `MissingModuleDependency` listing every unregistered dependency (in the order first
///   declared) with the modules that need it;
/// * `CircularModuleDependency` with a [`CycleReport`] if no order exists.
pub fn order(nodes: &[ModuleNode]) -> Result<Vec<ModuleId>, KernelError> {
    let graph = DependencyGraph::build(nodes)?;
    match graph.depths() {
        Some(depths) => {
            let mut indexes: Vec<usize> = (0..nodes.len()).collect();
            indexes.sort_by_key(|&i| (depths[i], i));
            Ok(indexes.into_iter().map(|i| nodes[i].id.clone()).collect())
        }
        None => Err(KernelError::CircularModuleDependency(
            graph.cycle_report(nodes),
        )),
    }
}

/// Adjacency sets over declaration indexes. An edge runs from a dependent to its dependency.
struct DependencyGraph {
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    fn build(nodes: &[ModuleNode]) -> Result<DependencyGraph, KernelError> {
        let mut index: HashMap<&ModuleId, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(&node.id, i).is_some() {
                return Err(KernelError::DuplicateModule(node.id.clone()));
            }
        }

        let mut missing: IndexMap<&ModuleId, Vec<ModuleId>> = IndexMap::new();
        let mut dependencies = vec![BTreeSet::new(); nodes.len()];
        let mut dependents = vec![BTreeSet::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dependency in &node.dependencies {
                match index.get(dependency) {
                    Some(&j) => {
                        dependencies[i].insert(j);
                        dependents[j].insert(i);
                    }
                    None => missing.entry(dependency).or_default().push(node.id.clone()),
                }
            }
        }
        if !missing.is_empty() {
            let missing = missing
                .into_iter()
                .map(|(missing, dependents)| MissingDependency {
                    missing: missing.clone(),
                    dependents,
                })
                .collect();
            return Err(KernelError::MissingModuleDependency(missing));
        }

        Ok(DependencyGraph {
            dependencies,
            dependents,
        })
    }

    /// Assigns each node `1 + max(depth of its dependencies)`, or returns `None` if some node
    /// sits on or behind a cycle.
    fn depths(&self) -> Option<Vec<usize>> {
        let n = self.dependencies.len();
        let mut depths = vec![0; n];
        let mut unresolved: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| unresolved[i] == 0).collect();
        let mut resolved = 0;

        while let Some(node) = ready.pop_front() {
            resolved += 1;
            for &dependent in &self.dependents[node] {
                depths[dependent] = depths[dependent].max(depths[node] + 1);
                unresolved[dependent] -= 1;
                if unresolved[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        (resolved == n).then_some(depths)
    }

    fn cycle_report(&self, nodes: &[ModuleNode]) -> CycleReport {
        let mut out = self.dependencies.clone();
        let mut inc = self.dependents.clone();
        let mut alive = vec![true; out.len()];

        loop {
            let mut changed = false;

            // Sources and sinks cannot be on a cycle.
            let mut pruned = true;
            while pruned {
                pruned = false;
                for node in 0..out.len() {
                    if alive[node] && (out[node].is_empty() || inc[node].is_empty()) {
                        for &target in &out[node] {
                            inc[target].remove(&node);
                        }
                        for &source in &inc[node] {
                            out[source].remove(&node);
                        }
                        out[node].clear();
                        inc[node].clear();
                        alive[node] = false;
                        pruned = true;
                        changed = true;
                    }
                }
            }

            // An edge lies on a cycle only if its target can reach its source.
            for node in 0..out.len() {
                if !alive[node] {
                    continue;
                }
                let acyclic: Vec<usize> = out[node]
                    .iter()
                    .copied()
                    .filter(|&target| !reaches(&out, target, node))
                    .collect();
                for target in acyclic {
                    out[node].remove(&target);
                    inc[target].remove(&node);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        let components = weak_components(&out, &inc, &alive)
            .into_iter()
            .map(|members| CycleComponent {
                modules: members
                    .into_iter()
                    .map(|node| {
                        let dependencies = out[node]
                            .iter()
                            .map(|&dependency| nodes[dependency].id.clone())
                            .collect();
                        (nodes[node].id.clone(), dependencies)
                    })
                    .collect(),
            })
            .collect();

        CycleReport { components }
    }
}

fn reaches(out: &[BTreeSet<usize>], from: usize, to: usize) -> bool {
    let mut visited = vec![false; out.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if visited[node] {
            continue;
        }
        visited[node] = true;
        stack.extend(out[node].iter().copied().filter(|&next| !visited[next]));
    }
    false
}

/// Partitions the live nodes into weakly connected components. Components are ordered by their
/// first-declared member and members by declaration order.
fn weak_components(
    out: &[BTreeSet<usize>],
    inc: &[BTreeSet<usize>],
    alive: &[bool],
) -> Vec<Vec<usize>> {
    let mut component_of: Vec<Option<usize>> = vec![None; out.len()];
    let mut components: Vec<Vec<usize>> = Vec::new();
    for start in 0..out.len() {
        if !alive[start] || component_of[start].is_some() {
            continue;
        }
        let id = components.len();
        let mut members = Vec::new();
        let mut stack = vec![start];
        component_of[start] = Some(id);
        while let Some(node) = stack.pop() {
            members.push(node);
            for &next in out[node].iter().chain(inc[node].iter()) {
                if component_of[next].is_none() {
                    component_of[next] = Some(id);
                    stack.push(next);
                }
            }
        }
        members.sort_unstable();
        components.push(members);
    }
    components
}
