//! Validated task graph.
//!
//! [`GraphLoader`] turns a nested [`TaskDefinition`] tree into a
//! [`TaskGraph`]: an immutable DAG of [`TaskNode`]s whose leaf tasks carry
//! normalised prerequisites and a stable 1-based index.
//!
//! Normalisation pushes composite prerequisites down to every leaf beneath
//! the composite, and expands a prerequisite that names a composite into all
//! of that composite's leaves. Readiness can then be decided per leaf by
//! looking only at other leaves.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use super::definition::TaskDefinition;
use super::types::TaskId;

/// Errors raised while loading a task graph.
///
/// Every variant is fatal and is returned before any task starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node violates the task-file shape rules.
    #[error("invalid task '{task}': {reason}")]
    InvalidTask { task: String, reason: String },

    /// Two tasks share a name.
    #[error("the name '{0}' is used by more than one task")]
    DuplicateTask(TaskId),

    /// A prerequisite does not name any task.
    #[error("task '{task}' has prerequisite '{prerequisite}', which does not exist")]
    MissingPrerequisite { task: TaskId, prerequisite: TaskId },

    /// A task lists itself as a prerequisite.
    #[error("task '{0}' lists itself as a prerequisite")]
    SelfPrerequisite(TaskId),

    /// The graph contains a cycle. The path starts and ends on the same task.
    #[error("the task graph contains a cycle: {}", format_path(.0))]
    CycleDetected(Vec<TaskId>),

    /// A description references a placeholder with no value.
    #[error("task '{task}' uses unknown placeholder '{key}'")]
    UnknownPlaceholder { task: TaskId, key: String },

    /// A description has a malformed or self-referencing placeholder.
    #[error("task '{task}' has an invalid placeholder: {reason}")]
    InvalidPlaceholder { task: TaskId, reason: String },
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Values substituted for `%{KEY}%` in leaf descriptions.
///
/// Values may themselves contain placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: HashMap<String, String>,
}

#[derive(Debug)]
enum PlaceholderError {
    Unknown(String),
    Mismatched(&'static str),
    Recursive(String),
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add one value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn fill(&self, text: &str) -> Result<String, PlaceholderError> {
        self.fill_with(text, &mut Vec::new())
    }

    fn fill_with(&self, text: &str, history: &mut Vec<String>) -> Result<String, PlaceholderError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            match (rest.find("%{"), rest.find("}%")) {
                (None, None) => {
                    out.push_str(rest);
                    return Ok(out);
                }
                (Some(_), None) => return Err(PlaceholderError::Mismatched("%{")),
                (None, Some(_)) => return Err(PlaceholderError::Mismatched("}%")),
                (Some(start), Some(end)) if end < start => {
                    return Err(PlaceholderError::Mismatched("}%"));
                }
                (Some(start), Some(end)) => {
                    out.push_str(&rest[..start]);
                    let key = &rest[start + 2..end];
                    let value = self
                        .values
                        .get(key)
                        .ok_or_else(|| PlaceholderError::Unknown(key.to_string()))?;
                    if history.iter().any(|k| k == key) {
                        return Err(PlaceholderError::Recursive(key.to_string()));
                    }
                    history.push(key.to_string());
                    out.push_str(&self.fill_with(value, history)?);
                    history.pop();
                    rest = &rest[end + 2..];
                }
            }
        }
    }
}

impl From<HashMap<String, String>> for Placeholders {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// A task in a loaded graph.
#[derive(Debug, Clone)]
pub struct TaskNode {
    id: TaskId,
    description: Option<String>,
    prerequisites: Vec<TaskId>,
    effective_prerequisites: BTreeSet<TaskId>,
    parent: Option<TaskId>,
    children: Vec<TaskId>,
    leaves: Vec<TaskId>,
    automation_only: bool,
    index: Option<usize>,
    depth: usize,
}

impl TaskNode {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Manual instructions, with placeholders filled. `None` for composites.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Prerequisites exactly as declared on this node.
    pub fn prerequisites(&self) -> &[TaskId] {
        &self.prerequisites
    }

    /// Leaf tasks that must be terminal before this task may start.
    ///
    /// Includes prerequisites inherited from ancestors, with composites
    /// expanded to their leaves.
    pub fn effective_prerequisites(&self) -> &BTreeSet<TaskId> {
        &self.effective_prerequisites
    }

    pub fn parent(&self) -> Option<&TaskId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    /// Leaf descendants in declaration order. A leaf lists only itself.
    pub fn leaves(&self) -> &[TaskId] {
        &self.leaves
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn automation_only(&self) -> bool {
        self.automation_only
    }

    /// 1-based position in execution order. `None` for composites.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Nesting depth; the root is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// An immutable, validated task graph.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<TaskId, TaskNode>,
    /// All tasks, pre-order.
    declared: Vec<TaskId>,
    /// Leaf tasks, index order.
    leaves: Vec<TaskId>,
}

impl TaskGraph {
    pub fn root(&self) -> &TaskNode {
        &self.nodes[&self.declared[0]]
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a loaded graph.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every task, in declaration order (parents before children).
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.declared.iter().map(|id| &self.nodes[id])
    }

    /// Leaf tasks in index order.
    pub fn leaves(&self) -> impl Iterator<Item = &TaskNode> {
        self.leaves.iter().map(|id| &self.nodes[id])
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn children(&self, id: &TaskId) -> &[TaskId] {
        self.nodes.get(id).map(|n| n.children()).unwrap_or(&[])
    }

    pub fn parent(&self, id: &TaskId) -> Option<&TaskId> {
        self.nodes.get(id).and_then(|n| n.parent())
    }

    /// Enclosing composites, nearest first.
    pub fn ancestors(&self, id: &TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            result.push(parent.clone());
            current = self.parent(parent);
        }
        result
    }

    pub fn effective_prerequisites(&self, id: &TaskId) -> Option<&BTreeSet<TaskId>> {
        self.nodes.get(id).map(|n| n.effective_prerequisites())
    }
}

/// Validates task definitions and builds [`TaskGraph`]s.
#[derive(Debug, Clone, Default)]
pub struct GraphLoader {
    placeholders: Placeholders,
}

struct Flat<'a> {
    def: &'a TaskDefinition,
    id: TaskId,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
}

impl GraphLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set placeholder values for descriptions.
    pub fn with_placeholders(mut self, placeholders: impl Into<Placeholders>) -> Self {
        self.placeholders = placeholders.into();
        self
    }

    /// Validate `root` and build its graph.
    ///
    /// Checks run in this order: node shape, duplicate names, missing
    /// prerequisites, self-prerequisites, cycles through the parent and
    /// prerequisite relations, cycles among leaves after normalisation,
    /// placeholders.
    pub fn load(&self, root: &TaskDefinition) -> Result<TaskGraph, GraphError> {
        let mut flat = Vec::new();
        flatten(root, None, 0, &mut flat);

        for node in &flat {
            node.def.validate_shape()?;
        }

        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(flat.len());
        for (i, node) in flat.iter().enumerate() {
            if positions.insert(node.id.as_str(), i).is_some() {
                return Err(GraphError::DuplicateTask(node.id.clone()));
            }
        }

        let mut prereqs: Vec<Vec<usize>> = Vec::with_capacity(flat.len());
        for node in &flat {
            let mut resolved = Vec::new();
            for p in node.def.trimmed_prerequisites() {
                let Some(&pos) = positions.get(p) else {
                    return Err(GraphError::MissingPrerequisite {
                        task: node.id.clone(),
                        prerequisite: TaskId::new(p),
                    });
                };
                resolved.push(pos);
            }
            prereqs.push(resolved);
        }

        for (i, node) in flat.iter().enumerate() {
            if prereqs[i].contains(&i) {
                return Err(GraphError::SelfPrerequisite(node.id.clone()));
            }
        }

        // Union graph: a task cannot finish before its subtasks or its prerequisites.
        let union: Vec<Vec<usize>> = flat
            .iter()
            .enumerate()
            .map(|(i, node)| {
                node.children
                    .iter()
                    .chain(prereqs[i].iter())
                    .copied()
                    .collect()
            })
            .collect();
        if let Some(cycle) = find_cycle(&union) {
            return Err(cycle_error(&flat, cycle));
        }

        let leaf_sets = leaf_descendants(&flat);
        let effective = normalise_prerequisites(&flat, &prereqs, &leaf_sets);
        let order = sort_leaves(&flat, &effective)?;

        let mut descriptions = Vec::with_capacity(flat.len());
        for node in &flat {
            let description = match &node.def.description {
                Some(text) if node.def.is_leaf() => Some(self.fill(&node.id, text.trim())?),
                _ => None,
            };
            descriptions.push(description);
        }

        let mut index_of = vec![None; flat.len()];
        for (i, &pos) in order.iter().enumerate() {
            index_of[pos] = Some(i + 1);
        }

        let mut nodes = HashMap::with_capacity(flat.len());
        for (i, (node, description)) in flat.iter().zip(descriptions).enumerate() {
            let task = TaskNode {
                id: node.id.clone(),
                description,
                prerequisites: ids(&flat, &prereqs[i]),
                effective_prerequisites: effective[i].iter().map(|&p| flat[p].id.clone()).collect(),
                parent: node.parent.map(|p| flat[p].id.clone()),
                children: ids(&flat, &node.children),
                leaves: ids(&flat, &leaf_sets[i]),
                automation_only: node.def.automation_only,
                index: index_of[i],
                depth: node.depth,
            };
            nodes.insert(task.id.clone(), task);
        }

        Ok(TaskGraph {
            nodes,
            declared: flat.iter().map(|n| n.id.clone()).collect(),
            leaves: ids(&flat, &order),
        })
    }

    fn fill(&self, task: &TaskId, text: &str) -> Result<String, GraphError> {
        self.placeholders.fill(text).map_err(|e| match e {
            PlaceholderError::Unknown(key) => GraphError::UnknownPlaceholder {
                task: task.clone(),
                key,
            },
            PlaceholderError::Mismatched(token) => GraphError::InvalidPlaceholder {
                task: task.clone(),
                reason: format!("mismatched '{}'", token),
            },
            PlaceholderError::Recursive(key) => GraphError::InvalidPlaceholder {
                task: task.clone(),
                reason: format!("placeholder '{}' refers to itself", key),
            },
        })
    }
}

fn ids(flat: &[Flat<'_>], positions: &[usize]) -> Vec<TaskId> {
    positions.iter().map(|&i| flat[i].id.clone()).collect()
}

fn flatten<'a>(
    def: &'a TaskDefinition,
    parent: Option<usize>,
    depth: usize,
    out: &mut Vec<Flat<'a>>,
) {
    let pos = out.len();
    out.push(Flat {
        def,
        id: TaskId::new(def.trimmed_name()),
        parent,
        children: Vec::new(),
        depth,
    });
    if let Some(parent) = parent {
        out[parent].children.push(pos);
    }
    for sub in &def.subtasks {
        flatten(sub, Some(pos), depth + 1, out);
    }
}

/// Leaf descendants of every node, in declaration order.
fn leaf_descendants(flat: &[Flat<'_>]) -> Vec<Vec<usize>> {
    let mut sets: Vec<Vec<usize>> = vec![Vec::new(); flat.len()];
    // Pre-order: children always come after their parent.
    for i in (0..flat.len()).rev() {
        if flat[i].children.is_empty() {
            sets[i] = vec![i];
        } else {
            sets[i] = flat[i].children.iter().flat_map(|&c| sets[c].clone()).collect();
        }
    }
    sets
}

/// Own plus inherited prerequisites, expanded to leaves.
fn normalise_prerequisites(
    flat: &[Flat<'_>],
    prereqs: &[Vec<usize>],
    leaf_sets: &[Vec<usize>],
) -> Vec<BTreeSet<usize>> {
    let mut combined: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); flat.len()];
    for i in 0..flat.len() {
        let mut set: BTreeSet<usize> = prereqs[i].iter().copied().collect();
        if let Some(parent) = flat[i].parent {
            set.extend(combined[parent].iter().copied());
        }
        combined[i] = set;
    }
    combined
        .into_iter()
        .map(|set| set.into_iter().flat_map(|p| leaf_sets[p].iter().copied()).collect())
        .collect()
}

/// Order leaves so every task comes after its prerequisites, keeping as
/// close to declaration order as possible.
fn sort_leaves(
    flat: &[Flat<'_>],
    effective: &[BTreeSet<usize>],
) -> Result<Vec<usize>, GraphError> {
    let mut remaining: Vec<usize> = (0..flat.len())
        .filter(|&i| flat[i].children.is_empty())
        .collect();
    let mut placed: HashSet<usize> = HashSet::with_capacity(remaining.len());
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|&leaf| effective[leaf].iter().all(|p| placed.contains(p)));
        match next {
            Some(pos) => {
                let leaf = remaining.remove(pos);
                placed.insert(leaf);
                order.push(leaf);
            }
            None => {
                let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); flat.len()];
                for &leaf in &remaining {
                    adjacency[leaf] = effective[leaf]
                        .iter()
                        .copied()
                        .filter(|p| !placed.contains(p))
                        .collect();
                }
                let cycle = find_cycle(&adjacency).unwrap_or_else(|| remaining.clone());
                return Err(cycle_error(flat, cycle));
            }
        }
    }
    Ok(order)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Finished,
}

/// Depth-first search with a recursion stack. Returns the nodes of one cycle.
fn find_cycle(adjacency: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; adjacency.len()];
    let mut stack = Vec::new();
    (0..adjacency.len()).find_map(|start| {
        if marks[start] == Mark::Unvisited {
            visit(start, adjacency, &mut marks, &mut stack)
        } else {
            None
        }
    })
}

fn visit(
    node: usize,
    adjacency: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    marks[node] = Mark::OnStack;
    stack.push(node);
    for &next in &adjacency[node] {
        match marks[next] {
            Mark::OnStack => {
                let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                return Some(stack[from..].to_vec());
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, adjacency, marks, stack) {
                    return Some(cycle);
                }
            }
            Mark::Finished => {}
        }
    }
    stack.pop();
    marks[node] = Mark::Finished;
    None
}

/// Build a cycle error whose path starts at the smallest name and loops back to it.
fn cycle_error(flat: &[Flat<'_>], cycle: Vec<usize>) -> GraphError {
    let mut path: Vec<TaskId> = cycle.into_iter().map(|i| flat[i].id.clone()).collect();
    if let Some(min) = (0..path.len()).min_by(|&a, &b| path[a].cmp(&path[b])) {
        path.rotate_left(min);
    }
    if let Some(first) = path.first().cloned() {
        path.push(first);
    }
    GraphError::CycleDetected(path)
}
