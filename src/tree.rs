use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Machine,
    Command,
    Terminal,
}

impl NodeKind {
    pub fn is_process(self) -> bool {
        matches!(self, NodeKind::Command | NodeKind::Terminal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessNode {
    pub id: String,
    pub kind: NodeKind,
    pub parent_id: Option<String>,
    pub display_name: String,
}

impl ProcessNode {
    pub fn machine(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Machine,
            parent_id: None,
            display_name: display_name.into(),
        }
    }

    pub fn process(
        id: impl Into<String>,
        kind: NodeKind,
        parent_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            parent_id: Some(parent_id.into()),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug)]
pub enum TreeError {
    DuplicateId {
        node_id: String,
    },
    OrphanNode {
        node_id: String,
        parent_id: Option<String>,
    },
    UnexpectedParent {
        node_id: String,
    },
    NotFound {
        node_id: String,
    },
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::DuplicateId { node_id } => {
                write!(f, "node id `{node_id}` already present in the tree")
            }
            TreeError::OrphanNode { node_id, parent_id } => match parent_id {
                Some(parent_id) => write!(
                    f,
                    "node `{node_id}` references parent `{parent_id}` which is not a machine node"
                ),
                None => write!(f, "node `{node_id}` requires a machine parent"),
            },
            TreeError::UnexpectedParent { node_id } => {
                write!(f, "machine node `{node_id}` must not have a parent")
            }
            TreeError::NotFound { node_id } => write!(f, "no node with id `{node_id}`"),
            TreeError::IndexOutOfRange { index, len } => {
                write!(f, "node index {index} out of range for tree of {len} nodes")
            }
        }
    }
}

impl std::error::Error for TreeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSubtree {
    pub node: ProcessNode,
    pub removed_children: Vec<ProcessNode>,
}

/// Ordered forest of machine nodes and their command/terminal children.
///
/// A single arena keyed by id is the only store; the flattened depth-first
/// order (each machine followed by its children, everything in insertion
/// order) and all index lookups are derived from it, so a failed mutation
/// can never leave a partially updated index behind.
#[derive(Debug, Default)]
pub struct ProcessTree {
    nodes: IndexMap<String, ProcessNode>,
    selected: Option<String>,
}

impl ProcessTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ProcessNode) -> Result<(), TreeError> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::DuplicateId {
                node_id: node.id.clone(),
            });
        }
        match node.kind {
            NodeKind::Machine => {
                if node.parent_id.is_some() {
                    return Err(TreeError::UnexpectedParent {
                        node_id: node.id.clone(),
                    });
                }
            }
            NodeKind::Command | NodeKind::Terminal => {
                let parent_is_machine = node
                    .parent_id
                    .as_deref()
                    .and_then(|parent_id| self.nodes.get(parent_id))
                    .is_some_and(|parent| parent.kind == NodeKind::Machine);
                if !parent_is_machine {
                    return Err(TreeError::OrphanNode {
                        node_id: node.id.clone(),
                        parent_id: node.parent_id.clone(),
                    });
                }
            }
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Removes the node; a machine node takes its children with it, returned
    /// in index order so the caller can release their processes and sinks.
    pub fn remove_node(&mut self, node_id: &str) -> Result<RemovedSubtree, TreeError> {
        let Some(node) = self.nodes.get(node_id).cloned() else {
            return Err(TreeError::NotFound {
                node_id: node_id.to_owned(),
            });
        };
        let mut removed_children = Vec::new();
        if node.kind == NodeKind::Machine {
            let child_ids = self
                .nodes
                .values()
                .filter(|candidate| candidate.parent_id.as_deref() == Some(node_id))
                .map(|candidate| candidate.id.clone())
                .collect::<Vec<String>>();
            for child_id in child_ids {
                if let Some(child) = self.nodes.shift_remove(&child_id) {
                    self.drop_selection_of(&child.id);
                    removed_children.push(child);
                }
            }
        }
        self.nodes.shift_remove(node_id);
        self.drop_selection_of(node_id);
        Ok(RemovedSubtree {
            node,
            removed_children,
        })
    }

    pub fn find_by_id(&self, node_id: &str) -> Result<&ProcessNode, TreeError> {
        self.nodes.get(node_id).ok_or_else(|| TreeError::NotFound {
            node_id: node_id.to_owned(),
        })
    }

    pub fn get(&self, node_id: &str) -> Option<&ProcessNode> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn find_by_index(&self, index: usize) -> Result<&ProcessNode, TreeError> {
        let flattened = self.flattened();
        let len = flattened.len();
        flattened
            .into_iter()
            .nth(index)
            .ok_or(TreeError::IndexOutOfRange { index, len })
    }

    pub fn index_of(&self, node_id: &str) -> Option<usize> {
        self.flattened()
            .iter()
            .position(|node| node.id == node_id)
    }

    /// Depth-first order: each machine node in insertion order, immediately
    /// followed by its children in insertion order.
    pub fn flattened(&self) -> Vec<&ProcessNode> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        for machine in self
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::Machine)
        {
            ordered.push(machine);
            ordered.extend(
                self.nodes
                    .values()
                    .filter(|node| node.parent_id.as_deref() == Some(machine.id.as_str())),
            );
        }
        ordered
    }

    pub fn machine_nodes(&self) -> Vec<&ProcessNode> {
        self.nodes
            .values()
            .filter(|node| node.kind == NodeKind::Machine)
            .collect()
    }

    pub fn children_of(&self, machine_id: &str) -> Vec<&ProcessNode> {
        self.nodes
            .values()
            .filter(|node| node.parent_id.as_deref() == Some(machine_id))
            .collect()
    }

    /// Selection must be validated by the caller; an unknown id leaves the
    /// current selection untouched and reports `false`.
    pub fn select(&mut self, node_id: &str) -> bool {
        if !self.nodes.contains_key(node_id) {
            return false;
        }
        self.selected = Some(node_id.to_owned());
        true
    }

    pub fn clear_selection(&mut self) -> Option<String> {
        self.selected.take()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.selected = None;
    }

    fn drop_selection_of(&mut self, node_id: &str) {
        if self.selected.as_deref() == Some(node_id) {
            self.selected = None;
        }
    }
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
