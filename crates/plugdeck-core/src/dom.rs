use std::sync::{Mutex, PoisonError};

use crate::error::DomError;

/// Opaque handle to one element node. Ids are never reused, so a handle to a
/// removed node stays detectable as detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    tag: String,
    attributes: Vec<(String, String)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// The document collaborator: a tree of element nodes supporting creation
/// with attributes, appending under a parent, and prompt removal.
#[derive(Debug)]
pub struct Document {
    nodes: Mutex<Vec<Option<Node>>>,
}

impl Document {
    /// Creates an empty document holding only the root node.
    pub fn new() -> Self {
        let root = Node {
            tag: "#document".to_string(),
            attributes: Vec::new(),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: Mutex::new(vec![Some(root)]),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Creates an element of `tag`, applies `attrs` as string attributes,
    /// and appends it to `parent`.
    pub fn insert_element(
        &self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Result<NodeId, DomError> {
        let mut nodes = self.lock();
        if !alive(&nodes, parent) {
            return Err(DomError::Detached);
        }
        let id = NodeId(nodes.len());
        nodes.push(Some(Node {
            tag: tag.to_string(),
            attributes: attrs
                .iter()
                .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
                .collect(),
            parent: Some(parent),
            children: Vec::new(),
        }));
        if let Some(parent_node) = nodes[parent.0].as_mut() {
            parent_node.children.push(id);
        }
        Ok(id)
    }

    /// Detaches `node` from its parent and drops the whole subtree.
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let mut nodes = self.lock();
        if !alive(&nodes, node) {
            return Err(DomError::Detached);
        }
        if let Some(parent) = nodes[node.0].as_ref().and_then(|n| n.parent) {
            if let Some(parent_node) = nodes[parent.0].as_mut() {
                parent_node.children.retain(|child| *child != node);
            }
        }
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(removed) = nodes[current.0].take() {
                stack.extend(removed.children);
            }
        }
        Ok(())
    }

    pub fn children(&self, parent: NodeId) -> Result<Vec<NodeId>, DomError> {
        let nodes = self.lock();
        nodes
            .get(parent.0)
            .and_then(|slot| slot.as_ref())
            .map(|node| node.children.clone())
            .ok_or(DomError::Detached)
    }

    pub fn tag(&self, node: NodeId) -> Result<String, DomError> {
        let nodes = self.lock();
        nodes
            .get(node.0)
            .and_then(|slot| slot.as_ref())
            .map(|n| n.tag.clone())
            .ok_or(DomError::Detached)
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Result<Option<String>, DomError> {
        let nodes = self.lock();
        nodes
            .get(node.0)
            .and_then(|slot| slot.as_ref())
            .map(|n| {
                n.attributes
                    .iter()
                    .find(|(attr, _)| attr == name)
                    .map(|(_, value)| value.clone())
            })
            .ok_or(DomError::Detached)
    }

    pub fn contains(&self, parent: NodeId, node: NodeId) -> bool {
        let nodes = self.lock();
        nodes
            .get(parent.0)
            .and_then(|slot| slot.as_ref())
            .map(|n| n.children.contains(&node))
            .unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Option<Node>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn alive(nodes: &[Option<Node>], node: NodeId) -> bool {
    nodes.get(node.0).map(Option::is_some).unwrap_or(false)
}
