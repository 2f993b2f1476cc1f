use crate::error::{EngineError, Result};

use super::xml::{XmlEvent, XmlPart};

pub type NodeId = usize;

/// One element of an XML part. `start`/`end` index into `XmlPart::events`; for an empty
/// element both point at the same `Empty` event.
#[derive(Clone, Debug)]
pub struct ElementNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub start: usize,
    pub end: usize,
}

impl ElementNode {
    pub fn is_empty_element(&self) -> bool {
        self.start == self.end
    }
}

/// Element arena over a parsed part. Nodes hold indices, never references, so the event list
/// can be edited and the tree rebuilt by a plain recomputation pass.
#[derive(Clone, Debug, Default)]
pub struct DocTree {
    nodes: Vec<ElementNode>,
    roots: Vec<NodeId>,
}

impl DocTree {
    pub fn build(part: &XmlPart) -> Result<Self> {
        let mut tree = DocTree::default();
        let mut stack: Vec<NodeId> = Vec::new();

        for (idx, ev) in part.events.iter().enumerate() {
            match ev {
                XmlEvent::Start { name, .. } => {
                    let id = tree.add(stack.last().copied(), name, idx, idx);
                    stack.push(id);
                }
                XmlEvent::Empty { name, .. } => {
                    tree.add(stack.last().copied(), name, idx, idx);
                }
                XmlEvent::End { name } => {
                    let id = stack.pop().ok_or_else(|| {
                        EngineError::malformed(format!("{}: stray </{name}> at event {idx}", part.name))
                    })?;
                    if tree.nodes[id].name != *name {
                        return Err(EngineError::malformed(format!(
                            "{}: </{name}> closes <{}>",
                            part.name, tree.nodes[id].name
                        )));
                    }
                    tree.nodes[id].end = idx;
                }
                _ => {}
            }
        }
        if let Some(&open) = stack.last() {
            return Err(EngineError::malformed(format!(
                "{}: <{}> never closed",
                part.name, tree.nodes[open].name
            )));
        }
        Ok(tree)
    }

    fn add(&mut self, parent: Option<NodeId>, name: &str, start: usize, end: usize) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ElementNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            start,
            end,
        });
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn node(&self, id: NodeId) -> &ElementNode {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First element with this name in document order.
    pub fn find_first(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn children_named<'a>(&'a self, id: NodeId, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(move |c| self.nodes[*c].name == name)
    }

    pub fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children_named(id, name).next()
    }

    /// Concatenated `Text` events directly inside the element.
    pub fn direct_text(&self, part: &XmlPart, id: NodeId) -> String {
        let n = &self.nodes[id];
        if n.is_empty_element() {
            return String::new();
        }
        let mut out = String::new();
        let mut depth = 0usize;
        for ev in &part.events[n.start + 1..n.end] {
            match ev {
                XmlEvent::Start { .. } => depth += 1,
                XmlEvent::End { .. } => depth = depth.saturating_sub(1),
                XmlEvent::Text { text } if depth == 0 => out.push_str(text),
                XmlEvent::CData { text } if depth == 0 => out.push_str(text),
                _ => {}
            }
        }
        out
    }
}
