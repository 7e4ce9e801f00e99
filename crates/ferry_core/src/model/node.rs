use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ContentProperty, ModelError, NodePattern};

/// Position of a node inside a tree, as child indices from the root.
///
/// The empty location is the root itself. Ordering of locations is document
/// (pre-)order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeLocation(pub Vec<usize>);

impl NodeLocation {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

/// One node of a content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeRepr", into = "NodeRepr")]
pub struct ContentNode {
    name: String,
    primary_type: String,
    properties: Vec<ContentProperty>,
    children: Vec<ContentNode>,
}

impl ContentNode {
    pub fn new(name: impl Into<String>, primary_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_type: primary_type.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style property setter, replacing any property of the same name.
    pub fn with_property(mut self, property: ContentProperty) -> Self {
        self.set_property(property);
        self
    }

    pub fn with_child(mut self, child: ContentNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn primary_type(&self) -> &str {
        &self.primary_type
    }

    pub fn properties(&self) -> &[ContentProperty] {
        &self.properties
    }

    pub fn children(&self) -> &[ContentNode] {
        &self.children
    }

    pub(crate) fn properties_mut(&mut self) -> &mut [ContentProperty] {
        &mut self.properties
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<ContentNode> {
        &mut self.children
    }

    pub fn property(&self, name: &str) -> Option<&ContentProperty> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut ContentProperty> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Set a property, replacing an existing one in place or appending.
    pub fn set_property(&mut self, property: ContentProperty) {
        match self
            .properties
            .iter_mut()
            .find(|p| p.name() == property.name())
        {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    pub fn remove_property(&mut self, name: &str) -> Option<ContentProperty> {
        let index = self.properties.iter().position(|p| p.name() == name)?;
        Some(self.properties.remove(index))
    }

    pub fn add_child(&mut self, child: ContentNode) {
        self.children.push(child);
    }

    /// Keep only the properties for which `keep` returns true.
    pub fn retain_properties(&mut self, mut keep: impl FnMut(&ContentProperty) -> bool) {
        self.properties.retain(|p| keep(p));
    }

    /// Keep only the children for which `keep` returns true.
    pub fn retain_children(&mut self, mut keep: impl FnMut(&ContentNode) -> bool) {
        self.children.retain(|c| keep(c));
    }

    pub fn node_at(&self, location: &NodeLocation) -> Option<&ContentNode> {
        let mut node = self;
        for &index in &location.0 {
            node = node.children.get(index)?;
        }
        Some(node)
    }

    pub fn node_at_mut(&mut self, location: &NodeLocation) -> Option<&mut ContentNode> {
        let mut node = self;
        for &index in &location.0 {
            node = node.children.get_mut(index)?;
        }
        Some(node)
    }

    /// Locations of every node matching `pattern`, in document order.
    pub fn select(&self, pattern: &NodePattern) -> Vec<NodeLocation> {
        pattern.select(self)
    }

    /// Visit every node depth-first with its path relative to this node.
    ///
    /// Same-name siblings get a one-based `[n]` suffix from the second one on,
    /// the addressing scheme the store uses for child paths.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&str, &'a ContentNode)) {
        self.walk_inner("", visit);
    }

    fn walk_inner<'a>(&'a self, path: &str, visit: &mut impl FnMut(&str, &'a ContentNode)) {
        visit(path, self);
        for (child, segment) in self.children.iter().zip(self.child_segments()) {
            let child_path = if path.is_empty() {
                segment
            } else {
                format!("{}/{}", path, segment)
            };
            child.walk_inner(&child_path, visit);
        }
    }

    /// Path segments of the direct children, with same-name sibling indices.
    pub fn child_segments(&self) -> Vec<String> {
        let mut seen: Vec<(&str, usize)> = Vec::new();
        self.children
            .iter()
            .map(|child| {
                let count = match seen.iter_mut().find(|(n, _)| *n == child.name()) {
                    Some((_, count)) => {
                        *count += 1;
                        *count
                    }
                    None => {
                        seen.push((child.name(), 1));
                        1
                    }
                };
                if count == 1 {
                    child.name.clone()
                } else {
                    format!("{}[{}]", child.name, count)
                }
            })
            .collect()
    }

    /// Relative path of the node at `location`, in the same form `walk` uses.
    pub fn relative_path(&self, location: &NodeLocation) -> Option<String> {
        let mut node = self;
        let mut segments = Vec::with_capacity(location.0.len());
        for &index in &location.0 {
            segments.push(node.child_segments().into_iter().nth(index)?);
            node = node.children.get(index)?;
        }
        Some(segments.join("/"))
    }

    /// Total number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ContentNode::node_count).sum::<usize>()
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(f, "{}{} [{}]", indent, self.name, self.primary_type)?;
        for property in &self.properties {
            let values: Vec<String> = property
                .values()
                .iter()
                .map(|v| match v {
                    super::ContentValue::Binary(b) => format!("{:?}", b),
                    other => other.to_lexical(),
                })
                .collect();
            let rendered = if property.is_multiple() {
                format!("[{}]", values.join(", "))
            } else {
                values.join("")
            };
            writeln!(
                f,
                "{}  - {} ({}) = {}",
                indent,
                property.name(),
                property.property_type(),
                rendered
            )?;
        }
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ContentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRepr {
    name: String,
    primary_type: String,
    #[serde(default)]
    properties: Vec<ContentProperty>,
    #[serde(default)]
    nodes: Vec<ContentNode>,
}

impl TryFrom<NodeRepr> for ContentNode {
    type Error = ModelError;

    fn try_from(repr: NodeRepr) -> Result<Self, Self::Error> {
        ContentNode::from_parts(repr.name, repr.primary_type, repr.properties, repr.nodes)
    }
}

impl From<ContentNode> for NodeRepr {
    fn from(node: ContentNode) -> Self {
        Self {
            name: node.name,
            primary_type: node.primary_type,
            properties: node.properties,
            nodes: node.children,
        }
    }
}

impl ContentNode {
    /// Assemble a node from decoded parts, rejecting duplicate property names.
    pub(crate) fn from_parts(
        name: String,
        primary_type: String,
        properties: Vec<ContentProperty>,
        children: Vec<ContentNode>,
    ) -> Result<Self, ModelError> {
        let mut names = HashSet::with_capacity(properties.len());
        for property in &properties {
            if !names.insert(property.name()) {
                return Err(ModelError::DuplicateProperty {
                    node: name,
                    property: property.name().to_string(),
                });
            }
        }
        Ok(Self {
            name,
            primary_type,
            properties,
            children,
        })
    }
}
