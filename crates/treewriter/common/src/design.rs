// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Design tree: the declarative description of the output document
//!
//! Nodes live in an arena owned by [`DesignTree`] and are addressed by
//! [`NodeId`]. Every node keeps a back-reference to its parent container.
//! The first node is a synthetic root object without a parent; the loader
//! hangs the document's top-level element(s) below it.
//!
//! Templates are ordinary object containers flagged as templates and
//! registered by name. A template entry refers to a template by name and is
//! expanded at walk time, so template content is never duplicated.

use crate::error::ModelError;
use crate::property::{MappingProperty, PropertyMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// URI of the reserved namespace carrying mapping keywords
pub const MAPPING_NAMESPACE_URI: &str = "http://www.cloveretl.com/ns/xmlmapping";

/// Conventional prefix bound to [`MAPPING_NAMESPACE_URI`]
pub const MAPPING_NAMESPACE_PREFIX: &str = "clover";

/// Handle of a node inside a [`DesignTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural parts owned by a container node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerParts {
    pub children: Vec<NodeId>,
    pub namespaces: Vec<NodeId>,
    pub attributes: Vec<NodeId>,
    pub wildcard_attribute: Option<NodeId>,
    pub relation: Option<NodeId>,
}

/// Node variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Object { template: bool, parts: ContainerParts },
    Collection { parts: ContainerParts },
    Attribute,
    Value,
    Namespace,
    Relation,
    TemplateEntry,
    Comment,
    CDataSection,
    WildcardNode,
    WildcardAttribute,
}

/// Data-less discriminant of [`NodeKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKindTag {
    Object,
    Template,
    Collection,
    Attribute,
    Value,
    Namespace,
    Relation,
    TemplateEntry,
    Comment,
    CDataSection,
    WildcardNode,
    WildcardAttribute,
}

impl NodeKind {
    fn object(template: bool) -> Self {
        NodeKind::Object {
            template,
            parts: ContainerParts::default(),
        }
    }

    fn collection() -> Self {
        NodeKind::Collection {
            parts: ContainerParts::default(),
        }
    }

    pub fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::Object { template: true, .. } => NodeKindTag::Template,
            NodeKind::Object { .. } => NodeKindTag::Object,
            NodeKind::Collection { .. } => NodeKindTag::Collection,
            NodeKind::Attribute => NodeKindTag::Attribute,
            NodeKind::Value => NodeKindTag::Value,
            NodeKind::Namespace => NodeKindTag::Namespace,
            NodeKind::Relation => NodeKindTag::Relation,
            NodeKind::TemplateEntry => NodeKindTag::TemplateEntry,
            NodeKind::Comment => NodeKindTag::Comment,
            NodeKind::CDataSection => NodeKindTag::CDataSection,
            NodeKind::WildcardNode => NodeKindTag::WildcardNode,
            NodeKind::WildcardAttribute => NodeKindTag::WildcardAttribute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignNode {
    kind: NodeKind,
    parent: Option<NodeId>,
    properties: PropertyMap,
}

impl DesignNode {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn property(&self, property: MappingProperty) -> Option<&str> {
        self.properties.get(property)
    }

    pub fn parts(&self) -> Option<&ContainerParts> {
        match &self.kind {
            NodeKind::Object { parts, .. } | NodeKind::Collection { parts } => Some(parts),
            _ => None,
        }
    }

    fn parts_mut(&mut self) -> Option<&mut ContainerParts> {
        match &mut self.kind {
            NodeKind::Object { parts, .. } | NodeKind::Collection { parts } => Some(parts),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.parts().is_some()
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, NodeKind::Object { .. })
    }

    pub fn is_template(&self) -> bool {
        matches!(self.kind, NodeKind::Object { template: true, .. })
    }
}

/// Arena-backed design tree with a template registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignTree {
    nodes: Vec<DesignNode>,
    root: NodeId,
    templates: BTreeMap<String, NodeId>,
}

impl Default for DesignTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignTree {
    /// Creates a tree holding only the synthetic root object
    pub fn new() -> Self {
        Self {
            nodes: vec![DesignNode {
                kind: NodeKind::object(false),
                parent: None,
                properties: PropertyMap::new(),
            }],
            root: NodeId(0),
            templates: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&DesignNode> {
        self.nodes.get(id.0)
    }

    /// Returns the node behind `id`.
    ///
    /// Panics when `id` was not minted by this tree.
    pub fn node(&self, id: NodeId) -> &DesignNode {
        &self.nodes[id.0]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        self.node(id).kind()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn property(&self, id: NodeId, property: MappingProperty) -> Option<&str> {
        self.node(id).property(property)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).parts().map_or(&[], |parts| parts.children.as_slice())
    }

    pub fn namespaces(&self, id: NodeId) -> &[NodeId] {
        self.node(id).parts().map_or(&[], |parts| parts.namespaces.as_slice())
    }

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        self.node(id).parts().map_or(&[], |parts| parts.attributes.as_slice())
    }

    pub fn wildcard_attribute(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parts().and_then(|parts| parts.wildcard_attribute)
    }

    pub fn relation(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parts().and_then(|parts| parts.relation)
    }

    /// Reads a property of the relation declared on `container`
    pub fn relation_property(&self, container: NodeId, property: MappingProperty) -> Option<&str> {
        self.relation(container).and_then(|relation| self.property(relation, property))
    }

    pub fn templates(&self) -> &BTreeMap<String, NodeId> {
        &self.templates
    }

    pub fn template(&self, name: &str) -> Option<NodeId> {
        self.templates.get(name).copied()
    }

    /// Number of object and collection nodes, templates excluded
    pub fn container_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.is_container() && !node.is_template())
            .count()
    }

    pub fn set_property(&mut self, id: NodeId, property: MappingProperty, value: impl Into<String>) -> Result<Option<String>, ModelError> {
        let value = value.into();
        let node = self.nodes.get_mut(id.0).ok_or(ModelError::UnknownNode(id))?;
        let is_template = node.is_template();
        let previous = node.properties.set(property, value.clone());
        if is_template && property == MappingProperty::Name {
            if let Some(old) = &previous {
                if self.templates.get(old) == Some(&id) {
                    self.templates.remove(old);
                }
            }
            self.templates.insert(value, id);
        }
        Ok(previous)
    }

    pub fn remove_property(&mut self, id: NodeId, property: MappingProperty) -> Result<Option<String>, ModelError> {
        let node = self.nodes.get_mut(id.0).ok_or(ModelError::UnknownNode(id))?;
        let is_template = node.is_template();
        let previous = node.properties.remove(property);
        if is_template && property == MappingProperty::Name {
            if let Some(old) = &previous {
                if self.templates.get(old) == Some(&id) {
                    self.templates.remove(old);
                }
            }
        }
        Ok(previous)
    }

    fn check(&self, id: NodeId) -> Result<&DesignNode, ModelError> {
        self.nodes.get(id.0).ok_or(ModelError::UnknownNode(id))
    }

    fn alloc(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DesignNode {
            kind,
            parent: Some(parent),
            properties: PropertyMap::new(),
        });
        id
    }

    fn parts_of(&mut self, id: NodeId) -> Result<&mut ContainerParts, ModelError> {
        let tag = self.check(id)?.kind.tag();
        self.nodes[id.0]
            .parts_mut()
            .ok_or(ModelError::invalid_placement(tag, NodeKindTag::Object))
    }

    fn require_container(&self, parent: NodeId, child: NodeKindTag) -> Result<(), ModelError> {
        let node = self.check(parent)?;
        if node.is_container() {
            Ok(())
        } else {
            Err(ModelError::invalid_placement(node.kind.tag(), child))
        }
    }

    fn require_object(&self, owner: NodeId, child: NodeKindTag) -> Result<(), ModelError> {
        let node = self.check(owner)?;
        if node.is_object() {
            Ok(())
        } else {
            Err(ModelError::invalid_placement(node.kind.tag(), child))
        }
    }

    fn push_child(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, ModelError> {
        self.require_container(parent, kind.tag())?;
        let id = self.alloc(parent, kind);
        self.parts_of(parent)?.children.push(id);
        Ok(id)
    }

    /// Appends an element container under `parent`
    pub fn add_object(&mut self, parent: NodeId, name: &str) -> Result<NodeId, ModelError> {
        let id = self.push_child(parent, NodeKind::object(false))?;
        self.nodes[id.0].properties.set(MappingProperty::Name, name);
        Ok(id)
    }

    /// Appends a collection container under `parent`
    pub fn add_collection(&mut self, parent: NodeId, name: &str) -> Result<NodeId, ModelError> {
        let id = self.push_child(parent, NodeKind::collection())?;
        self.nodes[id.0].properties.set(MappingProperty::Name, name);
        Ok(id)
    }

    /// Declares a template under an element and registers it by name
    pub fn add_template(&mut self, parent: NodeId, name: &str) -> Result<NodeId, ModelError> {
        self.require_object(parent, NodeKindTag::Template)?;
        let id = self.push_child(parent, NodeKind::object(true))?;
        self.set_property(id, MappingProperty::Name, name)?;
        Ok(id)
    }

    /// Declares a template without a name; only the validator cares about these
    pub fn add_unnamed_template(&mut self, parent: NodeId) -> Result<NodeId, ModelError> {
        self.require_object(parent, NodeKindTag::Template)?;
        self.push_child(parent, NodeKind::object(true))
    }

    pub fn add_template_entry(&mut self, parent: NodeId, template: &str) -> Result<NodeId, ModelError> {
        let id = self.push_child(parent, NodeKind::TemplateEntry)?;
        self.nodes[id.0].properties.set(MappingProperty::Name, template);
        Ok(id)
    }

    /// Appends a text value; `None` leaves the value unspecified
    pub fn add_value(&mut self, parent: NodeId, value: Option<&str>) -> Result<NodeId, ModelError> {
        let id = self.push_child(parent, NodeKind::Value)?;
        if let Some(value) = value {
            self.nodes[id.0].properties.set(MappingProperty::Value, value);
        }
        Ok(id)
    }

    pub fn add_comment(&mut self, parent: NodeId, text: &str, write: bool) -> Result<NodeId, ModelError> {
        let id = self.push_child(parent, NodeKind::Comment)?;
        let properties = &mut self.nodes[id.0].properties;
        properties.set(MappingProperty::Value, text);
        properties.set(MappingProperty::Write, write.to_string());
        Ok(id)
    }

    pub fn add_cdata(&mut self, parent: NodeId, text: &str) -> Result<NodeId, ModelError> {
        let id = self.push_child(parent, NodeKind::CDataSection)?;
        self.nodes[id.0].properties.set(MappingProperty::Value, text);
        Ok(id)
    }

    pub fn add_wildcard_node(&mut self, parent: NodeId) -> Result<NodeId, ModelError> {
        self.push_child(parent, NodeKind::WildcardNode)
    }

    pub fn add_attribute(&mut self, owner: NodeId, name: &str, value: &str) -> Result<NodeId, ModelError> {
        self.require_object(owner, NodeKindTag::Attribute)?;
        let id = self.alloc(owner, NodeKind::Attribute);
        let properties = &mut self.nodes[id.0].properties;
        properties.set(MappingProperty::Name, name);
        properties.set(MappingProperty::Value, value);
        self.parts_of(owner)?.attributes.push(id);
        Ok(id)
    }

    /// Declares a namespace; the prefix is stored as NAME and the URI as VALUE
    pub fn add_namespace(&mut self, owner: NodeId, prefix: &str, uri: Option<&str>) -> Result<NodeId, ModelError> {
        self.require_object(owner, NodeKindTag::Namespace)?;
        let id = self.alloc(owner, NodeKind::Namespace);
        let properties = &mut self.nodes[id.0].properties;
        properties.set(MappingProperty::Name, prefix);
        if let Some(uri) = uri {
            properties.set(MappingProperty::Value, uri);
        }
        self.parts_of(owner)?.namespaces.push(id);
        Ok(id)
    }

    /// Declares the mapping keyword namespace on `owner`
    pub fn declare_mapping_namespace(&mut self, owner: NodeId) -> Result<NodeId, ModelError> {
        self.add_namespace(owner, MAPPING_NAMESPACE_PREFIX, Some(MAPPING_NAMESPACE_URI))
    }

    pub fn set_wildcard_attribute(&mut self, owner: NodeId) -> Result<NodeId, ModelError> {
        self.require_object(owner, NodeKindTag::WildcardAttribute)?;
        if self.wildcard_attribute(owner).is_some() {
            return Err(ModelError::DuplicateWildcardAttribute(owner));
        }
        let id = self.alloc(owner, NodeKind::WildcardAttribute);
        self.parts_of(owner)?.wildcard_attribute = Some(id);
        Ok(id)
    }

    /// Binds `container` to an input port; KEY, PARENT_KEY and FILTER are set separately
    pub fn set_relation(&mut self, container: NodeId, input_port: Option<&str>) -> Result<NodeId, ModelError> {
        self.require_container(container, NodeKindTag::Relation)?;
        if self.relation(container).is_some() {
            return Err(ModelError::DuplicateRelation(container));
        }
        let id = self.alloc(container, NodeKind::Relation);
        if let Some(port) = input_port {
            self.nodes[id.0].properties.set(MappingProperty::InputPort, port);
        }
        self.parts_of(container)?.relation = Some(id);
        Ok(id)
    }

    /// Declares a relation with optional join keys in one call
    pub fn bind(&mut self, container: NodeId, input_port: &str, key: Option<&str>, parent_key: Option<&str>) -> Result<NodeId, ModelError> {
        let relation = self.set_relation(container, Some(input_port))?;
        if let Some(key) = key {
            self.set_property(relation, MappingProperty::Key, key)?;
        }
        if let Some(parent_key) = parent_key {
            self.set_property(relation, MappingProperty::ParentKey, parent_key)?;
        }
        Ok(relation)
    }

    /// Ancestors of `id` following definition parents, nearest first
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    /// Whether a namespace with `uri` is declared on `container` or any definition ancestor
    pub fn is_namespace_declared(&self, container: NodeId, uri: &str) -> bool {
        std::iter::once(container)
            .chain(self.ancestors(container))
            .any(|id| {
                self.namespaces(id)
                    .iter()
                    .any(|ns| self.property(*ns, MappingProperty::Value) == Some(uri))
            })
    }
}
