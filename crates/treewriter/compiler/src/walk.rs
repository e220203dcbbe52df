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

//! Recursive walk over a design tree
//!
//! Every pass implements [`MappingVisitor`] and drives the walk through
//! [`walk`]. Dispatch is a `match` over the closed [`NodeKind`] set in
//! [`accept`]. The structural order of a container is fixed by
//! [`visit_object_parts`] (namespaces, wildcard attribute, attributes,
//! children) and [`visit_children`] (relation, child nodes), so every pass
//! sees attributes and namespaces in the same order.
//!
//! Template entries are expanded in place: the entry is pushed onto the
//! [`TemplateExpansion`] stack and the registered template's children are
//! visited from the shared tree. An entry whose template is already being
//! expanded marks the start of a recursion. Until the stack unwinds past that
//! entry, nested entries are not expanded and passes can ask
//! [`MappingVisitor::is_in_recursion`] to short-circuit their own work.

use tracing::debug;
use treewriter_common::{DesignTree, MappingProperty, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    entry: NodeId,
    template: NodeId,
}

/// Stack of active template entries for one walk
#[derive(Debug, Default, Clone)]
pub struct TemplateExpansion {
    stack: Vec<Frame>,
    recursion_start: Option<usize>,
}

impl TemplateExpansion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.recursion_start = None;
    }

    pub fn is_in_recursion(&self) -> bool {
        self.recursion_start.is_some()
    }

    /// The entry that started the current recursion
    pub fn recursion_entry(&self) -> Option<NodeId> {
        self.recursion_start.and_then(|depth| self.stack.get(depth)).map(|frame| frame.entry)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Active entries, outermost first
    pub fn entries(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.stack.iter().map(|frame| frame.entry)
    }

    pub fn is_expanding(&self, template: NodeId) -> bool {
        self.stack.iter().any(|frame| frame.template == template)
    }

    /// Container ancestors of `node`, nearest first.
    ///
    /// At a template boundary the chain continues at the entry that
    /// instantiated the template rather than where the template is declared.
    pub fn ancestors(&self, tree: &DesignTree, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = self.stack.len();
        let mut current = node;
        while let Some(parent) = tree.parent(current) {
            if tree.node(parent).is_template() {
                if let Some(position) = self.stack[..cursor].iter().rposition(|frame| frame.template == parent) {
                    cursor = position;
                    current = self.stack[position].entry;
                    continue;
                }
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Nearest ancestor container that declares a relation
    pub fn recurring_parent(&self, tree: &DesignTree, node: NodeId) -> Option<NodeId> {
        self.ancestors(tree, node).into_iter().find(|id| tree.relation(*id).is_some())
    }
}

/// Pass over a design tree; every hook defaults to the structural traversal
pub trait MappingVisitor<'t> {
    type Error;

    fn tree(&self) -> &'t DesignTree;

    fn expansion(&self) -> &TemplateExpansion;

    fn expansion_mut(&mut self) -> &mut TemplateExpansion;

    fn is_in_recursion(&self) -> bool {
        self.expansion().is_in_recursion()
    }

    fn visit_object(&mut self, node: NodeId) -> Result<(), Self::Error> {
        visit_object_parts(self, node)
    }

    fn visit_collection(&mut self, node: NodeId) -> Result<(), Self::Error> {
        visit_children(self, node)
    }

    fn visit_template_entry(&mut self, node: NodeId) -> Result<(), Self::Error> {
        expand_template(self, node)
    }

    fn visit_attribute(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_value(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_namespace(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_relation(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_comment(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_cdata(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_wildcard_node(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_wildcard_attribute(&mut self, _node: NodeId) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Dispatches `node` to the matching visitor hook
pub fn accept<'t, V>(visitor: &mut V, node: NodeId) -> Result<(), V::Error>
where
    V: MappingVisitor<'t> + ?Sized,
{
    match visitor.tree().kind(node) {
        NodeKind::Object { .. } => visitor.visit_object(node),
        NodeKind::Collection { .. } => visitor.visit_collection(node),
        NodeKind::Attribute => visitor.visit_attribute(node),
        NodeKind::Value => visitor.visit_value(node),
        NodeKind::Namespace => visitor.visit_namespace(node),
        NodeKind::Relation => visitor.visit_relation(node),
        NodeKind::TemplateEntry => visitor.visit_template_entry(node),
        NodeKind::Comment => visitor.visit_comment(node),
        NodeKind::CDataSection => visitor.visit_cdata(node),
        NodeKind::WildcardNode => visitor.visit_wildcard_node(node),
        NodeKind::WildcardAttribute => visitor.visit_wildcard_attribute(node),
    }
}

/// Resets the expansion state and walks the whole tree from its root
pub fn walk<'t, V>(visitor: &mut V) -> Result<(), V::Error>
where
    V: MappingVisitor<'t> + ?Sized,
{
    visitor.expansion_mut().reset();
    let root = visitor.tree().root();
    accept(visitor, root)
}

/// Namespaces, wildcard attribute, attributes, then [`visit_children`]
pub fn visit_object_parts<'t, V>(visitor: &mut V, node: NodeId) -> Result<(), V::Error>
where
    V: MappingVisitor<'t> + ?Sized,
{
    let tree = visitor.tree();
    for &namespace in tree.namespaces(node) {
        accept(visitor, namespace)?;
    }
    if let Some(wildcard) = tree.wildcard_attribute(node) {
        accept(visitor, wildcard)?;
    }
    for &attribute in tree.attributes(node) {
        accept(visitor, attribute)?;
    }
    visit_children(visitor, node)
}

/// Relation, then child nodes
pub fn visit_children<'t, V>(visitor: &mut V, node: NodeId) -> Result<(), V::Error>
where
    V: MappingVisitor<'t> + ?Sized,
{
    let tree = visitor.tree();
    if let Some(relation) = tree.relation(node) {
        accept(visitor, relation)?;
    }
    for &child in tree.children(node) {
        accept(visitor, child)?;
    }
    Ok(())
}

/// Visits the children of the template referenced by `entry` in place of the entry
pub fn expand_template<'t, V>(visitor: &mut V, entry: NodeId) -> Result<(), V::Error>
where
    V: MappingVisitor<'t> + ?Sized,
{
    if visitor.is_in_recursion() {
        return Ok(());
    }
    let tree = visitor.tree();
    let Some(template) = tree.property(entry, MappingProperty::Name).and_then(|name| tree.template(name)) else {
        return Ok(());
    };

    let expansion = visitor.expansion_mut();
    let depth = expansion.stack.len();
    if expansion.is_expanding(template) {
        debug!(entry = %entry, template = %template, depth, "template recursion detected");
        expansion.recursion_start = Some(depth);
    }
    expansion.stack.push(Frame { entry, template });

    let result = tree.children(template).iter().try_for_each(|&child| accept(visitor, child));

    let expansion = visitor.expansion_mut();
    expansion.stack.truncate(depth);
    if expansion.recursion_start == Some(depth) {
        expansion.recursion_start = None;
    }
    result
}
