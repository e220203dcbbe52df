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

//! Lowering of a tagged design tree into a write-plan
//!
//! Every design container becomes one [`WritableContainer`]; a tagged one
//! also gets a [`PortBinding`] with join keys resolved to field positions.
//! Field references in names, values and attributes are resolved to
//! (port, position) pairs so the serializer never looks at a field name.
//!
//! A template that recurses into itself is not compiled again: the
//! container compiled at the first expansion is linked as a child a second
//! time, which makes the plan a graph rather than a tree.

use crate::config::CompilerConfig;
use crate::error::{CompileError, FilterError};
use crate::expression::{
    is_aggregate_expression, parse_aggregate_expression, parse_bool, parse_value_expression, split_list, split_qualified_name,
    ValueSegment,
};
use crate::fields::{matching_fields, port_fields, FieldSet, FieldSlot};
use crate::tagger::TagResult;
use crate::walk::{expand_template, visit_children, visit_object_parts, walk, MappingVisitor, TemplateExpansion};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use treewriter_common::{
    ContainerKind, DesignTree, MappingProperty, NodeId, NodeValue, PlanArena, PortBinding, PortTable, RecordShape, RowFilter,
    WritableAttribute, WritableChild, WritableContainer, WritableId, WritableMapping, WritableNamespace, WritableValue,
    MAPPING_NAMESPACE_URI,
};

/// Row filter subsystem
pub trait FilterCompiler {
    /// Compiles `source` for records of `shape`
    fn compile(&self, source: &str, shape: Option<&RecordShape>) -> Result<Arc<dyn RowFilter>, FilterError>;
}

/// Filter source kept for compilation by the engine that evaluates it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFilter {
    expression: String,
    record: Option<String>,
}

impl DeferredFilter {
    /// Name of the record the filter reads
    pub fn record(&self) -> Option<&str> {
        self.record.as_deref()
    }
}

impl RowFilter for DeferredFilter {
    fn expression(&self) -> &str {
        &self.expression
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredFilterCompiler;

impl FilterCompiler for DeferredFilterCompiler {
    fn compile(&self, source: &str, shape: Option<&RecordShape>) -> Result<Arc<dyn RowFilter>, FilterError> {
        Ok(Arc::new(DeferredFilter {
            expression: source.to_string(),
            record: shape.map(|shape| shape.name.clone()),
        }))
    }
}

struct CompilePass<'t, 'a, F: ?Sized> {
    tree: &'t DesignTree,
    ports: &'a PortTable,
    config: &'a CompilerConfig,
    filters: &'a F,
    tags: &'a TagResult,
    expansion: TemplateExpansion,
    arena: PlanArena,
    /// Latest compiled container of each design container
    compiled: BTreeMap<NodeId, WritableId>,
    /// Slots linked from a recursion before their container was compiled
    reserved: BTreeMap<NodeId, WritableId>,
    available: Vec<usize>,
    current_parent: Option<WritableId>,
    current_loop: Option<WritableId>,
    root: Option<WritableId>,
    partition: Option<WritableId>,
}

impl<F: FilterCompiler + ?Sized> CompilePass<'_, '_, F> {
    fn current_mut(&mut self) -> Result<&mut WritableContainer, CompileError> {
        self.current_parent
            .and_then(|id| self.arena.get_mut(id))
            .ok_or_else(|| CompileError::internal_error("no open container"))
    }

    fn attach(&mut self, id: WritableId) -> Result<(), CompileError> {
        if self.current_parent.is_some() {
            self.current_mut()?.children.push(WritableChild::Container(id));
        }
        Ok(())
    }

    fn bool_property(&self, node: NodeId, property: MappingProperty) -> bool {
        self.tree.property(node, property).and_then(parse_bool).unwrap_or(false)
    }

    fn shape(&self, node: NodeId, port: usize) -> Result<&RecordShape, CompileError> {
        self.ports.shape(port).ok_or(CompileError::MissingMetadata { node, port })
    }

    fn resolve_port(&self, node: NodeId, text: &str) -> Result<usize, CompileError> {
        self.ports
            .resolve_local(text, &self.available)
            .ok_or_else(|| CompileError::UnresolvedPort {
                node,
                port: text.to_string(),
            })
    }

    fn compile_value(&self, node: NodeId, text: &str) -> Result<WritableValue, CompileError> {
        let mut segments = Vec::new();
        for segment in parse_value_expression(text) {
            match segment {
                ValueSegment::Literal(text) => segments.push(NodeValue::Static(text)),
                ValueSegment::Reference(reference) => {
                    let port = self.resolve_port(node, &reference.port)?;
                    let shape = self.shape(node, port)?;
                    let (position, field) = shape
                        .fields
                        .iter()
                        .enumerate()
                        .find(|(_, field)| field.name == reference.field)
                        .ok_or_else(|| CompileError::UnresolvedField {
                            node,
                            port,
                            field: reference.field.clone(),
                        })?;
                    segments.push(NodeValue::Dynamic {
                        port,
                        field: position,
                        cardinality: field.cardinality,
                    });
                }
            }
        }
        Ok(WritableValue::new(segments))
    }

    /// Splits `prefix:name` and compiles both parts
    fn compile_name(&self, node: NodeId, text: &str) -> Result<(WritableValue, Option<WritableValue>), CompileError> {
        let (prefix, local) = split_qualified_name(text);
        let name = self.compile_value(node, local)?;
        let prefix = prefix.map(|prefix| self.compile_value(node, prefix)).transpose()?;
        Ok((name, prefix))
    }

    fn field_positions(&self, node: NodeId, port: usize, fields: &[String]) -> Result<Vec<usize>, CompileError> {
        let shape = self.shape(node, port)?;
        fields
            .iter()
            .map(|field| {
                shape.field_position(field).ok_or_else(|| CompileError::UnresolvedField {
                    node,
                    port,
                    field: field.clone(),
                })
            })
            .collect()
    }

    fn compile_binding(&self, node: NodeId, port: usize) -> Result<PortBinding, CompileError> {
        let tree = self.tree;
        let keys = tree
            .relation_property(node, MappingProperty::Key)
            .map(|key| self.field_positions(node, port, &split_list(key)))
            .transpose()?;

        let parent_keys = match tree.relation_property(node, MappingProperty::ParentKey) {
            None => None,
            Some(parent_key) => {
                let parent_port = self
                    .current_loop
                    .and_then(|id| self.arena.get(id))
                    .and_then(|container| container.binding.as_ref())
                    .map(|binding| binding.port)
                    .ok_or_else(|| CompileError::inconsistent_tags(format!("parent key of {} has no enclosing loop", node)))?;
                Some(self.field_positions(node, parent_port, &split_list(parent_key))?)
            }
        };

        let filter = match tree.relation_property(node, MappingProperty::Filter) {
            None => None,
            Some(expression) => {
                let source = format!("{}{}", self.config.filter_prefix, expression);
                let filter = self
                    .filters
                    .compile(&source, self.ports.shape(port))
                    .map_err(|source| CompileError::Filter { node, source })?;
                Some(filter)
            }
        };

        Ok(PortBinding {
            port,
            parent: self.current_loop,
            keys,
            parent_keys,
            filter,
        })
    }

    fn compile_container(&mut self, node: NodeId, kind: ContainerKind) -> Result<(), CompileError> {
        let tree = self.tree;
        let tagged_port = self.tags.tag(node).map(|tag| tag.port);
        if tagged_port.is_none() && tree.relation_property(node, MappingProperty::InputPort).is_some() {
            return Err(CompileError::inconsistent_tags(format!("loop container {} is not tagged", node)));
        }
        if let Some(port) = tagged_port {
            self.available.push(port);
        }

        let (name, prefix) = self.compile_name(node, tree.property(node, MappingProperty::Name).unwrap_or_default())?;
        let mut container = WritableContainer::new(kind, name, prefix);
        container.hidden = self.bool_property(node, MappingProperty::Hide);
        container.write_null = self.bool_property(node, MappingProperty::WriteNullElement);
        container.data_type = tree.property(node, MappingProperty::DataType).map(str::to_string);
        container.is_root = tree.parent(node).is_none();
        if let Some(port) = tagged_port {
            container.binding = Some(self.compile_binding(node, port)?);
        }

        let id = match self.reserved.remove(&node) {
            Some(id) => {
                let slot = self
                    .arena
                    .get_mut(id)
                    .ok_or_else(|| CompileError::internal_error(format!("reserved slot of {} is missing", node)))?;
                *slot = container;
                id
            }
            None => self.arena.push(container),
        };
        self.attach(id)?;
        self.compiled.insert(node, id);
        if self.root.is_none() {
            self.root = Some(id);
        }

        let saved = (self.current_parent, self.current_loop);
        if tagged_port.is_some() {
            self.current_loop = Some(id);
            if self.config.partition && self.tags.partition() == Some(node) {
                self.partition = Some(id);
            }
        }
        self.current_parent = Some(id);

        let result = match kind {
            ContainerKind::Object => visit_object_parts(self, node),
            ContainerKind::Collection => visit_children(self, node),
        };

        (self.current_parent, self.current_loop) = saved;
        if tagged_port.is_some() {
            self.available.pop();
        }
        result
    }

    /// Links the container compiled for `node` at an outer expansion
    fn relink(&mut self, node: NodeId, kind: ContainerKind) -> Result<(), CompileError> {
        let existing = self.compiled.get(&node).or_else(|| self.reserved.get(&node)).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.arena.push(WritableContainer::new(kind, WritableValue::default(), None));
                self.reserved.insert(node, id);
                id
            }
        };
        debug!(node = %node, container = id.index(), "linking recursive container");
        self.attach(id)
    }

    fn expression_fields(&self, node: NodeId, expression: &str) -> Result<Vec<FieldSlot>, CompileError> {
        let parsed = parse_aggregate_expression(expression)
            .ok_or_else(|| CompileError::internal_error(format!("invalid field expression '{}' on {}", expression, node)))?;
        let port = self.resolve_port(node, &parsed.port)?;
        Ok(matching_fields(port, self.shape(node, port)?, &parsed))
    }

    fn available_fields(&self, node: NodeId) -> Result<Vec<FieldSlot>, CompileError> {
        let mut ports: Vec<usize> = Vec::new();
        for port in &self.available {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
        let mut slots = Vec::new();
        for port in ports {
            slots.extend(port_fields(port, self.shape(node, port)?));
        }
        Ok(slots)
    }

    /// Include list, or every field in scope, minus the exclude list
    fn wildcard_fields(&self, node: NodeId) -> Result<FieldSet, CompileError> {
        let tree = self.tree;
        let mut set = FieldSet::new();
        match tree.property(node, MappingProperty::Include) {
            Some(include) => {
                for expression in split_list(include) {
                    set.add_all(self.expression_fields(node, &expression)?);
                }
            }
            None => {
                set.add_all(self.available_fields(node)?);
            }
        }
        if let Some(exclude) = tree.property(node, MappingProperty::Exclude) {
            for expression in split_list(exclude) {
                set.remove_all(&self.expression_fields(node, &expression)?);
            }
        }
        Ok(set)
    }

    /// Fields exempt from null suppression by the lists declared on `holder`
    fn null_fields(&self, holder: NodeId, write: MappingProperty, omit: MappingProperty) -> Result<FieldSet, CompileError> {
        let tree = self.tree;
        let write = tree.property(holder, write);
        let omit = tree.property(holder, omit);
        let mut set = FieldSet::new();
        if let Some(write) = write {
            for expression in split_list(write).iter().filter(|e| is_aggregate_expression(e)) {
                set.add_all(self.expression_fields(holder, expression)?);
            }
        } else if omit.is_some() {
            set.add_all(self.available_fields(holder)?);
        }
        if let Some(omit) = omit {
            for expression in split_list(omit).iter().filter(|e| is_aggregate_expression(e)) {
                set.remove_all(&self.expression_fields(holder, expression)?);
            }
        }
        Ok(set)
    }

    /// Null handling of an explicit attribute from its owner's lists
    fn attribute_write_null(&self, owner: NodeId, name: &str) -> bool {
        let tree = self.tree;
        let listed = |property| {
            tree.property(owner, property)
                .map(|list| split_list(list).iter().any(|item| item == name))
        };
        match (
            listed(MappingProperty::WriteNullAttribute),
            listed(MappingProperty::OmitNullAttribute),
        ) {
            (None, None) => false,
            (Some(written), None) => written,
            (None, Some(omitted)) => !omitted,
            (Some(written), Some(omitted)) => written && !omitted,
        }
    }
}

fn field_value(slot: &FieldSlot) -> WritableValue {
    WritableValue::new(vec![NodeValue::Dynamic {
        port: slot.port,
        field: slot.position,
        cardinality: slot.cardinality,
    }])
}

impl<'t, F: FilterCompiler + ?Sized> MappingVisitor<'t> for CompilePass<'t, '_, F> {
    type Error = CompileError;

    fn tree(&self) -> &'t DesignTree {
        self.tree
    }

    fn expansion(&self) -> &TemplateExpansion {
        &self.expansion
    }

    fn expansion_mut(&mut self) -> &mut TemplateExpansion {
        &mut self.expansion
    }

    fn visit_object(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.tree.node(node).is_template() {
            return Ok(());
        }
        if self.is_in_recursion() {
            return self.relink(node, ContainerKind::Object);
        }
        self.compile_container(node, ContainerKind::Object)
    }

    fn visit_collection(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_in_recursion() {
            return self.relink(node, ContainerKind::Collection);
        }
        self.compile_container(node, ContainerKind::Collection)
    }

    fn visit_template_entry(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let tree = self.tree;
        if !self.is_in_recursion() {
            let template = tree
                .property(node, MappingProperty::Name)
                .and_then(|name| tree.template(name))
                .filter(|template| !self.expansion.is_expanding(*template));
            if let Some(template) = template {
                // a recursion links the containers of this expansion, not of an earlier site
                for child in tree.children(template) {
                    self.compiled.remove(child);
                }
            }
        }
        expand_template(self, node)
    }

    fn visit_attribute(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let tree = self.tree;
        let owner = tree
            .parent(node)
            .ok_or_else(|| CompileError::internal_error(format!("attribute {} has no owner", node)))?;
        let full_name = tree.property(node, MappingProperty::Name).unwrap_or_default();
        let (name, prefix) = self.compile_name(node, full_name)?;
        let attribute = WritableAttribute {
            name,
            prefix,
            value: self.compile_value(node, tree.property(node, MappingProperty::Value).unwrap_or_default())?,
            write_null: self.attribute_write_null(owner, full_name),
        };
        self.current_mut()?.attributes.push(attribute);
        Ok(())
    }

    fn visit_value(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let value = self.compile_value(node, self.tree.property(node, MappingProperty::Value).unwrap_or_default())?;
        self.current_mut()?.children.push(WritableChild::Value(value));
        Ok(())
    }

    fn visit_namespace(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let tree = self.tree;
        let uri = tree.property(node, MappingProperty::Value).unwrap_or_default();
        if uri.eq_ignore_ascii_case(MAPPING_NAMESPACE_URI) {
            return Ok(());
        }
        let prefix = tree
            .property(node, MappingProperty::Name)
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_string);
        self.current_mut()?.namespaces.push(WritableNamespace {
            prefix,
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn visit_comment(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if !self.bool_property(node, MappingProperty::Write) {
            return Ok(());
        }
        let value = self.compile_value(node, self.tree.property(node, MappingProperty::Value).unwrap_or_default())?;
        self.current_mut()?.children.push(WritableChild::Comment(value));
        Ok(())
    }

    fn visit_cdata(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let value = self.compile_value(node, self.tree.property(node, MappingProperty::Value).unwrap_or_default())?;
        self.current_mut()?.children.push(WritableChild::CData(value));
        Ok(())
    }

    fn visit_wildcard_attribute(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let owner = self
            .tree
            .parent(node)
            .ok_or_else(|| CompileError::internal_error(format!("wildcard attribute {} has no owner", node)))?;
        let fields = self.wildcard_fields(node)?;
        let null_fields = self.null_fields(owner, MappingProperty::WriteNullAttribute, MappingProperty::OmitNullAttribute)?;

        let mut attributes = Vec::with_capacity(fields.len());
        for slot in fields {
            let prefix = slot
                .namespace
                .as_deref()
                .map(|namespace| self.compile_value(node, namespace))
                .transpose()?;
            attributes.push(WritableAttribute {
                name: WritableValue::literal(slot.name.clone()),
                prefix,
                value: field_value(&slot),
                write_null: null_fields.contains(&slot),
            });
        }
        self.current_mut()?.attributes.extend(attributes);
        Ok(())
    }

    fn visit_wildcard_node(&mut self, node: NodeId) -> Result<(), Self::Error> {
        let fields = self.wildcard_fields(node)?;
        let null_fields = self.null_fields(node, MappingProperty::WriteNullElement, MappingProperty::OmitNullElement)?;
        let data_type = self.tree.property(node, MappingProperty::DataType);

        for slot in fields {
            let prefix = slot
                .namespace
                .as_deref()
                .map(|namespace| self.compile_value(node, namespace))
                .transpose()?;
            let mut container = WritableContainer::new(ContainerKind::Object, WritableValue::literal(slot.name.clone()), prefix);
            container.write_null = null_fields.contains(&slot);
            container.data_type = data_type.map(str::to_string);
            container.children.push(WritableChild::Value(field_value(&slot)));
            let id = self.arena.push(container);
            self.attach(id)?;
        }
        Ok(())
    }
}

/// Compiles tagged design trees into write-plans
#[derive(Debug, Clone)]
pub struct MappingCompiler<'p, F = DeferredFilterCompiler> {
    ports: &'p PortTable,
    config: CompilerConfig,
    filters: F,
}

impl<'p> MappingCompiler<'p, DeferredFilterCompiler> {
    pub fn new(ports: &'p PortTable, config: CompilerConfig) -> Self {
        Self::with_filter_compiler(ports, config, DeferredFilterCompiler)
    }
}

impl<'p, F: FilterCompiler> MappingCompiler<'p, F> {
    pub fn with_filter_compiler(ports: &'p PortTable, config: CompilerConfig, filters: F) -> Self {
        Self { ports, config, filters }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles `tree`, which must have been tagged into `tags` with the same ports
    #[instrument(skip_all, fields(nodes = tree.len()))]
    pub fn compile(&self, tree: &DesignTree, tags: &TagResult) -> Result<WritableMapping, CompileError> {
        if let Some(node) = tags.tags().keys().find(|node| tree.get(**node).is_none()) {
            return Err(CompileError::inconsistent_tags(format!("tagged node {} is not part of the tree", node)));
        }

        let mut pass = CompilePass {
            tree,
            ports: self.ports,
            config: &self.config,
            filters: &self.filters,
            tags,
            expansion: TemplateExpansion::new(),
            arena: PlanArena::new(),
            compiled: BTreeMap::new(),
            reserved: BTreeMap::new(),
            available: Vec::new(),
            current_parent: None,
            current_loop: None,
            root: None,
            partition: None,
        };
        walk(&mut pass)?;

        if let Some(node) = pass.reserved.keys().next() {
            return Err(CompileError::internal_error(format!("recursive container {} was never compiled", node)));
        }
        let root = pass
            .root
            .ok_or_else(|| CompileError::internal_error("design tree has no root container"))?;

        let port_data = tags.port_data(self.ports);
        if let Some(tag) = tags.tags().values().find(|tag| !port_data.contains_key(&tag.port)) {
            return Err(CompileError::inconsistent_tags(format!("port {} is tagged but has no port tag", tag.port)));
        }

        let plan = pass.arena.finish(root, pass.partition, port_data);
        info!(
            containers = plan.len(),
            loops = plan.bindings().count(),
            partitioned = plan.partition().is_some(),
            "mapping compiled"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaggerConfig;
    use crate::tagger::MappingTagger;
    use treewriter_common::{Cardinality, FieldType};

    fn ports() -> PortTable {
        PortTable::new()
            .with_port(
                0,
                RecordShape::new("customer")
                    .with_field("id", FieldType::Integer)
                    .with_field("firstName", FieldType::String)
                    .with_field("lastName", FieldType::String),
            )
            .with_port(
                1,
                RecordShape::new("order")
                    .with_field("id", FieldType::Integer)
                    .with_field("custId", FieldType::Integer)
                    .with_list_field("items", FieldType::String),
            )
    }

    fn compile(tree: &DesignTree) -> Result<WritableMapping, CompileError> {
        let ports = ports();
        let tags = MappingTagger::new(&ports, TaggerConfig::default()).unwrap().tag(tree).unwrap();
        MappingCompiler::new(&ports, CompilerConfig::default()).compile(tree, &tags)
    }

    fn container(plan: &WritableMapping, id: WritableId) -> &WritableContainer {
        plan.container(id).unwrap()
    }

    fn only_child(plan: &WritableMapping, id: WritableId) -> WritableId {
        let children: Vec<_> = container(plan, id).child_containers().collect();
        assert_eq!(children.len(), 1);
        children[0]
    }

    #[test]
    fn test_structure_without_relations() {
        let mut tree = DesignTree::new();
        let doc = tree.add_object(tree.root(), "p:doc").unwrap();
        tree.declare_mapping_namespace(doc).unwrap();
        tree.add_namespace(doc, "p", Some("urn:p")).unwrap();
        tree.add_attribute(doc, "version", "1.0").unwrap();
        tree.add_comment(doc, "hidden", false).unwrap();
        tree.add_comment(doc, "shown", true).unwrap();
        let items = tree.add_collection(doc, "items").unwrap();
        let item = tree.add_object(items, "item").unwrap();
        tree.add_value(item, Some("text")).unwrap();

        let plan = compile(&tree).unwrap();
        assert_eq!(plan.len(), tree.container_count());
        assert_eq!(plan.bindings().count(), 0);
        assert!(plan.port_data().is_empty());

        let root = container(&plan, plan.root());
        assert!(root.is_root);
        let doc = container(&plan, only_child(&plan, plan.root()));
        assert!(!doc.is_root);
        assert_eq!(doc.name, WritableValue::literal("doc"));
        assert_eq!(doc.prefix, Some(WritableValue::literal("p")));
        assert_eq!(
            doc.namespaces,
            vec![WritableNamespace {
                prefix: Some("p".into()),
                uri: "urn:p".into()
            }]
        );
        assert_eq!(doc.attributes.len(), 1);
        assert_eq!(doc.attributes[0].value, WritableValue::literal("1.0"));
        assert_eq!(doc.children[0], WritableChild::Comment(WritableValue::literal("shown")));
        assert_eq!(doc.children.len(), 2);
    }

    #[test]
    fn test_binding_resolves_key_positions() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "customers").unwrap();
        let customer = tree.add_object(top, "customer").unwrap();
        tree.bind(customer, "0", None, None).unwrap();
        let order = tree.add_object(customer, "order").unwrap();
        let relation = tree.bind(order, "order", Some("custId"), Some("id")).unwrap();
        tree.set_property(relation, MappingProperty::Filter, "$in.0.id > 10").unwrap();
        tree.add_value(order, Some("Order $1.id of {$0.lastName}")).unwrap();

        let plan = compile(&tree).unwrap();
        let top_id = only_child(&plan, plan.root());
        let customer_id = only_child(&plan, top_id);
        let order_id = only_child(&plan, customer_id);

        let customer_binding = container(&plan, customer_id).binding.as_ref().unwrap();
        assert_eq!(customer_binding.port, 0);
        assert_eq!(customer_binding.parent, None);
        assert_eq!(customer_binding.keys, None);

        let order = container(&plan, order_id);
        let binding = order.binding.as_ref().unwrap();
        assert_eq!(binding.port, 1);
        assert_eq!(binding.parent, Some(customer_id));
        assert_eq!(binding.keys, Some(vec![1]));
        assert_eq!(binding.parent_keys, Some(vec![0]));
        assert_eq!(binding.filter.as_ref().unwrap().expression(), "//#CTL2\n$in.0.id > 10");

        assert_eq!(
            order.children,
            vec![WritableChild::Value(WritableValue::new(vec![
                NodeValue::Static("Order ".into()),
                NodeValue::Dynamic {
                    port: 1,
                    field: 0,
                    cardinality: Cardinality::Scalar
                },
                NodeValue::Static(" of ".into()),
                NodeValue::Dynamic {
                    port: 0,
                    field: 2,
                    cardinality: Cardinality::Scalar
                },
            ]))]
        );
        assert!(plan.port_data()[&1].cached);
    }

    #[test]
    fn test_attribute_null_lists() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let plain = tree.add_object(top, "plain").unwrap();
        tree.add_attribute(plain, "a", "").unwrap();
        let written = tree.add_object(top, "written").unwrap();
        tree.set_property(written, MappingProperty::WriteNullAttribute, "a").unwrap();
        tree.add_attribute(written, "a", "").unwrap();
        tree.add_attribute(written, "b", "").unwrap();
        let omitted = tree.add_object(top, "omitted").unwrap();
        tree.set_property(omitted, MappingProperty::OmitNullAttribute, "a").unwrap();
        tree.add_attribute(omitted, "a", "").unwrap();
        tree.add_attribute(omitted, "b", "").unwrap();

        let plan = compile(&tree).unwrap();
        let flags = |id: WritableId| -> Vec<bool> { container(&plan, id).attributes.iter().map(|a| a.write_null).collect() };
        let children: Vec<_> = container(&plan, only_child(&plan, plan.root())).child_containers().collect();
        assert_eq!(flags(children[0]), vec![false]);
        assert_eq!(flags(children[1]), vec![true, false]);
        assert_eq!(flags(children[2]), vec![false, true]);
    }

    #[test]
    fn test_wildcard_attribute_expansion() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let customer = tree.add_object(top, "customer").unwrap();
        tree.bind(customer, "0", None, None).unwrap();
        tree.set_property(customer, MappingProperty::WriteNullAttribute, "$0.lastName").unwrap();
        let wildcard = tree.set_wildcard_attribute(customer).unwrap();
        tree.set_property(wildcard, MappingProperty::Include, "c:$0.*").unwrap();
        tree.set_property(wildcard, MappingProperty::Exclude, "$0.id").unwrap();

        let plan = compile(&tree).unwrap();
        let customer = container(&plan, only_child(&plan, only_child(&plan, plan.root())));
        let names: Vec<_> = customer.attributes.iter().map(|a| a.name.static_text().unwrap()).collect();
        assert_eq!(names, vec!["firstName", "lastName"]);
        assert_eq!(customer.attributes[0].prefix, Some(WritableValue::literal("c")));
        assert_eq!(
            customer.attributes[1].value.segments,
            vec![NodeValue::Dynamic {
                port: 0,
                field: 2,
                cardinality: Cardinality::Scalar
            }]
        );
        assert!(!customer.attributes[0].write_null);
        assert!(customer.attributes[1].write_null);
    }

    #[test]
    fn test_wildcard_node_expansion() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let order = tree.add_object(top, "order").unwrap();
        tree.bind(order, "1", None, None).unwrap();
        let wildcard = tree.add_wildcard_node(order).unwrap();
        tree.set_property(wildcard, MappingProperty::Exclude, "$1.custId").unwrap();
        tree.set_property(wildcard, MappingProperty::OmitNullElement, "$1.id").unwrap();

        let plan = compile(&tree).unwrap();
        let order = container(&plan, only_child(&plan, only_child(&plan, plan.root())));
        let fields: Vec<_> = order.child_containers().map(|id| container(&plan, id)).collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, WritableValue::literal("id"));
        assert!(!fields[0].write_null);
        assert_eq!(fields[1].name, WritableValue::literal("items"));
        assert!(fields[1].write_null);
        assert_eq!(
            fields[1].children,
            vec![WritableChild::Value(WritableValue::new(vec![NodeValue::Dynamic {
                port: 1,
                field: 2,
                cardinality: Cardinality::List
            }]))]
        );
    }

    #[test]
    fn test_recursive_template_is_relinked() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let t1 = tree.add_template(top, "t1").unwrap();
        let x = tree.add_object(t1, "x").unwrap();
        tree.add_template_entry(x, "t2").unwrap();
        let t2 = tree.add_template(top, "t2").unwrap();
        let y = tree.add_object(t2, "y").unwrap();
        tree.add_template_entry(y, "t1").unwrap();
        tree.add_template_entry(top, "t1").unwrap();

        let plan = compile(&tree).unwrap();
        assert_eq!(plan.len(), tree.container_count());
        let top_id = only_child(&plan, plan.root());
        let x_id = only_child(&plan, top_id);
        let y_id = only_child(&plan, x_id);
        assert_eq!(only_child(&plan, y_id), x_id);
        assert_eq!(container(&plan, y_id).name, WritableValue::literal("y"));
    }

    #[test]
    fn test_later_sibling_reached_from_recursion() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let t = tree.add_template(top, "t").unwrap();
        let first = tree.add_object(t, "first").unwrap();
        tree.add_template_entry(first, "t").unwrap();
        tree.add_object(t, "second").unwrap();
        tree.add_template_entry(top, "t").unwrap();

        let plan = compile(&tree).unwrap();
        let top_children: Vec<_> = container(&plan, only_child(&plan, plan.root())).child_containers().collect();
        assert_eq!(top_children.len(), 2);
        let first_children: Vec<_> = container(&plan, top_children[0]).child_containers().collect();
        assert_eq!(first_children, top_children);
        assert_eq!(container(&plan, top_children[1]).name, WritableValue::literal("second"));
    }

    #[test]
    fn test_untagged_loop_is_rejected() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        tree.bind(top, "0", None, None).unwrap();

        let ports = ports();
        let error = MappingCompiler::new(&ports, CompilerConfig::default())
            .compile(&tree, &TagResult::default())
            .unwrap_err();
        assert!(matches!(error, CompileError::InconsistentTags(_)));
    }

    #[test]
    fn test_filter_failure_propagates() {
        #[derive(Debug)]
        struct Rejecting;

        impl FilterCompiler for Rejecting {
            fn compile(&self, _source: &str, _shape: Option<&RecordShape>) -> Result<Arc<dyn RowFilter>, FilterError> {
                Err(FilterError("unsupported".into()))
            }
        }

        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let item = tree.add_object(top, "item").unwrap();
        let relation = tree.bind(item, "0", None, None).unwrap();
        tree.set_property(relation, MappingProperty::Filter, "true").unwrap();

        let ports = ports();
        let tags = MappingTagger::new(&ports, TaggerConfig::default()).unwrap().tag(&tree).unwrap();
        let error = MappingCompiler::with_filter_compiler(&ports, CompilerConfig::default(), Rejecting)
            .compile(&tree, &tags)
            .unwrap_err();
        assert_eq!(
            error,
            CompileError::Filter {
                node: item,
                source: FilterError("unsupported".into())
            }
        );
    }

    #[test]
    fn test_partition_container() {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "top").unwrap();
        let item = tree.add_object(top, "item").unwrap();
        tree.bind(item, "0", None, None).unwrap();

        assert_eq!(compile(&tree).unwrap().partition(), None);

        let ports = ports();
        let tags = MappingTagger::new(&ports, TaggerConfig::default()).unwrap().tag(&tree).unwrap();
        let plan = MappingCompiler::new(&ports, CompilerConfig::default().with_partition(true))
            .compile(&tree, &tags)
            .unwrap();
        let item_id = only_child(&plan, only_child(&plan, plan.root()));
        assert_eq!(plan.partition(), Some(item_id));
    }
}
