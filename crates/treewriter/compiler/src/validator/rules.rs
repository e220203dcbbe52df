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

//! XML output rules

use super::{MappingRules, ValidationContext};
use crate::expression::{
    is_field_reference, is_qname, parse_aggregate_expression, parse_bool, replace_field_references, split_list,
    split_qualified_name,
};
use crate::fields::{matching_fields, port_fields, FieldSet, FieldSlot};
use std::collections::HashSet;
use treewriter_common::{MappingProperty, NodeId};

/// Element, attribute and namespace rules of XML documents
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlMappingRules;

impl XmlMappingRules {
    /// Checks an element or attribute name; prefixes resolve from `scope`
    fn validate_name(&self, cx: &mut ValidationContext<'_>, node: NodeId, name: &str, scope: NodeId) {
        if !is_qname(name) {
            if is_qname(&replace_field_references(name, "x")) {
                cx.validate_references(node, name, MappingProperty::Name);
            } else {
                cx.error(node, MappingProperty::Name, format!("Invalid name '{}'", name));
                return;
            }
        }
        if let (Some(prefix), _) = split_qualified_name(name) {
            if !is_field_reference(prefix) && !cx.is_prefix_available(scope, prefix) {
                cx.error(node, MappingProperty::Name, format!("Namespace '{}' is not available!", prefix));
            }
        }
    }

    fn validate_container_name(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        match tree.property(node, MappingProperty::Name) {
            Some(name) if !name.is_empty() => self.validate_name(cx, node, name, node),
            _ => cx.error(node, MappingProperty::Name, "Name must not be empty"),
        }
    }

    fn validate_partition(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        let Some(value) = tree.property(node, MappingProperty::Partition) else {
            return;
        };
        cx.check_bool(node, MappingProperty::Partition);
        if parse_bool(value) != Some(true) {
            return;
        }
        if cx.recurring_parent(node).is_some() {
            cx.error(node, MappingProperty::Partition, "Partition element must be top level recurring element");
        }
        match cx.partition() {
            Some(other) if other != node => {
                let message = "There can be only one partition element defined";
                cx.error(node, MappingProperty::Partition, message);
                cx.error(other, MappingProperty::Partition, message);
            }
            Some(_) => {}
            None => cx.set_partition(node),
        }
    }

    /// Names of the explicit attributes of `owner`, warning on duplicates
    fn attribute_names(&self, cx: &mut ValidationContext<'_>, owner: NodeId, report: bool) -> HashSet<String> {
        let tree = cx.tree();
        let mut names = HashSet::new();
        for &attribute in tree.attributes(owner) {
            let Some(name) = tree.property(attribute, MappingProperty::Name) else {
                continue;
            };
            if !names.insert(name.to_string()) && report {
                cx.warning(attribute, MappingProperty::Name, format!("Duplicate attribute name {}", name));
            }
        }
        names
    }

    fn no_effect(&self, cx: &mut ValidationContext<'_>, node: NodeId, property: MappingProperty, expression: &str) {
        cx.warning(node, property, format!("Expression '{}' has no effect", expression));
    }

    /// Fields selected by one aggregate expression, `None` when it is malformed
    fn expression_fields(&self, cx: &mut ValidationContext<'_>, node: NodeId, property: MappingProperty, expression: &str) -> Option<Vec<FieldSlot>> {
        let Some(parsed) = parse_aggregate_expression(expression) else {
            cx.error(node, property, format!("Invalid expression '{}'", expression));
            return None;
        };
        let slots = match cx.available_port(&parsed.port, node, property) {
            None => {
                cx.error(node, property, format!("Port '{}' is not available", parsed.port));
                Vec::new()
            }
            Some(port) => match cx.ports().shape(port) {
                None => {
                    cx.error(node, property, format!("Metadata of port '{}' not available", parsed.port));
                    Vec::new()
                }
                Some(shape) => matching_fields(port, shape, &parsed),
            },
        };
        if let Some(namespace) = &parsed.namespace {
            let scope = scope_of(cx, node);
            if !is_field_reference(namespace) && !cx.is_prefix_available(scope, namespace) {
                cx.error(node, property, format!("Namespace '{}' is not available!", namespace));
            }
        }
        Some(slots)
    }

    /// Every field of every port in scope
    fn available_fields(&self, cx: &mut ValidationContext<'_>, node: NodeId, property: MappingProperty) -> Vec<FieldSlot> {
        let mut ports: Vec<usize> = Vec::new();
        for port in cx.available_ports() {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
        let mut slots = Vec::new();
        for port in ports {
            match cx.ports().shape(port) {
                Some(shape) => slots.extend(port_fields(port, shape)),
                None => cx.error(node, property, format!("Metadata of port '{}' not available", port)),
            }
        }
        slots
    }

    fn check_include_exclude(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        if tree.property(node, MappingProperty::Include).is_none() && tree.property(node, MappingProperty::Exclude).is_none() {
            cx.error(node, MappingProperty::Include, "Missing attribute include");
            cx.error(node, MappingProperty::Exclude, "Missing attribute exclude");
        }
    }

    /// Fields a wildcard writes: the include list, or everything in scope, minus the exclude list
    fn wildcard_fields(&self, cx: &mut ValidationContext<'_>, node: NodeId) -> FieldSet {
        let tree = cx.tree();
        let mut set = FieldSet::new();
        match tree.property(node, MappingProperty::Include) {
            Some(include) => {
                for expression in split_list(include) {
                    if let Some(slots) = self.expression_fields(cx, node, MappingProperty::Include, &expression) {
                        if !set.add_all(slots) {
                            self.no_effect(cx, node, MappingProperty::Include, &expression);
                        }
                    }
                }
            }
            None => {
                let slots = self.available_fields(cx, node, MappingProperty::Include);
                set.add_all(slots);
            }
        }
        if let Some(exclude) = tree.property(node, MappingProperty::Exclude) {
            for expression in split_list(exclude) {
                if let Some(slots) = self.expression_fields(cx, node, MappingProperty::Exclude, &expression) {
                    if !set.remove_all(&slots) {
                        self.no_effect(cx, node, MappingProperty::Exclude, &expression);
                    }
                }
            }
        }
        set
    }

    /// Checks a write-null list and its omit-null counterpart declared on `holder`
    fn validate_null_lists(
        &self,
        cx: &mut ValidationContext<'_>,
        holder: NodeId,
        (write_property, omit_property): (MappingProperty, MappingProperty),
        explicit_names: &HashSet<String>,
    ) {
        let tree = cx.tree();
        let write = tree.property(holder, write_property);
        let omit = tree.property(holder, omit_property);
        let mut set = FieldSet::new();
        if let Some(write) = write {
            for expression in split_list(write) {
                if explicit_names.contains(&expression) {
                    continue;
                }
                if let Some(slots) = self.expression_fields(cx, holder, write_property, &expression) {
                    if !set.add_all(slots) {
                        self.no_effect(cx, holder, write_property, &expression);
                    }
                }
            }
        } else if omit.is_some() {
            let slots = self.available_fields(cx, holder, omit_property);
            set.add_all(slots);
        }
        if let Some(omit) = omit {
            for expression in split_list(omit) {
                if explicit_names.contains(&expression) {
                    continue;
                }
                if let Some(slots) = self.expression_fields(cx, holder, omit_property, &expression) {
                    if !set.remove_all(&slots) {
                        self.no_effect(cx, holder, omit_property, &expression);
                    }
                }
            }
        }
    }
}

/// Container whose namespaces are in scope for `node`
fn scope_of(cx: &ValidationContext<'_>, node: NodeId) -> NodeId {
    let tree = cx.tree();
    if tree.node(node).is_container() {
        node
    } else {
        tree.parent(node).unwrap_or(node)
    }
}

impl MappingRules for XmlMappingRules {
    fn validate_element(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        self.validate_container_name(cx, node);

        let relation = tree.relation(node);
        if relation.is_none() && tree.property(node, MappingProperty::Hide).and_then(parse_bool) == Some(true) {
            cx.error(node, MappingProperty::Hide, "Only element with input port connected can be hidden");
        }
        if relation.is_some() && tree.parent(node) == Some(tree.root()) {
            cx.error(node, MappingProperty::Unknown, "Root element cannot be a loop element");
        }

        if tree.wildcard_attribute(node).is_none() {
            let names = self.attribute_names(cx, node, true);
            for property in [MappingProperty::WriteNullAttribute, MappingProperty::OmitNullAttribute] {
                if let Some(list) = tree.property(node, property) {
                    for expression in split_list(list) {
                        if !names.contains(&expression) {
                            self.no_effect(cx, node, property, &expression);
                        }
                    }
                }
            }
        } else {
            self.attribute_names(cx, node, true);
        }

        self.validate_partition(cx, node);
    }

    fn validate_collection(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        self.validate_container_name(cx, node);
        self.validate_partition(cx, node);
    }

    fn validate_attribute(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        match tree.property(node, MappingProperty::Name) {
            Some(name) if !name.is_empty() => {
                let scope = scope_of(cx, node);
                self.validate_name(cx, node, name, scope);
            }
            _ => cx.error(node, MappingProperty::Name, "Empty name"),
        }
        cx.validate_value(node);
    }

    fn validate_namespace(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        if tree.property(node, MappingProperty::Value).is_none() {
            cx.error(node, MappingProperty::Value, "URI not specified.");
        }
        let prefix = tree.property(node, MappingProperty::Name).unwrap_or_default();
        let Some(owner) = tree.parent(node) else {
            return;
        };
        let redeclared = tree
            .namespaces(owner)
            .iter()
            .any(|other| *other != node && tree.property(*other, MappingProperty::Name).unwrap_or_default() == prefix);
        if redeclared {
            cx.error(
                node,
                MappingProperty::Name,
                format!("Prefix '{}' is already declared in this scope", prefix),
            );
        }
    }

    fn validate_comment(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        cx.check_bool(node, MappingProperty::Write);
        if let Some(text) = tree.property(node, MappingProperty::Value) {
            cx.validate_references(node, text, MappingProperty::Value);
        }
    }

    fn validate_cdata(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        cx.validate_value(node);
    }

    fn validate_wildcard_node(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        self.check_include_exclude(cx, node);
        self.wildcard_fields(cx, node);
        self.validate_null_lists(
            cx,
            node,
            (MappingProperty::WriteNullElement, MappingProperty::OmitNullElement),
            &HashSet::new(),
        );
    }

    fn validate_wildcard_attribute(&self, cx: &mut ValidationContext<'_>, node: NodeId) {
        let tree = cx.tree();
        let Some(owner) = tree.parent(node) else {
            return;
        };
        self.check_include_exclude(cx, node);
        let fields = self.wildcard_fields(cx, node);

        let explicit = self.attribute_names(cx, owner, false);
        let mut names = explicit.clone();
        for slot in fields.iter() {
            let name = slot.qualified_name();
            if !names.insert(name.clone()) {
                cx.warning(node, MappingProperty::Include, format!("Duplicate attribute name {}", name));
            }
        }

        self.validate_null_lists(
            cx,
            owner,
            (MappingProperty::WriteNullAttribute, MappingProperty::OmitNullAttribute),
            &explicit,
        );
    }
}
