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

//! Mapping validation
//!
//! The validator walks the design tree once and records every problem it
//! finds against the (node, property) pair that caused it. It never fails:
//! the outcome is a [`ValidationReport`]. Recording stops once the
//! configured error budget is spent and the walk itself stops once the
//! abort limit is exceeded.
//!
//! Format independent checks (port bindings, join keys, field references,
//! template names) live here. Output format rules plug in through
//! [`MappingRules`]; [`XmlMappingRules`] is the XML rule set.

mod problems;
mod rules;

pub use problems::{MappingError, ProblemMap, Severity};
pub use rules::XmlMappingRules;

use crate::config::ValidatorConfig;
use crate::expression::{field_references, parse_bool, split_list};
use crate::walk::{expand_template, visit_children, visit_object_parts, walk, MappingVisitor, TemplateExpansion};
use problems::ErrorBudget;
use std::convert::Infallible;
use tracing::{debug, info, instrument, warn};
use treewriter_common::{DesignTree, MappingProperty, NodeId, PortTable, MAPPING_NAMESPACE_URI};

/// Format specific validation hooks, called once per visited node
pub trait MappingRules {
    fn validate_element(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_collection(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_attribute(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_namespace(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_relation(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_template_entry(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_comment(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_cdata(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_wildcard_node(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}

    fn validate_wildcard_attribute(&self, _cx: &mut ValidationContext<'_>, _node: NodeId) {}
}

/// Only the format independent checks
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreRules;

impl MappingRules for CoreRules {}

/// Outcome of one validation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    problems: ProblemMap,
    errors: usize,
    warnings: usize,
    completed: bool,
}

impl ValidationReport {
    /// Whether any error was found, recorded or not
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Errors found, including those past the recording budget
    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    /// `false` when the walk stopped at the abort limit
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn problems(&self) -> &ProblemMap {
        &self.problems
    }

    pub fn problems_for(&self, node: NodeId, property: MappingProperty) -> &[MappingError] {
        self.problems.get(node, property)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, MappingProperty, &MappingError)> {
        self.problems.iter()
    }
}

/// State of one validation walk, handed to [`MappingRules`] hooks
pub struct ValidationContext<'t> {
    tree: &'t DesignTree,
    ports: &'t PortTable,
    expansion: TemplateExpansion,
    /// Ports bound by enclosing loops, outermost first
    available: Vec<usize>,
    problems: ProblemMap,
    budget: ErrorBudget,
    partition: Option<NodeId>,
}

impl<'t> ValidationContext<'t> {
    fn new(tree: &'t DesignTree, ports: &'t PortTable, config: ValidatorConfig) -> Self {
        Self {
            tree,
            ports,
            expansion: TemplateExpansion::new(),
            available: Vec::new(),
            problems: ProblemMap::new(),
            budget: ErrorBudget::new(config),
            partition: None,
        }
    }

    pub fn tree(&self) -> &'t DesignTree {
        self.tree
    }

    pub fn ports(&self) -> &'t PortTable {
        self.ports
    }

    pub fn expansion(&self) -> &TemplateExpansion {
        &self.expansion
    }

    pub fn available_ports(&self) -> &[usize] {
        &self.available
    }

    pub fn is_running(&self) -> bool {
        self.budget.is_running()
    }

    /// Partition element seen so far
    pub fn partition(&self) -> Option<NodeId> {
        self.partition
    }

    pub fn set_partition(&mut self, node: NodeId) {
        self.partition = Some(node);
    }

    pub fn add_problem(&mut self, node: NodeId, property: MappingProperty, problem: MappingError) {
        if self.budget.admit(problem.severity()) {
            self.problems.insert(node, property, problem);
        }
    }

    pub fn error(&mut self, node: NodeId, property: MappingProperty, message: impl Into<String>) {
        self.add_problem(node, property, MappingError::error(message));
    }

    pub fn warning(&mut self, node: NodeId, property: MappingProperty, message: impl Into<String>) {
        self.add_problem(node, property, MappingError::warning(message));
    }

    /// `node` followed by its template-aware ancestors
    pub fn scope_chain(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = vec![node];
        chain.extend(self.expansion.ancestors(self.tree, node));
        chain
    }

    pub fn recurring_parent(&self, node: NodeId) -> Option<NodeId> {
        self.expansion.recurring_parent(self.tree, node)
    }

    /// Whether a namespace other than `except` binds `prefix` on `scope` or above
    pub fn is_prefix_declared(&self, scope: NodeId, prefix: &str, except: Option<NodeId>) -> bool {
        let tree = self.tree;
        self.scope_chain(scope).into_iter().any(|id| {
            tree.namespaces(id)
                .iter()
                .any(|ns| Some(*ns) != except && tree.property(*ns, MappingProperty::Name) == Some(prefix))
        })
    }

    /// Like [`Self::is_prefix_declared`], with the built-in `xml` prefixes always available
    pub fn is_prefix_available(&self, scope: NodeId, prefix: &str) -> bool {
        prefix == "xml" || prefix == "xmlns" || self.is_prefix_declared(scope, prefix, None)
    }

    /// Resolves a port among the loops in scope, warning when a name is ambiguous
    pub fn available_port(&mut self, name_or_index: &str, node: NodeId, property: MappingProperty) -> Option<usize> {
        let mut distinct: Vec<usize> = Vec::new();
        for port in self.ports.resolve_local_all(name_or_index, &self.available) {
            if !distinct.contains(&port) {
                distinct.push(port);
            }
        }
        if distinct.len() > 1 {
            self.warning(node, property, format!("Ambiguous port '{}'", name_or_index));
        }
        distinct.first().copied()
    }

    /// Checks that every field of `fields` exists in the record of `port`
    pub fn check_fields(&mut self, node: NodeId, property: MappingProperty, port: usize, fields: &[String]) {
        let Some(shape) = self.ports.shape(port) else {
            self.error(node, property, "Port metadata not available");
            return;
        };
        for field in fields {
            if shape.field(field).is_none() {
                self.error(
                    node,
                    property,
                    format!("Record '{}' does not contain field '{}'", shape.name, field),
                );
            }
        }
    }

    pub fn check_bool(&mut self, node: NodeId, property: MappingProperty) {
        if let Some(value) = self.tree.property(node, property) {
            if !value.is_empty() && parse_bool(value).is_none() {
                self.error(node, property, "Attribute accepts only boolean type values (true/false)");
            }
        }
    }

    /// Reports a missing mapping namespace on `container`
    pub fn check_mapping_namespace(&mut self, container: NodeId) {
        let tree = self.tree;
        let declared = self.scope_chain(container).into_iter().any(|id| {
            tree.namespaces(id).iter().any(|ns| {
                tree.property(*ns, MappingProperty::Value)
                    .is_some_and(|uri| uri.eq_ignore_ascii_case(MAPPING_NAMESPACE_URI))
            })
        });
        if !declared {
            self.error(container, MappingProperty::Unknown, "Mapping namespace is not available!");
        }
    }

    /// Checks the VALUE of `node`, which must be present and reference only fields in scope
    pub fn validate_value(&mut self, node: NodeId) {
        let tree = self.tree;
        match tree.property(node, MappingProperty::Value) {
            Some(value) if !value.is_empty() => self.validate_references(node, value, MappingProperty::Value),
            _ => self.warning(node, MappingProperty::Value, "Empty value"),
        }
    }

    /// Checks the field references of `text`, a value of `property`
    pub fn validate_references(&mut self, node: NodeId, text: &str, property: MappingProperty) {
        let port_property = if property == MappingProperty::Value {
            MappingProperty::InputPort
        } else {
            property
        };
        for reference in field_references(text) {
            let Some(port) = self.available_port(&reference.port, node, port_property) else {
                self.error(
                    node,
                    port_property,
                    format!("Input port '{}' is not available here!", reference.port),
                );
                continue;
            };
            match self.ports.shape(port) {
                None => self.error(node, port_property, format!("Metadata of port '{}' not available", reference.port)),
                Some(shape) if shape.field(&reference.field).is_none() => {
                    self.error(node, property, format!("Field '{}' is not available.", reference.field))
                }
                Some(_) => {}
            }
        }
    }

    /// Pushes every port the relation of `container` resolves to, returning how many
    fn push_relation_ports(&mut self, container: NodeId) -> usize {
        let tree = self.tree;
        let Some(relation) = tree.relation(container) else {
            return 0;
        };
        let Some(text) = tree.property(relation, MappingProperty::InputPort) else {
            return 0;
        };
        let ports = self.ports.resolve_all(text);
        if ports.len() > 1 {
            self.warning(relation, MappingProperty::InputPort, "Ambiguous ports!");
        }
        self.available.extend_from_slice(&ports);
        ports.len()
    }

    fn pop_ports(&mut self, count: usize) {
        let len = self.available.len().saturating_sub(count);
        self.available.truncate(len);
    }

    fn check_relation(&mut self, relation: NodeId) {
        let tree = self.tree;
        let Some(owner) = tree.parent(relation) else {
            return;
        };
        let Some(port_text) = tree.property(relation, MappingProperty::InputPort) else {
            self.error(relation, MappingProperty::InputPort, "Input port not specified!");
            return;
        };
        let Some(port) = self.ports.resolve(port_text) else {
            self.error(
                relation,
                MappingProperty::InputPort,
                format!("Input port '{}' is not connected!", port_text),
            );
            return;
        };

        let key = tree.property(relation, MappingProperty::Key);
        let parent_key = tree.property(relation, MappingProperty::ParentKey);
        match (key, parent_key) {
            (Some(_), None) => self.missing_key(relation, MappingProperty::ParentKey),
            (None, Some(_)) => self.missing_key(relation, MappingProperty::Key),
            _ => {}
        }

        let keys = key.map(split_list);
        if let Some(keys) = &keys {
            self.check_fields(relation, MappingProperty::Key, port, keys);
        }

        let parent_keys = parent_key.map(split_list);
        if let Some(parent_keys) = &parent_keys {
            let parent_port = self
                .recurring_parent(owner)
                .and_then(|parent| tree.relation_property(parent, MappingProperty::InputPort))
                .and_then(|text| self.available_port(text, relation, MappingProperty::ParentKey));
            match parent_port {
                Some(parent_port) => self.check_fields(relation, MappingProperty::ParentKey, parent_port, parent_keys),
                None => self.error(relation, MappingProperty::ParentKey, "No data for parent key fields!"),
            }
        }

        if let (Some(keys), Some(parent_keys)) = (&keys, &parent_keys) {
            if keys.len() != parent_keys.len() {
                self.error(relation, MappingProperty::Key, "Count of fields must match parent key field count");
                self.error(relation, MappingProperty::ParentKey, "Count of fields must match key field count");
            }
        }
    }

    fn missing_key(&mut self, relation: NodeId, property: MappingProperty) {
        self.error(relation, property, format!("{} attribute not specified!", property.name()));
    }

    fn into_report(self) -> ValidationReport {
        ValidationReport {
            problems: self.problems,
            errors: self.budget.errors(),
            warnings: self.budget.warnings(),
            completed: self.budget.is_running(),
        }
    }
}

/// Properties only meaningful with the mapping namespace in scope
const MAPPING_ELEMENT_PROPERTIES: [MappingProperty; 7] = [
    MappingProperty::WriteNullElement,
    MappingProperty::OmitNullElement,
    MappingProperty::WriteNullAttribute,
    MappingProperty::OmitNullAttribute,
    MappingProperty::Hide,
    MappingProperty::Partition,
    MappingProperty::DataType,
];

struct ValidationPass<'t, 'r, R: ?Sized> {
    cx: ValidationContext<'t>,
    rules: &'r R,
}

impl<R: MappingRules + ?Sized> ValidationPass<'_, '_, R> {
    fn is_active(&self) -> bool {
        self.cx.is_running() && !self.cx.expansion.is_in_recursion()
    }

    fn check_parent_namespace(&mut self, node: NodeId) {
        if let Some(parent) = self.cx.tree.parent(node) {
            self.cx.check_mapping_namespace(parent);
        }
    }
}

impl<'t, R: MappingRules + ?Sized> MappingVisitor<'t> for ValidationPass<'t, '_, R> {
    type Error = Infallible;

    fn tree(&self) -> &'t DesignTree {
        self.cx.tree
    }

    fn expansion(&self) -> &TemplateExpansion {
        &self.cx.expansion
    }

    fn expansion_mut(&mut self) -> &mut TemplateExpansion {
        &mut self.cx.expansion
    }

    fn visit_object(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if !self.is_active() {
            return Ok(());
        }
        let tree = self.cx.tree;
        if node == tree.root() {
            return visit_object_parts(self, node);
        }
        if tree.node(node).is_template() {
            self.cx.check_mapping_namespace(node);
            if tree.property(node, MappingProperty::Name).is_none_or(str::is_empty) {
                self.cx.error(node, MappingProperty::Name, "Unspecified template name");
            }
            return Ok(());
        }

        if MAPPING_ELEMENT_PROPERTIES.iter().any(|p| tree.property(node, *p).is_some()) {
            self.cx.check_mapping_namespace(node);
        }
        self.cx.check_bool(node, MappingProperty::WriteNullElement);
        self.cx.check_bool(node, MappingProperty::Hide);

        let pushed = self.cx.push_relation_ports(node);
        self.rules.validate_element(&mut self.cx, node);
        let result = visit_object_parts(self, node);
        self.cx.pop_ports(pushed);
        result
    }

    fn visit_collection(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if !self.is_active() {
            return Ok(());
        }
        let pushed = self.cx.push_relation_ports(node);
        self.rules.validate_collection(&mut self.cx, node);
        let result = visit_children(self, node);
        self.cx.pop_ports(pushed);
        result
    }

    fn visit_template_entry(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if !self.is_active() {
            return Ok(());
        }
        let tree = self.cx.tree;
        self.check_parent_namespace(node);
        let known = tree
            .property(node, MappingProperty::Name)
            .and_then(|name| tree.template(name))
            .is_some();
        if !known {
            self.cx.error(node, MappingProperty::Name, "Unknown template");
        }
        self.rules.validate_template_entry(&mut self.cx, node);
        expand_template(self, node)
    }

    fn visit_attribute(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.rules.validate_attribute(&mut self.cx, node);
        }
        Ok(())
    }

    fn visit_value(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.cx.validate_value(node);
        }
        Ok(())
    }

    fn visit_namespace(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.rules.validate_namespace(&mut self.cx, node);
        }
        Ok(())
    }

    fn visit_relation(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.check_parent_namespace(node);
            self.cx.check_relation(node);
            self.rules.validate_relation(&mut self.cx, node);
        }
        Ok(())
    }

    fn visit_comment(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.rules.validate_comment(&mut self.cx, node);
        }
        Ok(())
    }

    fn visit_cdata(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.rules.validate_cdata(&mut self.cx, node);
        }
        Ok(())
    }

    fn visit_wildcard_node(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.check_parent_namespace(node);
            self.rules.validate_wildcard_node(&mut self.cx, node);
        }
        Ok(())
    }

    fn visit_wildcard_attribute(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.is_active() {
            self.check_parent_namespace(node);
            self.rules.validate_wildcard_attribute(&mut self.cx, node);
        }
        Ok(())
    }
}

/// Validates design trees against the input ports they read from
#[derive(Debug, Clone)]
pub struct MappingValidator<'p, R = XmlMappingRules> {
    ports: &'p PortTable,
    config: ValidatorConfig,
    rules: R,
}

impl<'p> MappingValidator<'p, XmlMappingRules> {
    pub fn new(ports: &'p PortTable, config: ValidatorConfig) -> Self {
        Self::with_rules(ports, config, XmlMappingRules)
    }
}

impl<'p, R: MappingRules> MappingValidator<'p, R> {
    pub fn with_rules(ports: &'p PortTable, config: ValidatorConfig, rules: R) -> Self {
        Self { ports, config, rules }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn set_max_errors(&mut self, max_errors: usize) {
        self.config.set_max_errors(max_errors);
    }

    pub fn set_max_errors_limit(&mut self, max_errors_limit: usize) {
        self.config.set_max_errors_limit(max_errors_limit);
    }

    pub fn set_max_warnings(&mut self, max_warnings: usize) {
        self.config.set_max_warnings(max_warnings);
    }

    /// Walks `tree` and collects every problem within the error budget
    #[instrument(skip_all, fields(nodes = tree.len()))]
    pub fn validate(&self, tree: &DesignTree) -> ValidationReport {
        debug!(
            max_errors = self.config.max_errors(),
            max_errors_limit = self.config.max_errors_limit(),
            "validating mapping"
        );
        let mut pass = ValidationPass {
            cx: ValidationContext::new(tree, self.ports, self.config),
            rules: &self.rules,
        };
        match walk(&mut pass) {
            Ok(()) => {}
            Err(never) => match never {},
        }

        let report = pass.cx.into_report();
        if !report.is_complete() {
            warn!(errors = report.error_count(), "validation aborted after too many errors");
        }
        info!(
            errors = report.error_count(),
            warnings = report.warning_count(),
            recorded = report.problems().len(),
            "mapping validated"
        );
        report
    }
}
