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

//! Write-plan consumed by the streaming serializer
//!
//! Containers are stored in an arena and referenced by [`WritableId`], which
//! lets a recursive template re-link an already compiled container instead
//! of copying it. Everything here is fully resolved: the serializer only
//! emits literals and reads fields at the given positions.

use crate::metadata::{Cardinality, RecordShape, SortHint};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WritableId(usize);

impl WritableId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One segment of a resolved value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeValue {
    Static(String),
    Dynamic { port: usize, field: usize, cardinality: Cardinality },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WritableValue {
    pub segments: Vec<NodeValue>,
}

impl WritableValue {
    pub fn new(segments: Vec<NodeValue>) -> Self {
        Self { segments }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            segments: vec![NodeValue::Static(text.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenated text when the value has no dynamic segment
    pub fn static_text(&self) -> Option<String> {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                NodeValue::Static(s) => text.push_str(s),
                NodeValue::Dynamic { .. } => return None,
            }
        }
        Some(text)
    }

    pub fn is_dynamic(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, NodeValue::Dynamic { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WritableNamespace {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WritableAttribute {
    pub name: WritableValue,
    pub prefix: Option<WritableValue>,
    pub value: WritableValue,
    pub write_null: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WritableChild {
    Container(WritableId),
    Value(WritableValue),
    Comment(WritableValue),
    CData(WritableValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerKind {
    Object,
    Collection,
}

/// Compiled row filter handed back by the filter subsystem
pub trait RowFilter: fmt::Debug + Send + Sync {
    /// Source text the filter was compiled from
    fn expression(&self) -> &str;
}

/// Join of a repeating container to its driving port
#[derive(Debug, Clone, Serialize)]
pub struct PortBinding {
    pub port: usize,
    /// Enclosing loop container whose binding is the parent binding
    pub parent: Option<WritableId>,
    pub keys: Option<Vec<usize>>,
    pub parent_keys: Option<Vec<usize>>,
    #[serde(skip)]
    pub filter: Option<Arc<dyn RowFilter>>,
}

impl PortBinding {
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WritableContainer {
    pub kind: ContainerKind,
    pub name: WritableValue,
    pub prefix: Option<WritableValue>,
    pub write_null: bool,
    pub hidden: bool,
    pub is_root: bool,
    pub data_type: Option<String>,
    pub binding: Option<PortBinding>,
    pub namespaces: Vec<WritableNamespace>,
    pub attributes: Vec<WritableAttribute>,
    pub children: Vec<WritableChild>,
}

impl WritableContainer {
    pub fn new(kind: ContainerKind, name: WritableValue, prefix: Option<WritableValue>) -> Self {
        Self {
            kind,
            name,
            prefix,
            write_null: false,
            hidden: false,
            is_root: false,
            data_type: None,
            binding: None,
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_loop(&self) -> bool {
        self.binding.is_some()
    }

    /// Ids of child containers, in write order
    pub fn child_containers(&self) -> impl Iterator<Item = WritableId> + '_ {
        self.children.iter().filter_map(|child| match child {
            WritableChild::Container(id) => Some(*id),
            _ => None,
        })
    }
}

/// What the port-data materializer must prepare for one used port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortData {
    pub port: usize,
    pub shape: Option<RecordShape>,
    pub cached: bool,
    pub cached_reason: Option<String>,
    /// Key shapes the port is joined on; an empty list stands for unkeyed access
    pub keys: BTreeSet<Vec<String>>,
    pub sort_hint: Option<SortHint>,
}

/// Compiled write-plan
#[derive(Debug, Clone, Serialize)]
pub struct WritableMapping {
    containers: Vec<WritableContainer>,
    root: WritableId,
    partition: Option<WritableId>,
    ports: BTreeMap<usize, PortData>,
}

impl WritableMapping {
    pub fn new(
        containers: Vec<WritableContainer>,
        root: WritableId,
        partition: Option<WritableId>,
        ports: BTreeMap<usize, PortData>,
    ) -> Self {
        Self {
            containers,
            root,
            partition,
            ports,
        }
    }

    pub fn root(&self) -> WritableId {
        self.root
    }

    pub fn partition(&self) -> Option<WritableId> {
        self.partition
    }

    pub fn container(&self, id: WritableId) -> Option<&WritableContainer> {
        self.containers.get(id.0)
    }

    pub fn containers(&self) -> &[WritableContainer] {
        &self.containers
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn port_data(&self) -> &BTreeMap<usize, PortData> {
        &self.ports
    }

    pub fn bindings(&self) -> impl Iterator<Item = (WritableId, &PortBinding)> {
        self.containers
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.binding.as_ref().map(|b| (WritableId(i), b)))
    }
}

/// Arena used while compiling a plan
#[derive(Debug, Default)]
pub struct PlanArena {
    containers: Vec<WritableContainer>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, container: WritableContainer) -> WritableId {
        self.containers.push(container);
        WritableId(self.containers.len() - 1)
    }

    pub fn get(&self, id: WritableId) -> Option<&WritableContainer> {
        self.containers.get(id.0)
    }

    pub fn get_mut(&mut self, id: WritableId) -> Option<&mut WritableContainer> {
        self.containers.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn finish(self, root: WritableId, partition: Option<WritableId>, ports: BTreeMap<usize, PortData>) -> WritableMapping {
        WritableMapping::new(self.containers, root, partition, ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_text() {
        let value = WritableValue::new(vec![NodeValue::Static("a".into()), NodeValue::Static("b".into())]);
        assert_eq!(value.static_text().as_deref(), Some("ab"));
        assert!(!value.is_dynamic());

        let dynamic = WritableValue::new(vec![
            NodeValue::Static("id=".into()),
            NodeValue::Dynamic { port: 0, field: 1, cardinality: Cardinality::Scalar },
        ]);
        assert_eq!(dynamic.static_text(), None);
        assert!(dynamic.is_dynamic());
    }

    #[test]
    fn test_arena_links_children() {
        let mut arena = PlanArena::new();
        let root = arena.push(WritableContainer::new(ContainerKind::Object, WritableValue::default(), None));
        let child = arena.push(WritableContainer::new(ContainerKind::Collection, WritableValue::literal("items"), None));
        arena.get_mut(root).unwrap().children.push(WritableChild::Container(child));
        arena.get_mut(child).unwrap().binding = Some(PortBinding {
            port: 0,
            parent: None,
            keys: None,
            parent_keys: None,
            filter: None,
        });

        let plan = arena.finish(root, Some(child), BTreeMap::new());
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.container(root).unwrap().child_containers().collect::<Vec<_>>(), vec![child]);
        assert_eq!(plan.partition(), Some(child));
        assert_eq!(plan.bindings().count(), 1);
        assert!(plan.container(child).unwrap().is_loop());
    }
}
