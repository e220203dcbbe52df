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

//! Field sets selected by wildcard include/exclude expressions

use crate::expression::ParsedFieldExpression;
use treewriter_common::{Cardinality, RecordShape};

/// One field of one port; identity is the (port, position) pair
#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub port: usize,
    pub position: usize,
    pub name: String,
    pub cardinality: Cardinality,
    pub namespace: Option<String>,
}

impl PartialEq for FieldSlot {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.position == other.position
    }
}

impl Eq for FieldSlot {}

impl FieldSlot {
    /// Name as written into the output, prefixed when a namespace was given
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// Every field of a port
pub fn port_fields(port: usize, shape: &RecordShape) -> Vec<FieldSlot> {
    shape
        .fields
        .iter()
        .enumerate()
        .map(|(position, field)| FieldSlot {
            port,
            position,
            name: field.name.clone(),
            cardinality: field.cardinality,
            namespace: None,
        })
        .collect()
}

/// Fields of a port whose names match an aggregate expression
pub fn matching_fields(port: usize, shape: &RecordShape, expression: &ParsedFieldExpression) -> Vec<FieldSlot> {
    port_fields(port, shape)
        .into_iter()
        .filter(|slot| expression.matches(&slot.name))
        .map(|slot| FieldSlot {
            namespace: expression.namespace.clone(),
            ..slot
        })
        .collect()
}

/// Insertion-ordered set of field slots
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    slots: Vec<FieldSlot>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the slots, returning whether anything new was added
    pub fn add_all(&mut self, slots: impl IntoIterator<Item = FieldSlot>) -> bool {
        let mut changed = false;
        for slot in slots {
            if !self.slots.contains(&slot) {
                self.slots.push(slot);
                changed = true;
            }
        }
        changed
    }

    /// Removes the slots, returning whether anything was removed
    pub fn remove_all(&mut self, slots: &[FieldSlot]) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| !slots.contains(slot));
        before != self.slots.len()
    }

    pub fn contains(&self, slot: &FieldSlot) -> bool {
        self.slots.contains(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl IntoIterator for FieldSet {
    type Item = FieldSlot;
    type IntoIter = std::vec::IntoIter<FieldSlot>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_aggregate_expression;
    use treewriter_common::FieldType;

    fn shape() -> RecordShape {
        RecordShape::new("customer")
            .with_field("id", FieldType::Integer)
            .with_field("firstName", FieldType::String)
            .with_field("lastName", FieldType::String)
    }

    #[test]
    fn test_matching_fields() {
        let expression = parse_aggregate_expression("p:$0.*Name").unwrap();
        let slots = matching_fields(0, &shape(), &expression);
        let names: Vec<_> = slots.iter().map(FieldSlot::qualified_name).collect();
        assert_eq!(names, vec!["p:firstName", "p:lastName"]);
        assert_eq!(slots[0].position, 1);
    }

    #[test]
    fn test_set_reports_changes() {
        let mut set = FieldSet::new();
        assert!(set.add_all(port_fields(0, &shape())));
        assert!(!set.add_all(port_fields(0, &shape())));

        let id_only = matching_fields(0, &shape(), &parse_aggregate_expression("$0.id").unwrap());
        assert!(set.remove_all(&id_only));
        assert!(!set.remove_all(&id_only));
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&id_only[0]));
    }
}
