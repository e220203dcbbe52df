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

//! Input port table and record shapes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Long,
    Number,
    Decimal,
    Boolean,
    Date,
    Byte,
}

/// Whether a field holds one value or a list of values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Scalar,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: String,
    pub data_type: FieldType,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl FieldShape {
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            name: name.into(),
            data_type,
            cardinality: Cardinality::Scalar,
        }
    }

    pub fn list(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            cardinality: Cardinality::List,
            ..Self::new(name, data_type)
        }
    }
}

/// Record metadata of one input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordShape {
    pub name: String,
    pub fields: Vec<FieldShape>,
}

impl RecordShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, data_type: FieldType) -> Self {
        self.fields.push(FieldShape::new(name, data_type));
        self
    }

    pub fn with_list_field(mut self, name: impl Into<String>, data_type: FieldType) -> Self {
        self.fields.push(FieldShape::list(name, data_type));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Connected input ports by index; a port may be connected without known metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortTable {
    ports: BTreeMap<usize, Option<RecordShape>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, index: usize, shape: RecordShape) -> Self {
        self.ports.insert(index, Some(shape));
        self
    }

    /// Registers a connected port whose record shape is unknown
    pub fn with_unknown_port(mut self, index: usize) -> Self {
        self.ports.insert(index, None);
        self
    }

    pub fn insert(&mut self, index: usize, shape: Option<RecordShape>) {
        self.ports.insert(index, shape);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.ports.contains_key(&index)
    }

    /// Record shape of a port, `None` when unconnected or unknown
    pub fn shape(&self, index: usize) -> Option<&RecordShape> {
        self.ports.get(&index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Port indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.ports.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&RecordShape>)> {
        self.ports.iter().map(|(index, shape)| (*index, shape.as_ref()))
    }

    /// Resolves a port by index or by record name against the whole table.
    ///
    /// An integer resolves only to an existing index. Any other string
    /// resolves to the first port whose record name equals it.
    pub fn resolve(&self, name_or_index: &str) -> Option<usize> {
        self.resolve_all(name_or_index).into_iter().next()
    }

    /// Every port matching `name_or_index`; more than one means an ambiguous name
    pub fn resolve_all(&self, name_or_index: &str) -> Vec<usize> {
        match name_or_index.parse::<usize>() {
            Ok(index) if self.contains(index) => vec![index],
            Ok(_) => Vec::new(),
            Err(_) => self
                .ports
                .iter()
                .filter(|(_, shape)| shape.as_ref().is_some_and(|s| s.name == name_or_index))
                .map(|(index, _)| *index)
                .collect(),
        }
    }

    /// Resolution restricted to the ports currently in scope, scanned outermost first
    pub fn resolve_local(&self, name_or_index: &str, available: &[usize]) -> Option<usize> {
        self.resolve_local_all(name_or_index, available).into_iter().next()
    }

    pub fn resolve_local_all(&self, name_or_index: &str, available: &[usize]) -> Vec<usize> {
        match name_or_index.parse::<usize>() {
            Ok(index) => available.iter().copied().filter(|p| *p == index).take(1).collect(),
            Err(_) => available
                .iter()
                .copied()
                .filter(|p| self.shape(*p).is_some_and(|s| s.name == name_or_index))
                .collect(),
        }
    }
}

/// One field of a declared sort order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    pub name: String,
    pub ascending: bool,
}

/// Externally declared order in which a port delivers its records
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortHint {
    pub fields: Vec<SortField>,
}

impl SortHint {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Whether `key` names the leading fields of this order, position by position
    pub fn starts_with<S: AsRef<str>>(&self, key: &[S]) -> bool {
        key.len() <= self.fields.len() && key.iter().zip(&self.fields).all(|(k, field)| k.as_ref() == field.name)
    }
}
