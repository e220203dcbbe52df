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

//! Closed set of mapping properties and the per-node property store

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named properties a design node may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MappingProperty {
    Name,
    Value,
    InputPort,
    Key,
    ParentKey,
    Filter,
    Hide,
    WriteNullElement,
    OmitNullElement,
    WriteNullAttribute,
    OmitNullAttribute,
    DataType,
    Include,
    Exclude,
    Partition,
    Write,
    /// Problems that do not belong to a concrete property
    Unknown,
}

impl MappingProperty {
    pub const COUNT: usize = 17;

    pub const ALL: [MappingProperty; Self::COUNT] = [
        MappingProperty::Name,
        MappingProperty::Value,
        MappingProperty::InputPort,
        MappingProperty::Key,
        MappingProperty::ParentKey,
        MappingProperty::Filter,
        MappingProperty::Hide,
        MappingProperty::WriteNullElement,
        MappingProperty::OmitNullElement,
        MappingProperty::WriteNullAttribute,
        MappingProperty::OmitNullAttribute,
        MappingProperty::DataType,
        MappingProperty::Include,
        MappingProperty::Exclude,
        MappingProperty::Partition,
        MappingProperty::Write,
        MappingProperty::Unknown,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// Attribute name used by the mapping definition format
    pub fn name(self) -> &'static str {
        match self {
            MappingProperty::Name => "name",
            MappingProperty::Value => "value",
            MappingProperty::InputPort => "inPort",
            MappingProperty::Key => "key",
            MappingProperty::ParentKey => "parentKey",
            MappingProperty::Filter => "filter",
            MappingProperty::Hide => "hide",
            MappingProperty::WriteNullElement => "writeNullElement",
            MappingProperty::OmitNullElement => "omitNullElement",
            MappingProperty::WriteNullAttribute => "writeNullAttribute",
            MappingProperty::OmitNullAttribute => "omitNullAttribute",
            MappingProperty::DataType => "dataType",
            MappingProperty::Include => "include",
            MappingProperty::Exclude => "exclude",
            MappingProperty::Partition => "partition",
            MappingProperty::Write => "write",
            MappingProperty::Unknown => "unknown",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|property| property.name() == name)
    }
}

impl fmt::Display for MappingProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size, enum-keyed property storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMap {
    values: [Option<String>; MappingProperty::COUNT],
}

impl Default for PropertyMap {
    fn default() -> Self {
        Self {
            values: std::array::from_fn(|_| None),
        }
    }
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, property: MappingProperty) -> Option<&str> {
        self.values[property.slot()].as_deref()
    }

    /// Stores a value, returning the previous one
    pub fn set(&mut self, property: MappingProperty, value: impl Into<String>) -> Option<String> {
        self.values[property.slot()].replace(value.into())
    }

    pub fn remove(&mut self, property: MappingProperty) -> Option<String> {
        self.values[property.slot()].take()
    }

    pub fn contains(&self, property: MappingProperty) -> bool {
        self.values[property.slot()].is_some()
    }

    /// Iterates over the properties that carry a value, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (MappingProperty, &str)> {
        MappingProperty::ALL
            .into_iter()
            .zip(self.values.iter())
            .filter_map(|(property, value)| value.as_deref().map(|v| (property, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_every_slot() {
        for (i, property) in MappingProperty::ALL.iter().enumerate() {
            assert_eq!(property.slot(), i);
        }
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(MappingProperty::from_name("parentKey"), Some(MappingProperty::ParentKey));
        assert_eq!(MappingProperty::from_name("nope"), None);
        assert_eq!(MappingProperty::InputPort.to_string(), "inPort");
    }

    #[test]
    fn test_set_get_remove() {
        let mut map = PropertyMap::new();
        assert!(map.is_empty());
        assert_eq!(map.set(MappingProperty::Key, "id"), None);
        assert_eq!(map.set(MappingProperty::Key, "id;name"), Some("id".to_string()));
        assert_eq!(map.get(MappingProperty::Key), Some("id;name"));
        assert!(map.contains(MappingProperty::Key));
        assert_eq!(map.remove(MappingProperty::Key), Some("id;name".to_string()));
        assert!(!map.contains(MappingProperty::Key));
    }

    #[test]
    fn test_iter_in_declaration_order() {
        let mut map = PropertyMap::new();
        map.set(MappingProperty::Filter, "$in.a > 1");
        map.set(MappingProperty::Name, "customer");
        let collected: Vec<_> = map.iter().collect();
        assert_eq!(
            collected,
            vec![(MappingProperty::Name, "customer"), (MappingProperty::Filter, "$in.a > 1")]
        );
    }
}
