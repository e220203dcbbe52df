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

//! Problem records and the error budget

use crate::config::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use treewriter_common::{MappingProperty, NodeId};

/// Problem severity; `Error` orders highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warning => f.write_str("WARNING"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// A problem found in the mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MappingError {
    message: String,
    severity: Severity,
}

impl MappingError {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Warning)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Info)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Problems per (node, property), each list ordered by severity descending
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemMap {
    entries: BTreeMap<NodeId, BTreeMap<MappingProperty, Vec<MappingError>>>,
}

impl ProblemMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every problem of equal or higher severity; identical problems are kept once
    pub fn insert(&mut self, node: NodeId, property: MappingProperty, error: MappingError) -> bool {
        let list = self.entries.entry(node).or_default().entry(property).or_default();
        if list.contains(&error) {
            return false;
        }
        let position = list
            .iter()
            .position(|existing| existing.severity < error.severity)
            .unwrap_or(list.len());
        list.insert(position, error);
        true
    }

    pub fn get(&self, node: NodeId, property: MappingProperty) -> &[MappingError] {
        self.entries
            .get(&node)
            .and_then(|properties| properties.get(&property))
            .map_or(&[], Vec::as_slice)
    }

    pub fn for_node(&self, node: NodeId) -> Option<&BTreeMap<MappingProperty, Vec<MappingError>>> {
        self.entries.get(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, MappingProperty, &MappingError)> {
        self.entries.iter().flat_map(|(node, properties)| {
            properties
                .iter()
                .flat_map(move |(property, list)| list.iter().map(move |error| (*node, *property, error)))
        })
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.entries.values().flat_map(BTreeMap::values).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Counts problems and decides which are recorded and whether the walk goes on
#[derive(Debug, Clone)]
pub(crate) struct ErrorBudget {
    config: ValidatorConfig,
    errors: usize,
    warnings: usize,
    running: bool,
}

impl ErrorBudget {
    pub(crate) fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            errors: 0,
            warnings: 0,
            running: true,
        }
    }

    /// Counts a problem; `true` when its record should be kept
    pub(crate) fn admit(&mut self, severity: Severity) -> bool {
        match severity {
            Severity::Error => {
                self.errors += 1;
                if self.errors > self.config.max_errors() {
                    if self.errors > self.config.max_errors_limit() {
                        self.running = false;
                    }
                    return false;
                }
                true
            }
            Severity::Warning | Severity::Info => {
                self.warnings += 1;
                self.warnings <= self.config.max_warnings()
            }
        }
    }

    pub(crate) fn errors(&self) -> usize {
        self.errors
    }

    pub(crate) fn warnings(&self) -> usize {
        self.warnings
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: usize) -> NodeId {
        let mut tree = treewriter_common::DesignTree::new();
        let mut last = tree.root();
        for _ in 0..i {
            last = tree.add_object(tree.root(), "n").unwrap();
        }
        last
    }

    #[test]
    fn test_severity_order_and_ties() {
        let mut map = ProblemMap::new();
        let n = node(0);
        map.insert(n, MappingProperty::Key, MappingError::warning("first warning"));
        map.insert(n, MappingProperty::Key, MappingError::error("first error"));
        map.insert(n, MappingProperty::Key, MappingError::info("note"));
        map.insert(n, MappingProperty::Key, MappingError::warning("second warning"));
        map.insert(n, MappingProperty::Key, MappingError::error("second error"));

        let messages: Vec<_> = map.get(n, MappingProperty::Key).iter().map(MappingError::message).collect();
        assert_eq!(
            messages,
            vec!["first error", "second error", "first warning", "second warning", "note"]
        );
    }

    #[test]
    fn test_duplicates_are_kept_once() {
        let mut map = ProblemMap::new();
        let n = node(1);
        assert!(map.insert(n, MappingProperty::Name, MappingError::error("x")));
        assert!(!map.insert(n, MappingProperty::Name, MappingError::error("x")));
        assert!(map.insert(n, MappingProperty::Name, MappingError::warning("x")));
        assert_eq!(map.len(), 2);
        assert!(map.get(n, MappingProperty::Value).is_empty());
    }

    #[test]
    fn test_budget_stops_recording_then_running() {
        let config = ValidatorConfig::default()
            .with_max_errors(2)
            .with_max_errors_limit(3)
            .with_max_warnings(1);
        let mut budget = ErrorBudget::new(config);

        assert!(budget.admit(Severity::Error));
        assert!(budget.admit(Severity::Error));
        assert!(!budget.admit(Severity::Error));
        assert!(budget.is_running());
        assert!(!budget.admit(Severity::Error));
        assert!(!budget.is_running());
        assert_eq!(budget.errors(), 4);

        assert!(budget.admit(Severity::Warning));
        assert!(!budget.admit(Severity::Info));
        assert_eq!(budget.warnings(), 2);
    }
}
