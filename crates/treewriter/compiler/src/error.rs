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

//! Error types of the mapping compiler crate
//!
//! Problems in the user's mapping are never reported through these types;
//! the validator records them as [`crate::validator::MappingError`] values.
//! The errors below signal configuration that cannot be used at all, or a
//! pipeline that was not driven in order.

use crate::validator::ValidationReport;
use thiserror::Error;
use treewriter_common::NodeId;

/// Malformed sort-order hint configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SortHintError {
    #[error("Sort order hint error: Key field \"{field}\" does not exist in metadata \"{record}\" of input edge on port {port}")]
    UnknownField { field: String, record: String, port: usize },

    #[error("Sort order hint error: metadata of input edge on port {0} is not available")]
    MissingMetadata(usize),

    #[error("Sort order hint error: malformed entry \"{0}\"")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaggerError {
    #[error("Input port \"{0}\" referenced from a mapping is not connected.")]
    UnresolvedPort(String),

    #[error(transparent)]
    SortHint(#[from] SortHintError),
}

/// Failure reported by the row-filter subsystem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Row filter error: {0}")]
pub struct FilterError(pub String);

/// Contract violations while lowering a tagged tree into a write-plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Port '{port}' referenced by node {node} is not available")]
    UnresolvedPort { node: NodeId, port: String },

    #[error("Field '{field}' of port {port} referenced by node {node} does not exist")]
    UnresolvedField { node: NodeId, port: usize, field: String },

    #[error("Metadata of port {port} used by node {node} is not available")]
    MissingMetadata { node: NodeId, port: usize },

    #[error("Tag result does not match the mapping: {0}")]
    InconsistentTags(String),

    #[error("Filter of node {node} cannot be compiled: {source}")]
    Filter {
        node: NodeId,
        #[source]
        source: FilterError,
    },

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn inconsistent_tags(message: impl Into<String>) -> Self {
        Self::InconsistentTags(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Mapping is not valid: {} error(s), {} warning(s)", .0.error_count(), .0.warning_count())]
    Invalid(Box<ValidationReport>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    SortHint(#[from] SortHintError),

    #[error(transparent)]
    Tagger(#[from] TaggerError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_hint_message() {
        let error = SortHintError::UnknownField {
            field: "idx".into(),
            record: "customer".into(),
            port: 0,
        };
        assert_eq!(
            error.to_string(),
            "Sort order hint error: Key field \"idx\" does not exist in metadata \"customer\" of input edge on port 0"
        );
    }

    #[test]
    fn test_tagger_error_from_sort_hint() {
        let error: TaggerError = SortHintError::MissingMetadata(2).into();
        assert!(matches!(error, TaggerError::SortHint(SortHintError::MissingMetadata(2))));
        assert_eq!(
            TaggerError::UnresolvedPort("orders".into()).to_string(),
            "Input port \"orders\" referenced from a mapping is not connected."
        );
    }
}
