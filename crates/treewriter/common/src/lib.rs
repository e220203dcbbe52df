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

//! Tree Writer common data model
//!
//! Shared between the mapping loader, the mapping compiler and the streaming
//! serializer: the design tree, input port metadata and the compiled
//! write-plan.

pub mod design;
pub mod error;
pub mod metadata;
pub mod plan;
pub mod property;

pub use design::{ContainerParts, DesignNode, DesignTree, NodeId, NodeKind, NodeKindTag, MAPPING_NAMESPACE_PREFIX, MAPPING_NAMESPACE_URI};
pub use error::ModelError;
pub use metadata::{Cardinality, FieldShape, FieldType, PortTable, RecordShape, SortField, SortHint};
pub use plan::{
    ContainerKind, NodeValue, PlanArena, PortBinding, PortData, RowFilter, WritableAttribute, WritableChild, WritableContainer, WritableId,
    WritableMapping, WritableNamespace, WritableValue,
};
pub use property::{MappingProperty, PropertyMap};
