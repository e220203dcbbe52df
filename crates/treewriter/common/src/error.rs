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

//! Errors raised while assembling a design tree

use crate::design::{NodeId, NodeKindTag};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Node {0} does not exist in this design tree")]
    UnknownNode(NodeId),

    #[error("A {child:?} node cannot be placed under a {parent:?} node")]
    InvalidPlacement { parent: NodeKindTag, child: NodeKindTag },

    #[error("Container {0} already declares a relation")]
    DuplicateRelation(NodeId),

    #[error("Element {0} already declares a wildcard attribute")]
    DuplicateWildcardAttribute(NodeId),
}

impl ModelError {
    pub fn invalid_placement(parent: NodeKindTag, child: NodeKindTag) -> Self {
        Self::InvalidPlacement { parent, child }
    }
}
