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

//! Tree Writer mapping compiler
//!
//! Turns a user-authored design tree into a write-plan for the streaming
//! serializer. Three passes share one recursion-aware walk:
//!
//! - [`validator`] collects problems under an error budget,
//! - [`tagger`] binds loops to input ports and decides which ports are cached,
//! - [`compiler`] resolves names and field references into a [`WritableMapping`].
//!
//! [`pipeline::MappingPipeline`] runs them in order.
//!
//! [`WritableMapping`]: treewriter_common::WritableMapping

pub mod compiler;
pub mod config;
pub mod error;
pub mod expression;
pub mod fields;
pub mod logging;
pub mod pipeline;
pub mod tagger;
pub mod validator;
pub mod walk;

pub use compiler::{DeferredFilter, DeferredFilterCompiler, FilterCompiler, MappingCompiler};
pub use config::{CompilerConfig, PipelineConfig, TaggerConfig, ValidatorConfig};
pub use error::{CompileError, ConfigError, FilterError, PipelineError, SortHintError, TaggerError};
pub use logging::init_tracing;
pub use pipeline::{MappingPipeline, PipelineMetrics, PipelineOutput};
pub use tagger::{parse_sort_hints, partition_port_index, MappingTagger, PortTag, Tag, TagResult};
pub use validator::{CoreRules, MappingError, MappingRules, MappingValidator, ProblemMap, Severity, ValidationContext, ValidationReport, XmlMappingRules};
pub use walk::{MappingVisitor, TemplateExpansion};
