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

//! Validate, tag and compile in one call
//!
//! The stages must run in this order: tagging assumes a mapping without
//! errors, and compiling assumes tags produced from the same tree and ports.
//! [`MappingPipeline`] enforces the order and stops at the first failing
//! stage.

use crate::compiler::{DeferredFilterCompiler, FilterCompiler, MappingCompiler};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::tagger::{MappingTagger, TagResult};
use crate::validator::{MappingValidator, ValidationReport};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use treewriter_common::{DesignTree, PortTable, WritableMapping};

pub const STAGE_VALIDATE: &str = "validate";
pub const STAGE_TAG: &str = "tag";
pub const STAGE_COMPILE: &str = "compile";

/// Execution time of each stage
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub stage_times: BTreeMap<&'static str, Duration>,
}

impl PipelineMetrics {
    fn record(&mut self, stage: &'static str, started: Instant) {
        self.stage_times.insert(stage, started.elapsed());
    }

    pub fn total_time(&self) -> Duration {
        self.stage_times.values().sum()
    }
}

/// Everything a successful run produced
#[derive(Debug)]
pub struct PipelineOutput {
    /// Warnings and infos of a mapping without errors
    pub report: ValidationReport,
    pub tags: TagResult,
    pub plan: WritableMapping,
    pub metrics: PipelineMetrics,
}

pub struct MappingPipeline<'p, F = DeferredFilterCompiler> {
    validator: MappingValidator<'p>,
    tagger: MappingTagger<'p>,
    compiler: MappingCompiler<'p, F>,
}

impl<'p> MappingPipeline<'p, DeferredFilterCompiler> {
    pub fn new(ports: &'p PortTable, config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_filter_compiler(ports, config, DeferredFilterCompiler)
    }
}

impl<'p, F: FilterCompiler> MappingPipeline<'p, F> {
    /// Checks the configuration and parses the sort hints up front.
    /// A partitioned plan also turns on partition resolution in the tagger.
    pub fn with_filter_compiler(ports: &'p PortTable, config: PipelineConfig, filters: F) -> Result<Self, PipelineError> {
        config.validate()?;
        let PipelineConfig {
            validator,
            mut tagger,
            compiler,
        } = config;
        tagger.resolve_partition |= compiler.partition;
        Ok(Self {
            validator: MappingValidator::new(ports, validator),
            tagger: MappingTagger::new(ports, tagger)?,
            compiler: MappingCompiler::with_filter_compiler(ports, compiler, filters),
        })
    }

    pub fn validator(&self) -> &MappingValidator<'p> {
        &self.validator
    }

    pub fn tagger(&self) -> &MappingTagger<'p> {
        &self.tagger
    }

    #[instrument(skip_all, fields(nodes = tree.len()))]
    pub fn run(&self, tree: &DesignTree) -> Result<PipelineOutput, PipelineError> {
        let mut metrics = PipelineMetrics::default();

        let started = Instant::now();
        let report = self.validator.validate(tree);
        metrics.record(STAGE_VALIDATE, started);
        if report.has_errors() {
            warn!(errors = report.error_count(), "mapping rejected");
            return Err(PipelineError::Invalid(Box::new(report)));
        }

        let started = Instant::now();
        let tags = self.tagger.tag(tree)?;
        metrics.record(STAGE_TAG, started);

        let started = Instant::now();
        let plan = self.compiler.compile(tree, &tags)?;
        metrics.record(STAGE_COMPILE, started);

        info!(
            warnings = report.warning_count(),
            cached_ports = tags.port_tags().values().filter(|tag| tag.cached).count(),
            elapsed_us = metrics.total_time().as_micros() as u64,
            "mapping pipeline finished"
        );
        Ok(PipelineOutput {
            report,
            tags,
            plan,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaggerConfig, ValidatorConfig};
    use crate::error::SortHintError;
    use treewriter_common::{FieldType, RecordShape};

    fn ports() -> PortTable {
        PortTable::new().with_port(
            0,
            RecordShape::new("customer")
                .with_field("id", FieldType::Integer)
                .with_field("name", FieldType::String),
        )
    }

    fn mapping(port: &str) -> DesignTree {
        let mut tree = DesignTree::new();
        let top = tree.add_object(tree.root(), "customers").unwrap();
        tree.declare_mapping_namespace(top).unwrap();
        let customer = tree.add_object(top, "customer").unwrap();
        tree.bind(customer, port, None, None).unwrap();
        tree.add_attribute(customer, "id", "$0.id").unwrap();
        tree.add_value(customer, Some("$0.name")).unwrap();
        tree
    }

    #[test]
    fn test_run_produces_plan() {
        let ports = ports();
        let pipeline = MappingPipeline::new(&ports, PipelineConfig::default()).unwrap();
        let output = pipeline.run(&mapping("0")).unwrap();

        assert!(!output.report.has_errors());
        assert_eq!(output.tags.tags().len(), 1);
        assert_eq!(output.plan.bindings().count(), 1);
        assert!(!output.plan.port_data()[&0].cached);
        assert_eq!(output.metrics.stage_times.len(), 3);
    }

    #[test]
    fn test_invalid_mapping_stops_before_tagging() {
        let ports = ports();
        let pipeline = MappingPipeline::new(&ports, PipelineConfig::default()).unwrap();
        match pipeline.run(&mapping("7")) {
            Err(PipelineError::Invalid(report)) => assert!(report.error_count() >= 1),
            other => panic!("expected invalid mapping, got {:?}", other.map(|output| output.plan.len())),
        }
    }

    #[test]
    fn test_bad_configuration_is_rejected() {
        let ports = ports();
        let config = PipelineConfig::default().with_tagger(TaggerConfig::default().with_sort_hints("unknown(a)"));
        assert!(matches!(
            MappingPipeline::new(&ports, config),
            Err(PipelineError::SortHint(SortHintError::UnknownField { .. }))
        ));

        let config = PipelineConfig::default().with_validator(ValidatorConfig::default().with_max_errors_limit(0));
        assert!(matches!(MappingPipeline::new(&ports, config), Err(PipelineError::Config(_))));
    }
}
