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

//! Configuration for the validation, tagging and compilation passes

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Syntax marker prepended to row filter expressions
pub const DEFAULT_FILTER_PREFIX: &str = "//#CTL2\n";

/// Error budget of the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Number of error records kept; further errors are only counted
    max_errors: usize,

    /// Error count after which the walk stops
    max_errors_limit: usize,

    /// Number of warning records kept
    max_warnings: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_errors: 50,
            max_errors_limit: 100,
            max_warnings: 50,
        }
    }
}

impl ValidatorConfig {
    pub fn max_errors(&self) -> usize {
        self.max_errors
    }

    pub fn max_errors_limit(&self) -> usize {
        self.max_errors_limit
    }

    pub fn max_warnings(&self) -> usize {
        self.max_warnings
    }

    /// Sets the number of kept error records, raising the limit if needed
    pub fn set_max_errors(&mut self, max_errors: usize) {
        if max_errors > self.max_errors_limit {
            self.max_errors_limit = max_errors;
        }
        self.max_errors = max_errors;
    }

    /// Sets the abort limit, lowering the kept error records if needed
    pub fn set_max_errors_limit(&mut self, max_errors_limit: usize) {
        if max_errors_limit < self.max_errors {
            self.max_errors = max_errors_limit;
        }
        self.max_errors_limit = max_errors_limit;
    }

    pub fn set_max_warnings(&mut self, max_warnings: usize) {
        self.max_warnings = max_warnings;
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.set_max_errors(max_errors);
        self
    }

    pub fn with_max_errors_limit(mut self, max_errors_limit: usize) -> Self {
        self.set_max_errors_limit(max_errors_limit);
        self
    }

    pub fn with_max_warnings(mut self, max_warnings: usize) -> Self {
        self.set_max_warnings(max_warnings);
        self
    }

    /// Restores `max_errors <= max_errors_limit` after deserialization
    pub fn normalized(mut self) -> Self {
        if self.max_errors > self.max_errors_limit {
            self.max_errors_limit = self.max_errors;
        }
        self
    }
}

/// Inputs of the caching decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// Per-port sort order, one `#`-separated segment per port in index order
    pub sort_hints: Option<String>,

    /// Every second-level loop joins exactly one top-level record
    pub single_top_level_record: bool,

    /// Force caching of ports used outside the partition anchor
    pub resolve_partition: bool,
}

impl TaggerConfig {
    pub fn with_sort_hints(mut self, sort_hints: impl Into<String>) -> Self {
        self.sort_hints = Some(sort_hints.into());
        self
    }

    pub fn with_single_top_level_record(mut self, enabled: bool) -> Self {
        self.single_top_level_record = enabled;
        self
    }

    pub fn with_resolve_partition(mut self, enabled: bool) -> Self {
        self.resolve_partition = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Mark the partition anchor in the plan for a partitioned writer
    pub partition: bool,

    /// Prepended to every row filter before it is handed to the filter compiler
    pub filter_prefix: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            partition: false,
            filter_prefix: DEFAULT_FILTER_PREFIX.to_string(),
        }
    }
}

impl CompilerConfig {
    pub fn with_partition(mut self, enabled: bool) -> Self {
        self.partition = enabled;
        self
    }

    pub fn with_filter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filter_prefix = prefix.into();
        self
    }
}

/// Configuration of a full validate, tag and compile run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validator: ValidatorConfig,
    pub tagger: TaggerConfig,
    pub compiler: CompilerConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = serde_json::from_str(json)?;
        config.validator = config.validator.normalized();
        config.validate()?;
        Ok(config)
    }

    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_tagger(mut self, tagger: TaggerConfig) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validator.max_errors_limit == 0 {
            return Err(ConfigError::Invalid("max_errors_limit must be greater than 0".to_string()));
        }
        if self.validator.max_errors > self.validator.max_errors_limit {
            return Err(ConfigError::Invalid("max_errors must not exceed max_errors_limit".to_string()));
        }
        if let Some(hints) = &self.tagger.sort_hints {
            if hints.contains('\n') {
                return Err(ConfigError::Invalid("sort hints must be a single line".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ValidatorConfig::default();
        assert_eq!(config.max_errors(), 50);
        assert_eq!(config.max_errors_limit(), 100);
        assert_eq!(config.max_warnings(), 50);
        assert_eq!(CompilerConfig::default().filter_prefix, "//#CTL2\n");
    }

    #[test]
    fn test_raising_max_errors_raises_limit() {
        let mut config = ValidatorConfig::default();
        config.set_max_errors_limit(50);
        config.set_max_errors(60);
        assert_eq!(config.max_errors(), 60);
        assert_eq!(config.max_errors_limit(), 60);
    }

    #[test]
    fn test_lowering_limit_lowers_max_errors() {
        let mut config = ValidatorConfig::default();
        assert_eq!(config.max_errors(), 50);
        config.set_max_errors_limit(10);
        assert_eq!(config.max_errors(), 10);
        assert_eq!(config.max_errors_limit(), 10);
    }

    #[test]
    fn test_pipeline_config_from_json() {
        let config = PipelineConfig::from_json_str(
            r#"{"validator": {"max_errors": 120}, "tagger": {"sort_hints": "id(a)#custId(a)", "resolve_partition": true}}"#,
        )
        .unwrap();
        assert_eq!(config.validator.max_errors(), 120);
        assert_eq!(config.validator.max_errors_limit(), 120);
        assert_eq!(config.validator.max_warnings(), 50);
        assert_eq!(config.tagger.sort_hints.as_deref(), Some("id(a)#custId(a)"));
        assert!(config.tagger.resolve_partition);
        assert!(!config.tagger.single_top_level_record);
        assert_eq!(config.compiler, CompilerConfig::default());
    }

    #[test]
    fn test_pipeline_config_rejects_zero_limit() {
        let result = PipelineConfig::from_json_str(r#"{"validator": {"max_errors": 0, "max_errors_limit": 0}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert!(matches!(PipelineConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }
}
