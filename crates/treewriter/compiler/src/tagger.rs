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

//! Port tagging and the caching decision
//!
//! The tagger records which port drives each repeating container and
//! decides, per port, whether its records can be consumed once in forward
//! order or must be cached into a keyed structure first. A nested loop may
//! stream only when the parent port streams, both ports declare sort orders
//! and the join keys lead both orders position by position. Every other
//! case caches, and the reason is kept for diagnostics.
//!
//! The tagger expects a validated mapping: a port that cannot be resolved
//! is an error, not a recorded problem.

use crate::config::TaggerConfig;
use crate::error::{SortHintError, TaggerError};
use crate::expression::{parse_bool, split_list};
use crate::walk::{visit_children, visit_object_parts, walk, MappingVisitor, TemplateExpansion};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::{debug, info, instrument};
use treewriter_common::{DesignTree, MappingProperty, NodeId, PortData, PortTable, SortField, SortHint};

pub const REASON_MULTIPLE_USAGE: &str = "Multiple usage of input port.";
pub const REASON_UNSORTED_PARENT: &str = "Data from parent input port are not sorted. Minimal required sort order: ";
pub const REASON_UNSORTED_PORT: &str = "Data from input port are not sorted. Minimal required sort order: ";
pub const REASON_NOT_IN_PARTITION: &str = "Input port is used outside of the partition scope.";
pub const REASON_PARENT_CACHED: &str = "Data from parent data port are cached.";
pub const REASON_NO_RELATION: &str = "No relation (key - parent key pair) is specified.";
pub const REASON_WRONG_SORT_PORT: &str = "Data from input port are in unsuitable sort order. Minimal required sort order: ";
pub const REASON_WRONG_SORT_PARENT: &str =
    "Data from parent input port are in unsuitable sort order. Minimal required sort order: ";
pub const REASON_UNMATCHED_SORT: &str = "Data from parent input port are in unsuitable sort order. Detail: ";

static SORT_FIELD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)\((.*)\)$").expect("sort field pattern is valid"));

const SORT_FIELD_DELIMITERS: [char; 3] = ['|', ';', ':'];

/// Port driving one repeating container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub port: usize,
}

/// Caching decision for one used port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortTag {
    pub port: usize,
    pub cached: bool,
    pub cached_reason: Option<String>,
    /// Every key the port is joined on; an empty key stands for an unkeyed loop
    pub keys: BTreeSet<Vec<String>>,
}

impl PortTag {
    fn new(port: usize) -> Self {
        Self {
            port,
            cached: false,
            cached_reason: None,
            keys: BTreeSet::new(),
        }
    }
}

/// Parses `field(dir)|field(dir)#field(dir)...`, one `#` segment per port in index order.
///
/// A field without a parenthesized direction sorts descending.
pub fn parse_sort_hints(hints: &str, ports: &PortTable) -> Result<BTreeMap<usize, SortHint>, SortHintError> {
    let mut parsed = BTreeMap::new();
    for (segment, (port, shape)) in hints.split('#').zip(ports.iter()) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let mut fields = Vec::new();
        for item in segment.split(SORT_FIELD_DELIMITERS).map(str::trim) {
            let (name, ascending) = match SORT_FIELD.captures(item) {
                Some(captures) => {
                    let name = captures.get(1).map_or("", |m| m.as_str()).trim();
                    let direction = captures.get(2).map_or("", |m| m.as_str()).trim();
                    (name, direction.starts_with(['A', 'a']))
                }
                None => (item, false),
            };
            if name.is_empty() {
                return Err(SortHintError::Malformed(segment.to_string()));
            }
            let shape = shape.ok_or(SortHintError::MissingMetadata(port))?;
            if shape.field(name).is_none() {
                return Err(SortHintError::UnknownField {
                    field: name.to_string(),
                    record: shape.name.clone(),
                    port,
                });
            }
            fields.push(SortField {
                name: name.to_string(),
                ascending,
            });
        }
        parsed.insert(port, SortHint::new(fields));
    }
    Ok(parsed)
}

fn key_list(key: &[String]) -> String {
    format!("[{}]", key.join(", "))
}

fn direction(ascending: bool) -> &'static str {
    if ascending { "ascending" } else { "descending" }
}

/// Outcome of one tagging run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagResult {
    tags: BTreeMap<NodeId, Tag>,
    port_tags: BTreeMap<usize, PortTag>,
    sort_hints: BTreeMap<usize, SortHint>,
    partition: Option<NodeId>,
}

impl TagResult {
    pub fn tags(&self) -> &BTreeMap<NodeId, Tag> {
        &self.tags
    }

    pub fn tag(&self, node: NodeId) -> Option<&Tag> {
        self.tags.get(&node)
    }

    pub fn port_tags(&self) -> &BTreeMap<usize, PortTag> {
        &self.port_tags
    }

    pub fn port_tag(&self, port: usize) -> Option<&PortTag> {
        self.port_tags.get(&port)
    }

    /// Whether `port` must be cached; unused ports are not
    pub fn is_cached(&self, port: usize) -> bool {
        self.port_tags.get(&port).is_some_and(|tag| tag.cached)
    }

    pub fn cached_reason(&self, port: usize) -> Option<&str> {
        self.port_tags.get(&port).and_then(|tag| tag.cached_reason.as_deref())
    }

    pub fn used_ports(&self) -> impl Iterator<Item = usize> + '_ {
        self.port_tags.keys().copied()
    }

    /// Explicit partition container, else the first loop container
    pub fn partition(&self) -> Option<NodeId> {
        self.partition
    }

    pub fn partition_port(&self) -> Option<usize> {
        self.partition.and_then(|node| self.tag(node)).map(|tag| tag.port)
    }

    pub fn sort_hint(&self, port: usize) -> Option<&SortHint> {
        self.sort_hints.get(&port)
    }

    /// Materialization requirements of every used port
    pub fn port_data(&self, ports: &PortTable) -> BTreeMap<usize, PortData> {
        self.port_tags
            .values()
            .map(|tag| {
                let data = PortData {
                    port: tag.port,
                    shape: ports.shape(tag.port).cloned(),
                    cached: tag.cached,
                    cached_reason: tag.cached_reason.clone(),
                    keys: tag.keys.clone(),
                    sort_hint: self.sort_hints.get(&tag.port).cloned(),
                };
                (tag.port, data)
            })
            .collect()
    }

    /// Whether `node` or a definition ancestor is a loop over `port`
    pub fn is_port_available(&self, tree: &DesignTree, node: NodeId, port: usize) -> bool {
        std::iter::once(node)
            .chain(tree.ancestors(node))
            .any(|id| self.tag(id).is_some_and(|tag| tag.port == port))
    }
}

struct TagPass<'t, 'a> {
    tree: &'t DesignTree,
    ports: &'a PortTable,
    config: &'a TaggerConfig,
    sort_hints: &'a BTreeMap<usize, SortHint>,
    expansion: TemplateExpansion,
    tags: BTreeMap<NodeId, Tag>,
    port_tags: BTreeMap<usize, PortTag>,
    partition: Option<NodeId>,
    candidate: Option<NodeId>,
}

impl TagPass<'_, '_> {
    fn visit_container(&mut self, node: NodeId, object: bool) -> Result<(), TaggerError> {
        if !self.is_in_recursion() {
            self.resolve_index(node)?;
            self.collect_partition(node);
        }
        self.update_port_mode(node);
        if object {
            visit_object_parts(self, node)
        } else {
            visit_children(self, node)
        }
    }

    fn resolve_index(&mut self, node: NodeId) -> Result<(), TaggerError> {
        let Some(text) = self.tree.relation_property(node, MappingProperty::InputPort) else {
            return Ok(());
        };
        let port = self
            .ports
            .resolve(text)
            .ok_or_else(|| TaggerError::UnresolvedPort(text.to_string()))?;
        self.tags.insert(node, Tag { port });
        Ok(())
    }

    fn collect_partition(&mut self, node: NodeId) {
        if self.partition.is_some() {
            return;
        }
        let tree = self.tree;
        if tree.property(node, MappingProperty::Partition).and_then(parse_bool) == Some(true) {
            self.partition = Some(node);
        } else if self.candidate.is_none() && (tree.relation(node).is_some() || self.tags.contains_key(&node)) {
            self.candidate = Some(node);
        }
    }

    fn in_partition(&self, node: NodeId) -> bool {
        let Some(partition) = self.partition.or(self.candidate) else {
            return false;
        };
        node == partition || self.expansion.ancestors(self.tree, node).contains(&partition)
    }

    fn port_tag_mut(&mut self, port: usize) -> &mut PortTag {
        self.port_tags.entry(port).or_insert_with(|| PortTag::new(port))
    }

    fn set_port_tag(&mut self, port: usize, reason: Option<String>) {
        let tag = self.port_tag_mut(port);
        tag.cached = reason.is_some();
        tag.cached_reason = reason;
    }

    fn update_port_mode(&mut self, node: NodeId) {
        let Some(port) = self.tags.get(&node).map(|tag| tag.port) else {
            return;
        };
        if self.is_in_recursion() {
            self.set_port_tag(port, Some(REASON_MULTIPLE_USAGE.to_string()));
            return;
        }

        let tree = self.tree;
        let key = tree.relation_property(node, MappingProperty::Key).map(split_list);
        let parent_key = tree.relation_property(node, MappingProperty::ParentKey).map(split_list);

        if !self.port_tags.get(&port).is_some_and(|tag| tag.cached) {
            let reason = self.caching_reason(node, port, key.as_deref(), parent_key.as_deref());
            if let Some(reason) = &reason {
                debug!(node = %node, port, reason = %reason, "port cached");
            }
            self.set_port_tag(port, reason);
        }
        self.port_tag_mut(port).keys.insert(key.unwrap_or_default());
    }

    /// `None` when the port can stream
    fn caching_reason(&self, node: NodeId, port: usize, key: Option<&[String]>, parent_key: Option<&[String]>) -> Option<String> {
        let ancestors = self.expansion.ancestors(self.tree, node);
        let already_used = self.port_tags.contains_key(&port);

        let Some(parent_loop) = ancestors.iter().find(|id| self.tags.contains_key(*id)) else {
            if already_used {
                return Some(REASON_MULTIPLE_USAGE.to_string());
            }
            if self.config.resolve_partition && !self.in_partition(node) {
                return Some(REASON_NOT_IN_PARTITION.to_string());
            }
            return None;
        };

        if already_used {
            return Some(REASON_MULTIPLE_USAGE.to_string());
        }
        let second_level = ancestors.iter().filter(|id| self.tags.contains_key(*id)).count() == 1;
        if second_level && self.config.single_top_level_record {
            return None;
        }

        let parent_port = self.tags.get(parent_loop)?.port;
        let parent_cached = self.port_tags.get(&parent_port).is_some_and(|tag| tag.cached);
        let key = key.unwrap_or_default();
        let Some(parent_key) = parent_key else {
            return Some(REASON_NO_RELATION.to_string());
        };
        let Some(parent_hint) = self.sort_hints.get(&parent_port) else {
            return Some(format!("{}{}", REASON_UNSORTED_PARENT, key_list(parent_key)));
        };
        if parent_cached {
            return Some(REASON_PARENT_CACHED.to_string());
        }
        let Some(hint) = self.sort_hints.get(&port) else {
            return Some(format!("{}{}", REASON_UNSORTED_PORT, key_list(key)));
        };

        if !hint.starts_with(key) {
            return Some(format!("{}{}", REASON_WRONG_SORT_PORT, key_list(key)));
        }
        if parent_hint.len() < parent_key.len() {
            return Some(format!("{}{}", REASON_WRONG_SORT_PARENT, key_list(parent_key)));
        }
        for (i, (required, field)) in parent_key.iter().zip(&parent_hint.fields).enumerate() {
            if field.name != *required {
                return Some(format!(
                    "{}{}. field is '{}' but '{}' is required.",
                    REASON_UNMATCHED_SORT, i, field.name, required
                ));
            }
            if hint.fields.get(i).is_some_and(|child| child.ascending != field.ascending) {
                return Some(format!(
                    "{}{}. field is '{}' but '{}' is required.",
                    REASON_UNMATCHED_SORT,
                    i,
                    direction(field.ascending),
                    direction(!field.ascending)
                ));
            }
        }

        if self.config.resolve_partition && !self.in_partition(node) {
            return Some(REASON_NOT_IN_PARTITION.to_string());
        }
        None
    }
}

impl<'t> MappingVisitor<'t> for TagPass<'t, '_> {
    type Error = TaggerError;

    fn tree(&self) -> &'t DesignTree {
        self.tree
    }

    fn expansion(&self) -> &TemplateExpansion {
        &self.expansion
    }

    fn expansion_mut(&mut self) -> &mut TemplateExpansion {
        &mut self.expansion
    }

    fn visit_object(&mut self, node: NodeId) -> Result<(), Self::Error> {
        if self.tree.node(node).is_template() {
            return Ok(());
        }
        self.visit_container(node, true)
    }

    fn visit_collection(&mut self, node: NodeId) -> Result<(), Self::Error> {
        self.visit_container(node, false)
    }
}

/// Decides which ports are streamed and which are cached
#[derive(Debug, Clone)]
pub struct MappingTagger<'p> {
    ports: &'p PortTable,
    config: TaggerConfig,
    sort_hints: BTreeMap<usize, SortHint>,
}

impl<'p> MappingTagger<'p> {
    /// Parses the sort hints of `config` against the port shapes
    pub fn new(ports: &'p PortTable, config: TaggerConfig) -> Result<Self, SortHintError> {
        let sort_hints = match &config.sort_hints {
            Some(hints) => parse_sort_hints(hints, ports)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            ports,
            config,
            sort_hints,
        })
    }

    pub fn config(&self) -> &TaggerConfig {
        &self.config
    }

    pub fn sort_hints(&self) -> &BTreeMap<usize, SortHint> {
        &self.sort_hints
    }

    #[instrument(skip_all, fields(nodes = tree.len()))]
    pub fn tag(&self, tree: &DesignTree) -> Result<TagResult, TaggerError> {
        let mut pass = TagPass {
            tree,
            ports: self.ports,
            config: &self.config,
            sort_hints: &self.sort_hints,
            expansion: TemplateExpansion::new(),
            tags: BTreeMap::new(),
            port_tags: BTreeMap::new(),
            partition: None,
            candidate: None,
        };
        walk(&mut pass)?;

        let result = TagResult {
            partition: pass.partition.or(pass.candidate),
            tags: pass.tags,
            port_tags: pass.port_tags,
            sort_hints: self.sort_hints.clone(),
        };
        info!(
            loops = result.tags.len(),
            ports = result.port_tags.len(),
            cached = result.port_tags.values().filter(|tag| tag.cached).count(),
            "mapping tagged"
        );
        Ok(result)
    }
}

/// Port of the partition container, with partition resolution forced on
pub fn partition_port_index(tree: &DesignTree, ports: &PortTable) -> Result<Option<usize>, TaggerError> {
    let tagger = MappingTagger::new(ports, TaggerConfig::default().with_resolve_partition(true))?;
    Ok(tagger.tag(tree)?.partition_port())
}
