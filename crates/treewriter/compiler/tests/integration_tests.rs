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

//! End-to-end tests of the validate, tag and compile passes

use treewriter_common::{DesignTree, FieldType, MappingProperty, NodeId, PortTable, RecordShape, WritableChild, WritableId, WritableMapping};
use treewriter_compiler::tagger::{REASON_MULTIPLE_USAGE, REASON_NOT_IN_PARTITION, REASON_NO_RELATION};
use treewriter_compiler::{
    init_tracing, CompilerConfig, MappingCompiler, MappingPipeline, MappingTagger, MappingValidator, PipelineConfig, PipelineError,
    TaggerConfig, ValidatorConfig,
};

fn ports() -> PortTable {
    PortTable::new()
        .with_port(
            0,
            RecordShape::new("customer")
                .with_field("id", FieldType::Integer)
                .with_field("name", FieldType::String),
        )
        .with_port(
            1,
            RecordShape::new("order")
                .with_field("id", FieldType::Integer)
                .with_field("custId", FieldType::Integer)
                .with_field("total", FieldType::Number),
        )
}

/// customers > customer (port 0) > order (port 1)
fn customers_with_orders(key: Option<&str>, parent_key: Option<&str>) -> (DesignTree, NodeId, NodeId) {
    let mut tree = DesignTree::new();
    let top = tree.add_object(tree.root(), "customers").unwrap();
    tree.declare_mapping_namespace(top).unwrap();
    let customer = tree.add_object(top, "customer").unwrap();
    tree.bind(customer, "0", None, None).unwrap();
    tree.add_attribute(customer, "id", "$0.id").unwrap();
    let order = tree.add_object(customer, "order").unwrap();
    tree.bind(order, "1", key, parent_key).unwrap();
    tree.add_value(order, Some("$1.total")).unwrap();
    (tree, customer, order)
}

fn child_containers(plan: &WritableMapping, id: WritableId) -> Vec<WritableId> {
    plan.container(id).unwrap().child_containers().collect()
}

#[test]
fn test_key_count_mismatch_is_reported_on_both_keys() {
    init_tracing();
    let ports = ports();
    let (tree, _, order) = customers_with_orders(Some("custId;id"), Some("id"));
    let relation = tree.relation(order).unwrap();

    let report = MappingValidator::new(&ports, ValidatorConfig::default()).validate(&tree);
    assert!(report.has_errors());
    assert_eq!(
        report.problems_for(relation, MappingProperty::Key)[0].message(),
        "Count of fields must match parent key field count"
    );
    assert_eq!(
        report.problems_for(relation, MappingProperty::ParentKey)[0].message(),
        "Count of fields must match key field count"
    );

    match MappingPipeline::new(&ports, PipelineConfig::default()).unwrap().run(&tree) {
        Err(PipelineError::Invalid(report)) => assert_eq!(report.error_count(), 2),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("invalid mapping was compiled"),
    }
}

#[test]
fn test_mutual_template_recursion_terminates() {
    let ports = ports();
    let mut tree = DesignTree::new();
    let top = tree.add_object(tree.root(), "top").unwrap();
    tree.declare_mapping_namespace(top).unwrap();
    let t1 = tree.add_template(top, "T1").unwrap();
    let x = tree.add_object(t1, "x").unwrap();
    tree.bind(x, "0", None, None).unwrap();
    tree.add_template_entry(x, "T2").unwrap();
    let t2 = tree.add_template(top, "T2").unwrap();
    let y = tree.add_object(t2, "y").unwrap();
    tree.bind(y, "1", None, None).unwrap();
    tree.add_template_entry(y, "T1").unwrap();
    tree.add_template_entry(top, "T1").unwrap();

    let output = MappingPipeline::new(&ports, PipelineConfig::default()).unwrap().run(&tree).unwrap();

    assert_eq!(output.tags.tags().len(), 2);
    assert_eq!(output.tags.cached_reason(0), Some(REASON_MULTIPLE_USAGE));
    assert_eq!(output.tags.cached_reason(1), Some(REASON_NO_RELATION));

    let plan = &output.plan;
    assert_eq!(plan.len(), tree.container_count());
    let top_id = child_containers(plan, plan.root())[0];
    let x_id = child_containers(plan, top_id)[0];
    let y_id = child_containers(plan, x_id)[0];
    assert_eq!(child_containers(plan, y_id), vec![x_id]);
    assert_eq!(plan.container(y_id).unwrap().binding.as_ref().unwrap().parent, Some(x_id));
}

#[test]
fn test_nested_loop_without_relation_is_cached() {
    let ports = ports();
    let (tree, customer, order) = customers_with_orders(None, None);
    let output = MappingPipeline::new(&ports, PipelineConfig::default()).unwrap().run(&tree).unwrap();

    assert_eq!(output.tags.tag(customer).map(|tag| tag.port), Some(0));
    assert_eq!(output.tags.tag(order).map(|tag| tag.port), Some(1));
    assert!(!output.tags.is_cached(0));
    assert!(output.tags.is_cached(1));
    assert_eq!(output.tags.cached_reason(1), Some(REASON_NO_RELATION));
}

#[test]
fn test_matching_sort_hints_stream_both_ports() {
    let ports = ports();
    let (tree, _, _) = customers_with_orders(Some("id"), Some("id"));
    let config = PipelineConfig::default().with_tagger(TaggerConfig::default().with_sort_hints("id(A)#id(A)"));
    let output = MappingPipeline::new(&ports, config).unwrap().run(&tree).unwrap();

    assert!(!output.tags.is_cached(0));
    assert!(!output.tags.is_cached(1));
    assert!(output.plan.port_data().values().all(|data| !data.cached));
}

#[test]
fn test_opposite_sort_direction_is_cached() {
    let ports = ports();
    let (tree, _, _) = customers_with_orders(Some("id"), Some("id"));
    let config = PipelineConfig::default().with_tagger(TaggerConfig::default().with_sort_hints("id(A)#id(D)"));
    let output = MappingPipeline::new(&ports, config).unwrap().run(&tree).unwrap();

    assert!(output.tags.is_cached(1));
    assert!(
        output
            .tags
            .cached_reason(1)
            .is_some_and(|reason| reason.starts_with("Data from parent input port are in unsuitable sort order"))
    );
}

#[test]
fn test_mapping_without_relations_compiles_structurally() {
    let ports = ports();
    let mut tree = DesignTree::new();
    let doc = tree.add_object(tree.root(), "doc").unwrap();
    let header = tree.add_object(doc, "header").unwrap();
    tree.add_value(header, Some("report")).unwrap();
    let list = tree.add_collection(doc, "entries").unwrap();
    tree.add_object(list, "entry").unwrap();

    let tags = MappingTagger::new(&ports, TaggerConfig::default()).unwrap().tag(&tree).unwrap();
    assert!(tags.tags().is_empty());
    assert!(tags.port_tags().is_empty());

    let plan = MappingCompiler::new(&ports, CompilerConfig::default()).compile(&tree, &tags).unwrap();
    assert_eq!(plan.len(), tree.container_count());
    assert_eq!(plan.bindings().count(), 0);
    assert!(plan.partition().is_none());
}

#[test]
fn test_validator_budget_setters_adjust_each_other() {
    let ports = ports();
    let mut validator = MappingValidator::new(&ports, ValidatorConfig::default());

    validator.set_max_errors(60);
    validator.set_max_errors_limit(50);
    assert_eq!(validator.config().max_errors(), 50);
    assert_eq!(validator.config().max_errors_limit(), 50);

    validator.set_max_errors(10);
    assert_eq!(validator.config().max_errors(), 10);
    assert_eq!(validator.config().max_errors_limit(), 50);
}

#[test]
fn test_customers_and_orders_end_to_end() {
    let ports = ports();
    let (tree, _, _) = customers_with_orders(Some("custId"), Some("id"));
    let output = MappingPipeline::new(&ports, PipelineConfig::default()).unwrap().run(&tree).unwrap();

    assert!(!output.tags.is_cached(0));
    assert!(
        output
            .tags
            .cached_reason(1)
            .is_some_and(|reason| reason.starts_with("Data from parent input port are not sorted"))
    );

    let plan = &output.plan;
    let top_id = child_containers(plan, plan.root())[0];
    let customer_id = child_containers(plan, top_id)[0];
    let order_id = child_containers(plan, customer_id)[0];

    let customer = plan.container(customer_id).unwrap();
    assert_eq!(customer.attributes.len(), 1);
    assert!(customer.attributes[0].value.is_dynamic());

    let order = plan.container(order_id).unwrap();
    let binding = order.binding.as_ref().unwrap();
    assert_eq!(binding.port, 1);
    assert_eq!(binding.parent, Some(customer_id));
    assert_eq!(binding.keys, Some(vec![1]));
    assert_eq!(binding.parent_keys, Some(vec![0]));
    assert!(matches!(order.children.as_slice(), [WritableChild::Value(value)] if value.is_dynamic()));

    let port_data = &plan.port_data()[&1];
    assert!(port_data.cached);
    assert!(port_data.keys.contains(&vec!["custId".to_string()]));
}

#[test]
fn test_pipeline_config_from_json() {
    let config = PipelineConfig::from_json_str(r#"{"tagger": {"sort_hints": "id(a)#custId(a)"}, "compiler": {"partition": true}}"#).unwrap();
    assert!(config.compiler.partition);

    let ports = ports();
    let (tree, customer, _) = customers_with_orders(Some("custId"), Some("id"));
    let pipeline = MappingPipeline::new(&ports, config).unwrap();
    assert!(pipeline.tagger().config().resolve_partition);
    let output = pipeline.run(&tree).unwrap();
    assert_eq!(output.tags.partition(), Some(customer));
    assert!(output.plan.partition().is_some());
    assert!(!output.tags.is_cached(1));
}

#[test]
fn test_partitioned_plan_caches_sibling_loops() {
    let mut tree = DesignTree::new();
    let top = tree.add_object(tree.root(), "report").unwrap();
    tree.declare_mapping_namespace(top).unwrap();
    let customer = tree.add_object(top, "customer").unwrap();
    tree.bind(customer, "0", None, None).unwrap();
    tree.add_value(customer, Some("$0.name")).unwrap();
    let order = tree.add_object(top, "order").unwrap();
    tree.bind(order, "1", None, None).unwrap();
    tree.add_value(order, Some("$1.total")).unwrap();

    let ports = ports();
    let config = PipelineConfig::default().with_compiler(CompilerConfig::default().with_partition(true));
    let output = MappingPipeline::new(&ports, config).unwrap().run(&tree).unwrap();

    assert_eq!(output.tags.partition(), Some(customer));
    assert!(output.plan.partition().is_some());
    assert!(!output.tags.is_cached(0));
    assert_eq!(output.tags.cached_reason(1), Some(REASON_NOT_IN_PARTITION));
    assert!(output.plan.port_data()[&1].cached);
}
