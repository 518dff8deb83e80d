//! Traversal engine tests
//!
//! Closure computation over the reference workflow scenario and cyclic graphs.

use pretty_assertions::assert_eq;
use prov_graph::{
    default_rules, export_closure, traverse_graph, ConfigError, GraphError, LinkType, NodeType,
    Operation, RuleSet, NO_OVERRIDES,
};
use prov_test_utils::{cycle_graph, scenario_graph, TestGraph};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

#[test]
fn test_scenario_closure_from_input() {
    let (graph, scenario) = scenario_graph();
    let rules = default_rules([
        "input_calc_forward",
        "call_calc_backward",
        "call_work_backward",
        "return_forward",
    ])
    .unwrap();

    let result = traverse_graph(&graph.store, &[scenario.di.id], &rules).unwrap();

    assert_eq!(result.nodes(), scenario.all());
    assert_eq!(result.requested, BTreeSet::from([scenario.di.id]));
    assert_eq!(result.pulled_in.len(), 4);
}

#[test]
fn test_scenario_partial_rules_stop_early() {
    let (graph, scenario) = scenario_graph();
    let rules = default_rules(["input_calc_forward", "call_calc_backward"]).unwrap();

    let result = traverse_graph(&graph.store, &[scenario.di.id], &rules).unwrap();

    assert_eq!(
        result.nodes(),
        BTreeSet::from([scenario.di.id, scenario.c0.id, scenario.w1.id])
    );
}

#[test]
fn test_scenario_from_complete_rule_map() {
    let (graph, scenario) = scenario_graph();
    let enabled = [
        "input_calc_forward",
        "call_calc_backward",
        "call_work_backward",
        "return_forward",
    ];
    let map: Map<String, Value> = RuleSet::defaults(Operation::Default)
        .to_map()
        .into_keys()
        .map(|name| {
            let on = enabled.contains(&name.as_str());
            (name, Value::Bool(on))
        })
        .collect();

    let rules = RuleSet::from_map(Operation::Default, &map).unwrap();
    let result = traverse_graph(&graph.store, &[scenario.di.id], &rules).unwrap();
    assert_eq!(result.len(), 5);
}

#[test]
fn test_rule_map_validation_precedes_traversal() {
    let mut map = Map::new();
    map.insert("input_calc_forward".to_string(), json!(true));
    let err = RuleSet::from_map(Operation::Default, &map).unwrap_err();
    assert!(matches!(err, ConfigError::MissingRule(_)));
}

#[test]
fn test_export_defaults_from_output() {
    let (graph, scenario) = scenario_graph();

    // Export from DO: create_backward pulls C0, input_calc_backward pulls DI.
    // Callers of C0 stay out unless call_calc_backward is toggled.
    let result = export_closure(&graph.store, &[scenario.output.id], NO_OVERRIDES).unwrap();
    assert_eq!(
        result.nodes(),
        BTreeSet::from([scenario.output.id, scenario.c0.id, scenario.di.id])
    );

    let result = export_closure(
        &graph.store,
        &[scenario.output.id],
        [("call_calc_backward", true), ("call_work_backward", true)],
    )
    .unwrap();
    assert_eq!(result.nodes(), scenario.all());
}

#[test]
fn test_export_from_workflow_follows_calls() {
    let (graph, scenario) = scenario_graph();
    let result = export_closure(&graph.store, &[scenario.w2.id], NO_OVERRIDES).unwrap();
    // W2 -> W1 -> C0 (calls), C0 -> DO (create), C0 <- DI (input)
    assert_eq!(result.nodes(), scenario.all());
}

#[test]
fn test_export_workflow_keeps_its_inputs_and_returns() {
    let mut graph = TestGraph::new();
    let params = graph.add(NodeType::Data, "params");
    let wf = graph.add(NodeType::Workflow, "wf");
    let result_node = graph.add(NodeType::Data, "result");
    graph.link(params, wf, LinkType::InputWork, "params");
    graph.link(wf, result_node, LinkType::Return, "result");

    let result = export_closure(&graph.store, &[wf.id], NO_OVERRIDES).unwrap();
    assert_eq!(
        result.nodes(),
        BTreeSet::from([params.id, wf.id, result_node.id])
    );
    assert_eq!(result.links.len(), 2);

    // Both rules are part of the provenance and cannot be switched off
    for rule in ["input_work_backward", "return_forward"] {
        let err = export_closure(&graph.store, &[wf.id], [(rule, false)]).unwrap_err();
        assert!(matches!(err, GraphError::Config(ConfigError::NotToggleable { .. })));
    }
}

#[test]
fn test_export_return_backward_is_opt_in() {
    let (graph, scenario) = scenario_graph();
    let result = export_closure(
        &graph.store,
        &[scenario.output.id],
        [("return_backward", true)],
    )
    .unwrap();
    // DO <- W1, W2 (returns); W1 -> C0 and W2 -> W1 (calls); DI inputs
    assert_eq!(result.nodes(), scenario.all());
}

#[test]
fn test_export_rejects_fixed_rule_override() {
    let (graph, scenario) = scenario_graph();
    let err = export_closure(
        &graph.store,
        &[scenario.output.id],
        [("input_calc_backward", false)],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        GraphError::Config(ConfigError::NotToggleable { .. })
    ));
}

#[test]
fn test_cycle_terminates() {
    let (graph, members) = cycle_graph(3);
    let rules = default_rules(["input_calc_forward", "create_forward"]).unwrap();
    let expected: BTreeSet<_> = members.iter().map(|n| n.id).collect();

    let result = traverse_graph(&graph.store, &[members[0].id], &rules).unwrap();
    assert_eq!(result.nodes(), expected);
    assert_eq!(result.links.len(), 6);
}

proptest! {
    #[test]
    fn prop_cycle_closure_is_start_independent(
        pairs in 1..12usize,
        start in 0..24usize,
        backward in any::<bool>(),
    ) {
        let (graph, members) = cycle_graph(pairs);
        let start = members[start % members.len()];
        let rules = if backward {
            default_rules(["input_calc_backward", "create_backward"]).unwrap()
        } else {
            default_rules(["input_calc_forward", "create_forward"]).unwrap()
        };

        let result = traverse_graph(&graph.store, &[start.id], &rules).unwrap();

        let expected: BTreeSet<_> = members.iter().map(|n| n.id).collect();
        prop_assert_eq!(result.nodes(), expected);
        prop_assert_eq!(result.requested, BTreeSet::from([start.id]));
    }
}
