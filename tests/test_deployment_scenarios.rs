//! End-to-end deployment through the public facade (spec.md §8 scenarios 1-2).

use chainforge_orchestrator::config::Config;
use chainforge_orchestrator::domain::graph::DependencyGraph;
use chainforge_orchestrator::domain::node::{Node, NodeClass, NodeRegistry};
use chainforge_orchestrator::domain::resource::ResourceRequirements;
use chainforge_orchestrator::domain::service::Microservice;
use chainforge_orchestrator::orchestrator::Orchestrator;

fn create_test_linear_chain() -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    graph.add_service(Microservice::new("A", ResourceRequirements::new(0.8, 800.0, 15.0), 10.0));
    graph.add_service(Microservice::new("B", ResourceRequirements::new(0.3, 1500.0, 40.0), 15.0));
    graph.add_dependency("A", "B", 50.0, 0.8).unwrap();
    graph
}

fn create_test_fleet() -> NodeRegistry {
    let registry = NodeRegistry::new();
    registry.add_node(Node::new("edge", NodeClass::Edge));
    registry.add_node(Node::new("cloud", NodeClass::Cloud));
    registry.set_delay("edge", "cloud", 30.0).unwrap();
    registry.set_delay("cloud", "edge", 30.0).unwrap();
    registry
}

#[test]
fn scenario_one_colocates_the_linear_chain_on_cloud() {
    let orchestrator = Orchestrator::new(create_test_linear_chain(), create_test_fleet(), Config::default()).unwrap();
    let outcome = orchestrator.deploy().unwrap();

    assert!(outcome.unplaced.is_empty());
    let placement = orchestrator.placement();
    assert_eq!(placement.get("A"), Some("cloud"));
    assert_eq!(placement.get("B"), Some("cloud"));

    let scored = orchestrator.critical_paths("A", "B").unwrap();
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].path, vec!["A".to_string(), "B".to_string()]);
    assert!((scored[0].temporal - 25.05).abs() < 1e-9);
}

#[test]
fn scenario_two_capacity_exhaustion_places_exactly_one_of_three() {
    let mut graph = DependencyGraph::new();
    for id in ["X", "Y", "Z"] {
        graph.add_service(Microservice::new(id, ResourceRequirements::new(3.0, 4000.0, 40.0), 5.0));
    }
    let registry = NodeRegistry::new();
    registry.add_node(Node::new("edge", NodeClass::Edge));

    let orchestrator = Orchestrator::new(graph, registry, Config::default()).unwrap();
    let outcome = orchestrator.deploy().unwrap();

    assert_eq!(outcome.placement.len(), 1);
    assert_eq!(outcome.unplaced.len(), 2);
    for unplaced in &outcome.unplaced {
        assert_eq!(unplaced.reason, "insufficient capacity");
    }

    let node = orchestrator.registry().get("edge").unwrap();
    assert!(node.capacity.available_cpu >= 0.0);
    assert!(node.capacity.available_mem >= 0.0);
    assert!(node.capacity.available_bw >= 0.0);
}
