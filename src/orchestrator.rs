//! Facade wiring C1-C7 together behind the operations SPEC_FULL.md names:
//! build a deployment, read back placement/critical paths/metrics, and feed
//! completion reports into the federated aggregator.

use std::sync::{Arc, Mutex};

use crate::analysis::critical_path::ScoredPath;
use crate::config::Config;
use crate::deploy::deployer::{DeploymentOutcome, Deployer};
use crate::domain::graph::DependencyGraph;
use crate::domain::node::NodeRegistry;
use crate::domain::params::GlobalParameterVector;
use crate::domain::placement::Placement;
use crate::error::Result;
use crate::federated::{LocalUpdateInput, ParameterAggregator};
use crate::monitor::{ChainMetrics, Monitor, MonitorTuning, MonitoringData, NodeProbe, SyntheticProbe};

/// Top-level handle a caller constructs once per running chain topology.
/// Owns the graph and node registry, serializes Deployer access behind a
/// `Mutex` (it is not reentrant), and wires the Monitor to read placement
/// through a snapshot closure rather than locking the Deployer itself.
pub struct Orchestrator {
    graph: Mutex<DependencyGraph>,
    registry: NodeRegistry,
    deployer: Arc<Mutex<Deployer>>,
    aggregator: Mutex<ParameterAggregator>,
    monitor: Monitor,
    config: Config,
}

impl Orchestrator {
    pub fn new(graph: DependencyGraph, registry: NodeRegistry, config: Config) -> Result<Self> {
        config.validate()?;
        crate::logger::init();

        let deployer = Arc::new(Mutex::new(
            Deployer::new(registry.clone(), config.initial_parameters).with_refinement_controls(
                config.max_refinement_iterations,
                config.convergence_threshold,
                config.migration_improvement_ratio,
            ),
        ));
        let aggregator = ParameterAggregator::new(&config);

        let placement_source = {
            let deployer = deployer.clone();
            Arc::new(move || deployer.lock().unwrap().placement().clone()) as Arc<dyn Fn() -> Placement + Send + Sync>
        };
        let probe: Arc<dyn NodeProbe> = Arc::new(SyntheticProbe);
        let monitor = Monitor::new(registry.clone(), probe, placement_source, MonitorTuning::from(&config));

        Ok(Self {
            graph: Mutex::new(graph),
            registry,
            deployer,
            aggregator: Mutex::new(aggregator),
            monitor,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Runs Phases A-C (initial placement) and registers every placed
    /// service/node/chain with the Monitor, but does not start sampling —
    /// callers that want telemetry call `start_monitoring` afterwards.
    pub fn deploy(&self) -> Result<DeploymentOutcome> {
        let mut graph = self.graph.lock().unwrap();
        let mut deployer = self.deployer.lock().unwrap();
        let outcome = deployer.execute_deployment(&mut graph)?;

        let mut aggregator = self.aggregator.lock().unwrap();
        for node_id in self.registry.node_ids() {
            self.monitor.register_node(&node_id);
            aggregator.register_node(node_id, *deployer.params());
        }
        for service_id in graph.service_ids_in_order() {
            self.monitor.register_service(service_id);
        }
        for chain in deployer.identify_chains(&graph)? {
            self.monitor.register_chain(&chain.key, chain.path.path.clone());
        }

        Ok(outcome)
    }

    /// Phase D: one or more rounds of {aggregate -> re-identify -> migrate}.
    pub fn refine(&self) -> Result<DeploymentOutcome> {
        let mut graph = self.graph.lock().unwrap();
        let mut deployer = self.deployer.lock().unwrap();
        let mut aggregator = self.aggregator.lock().unwrap();
        deployer.refine(&mut graph, &mut aggregator)
    }

    pub fn start_monitoring(&self) {
        self.monitor.start();
    }

    pub async fn stop_monitoring(&self) -> Result<()> {
        self.monitor.stop().await
    }

    pub fn placement(&self) -> Placement {
        self.deployer.lock().unwrap().placement().clone()
    }

    pub fn current_parameters(&self) -> GlobalParameterVector {
        *self.deployer.lock().unwrap().params()
    }

    pub fn critical_paths(&self, source: &str, sink: &str) -> Result<Vec<ScoredPath>> {
        let graph = self.graph.lock().unwrap();
        let analyzer = crate::analysis::critical_path::CriticalPathAnalyzer::new(&self.current_parameters());
        analyzer.identify_critical_paths(&graph, &self.registry, source, sink)
    }

    pub fn latest_metrics(&self) -> MonitoringData {
        self.monitor.latest()
    }

    pub fn metrics_history(&self) -> Vec<MonitoringData> {
        self.monitor.history()
    }

    /// Feeds one node's local gradient step into the federated aggregator.
    pub fn report_local_update(&self, node_id: &str, input: LocalUpdateInput) -> Result<()> {
        self.aggregator.lock().unwrap().local_update(node_id, input)
    }

    /// `reportCompletion` (§6): records a chain's latency and outcome into
    /// its chain-completion-rate statistics, then resolves the chain's
    /// member services to their placement nodes and feeds the outcome into
    /// each of those nodes' fail-rate EMAs.
    pub fn report_completion(&self, chain_id: &str, latency_ms: f64, succeeded: bool) -> Result<()> {
        let node_ids = self.monitor.record_chain_completion(chain_id, latency_ms, succeeded)?;
        let mut aggregator = self.aggregator.lock().unwrap();
        for node_id in &node_ids {
            aggregator.record_completion(node_id, succeeded)?;
        }
        Ok(())
    }

    /// Live read of one chain's derived metrics plus its `reportCompletion`
    /// statistics, independent of the Monitor's 1 Hz snapshot cadence.
    pub fn chain_metrics(&self, chain_id: &str) -> Result<ChainMetrics> {
        self.monitor.chain_metrics(chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::{Node, NodeClass};
    use crate::domain::resource::ResourceRequirements;
    use crate::domain::service::Microservice;

    fn scenario_one_graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_service(Microservice::new("A", ResourceRequirements::new(0.8, 800.0, 15.0), 10.0));
        g.add_service(Microservice::new("B", ResourceRequirements::new(0.3, 1500.0, 40.0), 15.0));
        g.add_dependency("A", "B", 50.0, 0.8).unwrap();
        g
    }

    fn scenario_one_registry() -> NodeRegistry {
        let registry = NodeRegistry::new();
        registry.add_node(Node::new("edge", NodeClass::Edge));
        registry.add_node(Node::new("cloud", NodeClass::Cloud));
        registry.set_delay("edge", "cloud", 30.0).unwrap();
        registry.set_delay("cloud", "edge", 30.0).unwrap();
        registry
    }

    #[test]
    fn deploy_places_every_service_and_surfaces_placement() {
        let orchestrator = Orchestrator::new(scenario_one_graph(), scenario_one_registry(), Config::default()).unwrap();
        let outcome = orchestrator.deploy().unwrap();
        assert!(outcome.unplaced.is_empty());
        assert_eq!(orchestrator.placement().len(), 2);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = Config::default();
        config.quantity_threshold = 0;
        let err = Orchestrator::new(scenario_one_graph(), scenario_one_registry(), config).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn monitoring_can_be_started_and_stopped_after_deployment() {
        let orchestrator = Orchestrator::new(scenario_one_graph(), scenario_one_registry(), Config::default()).unwrap();
        orchestrator.deploy().unwrap();
        orchestrator.start_monitoring();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(orchestrator.stop_monitoring().await.is_ok());
    }
}
