//! The Monitor (C6): per-entity adaptive sampling over a shared `tokio`
//! worker pool, a fixed-rate snapshot aggregator, and cooperative,
//! timeout-bounded shutdown (§4.4, §5).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinSet;

use crate::domain::node::NodeRegistry;
use crate::domain::placement::Placement;
use crate::error::{EntityKind, Error, Result};
use crate::monitor::probe::NodeProbe;
use crate::monitor::state::{
    self, ChainMetrics, MonitoringData, NodeMetrics, ServiceMetrics, Window, adaptive_interval,
};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a Monitor needs to know up front; mirrors the relevant
/// entries of `config::Config`.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTuning {
    pub epsilon_resource: f64,
    pub epsilon_latency: f64,
    pub base_sampling_interval: Duration,
    pub min_sampling_interval: Duration,
    pub window_size: usize,
    pub history_size: usize,
}

struct ServiceRecord {
    metrics: ServiceMetrics,
    window: Window,
    interval: Duration,
}

struct NodeRecord {
    metrics: NodeMetrics,
    window: Window,
    interval: Duration,
}

struct ChainRecord {
    path: Vec<String>,
    metrics: ChainMetrics,
    window: Window,
    interval: Duration,
    /// `reportCompletion` counters (§6), independent of the sampled
    /// `completion_rate` bottleneck — incremented only by
    /// `Monitor::record_chain_completion`.
    total_completions: u64,
    successful_completions: u64,
}

/// Everything the background tasks need, bundled so each task can hold a
/// cheap `Arc` clone of it rather than borrowing the `Monitor` itself.
struct MonitorShared {
    registry: NodeRegistry,
    probe: Arc<dyn NodeProbe>,
    placement_source: Arc<dyn Fn() -> Placement + Send + Sync>,
    tuning: MonitorTuning,
    cancel: AtomicBool,
    services: RwLock<HashMap<String, ServiceRecord>>,
    nodes: RwLock<HashMap<String, NodeRecord>>,
    chains: RwLock<HashMap<String, ChainRecord>>,
    latest: RwLock<MonitoringData>,
    history: RwLock<VecDeque<MonitoringData>>,
    tasks: std::sync::Mutex<JoinSet<()>>,
}

/// Per-entity adaptive sampler plus the fixed-rate snapshot aggregator.
/// Cheaply `Clone`-able — every clone shares the same background tasks and
/// tables, the same discipline `NodeRegistry` uses.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<MonitorShared>,
}

impl Monitor {
    pub fn new(registry: NodeRegistry, probe: Arc<dyn NodeProbe>, placement_source: Arc<dyn Fn() -> Placement + Send + Sync>, tuning: MonitorTuning) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                registry,
                probe,
                placement_source,
                tuning,
                cancel: AtomicBool::new(false),
                services: RwLock::new(HashMap::new()),
                nodes: RwLock::new(HashMap::new()),
                chains: RwLock::new(HashMap::new()),
                latest: RwLock::new(MonitoringData::default()),
                history: RwLock::new(VecDeque::with_capacity(tuning.history_size)),
                tasks: std::sync::Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn register_service(&self, service_id: &str) {
        self.shared.services.write().unwrap().entry(service_id.to_string()).or_insert_with(|| ServiceRecord {
            metrics: ServiceMetrics::default(),
            window: Window::new(self.shared.tuning.window_size),
            interval: self.shared.tuning.base_sampling_interval,
        });
    }

    pub fn register_node(&self, node_id: &str) {
        self.shared.nodes.write().unwrap().entry(node_id.to_string()).or_insert_with(|| NodeRecord {
            metrics: NodeMetrics::default(),
            window: Window::new(self.shared.tuning.window_size),
            interval: self.shared.tuning.base_sampling_interval,
        });
    }

    pub fn register_chain(&self, chain_id: &str, path: Vec<String>) {
        self.shared.chains.write().unwrap().entry(chain_id.to_string()).or_insert_with(|| ChainRecord {
            path,
            metrics: ChainMetrics::default(),
            window: Window::new(self.shared.tuning.window_size),
            interval: self.shared.tuning.base_sampling_interval,
            total_completions: 0,
            successful_completions: 0,
        });
    }

    /// `reportCompletion`'s chain-facing half (§6): records `latency_ms`
    /// into the chain's window, updates its reported-completion-rate
    /// counters, and resolves the chain's member services to their current
    /// placement nodes so the caller can fan the outcome into each node's
    /// fail-rate EMA. Returns the distinct node ids (order unspecified).
    pub fn record_chain_completion(&self, chain_id: &str, latency_ms: f64, succeeded: bool) -> Result<Vec<String>> {
        let path = {
            let mut table = self.shared.chains.write().unwrap();
            let record = table.get_mut(chain_id).ok_or_else(|| Error::not_found(EntityKind::Chain, chain_id))?;
            record.window.push(latency_ms);
            record.total_completions += 1;
            if succeeded {
                record.successful_completions += 1;
            }
            record.metrics.reported_completion_rate = record.successful_completions as f64 / record.total_completions as f64;
            record.path.clone()
        };

        let placement = (self.shared.placement_source)();
        let node_ids: HashSet<String> = path.iter().filter_map(|service_id| placement.get(service_id)).map(str::to_string).collect();
        Ok(node_ids.into_iter().collect())
    }

    /// Immediate (non-buffered) read of one chain's latest metrics, bypassing
    /// the 1 Hz aggregator tick `latest()`/`history()` rely on.
    pub fn chain_metrics(&self, chain_id: &str) -> Result<ChainMetrics> {
        let table = self.shared.chains.read().unwrap();
        let record = table.get(chain_id).ok_or_else(|| Error::not_found(EntityKind::Chain, chain_id))?;
        Ok(record.metrics)
    }

    /// Spawns one self-rescheduling task per currently-registered entity
    /// plus the 1 Hz snapshot aggregator. Entities registered after
    /// `start()` are not separately picked up — the monitored topology is
    /// fixed at start time, mirroring how the Deployer fixes chain
    /// membership before Phase D begins.
    pub fn start(&self) {
        let service_ids: Vec<String> = self.shared.services.read().unwrap().keys().cloned().collect();
        let node_ids: Vec<String> = self.shared.nodes.read().unwrap().keys().cloned().collect();
        let chain_ids: Vec<String> = self.shared.chains.read().unwrap().keys().cloned().collect();

        let mut tasks = self.shared.tasks.lock().unwrap();
        for id in service_ids {
            let shared = self.shared.clone();
            tasks.spawn(async move { sample_service_loop(shared, id).await });
        }
        for id in node_ids {
            let shared = self.shared.clone();
            tasks.spawn(async move { sample_node_loop(shared, id).await });
        }
        for id in chain_ids {
            let shared = self.shared.clone();
            tasks.spawn(async move { sample_chain_loop(shared, id).await });
        }
        let shared = self.shared.clone();
        tasks.spawn(async move { aggregator_loop(shared).await });
        log::info!("monitor started");
    }

    /// Flips the cooperative cancellation flag, then waits up to 5 s for
    /// every task to observe it and exit. Tasks still running past the
    /// deadline are aborted and the interruption is re-raised to the
    /// caller rather than swallowed.
    pub async fn stop(&self) -> Result<()> {
        self.shared.cancel.store(true, Ordering::SeqCst);
        let mut tasks = std::mem::replace(&mut *self.shared.tasks.lock().unwrap(), JoinSet::new());

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, drain).await {
            Ok(()) => {
                log::info!("monitor stopped cleanly");
                Ok(())
            }
            Err(_) => {
                tasks.abort_all();
                log::warn!("monitor shutdown timed out after {SHUTDOWN_JOIN_TIMEOUT:?}; force-terminating remaining tasks");
                Err(Error::InvariantViolation("monitor shutdown interrupted: force-terminated after timeout".to_string()))
            }
        }
    }

    /// The latest `MonitoringData` snapshot, readable under a single
    /// atomic swap regardless of sampler activity in flight.
    pub fn latest(&self) -> MonitoringData {
        self.shared.latest.read().unwrap().clone()
    }

    /// Up to `historySize` most recent snapshots, oldest first.
    pub fn history(&self) -> Vec<MonitoringData> {
        self.shared.history.read().unwrap().iter().cloned().collect()
    }
}

fn node_utilization_triple(registry: &NodeRegistry, node_id: &str) -> (f64, f64, f64) {
    match registry.get(node_id) {
        Ok(node) => (node.capacity.cpu_utilization(), node.capacity.mem_utilization(), node.capacity.bw_utilization()),
        Err(_) => (0.0, 0.0, 0.0),
    }
}

async fn sample_service_loop(shared: Arc<MonitorShared>, service_id: String) {
    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }
        let placement = (shared.placement_source)();
        let (cpu, mem, bw) = match placement.get(&service_id) {
            Some(node_id) => node_utilization_triple(&shared.registry, node_id),
            None => (0.0, 0.0, 0.0),
        };
        let sample = shared.probe.sample_service(&service_id, cpu);
        let interval = {
            let mut table = shared.services.write().unwrap();
            let Some(record) = table.get_mut(&service_id) else { break };
            record.metrics = ServiceMetrics {
                latency_ms: sample.latency_ms,
                queue_length: sample.queue_length,
                request_rate: sample.request_rate,
                cpu_utilization: cpu,
                mem_utilization: mem,
                bw_utilization: bw,
            };
            record.window.push(sample.latency_ms);
            record.interval = adaptive_interval(
                EntityKind::Service,
                &record.window,
                shared.tuning.epsilon_resource,
                shared.tuning.epsilon_latency,
                shared.tuning.base_sampling_interval,
                shared.tuning.min_sampling_interval,
            );
            log::debug!("service '{service_id}' resampled: latency={:.2}ms next_interval={:?}", sample.latency_ms, record.interval);
            record.interval
        };
        tokio::time::sleep(interval).await;
    }
}

async fn sample_node_loop(shared: Arc<MonitorShared>, node_id: String) {
    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }
        let (cpu, mem, bw) = node_utilization_triple(&shared.registry, &node_id);
        let interval = {
            let mut table = shared.nodes.write().unwrap();
            let Some(record) = table.get_mut(&node_id) else { break };
            record.metrics = NodeMetrics { cpu_utilization: cpu, mem_utilization: mem, bw_utilization: bw };
            record.window.push(cpu);
            record.interval = adaptive_interval(
                EntityKind::Node,
                &record.window,
                shared.tuning.epsilon_resource,
                shared.tuning.epsilon_latency,
                shared.tuning.base_sampling_interval,
                shared.tuning.min_sampling_interval,
            );
            log::debug!("node '{node_id}' resampled: cpu={cpu:.2} next_interval={:?}", record.interval);
            record.interval
        };
        tokio::time::sleep(interval).await;
    }
}

async fn sample_chain_loop(shared: Arc<MonitorShared>, chain_id: String) {
    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }
        let placement = (shared.placement_source)();
        let service_snapshot: HashMap<String, ServiceMetrics> =
            shared.services.read().unwrap().iter().map(|(id, r)| (id.clone(), r.metrics)).collect();

        let interval = {
            let mut table = shared.chains.write().unwrap();
            let Some(record) = table.get_mut(&chain_id) else { break };
            let latency = state::chain_end_to_end_latency(&record.path, &service_snapshot, &placement, &shared.registry);
            let completion_rate = state::chain_completion_rate(&record.path, &service_snapshot);
            let (max_lat, min_lat) = state::chain_latency_bounds(&record.path, &service_snapshot);
            record.metrics = ChainMetrics {
                end_to_end_latency_ms: latency,
                completion_rate,
                max_service_latency_ms: max_lat,
                min_service_latency_ms: min_lat,
                reported_completion_rate: record.metrics.reported_completion_rate,
            };
            record.window.push(latency);
            record.interval = adaptive_interval(
                EntityKind::Chain,
                &record.window,
                shared.tuning.epsilon_resource,
                shared.tuning.epsilon_latency,
                shared.tuning.base_sampling_interval,
                shared.tuning.min_sampling_interval,
            );
            record.interval
        };
        tokio::time::sleep(interval).await;
    }
}

async fn aggregator_loop(shared: Arc<MonitorShared>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }
        let snapshot = MonitoringData {
            services: shared.services.read().unwrap().iter().map(|(id, r)| (id.clone(), r.metrics)).collect(),
            nodes: shared.nodes.read().unwrap().iter().map(|(id, r)| (id.clone(), r.metrics)).collect(),
            chains: shared.chains.read().unwrap().iter().map(|(id, r)| (id.clone(), r.metrics)).collect(),
        };
        *shared.latest.write().unwrap() = snapshot.clone();
        let mut history = shared.history.write().unwrap();
        if history.len() == shared.history_capacity() {
            history.pop_front();
        }
        history.push_back(snapshot);
    }
}

impl MonitorShared {
    fn history_capacity(&self) -> usize {
        self.tuning.history_size
    }
}
