//! Microservice chain orchestration core: dependency graph, critical-path
//! analysis, topology-aware deployment, adaptive monitoring, and federated
//! parameter aggregation.

pub mod analysis;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod error;
pub mod federated;
pub mod logger;
pub mod monitor;
pub mod orchestrator;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
