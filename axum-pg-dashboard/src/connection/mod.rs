//! Adaptive connection resolver
//!
//! Environment probing and strategy generation are pure and testable on their
//! own; [`manager::ConnectionManager`] runs the attempt loop and owns the pool.

pub mod config;
pub mod environment;
pub mod manager;
pub mod strategy;
pub mod target;

pub use config::{PoolConfig, ResolverConfig};
pub use environment::{EnvironmentFacts, EnvironmentProbe};
pub use manager::{ConnectionManager, ConnectionState, ConnectionStatus, ServerInfo};
pub use strategy::{generate_strategies, ConnectionStrategy};
pub use target::{ConnectionDescriptor, TargetAnalysis, TargetKind};
