//! `odomap-node` – the collaborator layer around the odometry core.
//!
//! Feeds scans into [`odomap_core::OdometryService`] and turns its results
//! into messages other processes can consume.
//!
//! # Modules
//!
//! - [`node`] – [`LidarOdometryNode`]: scan callback, map query, periodic
//!   map publication.
//! - [`ingest`] – stamp-ordered scan queue and the worker that drains it.
//! - [`adapter`] – [`ScanSource`] trait and the JSON-lines [`ReplaySource`].
//! - [`bus`] – topic-partitioned broadcast bus for the node's outputs.
//! - [`msg`] – conversion from core results to message shapes.
//! - [`config`] – `odomap.toml` loading, saving and env overrides.
//! - [`telemetry`] – tracing subscriber and optional OTLP export.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod ingest;
pub mod msg;
pub mod node;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapter::{ReplayRecord, ReplaySource, ScanSource};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use config::NodeConfig;
pub use ingest::{ReorderQueue, spawn_scan_worker};
pub use node::{LidarOdometryNode, spawn_publisher};
