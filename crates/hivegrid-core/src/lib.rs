//! hivegrid-core: shared data model for the hivegrid cluster dispatcher.
//!
//! Holds the types every other crate agrees on: jobs and their lifecycle,
//! compute nodes and their runtime statistics, telemetry records, and the
//! TOML cluster configuration.
//!
//! # Architecture
//!
//! ```text
//! hivegrid-core
//!   ├── types   (Job, Node, SystemMetrics, NodeMetrics, ...)
//!   ├── config  (ClusterConfig ← hivegrid.toml)
//!   └── time    (epoch helpers)
//! ```

pub mod config;
pub mod time;
pub mod types;

pub use config::{ClusterConfig, parse_duration};
pub use time::epoch_secs;
pub use types::*;
