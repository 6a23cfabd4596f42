//! hivegrid node registry.
//!
//! Tracks the compute nodes the dispatcher can send work to, and keeps
//! their view of the world fresh.
//!
//! # Architecture
//!
//! ```text
//!   hivegrid.toml ──▶ NodeRegistry ◀── Discovery (CIDR × ports, /v1/models)
//!                       │    ▲
//!        acquire/release│    └──────── HealthPoller (/health)
//!                       ▼
//!                   dispatcher ──▶ NodeClient ──▶ /v1/chat/completions
//! ```
//!
//! # Components
//!
//! - **`client`**: hyper-based client for the node protocol
//! - **`registry`**: the node set, slot reservation, outcome statistics
//! - **`discovery`**: periodic subnet scanning and benchmarking
//! - **`health`**: periodic health polling with offline fallback

pub mod client;
pub mod discovery;
pub mod error;
pub mod health;
pub mod registry;

pub use client::{ChatRequest, NodeClient, extract_content};
pub use discovery::{DISCOVERED_CAPABILITY, Discovery, expand_cidr};
pub use error::{DiscoveryError, NodeError, NodeResult};
pub use health::{HealthPoller, fallback_metrics};
pub use registry::NodeRegistry;
