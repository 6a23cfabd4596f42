//! hivegrid-scheduler: job queueing, execution, and dispatch.
//!
//! Accepts jobs from callers, orders them by priority, and routes each
//! one to the best available node. The dispatcher:
//!
//! - Keeps a priority queue (urgent → normal → bulk, FIFO within a class)
//! - Requeues jobs no node can take, without losing their position
//! - Executes jobs on a bounded worker pool and records node statistics
//! - Keeps completed/failed history and supports external resubmission
//! - Runs the node health-poll and discovery loops
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── JobQueue (BinaryHeap, Notify)
//!   ├── NodeRegistry (from hivegrid-registry)
//!   ├── dispatch loop ──▶ JoinSet<worker> ──▶ JobExecutor ──▶ PromptRenderer
//!   └── HealthPoller / Discovery loops
//! ```

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod prompts;
pub mod queue;

pub use dispatcher::{ClusterStatus, Dispatcher, DispatcherStats, NodeStatus};
pub use error::{SchedulerError, SchedulerResult};
pub use executor::JobExecutor;
pub use prompts::{GENERAL_LANGUAGE, PromptLibrary, PromptRenderer, PromptToggle, detect_language};
pub use queue::{JobQueue, QueuedJob};
