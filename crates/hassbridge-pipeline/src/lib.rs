//! Event processing pipeline
//!
//! ```text
//! HubEvent ──► rule matching ──► EventQueue (max 20, drop oldest)
//!                                     │  up to 3 at a time
//!                                     ▼
//!                               EventProcessor
//!                    ensure token ─► build prompt ─► execute ─► notify
//! ```
//!
//! - `queue` - bounded FIFO
//! - `pipeline` - matching, admission and drain
//! - `processor` - per-task work with one refresh-and-retry
//! - `prompt` - prompt text for the notification generator
//! - `executor` - prompt execution through the CLI
//! - `sync` - keeps hub subscriptions in line with the enabled rules

pub mod executor;
pub mod pipeline;
pub mod processor;
pub mod prompt;
pub mod queue;
pub mod sync;

pub use executor::{ClaudeCliExecutor, ExecutionError, PromptExecutor};
pub use pipeline::{EventPipeline, PipelineLimits, TaskHandler};
pub use processor::EventProcessor;
pub use prompt::PromptBuilder;
pub use queue::{EventQueue, QueuedTask};
pub use sync::{attach_rule_source, route_events, sync_subscriptions};
