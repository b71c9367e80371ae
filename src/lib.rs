//! Ecos: an execution companion that turns a long-horizon goal into one
//! committed piece of work per day.
//!
//! # Architecture
//!
//! An inbound user event flows through these layers:
//! - **Host**: line-delimited JSON envelopes over stdin/stdout
//! - **Engine**: per-user session, candidate selection and the step state
//!   machine (start, complete, stuck, shrink, exit, review)
//! - **Content**: structured requests to an OpenAI-compatible generator,
//!   validated, with deterministic fallback on any failure
//! - **Store**: SQLite persistence for goals, tasks, mainlines, steps and
//!   the append-only logs

pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod host;
pub mod import;
pub mod intent;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use config::EcosConfig;
pub use engine::{Event, ProgressionEngine, Reply, ReplyBody};
pub use error::{EcosError, Result};
pub use store::{SqliteStore, StoreError};
