//! # Runtime Services
//!
//! Infrastructure the engine runs on top of, kept apart from the resolution
//! logic in [`crate::core`].
//!
//! ## Modules
//!
//! - **`queue`**: A fixed pool of tokio workers draining a shared work channel.
//!   Command executions are scheduled on it by the dispatcher; a failed work
//!   item faults the queue so callers learn about it on their next enqueue.

pub mod queue;
