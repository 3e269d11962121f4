//! Shared domain types for the shelfsync client.
//!
//! Defines the job snapshot model, the job lifecycle status machine,
//! and the primitive aliases used across the workspace.

pub mod job;
pub mod types;

pub use job::{JobKind, JobSnapshot, JobStatus};
pub use types::{JobId, Timestamp};
