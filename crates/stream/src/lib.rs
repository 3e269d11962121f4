//! Real-time job event client for a shelfsync server.
//!
//! This crate provides the building blocks for mirroring server-side
//! background jobs (downloads, conversions, library syncs, repairs)
//! into a local, reactively-readable cache:
//!
//! - [`StreamClient`] — resilient WebSocket connection with a
//!   reconnect-with-backoff state machine.
//! - [`Dispatcher`] — per-tag envelope routing, batch unwrapping, and
//!   interval-buffered log delivery.
//! - [`JobCache`] — shared snapshot store with a live-filtered
//!   active-jobs view.
//! - [`reconcile`] — the pure merge policy that folds push events,
//!   pull responses, and optimistic mutations into one view.
//! - [`JobsApi`] — HTTP pull and mutation client.
//! - [`JobStreamManager`] — wires everything together.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod messages;
pub mod queue;
pub mod reconcile;
pub mod reconnect;

pub use api::{CreateAck, JobFilter, JobListResponse, JobsApi, JobsApiError, MutationAck};
pub use cache::{CacheCheckpoint, JobCache};
pub use client::{ConnectionState, StreamClient, StreamClientError};
pub use config::StreamConfig;
pub use dispatcher::{Dispatcher, Handler, SubscriptionToken};
pub use manager::JobStreamManager;
pub use messages::{parse_envelope, Envelope, EventTag};
pub use queue::{OutboundQueue, QueueFull};
pub use reconnect::ReconnectConfig;
