//! Hocuspocus webhook gateway.
//!
//! Receives signed lifecycle webhooks from a Hocuspocus collaboration server,
//! authenticates the collaborator behind each request, and stores the binary
//! document state per (collaborator, document) pair in SQLite.

pub mod access;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod payload;
pub mod queue;
pub mod signature;
pub mod snapshot;

pub use access::{AccessGate, AllowAll, DenyAll};
pub use config::Config;
pub use error::GatewayError;
pub use gateway::GatewayState;
pub use models::{DocumentRef, Model, ModelDescriptor, ModelRegistry};
pub use queue::{LocalQueue, MemoryQueue, Task, TaskQueue, TaskWorker};
