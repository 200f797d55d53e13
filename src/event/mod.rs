//! Contains the events and handler types used for monitoring driver
//! activity: command execution, connection pool behavior, and topology
//! changes.
//!
//! Handlers are plain callbacks; the driver never blocks on them, so they
//! should return quickly.

pub mod cmap;
pub mod command;
pub mod sdam;

use std::sync::Arc;

/// A callback invoked with each event of type `T`.
pub type EventHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
