//! # R4 Common Library
//!
//! Shared code for the r4 sync service and its tooling:
//! - Local store schema, migrations and row models
//! - Sync event types (SyncEvent enum) and the broadcast EventBus
//! - Bootstrap configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
