//! HTTP control surface
//!
//! REST endpoints that trigger syncs and read the local store, plus an SSE
//! stream of sync events.

pub mod health;
pub mod sse;
pub mod sync;

pub use health::health_routes;
pub use sse::event_stream;
pub use sync::sync_routes;
