//! Progress query surface for rename jobs.
//!
//! Serves the [`ProgressBus`](renamer_events::ProgressBus) over HTTP: a
//! history poll endpoint and a WebSocket that replays history and then
//! streams live events.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
