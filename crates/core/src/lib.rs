//! Domain building blocks for the image rename pipeline.
//!
//! Everything in this crate is synchronous and free of I/O so it can be
//! unit tested without storage, queues or an inference backend.

pub mod error;
pub mod format;
pub mod job;
pub mod job_events;
pub mod naming;
pub mod types;
