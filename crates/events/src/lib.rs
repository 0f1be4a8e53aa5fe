//! Job progress distribution.
//!
//! - [`ProgressBus`]: per-job publish/subscribe hub for [`ProgressEvent`]s
//!   with history replay for late joiners.
//! - [`HistoryStore`]: bounded, time-expiring event history. Implemented by
//!   [`NoopHistory`] (no store available), [`MemoryHistory`] and
//!   [`RedisHistory`].

pub mod bus;
pub mod history;
pub mod redis_history;

pub use bus::{ProgressBus, ProgressEvent, Subscription, SubscriptionHandle};
pub use history::{HistoryConfig, HistoryError, HistoryStore, MemoryHistory, NoopHistory};
pub use redis_history::RedisHistory;
