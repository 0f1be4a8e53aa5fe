use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Ping schedule for one progress socket.
///
/// The first tick fires one full `period` after the connection opens, and a
/// slow send delays the next ping instead of bursting.
pub fn heartbeat(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
