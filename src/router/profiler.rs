//! Per-command timing records for the shard router.

use std::time::Duration;

use tracing::debug;

/// Category every routed command is recorded under.
pub const PROFILE_CATEGORY: &str = "redis";

/// Receives one timing record per routed command.
///
/// `entry` is the verb followed by its arguments; nested arguments appear as
/// their type name.
pub trait Profiler: Send {
    fn record(&mut self, category: &str, elapsed: Duration, entry: &str);
}

/// Emits each record as a `debug` event on the `redis` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProfiler;

impl Profiler for TracingProfiler {
    fn record(&mut self, category: &str, elapsed: Duration, entry: &str) {
        debug!(
            target: "redis",
            category,
            elapsed_us = elapsed.as_micros() as u64,
            command = entry,
            "command dispatched"
        );
    }
}
