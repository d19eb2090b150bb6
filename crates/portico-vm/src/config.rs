//! Instance configuration.

use std::time::Duration;

/// Tunables for one engine instance.
///
/// | Field | Default | Meaning |
/// |-------|---------|---------|
/// | `tick_buffer` | 64 | capacity of the bounded external tick channel |
/// | `send_retry` | 100µs | pause between send retries under backpressure |
/// | `thread_prefix` | `"portico-vm"` | worker thread name prefix |
///
/// The continuation channel is unbounded and not configurable: the
/// worker's own requeue during frame unwind must never block.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Capacity of the bounded external tick channel.
    pub tick_buffer: usize,
    /// Pause between retries when the external channel is full.
    ///
    /// Backpressure is never surfaced to producers as an error; a full
    /// channel just slows the sender down (see the transport contract).
    pub send_retry: Duration,
    /// Worker thread name prefix; the engine id's short form is
    /// appended, e.g. `portico-vm-1f2a9c04`.
    pub thread_prefix: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            tick_buffer: 64,
            send_retry: Duration::from_micros(100),
            thread_prefix: "portico-vm".to_string(),
        }
    }
}

impl VmConfig {
    /// Returns the worker thread name for an instance.
    #[must_use]
    pub(crate) fn thread_name(&self, short_id: &str) -> String {
        format!("{}-{}", self.thread_prefix, short_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VmConfig::default();
        assert_eq!(config.tick_buffer, 64);
        assert_eq!(config.send_retry, Duration::from_micros(100));
        assert_eq!(config.thread_prefix, "portico-vm");
    }

    #[test]
    fn thread_name_appends_short_id() {
        let config = VmConfig::default();
        assert_eq!(config.thread_name("1f2a9c04"), "portico-vm-1f2a9c04");
    }
}
