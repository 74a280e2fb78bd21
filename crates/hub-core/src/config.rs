//! Build-time thresholds and timings for recovery and the power cycle.

/// Thresholds and timings fixed per firmware build.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecoveryConfig {
    /// Resets inside one window that open the configuration portal.
    pub reset_threshold: u8,
    /// Length of the reset-detection window.
    pub reset_window_ms: u64,
    /// Consecutive unconfirmed boots that open the configuration portal.
    pub crash_threshold: u8,
    /// Upper bound for the drain window before sleeping.
    pub drain_window_ms: u64,
    /// Pause between transport polls inside the drain window.
    pub drain_poll_ms: u64,
    /// Cycle period while staying awake.
    pub publish_interval_ms: u64,
    pub portal_timeout_ms: u64,
    pub max_sleep_seconds: u32,
    /// Pause between radio shutdown and arming the wake timer.
    pub sleep_settle_ms: u64,
    /// Failed connect/publish cycles tolerated before restarting.
    pub max_cycle_failures: u8,
}

impl RecoveryConfig {
    pub const DEFAULT: Self = Self {
        reset_threshold: 3,
        reset_window_ms: 10_000,
        crash_threshold: 5,
        drain_window_ms: 5_000,
        drain_poll_ms: 10,
        publish_interval_ms: 30_000,
        portal_timeout_ms: 300_000,
        max_sleep_seconds: 3_600,
        sleep_settle_ms: 100,
        max_cycle_failures: 5,
    };
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
