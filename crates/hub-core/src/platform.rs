//! Interfaces of the board services the power-state controller drives.
//!
//! The firmware implements these over esp-radio, embassy-net and rust-mqtt;
//! host tests implement them with scripted fakes.

use crate::{command::Command, topics::Topics};

/// Hardware reason for the current boot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootCause {
    PowerOn,
    /// Woken by the deep-sleep timer the firmware armed.
    TimerWake,
    SoftwareRestart,
    Watchdog,
    Brownout,
    Other,
}

impl BootCause {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PowerOn => "power_on",
            Self::TimerWake => "timer_wake",
            Self::SoftwareRestart => "software_restart",
            Self::Watchdog => "watchdog",
            Self::Brownout => "brownout",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SleepError {
    /// Deep sleep is not available on this build or board.
    Unsupported,
    /// The wake timer could not be armed.
    WakeSourceRejected,
}

/// Monotonic milliseconds plus a cooperative wait.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now_ms(&self) -> u64;
    async fn delay_ms(&mut self, ms: u64);
}

/// Link-layer connectivity (Wi-Fi association and addressing).
#[allow(async_fn_in_trait)]
pub trait Network {
    async fn connect(&mut self) -> bool;
    fn is_connected(&self) -> bool;
    /// Tears the link down and powers the radio off.
    async fn disconnect(&mut self);
}

/// Broker session used for publishing and for inbound commands.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Opens the session and subscribes to the command topic.
    async fn connect(&mut self) -> bool;
    fn is_connected(&self) -> bool;
    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool;
    /// Next command received since the last poll, if any.
    async fn poll_incoming(&mut self) -> Option<Command>;
    async fn disconnect(&mut self);
}

/// Blocking provisioning UI. Returns `true` when new settings were saved.
#[allow(async_fn_in_trait)]
pub trait ConfigPortal {
    async fn run(&mut self, timeout_ms: u64) -> bool;
}

pub trait SleepControl {
    /// Arms the wake timer and enters deep sleep.
    ///
    /// On hardware a successful call does not return; the next code to run
    /// is the boot check after the timer wake.
    fn enter_deep_sleep(&mut self, seconds: u32) -> Result<(), SleepError>;
}

/// Sensor sampling and the readings message.
#[allow(async_fn_in_trait)]
pub trait Workload {
    async fn publish_readings<T: Transport>(
        &mut self,
        transport: &mut T,
        topics: &Topics,
        uptime_ms: u64,
    ) -> bool;
}
