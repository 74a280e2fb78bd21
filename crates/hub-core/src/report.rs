//! Status and event payloads published by the controller.

use core::fmt::Write;

use heapless::String;

use crate::{
    command::CommandError,
    controller::{BootOutcome, RestartReason},
    platform::BootCause,
};

pub const PAYLOAD_BYTES: usize = 256;

pub type Payload = String<PAYLOAD_BYTES>;

/// Retained device status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusReport {
    pub uptime_ms: u64,
    pub boot_cause: BootCause,
    pub boot_outcome: BootOutcome,
    /// Crash-loop count observed by this boot's check.
    pub crash_count: u8,
    pub sleep_seconds: u32,
    /// Some record writes this boot only reached memory.
    pub record_volatile: bool,
}

impl StatusReport {
    pub fn to_json(&self) -> Payload {
        let mut out = Payload::new();
        let _ = write!(
            out,
            "{{\"status\":\"online\",\"uptime_seconds\":{},\"boot_cause\":\"{}\",\"boot_reason\":\"{}\",\"crash_count\":{},\"deep_sleep_seconds\":{},\"deep_sleep_enabled\":{},\"record_volatile\":{}}}",
            self.uptime_ms / 1_000,
            self.boot_cause.as_str(),
            self.boot_outcome.as_str(),
            self.crash_count,
            self.sleep_seconds,
            self.sleep_seconds > 0,
            self.record_volatile
        );
        out
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceEvent {
    Boot {
        cause: BootCause,
        outcome: BootOutcome,
    },
    SleepConfigured {
        seconds: u32,
    },
    CommandRejected {
        reason: CommandError,
    },
    Restarting {
        reason: RestartReason,
    },
}

impl DeviceEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Boot { .. } => "device_boot",
            Self::SleepConfigured { .. } => "deep_sleep_config",
            Self::CommandRejected { .. } => "command_error",
            Self::Restarting { .. } => "device_restart",
        }
    }

    pub fn to_json(&self) -> Payload {
        let mut out = Payload::new();
        let _ = write!(out, "{{\"event\":\"{}\"", self.name());
        let _ = match *self {
            Self::Boot { cause, outcome } => write!(
                out,
                ",\"boot_cause\":\"{}\",\"boot_reason\":\"{}\"",
                cause.as_str(),
                outcome.as_str()
            ),
            Self::SleepConfigured { seconds } => write!(
                out,
                ",\"deep_sleep_seconds\":{},\"deep_sleep_enabled\":{}",
                seconds,
                seconds > 0
            ),
            Self::CommandRejected { reason } => {
                write!(out, ",\"reason\":\"{}\"", reason.as_str())
            }
            Self::Restarting { reason } => write!(out, ",\"reason\":\"{}\"", reason.as_str()),
        };
        let _ = out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_json_carries_sleep_and_crash_fields() {
        let report = StatusReport {
            uptime_ms: 12_345,
            boot_cause: BootCause::TimerWake,
            boot_outcome: BootOutcome::TimerWake,
            crash_count: 2,
            sleep_seconds: 60,
            record_volatile: false,
        };
        assert_eq!(
            report.to_json().as_str(),
            "{\"status\":\"online\",\"uptime_seconds\":12,\"boot_cause\":\"timer_wake\",\"boot_reason\":\"timer_wake\",\"crash_count\":2,\"deep_sleep_seconds\":60,\"deep_sleep_enabled\":true,\"record_volatile\":false}"
        );
    }

    #[test]
    fn sleep_config_event() {
        let event = DeviceEvent::SleepConfigured { seconds: 0 };
        assert_eq!(
            event.to_json().as_str(),
            "{\"event\":\"deep_sleep_config\",\"deep_sleep_seconds\":0,\"deep_sleep_enabled\":false}"
        );
    }

    #[test]
    fn rejected_command_event_names_the_reason() {
        let event = DeviceEvent::CommandRejected {
            reason: CommandError::OutOfRange,
        };
        assert_eq!(
            event.to_json().as_str(),
            "{\"event\":\"command_error\",\"reason\":\"out_of_range\"}"
        );
    }
}
