//! Power-state machine: boot check, configuration portal, publish cycle,
//! drain window and deep-sleep entry.
//!
//! `step` is the only transition function. Each state handler does its work
//! through the collaborators in [`Services`] and returns the next state.

use core::pin::pin;

use embassy_futures::select::{Either, select};
use log::{error, info, warn};

use crate::{
    command::{Command, check_sleep_seconds},
    config::RecoveryConfig,
    crash_loop::{CrashLoopCounter, CrashVerdict},
    platform::{BootCause, Clock, ConfigPortal, Network, SleepControl, Transport, Workload},
    record::{PersistenceBackend, PersistentRecord},
    report::{DeviceEvent, StatusReport},
    reset_counter::{ResetCounter, ResetVerdict},
    topics::{TopicKind, Topics},
};

/// How the boot check classified the current boot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootOutcome {
    Normal,
    /// Timer wake from deep sleep; counters were not touched.
    TimerWake,
    /// The reset sequence threshold was reached.
    ResetSequence,
    /// Too many unconfirmed boots in a row.
    CrashLoop,
}

impl BootOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::TimerWake => "timer_wake",
            Self::ResetSequence => "reset_sequence",
            Self::CrashLoop => "crash_loop",
        }
    }

    pub const fn enters_config(self) -> bool {
        matches!(self, Self::ResetSequence | Self::CrashLoop)
    }
}

/// Result of the boot check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootReport {
    pub cause: BootCause,
    pub outcome: BootOutcome,
    /// Crash-loop count as seen by this check, before any recovery reset.
    pub crash_count: u8,
}

impl BootReport {
    /// First state after the check.
    pub const fn next_state(&self) -> PowerState {
        if self.outcome.enters_config() {
            PowerState::ConfigMode
        } else {
            PowerState::NormalOperation
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RestartReason {
    PortalSaved,
    PortalTimedOut,
    RemoteCommand,
    /// Network or publish kept failing.
    CycleFailures,
}

impl RestartReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PortalSaved => "portal_saved",
            Self::PortalTimedOut => "portal_timeout",
            Self::RemoteCommand => "remote_command",
            Self::CycleFailures => "cycle_failures",
        }
    }
}

/// Terminal outcome of [`PowerController::run`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Halt {
    /// Deep sleep was entered with the given timer.
    Slept { seconds: u32 },
    /// The board must be reset.
    Restart(RestartReason),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerState {
    BootCheck,
    ConfigMode,
    NormalOperation,
    DrainWindow,
    SleepEntry,
    /// Awake between cycles, still serving commands.
    Idle,
    Halted(Halt),
}

impl PowerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BootCheck => "boot_check",
            Self::ConfigMode => "config_mode",
            Self::NormalOperation => "normal_operation",
            Self::DrainWindow => "drain_window",
            Self::SleepEntry => "sleep_entry",
            Self::Idle => "idle",
            Self::Halted(_) => "halted",
        }
    }
}

/// Board services the controller drives.
pub struct Services<C, N, T, P, S, W> {
    pub clock: C,
    pub network: N,
    pub transport: T,
    pub portal: P,
    pub sleep: S,
    pub workload: W,
}

pub struct PowerController<B, C, N, T, P, S, W> {
    config: RecoveryConfig,
    record: PersistentRecord<B>,
    reset: ResetCounter,
    crash: CrashLoopCounter,
    services: Services<C, N, T, P, S, W>,
    topics: Topics,
    boot: BootReport,
    boot_confirmed: bool,
    boot_event_sent: bool,
    cycle_failures: u8,
}

include!("boot.rs");
include!("cycle.rs");
include!("drain.rs");
include!("sleep.rs");

impl<B, C, N, T, P, S, W> PowerController<B, C, N, T, P, S, W>
where
    B: PersistenceBackend,
    C: Clock,
    N: Network,
    T: Transport,
    P: ConfigPortal,
    S: SleepControl,
    W: Workload,
{
    /// Creates a controller that has not yet run its boot check.
    pub fn new(
        config: RecoveryConfig,
        record: PersistentRecord<B>,
        services: Services<C, N, T, P, S, W>,
        topics: Topics,
        boot_cause: BootCause,
    ) -> Self {
        Self {
            config,
            record,
            reset: ResetCounter::from_config(&config),
            crash: CrashLoopCounter::from_config(&config),
            services,
            topics,
            boot: BootReport {
                cause: boot_cause,
                outcome: BootOutcome::Normal,
                crash_count: 0,
            },
            boot_confirmed: false,
            boot_event_sent: false,
            cycle_failures: 0,
        }
    }

    /// Creates a controller for a boot already classified by [`check_boot`].
    pub fn after_boot_check(
        config: RecoveryConfig,
        record: PersistentRecord<B>,
        services: Services<C, N, T, P, S, W>,
        topics: Topics,
        boot: BootReport,
    ) -> Self {
        let mut controller = Self::new(config, record, services, topics, boot.cause);
        controller.boot = boot;
        controller
    }

    pub fn record(&self) -> &PersistentRecord<B> {
        &self.record
    }

    pub fn boot_report(&self) -> BootReport {
        self.boot
    }

    pub fn services(&self) -> &Services<C, N, T, P, S, W> {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services<C, N, T, P, S, W> {
        &mut self.services
    }

    pub fn into_parts(self) -> (PersistentRecord<B>, Services<C, N, T, P, S, W>) {
        (self.record, self.services)
    }

    /// Runs transitions until a terminal state is reached.
    pub async fn run(&mut self, initial: PowerState) -> Halt {
        let mut state = initial;
        loop {
            if let PowerState::Halted(halt) = state {
                return halt;
            }
            let next = self.step(state).await;
            if next != state {
                info!("power: {} -> {}", state.as_str(), next.as_str());
            }
            state = next;
        }
    }

    pub async fn step(&mut self, state: PowerState) -> PowerState {
        match state {
            PowerState::BootCheck => self.boot_check(),
            PowerState::ConfigMode => self.config_mode().await,
            PowerState::NormalOperation => self.normal_operation().await,
            PowerState::DrainWindow => self.drain_window().await,
            PowerState::SleepEntry => self.sleep_entry().await,
            PowerState::Idle => self.idle().await,
            PowerState::Halted(halt) => PowerState::Halted(halt),
        }
    }

    fn status_report(&self) -> StatusReport {
        StatusReport {
            uptime_ms: self.services.clock.now_ms(),
            boot_cause: self.boot.cause,
            boot_outcome: self.boot.outcome,
            crash_count: self.boot.crash_count,
            sleep_seconds: self.record.sleep_seconds(),
            record_volatile: self.record.write_failures() > 0,
        }
    }

    async fn publish_status(&mut self) -> bool {
        let payload = self.status_report().to_json();
        let topic = self.topics.topic(TopicKind::Status);
        self.services
            .transport
            .publish(&topic, payload.as_bytes(), true)
            .await
    }

    async fn publish_event(&mut self, event: DeviceEvent) -> bool {
        let payload = event.to_json();
        let topic = self.topics.topic(TopicKind::Events);
        let sent = self
            .services
            .transport
            .publish(&topic, payload.as_bytes(), false)
            .await;
        if !sent {
            warn!("power: event {} not published", event.name());
        }
        sent
    }

    /// Applies one inbound command. Returns a halt when the command ends the run.
    async fn apply_command(&mut self, command: Command) -> Option<Halt> {
        match command {
            Command::SetSleepSeconds(requested) => {
                match check_sleep_seconds(requested, self.config.max_sleep_seconds) {
                    Ok(seconds) => {
                        self.record.set_sleep_seconds(seconds);
                        info!("command: deep sleep set to {}s", seconds);
                        self.publish_event(DeviceEvent::SleepConfigured { seconds })
                            .await;
                    }
                    Err(reason) => {
                        warn!(
                            "command: deep sleep {}s rejected ({}); keeping {}s",
                            requested,
                            reason.as_str(),
                            self.record.sleep_seconds()
                        );
                        self.publish_event(DeviceEvent::CommandRejected { reason })
                            .await;
                    }
                }
                None
            }
            Command::Status => {
                if !self.publish_status().await {
                    warn!("command: status publish failed");
                }
                None
            }
            Command::Restart => {
                info!("command: restart requested");
                let reason = RestartReason::RemoteCommand;
                self.publish_event(DeviceEvent::Restarting { reason }).await;
                self.crash.mark_clean_restart(&mut self.record);
                self.services.transport.disconnect().await;
                self.services.network.disconnect().await;
                Some(Halt::Restart(reason))
            }
        }
    }

    /// Expires the reset window once the boot has run long enough.
    fn tend_reset_window(&mut self) {
        let now_ms = self.services.clock.now_ms();
        self.reset.expire_window(&mut self.record, now_ms);
    }

    /// Drives `work` to completion, expiring the reset window at its deadline
    /// even when `work` is still pending.
    async fn with_window_deadline<F: Future>(
        clock: &mut C,
        reset: &ResetCounter,
        record: &mut PersistentRecord<B>,
        work: F,
    ) -> F::Output {
        let mut work = pin!(work);
        loop {
            let Some(deadline) = reset.window_deadline(record) else {
                return work.await;
            };
            let wait_ms = deadline.saturating_sub(clock.now_ms());
            match select(work.as_mut(), clock.delay_ms(wait_ms)).await {
                Either::First(output) => return output,
                Either::Second(()) => {
                    reset.expire_window(record, clock.now_ms());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
