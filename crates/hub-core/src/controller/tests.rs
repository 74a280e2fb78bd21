use std::{cell::Cell, collections::VecDeque, rc::Rc, string::String, vec::Vec};

use embassy_futures::{block_on, yield_now};

use super::*;
use crate::{
    platform::SleepError,
    record::{CRASH_SENTINEL, MemoryBackend, RecordKey, RecordValues, UnavailableBackend},
};

/// Uptime shared between the clock and fakes that take time.
#[derive(Clone)]
struct FakeClock {
    now_ms: Rc<Cell<u64>>,
}

impl FakeClock {
    fn at(now_ms: u64) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(now_ms)),
        }
    }

    fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(ms));
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    async fn delay_ms(&mut self, ms: u64) {
        self.advance(ms);
    }
}

#[derive(Default)]
struct FakeNetwork {
    connected: bool,
    fail_connect: bool,
    disconnects: u32,
    /// Association time charged to the clock, in 100 ms slices.
    stall: Option<(FakeClock, u64)>,
}

impl Network for FakeNetwork {
    async fn connect(&mut self) -> bool {
        if let Some((clock, stall_ms)) = &self.stall {
            let mut waited_ms = 0;
            while waited_ms < *stall_ms {
                clock.advance(100);
                waited_ms += 100;
                yield_now().await;
            }
        }
        self.connected = !self.fail_connect;
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

struct Published {
    topic: String,
    payload: String,
    retain: bool,
}

#[derive(Default)]
struct ScriptedTransport {
    connected: bool,
    fail_publish: bool,
    inbound: VecDeque<Command>,
    published: Vec<Published>,
    polls: u32,
    drop_after_polls: Option<u32>,
    disconnects: u32,
}

impl ScriptedTransport {
    fn payloads_on(&self, suffix: &str) -> Vec<&str> {
        self.published
            .iter()
            .filter(|p| p.topic.ends_with(suffix))
            .map(|p| p.payload.as_str())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> bool {
        self.connected = true;
        true
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        if !self.connected || self.fail_publish {
            return false;
        }
        self.published.push(Published {
            topic: String::from(topic),
            payload: String::from_utf8(payload.to_vec()).unwrap(),
            retain,
        });
        true
    }

    async fn poll_incoming(&mut self) -> Option<Command> {
        self.polls += 1;
        if self.drop_after_polls == Some(self.polls) {
            self.connected = false;
        }
        self.inbound.pop_front()
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

#[derive(Default)]
struct FakePortal {
    saves: bool,
    last_timeout_ms: Option<u64>,
}

impl ConfigPortal for FakePortal {
    async fn run(&mut self, timeout_ms: u64) -> bool {
        self.last_timeout_ms = Some(timeout_ms);
        self.saves
    }
}

#[derive(Default)]
struct FakeSleep {
    armed: Vec<u32>,
    fail: bool,
}

impl SleepControl for FakeSleep {
    fn enter_deep_sleep(&mut self, seconds: u32) -> Result<(), SleepError> {
        if self.fail {
            return Err(SleepError::Unsupported);
        }
        self.armed.push(seconds);
        Ok(())
    }
}

#[derive(Default)]
struct CountingWorkload {
    cycles: u32,
}

impl Workload for CountingWorkload {
    async fn publish_readings<T: Transport>(
        &mut self,
        transport: &mut T,
        topics: &Topics,
        _uptime_ms: u64,
    ) -> bool {
        self.cycles += 1;
        let payload = std::format!("{{\"cycle\":{}}}", self.cycles);
        transport
            .publish(&topics.topic(TopicKind::Readings), payload.as_bytes(), false)
            .await
    }
}

type TestServices =
    Services<FakeClock, FakeNetwork, ScriptedTransport, FakePortal, FakeSleep, CountingWorkload>;

type TestController<B> = PowerController<
    B,
    FakeClock,
    FakeNetwork,
    ScriptedTransport,
    FakePortal,
    FakeSleep,
    CountingWorkload,
>;

fn services_at(now_ms: u64) -> TestServices {
    Services {
        clock: FakeClock::at(now_ms),
        network: FakeNetwork::default(),
        transport: ScriptedTransport::default(),
        portal: FakePortal::default(),
        sleep: FakeSleep::default(),
        workload: CountingWorkload::default(),
    }
}

fn controller<B: PersistenceBackend>(
    backend: B,
    services: TestServices,
    cause: BootCause,
) -> TestController<B> {
    PowerController::new(
        RecoveryConfig::DEFAULT,
        PersistentRecord::open(backend),
        services,
        Topics::for_device("test hub"),
        cause,
    )
}

fn backend_with_sleep(seconds: u32) -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    backend
        .set(RecordKey::SleepSeconds, seconds as u64)
        .unwrap();
    backend
}

/// A connected controller parked in the given power state context.
fn connected_controller(backend: MemoryBackend) -> TestController<MemoryBackend> {
    let mut services = services_at(1_000);
    services.network.connected = true;
    services.transport.connected = true;
    controller(backend, services, BootCause::PowerOn)
}

#[test]
fn single_power_on_settles_to_a_clean_record() {
    let mut c = controller(MemoryBackend::new(), services_at(0), BootCause::PowerOn);

    let mut state = PowerState::BootCheck;
    while c.services().clock.now_ms() < 12_000 {
        state = block_on(c.step(state));
    }

    assert_eq!(c.boot_report().outcome, BootOutcome::Normal);
    assert_eq!(c.record().values(), RecordValues::default());
    let backend = c.record().backend();
    assert_eq!(backend.peek(RecordKey::ResetCount), Some(0));
    assert_eq!(backend.peek(RecordKey::WindowStart), Some(0));
    assert_eq!(backend.peek(RecordKey::CrashFlag), Some(0));
    assert_eq!(backend.peek(RecordKey::CrashCount).unwrap_or(0), 0);
}

#[test]
fn three_quick_resets_open_the_portal_with_cleared_counters() {
    let config = RecoveryConfig::DEFAULT;
    let mut record = PersistentRecord::open(MemoryBackend::new());

    let first = check_boot(&mut record, &config, BootCause::PowerOn, 0);
    let second = check_boot(&mut record, &config, BootCause::PowerOn, 2_000);
    let third = check_boot(&mut record, &config, BootCause::PowerOn, 4_000);

    assert_eq!(first.outcome, BootOutcome::Normal);
    assert_eq!(second.outcome, BootOutcome::Normal);
    assert_eq!(third.outcome, BootOutcome::ResetSequence);
    assert_eq!(third.next_state(), PowerState::ConfigMode);
    assert_eq!(record.reset_count(), 0);
    assert_eq!(record.window_start_ms(), 0);
}

#[test]
fn portal_completion_restarts_without_counting_a_crash() {
    let mut services = services_at(0);
    services.portal.saves = true;
    let mut c = controller(MemoryBackend::new(), services, BootCause::PowerOn);
    block_on(c.step(PowerState::BootCheck));

    let next = block_on(c.step(PowerState::ConfigMode));

    assert_eq!(
        next,
        PowerState::Halted(Halt::Restart(RestartReason::PortalSaved))
    );
    assert_eq!(c.services().portal.last_timeout_ms, Some(300_000));
    assert_eq!(c.record().crash_flag(), 0);
}

#[test]
fn portal_timeout_also_restarts() {
    let mut c = controller(MemoryBackend::new(), services_at(0), BootCause::PowerOn);
    let halt = block_on(c.run(PowerState::ConfigMode));
    assert_eq!(halt, Halt::Restart(RestartReason::PortalTimedOut));
}

#[test]
fn crash_loop_forces_portal_outside_any_reset_window() {
    let config = RecoveryConfig::DEFAULT;
    let mut record = PersistentRecord::open(MemoryBackend::new());

    let mut last = None;
    for boot in 0..6u64 {
        // Boots are far apart, so the reset counter never accumulates.
        last = Some(check_boot(&mut record, &config, BootCause::PowerOn, boot * 60_000));
        assert!(record.reset_count() <= 1);
    }

    let last = last.unwrap();
    assert_eq!(last.outcome, BootOutcome::CrashLoop);
    assert_eq!(last.crash_count, 5);
    assert_eq!(last.next_state(), PowerState::ConfigMode);
    assert_eq!(record.crash_count(), 0);
}

#[test]
fn timer_wake_leaves_counters_untouched() {
    let config = RecoveryConfig::DEFAULT;
    let mut backend = MemoryBackend::new();
    backend.set(RecordKey::ResetCount, 2).unwrap();
    backend.set(RecordKey::WindowStart, 500).unwrap();
    backend.set(RecordKey::CrashFlag, CRASH_SENTINEL as u64).unwrap();
    backend.set(RecordKey::CrashCount, 3).unwrap();
    let mut record = PersistentRecord::open(backend);

    let report = check_boot(&mut record, &config, BootCause::TimerWake, 700);

    assert_eq!(report.outcome, BootOutcome::TimerWake);
    assert_eq!(report.next_state(), PowerState::NormalOperation);
    assert_eq!(record.reset_count(), 2);
    assert_eq!(record.window_start_ms(), 500);
    assert_eq!(record.crash_count(), 3);
    assert_eq!(record.crash_flag(), CRASH_SENTINEL);
}

#[test]
fn sleep_round_trip_wakes_after_the_armed_interval() {
    let mut c = controller(backend_with_sleep(60), services_at(0), BootCause::PowerOn);

    let mut state = block_on(c.step(PowerState::BootCheck));
    state = block_on(c.step(state));
    assert_eq!(state, PowerState::DrainWindow);
    state = block_on(c.step(state));
    assert_eq!(state, PowerState::SleepEntry);
    // The drain window is shorter than the reset window, so it is still open here.
    assert_eq!(c.record().reset_count(), 1);
    assert_eq!(c.record().window_start_ms(), 1);

    let halt = block_on(c.run(state));

    assert_eq!(halt, Halt::Slept { seconds: 60 });
    let slept_at_ms = c.services().clock.now_ms();
    let (record, services) = c.into_parts();
    assert_eq!(services.sleep.armed, [60]);
    assert!(!services.network.connected);
    assert_eq!(services.transport.disconnects, 1);
    assert_eq!(services.network.disconnects, 1);

    let backend = record.into_backend();
    assert_eq!(backend.peek(RecordKey::ResetCount), Some(0));
    assert_eq!(backend.peek(RecordKey::WindowStart), Some(0));
    assert_eq!(backend.peek(RecordKey::CrashFlag), Some(0));
    let at_sleep = RecordKey::ALL.map(|key| backend.peek(key));

    let mut woken = controller(
        backend,
        services_at(slept_at_ms + 60_000),
        BootCause::TimerWake,
    );
    let next = block_on(woken.step(PowerState::BootCheck));

    assert_eq!(next, PowerState::NormalOperation);
    assert_eq!(woken.boot_report().outcome, BootOutcome::TimerWake);
    let after_wake = RecordKey::ALL.map(|key| woken.record().backend().peek(key));
    for key in RecordKey::ALL {
        if key == RecordKey::CrashFlag {
            assert_eq!(after_wake[key.index()], Some(CRASH_SENTINEL as u64));
        } else {
            assert_eq!(after_wake[key.index()], at_sleep[key.index()], "{}", key.name());
        }
    }

    let halt = block_on(woken.run(PowerState::NormalOperation));
    assert_eq!(halt, Halt::Slept { seconds: 60 });
    assert_eq!(woken.record().crash_flag(), 0);
}

#[test]
fn crash_recovery_boot_leaves_the_reset_window_alone() {
    let config = RecoveryConfig::DEFAULT;
    let mut backend = MemoryBackend::new();
    backend.set(RecordKey::ResetCount, 2).unwrap();
    backend.set(RecordKey::WindowStart, 400).unwrap();
    backend.set(RecordKey::CrashFlag, CRASH_SENTINEL as u64).unwrap();
    backend.set(RecordKey::CrashCount, 4).unwrap();
    let mut record = PersistentRecord::open(backend);

    let report = check_boot(&mut record, &config, BootCause::PowerOn, 900);

    assert_eq!(report.outcome, BootOutcome::CrashLoop);
    assert_eq!(record.reset_count(), 2);
    assert_eq!(record.window_start_ms(), 400);
    assert_eq!(record.backend().peek(RecordKey::ResetCount), Some(2));
    assert_eq!(record.backend().peek(RecordKey::WindowStart), Some(400));
}

#[test]
fn sleep_command_during_drain_window_arms_the_timer() {
    let mut c = connected_controller(MemoryBackend::new());
    c.services_mut()
        .transport
        .inbound
        .push_back(Command::SetSleepSeconds(60));

    let next = block_on(c.step(PowerState::DrainWindow));
    assert_eq!(next, PowerState::SleepEntry);
    assert_eq!(c.record().backend().peek(RecordKey::SleepSeconds), Some(60));
    assert_eq!(
        c.services().transport.payloads_on("/events"),
        ["{\"event\":\"deep_sleep_config\",\"deep_sleep_seconds\":60,\"deep_sleep_enabled\":true}"]
    );

    let next = block_on(c.step(next));
    assert_eq!(next, PowerState::Halted(Halt::Slept { seconds: 60 }));
    assert_eq!(c.services().sleep.armed, [60]);
    assert!(!c.services().transport.connected);
    assert!(!c.services().network.connected);
}

#[test]
fn zero_during_drain_window_keeps_the_device_awake() {
    let mut c = connected_controller(backend_with_sleep(60));
    c.services_mut()
        .transport
        .inbound
        .push_back(Command::SetSleepSeconds(0));

    let next = block_on(c.step(PowerState::DrainWindow));
    assert_eq!(next, PowerState::SleepEntry);

    let next = block_on(c.step(next));
    assert_eq!(next, PowerState::NormalOperation);
    assert!(c.services().sleep.armed.is_empty());
    assert!(c.services().network.connected);
}

#[test]
fn drain_window_is_bounded() {
    let mut c = connected_controller(backend_with_sleep(60));
    let started = c.services().clock.now_ms();

    let next = block_on(c.step(PowerState::DrainWindow));

    assert_eq!(next, PowerState::SleepEntry);
    assert_eq!(c.services().clock.now_ms() - started, 5_000);
}

#[test]
fn drain_window_ends_early_on_disconnect() {
    let mut c = connected_controller(backend_with_sleep(60));
    c.services_mut().transport.drop_after_polls = Some(3);
    let started = c.services().clock.now_ms();

    let next = block_on(c.step(PowerState::DrainWindow));

    assert_eq!(next, PowerState::SleepEntry);
    assert!(c.services().clock.now_ms() - started < 100);
}

#[test]
fn out_of_range_sleep_is_rejected() {
    let mut c = connected_controller(backend_with_sleep(60));
    c.services_mut()
        .transport
        .inbound
        .push_back(Command::SetSleepSeconds(3_601));

    block_on(c.step(PowerState::DrainWindow));

    assert_eq!(c.record().sleep_seconds(), 60);
    assert_eq!(
        c.services().transport.payloads_on("/events"),
        ["{\"event\":\"command_error\",\"reason\":\"out_of_range\"}"]
    );
}

#[test]
fn status_command_publishes_retained_status() {
    let mut c = connected_controller(backend_with_sleep(30));
    c.services_mut()
        .transport
        .inbound
        .push_back(Command::Status);

    block_on(c.step(PowerState::DrainWindow));

    let status: Vec<&Published> = c
        .services()
        .transport
        .published
        .iter()
        .filter(|p| p.topic == "esp-sensor-hub/test-hub/status")
        .collect();
    assert_eq!(status.len(), 1);
    assert!(status[0].retain);
    assert!(status[0].payload.contains("\"deep_sleep_seconds\":30"));
}

#[test]
fn restart_command_halts_and_clears_the_sentinel() {
    let mut c = connected_controller(MemoryBackend::new());
    block_on(c.step(PowerState::BootCheck));
    assert_eq!(c.record().crash_flag(), CRASH_SENTINEL);
    c.services_mut().transport.inbound.push_back(Command::Restart);

    let next = block_on(c.step(PowerState::Idle));

    assert_eq!(
        next,
        PowerState::Halted(Halt::Restart(RestartReason::RemoteCommand))
    );
    assert_eq!(c.record().crash_flag(), 0);
    assert_eq!(
        c.services().transport.payloads_on("/events"),
        ["{\"event\":\"device_restart\",\"reason\":\"remote_command\"}"]
    );
    assert!(!c.services().transport.connected);
}

#[test]
fn confirmed_boot_is_idempotent_across_cycles() {
    let mut c = controller(MemoryBackend::new(), services_at(0), BootCause::PowerOn);
    let mut state = block_on(c.step(PowerState::BootCheck));
    state = block_on(c.step(state));
    assert_eq!(state, PowerState::Idle);
    state = block_on(c.step(state));
    assert_eq!(state, PowerState::NormalOperation);

    let values = c.record().values();
    let writes = c.record().backend().writes();
    block_on(c.step(PowerState::NormalOperation));
    block_on(c.step(PowerState::NormalOperation));

    assert_eq!(c.record().values(), values);
    assert_eq!(c.record().backend().writes(), writes);
    assert_eq!(
        c.services().transport.payloads_on("/events"),
        ["{\"event\":\"device_boot\",\"boot_cause\":\"power_on\",\"boot_reason\":\"normal\"}"]
    );
}

#[test]
fn failed_publish_leaves_boot_unconfirmed_and_eventually_restarts() {
    let mut services = services_at(0);
    services.transport.fail_publish = true;
    let mut c = controller(backend_with_sleep(60), services, BootCause::PowerOn);

    let halt = block_on(c.run(PowerState::BootCheck));

    assert_eq!(halt, Halt::Restart(RestartReason::CycleFailures));
    assert_eq!(c.record().crash_flag(), CRASH_SENTINEL);
    assert!(c.services().sleep.armed.is_empty());
    assert_eq!(c.services().workload.cycles, 5);
}

#[test]
fn network_failure_stays_awake_to_retry() {
    let mut services = services_at(0);
    services.network.fail_connect = true;
    let mut c = controller(backend_with_sleep(60), services, BootCause::PowerOn);

    block_on(c.step(PowerState::BootCheck));
    let next = block_on(c.step(PowerState::NormalOperation));

    assert_eq!(next, PowerState::Idle);
    assert_eq!(c.services().workload.cycles, 0);
}

#[test]
fn sleep_entry_failure_stays_awake() {
    let mut c = connected_controller(backend_with_sleep(60));
    c.services_mut().sleep.fail = true;

    let next = block_on(c.step(PowerState::SleepEntry));

    assert_eq!(next, PowerState::Idle);
    let next = block_on(c.step(next));
    assert_eq!(next, PowerState::NormalOperation);
}

#[test]
fn unavailable_persistence_still_runs_a_cycle() {
    let mut c = controller(UnavailableBackend, services_at(0), BootCause::PowerOn);

    let mut state = block_on(c.step(PowerState::BootCheck));
    assert_eq!(state, PowerState::NormalOperation);
    state = block_on(c.step(state));

    assert_eq!(state, PowerState::Idle);
    assert_eq!(c.record().crash_flag(), 0);
    let status = c.services().transport.payloads_on("/status");
    assert_eq!(status.len(), 1);
    assert!(status[0].contains("\"record_volatile\":true"));
}

#[test]
fn slow_network_does_not_hold_the_reset_window_open() {
    let mut backend = MemoryBackend::new();
    let mut outcomes = Vec::new();

    for _ in 0..3 {
        // Each boot is checked 300 ms after reset; association then takes 20 s.
        let mut services = services_at(300);
        services.network.stall = Some((services.clock.clone(), 20_000));
        let mut c = controller(backend, services, BootCause::PowerOn);

        block_on(c.step(PowerState::BootCheck));
        outcomes.push((c.boot_report().outcome, c.record().reset_count()));
        block_on(c.step(PowerState::NormalOperation));
        assert_eq!(c.record().reset_count(), 0);

        backend = c.into_parts().0.into_backend();
    }

    assert_eq!(outcomes, [(BootOutcome::Normal, 1); 3]);
    assert_eq!(backend.peek(RecordKey::ResetCount), Some(0));
    assert_eq!(backend.peek(RecordKey::WindowStart), Some(0));
}

#[test]
fn drain_window_expires_the_reset_window() {
    let mut backend = backend_with_sleep(60);
    backend.set(RecordKey::ResetCount, 2).unwrap();
    backend.set(RecordKey::WindowStart, 1_000).unwrap();
    let mut services = services_at(8_000);
    services.network.connected = true;
    services.transport.connected = true;
    let mut c = controller(backend, services, BootCause::PowerOn);

    let next = block_on(c.step(PowerState::DrainWindow));

    assert_eq!(next, PowerState::SleepEntry);
    assert_eq!(c.services().clock.now_ms(), 13_000);
    assert_eq!(c.record().reset_count(), 0);
    assert_eq!(c.record().backend().peek(RecordKey::WindowStart), Some(0));
}
