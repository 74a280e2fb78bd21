/// Classifies the current boot and updates both counters.
///
/// Runs before any slow initialization. The crash-loop check runs first and,
/// when it forces recovery, the reset sequence is not evaluated. A forced
/// recovery already opens the portal, so that boot is not also counted as a
/// reset and the reset window keeps its stored values. A timer wake leaves
/// both counters untouched but still arms the crash sentinel.
pub fn check_boot<B: PersistenceBackend>(
    record: &mut PersistentRecord<B>,
    config: &RecoveryConfig,
    cause: BootCause,
    now_ms: u64,
) -> BootReport {
    let crash = CrashLoopCounter::from_config(config);

    if cause == BootCause::TimerWake {
        crash.arm(record);
        info!("boot: timer wake; reset and crash counters untouched");
        return BootReport {
            cause,
            outcome: BootOutcome::TimerWake,
            crash_count: record.crash_count(),
        };
    }

    if crash.on_boot(record) == CrashVerdict::Recover {
        return BootReport {
            cause,
            outcome: BootOutcome::CrashLoop,
            crash_count: config.crash_threshold,
        };
    }
    let crash_count = record.crash_count();

    let outcome = match ResetCounter::from_config(config).on_boot(record, now_ms) {
        ResetVerdict::EnterConfig => BootOutcome::ResetSequence,
        ResetVerdict::NormalBoot => BootOutcome::Normal,
    };
    info!(
        "boot: cause={} outcome={} crash_cnt={}",
        cause.as_str(),
        outcome.as_str(),
        crash_count
    );

    BootReport {
        cause,
        outcome,
        crash_count,
    }
}

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
    fn boot_check(&mut self) -> PowerState {
        let now_ms = self.services.clock.now_ms();
        self.boot = check_boot(&mut self.record, &self.config, self.boot.cause, now_ms);
        self.boot.next_state()
    }

    async fn config_mode(&mut self) -> PowerState {
        info!(
            "config: opening portal reason={} timeout_ms={}",
            self.boot.outcome.as_str(),
            self.config.portal_timeout_ms
        );
        let saved = self
            .services
            .portal
            .run(self.config.portal_timeout_ms)
            .await;

        let reason = if saved {
            info!("config: settings saved; restarting");
            RestartReason::PortalSaved
        } else {
            warn!("config: portal timed out; restarting with existing settings");
            RestartReason::PortalTimedOut
        };
        self.crash.mark_clean_restart(&mut self.record);
        PowerState::Halted(Halt::Restart(reason))
    }
}
