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
    async fn normal_operation(&mut self) -> PowerState {
        self.tend_reset_window();

        if !self.services.network.is_connected() {
            let connected = Self::with_window_deadline(
                &mut self.services.clock,
                &self.reset,
                &mut self.record,
                self.services.network.connect(),
            )
            .await;
            if !connected {
                return self.cycle_failed("network");
            }
        }
        if !self.services.transport.is_connected() {
            let connected = Self::with_window_deadline(
                &mut self.services.clock,
                &self.reset,
                &mut self.record,
                self.services.transport.connect(),
            )
            .await;
            if !connected {
                return self.cycle_failed("transport");
            }
        }

        let uptime_ms = self.services.clock.now_ms();
        let published = Self::with_window_deadline(
            &mut self.services.clock,
            &self.reset,
            &mut self.record,
            self.services.workload.publish_readings(
                &mut self.services.transport,
                &self.topics,
                uptime_ms,
            ),
        )
        .await;
        self.tend_reset_window();
        if !published {
            return self.cycle_failed("publish");
        }
        self.cycle_failures = 0;

        self.crash.confirm_boot(&mut self.record);
        if !self.boot_confirmed {
            self.boot_confirmed = true;
            info!("boot: confirmed after first publish");
        }

        if !self.boot_event_sent {
            self.boot_event_sent = self
                .publish_event(DeviceEvent::Boot {
                    cause: self.boot.cause,
                    outcome: self.boot.outcome,
                })
                .await;
        }
        if !self.publish_status().await {
            warn!("cycle: status publish failed");
        }

        if self.record.sleep_seconds() > 0 {
            PowerState::DrainWindow
        } else {
            PowerState::Idle
        }
    }

    fn cycle_failed(&mut self, stage: &'static str) -> PowerState {
        self.cycle_failures = self.cycle_failures.saturating_add(1);
        warn!(
            "cycle: {} failed; staying awake (failures={}/{})",
            stage, self.cycle_failures, self.config.max_cycle_failures
        );
        if self.cycle_failures >= self.config.max_cycle_failures {
            error!("cycle: giving up after repeated failures; restarting");
            return PowerState::Halted(Halt::Restart(RestartReason::CycleFailures));
        }
        PowerState::Idle
    }

    /// Stays awake for one publish interval while serving commands.
    async fn idle(&mut self) -> PowerState {
        let deadline = self
            .services
            .clock
            .now_ms()
            .saturating_add(self.config.publish_interval_ms);

        loop {
            self.tend_reset_window();

            if self.services.transport.is_connected()
                && let Some(command) = self.services.transport.poll_incoming().await
                && let Some(halt) = self.apply_command(command).await
            {
                return PowerState::Halted(halt);
            }

            let now_ms = self.services.clock.now_ms();
            if now_ms >= deadline {
                return PowerState::NormalOperation;
            }
            let wait_ms = self.config.drain_poll_ms.max(1).min(deadline - now_ms);
            self.services.clock.delay_ms(wait_ms).await;
        }
    }
}
