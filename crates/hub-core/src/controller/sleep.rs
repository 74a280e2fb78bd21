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
    async fn sleep_entry(&mut self) -> PowerState {
        // A command in the drain window may have changed the interval.
        let stored = self.record.reload_sleep_seconds();
        if stored == 0 {
            info!("sleep: disabled by latest setting; staying awake");
            return PowerState::NormalOperation;
        }
        let seconds = stored.min(self.config.max_sleep_seconds);

        // Timer wakes never count as resets, so an open window cannot continue past sleep.
        self.reset.close_window(&mut self.record);

        self.services.transport.disconnect().await;
        self.services.network.disconnect().await;
        self.services
            .clock
            .delay_ms(self.config.sleep_settle_ms)
            .await;

        info!("sleep: entering deep sleep seconds={}", seconds);
        match self.services.sleep.enter_deep_sleep(seconds) {
            Ok(()) => PowerState::Halted(Halt::Slept { seconds }),
            Err(err) => {
                error!("sleep: deep sleep entry failed: {:?}; staying awake", err);
                PowerState::Idle
            }
        }
    }
}
