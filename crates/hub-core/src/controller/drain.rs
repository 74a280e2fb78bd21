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
    /// Keeps the session open for inbound commands before sleeping.
    ///
    /// Bounded by the drain window; ends early once the transport drops.
    async fn drain_window(&mut self) -> PowerState {
        let started_ms = self.services.clock.now_ms();
        let deadline = started_ms.saturating_add(self.config.drain_window_ms);
        let mut handled = 0u32;

        loop {
            self.tend_reset_window();

            if !self.services.transport.is_connected() {
                info!("drain: transport disconnected; closing window early");
                break;
            }

            if let Some(command) = self.services.transport.poll_incoming().await {
                handled = handled.saturating_add(1);
                if let Some(halt) = self.apply_command(command).await {
                    return PowerState::Halted(halt);
                }
            }

            let now_ms = self.services.clock.now_ms();
            if now_ms >= deadline {
                break;
            }
            let wait_ms = self.config.drain_poll_ms.max(1).min(deadline - now_ms);
            self.services.clock.delay_ms(wait_ms).await;
        }

        info!(
            "drain: window closed after {}ms commands={}",
            self.services.clock.now_ms().saturating_sub(started_ms),
            handled
        );
        PowerState::SleepEntry
    }
}
