use embassy_time::{Instant, Timer};
use hub_core::platform::Clock;

/// Milliseconds since boot on the embassy time driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    async fn delay_ms(&mut self, ms: u64) {
        Timer::after_millis(ms).await;
    }
}
