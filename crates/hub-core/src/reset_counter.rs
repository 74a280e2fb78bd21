//! Detection of deliberate reset sequences (double/triple reset).

use log::info;

use crate::{
    config::RecoveryConfig,
    record::{PersistenceBackend, PersistentRecord},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResetVerdict {
    NormalBoot,
    EnterConfig,
}

/// Counts resets that land inside one detection window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResetCounter {
    threshold: u8,
    window_ms: u64,
}

impl ResetCounter {
    pub const fn new(threshold: u8, window_ms: u64) -> Self {
        Self {
            threshold,
            window_ms,
        }
    }

    pub const fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.reset_threshold, config.reset_window_ms)
    }

    /// Records one boot and decides whether the reset sequence is complete.
    ///
    /// The incremented count is persisted before the verdict, so a power cut
    /// right after this call still counts the boot.
    pub fn on_boot<B: PersistenceBackend>(
        &self,
        record: &mut PersistentRecord<B>,
        now_ms: u64,
    ) -> ResetVerdict {
        let start = record.window_start_ms();
        let (count, start) = if self.window_elapsed(start, now_ms) {
            // 0 is reserved for "no window".
            (1, now_ms.max(1))
        } else {
            (record.reset_count().saturating_add(1), start)
        };
        record.set_reset_window(count, start);
        info!(
            "reset: boot counted reset_cnt={} window_start={} threshold={}",
            count, start, self.threshold
        );

        if count >= self.threshold {
            info!("reset: threshold reached; entering configuration mode");
            record.set_reset_window(0, 0);
            return ResetVerdict::EnterConfig;
        }

        ResetVerdict::NormalBoot
    }

    /// Clears an open window once it has been running for the full window length.
    ///
    /// Returns `true` when the window was cleared by this call.
    pub fn expire_window<B: PersistenceBackend>(
        &self,
        record: &mut PersistentRecord<B>,
        now_ms: u64,
    ) -> bool {
        let start = record.window_start_ms();
        if start == 0 && record.reset_count() == 0 {
            return false;
        }
        if !self.window_elapsed(start, now_ms) {
            return false;
        }

        record.set_reset_window(0, 0);
        info!("reset: window expired; counter cleared");
        true
    }

    /// Uptime at which the open window expires, or `None` when no window is open.
    pub fn window_deadline<B: PersistenceBackend>(
        &self,
        record: &PersistentRecord<B>,
    ) -> Option<u64> {
        let start = record.window_start_ms();
        match (start, record.reset_count()) {
            (0, 0) => None,
            (0, _) => Some(0),
            (start, _) => Some(start.saturating_add(self.window_ms)),
        }
    }

    /// Clears any open window regardless of its age.
    pub fn close_window<B: PersistenceBackend>(&self, record: &mut PersistentRecord<B>) {
        if record.window_start_ms() != 0 || record.reset_count() != 0 {
            record.set_reset_window(0, 0);
            info!("reset: window closed");
        }
    }

    fn window_elapsed(&self, start: u64, now_ms: u64) -> bool {
        // A start in the future means the clock restarted; treat it as inside the window.
        start == 0 || now_ms.saturating_sub(start) >= self.window_ms
    }
}
