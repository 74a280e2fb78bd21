//! Crash-loop detection through an "unconfirmed boot" sentinel.

use log::{info, warn};

use crate::{
    config::RecoveryConfig,
    record::{CRASH_SENTINEL, PersistenceBackend, PersistentRecord},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CrashVerdict {
    Healthy,
    /// Too many boots in a row never reached the main loop.
    Recover,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CrashLoopCounter {
    threshold: u8,
}

impl CrashLoopCounter {
    pub const fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub const fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.crash_threshold)
    }

    /// Counts the previous boot if it never confirmed, then arms the sentinel.
    pub fn on_boot<B: PersistenceBackend>(&self, record: &mut PersistentRecord<B>) -> CrashVerdict {
        let count = if record.crash_flag() == CRASH_SENTINEL {
            record.crash_count().saturating_add(1)
        } else {
            0
        };
        record.set_crash_count(count);
        record.set_crash_flag(CRASH_SENTINEL);

        if count >= self.threshold {
            warn!(
                "crash: {} unconfirmed boots in a row; entering configuration mode",
                count
            );
            record.set_crash_count(0);
            return CrashVerdict::Recover;
        }

        if count > 0 {
            info!("crash: previous boot unconfirmed crash_cnt={}", count);
        }
        CrashVerdict::Healthy
    }

    /// Arms the sentinel without counting the previous boot.
    pub fn arm<B: PersistenceBackend>(&self, record: &mut PersistentRecord<B>) {
        if record.crash_flag() != CRASH_SENTINEL {
            record.set_crash_flag(CRASH_SENTINEL);
        }
    }

    /// Marks the current boot as having reached the main loop.
    pub fn confirm_boot<B: PersistenceBackend>(&self, record: &mut PersistentRecord<B>) {
        if record.crash_flag() != 0 {
            record.set_crash_flag(0);
        }
        if record.crash_count() != 0 {
            record.set_crash_count(0);
        }
    }

    /// Clears the sentinel ahead of a restart the firmware asked for itself.
    pub fn mark_clean_restart<B: PersistenceBackend>(&self, record: &mut PersistentRecord<B>) {
        self.confirm_boot(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemoryBackend, RecordKey};

    const COUNTER: CrashLoopCounter = CrashLoopCounter::new(5);

    #[test]
    fn clean_boot_arms_sentinel_without_counting() {
        let mut record = PersistentRecord::open(MemoryBackend::new());
        assert_eq!(COUNTER.on_boot(&mut record), CrashVerdict::Healthy);
        assert_eq!(record.crash_flag(), CRASH_SENTINEL);
        assert_eq!(record.crash_count(), 0);
    }

    #[test]
    fn confirm_boot_is_idempotent() {
        let mut record = PersistentRecord::open(MemoryBackend::new());
        COUNTER.on_boot(&mut record);
        COUNTER.confirm_boot(&mut record);
        let once = record.values();
        let writes = record.backend().writes();
        COUNTER.confirm_boot(&mut record);

        assert_eq!(record.values(), once);
        assert_eq!(record.backend().writes(), writes);
        assert_eq!(record.crash_flag(), 0);
        assert_eq!(record.crash_count(), 0);
    }

    #[test]
    fn fifth_unconfirmed_boot_recovers() {
        let mut record = PersistentRecord::open(MemoryBackend::new());
        assert_eq!(COUNTER.on_boot(&mut record), CrashVerdict::Healthy);
        for expected in 1..5 {
            assert_eq!(COUNTER.on_boot(&mut record), CrashVerdict::Healthy);
            assert_eq!(record.crash_count(), expected);
        }
        assert_eq!(COUNTER.on_boot(&mut record), CrashVerdict::Recover);
        assert_eq!(record.crash_count(), 0);
        assert_eq!(record.crash_flag(), CRASH_SENTINEL);
    }

    #[test]
    fn confirmed_boot_breaks_the_streak() {
        let mut record = PersistentRecord::open(MemoryBackend::new());
        COUNTER.on_boot(&mut record);
        COUNTER.on_boot(&mut record);
        COUNTER.on_boot(&mut record);
        assert_eq!(record.crash_count(), 2);

        COUNTER.confirm_boot(&mut record);
        assert_eq!(COUNTER.on_boot(&mut record), CrashVerdict::Healthy);
        assert_eq!(record.crash_count(), 0);
    }

    #[test]
    fn arm_does_not_count() {
        let mut record = PersistentRecord::open(MemoryBackend::new());
        COUNTER.on_boot(&mut record);
        COUNTER.arm(&mut record);
        assert_eq!(record.crash_count(), 0);
        assert_eq!(record.backend().peek(RecordKey::CrashFlag), Some(CRASH_SENTINEL as u64));
    }

    #[test]
    fn foreign_flag_value_resets_count() {
        let mut backend = MemoryBackend::new();
        backend.set(RecordKey::CrashFlag, 0x1234).unwrap();
        backend.set(RecordKey::CrashCount, 4).unwrap();
        let mut record = PersistentRecord::open(backend);

        assert_eq!(COUNTER.on_boot(&mut record), CrashVerdict::Healthy);
        assert_eq!(record.crash_count(), 0);
    }
}
