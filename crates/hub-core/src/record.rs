//! Persistent recovery record and the backend abstraction it is stored through.
//!
//! The record is small and fixed: two reset-detection fields, two crash-loop
//! fields and the configured sleep interval. Every mutation goes straight to
//! the backend so a power cut between two writes never loses the first.

use log::{info, warn};

/// Value written to `crash_flag` while a boot has not been confirmed.
pub const CRASH_SENTINEL: u32 = 0xDEAD_BEEF;

/// Stored reset counts above this are treated as corruption.
pub const RESET_COUNT_SANITY_LIMIT: u8 = 10;

/// Logical keys of the persisted record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKey {
    ResetCount,
    WindowStart,
    CrashFlag,
    CrashCount,
    SleepSeconds,
}

impl RecordKey {
    pub const ALL: [Self; 5] = [
        Self::ResetCount,
        Self::WindowStart,
        Self::CrashFlag,
        Self::CrashCount,
        Self::SleepSeconds,
    ];

    /// Stable storage name of the key.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ResetCount => "reset_cnt",
            Self::WindowStart => "window_start",
            Self::CrashFlag => "crash_flag",
            Self::CrashCount => "crash_cnt",
            Self::SleepSeconds => "sleep_seconds",
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::ResetCount => 0,
            Self::WindowStart => 1,
            Self::CrashFlag => 2,
            Self::CrashCount => 3,
            Self::SleepSeconds => 4,
        }
    }

    /// Largest value the key can hold.
    pub const fn max_value(self) -> u64 {
        match self {
            Self::ResetCount | Self::CrashCount => u8::MAX as u64,
            Self::WindowStart => u64::MAX,
            Self::CrashFlag | Self::SleepSeconds => u32::MAX as u64,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendError {
    /// The store could not be opened for this boot.
    Unavailable,
    /// The write did not reach durable storage.
    WriteFailed,
    /// Value does not fit the key.
    OutOfRange,
}

/// Key/value storage that survives resets.
///
/// A successful `set` is durable when it returns. `get` yields `None` both for
/// a key that was never written and for a store that cannot be read.
pub trait PersistenceBackend {
    fn get(&mut self, key: RecordKey) -> Option<u64>;
    fn set(&mut self, key: RecordKey, value: u64) -> Result<(), BackendError>;
}

impl<B: PersistenceBackend + ?Sized> PersistenceBackend for &mut B {
    fn get(&mut self, key: RecordKey) -> Option<u64> {
        (**self).get(key)
    }

    fn set(&mut self, key: RecordKey, value: u64) -> Result<(), BackendError> {
        (**self).set(key, value)
    }
}

/// Snapshot of every persisted field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecordValues {
    pub reset_count: u8,
    pub window_start_ms: u64,
    pub crash_flag: u32,
    pub crash_count: u8,
    pub sleep_seconds: u32,
}

impl RecordValues {
    pub const fn field(&self, key: RecordKey) -> u64 {
        match key {
            RecordKey::ResetCount => self.reset_count as u64,
            RecordKey::WindowStart => self.window_start_ms,
            RecordKey::CrashFlag => self.crash_flag as u64,
            RecordKey::CrashCount => self.crash_count as u64,
            RecordKey::SleepSeconds => self.sleep_seconds as u64,
        }
    }

    /// Stores `value` under `key`, truncated to the field width.
    pub fn set_field(&mut self, key: RecordKey, value: u64) {
        match key {
            RecordKey::ResetCount => self.reset_count = value as u8,
            RecordKey::WindowStart => self.window_start_ms = value,
            RecordKey::CrashFlag => self.crash_flag = value as u32,
            RecordKey::CrashCount => self.crash_count = value as u8,
            RecordKey::SleepSeconds => self.sleep_seconds = value as u32,
        }
    }
}

/// The recovery record with a write-through in-memory copy.
///
/// A failed backend write is logged and the in-memory value is kept, so the
/// current boot keeps working with volatile state.
#[derive(Debug)]
pub struct PersistentRecord<B> {
    backend: B,
    values: RecordValues,
    write_failures: u32,
}

impl<B: PersistenceBackend> PersistentRecord<B> {
    /// Loads every key, falling back to zero for missing or out-of-range values.
    pub fn open(mut backend: B) -> Self {
        let mut values = RecordValues {
            reset_count: load_narrow(&mut backend, RecordKey::ResetCount) as u8,
            window_start_ms: load_narrow(&mut backend, RecordKey::WindowStart),
            crash_flag: load_narrow(&mut backend, RecordKey::CrashFlag) as u32,
            crash_count: load_narrow(&mut backend, RecordKey::CrashCount) as u8,
            sleep_seconds: load_narrow(&mut backend, RecordKey::SleepSeconds) as u32,
        };

        let mut corrupt_reset = false;
        if values.reset_count > RESET_COUNT_SANITY_LIMIT {
            warn!(
                "record: reset_cnt={} looks corrupt; clearing window",
                values.reset_count
            );
            values.reset_count = 0;
            values.window_start_ms = 0;
            corrupt_reset = true;
        }

        let mut record = Self {
            backend,
            values,
            write_failures: 0,
        };
        if corrupt_reset {
            record.write(RecordKey::ResetCount, 0);
            record.write(RecordKey::WindowStart, 0);
        }

        info!(
            "record: loaded reset_cnt={} window_start={} crash_flag={:#010x} crash_cnt={} sleep_seconds={}",
            record.values.reset_count,
            record.values.window_start_ms,
            record.values.crash_flag,
            record.values.crash_count,
            record.values.sleep_seconds
        );
        record
    }

    pub fn values(&self) -> RecordValues {
        self.values
    }

    pub fn reset_count(&self) -> u8 {
        self.values.reset_count
    }

    pub fn window_start_ms(&self) -> u64 {
        self.values.window_start_ms
    }

    pub fn crash_flag(&self) -> u32 {
        self.values.crash_flag
    }

    pub fn crash_count(&self) -> u8 {
        self.values.crash_count
    }

    pub fn sleep_seconds(&self) -> u32 {
        self.values.sleep_seconds
    }

    /// Number of writes this boot that only reached memory.
    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    pub fn set_reset_window(&mut self, reset_count: u8, window_start_ms: u64) {
        self.values.reset_count = reset_count;
        self.values.window_start_ms = window_start_ms;
        self.write(RecordKey::ResetCount, reset_count as u64);
        self.write(RecordKey::WindowStart, window_start_ms);
    }

    pub fn set_crash_flag(&mut self, flag: u32) {
        self.values.crash_flag = flag;
        self.write(RecordKey::CrashFlag, flag as u64);
    }

    pub fn set_crash_count(&mut self, count: u8) {
        self.values.crash_count = count;
        self.write(RecordKey::CrashCount, count as u64);
    }

    pub fn set_sleep_seconds(&mut self, seconds: u32) {
        self.values.sleep_seconds = seconds;
        self.write(RecordKey::SleepSeconds, seconds as u64);
    }

    /// Re-reads the sleep interval from the backend.
    ///
    /// Keeps the in-memory value when the backend has nothing readable.
    pub fn reload_sleep_seconds(&mut self) -> u32 {
        if let Some(raw) = self.backend.get(RecordKey::SleepSeconds)
            && raw <= RecordKey::SleepSeconds.max_value()
        {
            self.values.sleep_seconds = raw as u32;
        }
        self.values.sleep_seconds
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn write(&mut self, key: RecordKey, value: u64) {
        if let Err(err) = self.backend.set(key, value) {
            self.write_failures = self.write_failures.saturating_add(1);
            warn!(
                "record: write failed key={} value={} err={:?}; value kept in memory",
                key.name(),
                value,
                err
            );
        }
    }
}

fn load_narrow<B: PersistenceBackend>(backend: &mut B, key: RecordKey) -> u64 {
    match backend.get(key) {
        Some(value) if value <= key.max_value() => value,
        Some(value) => {
            warn!(
                "record: ignoring out-of-range key={} value={}",
                key.name(),
                value
            );
            0
        }
        None => 0,
    }
}

/// RAM-only backend. Values last until the device loses power.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemoryBackend {
    slots: [Option<u64>; 5],
    fail_writes: bool,
    writes: u32,
}

impl MemoryBackend {
    pub const fn new() -> Self {
        Self {
            slots: [None; 5],
            fail_writes: false,
            writes: 0,
        }
    }

    /// Makes every following `set` fail until switched back.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Successful writes since creation.
    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn peek(&self, key: RecordKey) -> Option<u64> {
        self.slots[key.index()]
    }
}

impl PersistenceBackend for MemoryBackend {
    fn get(&mut self, key: RecordKey) -> Option<u64> {
        self.slots[key.index()]
    }

    fn set(&mut self, key: RecordKey, value: u64) -> Result<(), BackendError> {
        if self.fail_writes {
            return Err(BackendError::WriteFailed);
        }
        if value > key.max_value() {
            return Err(BackendError::OutOfRange);
        }
        self.slots[key.index()] = Some(value);
        self.writes = self.writes.saturating_add(1);
        Ok(())
    }
}

/// Stand-in for a store that failed to open.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UnavailableBackend;

impl PersistenceBackend for UnavailableBackend {
    fn get(&mut self, _key: RecordKey) -> Option<u64> {
        None
    }

    fn set(&mut self, _key: RecordKey, _value: u64) -> Result<(), BackendError> {
        Err(BackendError::Unavailable)
    }
}
