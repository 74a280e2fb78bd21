//! Boot record kept in RTC fast memory.
//!
//! The block is not initialized by the startup code, so it keeps its contents
//! across software resets, watchdog resets and deep sleep. A block without the
//! magic word or with a bad checksum is reset to zeros on open.

use core::sync::atomic::{AtomicBool, Ordering};

use hub_core::record::{BackendError, PersistenceBackend, RecordKey, RecordValues};
use hub_core::record_codec::{RETAINED_WORDS, decode_retained, encode_retained};
use log::{info, warn};

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RETAINED: [u32; RETAINED_WORDS] = [0; RETAINED_WORDS];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetentionError {
    /// A second backend was opened for the same block.
    AlreadyOpen,
}

#[derive(Debug)]
pub struct RetentionRecordBackend {
    values: RecordValues,
}

static OPENED: AtomicBool = AtomicBool::new(false);

impl RetentionRecordBackend {
    pub fn open() -> Result<Self, RetentionError> {
        if OPENED.swap(true, Ordering::AcqRel) {
            return Err(RetentionError::AlreadyOpen);
        }

        // Only one backend instance exists, so it is the sole accessor of the block.
        let words = unsafe { core::ptr::read_volatile(&raw const RETAINED) };
        let mut backend = Self {
            values: RecordValues::default(),
        };
        match decode_retained(&words) {
            Ok(values) => {
                info!("storage: retention block valid");
                backend.values = values;
            }
            Err(err) => {
                warn!("storage: retention block invalid ({:?}); starting from zeros", err);
                backend.store();
            }
        }
        Ok(backend)
    }

    fn store(&mut self) {
        let words = encode_retained(&self.values);
        unsafe { core::ptr::write_volatile(&raw mut RETAINED, words) };
    }
}

impl PersistenceBackend for RetentionRecordBackend {
    fn get(&mut self, key: RecordKey) -> Option<u64> {
        Some(self.values.field(key))
    }

    fn set(&mut self, key: RecordKey, value: u64) -> Result<(), BackendError> {
        if value > key.max_value() {
            return Err(BackendError::OutOfRange);
        }
        self.values.set_field(key, value);
        self.store();
        Ok(())
    }
}
