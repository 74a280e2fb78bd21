//! Persistent storage backends.
//!
//! The boot record backend is chosen at build time: `record-flash` keeps it in
//! the hub data partition, `record-retention` in RTC fast memory.

pub mod flash_provisioning;
#[cfg(feature = "record-flash")]
pub mod flash_record;
mod raw_flash;
#[cfg(feature = "record-retention")]
pub mod retention_record;

pub use raw_flash::FlashError;

use hub_core::record::{BackendError, PersistenceBackend, RecordKey, UnavailableBackend};
use log::warn;

#[cfg(all(feature = "record-flash", feature = "record-retention"))]
compile_error!("enable only one of `record-flash` and `record-retention`");
#[cfg(not(any(feature = "record-flash", feature = "record-retention")))]
compile_error!("enable one of `record-flash` or `record-retention`");

#[cfg(feature = "record-flash")]
pub type BootRecordBackend = flash_record::FlashRecordBackend;
#[cfg(feature = "record-retention")]
pub type BootRecordBackend = retention_record::RetentionRecordBackend;

/// The selected boot record backend, or a stand-in when it failed to open.
#[derive(Debug)]
pub enum BootRecordStore {
    Ready(BootRecordBackend),
    Unavailable(UnavailableBackend),
}

impl BootRecordStore {
    pub fn open() -> Self {
        match BootRecordBackend::open() {
            Ok(backend) => Self::Ready(backend),
            Err(err) => {
                warn!(
                    "storage: boot record unavailable ({:?}); counters are volatile this boot",
                    err
                );
                Self::Unavailable(UnavailableBackend)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl PersistenceBackend for BootRecordStore {
    fn get(&mut self, key: RecordKey) -> Option<u64> {
        match self {
            Self::Ready(backend) => backend.get(key),
            Self::Unavailable(backend) => backend.get(key),
        }
    }

    fn set(&mut self, key: RecordKey, value: u64) -> Result<(), BackendError> {
        match self {
            Self::Ready(backend) => backend.set(key, value),
            Self::Unavailable(backend) => backend.set(key, value),
        }
    }
}
