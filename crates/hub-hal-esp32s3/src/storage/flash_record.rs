//! Boot record stored in the last two sectors of the hub data partition.
//!
//! Slot layout and the choice of the next slot live in
//! [`hub_core::record_codec`]; this backend only moves slots to and from flash.

use hub_core::record::{BackendError, PersistenceBackend, RecordKey, RecordValues};
use hub_core::record_codec::{SLOT_LEN, SectorScan, SlotLog, encode_slot};
use log::{info, warn};

use super::raw_flash::{FLASH_SECTOR_SIZE, FlashError, RawFlash, reserved_sector};

const SLOTS_PER_SECTOR: u32 = FLASH_SECTOR_SIZE / SLOT_LEN as u32;

#[derive(Debug)]
pub struct FlashRecordBackend {
    flash: RawFlash,
    sector_addrs: [u32; 2],
    log: SlotLog,
    values: Option<RecordValues>,
}

impl FlashRecordBackend {
    pub fn open() -> Result<Self, FlashError> {
        let mut flash = RawFlash::new()?;
        let sector_addrs = [reserved_sector(&mut flash, 1)?, reserved_sector(&mut flash, 0)?];

        let scans = [
            scan(&mut flash, sector_addrs[0])?,
            scan(&mut flash, sector_addrs[1])?,
        ];
        for (addr, scan) in sector_addrs.iter().zip(&scans) {
            if scan.needs_erase {
                warn!(
                    "storage: flash record sector={:#x} has unreadable slots; will rewrite",
                    addr
                );
            }
        }
        let (log, values) = SlotLog::open(SLOTS_PER_SECTOR, scans);

        info!(
            "storage: flash record sector={:#x} next_slot={} found={}",
            sector_addrs[log.active_sector()],
            log.next_slot(),
            values.is_some()
        );
        Ok(Self {
            flash,
            sector_addrs,
            log,
            values,
        })
    }

    fn append(&mut self, values: &RecordValues) -> Result<(), FlashError> {
        let write = self.log.next_write();
        let sector_addr = self.sector_addrs[write.sector];
        if write.erase_first {
            self.flash.erase_sector(sector_addr)?;
            info!("storage: flash record moved to sector={:#x}", sector_addr);
        }

        let addr = sector_addr + write.slot * SLOT_LEN as u32;
        let result = self
            .flash
            .write_verified(addr, &encode_slot(values, write.sequence));
        self.log.complete(write, result.is_ok());
        result
    }
}

fn scan(flash: &mut RawFlash, sector_addr: u32) -> Result<SectorScan, FlashError> {
    let mut scan = SectorScan::default();
    let mut slot = [0u8; SLOT_LEN];
    for index in 0..SLOTS_PER_SECTOR {
        flash.read_bytes(sector_addr + index * SLOT_LEN as u32, &mut slot)?;
        scan.feed(index, &slot);
    }
    Ok(scan)
}

impl PersistenceBackend for FlashRecordBackend {
    fn get(&mut self, key: RecordKey) -> Option<u64> {
        self.values.map(|values| values.field(key))
    }

    fn set(&mut self, key: RecordKey, value: u64) -> Result<(), BackendError> {
        if value > key.max_value() {
            return Err(BackendError::OutOfRange);
        }

        let mut next = self.values.unwrap_or_default();
        next.set_field(key, value);

        self.append(&next).map_err(|err| {
            warn!(
                "storage: flash record write failed key={} err={:?}",
                key.name(),
                err
            );
            BackendError::WriteFailed
        })?;
        self.values = Some(next);
        Ok(())
    }
}
