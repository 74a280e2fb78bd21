//! Word-level SPI flash access through the ROM routines, plus location of the
//! sectors reserved for sensor hub data.

use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};

pub(crate) const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashError {
    PartitionTable,
    PartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    Corrupted,
    Unsupported,
    /// Read-back after a write did not match.
    VerifyFailed,
}

#[derive(Debug)]
pub(crate) struct RawFlash;

impl RawFlash {
    pub(crate) fn new() -> Result<Self, FlashError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    pub(crate) fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashError::Unsupported);
        }

        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(())
    }

    /// Reads whole words; `addr` and `out.len()` must be word aligned.
    pub(crate) fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashError> {
        if !out.len().is_multiple_of(4) {
            return Err(FlashError::Unsupported);
        }
        for (i, chunk) in out.chunks_exact_mut(4).enumerate() {
            let word = self.read_word(addr + (i as u32) * 4)?;
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    /// Programs erased flash. Bits can only go from 1 to 0.
    pub(crate) fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if !data.len().is_multiple_of(4) {
            return Err(FlashError::Unsupported);
        }
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write_word(addr + (i as u32) * 4, word)?;
        }
        Ok(())
    }

    /// Like [`Self::write_erased_bytes`], then reads the range back.
    pub(crate) fn write_verified(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.write_erased_bytes(addr, data)?;
        let mut check = [0u8; 4];
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            self.read_bytes(addr + (i as u32) * 4, &mut check)?;
            if check != chunk {
                return Err(FlashError::VerifyFailed);
            }
        }
        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        // Partition table reads are not always word sized.
        let mut word = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let addr = offset + i as u32;
            let aligned = addr & !0b11;
            if i == 0 || addr == aligned {
                self.read_bytes(aligned, &mut word)?;
            }
            *byte = word[(addr - aligned) as usize];
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashError::Unsupported)
    }
}

/// Address of a sector counted back from the end of the hub data partition.
///
/// The first writable `data/undefined` partition is preferred, `data/nvs` is
/// the fallback. `sectors_from_end == 0` is the last sector.
pub(crate) fn reserved_sector(
    flash: &mut RawFlash,
    sectors_from_end: u32,
) -> Result<u32, FlashError> {
    let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
    let table =
        read_partition_table(flash, &mut table_buf).map_err(|_| FlashError::PartitionTable)?;

    let mut data_undefined: Option<(u32, u32)> = None;
    let mut fallback_nvs: Option<(u32, u32)> = None;

    for entry in table.iter() {
        if entry.is_read_only() || entry.len() < FLASH_SECTOR_SIZE {
            continue;
        }

        match entry.partition_type() {
            PartitionType::Data(DataPartitionSubType::Undefined) => {
                data_undefined = Some((entry.offset(), entry.len()));
                break;
            }
            PartitionType::Data(DataPartitionSubType::Nvs) => {
                if fallback_nvs.is_none() {
                    fallback_nvs = Some((entry.offset(), entry.len()));
                }
            }
            _ => {}
        }
    }

    let (offset, len) = data_undefined
        .or(fallback_nvs)
        .ok_or(FlashError::PartitionMissing)?;

    let needed = (sectors_from_end + 1) * FLASH_SECTOR_SIZE;
    if len < needed {
        return Err(FlashError::PartitionTooSmall);
    }
    Ok(offset + len - needed)
}
