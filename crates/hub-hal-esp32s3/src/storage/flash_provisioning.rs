use hub_core::provisioning::{
    DEVICE_NAME_BYTES, PASSWORD_BYTES, Provisioning, ProvisioningStore, SSID_BYTES,
};
use hub_core::record_codec::checksum32;

use super::raw_flash::{FlashError, RawFlash, reserved_sector};

const PROVISIONING_MAGIC: u32 = 0x3150_5348; // "HSP1"
const PROVISIONING_VERSION: u8 = 1;

const SSID_AT: usize = 8;
const PASSWORD_AT: usize = SSID_AT + SSID_BYTES;
const NAME_AT: usize = PASSWORD_AT + PASSWORD_BYTES;
const CHECKSUM_AT: usize = NAME_AT + DEVICE_NAME_BYTES;
const RECORD_LEN: usize = CHECKSUM_AT + 4;

/// Wi-Fi credentials and device name, in the sector before the two boot record sectors.
#[derive(Debug)]
pub struct FlashProvisioningStore {
    flash: RawFlash,
    sector_addr: u32,
}

impl FlashProvisioningStore {
    pub fn new() -> Result<Self, FlashError> {
        let mut flash = RawFlash::new()?;
        let sector_addr = reserved_sector(&mut flash, 2)?;
        Ok(Self { flash, sector_addr })
    }
}

impl ProvisioningStore for FlashProvisioningStore {
    type Error = FlashError;

    fn load(&mut self) -> Result<Option<Provisioning>, Self::Error> {
        let mut buf = [0u8; RECORD_LEN];
        self.flash.read_bytes(self.sector_addr, &mut buf)?;

        if buf.iter().all(|b| *b == 0xFF) {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != PROVISIONING_MAGIC || buf[4] != PROVISIONING_VERSION {
            return Ok(None);
        }

        let expected = u32::from_le_bytes([
            buf[CHECKSUM_AT],
            buf[CHECKSUM_AT + 1],
            buf[CHECKSUM_AT + 2],
            buf[CHECKSUM_AT + 3],
        ]);
        if checksum32(&buf[..CHECKSUM_AT]) != expected {
            return Err(FlashError::Corrupted);
        }

        let mut provisioning = Provisioning::default();
        read_field(&mut provisioning.ssid, &buf[SSID_AT..PASSWORD_AT], buf[5])?;
        read_field(&mut provisioning.password, &buf[PASSWORD_AT..NAME_AT], buf[6])?;
        read_field(&mut provisioning.device_name, &buf[NAME_AT..CHECKSUM_AT], buf[7])?;
        Ok(Some(provisioning))
    }

    fn save(&mut self, provisioning: &Provisioning) -> Result<(), Self::Error> {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&PROVISIONING_MAGIC.to_le_bytes());
        buf[4] = PROVISIONING_VERSION;
        buf[5] = provisioning.ssid.len() as u8;
        buf[6] = provisioning.password.len() as u8;
        buf[7] = provisioning.device_name.len() as u8;
        write_field(&mut buf[SSID_AT..PASSWORD_AT], &provisioning.ssid);
        write_field(&mut buf[PASSWORD_AT..NAME_AT], &provisioning.password);
        write_field(&mut buf[NAME_AT..CHECKSUM_AT], &provisioning.device_name);
        let checksum = checksum32(&buf[..CHECKSUM_AT]);
        buf[CHECKSUM_AT..].copy_from_slice(&checksum.to_le_bytes());

        self.flash.erase_sector(self.sector_addr)?;
        self.flash.write_verified(self.sector_addr, &buf)
    }
}

fn read_field<const N: usize>(
    out: &mut heapless::String<N>,
    bytes: &[u8],
    len: u8,
) -> Result<(), FlashError> {
    let len = len as usize;
    if len > bytes.len() {
        return Err(FlashError::Corrupted);
    }
    let text = core::str::from_utf8(&bytes[..len]).map_err(|_| FlashError::Corrupted)?;
    out.push_str(text).map_err(|_| FlashError::Corrupted)
}

fn write_field(out: &mut [u8], value: &str) {
    let len = value.len().min(out.len());
    out[..len].copy_from_slice(&value.as_bytes()[..len]);
}
