//! Byte layouts of the boot record: flash slots and the retained RAM block.
//!
//! On flash the record lives in two sectors used in turn as an append-only
//! log of fixed slots. Every slot carries a sequence number and the highest
//! valid sequence across both sectors wins on load. A sector is only erased
//! when it does not hold the newest record, so a power cut during the erase
//! or the following program leaves the previous record readable.
//!
//! Slot layout, little endian:
//!
//! | bytes  | field                 |
//! |--------|-----------------------|
//! | 0..4   | magic `HRB2`          |
//! | 4      | layout version        |
//! | 5      | reset count           |
//! | 6      | crash count           |
//! | 7      | reserved, zero        |
//! | 8..16  | window start (ms)     |
//! | 16..20 | crash flag            |
//! | 20..24 | sleep seconds         |
//! | 24..28 | sequence              |
//! | 28..32 | FNV-1a of bytes 0..28 |

use crate::record::RecordValues;

pub const SLOT_LEN: usize = 32;
pub const SLOT_MAGIC: u32 = 0x3242_5248; // "HRB2"
pub const SLOT_VERSION: u8 = 2;
/// Value of erased NOR flash.
pub const ERASED_BYTE: u8 = 0xFF;

const SLOT_CHECKSUM_AT: usize = SLOT_LEN - 4;

pub const RETAINED_MAGIC: u32 = 0x3152_5248; // "HRR1"
pub const RETAINED_WORDS: usize = 8;

const MAGIC: usize = 0;
const RESET_COUNT: usize = 1;
const WINDOW_LO: usize = 2;
const WINDOW_HI: usize = 3;
const CRASH_FLAG: usize = 4;
const CRASH_COUNT: usize = 5;
const SLEEP_SECONDS: usize = 6;
const CHECKSUM: usize = 7;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodecError {
    /// Magic or version does not match; erased or foreign data.
    Foreign,
    /// Checksum mismatch, usually a torn write.
    Checksum,
}

/// FNV-1a over `bytes`.
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// A decoded flash slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoredSlot {
    pub sequence: u32,
    pub values: RecordValues,
}

pub fn encode_slot(values: &RecordValues, sequence: u32) -> [u8; SLOT_LEN] {
    let mut buf = [0u8; SLOT_LEN];
    buf[0..4].copy_from_slice(&SLOT_MAGIC.to_le_bytes());
    buf[4] = SLOT_VERSION;
    buf[5] = values.reset_count;
    buf[6] = values.crash_count;
    buf[8..16].copy_from_slice(&values.window_start_ms.to_le_bytes());
    buf[16..20].copy_from_slice(&values.crash_flag.to_le_bytes());
    buf[20..24].copy_from_slice(&values.sleep_seconds.to_le_bytes());
    buf[24..28].copy_from_slice(&sequence.to_le_bytes());
    let checksum = checksum32(&buf[..SLOT_CHECKSUM_AT]);
    buf[SLOT_CHECKSUM_AT..].copy_from_slice(&checksum.to_le_bytes());
    buf
}

pub fn decode_slot(buf: &[u8; SLOT_LEN]) -> Result<StoredSlot, CodecError> {
    if le_u32(buf, 0) != SLOT_MAGIC || buf[4] != SLOT_VERSION {
        return Err(CodecError::Foreign);
    }
    if checksum32(&buf[..SLOT_CHECKSUM_AT]) != le_u32(buf, SLOT_CHECKSUM_AT) {
        return Err(CodecError::Checksum);
    }

    let mut window = [0u8; 8];
    window.copy_from_slice(&buf[8..16]);
    Ok(StoredSlot {
        sequence: le_u32(buf, 24),
        values: RecordValues {
            reset_count: buf[5],
            crash_count: buf[6],
            window_start_ms: u64::from_le_bytes(window),
            crash_flag: le_u32(buf, 16),
            sleep_seconds: le_u32(buf, 20),
        },
    })
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// What one pass over a sector found.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SectorScan {
    /// Valid slot with the highest sequence.
    pub newest: Option<StoredSlot>,
    /// One past the last programmed slot.
    pub next_slot: u32,
    /// The sector holds unreadable slots and must be erased before reuse.
    pub needs_erase: bool,
}

impl SectorScan {
    /// Accounts for the slot at `index`. Slots may be fed in any order.
    pub fn feed(&mut self, index: u32, slot: &[u8; SLOT_LEN]) {
        if slot.iter().all(|b| *b == ERASED_BYTE) {
            return;
        }
        self.next_slot = self.next_slot.max(index + 1);

        match decode_slot(slot) {
            Ok(stored) => {
                if self.newest.is_none_or(|newest| stored.sequence > newest.sequence) {
                    self.newest = Some(stored);
                }
            }
            Err(_) => self.needs_erase = true,
        }
    }
}

/// Scans a whole sector image.
pub fn scan_sector(sector: &[u8]) -> SectorScan {
    let mut scan = SectorScan::default();
    for (index, chunk) in sector.chunks_exact(SLOT_LEN).enumerate() {
        let mut slot = [0u8; SLOT_LEN];
        slot.copy_from_slice(chunk);
        scan.feed(index as u32, &slot);
    }
    scan
}

/// Placement of the next slot write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotWrite {
    /// 0 or 1.
    pub sector: usize,
    pub slot: u32,
    /// Erase `sector` before programming.
    pub erase_first: bool,
    pub sequence: u32,
}

/// Two sectors used in turn as one record log.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotLog {
    slots_per_sector: u32,
    active: usize,
    next_slot: u32,
    sequence: u32,
    /// The active sector holds the newest valid slot.
    holds_newest: bool,
    needs_erase: bool,
}

impl SlotLog {
    /// Picks the sector with the newest valid slot and returns its values.
    pub fn open(slots_per_sector: u32, scans: [SectorScan; 2]) -> (Self, Option<RecordValues>) {
        let sequence_of = |scan: &SectorScan| scan.newest.map(|slot| slot.sequence);
        let active = match (sequence_of(&scans[0]), sequence_of(&scans[1])) {
            (Some(first), Some(second)) if second > first => 1,
            (None, Some(_)) => 1,
            _ => 0,
        };
        let scan = scans[active];
        let log = Self {
            slots_per_sector,
            active,
            next_slot: scan.next_slot,
            sequence: scan.newest.map_or(0, |slot| slot.sequence),
            holds_newest: scan.newest.is_some(),
            needs_erase: scan.needs_erase,
        };
        (log, scan.newest.map(|slot| slot.values))
    }

    pub fn active_sector(&self) -> usize {
        self.active
    }

    pub fn next_slot(&self) -> u32 {
        self.next_slot
    }

    /// Where the next record goes.
    pub fn next_write(&self) -> SlotWrite {
        let sequence = self.sequence.wrapping_add(1);
        if !self.needs_erase && self.next_slot < self.slots_per_sector {
            return SlotWrite {
                sector: self.active,
                slot: self.next_slot,
                erase_first: false,
                sequence,
            };
        }
        // Never erase the sector that holds the newest record.
        let sector = if self.holds_newest {
            1 - self.active
        } else {
            self.active
        };
        SlotWrite {
            sector,
            slot: 0,
            erase_first: true,
            sequence,
        }
    }

    /// Records the outcome of `write`. The slot is used up even when
    /// programming failed.
    pub fn complete(&mut self, write: SlotWrite, programmed: bool) {
        if write.erase_first {
            self.active = write.sector;
            self.holds_newest = false;
            self.needs_erase = false;
        }
        self.next_slot = write.slot + 1;
        if programmed {
            self.sequence = write.sequence;
            self.holds_newest = true;
        }
    }
}

/// Retained RAM block for `values`, checksum included.
pub fn encode_retained(values: &RecordValues) -> [u32; RETAINED_WORDS] {
    let mut words = [0u32; RETAINED_WORDS];
    words[MAGIC] = RETAINED_MAGIC;
    words[RESET_COUNT] = values.reset_count as u32;
    words[WINDOW_LO] = values.window_start_ms as u32;
    words[WINDOW_HI] = (values.window_start_ms >> 32) as u32;
    words[CRASH_FLAG] = values.crash_flag;
    words[CRASH_COUNT] = values.crash_count as u32;
    words[SLEEP_SECONDS] = values.sleep_seconds;
    words[CHECKSUM] = retained_checksum(&words);
    words
}

pub fn decode_retained(words: &[u32; RETAINED_WORDS]) -> Result<RecordValues, CodecError> {
    if words[MAGIC] != RETAINED_MAGIC {
        return Err(CodecError::Foreign);
    }
    if words[CHECKSUM] != retained_checksum(words) {
        return Err(CodecError::Checksum);
    }
    Ok(RecordValues {
        reset_count: words[RESET_COUNT] as u8,
        window_start_ms: ((words[WINDOW_HI] as u64) << 32) | words[WINDOW_LO] as u64,
        crash_flag: words[CRASH_FLAG],
        crash_count: words[CRASH_COUNT] as u8,
        sleep_seconds: words[SLEEP_SECONDS],
    })
}

fn retained_checksum(words: &[u32; RETAINED_WORDS]) -> u32 {
    let mut bytes = [0u8; CHECKSUM * 4];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(&words[..CHECKSUM]) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    checksum32(&bytes)
}
