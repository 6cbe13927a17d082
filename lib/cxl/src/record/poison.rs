//! Poison list records (Get Poison List 0x4300, Clear Poison 0x4302).

use super::{CodecError, Record, le_accessors, wire_record};
use crate::config::POISON_LENGTH_UNIT;
use alloc::vec::Vec;
use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};
use utils::endian::{LittleEndian16, LittleEndian32, LittleEndian64};

/// DPA bits of a media-error address field.
pub const POISON_ADDR_MASK: u64 = 0xFFFF_FFFF_FFFF_FFF8;
/// Source-code bits of a media-error address field.
pub const POISON_SOURCE_MASK: u64 = 0x7;

pub const CLEAR_POISON_PATTERN_LENGTH: usize = 0x40;

wire_record! {
    pub struct PoisonListIn {
        pub address: LittleEndian64,
        /// In units of [POISON_LENGTH_UNIT] bytes.
        pub address_length: LittleEndian64,
    } = 16;
}

le_accessors!(PoisonListIn {
    address: u64,
    address_length: u64,
});

impl PoisonListIn {
    /// Request the poison records of `length` units starting at `address`. The low
    /// address bits overlap the source field and are cleared.
    pub fn new(address: u64, length: u64) -> PoisonListIn {
        PoisonListIn {
            address: (address & POISON_ADDR_MASK).into(),
            address_length: length.into(),
        }
    }
}

wire_record! {
    pub struct PoisonListHeader {
        pub flags: u8,
        pub rsvd: u8,
        pub overflow_timestamp: LittleEndian64,
        pub count: LittleEndian16,
        pub rsvd2: [u8; 0x14],
    } = 32;
}

le_accessors!(PoisonListHeader {
    flags: u8,
    overflow_timestamp: u64,
    count: u16,
});

wire_record! {
    pub struct MediaErrorRecord {
        pub address: LittleEndian64,
        pub length: LittleEndian32,
        pub rsvd: [u8; 4],
    } = 16;
}

le_accessors!(MediaErrorRecord {
    address: u64,
    length: u32,
});

bitflags! {
    pub struct PoisonListFlags: u8 {
        const MORE_RECORDS     = 1 << 0;
        const OVERFLOW         = 1 << 1;
        const SCAN_IN_PROGRESS = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PoisonSource {
    Unknown = 0,
    External = 1,
    Internal = 2,
    Injected = 3,
    VendorSpecific = 7,
    #[num_enum(catch_all)]
    Reserved(u8),
}

/// A decoded media-error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonRecord {
    pub dpa: u64,
    pub source: PoisonSource,
    /// In units of [POISON_LENGTH_UNIT] bytes.
    pub length: u32,
}

impl PoisonRecord {
    pub fn length_bytes(&self) -> u64 {
        self.length as u64 * POISON_LENGTH_UNIT
    }
}

impl From<&MediaErrorRecord> for PoisonRecord {
    fn from(raw: &MediaErrorRecord) -> Self {
        let address = raw.address();
        PoisonRecord {
            dpa: address & POISON_ADDR_MASK,
            source: PoisonSource::from_primitive((address & POISON_SOURCE_MASK) as u8),
            length: raw.length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonList {
    pub flags: PoisonListFlags,
    pub overflow_timestamp: u64,
    pub records: Vec<PoisonRecord>,
}

impl PoisonList {
    /// Decode a Get Poison List response. The record array is sized by the header count.
    pub fn decode(payload: &[u8]) -> Result<PoisonList, CodecError> {
        let header = PoisonListHeader::decode(payload)?;
        let count = header.count() as usize;
        let need = PoisonListHeader::SIZE + count * MediaErrorRecord::SIZE;
        if payload.len() < need {
            return Err(CodecError::TooShort {
                need,
                got: payload.len(),
            });
        }
        let records = payload[PoisonListHeader::SIZE..need]
            .chunks_exact(MediaErrorRecord::SIZE)
            .map(|raw| MediaErrorRecord::decode(raw).map(|r| PoisonRecord::from(&r)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PoisonList {
            flags: PoisonListFlags::from_bits_truncate(header.flags()),
            overflow_timestamp: header.overflow_timestamp(),
            records,
        })
    }
}

wire_record! {
    pub struct ClearPoisonIn {
        pub address: LittleEndian64,
        pub clear_data: [u8; CLEAR_POISON_PATTERN_LENGTH],
    } = 72;
}

le_accessors!(ClearPoisonIn { address: u64 });

impl ClearPoisonIn {
    /// Clear the poison at `address`, writing zeros in its place.
    pub fn new(address: u64) -> ClearPoisonIn {
        ClearPoisonIn {
            address: (address & POISON_ADDR_MASK).into(),
            clear_data: [0; CLEAR_POISON_PATTERN_LENGTH],
        }
    }

    pub fn with_pattern(mut self, pattern: [u8; CLEAR_POISON_PATTERN_LENGTH]) -> ClearPoisonIn {
        self.clear_data = pattern;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw_addrs: &[(u64, u32)], declared: u16) -> Vec<u8> {
        let mut header = PoisonListHeader::zeroed();
        header.set_flags(0b101);
        header.set_overflow_timestamp(0x1122);
        header.set_count(declared);
        let mut out = Vec::new();
        header.encode_into(&mut out);
        for (addr, len) in raw_addrs {
            let mut rec = MediaErrorRecord::zeroed();
            rec.set_address(*addr);
            rec.set_length(*len);
            rec.encode_into(&mut out);
        }
        out
    }

    #[test]
    fn test_address_splits_dpa_and_source() {
        let payload = response(&[(0x1000_0000_0000_0007, 2)], 1);
        let list = PoisonList::decode(&payload).unwrap();
        assert_eq!(list.records.len(), 1);
        assert_eq!(list.records[0].dpa, 0x1000_0000_0000_0000);
        assert_eq!(list.records[0].source, PoisonSource::VendorSpecific);
        assert_eq!(u8::from(list.records[0].source), 7);
        assert_eq!(list.records[0].length_bytes(), 128);
        assert_eq!(
            list.flags,
            PoisonListFlags::MORE_RECORDS | PoisonListFlags::SCAN_IN_PROGRESS
        );
        assert_eq!(list.overflow_timestamp, 0x1122);
    }

    #[test]
    fn test_reserved_source() {
        let payload = response(&[(0x2005, 1), (0x3003, 1)], 2);
        let list = PoisonList::decode(&payload).unwrap();
        assert_eq!(list.records[0].source, PoisonSource::Reserved(5));
        assert_eq!(list.records[0].dpa, 0x2000);
        assert_eq!(list.records[1].source, PoisonSource::Injected);
    }

    #[test]
    fn test_count_larger_than_payload() {
        let payload = response(&[(0x1000, 1)], 3);
        assert_eq!(
            PoisonList::decode(&payload),
            Err(CodecError::TooShort { need: 80, got: 48 })
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut payload = response(&[(0x1000, 1)], 1);
        payload.extend_from_slice(&[0xff; 16]);
        assert_eq!(PoisonList::decode(&payload).unwrap().records.len(), 1);
    }

    #[test]
    fn test_request_masks_source_bits() {
        assert_eq!(PoisonListIn::new(0x1007, 4).address(), 0x1000);
        let clear = ClearPoisonIn::new(0xffff);
        assert_eq!(clear.address(), 0xfff8);
        assert_eq!(clear.as_bytes().len(), 72);
        assert!(clear.as_bytes()[8..].iter().all(|b| *b == 0));
    }
}
