//! Event log records (Get Event Records 0x0100, Clear Event Records 0x0101).

use super::{CodecError, Record, Uuid, get_bits, le_accessors, set_bits, wire_record};
use alloc::vec::Vec;
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::endian::{
    EndianData, LittleEndian16, LittleEndian32, LittleEndian64, SignedLittleEndian24,
};

// region: common header bit-fields (in EventRecordHeader::info)
pub const EVENT_RECORD_LENGTH_MASK: u32 = 0xff;
pub const EVENT_RECORD_LENGTH_SHIFT: u32 = 0;
pub const EVENT_RECORD_FLAGS_MASK: u32 = 0x3f;
pub const EVENT_RECORD_FLAGS_SHIFT: u32 = 8;
// endregion

wire_record! {
    /// Header shared by every event record.
    pub struct EventRecordHeader {
        /// Packed length (8 bits), flags (6 bits), reserved (18 bits).
        pub info: LittleEndian32,
        pub handle: LittleEndian32,
        pub timestamp: LittleEndian64,
        pub rsvd: [u8; 0x10],
    } = 32;
}

le_accessors!(EventRecordHeader {
    handle: u32,
    timestamp: u64,
});

bitflags! {
    pub struct EventRecordFlags: u8 {
        const PERMANENT_CONDITION      = 1 << 0;
        const MAINTENANCE_NEEDED       = 1 << 1;
        const PERFORMANCE_DEGRADED     = 1 << 2;
        const HARDWARE_REPLACEMENT     = 1 << 3;
    }
}

impl EventRecordHeader {
    pub fn length(&self) -> u8 {
        get_bits(
            self.info.value(),
            EVENT_RECORD_LENGTH_MASK,
            EVENT_RECORD_LENGTH_SHIFT,
        ) as u8
    }

    pub fn flags(&self) -> EventRecordFlags {
        EventRecordFlags::from_bits_truncate(get_bits(
            self.info.value(),
            EVENT_RECORD_FLAGS_MASK,
            EVENT_RECORD_FLAGS_SHIFT,
        ) as u8)
    }

    /// Build a header; the reserved bits of the packed field are zero.
    pub fn new(length: u8, flags: EventRecordFlags, handle: u32, timestamp: u64) -> Self {
        let info = set_bits(
            0,
            EVENT_RECORD_LENGTH_MASK,
            EVENT_RECORD_LENGTH_SHIFT,
            length as u32,
        );
        let info = set_bits(
            info,
            EVENT_RECORD_FLAGS_MASK,
            EVENT_RECORD_FLAGS_SHIFT,
            flags.bits() as u32,
        );
        let mut res = Self::zeroed();
        res.info = info.into();
        res.set_handle(handle);
        res.set_timestamp(timestamp);
        res
    }
}

wire_record! {
    /// General Media event record. Every record in a Get Event Records response has this
    /// size; other record types reuse the layout up to the header.
    pub struct MediaEvent {
        pub uuid: [u8; 16],
        pub header: EventRecordHeader,
        pub physical_address: LittleEndian64,
        pub memory_event_desc: u8,
        pub memory_event_type: u8,
        pub transaction_type: u8,
        pub validity_flags: LittleEndian16,
        pub channel: u8,
        pub rank: u8,
        pub device: SignedLittleEndian24,
        pub component_identifier: [u8; 16],
        pub rsvd: [u8; 0x2e],
    } = 128;
}

le_accessors!(MediaEvent {
    physical_address: u64,
    validity_flags: u16,
    device: i32,
});

bitflags! {
    /// Which optional fields of a [MediaEvent] carry data.
    pub struct MediaEventValidity: u16 {
        const CHANNEL      = 1 << 0;
        const RANK         = 1 << 1;
        const DEVICE       = 1 << 2;
        const COMPONENT_ID = 1 << 3;
    }
}

impl MediaEvent {
    pub fn record_type(&self) -> Uuid {
        Uuid(self.uuid)
    }

    pub fn validity(&self) -> MediaEventValidity {
        MediaEventValidity::from_bits_truncate(self.validity_flags())
    }

    pub fn valid_channel(&self) -> Option<u8> {
        self.validity()
            .contains(MediaEventValidity::CHANNEL)
            .then_some(self.channel)
    }

    pub fn valid_rank(&self) -> Option<u8> {
        self.validity()
            .contains(MediaEventValidity::RANK)
            .then_some(self.rank)
    }

    pub fn valid_device(&self) -> Option<i32> {
        self.validity()
            .contains(MediaEventValidity::DEVICE)
            .then(|| self.device())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EventLogType {
    Informational = 0,
    Warning = 1,
    Failure = 2,
    Fatal = 3,
}

wire_record! {
    pub struct GetEventRecordsIn {
        pub event_log: u8,
    } = 1;
}

impl GetEventRecordsIn {
    pub fn new(log: EventLogType) -> Self {
        GetEventRecordsIn {
            event_log: log.into(),
        }
    }
}

wire_record! {
    pub struct GetEventRecordsHeader {
        pub flags: u8,
        pub rsvd: u8,
        pub overflow_count: LittleEndian16,
        pub first_overflow_timestamp: LittleEndian64,
        pub last_overflow_timestamp: LittleEndian64,
        pub record_count: LittleEndian16,
        pub rsvd2: [u8; 10],
    } = 32;
}

le_accessors!(GetEventRecordsHeader {
    flags: u8,
    overflow_count: u16,
    first_overflow_timestamp: u64,
    last_overflow_timestamp: u64,
    record_count: u16,
});

bitflags! {
    pub struct GetEventRecordsFlags: u8 {
        const OVERFLOW     = 1 << 0;
        const MORE_RECORDS = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecords {
    pub flags: GetEventRecordsFlags,
    pub overflow_count: u16,
    pub first_overflow_timestamp: u64,
    pub last_overflow_timestamp: u64,
    pub records: Vec<MediaEvent>,
}

impl EventRecords {
    pub fn decode(payload: &[u8]) -> Result<EventRecords, CodecError> {
        let header = GetEventRecordsHeader::decode(payload)?;
        let count = header.record_count() as usize;
        let need = GetEventRecordsHeader::SIZE + count * MediaEvent::SIZE;
        if payload.len() < need {
            return Err(CodecError::TooShort {
                need,
                got: payload.len(),
            });
        }
        let records = payload[GetEventRecordsHeader::SIZE..need]
            .chunks_exact(MediaEvent::SIZE)
            .map(MediaEvent::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventRecords {
            flags: GetEventRecordsFlags::from_bits_truncate(header.flags()),
            overflow_count: header.overflow_count(),
            first_overflow_timestamp: header.first_overflow_timestamp(),
            last_overflow_timestamp: header.last_overflow_timestamp(),
            records,
        })
    }

    /// Handles to pass back to Clear Event Records.
    pub fn handles(&self) -> Vec<u16> {
        self.records
            .iter()
            .map(|r| r.header.handle() as u16)
            .collect()
    }
}

wire_record! {
    /// Fixed part of Clear Event Records; `nr_handles` 16-bit handles follow.
    pub struct ClearEventRecordsHeader {
        pub event_log: u8,
        pub flags: u8,
        pub nr_handles: u8,
        pub rsvd: [u8; 3],
    } = 6;
}

bitflags! {
    pub struct ClearEventFlags: u8 {
        const CLEAR_ALL = 1 << 0;
    }
}

/// Build a Clear Event Records payload. An empty `handles` slice clears the whole log.
pub fn encode_clear_event_records(
    log: EventLogType,
    handles: &[u16],
) -> Result<Vec<u8>, CodecError> {
    let nr_handles =
        u8::try_from(handles.len()).map_err(|_| CodecError::Invalid("too many event handles"))?;
    let mut header = ClearEventRecordsHeader::zeroed();
    header.event_log = log.into();
    header.nr_handles = nr_handles;
    if handles.is_empty() {
        header.flags = ClearEventFlags::CLEAR_ALL.bits();
    }
    let mut out = Vec::with_capacity(ClearEventRecordsHeader::SIZE + handles.len() * 2);
    header.encode_into(&mut out);
    for handle in handles {
        out.extend_from_slice(&LittleEndian16::new(*handle).bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bit_packing() {
        let flags = EventRecordFlags::MAINTENANCE_NEEDED | EventRecordFlags::HARDWARE_REPLACEMENT;
        let header = EventRecordHeader::new(0x80, flags, 7, 0x55);
        // length in bits 0..8, flags in bits 8..14
        assert_eq!(header.as_bytes()[..4], [0x80, 0x0a, 0, 0]);
        assert_eq!(header.length(), 0x80);
        assert_eq!(header.flags(), flags);
        assert_eq!(header.handle(), 7);
    }

    #[test]
    fn test_header_ignores_reserved_bits() {
        let mut raw = [0u8; 32];
        raw[..4].copy_from_slice(&0xffff_ff10u32.to_le_bytes());
        let header = EventRecordHeader::decode(&raw).unwrap();
        assert_eq!(header.length(), 0x10);
        assert_eq!(header.flags().bits(), 0x0f);
    }

    fn media_event(handle: u32, device: i32) -> MediaEvent {
        let mut ev = MediaEvent::zeroed();
        ev.header = EventRecordHeader::new(128, EventRecordFlags::empty(), handle, 1);
        ev.set_physical_address(0x4000);
        ev.set_validity_flags((MediaEventValidity::DEVICE | MediaEventValidity::RANK).bits());
        ev.rank = 2;
        ev.channel = 9;
        ev.set_device(device);
        ev
    }

    #[test]
    fn test_media_event_fields() {
        let ev = media_event(3, -5);
        let bytes = ev.as_bytes();
        assert_eq!(bytes.len(), 128);
        assert_eq!(bytes[63..66], [0xfb, 0xff, 0xff]);
        let back = MediaEvent::decode(bytes).unwrap();
        assert_eq!(back.valid_device(), Some(-5));
        assert_eq!(back.valid_rank(), Some(2));
        assert_eq!(back.valid_channel(), None);
    }

    #[test]
    fn test_get_event_records() {
        let mut header = GetEventRecordsHeader::zeroed();
        header.set_record_count(2);
        header.set_flags(GetEventRecordsFlags::MORE_RECORDS.bits());
        let mut payload = Vec::new();
        header.encode_into(&mut payload);
        media_event(10, 0).encode_into(&mut payload);
        media_event(11, 0).encode_into(&mut payload);
        let records = EventRecords::decode(&payload).unwrap();
        assert_eq!(records.records.len(), 2);
        assert_eq!(records.handles(), [10, 11]);
        assert!(records.flags.contains(GetEventRecordsFlags::MORE_RECORDS));
        assert!(EventRecords::decode(&payload[..200]).is_err());
    }

    #[test]
    fn test_clear_event_records() {
        let payload = encode_clear_event_records(EventLogType::Failure, &[0x102, 3]).unwrap();
        assert_eq!(payload, [2, 0, 2, 0, 0, 0, 0x02, 0x01, 0x03, 0x00]);
        let all = encode_clear_event_records(EventLogType::Fatal, &[]).unwrap();
        assert_eq!(all, [3, 1, 0, 0, 0, 0]);
        let many = [0u16; 256];
        assert!(encode_clear_event_records(EventLogType::Fatal, &many).is_err());
    }
}
