//! Get Health Info (opcode 0x4200) output.

use super::{CodecError, get_bits, le_accessors, wire_record};
use bitflags::bitflags;
use num_enum::{FromPrimitive, TryFromPrimitive};
use utils::endian::{LittleEndian16, LittleEndian32};

// region: ext_status bit-fields
pub const EXT_LIFE_USED_MASK: u32 = 0x3;
pub const EXT_LIFE_USED_SHIFT: u32 = 0;
pub const EXT_TEMPERATURE_MASK: u32 = 0x3;
pub const EXT_TEMPERATURE_SHIFT: u32 = 2;
pub const EXT_CORRECTED_VOLATILE_MASK: u32 = 0x1;
pub const EXT_CORRECTED_VOLATILE_SHIFT: u32 = 4;
pub const EXT_CORRECTED_PERSISTENT_MASK: u32 = 0x1;
pub const EXT_CORRECTED_PERSISTENT_SHIFT: u32 = 5;
// endregion

pub const LIFE_USED_NOT_IMPLEMENTED: u8 = 0xff;
pub const TEMPERATURE_NOT_IMPLEMENTED: u16 = 0xffff;

wire_record! {
    pub struct HealthInfo {
        pub health_status: u8,
        pub media_status: u8,
        pub ext_status: u8,
        pub life_used: u8,
        pub temperature: LittleEndian16,
        pub dirty_shutdowns: LittleEndian32,
        pub volatile_errors: LittleEndian32,
        pub pmem_errors: LittleEndian32,
    } = 18;
}

le_accessors!(HealthInfo {
    dirty_shutdowns: u32,
    volatile_errors: u32,
    pmem_errors: u32,
});

bitflags! {
    pub struct HealthStatus: u8 {
        const MAINTENANCE_NEEDED    = 1 << 0;
        const PERFORMANCE_DEGRADED  = 1 << 1;
        const HW_REPLACEMENT_NEEDED = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MediaStatus {
    Normal = 0,
    NotReady = 1,
    PersistenceLost = 2,
    DataLost = 3,
    PowerlossPersistenceLoss = 4,
    ShutdownPersistenceLoss = 5,
    PersistenceLossImminent = 6,
    PowerlossDataLoss = 7,
    ShutdownDataLoss = 8,
    DataLossImminent = 9,
}

/// Two-bit threshold states of ext_status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum ThresholdState {
    Normal = 0,
    Warning = 1,
    Critical = 2,
    #[num_enum(catch_all)]
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtStatus {
    pub life_used: ThresholdState,
    pub temperature: ThresholdState,
    pub corrected_volatile_warning: bool,
    pub corrected_persistent_warning: bool,
}

impl HealthInfo {
    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_bits_truncate(self.health_status)
    }

    pub fn media_status(&self) -> Result<MediaStatus, CodecError> {
        MediaStatus::try_from(self.media_status)
            .map_err(|_| CodecError::Invalid("unknown media status"))
    }

    pub fn ext_status(&self) -> ExtStatus {
        let raw = self.ext_status as u32;
        let state = |mask, shift| ThresholdState::from_primitive(get_bits(raw, mask, shift) as u8);
        ExtStatus {
            life_used: state(EXT_LIFE_USED_MASK, EXT_LIFE_USED_SHIFT),
            temperature: state(EXT_TEMPERATURE_MASK, EXT_TEMPERATURE_SHIFT),
            corrected_volatile_warning: get_bits(
                raw,
                EXT_CORRECTED_VOLATILE_MASK,
                EXT_CORRECTED_VOLATILE_SHIFT,
            ) != 0,
            corrected_persistent_warning: get_bits(
                raw,
                EXT_CORRECTED_PERSISTENT_MASK,
                EXT_CORRECTED_PERSISTENT_SHIFT,
            ) != 0,
        }
    }

    /// Percentage of rated life used, `None` if the device does not track it.
    pub fn life_used(&self) -> Option<u8> {
        (self.life_used != LIFE_USED_NOT_IMPLEMENTED).then_some(self.life_used)
    }

    /// Device temperature in degrees Celsius, `None` if not implemented.
    pub fn temperature(&self) -> Option<i16> {
        let raw = u16::from_le_bytes(self.temperature.bytes());
        (raw != TEMPERATURE_NOT_IMPLEMENTED).then_some(raw as i16)
    }
}
