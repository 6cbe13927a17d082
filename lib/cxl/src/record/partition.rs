//! Partition records (Get Partition Info 0x4100, Set Partition Info 0x4101).

use super::{CodecError, identify::capacity_to_bytes, le_accessors, wire_record};
use crate::config::CAPACITY_MULTIPLIER;
use bitflags::bitflags;
use utils::{endian::LittleEndian64, num::AlignableTo};

wire_record! {
    /// Capacities in [CAPACITY_MULTIPLIER] units.
    pub struct GetPartition {
        pub active_volatile: LittleEndian64,
        pub active_persistent: LittleEndian64,
        pub next_volatile: LittleEndian64,
        pub next_persistent: LittleEndian64,
    } = 32;
}

le_accessors!(GetPartition {
    active_volatile: u64,
    active_persistent: u64,
    next_volatile: u64,
    next_persistent: u64,
});

impl GetPartition {
    pub fn active_volatile_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.active_volatile())
    }

    pub fn active_persistent_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.active_persistent())
    }

    /// 0 when no change is pending.
    pub fn next_volatile_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.next_volatile())
    }

    pub fn next_persistent_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.next_persistent())
    }
}

bitflags! {
    pub struct SetPartitionFlags: u8 {
        /// Apply now instead of on the next cold reset.
        const IMMEDIATE = 1 << 0;
    }
}

wire_record! {
    pub struct SetPartition {
        pub volatile_capacity: LittleEndian64,
        pub flags: u8,
    } = 9;
}

le_accessors!(SetPartition { volatile_capacity: u64 });

impl SetPartition {
    /// Partition so that `volatile_bytes` of the device is volatile; the size must be a
    /// whole number of capacity units.
    pub fn new(volatile_bytes: u64, flags: SetPartitionFlags) -> Result<Self, CodecError> {
        if !volatile_bytes.is_aligned_to(CAPACITY_MULTIPLIER) {
            return Err(CodecError::Invalid(
                "volatile size is not a multiple of the capacity unit",
            ));
        }
        Ok(SetPartition {
            volatile_capacity: (volatile_bytes / CAPACITY_MULTIPLIER).into(),
            flags: flags.bits(),
        })
    }
}
