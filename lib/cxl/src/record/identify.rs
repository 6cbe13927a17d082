//! Identify Memory Device (opcode 0x4000) output.

use super::{CodecError, fixed_str, le_accessors, wire_record};
use crate::config::CAPACITY_MULTIPLIER;
use bitflags::bitflags;
use utils::endian::{LittleEndian16, LittleEndian24, LittleEndian32, LittleEndian64};

pub const FW_REVISION_LENGTH: usize = 0x10;

wire_record! {
    pub struct Identify {
        pub fw_revision: [u8; FW_REVISION_LENGTH],
        /// Capacities are counted in [CAPACITY_MULTIPLIER] units.
        pub total_capacity: LittleEndian64,
        pub volatile_capacity: LittleEndian64,
        pub persistent_capacity: LittleEndian64,
        pub partition_align: LittleEndian64,
        pub info_event_log_size: LittleEndian16,
        pub warning_event_log_size: LittleEndian16,
        pub failure_event_log_size: LittleEndian16,
        pub fatal_event_log_size: LittleEndian16,
        pub lsa_size: LittleEndian32,
        pub poison_list_max_mer: LittleEndian24,
        pub inject_poison_limit: LittleEndian16,
        pub poison_caps: u8,
        pub qos_telemetry_caps: u8,
    } = 67;
}

le_accessors!(Identify {
    total_capacity: u64,
    volatile_capacity: u64,
    persistent_capacity: u64,
    partition_align: u64,
    info_event_log_size: u16,
    warning_event_log_size: u16,
    failure_event_log_size: u16,
    fatal_event_log_size: u16,
    lsa_size: u32,
    poison_list_max_mer: u32,
    inject_poison_limit: u16,
    poison_caps: u8,
    qos_telemetry_caps: u8,
});

bitflags! {
    /// Poison handling capabilities (Identify byte 0x42).
    pub struct PoisonCaps: u8 {
        const INJECTS_PERSISTENT_POISON = 1 << 0;
        const SCANS_FOR_POISON          = 1 << 1;
    }
}

bitflags! {
    /// QoS telemetry capabilities (Identify byte 0x43).
    pub struct QosTelemetryCaps: u8 {
        const EGRESS_PORT_CONGESTION         = 1 << 0;
        const TEMPORARY_THROUGHPUT_REDUCTION = 1 << 1;
    }
}

/// Convert a capacity in device units to bytes.
pub fn capacity_to_bytes(units: u64) -> Result<u64, CodecError> {
    units
        .checked_mul(CAPACITY_MULTIPLIER)
        .ok_or(CodecError::Invalid("capacity overflows 64 bits"))
}

impl Identify {
    pub fn fw_revision_str(&self) -> Result<&str, CodecError> {
        fixed_str(&self.fw_revision)
    }

    pub fn total_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.total_capacity())
    }

    pub fn volatile_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.volatile_capacity())
    }

    pub fn persistent_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.persistent_capacity())
    }

    pub fn partition_align_bytes(&self) -> Result<u64, CodecError> {
        capacity_to_bytes(self.partition_align())
    }

    /// Reserved bits are dropped.
    pub fn poison_caps_flags(&self) -> PoisonCaps {
        PoisonCaps::from_bits_truncate(self.poison_caps)
    }

    pub fn qos_telemetry_flags(&self) -> QosTelemetryCaps {
        QosTelemetryCaps::from_bits_truncate(self.qos_telemetry_caps)
    }
}
