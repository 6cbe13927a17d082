//! Firmware update records (Get FW Info 0x0200, Transfer FW 0x0201, Activate FW 0x0202).

use super::{CodecError, Record, fixed_str, get_bits, le_accessors, wire_record};
use alloc::vec::Vec;
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::{endian::LittleEndian32, num::AlignableTo};

pub const FW_SLOT_COUNT: usize = 4;
pub const FW_REVISION_LENGTH: usize = 0x10;
/// Transfer offsets are carried in units of this many bytes.
pub const FW_TRANSFER_ALIGNMENT: u64 = 0x80;

// region: slot_info bit-fields
pub const FW_SLOT_ACTIVE_MASK: u32 = 0x7;
pub const FW_SLOT_ACTIVE_SHIFT: u32 = 0;
pub const FW_SLOT_STAGED_MASK: u32 = 0x7;
pub const FW_SLOT_STAGED_SHIFT: u32 = 3;
// endregion

wire_record! {
    pub struct FwInfo {
        pub slots_supported: u8,
        pub slot_info: u8,
        pub activation_caps: u8,
        pub rsvd: [u8; 13],
        pub slot_revisions: [[u8; FW_REVISION_LENGTH]; FW_SLOT_COUNT],
    } = 80;
}

bitflags! {
    pub struct ActivationCaps: u8 {
        const ONLINE = 1 << 0;
    }
}

impl FwInfo {
    /// Active slot, 1-based; 0 if the device reports none.
    pub fn active_slot(&self) -> u8 {
        get_bits(
            self.slot_info as u32,
            FW_SLOT_ACTIVE_MASK,
            FW_SLOT_ACTIVE_SHIFT,
        ) as u8
    }

    /// Slot to activate on the next reset, 1-based; 0 if none is staged.
    pub fn staged_slot(&self) -> u8 {
        get_bits(
            self.slot_info as u32,
            FW_SLOT_STAGED_MASK,
            FW_SLOT_STAGED_SHIFT,
        ) as u8
    }

    pub fn activation_caps(&self) -> ActivationCaps {
        ActivationCaps::from_bits_truncate(self.activation_caps)
    }

    pub fn online_activation(&self) -> bool {
        self.activation_caps().contains(ActivationCaps::ONLINE)
    }

    /// Revision string of a 1-based `slot`; empty slots yield an empty string.
    pub fn revision(&self, slot: u8) -> Result<&str, CodecError> {
        let idx = (slot as usize)
            .checked_sub(1)
            .filter(|i| *i < FW_SLOT_COUNT.min(self.slots_supported as usize))
            .ok_or(CodecError::Invalid("firmware slot out of range"))?;
        fixed_str(&self.slot_revisions[idx])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TransferAction {
    FullTransfer = 0,
    Initiate = 1,
    Continue = 2,
    End = 3,
    Abort = 4,
}

wire_record! {
    /// Fixed part of Transfer FW; the firmware chunk follows it.
    pub struct TransferFwHeader {
        pub action: u8,
        pub slot: u8,
        pub rsvd: [u8; 2],
        pub offset: LittleEndian32,
        pub rsvd2: [u8; 0x78],
    } = 128;
}

le_accessors!(TransferFwHeader { offset: u32 });

/// Build a Transfer FW payload carrying `data` at byte `offset` of the image.
pub fn encode_transfer(
    action: TransferAction,
    slot: u8,
    offset: u64,
    data: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if !offset.is_aligned_to(FW_TRANSFER_ALIGNMENT) {
        return Err(CodecError::Invalid("firmware offset is not 128-byte aligned"));
    }
    let units = u32::try_from(offset / FW_TRANSFER_ALIGNMENT)
        .map_err(|_| CodecError::Invalid("firmware offset too large"))?;
    let mut header = TransferFwHeader::zeroed();
    header.action = action.into();
    header.slot = slot;
    header.set_offset(units);
    let mut out = Vec::with_capacity(TransferFwHeader::SIZE + data.len());
    header.encode_into(&mut out);
    out.extend_from_slice(data);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ActivateAction {
    Online = 0,
    OnReset = 1,
}

wire_record! {
    pub struct ActivateFw {
        pub action: u8,
        pub slot: u8,
    } = 2;
}

impl ActivateFw {
    pub fn new(action: ActivateAction, slot: u8) -> Self {
        ActivateFw {
            action: action.into(),
            slot,
        }
    }
}
