//! Mailbox commands: the catalogue of known commands, the per-device support table, and the
//! shared [Command] object that carries one exchange.

mod builder;
mod cmd;

pub use cmd::{Command, OutputView};

use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};

/// Commands known to the library, numbered as the kernel's command-support table numbers
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum CommandId {
    #[default]
    Invalid = 0,
    Identify,
    Raw,
    GetSupportedLogs,
    GetFwInfo,
    GetPartitionInfo,
    GetLsa,
    GetHealthInfo,
    GetLog,
    SetPartitionInfo,
    SetLsa,
    GetAlertConfig,
    SetAlertConfig,
    GetShutdownState,
    SetShutdownState,
    GetPoison,
    InjectPoison,
    ClearPoison,
    GetScanMediaCaps,
    ScanMedia,
    GetScanMedia,
    GetTimestamp,
    GetEventRecords,
    ClearEventRecords,
    TransferFirmware,
    ActivateFirmware,
}

impl CommandId {
    /// Mailbox opcode. Raw commands carry their own and report 0 here.
    pub const fn opcode(self) -> u16 {
        match self {
            CommandId::Invalid | CommandId::Raw => 0,
            CommandId::GetEventRecords => 0x0100,
            CommandId::ClearEventRecords => 0x0101,
            CommandId::GetFwInfo => 0x0200,
            CommandId::TransferFirmware => 0x0201,
            CommandId::ActivateFirmware => 0x0202,
            CommandId::GetTimestamp => 0x0300,
            CommandId::GetSupportedLogs => 0x0400,
            CommandId::GetLog => 0x0401,
            CommandId::Identify => 0x4000,
            CommandId::GetPartitionInfo => 0x4100,
            CommandId::SetPartitionInfo => 0x4101,
            CommandId::GetLsa => 0x4102,
            CommandId::SetLsa => 0x4103,
            CommandId::GetHealthInfo => 0x4200,
            CommandId::GetAlertConfig => 0x4201,
            CommandId::SetAlertConfig => 0x4202,
            CommandId::GetShutdownState => 0x4203,
            CommandId::SetShutdownState => 0x4204,
            CommandId::GetPoison => 0x4300,
            CommandId::InjectPoison => 0x4301,
            CommandId::ClearPoison => 0x4302,
            CommandId::GetScanMediaCaps => 0x4303,
            CommandId::ScanMedia => 0x4304,
            CommandId::GetScanMedia => 0x4305,
        }
    }

    /// `(input, output)` payload sizes; `None` is variable, bounded by the device's payload
    /// maximum.
    pub const fn payload_sizes(self) -> (Option<usize>, Option<usize>) {
        match self {
            CommandId::Invalid => (Some(0), Some(0)),
            CommandId::Raw => (None, None),
            CommandId::Identify => (Some(0), Some(67)),
            CommandId::GetSupportedLogs => (Some(0), None),
            CommandId::GetFwInfo => (Some(0), Some(80)),
            CommandId::GetPartitionInfo => (Some(0), Some(32)),
            CommandId::GetLsa => (Some(8), None),
            CommandId::GetHealthInfo => (Some(0), Some(18)),
            CommandId::GetLog => (Some(24), None),
            CommandId::SetPartitionInfo => (Some(9), Some(0)),
            CommandId::SetLsa => (None, Some(0)),
            CommandId::GetAlertConfig => (Some(0), Some(16)),
            CommandId::SetAlertConfig => (Some(12), Some(0)),
            CommandId::GetShutdownState => (Some(0), Some(1)),
            CommandId::SetShutdownState => (Some(1), Some(0)),
            CommandId::GetPoison => (Some(16), None),
            CommandId::InjectPoison => (Some(8), Some(0)),
            CommandId::ClearPoison => (Some(72), Some(0)),
            CommandId::GetScanMediaCaps => (Some(16), Some(4)),
            CommandId::ScanMedia => (Some(17), Some(0)),
            CommandId::GetScanMedia => (Some(0), None),
            CommandId::GetTimestamp => (Some(0), Some(8)),
            CommandId::GetEventRecords => (Some(1), None),
            CommandId::ClearEventRecords => (None, Some(0)),
            CommandId::TransferFirmware => (None, Some(0)),
            CommandId::ActivateFirmware => (Some(2), Some(0)),
        }
    }
}

/// Outcome of looking a command up in its device's support table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    NotRun,
    Ok,
    Unsupported,
}

bitflags! {
    pub struct CommandFlags: u32 {
        const ENABLED   = 1 << 0;
        /// Reserved for kernel use while the kernel owns the command.
        const EXCLUSIVE = 1 << 1;
    }
}

/// One entry of a device's command-support table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    pub id: CommandId,
    pub flags: CommandFlags,
    /// Input size the device accepts; `None` for variable.
    pub size_in: Option<usize>,
    pub size_out: Option<usize>,
}

impl CommandInfo {
    /// Entry advertising `id` with its catalogue sizes.
    pub fn new(id: CommandId) -> Self {
        let (size_in, size_out) = id.payload_sizes();
        CommandInfo {
            id,
            flags: CommandFlags::ENABLED,
            size_in,
            size_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_table_order() {
        assert_eq!(u32::from(CommandId::Identify), 1);
        assert_eq!(u32::from(CommandId::ActivateFirmware), 25);
        assert_eq!(CommandId::from(22u32), CommandId::GetEventRecords);
        assert_eq!(CommandId::from(999u32), CommandId::Invalid);
    }

    #[test]
    fn test_fixed_sizes_match_records() {
        use crate::record::{Record, alert, firmware, health, identify, partition, poison};
        let out = |id: CommandId| id.payload_sizes().1;
        let input = |id: CommandId| id.payload_sizes().0;
        assert_eq!(out(CommandId::Identify), Some(identify::Identify::SIZE));
        assert_eq!(out(CommandId::GetFwInfo), Some(firmware::FwInfo::SIZE));
        assert_eq!(out(CommandId::GetHealthInfo), Some(health::HealthInfo::SIZE));
        assert_eq!(out(CommandId::GetAlertConfig), Some(alert::GetAlertConfig::SIZE));
        assert_eq!(input(CommandId::SetAlertConfig), Some(alert::SetAlertConfig::SIZE));
        assert_eq!(out(CommandId::GetPartitionInfo), Some(partition::GetPartition::SIZE));
        assert_eq!(input(CommandId::SetPartitionInfo), Some(partition::SetPartition::SIZE));
        assert_eq!(input(CommandId::GetPoison), Some(poison::PoisonListIn::SIZE));
        assert_eq!(input(CommandId::ClearPoison), Some(poison::ClearPoisonIn::SIZE));
        assert_eq!(input(CommandId::ActivateFirmware), Some(firmware::ActivateFw::SIZE));
    }
}
