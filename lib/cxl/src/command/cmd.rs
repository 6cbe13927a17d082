use super::{CommandFlags, CommandId, CommandInfo, QueryStatus};
use crate::{
    error::{Error, Result},
    record::{
        Record,
        alert::GetAlertConfig,
        event::EventRecords,
        firmware::FwInfo,
        health::HealthInfo,
        identify::Identify,
        partition::GetPartition,
        poison::PoisonList,
    },
    topology::MemdevId,
    transport::{SendRequest, SendResponse},
};
use alloc::{boxed::Box, vec};
use core::ops::Deref;
use spin::{Mutex, MutexGuard};
use utils::handle::Handle;

/// Mutable half of a command, guarded so that holders on different threads may look at it.
pub(crate) struct Exchange {
    pub(crate) query_status: QueryStatus,
    pub(crate) query_idx: Option<usize>,
    input: Box<[u8]>,
    input_len: usize,
    output: Box<[u8]>,
    output_len: usize,
    status: Option<u32>,
}

impl Exchange {
    /// Request view for the transport: the filled input and the whole output buffer.
    pub(crate) fn request(&mut self, id: CommandId, opcode: u16) -> SendRequest<'_> {
        SendRequest {
            id,
            opcode,
            input: &self.input[..self.input_len],
            output: &mut self.output[..],
        }
    }

    pub(crate) fn complete(&mut self, resp: SendResponse) {
        self.output_len = resp.size_out.min(self.output.len());
        self.status = Some(resp.retval);
    }
}

pub(crate) struct CommandState {
    memdev: MemdevId,
    id: CommandId,
    opcode: u16,
    exchange: Mutex<Exchange>,
}

/// One exchange with one memory device.
///
/// Cloning acquires another reference to the same command; dropping (or [Command::release])
/// gives one up. The payload buffers are freed with the last reference.
#[derive(Clone)]
pub struct Command {
    inner: Handle<CommandState>,
}

impl core::fmt::Debug for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Command")
            .field("memdev", &self.inner.memdev)
            .field("id", &self.inner.id)
            .field("opcode", &format_args!("{:#06x}", self.inner.opcode))
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Command {
    /// Allocate a command for `memdev`, whose mailbox moves at most `payload_max` bytes.
    pub(crate) fn new(
        memdev: MemdevId,
        id: CommandId,
        opcode: u16,
        payload_max: usize,
    ) -> Result<Command> {
        let (size_in, size_out) = id.payload_sizes();
        let size_in = size_in.unwrap_or(payload_max);
        let size_out = size_out.unwrap_or(payload_max);
        if size_in > payload_max || size_out > payload_max {
            return Err(Error::InvalidArgument(
                "command payload exceeds device maximum",
            ));
        }
        let exchange = Exchange {
            query_status: QueryStatus::NotRun,
            query_idx: None,
            input: vec![0u8; size_in].into_boxed_slice(),
            input_len: 0,
            output: vec![0u8; size_out].into_boxed_slice(),
            output_len: 0,
            status: None,
        };
        Ok(Command {
            inner: Handle::from(CommandState {
                memdev,
                id,
                opcode,
                exchange: Mutex::new(exchange),
            }),
        })
    }

    pub fn memdev(&self) -> MemdevId {
        self.inner.memdev
    }

    pub fn id(&self) -> CommandId {
        self.inner.id
    }

    pub fn opcode(&self) -> u16 {
        self.inner.opcode
    }

    /// Take another reference.
    pub fn acquire(&self) -> Command {
        self.clone()
    }

    /// Give up this reference.
    pub fn release(self) {}

    pub fn ref_count(&self) -> usize {
        self.inner.strong_count()
    }

    pub fn query_status(&self) -> QueryStatus {
        self.inner.exchange.lock().query_status
    }

    /// Index of this command in its device's support table, once queried.
    pub fn query_index(&self) -> Option<usize> {
        self.inner.exchange.lock().query_idx
    }

    pub fn input_capacity(&self) -> usize {
        self.inner.exchange.lock().input.len()
    }

    pub fn output_capacity(&self) -> usize {
        self.inner.exchange.lock().output.len()
    }

    /// Copy an encoded payload into the input buffer.
    pub fn set_input(&self, bytes: &[u8]) -> Result<()> {
        let mut ex = self.inner.exchange.lock();
        if bytes.len() > ex.input.len() {
            return Err(Error::InvalidArgument("input exceeds command capacity"));
        }
        ex.input[..bytes.len()].copy_from_slice(bytes);
        ex.input[bytes.len()..].fill(0);
        ex.input_len = bytes.len();
        Ok(())
    }

    pub(crate) fn set_record<R: Record>(&self, record: &R) -> Result<()> {
        self.set_input(record.as_bytes())
    }

    /// Device status of the last completed submit.
    pub fn status(&self) -> Option<u32> {
        self.inner.exchange.lock().status
    }

    /// Look the command up in its device's support table.
    pub(crate) fn apply_query(&self, table: &[CommandInfo]) -> QueryStatus {
        let mut ex = self.inner.exchange.lock();
        let found = table.iter().position(|info| info.id == self.inner.id);
        ex.query_idx = found;
        ex.query_status = match found {
            Some(idx) if table[idx].flags.contains(CommandFlags::ENABLED) => QueryStatus::Ok,
            _ => QueryStatus::Unsupported,
        };
        ex.query_status
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Exchange> {
        self.inner.exchange.lock()
    }

    /// The bytes the device returned.
    ///
    /// Fails if the command was never submitted or the device reported an error. The view
    /// holds the command's lock until dropped.
    pub fn output(&self) -> Result<OutputView<'_>> {
        let guard = self.inner.exchange.lock();
        match guard.status {
            None => Err(Error::InvalidArgument("command was not submitted")),
            Some(0) => Ok(OutputView { guard }),
            Some(status) => Err(Error::Device(status)),
        }
    }

    fn decode_output<R: Record>(&self, expect: CommandId) -> Result<R> {
        if self.inner.id != expect {
            return Err(Error::InvalidArgument("command has a different kind"));
        }
        Ok(R::decode(&self.output()?)?)
    }

    pub fn identify(&self) -> Result<Identify> {
        self.decode_output(CommandId::Identify)
    }

    pub fn health_info(&self) -> Result<HealthInfo> {
        self.decode_output(CommandId::GetHealthInfo)
    }

    pub fn alert_config(&self) -> Result<GetAlertConfig> {
        self.decode_output(CommandId::GetAlertConfig)
    }

    pub fn partition(&self) -> Result<GetPartition> {
        self.decode_output(CommandId::GetPartitionInfo)
    }

    pub fn fw_info(&self) -> Result<FwInfo> {
        self.decode_output(CommandId::GetFwInfo)
    }

    pub fn poison_list(&self) -> Result<PoisonList> {
        self.expect(CommandId::GetPoison)?;
        Ok(PoisonList::decode(&self.output()?)?)
    }

    pub fn event_records(&self) -> Result<EventRecords> {
        self.expect(CommandId::GetEventRecords)?;
        Ok(EventRecords::decode(&self.output()?)?)
    }

    /// Label bytes read by a Get LSA command.
    pub fn label_data(&self) -> Result<OutputView<'_>> {
        self.expect(CommandId::GetLsa)?;
        self.output()
    }

    fn expect(&self, id: CommandId) -> Result<()> {
        if self.inner.id == id {
            Ok(())
        } else {
            Err(Error::InvalidArgument("command has a different kind"))
        }
    }

    #[cfg(test)]
    pub(crate) fn watch(&self) -> utils::handle::HandleRef<CommandState> {
        self.inner.create_ref()
    }
}

/// Read view over a command's output, sized to what the device returned.
pub struct OutputView<'a> {
    guard: MutexGuard<'a, Exchange>,
}

impl Deref for OutputView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.output[..self.guard.output_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MemdevId;
    use alloc::vec::Vec;
    use std::thread;

    fn cmd(id: CommandId) -> Command {
        Command::new(MemdevId::dangling(), id, id.opcode(), 0x100).unwrap()
    }

    #[test]
    fn test_buffers_sized_per_kind() {
        let identify = cmd(CommandId::Identify);
        assert_eq!(identify.input_capacity(), 0);
        assert_eq!(identify.output_capacity(), 67);
        let lsa = cmd(CommandId::SetLsa);
        assert_eq!(lsa.input_capacity(), 0x100);
        assert_eq!(lsa.output_capacity(), 0);
        assert!(Command::new(MemdevId::dangling(), CommandId::ClearPoison, 0x4302, 64).is_err());
    }

    #[test]
    fn test_set_input_bounds() {
        let c = cmd(CommandId::ActivateFirmware);
        assert!(c.set_input(&[1, 2]).is_ok());
        assert_eq!(
            c.set_input(&[1, 2, 3]),
            Err(Error::InvalidArgument("input exceeds command capacity"))
        );
    }

    #[test]
    fn test_output_before_submit() {
        let c = cmd(CommandId::Identify);
        assert!(matches!(c.output(), Err(Error::InvalidArgument(_))));
        assert!(matches!(c.identify(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_device_error_blocks_output() {
        let c = cmd(CommandId::GetHealthInfo);
        c.lock().complete(SendResponse {
            retval: 0x19,
            size_out: 0,
        });
        assert_eq!(c.status(), Some(0x19));
        assert!(matches!(c.output(), Err(Error::Device(0x19))));
    }

    #[test]
    fn test_wrong_kind_accessor() {
        let c = cmd(CommandId::GetHealthInfo);
        c.lock().complete(SendResponse {
            retval: 0,
            size_out: 18,
        });
        assert!(c.health_info().is_ok());
        assert!(matches!(c.identify(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_query_marks_unsupported() {
        let c = cmd(CommandId::GetPoison);
        let table = [CommandInfo::new(CommandId::Identify)];
        assert_eq!(c.apply_query(&table), QueryStatus::Unsupported);
        let mut disabled = CommandInfo::new(CommandId::GetPoison);
        disabled.flags = CommandFlags::empty();
        assert_eq!(c.apply_query(&[disabled]), QueryStatus::Unsupported);
        let table = [
            CommandInfo::new(CommandId::Identify),
            CommandInfo::new(CommandId::GetPoison),
        ];
        assert_eq!(c.apply_query(&table), QueryStatus::Ok);
        assert_eq!(c.query_index(), Some(1));
    }

    #[test]
    fn test_release_across_threads() {
        let c = cmd(CommandId::GetLsa);
        let watch = c.watch();
        let holders: Vec<_> = (0..8).map(|_| c.acquire()).collect();
        assert_eq!(c.ref_count(), 9);
        let joins: Vec<_> = holders
            .into_iter()
            .map(|h| {
                thread::spawn(move || {
                    let again = h.acquire();
                    h.release();
                    again.release();
                })
            })
            .collect();
        for j in joins {
            j.join().unwrap();
        }
        assert!(!watch.is_dropped());
        assert_eq!(c.ref_count(), 1);
        c.release();
        assert!(watch.is_dropped());
    }
}
