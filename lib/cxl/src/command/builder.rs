//! Command constructors, submission, and the label-storage helpers built on them.

use super::{Command, CommandId, QueryStatus};
use crate::{
    config::POISON_LENGTH_UNIT,
    error::{Error, Result},
    record::{
        alert::SetAlertConfig,
        event::{EventLogType, GetEventRecordsIn, encode_clear_event_records},
        firmware::{ActivateAction, ActivateFw, TransferAction, encode_transfer},
        lsa::{GetLsaIn, SetLsaHeader, encode_set_lsa},
        partition::{SetPartition, SetPartitionFlags},
        poison::{ClearPoisonIn, PoisonListIn},
        Record,
    },
    topology::{Context, Enumerator, Memdev, MemdevId},
    transport::Transport,
};
use alloc::vec;
use log::warn;
use utils::debug_ex;

impl<E: Enumerator, T: Transport> Context<E, T> {
    fn alloc_command(&self, memdev: MemdevId, id: CommandId) -> Result<Command> {
        let dev = self.memdev(memdev)?;
        Command::new(memdev, id, id.opcode(), dev.payload_max)
    }

    // region: constructors
    pub fn new_identify(&self, memdev: MemdevId) -> Result<Command> {
        self.alloc_command(memdev, CommandId::Identify)
    }

    pub fn new_get_health_info(&self, memdev: MemdevId) -> Result<Command> {
        self.alloc_command(memdev, CommandId::GetHealthInfo)
    }

    pub fn new_get_alert_config(&self, memdev: MemdevId) -> Result<Command> {
        self.alloc_command(memdev, CommandId::GetAlertConfig)
    }

    pub fn new_set_alert_config(&self, memdev: MemdevId, config: &SetAlertConfig) -> Result<Command> {
        let cmd = self.alloc_command(memdev, CommandId::SetAlertConfig)?;
        cmd.set_record(config)?;
        Ok(cmd)
    }

    pub fn new_get_partition(&self, memdev: MemdevId) -> Result<Command> {
        self.alloc_command(memdev, CommandId::GetPartitionInfo)
    }

    /// Repartition so that `volatile_bytes` are volatile and the rest persistent.
    pub fn new_set_partition(
        &self,
        memdev: MemdevId,
        volatile_bytes: u64,
        flags: SetPartitionFlags,
    ) -> Result<Command> {
        let record = SetPartition::new(volatile_bytes, flags)?;
        let cmd = self.alloc_command(memdev, CommandId::SetPartitionInfo)?;
        cmd.set_record(&record)?;
        Ok(cmd)
    }

    /// Read `length` label bytes at `offset`. The output is sized to the device payload
    /// maximum, so `length` must fit in it.
    pub fn new_read_label(&self, memdev: MemdevId, offset: usize, length: usize) -> Result<Command> {
        let dev = self.memdev(memdev)?;
        check_label_range(dev, offset, length)?;
        if length > dev.payload_max {
            return Err(Error::InvalidArgument("label read exceeds payload maximum"));
        }
        let cmd = self.alloc_command(memdev, CommandId::GetLsa)?;
        cmd.set_record(&GetLsaIn::new(label_u32(offset)?, label_u32(length)?))?;
        Ok(cmd)
    }

    pub fn new_write_label(&self, memdev: MemdevId, offset: usize, data: &[u8]) -> Result<Command> {
        let dev = self.memdev(memdev)?;
        check_label_range(dev, offset, data.len())?;
        let cmd = self.alloc_command(memdev, CommandId::SetLsa)?;
        cmd.set_input(&encode_set_lsa(label_u32(offset)?, data))?;
        Ok(cmd)
    }

    /// List poison in `length` bytes of device physical address space from `address`.
    /// `length` must be a multiple of [POISON_LENGTH_UNIT].
    pub fn new_get_poison(&self, memdev: MemdevId, address: u64, length: u64) -> Result<Command> {
        if length % POISON_LENGTH_UNIT != 0 {
            return Err(Error::InvalidArgument("poison length is not a multiple of 64"));
        }
        let cmd = self.alloc_command(memdev, CommandId::GetPoison)?;
        cmd.set_record(&PoisonListIn::new(address, length / POISON_LENGTH_UNIT))?;
        Ok(cmd)
    }

    pub fn new_clear_poison(&self, memdev: MemdevId, record: &ClearPoisonIn) -> Result<Command> {
        let cmd = self.alloc_command(memdev, CommandId::ClearPoison)?;
        cmd.set_record(record)?;
        Ok(cmd)
    }

    pub fn new_get_event_records(&self, memdev: MemdevId, log: EventLogType) -> Result<Command> {
        let cmd = self.alloc_command(memdev, CommandId::GetEventRecords)?;
        cmd.set_record(&GetEventRecordsIn::new(log))?;
        Ok(cmd)
    }

    /// Clear `handles` from `log`; an empty list clears the whole log.
    pub fn new_clear_event_records(
        &self,
        memdev: MemdevId,
        log: EventLogType,
        handles: &[u16],
    ) -> Result<Command> {
        let payload = encode_clear_event_records(log, handles)?;
        let cmd = self.alloc_command(memdev, CommandId::ClearEventRecords)?;
        cmd.set_input(&payload)?;
        Ok(cmd)
    }

    pub fn new_get_fw_info(&self, memdev: MemdevId) -> Result<Command> {
        self.alloc_command(memdev, CommandId::GetFwInfo)
    }

    pub fn new_transfer_firmware(
        &self,
        memdev: MemdevId,
        action: TransferAction,
        slot: u8,
        offset: u64,
        data: &[u8],
    ) -> Result<Command> {
        let payload = encode_transfer(action, slot, offset, data)?;
        let cmd = self.alloc_command(memdev, CommandId::TransferFirmware)?;
        cmd.set_input(&payload)?;
        Ok(cmd)
    }

    pub fn new_activate_firmware(
        &self,
        memdev: MemdevId,
        action: ActivateAction,
        slot: u8,
    ) -> Result<Command> {
        let cmd = self.alloc_command(memdev, CommandId::ActivateFirmware)?;
        cmd.set_record(&ActivateFw::new(action, slot))?;
        Ok(cmd)
    }

    /// A command the library has no builder for. Both buffers are sized to the device
    /// payload maximum.
    pub fn new_raw(&self, memdev: MemdevId, opcode: u16, input: &[u8]) -> Result<Command> {
        let dev = self.memdev(memdev)?;
        let cmd = Command::new(memdev, CommandId::Raw, opcode, dev.payload_max)?;
        cmd.set_input(input)?;
        Ok(cmd)
    }
    // endregion

    /// Look `cmd` up in its device's support table. The result sticks to the command.
    pub fn query_command(&self, cmd: &Command) -> Result<QueryStatus> {
        match cmd.query_status() {
            QueryStatus::NotRun => Ok(cmd.apply_query(self.memdev_commands(cmd.memdev())?)),
            status => Ok(status),
        }
    }

    /// Send `cmd` to its device and wait for it.
    ///
    /// The device's support table is consulted first; a command the device does not
    /// support never reaches the transport.
    pub fn submit(&self, cmd: &Command) -> Result<()> {
        let dev = self.memdev(cmd.memdev())?;
        if self.modules.is_some() {
            self.ensure_memdev_module(cmd.memdev())?;
        }
        if self.query_command(cmd)? == QueryStatus::Unsupported {
            debug_ex!("{}: {:?} not supported", dev.name, cmd.id());
            return Err(Error::NotSupported);
        }

        let mut exchange = cmd.lock();
        let resp = self
            .transport
            .send(dev, exchange.request(cmd.id(), cmd.opcode()))
            .map_err(|err| {
                warn!("{}: opcode {:#06x} send failed: {:?}", dev.name, cmd.opcode(), err);
                Error::Transport(err)
            })?;
        exchange.complete(resp);
        drop(exchange);

        debug_ex!(
            "{}: opcode {:#06x} status {:#x} size_out {}",
            dev.name,
            cmd.opcode(),
            resp.retval,
            resp.size_out
        );
        match resp.retval {
            0 => Ok(()),
            status => {
                warn!("{}: opcode {:#06x} failed with status {:#x}", dev.name, cmd.opcode(), status);
                Err(Error::Device(status))
            }
        }
    }

    // region: label storage
    fn label_chunk(&self, dev: &Memdev) -> Result<usize> {
        let chunk = dev
            .payload_max
            .saturating_sub(SetLsaHeader::SIZE)
            .min(self.config.label_chunk_size);
        match chunk {
            0 => Err(Error::InvalidArgument("payload maximum too small for label access")),
            chunk => Ok(chunk),
        }
    }

    /// Fill `buf` from the label storage area at `offset`, one chunk per command.
    pub fn read_label(&self, memdev: MemdevId, buf: &mut [u8], offset: usize) -> Result<()> {
        let dev = self.memdev(memdev)?;
        check_label_range(dev, offset, buf.len())?;
        let chunk = self.label_chunk(dev)?;
        for (i, part) in buf.chunks_mut(chunk).enumerate() {
            let cmd = self.new_read_label(memdev, offset + i * chunk, part.len())?;
            self.submit(&cmd)?;
            let data = cmd.label_data()?;
            if data.len() < part.len() {
                return Err(Error::InvalidArgument("device returned a short label read"));
            }
            part.copy_from_slice(&data[..part.len()]);
        }
        Ok(())
    }

    /// Write `data` to the label storage area at `offset`. Stops at the first chunk that
    /// fails; earlier chunks stay written.
    pub fn write_label(&self, memdev: MemdevId, data: &[u8], offset: usize) -> Result<()> {
        let dev = self.memdev(memdev)?;
        check_label_range(dev, offset, data.len())?;
        let chunk = self.label_chunk(dev)?;
        for (i, part) in data.chunks(chunk).enumerate() {
            let cmd = self.new_write_label(memdev, offset + i * chunk, part)?;
            self.submit(&cmd)?;
        }
        Ok(())
    }

    /// Zero `length` label bytes at `offset`.
    pub fn zero_label(&self, memdev: MemdevId, offset: usize, length: usize) -> Result<()> {
        let dev = self.memdev(memdev)?;
        check_label_range(dev, offset, length)?;
        let zeros = vec![0u8; length];
        self.write_label(memdev, &zeros, offset)
    }
    // endregion
}

fn check_label_range(dev: &Memdev, offset: usize, length: usize) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= dev.lsa_size => Ok(()),
        _ => Err(Error::InvalidArgument("label range exceeds label storage")),
    }
}

fn label_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidArgument("label offset out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ContextConfig,
        record::alert::AlertMask,
        testing::{MockFabric, MockModules, MockTransport, context, fabric, memdev_node},
        transport::TransportError,
    };
    use alloc::{string::String, vec::Vec};

    fn identify_bytes() -> Vec<u8> {
        let mut raw = vec![0u8; 67];
        raw[..6].copy_from_slice(b"fw-2.0");
        raw[16..24].copy_from_slice(&2u64.to_le_bytes());
        raw
    }

    fn with_transport(transport: MockTransport) -> Context<MockFabric, MockTransport> {
        Context::new(fabric(), transport, ContextConfig::default())
    }

    #[test]
    fn test_submit_identify() {
        let mut transport = MockTransport::default();
        transport.replies.insert(0x4000, (0, identify_bytes()));
        let mut ctx = with_transport(transport);
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();

        let cmd = ctx.new_identify(mem0).unwrap();
        assert_eq!(cmd.status(), None);
        ctx.submit(&cmd).unwrap();
        assert_eq!(cmd.query_status(), QueryStatus::Ok);
        assert_eq!(cmd.status(), Some(0));
        let id = cmd.identify().unwrap();
        assert_eq!(id.fw_revision_str().unwrap(), "fw-2.0");
        assert_eq!(id.total_bytes().unwrap(), 2 << 28);

        // the support table is fetched once per device
        let again = ctx.new_get_health_info(mem0).unwrap();
        ctx.submit(&again).unwrap();
        assert_eq!(ctx.transport().queries.get(), 1);
        assert_eq!(ctx.transport().sent.borrow().len(), 2);
    }

    #[test]
    fn test_unsupported_never_sent() {
        let mut ctx = context();
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        let cmd = ctx.new_get_fw_info(mem0).unwrap();
        assert_eq!(cmd.query_status(), QueryStatus::NotRun);
        assert_eq!(ctx.query_command(&cmd), Ok(QueryStatus::Unsupported));
        assert_eq!(ctx.submit(&cmd), Err(Error::NotSupported));
        assert_eq!(cmd.query_status(), QueryStatus::Unsupported);
        assert_eq!(ctx.submit(&cmd), Err(Error::NotSupported));
        assert!(ctx.transport().sent.borrow().is_empty());
        assert_eq!(cmd.status(), None);
    }

    #[test]
    fn test_device_and_transport_failures() {
        let mut transport = MockTransport::default();
        transport.replies.insert(0x4200, (0x19, Vec::new()));
        let mut ctx = with_transport(transport);
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();

        let cmd = ctx.new_get_health_info(mem0).unwrap();
        assert_eq!(ctx.submit(&cmd), Err(Error::Device(0x19)));
        assert_eq!(cmd.status(), Some(0x19));
        assert!(matches!(cmd.health_info(), Err(Error::Device(0x19))));

        ctx.transport().fail.set(true);
        let cmd = ctx.new_identify(mem0).unwrap();
        assert_eq!(
            ctx.submit(&cmd),
            Err(Error::Transport(TransportError::Io(5)))
        );
        assert_eq!(cmd.status(), None);
    }

    #[test]
    fn test_submit_after_memdev_removed() {
        let mut ctx = context();
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        let cmd = ctx.new_identify(mem0).unwrap();
        ctx.enumerator_mut().memdevs.remove(0);
        ctx.refresh_memdevs().unwrap();
        assert_eq!(ctx.submit(&cmd), Err(Error::NotFound));
        assert_eq!(ctx.new_identify(mem0).map(|_| ()), Err(Error::NotFound));
    }

    #[test]
    fn test_label_round_trip() {
        let mut ctx = context();
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        ctx.write_label(mem0, &data, 100).unwrap();
        // payload_max 0x100 leaves 248 data bytes per Set LSA
        assert_eq!(ctx.transport().sent.borrow().len(), 3);
        assert_eq!(&ctx.transport().label.borrow()[100..700], &data[..]);

        let mut back = vec![0u8; 600];
        ctx.read_label(mem0, &mut back, 100).unwrap();
        assert_eq!(back, data);

        ctx.zero_label(mem0, 100, 300).unwrap();
        ctx.read_label(mem0, &mut back, 100).unwrap();
        assert!(back[..300].iter().all(|b| *b == 0));
        assert_eq!(&back[300..], &data[300..]);
    }

    #[test]
    fn test_label_bounds() {
        let mut ctx = context();
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        let mut buf = [0u8; 20];
        assert_eq!(
            ctx.read_label(mem0, &mut buf, crate::testing::LSA_SIZE - 10),
            Err(Error::InvalidArgument("label range exceeds label storage"))
        );
        assert!(ctx.write_label(mem0, &buf, usize::MAX).is_err());
        assert!(ctx.new_read_label(mem0, 0, 0x200).is_err());
        assert!(ctx.transport().sent.borrow().is_empty());
    }

    #[test]
    fn test_poison_request_units() {
        let mut ctx = context();
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        assert!(ctx.new_get_poison(mem0, 0x1000, 100).is_err());
        let cmd = ctx.new_get_poison(mem0, 0x1007, 0x80).unwrap();
        ctx.submit(&cmd).unwrap();
        let sent = ctx.transport().sent.borrow();
        assert_eq!(sent[0].0, 0x4300);
        assert_eq!(sent[0].1, PoisonListIn::new(0x1000, 2).as_bytes());
    }

    #[test]
    fn test_builders_encode_input() {
        let mut ctx = context();
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        let config = SetAlertConfig::new()
            .enable(AlertMask::LIFE_USED, 90)
            .unwrap();
        let cmd = ctx.new_set_alert_config(mem0, &config).unwrap();
        assert_eq!(cmd.id(), CommandId::SetAlertConfig);
        assert_eq!(cmd.opcode(), 0x4202);

        assert!(matches!(
            ctx.new_set_partition(mem0, 0x1000, SetPartitionFlags::empty()),
            Err(Error::Codec(_))
        ));
        assert!(
            ctx.new_set_partition(mem0, 0x1000_0000, SetPartitionFlags::IMMEDIATE)
                .is_ok()
        );
        assert!(
            ctx.new_clear_event_records(mem0, EventLogType::Fatal, &[1, 2, 3])
                .is_ok()
        );
        assert!(matches!(
            ctx.new_transfer_firmware(mem0, TransferAction::Continue, 1, 0x81, &[0; 4]),
            Err(Error::Codec(_))
        ));
        assert!(
            ctx.new_activate_firmware(mem0, ActivateAction::OnReset, 2)
                .is_ok()
        );
        // 72-byte clear-poison payload does not fit a 64-byte mailbox
        let mut fabric = fabric();
        fabric.memdevs[0] = fabric.memdevs[0].clone().with("payload_max", "64");
        let mut small = Context::new(fabric, MockTransport::default(), ContextConfig::default());
        let mem0 = small.find_memdev_by_name("mem0").unwrap().unwrap();
        assert!(small.new_clear_poison(mem0, &ClearPoisonIn::new(0x40)).is_err());
    }

    #[test]
    fn test_raw_command() {
        let mut transport = MockTransport::default();
        transport.replies.insert(0xc000, (0, vec![9, 8, 7]));
        let mut ctx = with_transport(transport);
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        let cmd = ctx.new_raw(mem0, 0xc000, &[1, 2]).unwrap();
        ctx.submit(&cmd).unwrap();
        assert_eq!(&cmd.output().unwrap()[..], &[9, 8, 7]);
        assert_eq!(ctx.transport().sent.borrow()[0], (0xc000, vec![1, 2]));
    }

    #[test]
    fn test_module_loaded_once() {
        let mut fabric = fabric();
        fabric.memdevs[0] = memdev_node(0, "/pci/0000:00:00.0/host0").with("modalias", "cxl:t3\n");
        let modules = MockModules::default();
        let mut ctx = Context::new(fabric, MockTransport::default(), ContextConfig::default())
            .with_module_loader(modules.clone());
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        for _ in 0..2 {
            let cmd = ctx.new_identify(mem0).unwrap();
            ctx.submit(&cmd).unwrap();
        }
        assert!(ctx.memdev(mem0).unwrap().module_loaded());
        assert_eq!(*modules.loaded.lock().unwrap(), vec![String::from("cxl:t3")]);
    }

    #[test]
    fn test_module_needs_loader() {
        let mut fabric = fabric();
        fabric.memdevs[0] = memdev_node(0, "/pci/0000:00:00.0/host0").with("modalias", "cxl:t3\n");
        let mut ctx = Context::new(fabric, MockTransport::default(), ContextConfig::default());
        let mem0 = ctx.find_memdev_by_name("mem0").unwrap().unwrap();
        assert!(matches!(ctx.ensure_memdev_module(mem0), Err(Error::Module(_))));
        let mem1 = ctx.find_memdev_by_name("mem1").unwrap().unwrap();
        assert!(ctx.ensure_memdev_module(mem1).is_ok());
    }
}
