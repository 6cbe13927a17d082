//! In-memory stand-ins for the enumeration service, the command transport and the module
//! loader, plus a small two-device fabric to run them against.

use crate::{
    command::{CommandId, CommandInfo},
    config::ContextConfig,
    record::{
        Record,
        lsa::{GetLsaIn, decode_set_lsa},
    },
    topology::{Context, DeviceNode, Enumerator, Memdev},
    transport::{ModuleLoader, SendRequest, SendResponse, Transport, TransportError},
};
use alloc::{boxed::Box, collections::BTreeMap, format, string::String, vec, vec::Vec};
use core::cell::{Cell, RefCell};
use std::sync::{Arc, Mutex};

pub(crate) const ROOT: &str = "/cxl/root0";
pub(crate) const ROOT_DECODER: &str = "/cxl/root0/decoder0.0";
pub(crate) const WINDOW_START: u64 = 0x1_0000_0000;
pub(crate) const WINDOW_SIZE: u64 = 0x4000_0000;
pub(crate) const LSA_SIZE: usize = 0x2000;

#[derive(Debug, Default)]
pub(crate) struct MockFabric {
    pub buses: Vec<DeviceNode>,
    pub memdevs: Vec<DeviceNode>,
    pub child_ports: BTreeMap<String, Vec<DeviceNode>>,
    pub endpoints: BTreeMap<String, Vec<DeviceNode>>,
    pub dports: BTreeMap<String, Vec<DeviceNode>>,
    pub decoders: BTreeMap<String, Vec<DeviceNode>>,
    pub regions: BTreeMap<String, Vec<DeviceNode>>,
    pub mappings: BTreeMap<String, Vec<DeviceNode>>,
    pub fail: bool,
    pub calls: Cell<usize>,
}

impl MockFabric {
    fn list(
        &self,
        map: &BTreeMap<String, Vec<DeviceNode>>,
        parent: &str,
    ) -> Result<Vec<DeviceNode>, &'static str> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err("enumeration unavailable");
        }
        Ok(map.get(parent).cloned().unwrap_or_default())
    }
}

impl Enumerator for MockFabric {
    type TError = &'static str;

    fn buses(&self) -> Result<Vec<DeviceNode>, Self::TError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err("enumeration unavailable");
        }
        Ok(self.buses.clone())
    }

    fn memdevs(&self) -> Result<Vec<DeviceNode>, Self::TError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err("enumeration unavailable");
        }
        Ok(self.memdevs.clone())
    }

    fn child_ports(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError> {
        self.list(&self.child_ports, parent)
    }

    fn endpoints(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError> {
        self.list(&self.endpoints, parent)
    }

    fn dports(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError> {
        self.list(&self.dports, parent)
    }

    fn decoders(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError> {
        self.list(&self.decoders, parent)
    }

    fn regions(&self, decoder: &str) -> Result<Vec<DeviceNode>, Self::TError> {
        self.list(&self.regions, decoder)
    }

    fn mappings(&self, region: &str) -> Result<Vec<DeviceNode>, Self::TError> {
        self.list(&self.mappings, region)
    }
}

/// Replies from a per-opcode table and keeps a label storage area in memory.
#[derive(Debug)]
pub(crate) struct MockTransport {
    pub table: Vec<CommandInfo>,
    pub replies: BTreeMap<u16, (u32, Vec<u8>)>,
    pub fail: Cell<bool>,
    pub sent: RefCell<Vec<(u16, Vec<u8>)>>,
    pub queries: Cell<usize>,
    pub label: RefCell<Vec<u8>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let table = [
            CommandId::Identify,
            CommandId::GetHealthInfo,
            CommandId::GetLsa,
            CommandId::SetLsa,
            CommandId::GetPoison,
            CommandId::Raw,
        ]
        .into_iter()
        .map(CommandInfo::new)
        .collect();
        MockTransport {
            table,
            replies: BTreeMap::new(),
            fail: Cell::new(false),
            sent: RefCell::new(Vec::new()),
            queries: Cell::new(0),
            label: RefCell::new(vec![0u8; LSA_SIZE]),
        }
    }
}

impl Transport for MockTransport {
    fn query_commands(&self, _memdev: &Memdev) -> Result<Vec<CommandInfo>, TransportError> {
        self.queries.set(self.queries.get() + 1);
        Ok(self.table.clone())
    }

    fn send(&self, _memdev: &Memdev, req: SendRequest<'_>) -> Result<SendResponse, TransportError> {
        if self.fail.get() {
            return Err(TransportError::Io(5));
        }
        self.sent.borrow_mut().push((req.opcode, req.input.to_vec()));
        match req.id {
            CommandId::GetLsa => {
                let input = GetLsaIn::decode(req.input).map_err(|_| TransportError::Io(22))?;
                let (offset, length) = (input.offset() as usize, input.length() as usize);
                let label = self.label.borrow();
                req.output[..length].copy_from_slice(&label[offset..offset + length]);
                Ok(SendResponse {
                    retval: 0,
                    size_out: length,
                })
            }
            CommandId::SetLsa => {
                let (header, data) =
                    decode_set_lsa(req.input).map_err(|_| TransportError::Io(22))?;
                let offset = header.offset() as usize;
                self.label.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
                Ok(SendResponse {
                    retval: 0,
                    size_out: 0,
                })
            }
            _ => {
                let (retval, bytes) = self
                    .replies
                    .get(&req.opcode)
                    .cloned()
                    .unwrap_or((0, Vec::new()));
                let len = bytes.len().min(req.output.len());
                req.output[..len].copy_from_slice(&bytes[..len]);
                Ok(SendResponse {
                    retval,
                    size_out: len,
                })
            }
        }
    }
}

/// Counts loads per modalias.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockModules {
    pub loaded: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl ModuleLoader for MockModules {
    fn load(&self, modalias: &str) -> Result<(), Box<str>> {
        if self.fail {
            return Err(Box::from("modprobe failed"));
        }
        self.loaded.lock().unwrap().push(String::from(modalias));
        Ok(())
    }
}

pub(crate) fn memdev_node(instance: u32, host: &str) -> DeviceNode {
    DeviceNode::new(
        format!("mem{}", instance),
        instance,
        format!("/cxl/mem{}", instance),
    )
    .with("major", "250\n")
    .with("minor", format!("{}\n", instance))
    .with("host", host)
    .with("pmem_size", "0x20000000\n")
    .with("ram_size", "0\n")
    .with("label_storage_size", format!("{:#x}\n", LSA_SIZE))
    .with("payload_max", "0x100\n")
    .with("serial", format!("{}\n", 0x1000 + instance))
    .with("numa_node", "-1\n")
}

pub(crate) fn region_node(instance: u32, start: u64, size: u64, state: &str) -> DeviceNode {
    DeviceNode::new(
        format!("region{}", instance),
        instance,
        format!("{}/region{}", ROOT_DECODER, instance),
    )
    .with("uuid", "2f8b7a1c-0d3e-4c5f-9a6b-7c8d9e0f1a2b\n")
    .with("start", format!("{:#x}", start))
    .with("size", format!("{:#x}", size))
    .with("interleave_ways", "2")
    .with("interleave_granularity", "256")
    .with("decode_state", state)
}

/// One bus whose root port has two dports, each leading to one endpoint and its memdev.
/// The root decoder interleaves both; it already holds one committed region.
pub(crate) fn fabric() -> MockFabric {
    let mut fabric = MockFabric::default();
    let hosts = ["/pci/0000:00:00.0/host0", "/pci/0000:00:01.0/host1"];
    fabric.buses.push(
        DeviceNode::new("root0", 0, ROOT).with("uport", "/platform/ACPI0017:00"),
    );
    fabric.dports.insert(
        String::from(ROOT),
        vec![
            DeviceNode::new("dport0", 0, "/pci/0000:00:00.0")
                .with("physical_node", "/pci/0000:00:00.0"),
            DeviceNode::new("dport1", 1, "/pci/0000:00:01.0")
                .with("physical_node", "/pci/0000:00:01.0"),
        ],
    );
    fabric.decoders.insert(
        String::from(ROOT),
        vec![
            DeviceNode::new("decoder0.0", 0, ROOT_DECODER)
                .with("start", format!("{:#x}", WINDOW_START))
                .with("size", format!("{:#x}", WINDOW_SIZE))
                .with("interleave_ways", "2")
                .with("interleave_granularity", "256")
                .with("target_list", "0,1")
                .with("cap_pmem", "1")
                .with("cap_type3", "1")
                .with("target_type", "expander"),
        ],
    );
    let mut endpoints = Vec::new();
    for (i, host) in hosts.iter().enumerate() {
        let instance = i as u32 + 1;
        let path = format!("{}/endpoint{}", ROOT, instance);
        endpoints.push(
            DeviceNode::new(format!("endpoint{}", instance), instance, path.clone())
                .with("uport", host),
        );
        fabric.decoders.insert(
            path.clone(),
            vec![
                DeviceNode::new(
                    format!("decoder{}.0", instance),
                    0,
                    format!("{}/decoder{}.0", path, instance),
                )
                .with("mode", "pmem")
                .with("dpa_resource", "0")
                .with("dpa_size", "0x10000000"),
            ],
        );
        fabric.memdevs.push(memdev_node(i as u32, host));
    }
    fabric.endpoints.insert(String::from(ROOT), endpoints);
    let region = region_node(0, WINDOW_START, 0x1000_0000, "commit");
    fabric.mappings.insert(
        String::from(region.dev_path.as_ref()),
        vec![
            DeviceNode::new("mapping1", 1, "/cxl/root0/decoder0.0/region0/mapping1")
                .with("position", "1")
                .with("decoder", "decoder2.0"),
            DeviceNode::new("mapping0", 0, "/cxl/root0/decoder0.0/region0/mapping0")
                .with("position", "0")
                .with("decoder", "decoder1.0"),
        ],
    );
    fabric.regions.insert(String::from(ROOT_DECODER), vec![region]);
    fabric
}

pub(crate) fn context() -> Context<MockFabric, MockTransport> {
    Context::new(fabric(), MockTransport::default(), ContextConfig::default())
}
