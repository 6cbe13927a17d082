use super::{Context, DeviceNode, MemdevId, PortId, PortType, prop::PropertyError};
use crate::{
    command::CommandInfo,
    config::DEFAULT_PAYLOAD_MAX,
    error::{Error, Result},
    transport::{ModuleLoader, Transport},
};
use alloc::{boxed::Box, vec::Vec};
use log::{info, warn};
use spin::Once;
use utils::debug_ex;

/// One CXL memory device.
#[derive(Debug)]
pub struct Memdev {
    pub name: Box<str>,
    pub instance: u32,
    pub major: u32,
    pub minor: u32,
    pub numa_node: Option<u32>,
    pub dev_path: Box<str>,
    /// Device path of the host bridge or port the device hangs off; matches its endpoint's
    /// `uport`.
    pub host_path: Box<str>,
    pub fw_revision: Option<Box<str>>,
    /// Bytes.
    pub pmem_size: u64,
    pub ram_size: u64,
    pub payload_max: usize,
    pub lsa_size: usize,
    pub serial: Option<u64>,
    pub modalias: Option<Box<str>>,
    pub(crate) commands: Once<Vec<CommandInfo>>,
    pub(crate) module: Once<()>,
    pub(crate) node: DeviceNode,
}

impl Memdev {
    pub(crate) fn from_node(node: DeviceNode) -> core::result::Result<Memdev, PropertyError> {
        let to_usize = |v: u64| usize::try_from(v).map_err(|_| PropertyError::InvalidPropFormat);
        let numa_node = node
            .optional("numa_node", |p| p.value_as_i32())?
            .and_then(|n| u32::try_from(n).ok());
        let payload_max = node
            .optional("payload_max", |p| p.value_as_u64())?
            .unwrap_or(DEFAULT_PAYLOAD_MAX);
        Ok(Memdev {
            name: node.name.clone(),
            instance: node.id,
            major: node.u32_prop("major")?,
            minor: node.u32_prop("minor")?,
            numa_node,
            dev_path: node.dev_path.clone(),
            host_path: Box::from(node.str_prop("host")?),
            fw_revision: node.optional("firmware_version", |p| p.value_as_str().map(Box::from))?,
            pmem_size: node.u64_prop("pmem_size")?,
            ram_size: node.u64_prop("ram_size")?,
            payload_max: to_usize(payload_max)?,
            lsa_size: to_usize(node.u64_prop("label_storage_size")?)?,
            serial: node.optional("serial", |p| p.value_as_u64())?,
            modalias: node.optional("modalias", |p| p.value_as_str().map(Box::from))?,
            commands: Once::new(),
            module: Once::new(),
            node,
        })
    }

    pub fn module_loaded(&self) -> bool {
        self.module.is_completed()
    }
}

/// Run `loader` for `modalias` at most once per `done` latch.
pub(crate) fn ensure_module(
    loader: Option<&dyn ModuleLoader>,
    modalias: Option<&str>,
    done: &Once<()>,
) -> Result<()> {
    let Some(modalias) = modalias else {
        return Ok(());
    };
    let loader = loader.ok_or(Error::Module(Box::from("no module loader configured")))?;
    done.try_call_once(|| {
        loader.load(modalias).map_err(|err| {
            warn!("failed to load module for {}: {}", modalias, err);
            Error::Module(err)
        })
    })?;
    Ok(())
}

impl<E: super::Enumerator, T: Transport> Context<E, T> {
    /// The device's command-support table, fetched from the transport on first use.
    pub fn memdev_commands(&self, memdev: MemdevId) -> Result<&[CommandInfo]> {
        let dev = self.memdev(memdev)?;
        let table = dev.commands.try_call_once(|| {
            debug_ex!("querying commands of {}", dev.name);
            self.transport.query_commands(dev).map_err(|err| {
                warn!("{}: command query failed: {:?}", dev.name, err);
                Error::Transport(err)
            })
        })?;
        Ok(table.as_slice())
    }

    /// Make sure the driver behind `memdev` is loaded.
    pub fn ensure_memdev_module(&self, memdev: MemdevId) -> Result<()> {
        let dev = self.memdev(memdev)?;
        ensure_module(self.modules.as_deref(), dev.modalias.as_deref(), &dev.module)
    }

    /// The memdev an endpoint port stands for. A link to a memdev that has since gone away
    /// is re-resolved by path.
    pub fn endpoint_memdev(&mut self, endpoint: PortId) -> Result<MemdevId> {
        let port = self.port(endpoint)?;
        if port.port_type != PortType::Endpoint {
            return Err(Error::InvalidArgument("port is not an endpoint"));
        }
        if let Some(id) = port.memdev {
            if self.memdevs.contains(id) {
                return Ok(id);
            }
            info!("{}: memdev link is stale, resolving again", port.name);
        }
        let uport = port.uport.clone();
        let mut found = None;
        for id in self.memdevs()? {
            if self.memdev(id)?.host_path == uport {
                found = Some(id);
                break;
            }
        }
        let port = self.port_mut(endpoint)?;
        port.memdev = found;
        found.ok_or(Error::NotFound)
    }

    /// The endpoint port linked to `memdev`, searching the whole port tree.
    pub fn memdev_endpoint(&mut self, memdev: MemdevId) -> Result<Option<PortId>> {
        let host = self.memdev(memdev)?.host_path.clone();
        let mut stack: Vec<PortId> = Vec::new();
        for bus in self.buses()? {
            stack.push(self.bus_port(bus)?);
        }
        while let Some(port) = stack.pop() {
            for endpoint in self.endpoints(port)? {
                if self.port(endpoint)?.uport == host {
                    self.port_mut(endpoint)?.memdev = Some(memdev);
                    return Ok(Some(endpoint));
                }
            }
            stack.extend(self.child_ports(port)?);
        }
        Ok(None)
    }
}
