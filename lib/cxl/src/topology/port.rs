use super::{BusId, DecoderId, DeviceNode, DportId, MemdevId, PortId, collection::Collection};
use crate::topology::prop::PropertyError;
use alloc::boxed::Box;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Root,
    Switch,
    Endpoint,
}

/// One host CXL root complex; owns its root port.
#[derive(Debug)]
pub struct Bus {
    pub name: Box<str>,
    pub instance: u32,
    pub dev_path: Box<str>,
    pub port: PortId,
    pub(crate) node: DeviceNode,
}

#[derive(Debug)]
pub struct Port {
    pub name: Box<str>,
    pub instance: u32,
    pub dev_path: Box<str>,
    /// Device path of the component upstream of this port. For an endpoint, the memdev's
    /// host device.
    pub uport: Box<str>,
    pub port_type: PortType,
    /// `None` only for a bus's root port.
    pub parent: Option<PortId>,
    pub bus: BusId,
    pub depth: u32,
    pub(crate) child_ports: Collection<PortId>,
    pub(crate) endpoints: Collection<PortId>,
    pub(crate) decoders: Collection<DecoderId>,
    pub(crate) dports: Collection<DportId>,
    /// Endpoints only.
    pub(crate) memdev: Option<MemdevId>,
    pub(crate) node: DeviceNode,
}

impl Port {
    pub(crate) fn from_node(
        node: DeviceNode,
        port_type: PortType,
        parent: Option<(PortId, u32)>,
        bus: BusId,
    ) -> Result<Port, PropertyError> {
        let uport = Box::from(node.str_prop("uport")?);
        Ok(Port {
            name: node.name.clone(),
            instance: node.id,
            dev_path: node.dev_path.clone(),
            uport,
            port_type,
            parent: parent.map(|(id, _)| id),
            bus,
            depth: parent.map_or(0, |(_, depth)| depth + 1),
            child_ports: Collection::default(),
            endpoints: Collection::default(),
            decoders: Collection::default(),
            dports: Collection::default(),
            memdev: None,
            node,
        })
    }

    pub fn is_endpoint(&self) -> bool {
        self.port_type == PortType::Endpoint
    }

    pub fn child_ports_populated(&self) -> bool {
        self.child_ports.is_populated()
    }

    pub fn endpoints_populated(&self) -> bool {
        self.endpoints.is_populated()
    }

    pub fn decoders_populated(&self) -> bool {
        self.decoders.is_populated()
    }

    pub fn dports_populated(&self) -> bool {
        self.dports.is_populated()
    }
}

/// A downstream port: one link below a [Port].
#[derive(Debug)]
pub struct Dport {
    pub name: Box<str>,
    pub instance: u32,
    pub dev_path: Box<str>,
    pub phys_path: Option<Box<str>>,
    pub fw_path: Option<Box<str>>,
    pub port: PortId,
    pub(crate) node: DeviceNode,
}

impl Dport {
    pub(crate) fn from_node(node: DeviceNode, port: PortId) -> Result<Dport, PropertyError> {
        let phys_path = node.optional("physical_node", |p| p.value_as_str().map(Box::from))?;
        let fw_path = node.optional("firmware_node", |p| p.value_as_str().map(Box::from))?;
        Ok(Dport {
            name: node.name.clone(),
            instance: node.id,
            dev_path: node.dev_path.clone(),
            phys_path,
            fw_path,
            port,
            node,
        })
    }
}
