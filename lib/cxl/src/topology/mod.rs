//! The CXL topology: buses, ports, decoders, memory devices and regions.
//!
//! Every object lives in an [Arena] owned by the [Context] and is named by a generational
//! [Id]. Children are id lists; back references (decoder to port, endpoint to memdev,
//! region to decoder) are plain ids and never keep their target alive.

mod arena;
mod collection;
mod decoder;
mod memdev;
mod node;
mod populate;
mod port;
pub mod prop;
mod refresh;
mod region;

pub use arena::{Arena, Id};
pub use collection::Collection;
pub use decoder::{Decoder, DecoderFlags, DecoderMode, Target, TargetType};
pub use memdev::Memdev;
pub use node::{DeviceNode, Enumerator};
pub use port::{Bus, Dport, Port, PortType};
pub use refresh::RefreshReport;
pub use region::{DecodeState, Mapping, Region, RegionParams};

use crate::{
    config::ContextConfig,
    error::{Error, Result},
    transport::{ModuleLoader, Transport},
};
use alloc::{boxed::Box, format, vec::Vec};
use log::LevelFilter;

pub type BusId = Id<Bus>;
pub type PortId = Id<Port>;
pub type DportId = Id<Dport>;
pub type MemdevId = Id<Memdev>;
pub type DecoderId = Id<Decoder>;
pub type RegionId = Id<Region>;

/// Root owner of the topology and of the collaborators used to fill it.
///
/// A context is meant to be driven from one thread at a time; walking it takes `&mut self`
/// because walking populates.
pub struct Context<E: Enumerator, T: Transport> {
    pub(crate) enumerator: E,
    pub(crate) transport: T,
    pub(crate) modules: Option<Box<dyn ModuleLoader>>,
    pub(crate) config: ContextConfig,
    pub(crate) bus_list: Collection<BusId>,
    pub(crate) memdev_list: Collection<MemdevId>,
    pub(crate) buses: Arena<Bus>,
    pub(crate) ports: Arena<Port>,
    pub(crate) dports: Arena<Dport>,
    pub(crate) memdevs: Arena<Memdev>,
    pub(crate) decoders: Arena<Decoder>,
    pub(crate) regions: Arena<Region>,
}

pub(crate) fn enumeration_error(err: impl core::fmt::Debug) -> Error {
    Error::Enumeration(format!("{:?}", err).into_boxed_str())
}

impl<E: Enumerator, T: Transport> Context<E, T> {
    pub fn new(enumerator: E, transport: T, config: ContextConfig) -> Self {
        log::set_max_level(config.log_level);
        Context {
            enumerator,
            transport,
            modules: None,
            config,
            bus_list: Collection::default(),
            memdev_list: Collection::default(),
            buses: Arena::new(),
            ports: Arena::new(),
            dports: Arena::new(),
            memdevs: Arena::new(),
            decoders: Arena::new(),
            regions: Arena::new(),
        }
    }

    pub fn with_module_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.modules = Some(Box::new(loader));
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn set_log_priority(&mut self, level: LevelFilter) {
        self.config.log_level = level;
        log::set_max_level(level);
    }

    pub fn log_priority(&self) -> LevelFilter {
        log::max_level()
    }

    pub fn enumerator(&self) -> &E {
        &self.enumerator
    }

    /// Mutable access to the enumeration service. Changes become visible through
    /// [Context::refresh_port] and [Context::refresh_memdevs].
    pub fn enumerator_mut(&mut self) -> &mut E {
        &mut self.enumerator
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // region: object access
    pub fn bus(&self, id: BusId) -> Result<&Bus> {
        self.buses.get(id).ok_or(Error::NotFound)
    }

    pub fn port(&self, id: PortId) -> Result<&Port> {
        self.ports.get(id).ok_or(Error::NotFound)
    }

    pub fn dport(&self, id: DportId) -> Result<&Dport> {
        self.dports.get(id).ok_or(Error::NotFound)
    }

    pub fn memdev(&self, id: MemdevId) -> Result<&Memdev> {
        self.memdevs.get(id).ok_or(Error::NotFound)
    }

    pub fn decoder(&self, id: DecoderId) -> Result<&Decoder> {
        self.decoders.get(id).ok_or(Error::NotFound)
    }

    pub fn region(&self, id: RegionId) -> Result<&Region> {
        self.regions.get(id).ok_or(Error::NotFound)
    }

    pub(crate) fn port_mut(&mut self, id: PortId) -> Result<&mut Port> {
        self.ports.get_mut(id).ok_or(Error::NotFound)
    }

    pub(crate) fn decoder_mut(&mut self, id: DecoderId) -> Result<&mut Decoder> {
        self.decoders.get_mut(id).ok_or(Error::NotFound)
    }

    pub(crate) fn region_mut(&mut self, id: RegionId) -> Result<&mut Region> {
        self.regions.get_mut(id).ok_or(Error::NotFound)
    }
    // endregion

    // region: lookups
    pub fn bus_port(&self, bus: BusId) -> Result<PortId> {
        Ok(self.bus(bus)?.port)
    }

    pub fn port_parent(&self, port: PortId) -> Result<Option<PortId>> {
        Ok(self.port(port)?.parent)
    }

    pub fn port_bus(&self, port: PortId) -> Result<BusId> {
        Ok(self.port(port)?.bus)
    }

    pub fn port_depth(&self, port: PortId) -> Result<u32> {
        Ok(self.port(port)?.depth)
    }

    pub fn port_is_root(&self, port: PortId) -> Result<bool> {
        Ok(self.port(port)?.port_type == PortType::Root)
    }

    pub fn port_is_switch(&self, port: PortId) -> Result<bool> {
        Ok(self.port(port)?.port_type == PortType::Switch)
    }

    pub fn port_is_endpoint(&self, port: PortId) -> Result<bool> {
        Ok(self.port(port)?.port_type == PortType::Endpoint)
    }

    /// Depth-first search of the populated-on-demand port tree.
    pub fn find_port_by_path(&mut self, dev_path: &str) -> Result<Option<PortId>> {
        let mut stack: Vec<PortId> = Vec::new();
        for bus in self.buses()? {
            stack.push(self.bus_port(bus)?);
        }
        while let Some(port) = stack.pop() {
            if self.port(port)?.dev_path.as_ref() == dev_path {
                return Ok(Some(port));
            }
            stack.extend(self.child_ports(port)?);
            stack.extend(self.endpoints(port)?);
        }
        Ok(None)
    }

    pub fn find_memdev_by_name(&mut self, name: &str) -> Result<Option<MemdevId>> {
        for id in self.memdevs()? {
            if self.memdev(id)?.name.as_ref() == name {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Search every port's decoders for `name`, e.g. `decoder3.0`.
    pub fn find_decoder_by_name(&mut self, name: &str) -> Result<Option<DecoderId>> {
        let mut stack: Vec<PortId> = Vec::new();
        for bus in self.buses()? {
            stack.push(self.bus_port(bus)?);
        }
        while let Some(port) = stack.pop() {
            for decoder in self.decoders(port)? {
                if self.decoder(decoder)?.name.as_ref() == name {
                    return Ok(Some(decoder));
                }
            }
            stack.extend(self.child_ports(port)?);
            stack.extend(self.endpoints(port)?);
        }
        Ok(None)
    }
    // endregion
}
