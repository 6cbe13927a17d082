//! Device nodes and the enumeration service that produces them.

use super::prop::{Property, PropertyError};
use alloc::{boxed::Box, vec::Vec};
use core::fmt::Debug;

/// One device as reported by the enumeration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Kernel device name, e.g. `port1`, `decoder2.0`, `mem0`.
    pub name: Box<str>,
    /// Instance number the kernel gave the device.
    pub id: u32,
    pub dev_path: Box<str>,
    pub props: Vec<Property>,
}

impl DeviceNode {
    pub fn new(name: impl Into<Box<str>>, id: u32, dev_path: impl Into<Box<str>>) -> DeviceNode {
        DeviceNode {
            name: name.into(),
            id,
            dev_path: dev_path.into(),
            props: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: &str, value: impl AsRef<[u8]>) -> DeviceNode {
        self.props.retain(|p| p.name.as_ref() != name);
        self.props.push(Property::new(name, value.as_ref()));
        self
    }

    pub fn get_property(&self, name: impl AsRef<str>) -> Option<&Property> {
        let name = name.as_ref();
        self.props.iter().find(|prop| prop.name.as_ref() == name)
    }

    pub fn property(&self, name: &str) -> Result<&Property, PropertyError> {
        self.get_property(name).ok_or(PropertyError::PropNotFound)
    }

    pub fn u64_prop(&self, name: &str) -> Result<u64, PropertyError> {
        self.property(name)?.value_as_u64()
    }

    pub fn u32_prop(&self, name: &str) -> Result<u32, PropertyError> {
        self.property(name)?.value_as_u32()
    }

    pub fn str_prop(&self, name: &str) -> Result<&str, PropertyError> {
        self.property(name)?.value_as_str()
    }

    /// Missing attributes read as `None`; malformed ones are still errors.
    pub fn optional<'a, V>(
        &'a self,
        name: &str,
        parse: impl FnOnce(&'a Property) -> Result<V, PropertyError>,
    ) -> Result<Option<V>, PropertyError> {
        self.get_property(name).map(parse).transpose()
    }
}

/// The system's device-enumeration service.
///
/// Each call lists the children of one kind under `parent` (a device path), in discovery
/// order. Calls are only made the first time a collection is walked or after a refresh.
pub trait Enumerator {
    /// The error type the service would throw when encountered with errors
    type TError: Debug;

    /// Root ports, one per bus.
    fn buses(&self) -> Result<Vec<DeviceNode>, Self::TError>;

    fn memdevs(&self) -> Result<Vec<DeviceNode>, Self::TError>;

    /// Switch ports directly below `parent`.
    fn child_ports(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError>;

    fn endpoints(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError>;

    fn dports(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError>;

    fn decoders(&self, parent: &str) -> Result<Vec<DeviceNode>, Self::TError>;

    fn regions(&self, decoder: &str) -> Result<Vec<DeviceNode>, Self::TError>;

    fn mappings(&self, region: &str) -> Result<Vec<DeviceNode>, Self::TError>;
}
