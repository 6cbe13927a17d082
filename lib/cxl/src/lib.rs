//! Userspace access to CXL memory devices.
//!
//! A [Context] owns the topology (buses, ports, decoders, memory devices, regions) as the
//! enumeration service reports it, and sends mailbox [Command]s through a [Transport].
//! Collections are read on first walk and cached until an explicit refresh.

extern crate alloc;

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod record;
pub mod topology;
pub mod transport;

#[cfg(test)]
mod testing;

pub use command::{Command, CommandId, QueryStatus};
pub use config::ContextConfig;
pub use error::{Error, Result};
pub use topology::{
    Context, DecodeState, DeviceNode, Enumerator, MemdevId, PortId, RefreshReport, RegionId,
    RegionParams,
};
pub use transport::{ModuleLoader, Transport, TransportError};
