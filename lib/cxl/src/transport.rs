//! Collaborators that reach the kernel: the command transport and the module loader.

use crate::{
    command::{CommandId, CommandInfo},
    topology::Memdev,
};
use alloc::{boxed::Box, vec::Vec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The send failed with an OS error number.
    Io(i32),
    /// The device node can no longer be opened.
    Unavailable,
    /// The kernel refused the request before passing it to the device.
    Rejected(Box<str>),
}

/// One command on its way to a device.
#[derive(Debug)]
pub struct SendRequest<'a> {
    pub id: CommandId,
    pub opcode: u16,
    pub input: &'a [u8],
    /// Sized to the command's output capacity.
    pub output: &'a mut [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendResponse {
    /// Device return code, 0 on success.
    pub retval: u32,
    /// Bytes written to [SendRequest::output].
    pub size_out: usize,
}

/// The privileged send-command path to a memory device.
///
/// Calls block until the device completes or the transport gives up.
pub trait Transport {
    /// Fetch the device's command-support table.
    fn query_commands(&self, memdev: &Memdev) -> Result<Vec<CommandInfo>, TransportError>;

    fn send(&self, memdev: &Memdev, req: SendRequest<'_>) -> Result<SendResponse, TransportError>;
}

/// Loads the kernel module that drives a device, given its modalias.
pub trait ModuleLoader {
    fn load(&self, modalias: &str) -> Result<(), Box<str>>;
}
