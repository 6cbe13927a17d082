//! Error types of the library.

use crate::{record::CodecError, topology::prop::PropertyError, transport::TransportError};
use alloc::boxed::Box;
use core::fmt::{self, Display};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The device reported, through its command-support table, that it does not implement
    /// the command.
    NotSupported,
    /// A size, layout or state precondition was violated.
    InvalidArgument(&'static str),
    /// The region was invalidated by a topology refresh and may only be deleted.
    Stale,
    /// The command transport failed before the device produced a status.
    Transport(TransportError),
    /// The command completed with a non-success device status.
    Device(u32),
    /// A handle no longer names a live object, or a lookup found nothing.
    NotFound,
    /// A wire record could not be decoded or encoded.
    Codec(CodecError),
    /// A device attribute was missing or malformed.
    Property(PropertyError),
    /// The device-enumeration service failed.
    Enumeration(Box<str>),
    /// The module-loading service failed.
    Module(Box<str>),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotSupported => write!(f, "command not supported by device"),
            Error::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            Error::Stale => write!(f, "region is stale"),
            Error::Transport(err) => write!(f, "command transport failed: {:?}", err),
            Error::Device(status) => write!(f, "device returned status {:#x}", status),
            Error::NotFound => write!(f, "object not found"),
            Error::Codec(err) => write!(f, "record codec error: {:?}", err),
            Error::Property(err) => write!(f, "device attribute error: {:?}", err),
            Error::Enumeration(msg) => write!(f, "device enumeration failed: {}", msg),
            Error::Module(msg) => write!(f, "module load failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::Codec(err)
    }
}

impl From<PropertyError> for Error {
    fn from(err: PropertyError) -> Self {
        Error::Property(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}
