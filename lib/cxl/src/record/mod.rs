//! Fixed-layout records exchanged with a memory device's mailbox.
//!
//! Every record is a `#[repr(C)]` struct made only of byte arrays, `u8` and the little-endian
//! wrappers from [utils::endian]. Those all have an alignment of 1, so the struct has no
//! padding and its in-memory bytes are exactly its wire bytes. Bit-fields are never declared
//! as Rust fields: they are decoded with the mask/shift constants next to each record.
//!
//! Records followed by a variable-length array are split into a fixed header record and a
//! decode function that sizes the trailing array from the header's count field.

use alloc::vec::Vec;
use core::{fmt, mem::size_of, slice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer is shorter than the record (or its declared trailing array).
    TooShort { need: usize, got: usize },
    /// A field holds a value the format does not allow.
    Invalid(&'static str),
}

/// A record whose in-memory layout is its wire layout.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, have an alignment of 1, contain no padding, and accept
/// every bit pattern. Use [wire_record!] rather than implementing this by hand.
pub unsafe trait Record: Copy + Sized {
    /// Size of the record on the wire.
    const SIZE: usize = size_of::<Self>();

    /// Decode from the front of `bytes`. Trailing bytes are ignored.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < Self::SIZE {
            return Err(CodecError::TooShort {
                need: Self::SIZE,
                got: bytes.len(),
            });
        }
        // SAFETY: length checked above; the trait contract makes any byte pattern valid and
        // the read is unaligned.
        Ok(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) })
    }

    /// The wire bytes of this record.
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: no padding, so all SIZE bytes are initialized.
        unsafe { slice::from_raw_parts(self as *const Self as *const u8, Self::SIZE) }
    }

    /// A record with every field, reserved ones included, set to zero.
    fn zeroed() -> Self {
        // SAFETY: all-zero is a valid bit pattern per the trait contract.
        unsafe { core::mem::zeroed() }
    }

    /// Append the wire bytes to `out`.
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

/// Declare a wire record, check its size at compile time and implement [Record] for it.
macro_rules! wire_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$fmeta:meta])* pub $field:ident : $ty:ty),* $(,)?
        } = $size:expr;
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty),*
        }

        const _: () = assert!(core::mem::size_of::<$name>() == $size);
        const _: () = assert!(core::mem::align_of::<$name>() == 1);

        // SAFETY: repr(C), checked align 1 and exact size: every field is a byte array,
        // u8, or a byte-array-backed endian wrapper.
        unsafe impl $crate::record::Record for $name {}
    };
}

/// Generate `field()` getters and `set_field()` setters for integer fields of a record.
macro_rules! le_accessors {
    ($name:ident { $($field:ident : $t:ty),* $(,)? }) => {
        paste::paste! {
            impl $name {
                $(
                    #[inline]
                    pub fn $field(&self) -> $t {
                        utils::endian::EndianData::<$t>::value(&self.$field)
                    }

                    #[inline]
                    pub fn [<set_ $field>](&mut self, value: $t) {
                        self.$field = value.into();
                    }
                )*
            }
        }
    };
}

pub(crate) use {le_accessors, wire_record};

pub mod alert;
pub mod event;
pub mod firmware;
pub mod health;
pub mod identify;
pub mod lsa;
pub mod partition;
pub mod poison;

/// Extract a sub-field: `(raw >> shift) & mask`.
#[inline]
pub(crate) const fn get_bits(raw: u32, mask: u32, shift: u32) -> u32 {
    (raw >> shift) & mask
}

/// Replace a sub-field of `raw`, leaving the other bits untouched.
#[inline]
pub(crate) const fn set_bits(raw: u32, mask: u32, shift: u32, value: u32) -> u32 {
    (raw & !(mask << shift)) | ((value & mask) << shift)
}

/// Copy a fixed-size, NUL-padded text field into a `&str`.
pub(crate) fn fixed_str(raw: &[u8]) -> Result<&str, CodecError> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    core::str::from_utf8(&raw[..end]).map_err(|_| CodecError::Invalid("text field is not UTF-8"))
}

/// 128-bit identifier, stored in wire byte order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    pub const NIL: Uuid = Uuid([0; 16]);

    /// Parse the canonical `8-4-4-4-12` hex form.
    pub fn parse(text: &str) -> Result<Uuid, CodecError> {
        let text = text.trim();
        let mut res = [0u8; 16];
        let mut digits = text.chars().filter(|c| *c != '-');
        if text.len() != 36 || text.chars().filter(|c| *c == '-').count() != 4 {
            return Err(CodecError::Invalid("malformed uuid"));
        }
        for byte in res.iter_mut() {
            let hi = digits.next().and_then(|c| c.to_digit(16));
            let lo = digits.next().and_then(|c| c.to_digit(16));
            match (hi, lo) {
                (Some(hi), Some(lo)) => *byte = (hi << 4 | lo) as u8,
                _ => return Err(CodecError::Invalid("malformed uuid")),
            }
        }
        Ok(Uuid(res))
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_bits_helpers() {
        let raw = set_bits(0xffff_ffff, 0x3f, 8, 0x05);
        assert_eq!(get_bits(raw, 0x3f, 8), 0x05);
        assert_eq!(raw & 0xff, 0xff);
        assert_eq!(raw >> 14, 0x3ffff);
    }

    #[test]
    fn test_uuid_text() {
        let text = "2f8b7a1c-0d3e-4c5f-9a6b-7c8d9e0f1a2b";
        let uuid = Uuid::parse(text).unwrap();
        assert_eq!(uuid.0[0], 0x2f);
        assert_eq!(uuid.0[15], 0x2b);
        assert_eq!(uuid.to_string(), text);
        assert!(Uuid::parse("2f8b7a1c0d3e4c5f9a6b7c8d9e0f1a2b").is_err());
        assert!(Uuid::parse("zf8b7a1c-0d3e-4c5f-9a6b-7c8d9e0f1a2b").is_err());
    }

    #[test]
    fn test_fixed_str_stops_at_nul() {
        assert_eq!(fixed_str(b"1.2.3\0\0\0").unwrap(), "1.2.3");
        assert_eq!(fixed_str(b"full").unwrap(), "full");
        assert!(fixed_str(&[0xff, 0xfe]).is_err());
    }
}
