//! ## Endianness Module
//! This module provides some structs to hold integers exactly as they are laid out on a
//! little-endian wire.
//!
//! Every type declared here stores its raw bytes, so it has an alignment of 1 and can sit at
//! any offset of a `#[repr(C)]` record without padding. All of them implement [EndianData<T>],
//! which defines [EndianData<T>::value] to parse the bytes into a native integer.

/// This trait defines a packed data in memory with some specific endianness.
pub trait EndianData<T>: Copy + Clone {
    /// Parse the value into the endianness of the current architecture.
    fn value(&self) -> T;
}

/// Single bytes have no byte order; this lets record macros treat every field alike.
impl EndianData<u8> for u8 {
    #[inline(always)]
    fn value(&self) -> u8 {
        *self
    }
}

/// Declare a little-endian wrapper for a native integer and implement [EndianData<T>] for it.
macro_rules! impl_converter_little {
    ($(#[$meta:meta])* $type: ident, $tval: ty, $len: expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $type([u8; $len]);

        impl EndianData<$tval> for $type {
            #[inline(always)]
            fn value(&self) -> $tval {
                <$tval>::from_le_bytes(self.0)
            }
        }

        impl $type {
            /// Encode a native value.
            #[inline(always)]
            pub const fn new(value: $tval) -> Self {
                Self(value.to_le_bytes())
            }

            /// The raw wire bytes.
            #[inline(always)]
            pub const fn bytes(&self) -> [u8; $len] {
                self.0
            }
        }

        impl From<$tval> for $type {
            fn from(value: $tval) -> Self {
                Self::new(value)
            }
        }
    };
}

impl_converter_little!(
    ///[u16] in Little Endianness
    LittleEndian16, u16, 2
);
impl_converter_little!(
    ///[u32] in Little Endianness
    LittleEndian32, u32, 4
);
impl_converter_little!(
    ///[u64] in Little Endianness
    LittleEndian64, u64, 8
);

/// Largest value a 24-bit field can carry.
pub const U24_MAX: u32 = 0x00ff_ffff;

///24-bit unsigned integer in Little Endianness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct LittleEndian24([u8; 3]);

impl LittleEndian24 {
    /// Encode a native value, dropping anything above bit 23.
    pub const fn new(value: u32) -> Self {
        let b = (value & U24_MAX).to_le_bytes();
        Self([b[0], b[1], b[2]])
    }
}

impl EndianData<u32> for LittleEndian24 {
    #[inline(always)]
    fn value(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], 0])
    }
}

impl From<u32> for LittleEndian24 {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

///24-bit two's complement integer in Little Endianness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SignedLittleEndian24([u8; 3]);

impl SignedLittleEndian24 {
    /// Encode a native value, keeping the low 24 bits of its two's complement form.
    pub const fn new(value: i32) -> Self {
        let b = value.to_le_bytes();
        Self([b[0], b[1], b[2]])
    }
}

impl EndianData<i32> for SignedLittleEndian24 {
    #[inline(always)]
    fn value(&self) -> i32 {
        // shift bit 23 into the sign bit, then arithmetic-shift back
        (i32::from_le_bytes([0, self.0[0], self.0[1], self.0[2]])) >> 8
    }
}

impl From<i32> for SignedLittleEndian24 {
    fn from(value: i32) -> Self {
        Self::new(value)
    }
}
