//! Raw device attributes as the enumeration service hands them over.
//!
//! Attributes are text, the way the kernel exposes them: numbers in decimal or `0x` hex,
//! usually with a trailing newline.
use alloc::{boxed::Box, vec::Vec};
use core::str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyError {
    InvalidPropFormat,
    PropNotFound,
}

fn parse_u64(text: &str) -> Result<u64, PropertyError> {
    let res = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    res.map_err(|_| PropertyError::InvalidPropFormat)
}

impl Property {
    pub fn new(name: impl Into<Box<str>>, data: impl Into<Box<[u8]>>) -> Property {
        Property {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Text value with trailing NULs and whitespace removed.
    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        str::from_utf8(&self.data)
            .map(|s| s.trim_end_matches(['\0', '\n', ' ']))
            .map_err(|_| PropertyError::InvalidPropFormat)
    }

    pub fn value_as_u64(&self) -> Result<u64, PropertyError> {
        parse_u64(self.value_as_str()?.trim())
    }

    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        u32::try_from(self.value_as_u64()?).map_err(|_| PropertyError::InvalidPropFormat)
    }

    /// Signed value; the kernel prints -1 for "no NUMA node" and similar.
    pub fn value_as_i32(&self) -> Result<i32, PropertyError> {
        self.value_as_str()?
            .trim()
            .parse::<i32>()
            .map_err(|_| PropertyError::InvalidPropFormat)
    }

    /// `0`/`1` flag.
    pub fn value_as_bool(&self) -> Result<bool, PropertyError> {
        match self.value_as_u64()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(PropertyError::InvalidPropFormat),
        }
    }

    /// Comma separated numbers, e.g. a decoder's `target_list`.
    pub fn value_as_list_u32(&self) -> Result<Vec<u32>, PropertyError> {
        let text = self.value_as_str()?.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        text.split(',')
            .map(|item| {
                u32::try_from(parse_u64(item.trim())?).map_err(|_| PropertyError::InvalidPropFormat)
            })
            .collect()
    }
}
