//! Base types shared by every layer: the file class and data encoding
//! selectors from the ELF identifier, stable item identities, and integer
//! literal parsing for schema text.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
/// The file's class/capacity, i.e. whether it is 32-bit or 64-bit, as
/// encoded in the `ei_class` identifier byte.
pub enum ElfClass {
    /// 32-bit
    Elf32 = 1,
    /// 64-bit
    Elf64 = 2,
}

impl ElfClass {
    /// The number of bytes in a machine word for this class
    pub const fn word_size(&self) -> usize {
        match self {
            Self::Elf32 => 4,
            Self::Elf64 => 8,
        }
    }

    /// Decode a class from the raw `ei_class` byte value
    pub fn from_ident(value: u64) -> Result<Self> {
        u8::try_from(value)
            .ok()
            .and_then(Self::from_u8)
            .ok_or(Error::InvalidElfClass { value })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
/// The file's data encoding, i.e. whether multi-byte values are
/// little-endian or big-endian, as encoded in the `ei_data` identifier byte.
pub enum ElfDataEncoding {
    /// Little-endian
    LittleEndian = 1,
    /// Big-endian
    BigEndian = 2,
}

impl ElfDataEncoding {
    /// Decode an encoding from the raw `ei_data` byte value
    pub fn from_ident(value: u64) -> Result<Self> {
        u8::try_from(value)
            .ok()
            .and_then(Self::from_u8)
            .ok_or(Error::InvalidElfDataEncoding { value })
    }

    /// Read an unsigned integer of `bytes.len()` bytes in this encoding
    pub fn read_uint(&self, bytes: &[u8]) -> u64 {
        let mut out = 0u64;
        match self {
            Self::LittleEndian => {
                for &b in bytes.iter().rev() {
                    out = (out << 8) | u64::from(b);
                }
            }
            Self::BigEndian => {
                for &b in bytes {
                    out = (out << 8) | u64::from(b);
                }
            }
        }
        out
    }

    /// Write `value` as an unsigned integer of `size` bytes in this encoding
    pub fn write_uint(&self, value: u64, size: usize) -> Vec<u8> {
        let le = value.to_le_bytes();
        match self {
            Self::LittleEndian => le[..size].to_vec(),
            Self::BigEndian => le[..size].iter().rev().copied().collect(),
        }
    }
}

/// A stable identity for a table item. Identities survive `clean()`
/// renumbering, so a resolved reference keeps tracking its target while the
/// target's index and offset change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(u64);

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

impl ItemId {
    /// Allocate a fresh identity
    pub fn fresh() -> Self {
        Self(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer literal
pub fn atoi(value: &str) -> Result<u64> {
    let parsed = if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| Error::InvalidIntLiteral {
        value: value.into(),
    })
}
