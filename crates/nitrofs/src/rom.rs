//! Growable, bounds-checked byte buffer holding the ROM image being built
//! or decoded.
//!
//! Every typed accessor reads or writes little-endian at an absolute byte
//! offset and fails with [`NitroError::OutOfBounds`] instead of panicking.
//! Writes grow the buffer on demand; reads never do.

use byteorder::{ByteOrder, LE};
use tracing::warn;

use crate::error::NitroError;

/// Hard ceiling for the image and for any section copied into it.
pub const MAX_IMAGE_SIZE: usize = 1 << 30;

/// Rounds `addr` up to the next multiple of `align` (a power of two).
pub fn align_to(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RomImage {
    bytes: Vec<u8>,
}

impl RomImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes the image from the header's size-class exponent:
    /// `0x20000 << exponent` bytes, filled with the 0xFF pad value.
    pub fn with_capacity_exponent(exponent: u8) -> Result<Self, NitroError> {
        if exponent > 13 {
            return Err(NitroError::CapacityTooLarge { exponent });
        }
        Ok(Self {
            bytes: vec![0xFF; 0x20000usize << exponent],
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Grows the buffer in doubling steps until `offset + size` fits, padding
    /// new tail bytes with 0xFF. Growth past 1 GiB is fatal.
    pub fn reserve(&mut self, offset: usize, size: usize) -> Result<(), NitroError> {
        let end = offset
            .checked_add(size)
            .ok_or(NitroError::ImageTooLarge)?;
        while self.bytes.len() < end {
            if self.bytes.len() >= MAX_IMAGE_SIZE {
                return Err(NitroError::ImageTooLarge);
            }
            let new_len = (self.bytes.len() * 2).max(1);
            warn!(
                from = self.bytes.len(),
                to = new_len,
                "image too small for reserved range, resizing"
            );
            self.bytes.resize(new_len, 0xFF);
        }
        Ok(())
    }

    /// Computes the aligned address, reserves up to it, and zero-fills only
    /// the gap `[addr, aligned)`. The zero fill is the inter-section
    /// convention; tail growth stays 0xFF.
    pub fn align_and_clear(&mut self, addr: usize, align: usize) -> Result<usize, NitroError> {
        let aligned = align_to(addr, align);
        self.reserve(aligned, 4)?;
        self.bytes[addr..aligned].fill(0);
        Ok(aligned)
    }

    fn check(&self, offset: usize, size: usize) -> Result<(), NitroError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.bytes.len() => Ok(()),
            _ => Err(NitroError::OutOfBounds {
                offset,
                size,
                len: self.bytes.len(),
            }),
        }
    }

    pub fn read_u8_at(&self, offset: usize) -> Result<u8, NitroError> {
        self.check(offset, 1)?;
        Ok(self.bytes[offset])
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16, NitroError> {
        self.check(offset, 2)?;
        Ok(LE::read_u16(&self.bytes[offset..]))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32, NitroError> {
        self.check(offset, 4)?;
        Ok(LE::read_u32(&self.bytes[offset..]))
    }

    pub fn bytes_at(&self, offset: usize, size: usize) -> Result<&[u8], NitroError> {
        self.check(offset, size)?;
        Ok(&self.bytes[offset..offset + size])
    }

    pub fn write_u8_at(&mut self, offset: usize, value: u8) -> Result<(), NitroError> {
        self.reserve(offset, 1)?;
        self.bytes[offset] = value;
        Ok(())
    }

    pub fn write_u16_at(&mut self, offset: usize, value: u16) -> Result<(), NitroError> {
        self.reserve(offset, 2)?;
        LE::write_u16(&mut self.bytes[offset..], value);
        Ok(())
    }

    pub fn write_u32_at(&mut self, offset: usize, value: u32) -> Result<(), NitroError> {
        self.reserve(offset, 4)?;
        LE::write_u32(&mut self.bytes[offset..], value);
        Ok(())
    }

    pub fn write_bytes_at(&mut self, offset: usize, data: &[u8]) -> Result<(), NitroError> {
        self.reserve(offset, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Reserves `[offset, offset + size)` and fills it with `byte`.
    pub fn fill_at(&mut self, offset: usize, size: usize, byte: u8) -> Result<(), NitroError> {
        self.reserve(offset, size)?;
        self.bytes[offset..offset + size].fill(byte);
        Ok(())
    }
}
