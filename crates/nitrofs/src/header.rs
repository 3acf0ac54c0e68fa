//! Fixed ROM header fields and the final fixup pass.
//!
//! All offsets are absolute byte offsets into the image. The header is
//! little-endian u32 words; the checksum is a CRC-16 over the first 350
//! header bytes.

use crate::error::NitroError;
use crate::rom::RomImage;

pub const HEADER_SIZE: usize = 0x4000;

/// Size-class exponent byte: image size is `0x20000 << exponent`.
pub const CAPACITY: usize = 0x14;

pub const ARM9_OFFSET: usize = 0x20;
pub const ARM9_ENTRY: usize = 0x24;
pub const ARM9_LOAD: usize = 0x28;
pub const ARM9_SIZE: usize = 0x2C;
pub const ARM7_OFFSET: usize = 0x30;
pub const ARM7_ENTRY: usize = 0x34;
pub const ARM7_LOAD: usize = 0x38;
pub const ARM7_SIZE: usize = 0x3C;
pub const FNT_OFFSET: usize = 0x40;
pub const FNT_SIZE: usize = 0x44;
pub const FAT_OFFSET: usize = 0x48;
pub const FAT_SIZE: usize = 0x4C;
pub const OVT9_OFFSET: usize = 0x50;
pub const OVT9_SIZE: usize = 0x54;
pub const OVT7_OFFSET: usize = 0x58;
pub const OVT7_SIZE: usize = 0x5C;
pub const ICON_OFFSET: usize = 0x68;
pub const TOTAL_SIZE: usize = 0x80;
pub const TOTAL_SIZE_MIRROR: usize = 0x1000;

pub const CHECKSUM: usize = 0x15E;
pub const CHECKSUM_SPAN: usize = 350;

/// Final offsets and sizes of every placed section, applied to the header
/// in one pass once layout is complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionLayout {
    pub arm9_offset: u32,
    pub arm9_size: u32,
    pub arm7_offset: u32,
    pub arm7_size: u32,
    pub fnt_offset: u32,
    pub fnt_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
    pub ovt9_offset: u32,
    pub ovt9_size: u32,
    pub ovt7_offset: u32,
    pub ovt7_size: u32,
    pub icon_offset: u32,
    pub total_size: u32,
    /// Entry/load address overrides from hex build rules; `None` keeps the
    /// value already present in the header file.
    pub arm9_entry: Option<u32>,
    pub arm9_load: Option<u32>,
    pub arm7_entry: Option<u32>,
    pub arm7_load: Option<u32>,
}

impl SectionLayout {
    /// Writes every field, recomputes the size-class byte from the final
    /// image length and stores the header checksum.
    pub fn apply(&self, rom: &mut RomImage) -> Result<(), NitroError> {
        rom.write_u32_at(ARM9_OFFSET, self.arm9_offset)?;
        rom.write_u32_at(ARM9_SIZE, self.arm9_size)?;
        rom.write_u32_at(ARM7_OFFSET, self.arm7_offset)?;
        rom.write_u32_at(ARM7_SIZE, self.arm7_size)?;
        rom.write_u32_at(FNT_OFFSET, self.fnt_offset)?;
        rom.write_u32_at(FNT_SIZE, self.fnt_size)?;
        rom.write_u32_at(FAT_OFFSET, self.fat_offset)?;
        rom.write_u32_at(FAT_SIZE, self.fat_size)?;
        // An absent overlay table reports offset 0.
        rom.write_u32_at(OVT9_OFFSET, if self.ovt9_size != 0 { self.ovt9_offset } else { 0 })?;
        rom.write_u32_at(OVT9_SIZE, self.ovt9_size)?;
        rom.write_u32_at(OVT7_OFFSET, if self.ovt7_size != 0 { self.ovt7_offset } else { 0 })?;
        rom.write_u32_at(OVT7_SIZE, self.ovt7_size)?;
        rom.write_u32_at(ICON_OFFSET, self.icon_offset)?;
        rom.write_u32_at(TOTAL_SIZE, self.total_size)?;
        rom.write_u32_at(TOTAL_SIZE_MIRROR, self.total_size)?;

        if let Some(entry) = self.arm9_entry {
            rom.write_u32_at(ARM9_ENTRY, entry)?;
        }
        if let Some(load) = self.arm9_load {
            rom.write_u32_at(ARM9_LOAD, load)?;
        }
        if let Some(entry) = self.arm7_entry {
            rom.write_u32_at(ARM7_ENTRY, entry)?;
        }
        if let Some(load) = self.arm7_load {
            rom.write_u32_at(ARM7_LOAD, load)?;
        }

        // Images below one size class still report class 0.
        rom.write_u8_at(CAPACITY, (rom.len() / 0x20000).max(1).ilog2() as u8)?;

        let checksum = crc16(rom.bytes_at(0, CHECKSUM_SPAN)?);
        rom.write_u16_at(CHECKSUM, checksum)?;
        Ok(())
    }
}

/// CRC-16 with the reflected 0xA001 polynomial and 0xFFFF seed, as used by
/// the ROM header.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        // Standard check value for the 0xA001 / 0xFFFF variant.
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn apply_writes_fields_and_checksum() {
        let mut rom = RomImage::with_capacity_exponent(0).unwrap();
        let layout = SectionLayout {
            arm9_offset: 0x4000,
            arm9_size: 0x100,
            arm7_offset: 0x8000,
            arm7_size: 0x80,
            fnt_offset: 0x9000,
            fnt_size: 0x20,
            fat_offset: 0x9100,
            fat_size: 0x10,
            ovt9_offset: 0x7000,
            ovt9_size: 0,
            ovt7_offset: 0x7800,
            ovt7_size: 0x20,
            icon_offset: 0xA000,
            total_size: 0xB000,
            arm9_entry: Some(0x02000800),
            ..SectionLayout::default()
        };
        layout.apply(&mut rom).unwrap();

        assert_eq!(rom.read_u32_at(ARM9_OFFSET).unwrap(), 0x4000);
        // Empty ARM9 overlay table reports offset 0; present ARM7 table keeps its offset.
        assert_eq!(rom.read_u32_at(OVT9_OFFSET).unwrap(), 0);
        assert_eq!(rom.read_u32_at(OVT7_OFFSET).unwrap(), 0x7800);
        assert_eq!(rom.read_u32_at(TOTAL_SIZE).unwrap(), 0xB000);
        assert_eq!(
            rom.read_u32_at(TOTAL_SIZE_MIRROR).unwrap(),
            rom.read_u32_at(TOTAL_SIZE).unwrap()
        );
        assert_eq!(rom.read_u32_at(ARM9_ENTRY).unwrap(), 0x02000800);
        // 0x20000-byte image is size class 0.
        assert_eq!(rom.read_u8_at(CAPACITY).unwrap(), 0);
        assert_eq!(
            rom.read_u16_at(CHECKSUM).unwrap(),
            crc16(rom.bytes_at(0, CHECKSUM_SPAN).unwrap())
        );
    }
}
