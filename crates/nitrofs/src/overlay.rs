//! Overlay table manager.
//!
//! An overlay table is a run of fixed 32-byte records: bytes 0-3 hold the
//! overlay ID, bytes 24-25 the file ID (26-27 are always-zero padding) and
//! byte 31 a status flag. A record whose flag equals the configured update
//! marker has no file ID yet and gets one assigned during packing; all other
//! records only raise the free-file-ID watermark.
//!
//! Entries are kept ascending by overlay ID. That ordering is load-bearing:
//! payload placement and FAT linking follow ascending overlay ID, not
//! record order.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::NitroError;
use crate::rom::{RomImage, MAX_IMAGE_SIZE};

pub const RECORD_SIZE: usize = 32;

/// Flag byte value written once a record's file ID has been assigned.
pub const RESOLVED_FLAG: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayEntry {
    pub start: u32,
    pub end: u32,
    pub file_id: Option<u16>,
}

#[derive(Debug, Default)]
pub struct OverlayTable {
    offset: usize,
    size: usize,
    update_flag: u8,
    entries: BTreeMap<u32, OverlayEntry>,
}

impl OverlayTable {
    /// Scans the records already copied into the image at
    /// `[offset, offset + size)`. `size` must be a multiple of the record
    /// size; the caller validates this against the source file.
    pub fn scan(
        rom: &RomImage,
        offset: usize,
        size: usize,
        update_flag: u8,
    ) -> Result<Self, NitroError> {
        debug_assert_eq!(size % RECORD_SIZE, 0);
        let mut entries = BTreeMap::new();
        for i in 0..size / RECORD_SIZE {
            let rec = offset + i * RECORD_SIZE;
            let overlay_id = rom.read_u32_at(rec)?;
            let mut entry = OverlayEntry::default();
            if rom.read_u8_at(rec + 31)? != update_flag {
                entry.file_id = Some(rom.read_u16_at(rec + 24)?);
            }
            entries.insert(overlay_id, entry);
        }
        Ok(Self {
            offset,
            size,
            update_flag,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, overlay_id: u32) -> Option<&OverlayEntry> {
        self.entries.get(&overlay_id)
    }

    /// Highest already-assigned file ID plus one; 0 when no record carries
    /// a final file ID.
    pub fn fixed_id_watermark(&self) -> u16 {
        self.entries
            .values()
            .filter_map(|e| e.file_id)
            .map(|id| id + 1)
            .max()
            .unwrap_or(0)
    }

    /// Assigns file IDs, in record order, to every record whose flag byte
    /// matches the update marker: the ID goes into bytes 24-25, the padding
    /// bytes 26-27 are zeroed and the flag is set to [`RESOLVED_FLAG`].
    pub fn assign_file_ids(
        &mut self,
        rom: &mut RomImage,
        next_file_id: &mut u16,
    ) -> Result<(), NitroError> {
        for i in 0..self.size / RECORD_SIZE {
            let rec = self.offset + i * RECORD_SIZE;
            if rom.read_u8_at(rec + 31)? != self.update_flag {
                continue;
            }
            let overlay_id = rom.read_u32_at(rec)?;
            rom.write_u16_at(rec + 24, *next_file_id)?;
            rom.write_u16_at(rec + 26, 0)?;
            rom.write_u8_at(rec + 31, RESOLVED_FLAG)?;
            if let Some(entry) = self.entries.get_mut(&overlay_id) {
                entry.file_id = Some(*next_file_id);
            }
            info!(overlay_id, file_id = *next_file_id, "overlay obtained file ID");
            *next_file_id += 1;
        }
        Ok(())
    }

    /// Copies every payload into the image at the cursor, ascending by
    /// overlay ID. The payload for overlay `n` must exist as `<dir>/n.bin`;
    /// a missing or oversized payload is fatal.
    pub fn place_payloads(
        &mut self,
        rom: &mut RomImage,
        dir: &Path,
        cursor: &mut usize,
    ) -> Result<(), NitroError> {
        for (&overlay_id, entry) in self.entries.iter_mut() {
            let path = dir.join(format!("{overlay_id}.bin"));
            let meta = fs::metadata(&path).map_err(|_| NitroError::MissingOverlayPayload {
                overlay_id,
                path: path.clone(),
            })?;
            if !meta.is_file() {
                return Err(NitroError::MissingOverlayPayload { overlay_id, path });
            }
            if meta.len() > MAX_IMAGE_SIZE as u64 {
                return Err(NitroError::SectionTooLarge {
                    path,
                    size: meta.len(),
                    limit: MAX_IMAGE_SIZE as u64,
                });
            }
            let data = fs::read(&path).map_err(|source| NitroError::Section {
                path: path.clone(),
                source,
            })?;
            rom.write_bytes_at(*cursor, &data)?;
            entry.start = *cursor as u32;
            entry.end = (*cursor + data.len()) as u32;
            *cursor += data.len();
            debug!(payload = %path.display(), "placed overlay payload");
        }
        Ok(())
    }

    /// Patches the (start, end) pair of every entry into the FAT slot of
    /// its assigned file ID.
    pub fn link_fat(&self, rom: &mut RomImage, fat_offset: usize) -> Result<(), NitroError> {
        for (&overlay_id, entry) in &self.entries {
            let file_id = entry
                .file_id
                .ok_or(NitroError::UnassignedOverlay { overlay_id })?;
            let slot = fat_offset + file_id as usize * 8;
            rom.write_u32_at(slot, entry.start)?;
            rom.write_u32_at(slot + 4, entry.end)?;
            debug!(overlay_id, file_id, "linked overlay to FAT");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LE};
    use std::io::Write;

    const UPDATE_FLAG: u8 = 0xAB;

    fn record(overlay_id: u32, file_id: u16, flag: u8) -> [u8; RECORD_SIZE] {
        let mut rec = [0u8; RECORD_SIZE];
        LE::write_u32(&mut rec[0..], overlay_id);
        LE::write_u16(&mut rec[24..], file_id);
        rec[31] = flag;
        rec
    }

    fn image_with_records(records: &[[u8; RECORD_SIZE]]) -> RomImage {
        let mut bytes = Vec::new();
        for rec in records {
            bytes.extend_from_slice(rec);
        }
        RomImage::from_bytes(bytes)
    }

    #[test]
    fn scan_separates_fixed_and_unassigned_records() {
        let rom = image_with_records(&[
            record(7, 2, 0x00),
            record(3, 0, UPDATE_FLAG),
            record(5, 4, 0x01),
        ]);
        let table = OverlayTable::scan(&rom, 0, 3 * RECORD_SIZE, UPDATE_FLAG).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.fixed_id_watermark(), 5);
        assert_eq!(table.entry(3).unwrap().file_id, None);
        assert_eq!(table.entry(7).unwrap().file_id, Some(2));
    }

    #[test]
    fn assign_patches_record_bytes_and_flag() {
        let mut rec = record(3, 0, UPDATE_FLAG);
        rec[26] = 0xEE; // stale padding that must be zeroed
        let mut rom = image_with_records(&[rec]);
        let mut table = OverlayTable::scan(&rom, 0, RECORD_SIZE, UPDATE_FLAG).unwrap();

        let mut next_file_id = 5u16;
        table.assign_file_ids(&mut rom, &mut next_file_id).unwrap();

        assert_eq!(next_file_id, 6);
        assert_eq!(table.entry(3).unwrap().file_id, Some(5));
        let bytes = rom.as_bytes();
        assert_eq!(&bytes[24..28], &[5, 0, 0, 0]);
        assert_eq!(bytes[31], RESOLVED_FLAG);
    }

    #[test]
    fn payloads_place_ascending_and_link_fat() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("3.bin"))
            .unwrap()
            .write_all(&[0x11; 8])
            .unwrap();
        std::fs::File::create(dir.path().join("7.bin"))
            .unwrap()
            .write_all(&[0x22; 4])
            .unwrap();

        // Record order is descending on purpose; placement must not be.
        let mut rom = image_with_records(&[record(7, 1, 0x00), record(3, 0, UPDATE_FLAG)]);
        let mut table = OverlayTable::scan(&rom, 0, 2 * RECORD_SIZE, UPDATE_FLAG).unwrap();
        let mut next_file_id = table.fixed_id_watermark();
        table.assign_file_ids(&mut rom, &mut next_file_id).unwrap();

        let mut cursor = 0x100;
        table
            .place_payloads(&mut rom, dir.path(), &mut cursor)
            .unwrap();

        assert_eq!(table.entry(3).unwrap().start, 0x100);
        assert_eq!(table.entry(3).unwrap().end, 0x108);
        assert_eq!(table.entry(7).unwrap().start, 0x108);
        assert_eq!(table.entry(7).unwrap().end, 0x10C);
        assert_eq!(cursor, 0x10C);

        let fat_offset = 0x200;
        table.link_fat(&mut rom, fat_offset).unwrap();
        // Overlay 3 got file ID 2 (watermark past the fixed ID 1).
        assert_eq!(rom.read_u32_at(fat_offset + 2 * 8).unwrap(), 0x100);
        assert_eq!(rom.read_u32_at(fat_offset + 2 * 8 + 4).unwrap(), 0x108);
        assert_eq!(rom.read_u32_at(fat_offset + 8).unwrap(), 0x108);
        assert_eq!(rom.read_u32_at(fat_offset + 8 + 4).unwrap(), 0x10C);
    }

    #[test]
    fn missing_payload_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut rom = image_with_records(&[record(9, 0, 0x00)]);
        let mut table = OverlayTable::scan(&rom, 0, RECORD_SIZE, UPDATE_FLAG).unwrap();
        let mut cursor = 0x100;
        assert!(matches!(
            table.place_payloads(&mut rom, dir.path(), &mut cursor),
            Err(NitroError::MissingOverlayPayload { overlay_id: 9, .. })
        ));
    }
}
