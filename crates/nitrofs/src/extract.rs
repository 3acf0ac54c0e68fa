//! The decode pipeline: reads a packed ROM image and dumps its fixed
//! sections, overlay payloads and the Nitro filesystem tree to disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::banner;
use crate::error::NitroError;
use crate::fnt;
use crate::header;
use crate::overlay::RECORD_SIZE;
use crate::rom::{RomImage, MAX_IMAGE_SIZE};
use crate::tree::{Directory, ROOT_DIR_ID};

const RSA_SIGNATURE_SIZE: usize = 136;

pub struct RomExtractor {
    rom: RomImage,
}

impl RomExtractor {
    /// Reads the ROM image from disk. Images over 1 GiB are rejected.
    pub fn open(path: &Path) -> Result<Self, NitroError> {
        let meta = fs::metadata(path).map_err(|source| NitroError::Section {
            path: path.to_owned(),
            source,
        })?;
        if !meta.is_file() {
            return Err(NitroError::MissingSection {
                path: path.to_owned(),
            });
        }
        if meta.len() > MAX_IMAGE_SIZE as u64 {
            return Err(NitroError::SectionTooLarge {
                path: path.to_owned(),
                size: meta.len(),
                limit: MAX_IMAGE_SIZE as u64,
            });
        }
        let bytes = fs::read(path).map_err(|source| NitroError::Section {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::from_image(RomImage::from_bytes(bytes)))
    }

    pub fn from_image(rom: RomImage) -> Self {
        Self { rom }
    }

    /// Dumps every section and the data tree below `out`: fixed sections as
    /// `*.bin` files, overlay payloads under `overlay9/` and `overlay7/`,
    /// the file tree under `root/`. Files that already exist are skipped
    /// with a warning so an interrupted extraction can be resumed.
    pub fn extract_to(&self, out: &Path) -> Result<(), NitroError> {
        let data_dir = out.join("root");
        let ov9_dir = out.join("overlay9");
        let ov7_dir = out.join("overlay7");
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&ov9_dir)?;
        fs::create_dir_all(&ov7_dir)?;

        let arm9_offset = self.rom.read_u32_at(header::ARM9_OFFSET)? as usize;
        let arm9_size = self.rom.read_u32_at(header::ARM9_SIZE)? as usize;
        let arm7_offset = self.rom.read_u32_at(header::ARM7_OFFSET)? as usize;
        let arm7_size = self.rom.read_u32_at(header::ARM7_SIZE)? as usize;
        let ovt9_offset = self.rom.read_u32_at(header::OVT9_OFFSET)? as usize;
        let ovt9_size = self.rom.read_u32_at(header::OVT9_SIZE)? as usize;
        let ovt7_offset = self.rom.read_u32_at(header::OVT7_OFFSET)? as usize;
        let ovt7_size = self.rom.read_u32_at(header::OVT7_SIZE)? as usize;
        let fnt_offset = self.rom.read_u32_at(header::FNT_OFFSET)? as usize;
        let fnt_size = self.rom.read_u32_at(header::FNT_SIZE)? as usize;
        let fat_offset = self.rom.read_u32_at(header::FAT_OFFSET)? as usize;
        let fat_size = self.rom.read_u32_at(header::FAT_SIZE)? as usize;
        let icon_offset = self.rom.read_u32_at(header::ICON_OFFSET)? as usize;
        let rsa_offset = self.rom.read_u32_at(header::TOTAL_SIZE)? as usize;

        info!("extracting fixed sections");
        self.dump_section(&out.join("header.bin"), 0, header::HEADER_SIZE)?;
        self.dump_section(&out.join("arm9.bin"), arm9_offset, arm9_size)?;
        self.dump_section(&out.join("arm7.bin"), arm7_offset, arm7_size)?;
        self.dump_section(&out.join("arm9ovt.bin"), ovt9_offset, ovt9_size)?;
        self.dump_section(&out.join("arm7ovt.bin"), ovt7_offset, ovt7_size)?;
        self.dump_section(&out.join("fnt.bin"), fnt_offset, fnt_size)?;
        self.dump_section(&out.join("fat.bin"), fat_offset, fat_size)?;
        self.dump_section(&out.join("rsasig.bin"), rsa_offset, RSA_SIGNATURE_SIZE)?;
        self.dump_banner(&out.join("banner.bin"), icon_offset)?;

        info!("extracting ARM9 overlays");
        self.dump_overlays(&ov9_dir, ovt9_offset, ovt9_size, fat_offset)?;
        info!("extracting ARM7 overlays");
        self.dump_overlays(&ov7_dir, ovt7_offset, ovt7_size, fat_offset)?;

        info!("extracting data files");
        let root = fnt::decode(self.rom.bytes_at(fnt_offset, fnt_size)?, ROOT_DIR_ID)?;
        self.dump_tree(&root, &data_dir, fat_offset)?;

        Ok(())
    }

    fn dump_section(&self, path: &PathBuf, offset: usize, size: usize) -> Result<(), NitroError> {
        if path.exists() {
            warn!(file = %path.display(), "file already exists, skipping");
            return Ok(());
        }
        let data = self.rom.bytes_at(offset, size)?;
        write_new_file(path, data)?;
        debug!(file = %path.display(), size, "extracted section");
        Ok(())
    }

    /// The banner's size comes from its version word; an image without an
    /// icon offset yields an empty banner file.
    fn dump_banner(&self, path: &PathBuf, icon_offset: usize) -> Result<(), NitroError> {
        if path.exists() {
            warn!(file = %path.display(), "file already exists, skipping");
            return Ok(());
        }
        let size = if icon_offset != 0 {
            let version = self.rom.read_u16_at(icon_offset)?;
            match banner::size_for_version(version) {
                Some(size) => size,
                None => {
                    warn!(version, "unknown icon/banner version, defaulting to 0x840");
                    banner::DEFAULT_SIZE
                }
            }
        } else {
            info!("no icon/banner present");
            0
        };
        write_new_file(path, self.rom.bytes_at(icon_offset, size)?)?;
        Ok(())
    }

    fn dump_overlays(
        &self,
        dir: &Path,
        table_offset: usize,
        table_size: usize,
        fat_offset: usize,
    ) -> Result<(), NitroError> {
        for i in 0..table_size / RECORD_SIZE {
            let rec = table_offset + i * RECORD_SIZE;
            let overlay_id = self.rom.read_u32_at(rec)?;
            let file_id = self.rom.read_u16_at(rec + 24)? as usize;
            let start = self.rom.read_u32_at(fat_offset + file_id * 8)? as usize;
            let end = self.rom.read_u32_at(fat_offset + file_id * 8 + 4)? as usize;

            let path = dir.join(format!("{overlay_id}.bin"));
            if path.exists() {
                warn!(file = %path.display(), "overlay already exists, skipping");
                continue;
            }
            let data = match self.rom.bytes_at(start, end.saturating_sub(start)) {
                Ok(data) => data,
                Err(err) => {
                    // A stale FAT entry only loses this one overlay.
                    warn!(file = %path.display(), %err, "overlay data out of range, skipping");
                    continue;
                }
            };
            write_new_file(&path, data)?;
            debug!(overlay_id, file_id, "extracted overlay");
        }
        Ok(())
    }

    fn dump_tree(&self, dir: &Directory, path: &Path, fat_offset: usize) -> Result<(), NitroError> {
        for (i, name) in dir.files.iter().enumerate() {
            let file_path = path.join(name);
            if file_path.exists() {
                warn!(file = %file_path.display(), "file already exists, skipping");
                continue;
            }

            let file_id = (dir.first_file_id + i as u16) as usize;
            let start = self.rom.read_u32_at(fat_offset + file_id * 8)? as usize;
            let end = self.rom.read_u32_at(fat_offset + file_id * 8 + 4)? as usize;
            let data = match self.rom.bytes_at(start, end.saturating_sub(start)) {
                Ok(data) => data,
                Err(err) => {
                    // A stale FAT entry only loses this one file.
                    warn!(file = %file_path.display(), %err, "file data out of range, skipping");
                    continue;
                }
            };
            write_new_file(&file_path, data)?;
            debug!(file = %file_path.display(), file_id, "extracted file");
        }

        for sub in &dir.subdirs {
            let sub_path = path.join(&sub.name);
            if !sub_path.is_dir() {
                fs::create_dir_all(&sub_path)?;
            }
            self.dump_tree(sub, &sub_path, fat_offset)?;
        }
        Ok(())
    }
}

fn write_new_file(path: &Path, data: &[u8]) -> Result<(), NitroError> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    Ok(())
}
