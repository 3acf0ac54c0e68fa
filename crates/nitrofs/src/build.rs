//! The encode pipeline: places every fixed section into a fresh image in
//! ROM order, resolves overlay file IDs, produces the FNT according to the
//! selected build mode, allocates and links the FAT, and finishes with the
//! header fixup.

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LE};
use tracing::{debug, info, warn};

use crate::banner;
use crate::error::NitroError;
use crate::fnt;
use crate::header::{self, SectionLayout};
use crate::overlay::{OverlayTable, RECORD_SIZE};
use crate::rom::{align_to, RomImage, MAX_IMAGE_SIZE};
use crate::tree::{self, Directory, IdAllocator, ROOT_DIR_ID};

/// ARM9/ARM7 binaries may not exceed this (the DS main RAM ceiling).
const ARM_BINARY_LIMIT: u64 = 0x3BFE00;

const RSA_SIGNATURE_SIZE: usize = 136;

/// How file IDs are (re)assigned when packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Use the supplied FNT verbatim; only its free-file-ID watermark is
    /// consumed. No on-disk merge, no re-encode.
    Keep,
    /// Decode the supplied FNT, merge in on-disk files and directories it
    /// does not know about, and re-encode the extended tree.
    Adjust,
    /// Ignore any supplied FNT and synthesize the tree purely from the
    /// on-disk root.
    Calculate,
}

/// Resolved build inputs. Produced by the caller from its rule file; every
/// path has already been checked for existence and kind.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub mode: BuildMode,
    pub header: PathBuf,
    pub arm9: PathBuf,
    pub arm7: PathBuf,
    pub arm9_overlay_table: PathBuf,
    pub arm7_overlay_table: PathBuf,
    pub arm9_overlay_dir: PathBuf,
    pub arm7_overlay_dir: PathBuf,
    /// Read in Keep and Adjust modes; ignored by Calculate.
    pub fnt: PathBuf,
    pub data_dir: PathBuf,
    pub icon: PathBuf,
    pub rsa_signature: PathBuf,
    /// Flag byte value marking overlay records that need a file ID.
    pub overlay_update_flag: u8,
    pub arm9_entry: Option<u32>,
    pub arm9_load: Option<u32>,
    pub arm7_entry: Option<u32>,
    pub arm7_load: Option<u32>,
}

/// Builds the complete ROM image described by `config`.
pub fn build(config: &BuildConfig) -> Result<RomImage, NitroError> {
    info!(header = %config.header.display(), "reading ROM header");
    let header_bytes = read_header(&config.header)?;
    let mut rom = RomImage::with_capacity_exponent(header_bytes[header::CAPACITY])?;
    rom.write_bytes_at(0, &header_bytes)?;
    let mut cursor = header::HEADER_SIZE;

    info!(arm9 = %config.arm9.display(), "adding ARM9 binary");
    let arm9 = read_section(&config.arm9, ARM_BINARY_LIMIT)?;
    let arm9_offset = cursor;
    rom.write_bytes_at(cursor, &arm9)?;
    cursor = (cursor + arm9.len()).max(0x8000);

    info!(table = %config.arm9_overlay_table.display(), "adding ARM9 overlay table");
    let (mut ovt9, ovt9_offset, ovt9_size) = place_overlay_table(
        &mut rom,
        &mut cursor,
        &config.arm9_overlay_table,
        config.overlay_update_flag,
    )?;
    ovt9.place_payloads(&mut rom, &config.arm9_overlay_dir, &mut cursor)?;
    cursor = align_to(cursor, 512);

    info!(arm7 = %config.arm7.display(), "adding ARM7 binary");
    let arm7 = read_section(&config.arm7, ARM_BINARY_LIMIT)?;
    let arm7_offset = cursor;
    rom.write_bytes_at(cursor, &arm7)?;
    cursor = align_to(cursor + arm7.len(), 4);

    info!(table = %config.arm7_overlay_table.display(), "adding ARM7 overlay table");
    let (mut ovt7, ovt7_offset, ovt7_size) = place_overlay_table(
        &mut rom,
        &mut cursor,
        &config.arm7_overlay_table,
        config.overlay_update_flag,
    )?;
    ovt7.place_payloads(&mut rom, &config.arm7_overlay_dir, &mut cursor)?;
    cursor = align_to(cursor, 4);

    // Overlay file IDs always occupy the low end of the ID space: both
    // tables are resolved before any file-tree ID is handed out.
    let overlay_watermark = ovt9.fixed_id_watermark().max(ovt7.fixed_id_watermark());

    let fnt_offset = cursor;
    let fnt_size;
    let root;
    let mut next_file_id;
    match config.mode {
        BuildMode::Keep => {
            info!(fnt = %config.fnt.display(), "keeping supplied file name table");
            let fnt_bytes = read_section(&config.fnt, MAX_IMAGE_SIZE as u64)?;
            rom.write_bytes_at(cursor, &fnt_bytes)?;
            let tree = fnt::decode(&fnt_bytes, ROOT_DIR_ID)?;
            next_file_id = overlay_watermark.max(tree.next_free_file_id());
            fnt_size = fnt_bytes.len();
            cursor = align_to(cursor + fnt_size, 4);

            ovt9.assign_file_ids(&mut rom, &mut next_file_id)?;
            ovt7.assign_file_ids(&mut rom, &mut next_file_id)?;
            root = tree;
        }
        BuildMode::Adjust => {
            info!(fnt = %config.fnt.display(), "adjusting supplied file name table");
            let fnt_bytes = read_section(&config.fnt, MAX_IMAGE_SIZE as u64)?;
            let mut tree = fnt::decode(&fnt_bytes, ROOT_DIR_ID)?;
            let mut ids = IdAllocator {
                next_file_id: overlay_watermark.max(tree.next_free_file_id()),
                next_dir_id: tree.next_free_dir_id(),
            };

            ovt9.assign_file_ids(&mut rom, &mut ids.next_file_id)?;
            ovt7.assign_file_ids(&mut rom, &mut ids.next_file_id)?;

            tree::merge_from_disk(&mut tree, &config.data_dir, &mut ids)?;
            let encoded = fnt::encode(&tree)?;
            rom.write_bytes_at(cursor, &encoded)?;
            fnt_size = encoded.len();
            cursor = align_to(cursor + fnt_size, 4);

            next_file_id = ids.next_file_id;
            root = tree;
        }
        BuildMode::Calculate => {
            info!(data = %config.data_dir.display(), "calculating file name table from disk");
            next_file_id = overlay_watermark;
            ovt9.assign_file_ids(&mut rom, &mut next_file_id)?;
            ovt7.assign_file_ids(&mut rom, &mut next_file_id)?;

            let mut tree = tree::root_from_disk(&config.data_dir, next_file_id)?;
            let mut ids = IdAllocator {
                next_file_id: next_file_id + tree.files.len() as u16,
                next_dir_id: tree.next_free_dir_id(),
            };
            tree::merge_from_disk(&mut tree, &config.data_dir, &mut ids)?;

            let encoded = fnt::encode(&tree)?;
            rom.write_bytes_at(cursor, &encoded)?;
            fnt_size = encoded.len();
            cursor = align_to(cursor + fnt_size, 4);

            next_file_id = ids.next_file_id;
            root = tree;
        }
    }

    for (path, file_id) in root.file_ids(&config.data_dir) {
        debug!(file_id, file = %path.display(), "file name table entry");
    }

    info!("allocating file allocation table");
    let fat_offset = cursor;
    let fat_size = next_file_id as usize * 8;
    rom.fill_at(fat_offset, fat_size, 0x00)?;
    cursor = align_to(cursor + fat_size, 512);

    ovt9.link_fat(&mut rom, fat_offset)?;
    ovt7.link_fat(&mut rom, fat_offset)?;

    info!(icon = %config.icon.display(), "adding icon/banner");
    let icon_offset = cursor;
    place_banner(&mut rom, &config.icon, &mut cursor)?;
    cursor = align_to(cursor, 512);

    info!("adding Nitro filesystem payload");
    place_tree_files(&mut rom, fat_offset, &root, &config.data_dir, &mut cursor)?;

    info!(signature = %config.rsa_signature.display(), "adding RSA signature");
    let rsa = read_section(&config.rsa_signature, MAX_IMAGE_SIZE as u64)?;
    if rsa.len() != RSA_SIGNATURE_SIZE {
        return Err(NitroError::InvalidSignatureSize {
            size: rsa.len() as u64,
        });
    }
    // The signature sits at the end of the image; the total-size header
    // word records where it starts, which is how extraction finds it.
    rom.write_bytes_at(cursor, &rsa)?;

    info!("fixing ROM header");
    let layout = SectionLayout {
        arm9_offset: arm9_offset as u32,
        arm9_size: arm9.len() as u32,
        arm7_offset: arm7_offset as u32,
        arm7_size: arm7.len() as u32,
        fnt_offset: fnt_offset as u32,
        fnt_size: fnt_size as u32,
        fat_offset: fat_offset as u32,
        fat_size: fat_size as u32,
        ovt9_offset: ovt9_offset as u32,
        ovt9_size: ovt9_size as u32,
        ovt7_offset: ovt7_offset as u32,
        ovt7_size: ovt7_size as u32,
        icon_offset: icon_offset as u32,
        total_size: cursor as u32,
        arm9_entry: config.arm9_entry,
        arm9_load: config.arm9_load,
        arm7_entry: config.arm7_entry,
        arm7_load: config.arm7_load,
    };
    layout.apply(&mut rom)?;

    Ok(rom)
}

/// Reads the header file (0x200 or 0x4000 bytes) and zero-extends the
/// short form to the full 0x4000 bytes.
fn read_header(path: &Path) -> Result<Vec<u8>, NitroError> {
    let mut bytes = read_section(path, header::HEADER_SIZE as u64)?;
    if bytes.len() != 0x200 && bytes.len() != 0x4000 {
        return Err(NitroError::InvalidHeaderSize {
            size: bytes.len() as u64,
        });
    }
    bytes.resize(header::HEADER_SIZE, 0);
    Ok(bytes)
}

fn read_section(path: &Path, limit: u64) -> Result<Vec<u8>, NitroError> {
    let meta = fs::metadata(path).map_err(|source| NitroError::Section {
        path: path.to_owned(),
        source,
    })?;
    if !meta.is_file() {
        return Err(NitroError::MissingSection {
            path: path.to_owned(),
        });
    }
    if meta.len() > limit {
        return Err(NitroError::SectionTooLarge {
            path: path.to_owned(),
            size: meta.len(),
            limit,
        });
    }
    fs::read(path).map_err(|source| NitroError::Section {
        path: path.to_owned(),
        source,
    })
}

/// Aligns the cursor (16 for a non-empty table, 4 otherwise), copies the
/// table into the image and scans its records.
fn place_overlay_table(
    rom: &mut RomImage,
    cursor: &mut usize,
    path: &Path,
    update_flag: u8,
) -> Result<(OverlayTable, usize, usize), NitroError> {
    let data = read_section(path, MAX_IMAGE_SIZE as u64)?;
    if data.len() % RECORD_SIZE != 0 {
        return Err(NitroError::InvalidOverlayTable {
            path: path.to_owned(),
        });
    }

    *cursor = align_to(*cursor, if data.is_empty() { 4 } else { 16 });
    rom.reserve(*cursor, 4)?;
    let offset = *cursor;
    if !data.is_empty() {
        rom.write_bytes_at(offset, &data)?;
    }
    let table = OverlayTable::scan(rom, offset, data.len(), update_flag)?;
    *cursor += data.len();
    Ok((table, offset, data.len()))
}

/// Copies the banner, sized by its version word.
fn place_banner(rom: &mut RomImage, path: &Path, cursor: &mut usize) -> Result<(), NitroError> {
    let data = read_section(path, MAX_IMAGE_SIZE as u64)?;
    let version = if data.len() >= 2 { LE::read_u16(&data) } else { 0 };
    let size = match banner::size_for_version(version) {
        Some(size) => size,
        None => {
            warn!(version, "unknown icon/banner version, defaulting to 0x840");
            banner::DEFAULT_SIZE
        }
    };
    if data.len() > size {
        return Err(NitroError::SectionTooLarge {
            path: path.to_owned(),
            size: data.len() as u64,
            limit: size as u64,
        });
    }
    rom.reserve(*cursor, size)?;
    rom.write_bytes_at(*cursor, &data)?;
    *cursor += size;
    Ok(())
}

/// Copies every file of the tree into the image in traversal order,
/// patching its FAT slot as it goes. A missing or oversized payload is a
/// warning: its file ID stays allocated and its FAT entry stays zero.
fn place_tree_files(
    rom: &mut RomImage,
    fat_offset: usize,
    dir: &Directory,
    path: &Path,
    cursor: &mut usize,
) -> Result<(), NitroError> {
    for (i, name) in dir.files.iter().enumerate() {
        let file_id = dir.first_file_id + i as u16;
        let file_path = path.join(name);

        let len = match fs::metadata(&file_path) {
            Ok(meta) if meta.len() <= MAX_IMAGE_SIZE as u64 => meta.len(),
            Ok(meta) => {
                warn!(
                    file = %file_path.display(),
                    size = meta.len(),
                    "file exceeds 1 GiB, skipping"
                );
                continue;
            }
            Err(err) => {
                warn!(file = %file_path.display(), %err, "failed to stat file, skipping");
                continue;
            }
        };
        let data = match fs::read(&file_path) {
            Ok(data) => data,
            Err(err) => {
                warn!(file = %file_path.display(), %err, "failed to read file, skipping");
                continue;
            }
        };
        debug_assert_eq!(data.len() as u64, len);

        rom.write_bytes_at(*cursor, &data)?;
        rom.write_u32_at(fat_offset + file_id as usize * 8, *cursor as u32)?;
        rom.write_u32_at(
            fat_offset + file_id as usize * 8 + 4,
            (*cursor + data.len()) as u32,
        )?;
        debug!(file = %file_path.display(), file_id, "added and linked file to FAT");

        *cursor = align_to(*cursor + data.len(), 4);
    }

    for sub in &dir.subdirs {
        place_tree_files(rom, fat_offset, sub, &path.join(&sub.name), cursor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    fn write_file(path: &Path, data: &[u8]) {
        File::create(path).unwrap().write_all(data).unwrap();
    }

    /// Lays out a minimal but complete set of build inputs.
    fn scaffold(dir: &Path, mode: BuildMode) -> BuildConfig {
        let mut header = vec![0u8; 0x200];
        header[header::CAPACITY] = 0; // 0x20000-byte image
        write_file(&dir.join("header.bin"), &header);
        write_file(&dir.join("arm9.bin"), &[0x9A; 0x40]);
        write_file(&dir.join("arm7.bin"), &[0x7A; 0x20]);
        write_file(&dir.join("arm9ovt.bin"), &[]);
        write_file(&dir.join("arm7ovt.bin"), &[]);

        let mut icon = vec![0u8; 0x840];
        icon[0] = 0x01; // version 0x0001
        write_file(&dir.join("banner.bin"), &icon);
        write_file(&dir.join("rsasig.bin"), &[0x51; 136]);

        fs::create_dir_all(dir.join("root")).unwrap();
        fs::create_dir_all(dir.join("overlay9")).unwrap();
        fs::create_dir_all(dir.join("overlay7")).unwrap();
        write_file(&dir.join("fnt.bin"), &fnt::encode(&Directory {
            directory_id: ROOT_DIR_ID,
            ..Directory::default()
        }).unwrap());

        BuildConfig {
            mode,
            header: dir.join("header.bin"),
            arm9: dir.join("arm9.bin"),
            arm7: dir.join("arm7.bin"),
            arm9_overlay_table: dir.join("arm9ovt.bin"),
            arm7_overlay_table: dir.join("arm7ovt.bin"),
            arm9_overlay_dir: dir.join("overlay9"),
            arm7_overlay_dir: dir.join("overlay7"),
            fnt: dir.join("fnt.bin"),
            data_dir: dir.join("root"),
            icon: dir.join("banner.bin"),
            rsa_signature: dir.join("rsasig.bin"),
            overlay_update_flag: 0x02,
            arm9_entry: None,
            arm9_load: None,
            arm7_entry: None,
            arm7_load: None,
        }
    }

    #[test]
    fn calculate_mode_builds_from_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Calculate);
        write_file(&config.data_dir.join("b.bin"), &[0xB0; 4]);
        write_file(&config.data_dir.join("a.bin"), &[0xA0; 4]);

        let rom = build(&config).unwrap();

        let fnt_offset = rom.read_u32_at(header::FNT_OFFSET).unwrap() as usize;
        let fnt_size = rom.read_u32_at(header::FNT_SIZE).unwrap() as usize;
        let tree = fnt::decode(rom.bytes_at(fnt_offset, fnt_size).unwrap(), ROOT_DIR_ID).unwrap();
        // No overlays: file IDs start at zero, sorted order.
        assert_eq!(tree.first_file_id, 0);
        assert_eq!(tree.files, vec!["a.bin".to_string(), "b.bin".to_string()]);

        let fat_offset = rom.read_u32_at(header::FAT_OFFSET).unwrap() as usize;
        assert_eq!(rom.read_u32_at(header::FAT_SIZE).unwrap(), 16);
        let a_start = rom.read_u32_at(fat_offset).unwrap() as usize;
        let a_end = rom.read_u32_at(fat_offset + 4).unwrap() as usize;
        assert_eq!(rom.bytes_at(a_start, a_end - a_start).unwrap(), &[0xA0; 4]);

        // The signature sits at the recorded total size.
        let total = rom.read_u32_at(header::TOTAL_SIZE).unwrap() as usize;
        assert_eq!(rom.bytes_at(total, 136).unwrap(), &[0x51; 136]);
        assert_eq!(
            rom.read_u32_at(header::TOTAL_SIZE_MIRROR).unwrap() as usize,
            total
        );
    }

    #[test]
    fn keep_mode_preserves_fnt_bytes_and_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Keep);

        let tree = Directory {
            directory_id: ROOT_DIR_ID,
            first_file_id: 0,
            name: String::new(),
            files: vec!["x.bin".into()],
            subdirs: vec![],
        };
        let fnt_bytes = fnt::encode(&tree).unwrap();
        write_file(&config.fnt, &fnt_bytes);
        write_file(&config.data_dir.join("x.bin"), &[0xEE; 8]);
        // Present on disk but absent from the FNT: Keep must not pick it up.
        write_file(&config.data_dir.join("extra.bin"), &[0xDD; 8]);

        let rom = build(&config).unwrap();

        let fnt_offset = rom.read_u32_at(header::FNT_OFFSET).unwrap() as usize;
        let fnt_size = rom.read_u32_at(header::FNT_SIZE).unwrap() as usize;
        assert_eq!(fnt_size, fnt_bytes.len());
        assert_eq!(rom.bytes_at(fnt_offset, fnt_size).unwrap(), &fnt_bytes[..]);
        assert_eq!(rom.read_u32_at(header::FAT_SIZE).unwrap(), 8);
    }

    #[test]
    fn adjust_mode_extends_the_supplied_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Adjust);

        let tree = Directory {
            directory_id: ROOT_DIR_ID,
            first_file_id: 0,
            name: String::new(),
            files: vec!["x.bin".into()],
            subdirs: vec![],
        };
        write_file(&config.fnt, &fnt::encode(&tree).unwrap());
        write_file(&config.data_dir.join("x.bin"), &[0xEE; 8]);
        fs::create_dir(config.data_dir.join("new")).unwrap();
        write_file(&config.data_dir.join("new/y.bin"), &[0xCC; 4]);

        let rom = build(&config).unwrap();

        let fnt_offset = rom.read_u32_at(header::FNT_OFFSET).unwrap() as usize;
        let fnt_size = rom.read_u32_at(header::FNT_SIZE).unwrap() as usize;
        let decoded =
            fnt::decode(rom.bytes_at(fnt_offset, fnt_size).unwrap(), ROOT_DIR_ID).unwrap();

        // Output set is a superset of the FNT's.
        assert_eq!(decoded.files, vec!["x.bin".to_string()]);
        assert_eq!(decoded.subdirs.len(), 1);
        assert_eq!(decoded.subdirs[0].name, "new");
        assert_eq!(decoded.subdirs[0].directory_id, 0xF001);
        assert_eq!(decoded.subdirs[0].first_file_id, 1);
        assert_eq!(rom.read_u32_at(header::FAT_SIZE).unwrap(), 16);
    }

    #[test]
    fn overlay_ids_resolve_below_tree_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scaffold(dir.path(), BuildMode::Calculate);
        config.overlay_update_flag = 0x02;

        // One record needing assignment, overlay ID 3.
        let mut record = [0u8; RECORD_SIZE];
        LE::write_u32(&mut record[0..], 3);
        record[31] = 0x02;
        write_file(&config.arm9_overlay_table, &record);
        write_file(&config.arm9_overlay_dir.join("3.bin"), &[0x33; 12]);
        write_file(&config.data_dir.join("a.bin"), &[0xA0; 4]);

        let rom = build(&config).unwrap();

        let ovt9_offset = rom.read_u32_at(header::OVT9_OFFSET).unwrap() as usize;
        // Overlay got file ID 0; record patched and flag resolved.
        assert_eq!(rom.read_u16_at(ovt9_offset + 24).unwrap(), 0);
        assert_eq!(rom.read_u16_at(ovt9_offset + 26).unwrap(), 0);
        assert_eq!(rom.read_u8_at(ovt9_offset + 31).unwrap(), 3);

        let fat_offset = rom.read_u32_at(header::FAT_OFFSET).unwrap() as usize;
        let ov_start = rom.read_u32_at(fat_offset).unwrap() as usize;
        let ov_end = rom.read_u32_at(fat_offset + 4).unwrap() as usize;
        assert_eq!(rom.bytes_at(ov_start, ov_end - ov_start).unwrap(), &[0x33; 12]);

        // Tree file came after the overlay in the ID space.
        let fnt_offset = rom.read_u32_at(header::FNT_OFFSET).unwrap() as usize;
        let fnt_size = rom.read_u32_at(header::FNT_SIZE).unwrap() as usize;
        let tree = fnt::decode(rom.bytes_at(fnt_offset, fnt_size).unwrap(), ROOT_DIR_ID).unwrap();
        assert_eq!(tree.first_file_id, 1);
    }

    #[test]
    fn overlong_disk_file_name_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Calculate);
        write_file(&config.data_dir.join("n".repeat(128)), &[0xA0; 4]);
        assert!(matches!(
            build(&config),
            Err(NitroError::NameTooLong { len: 128, .. })
        ));
    }

    #[test]
    fn bad_rsa_signature_size_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Calculate);
        write_file(&config.rsa_signature, &[0x51; 100]);
        assert!(matches!(
            build(&config),
            Err(NitroError::InvalidSignatureSize { size: 100 })
        ));
    }

    #[test]
    fn bad_header_size_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Calculate);
        write_file(&config.header, &[0u8; 0x300]);
        assert!(matches!(
            build(&config),
            Err(NitroError::InvalidHeaderSize { size: 0x300 })
        ));
    }

    #[test]
    fn misaligned_overlay_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = scaffold(dir.path(), BuildMode::Calculate);
        write_file(&config.arm9_overlay_table, &[0u8; 33]);
        assert!(matches!(
            build(&config),
            Err(NitroError::InvalidOverlayTable { .. })
        ));
    }
}
