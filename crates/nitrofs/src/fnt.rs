//! File Name Table codec.
//!
//! The FNT starts with an array of 8-byte header slots, one per directory,
//! indexed by the low 12 bits of the directory ID: a u32 sub-table offset,
//! a u16 first file ID and a u16 parent ID (the parent field is written but
//! never read back). The sub-table is a run of length-prefixed names; a
//! length byte with the high bit set marks a subdirectory entry, which
//! carries a trailing u16 child directory ID.

use byteorder::{ByteOrder, LE};
use tracing::warn;

use crate::error::NitroError;
use crate::tree::Directory;

/// Decodes the directory with ID `dir_id` (the root uses
/// [`crate::tree::ROOT_DIR_ID`]) and, recursively, everything below it.
///
/// The reserved 0x80 length marker aborts the current directory's sub-table
/// with a warning but is not an error; reads past the declared table size
/// are.
pub fn decode(fnt: &[u8], dir_id: u16) -> Result<Directory, NitroError> {
    let slot = (dir_id as usize & 0xFFF) * 8;
    check(fnt, slot, 8)?;
    let sub_offset = LE::read_u32(&fnt[slot..]) as usize;
    let first_file_id = LE::read_u16(&fnt[slot + 4..]);

    let mut dir = Directory {
        directory_id: dir_id,
        first_file_id,
        ..Directory::default()
    };

    let mut offset = sub_offset;
    while offset < fnt.len() {
        let len = fnt[offset];
        offset += 1;

        if len == 0x00 {
            break;
        }
        if len == 0x80 {
            warn!(
                directory_id = dir_id,
                "reserved FNT length marker 0x80, skipping rest of directory"
            );
            break;
        }

        let is_subdir = len & 0x80 != 0;
        let name_len = (len & 0x7F) as usize;
        check(fnt, offset, name_len)?;
        let name = String::from_utf8_lossy(&fnt[offset..offset + name_len]).into_owned();
        offset += name_len;

        if is_subdir {
            check(fnt, offset, 2)?;
            let child_id = LE::read_u16(&fnt[offset..]);
            offset += 2;
            let mut sub = decode(fnt, child_id)?;
            sub.name = name;
            dir.subdirs.push(sub);
        } else {
            dir.files.push(name);
        }
    }

    Ok(dir)
}

fn check(fnt: &[u8], offset: usize, size: usize) -> Result<(), NitroError> {
    match offset.checked_add(size) {
        Some(end) if end <= fnt.len() => Ok(()),
        _ => Err(NitroError::OutOfBounds {
            offset,
            size,
            len: fnt.len(),
        }),
    }
}

/// Header bytes: one 8-byte slot per directory, plus one for the root.
fn header_len(root: &Directory) -> usize {
    (root.directory_count() + 1) * 8
}

fn body_len(dir: &Directory) -> usize {
    let mut bytes = 0;
    for name in &dir.files {
        bytes += name.len() + 1;
    }
    for sub in &dir.subdirs {
        bytes += sub.name.len() + 3;
        bytes += body_len(sub);
    }
    bytes + 1
}

/// Total encoded size of the table; computed before [`encode`] writes it.
pub fn encoded_len(root: &Directory) -> usize {
    header_len(root) + body_len(root)
}

/// Serializes the tree into a fresh FNT byte region.
///
/// Header slots are indexed by directory ID and can be written in any
/// order; the body must be written "self fully, then children" because each
/// directory's entries are contiguous and determine the offsets of its
/// siblings. The root's parent field holds the total directory count.
///
/// The length byte holds 7 bits of name length plus the subdirectory bit,
/// so any name over 127 bytes is rejected before writing; names come from
/// arbitrary on-disk trees and cannot be trusted to fit.
pub fn encode(root: &Directory) -> Result<Vec<u8>, NitroError> {
    check_name_lengths(root)?;
    let header_len = header_len(root);
    let mut fnt = vec![0u8; encoded_len(root)];
    write_directory(root, &mut fnt, header_len, (header_len / 8) as u16);
    Ok(fnt)
}

fn check_name_lengths(dir: &Directory) -> Result<(), NitroError> {
    for name in &dir.files {
        if name.len() > 0x7F {
            return Err(NitroError::NameTooLong {
                name: name.clone(),
                len: name.len(),
            });
        }
    }
    for sub in &dir.subdirs {
        if sub.name.len() > 0x7F {
            return Err(NitroError::NameTooLong {
                name: sub.name.clone(),
                len: sub.name.len(),
            });
        }
        check_name_lengths(sub)?;
    }
    Ok(())
}

fn write_directory(dir: &Directory, fnt: &mut [u8], mut offset: usize, parent_id: u16) -> usize {
    let slot = (dir.directory_id as usize & 0xFFF) * 8;
    LE::write_u32(&mut fnt[slot..], offset as u32);
    LE::write_u16(&mut fnt[slot + 4..], dir.first_file_id);
    LE::write_u16(&mut fnt[slot + 6..], parent_id);

    for name in &dir.files {
        fnt[offset] = name.len() as u8;
        fnt[offset + 1..offset + 1 + name.len()].copy_from_slice(name.as_bytes());
        offset += name.len() + 1;
    }

    for sub in &dir.subdirs {
        fnt[offset] = sub.name.len() as u8 | 0x80;
        fnt[offset + 1..offset + 1 + sub.name.len()].copy_from_slice(sub.name.as_bytes());
        LE::write_u16(&mut fnt[offset + 1 + sub.name.len()..], sub.directory_id);
        offset += sub.name.len() + 3;
    }

    fnt[offset] = 0x00;
    offset += 1;

    for sub in &dir.subdirs {
        offset = write_directory(sub, fnt, offset, dir.directory_id);
    }

    offset
}
