//! In-memory model of the Nitro filesystem hierarchy.
//!
//! A [`Directory`] owns its children outright; there are no back-references.
//! File IDs are implicit: the file at index `i` of a directory has ID
//! `first_file_id + i`, and IDs are globally monotonic in tree order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::NitroError;

/// Directory ID of the filesystem root. The high nibble is fixed; the low
/// 12 bits index the FNT header array.
pub const ROOT_DIR_ID: u16 = 0xF000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub directory_id: u16,
    pub first_file_id: u16,
    /// Empty for the root directory.
    pub name: String,
    pub files: Vec<String>,
    pub subdirs: Vec<Directory>,
}

impl Directory {
    /// Highest file ID in use anywhere below this directory, plus one.
    pub fn next_free_file_id(&self) -> u16 {
        let mut free = self.first_file_id + self.files.len() as u16;
        for sub in &self.subdirs {
            free = free.max(sub.next_free_file_id());
        }
        free
    }

    /// Highest directory ID in use anywhere below this directory, plus one.
    pub fn next_free_dir_id(&self) -> u16 {
        let mut free = self.directory_id + 1;
        for sub in &self.subdirs {
            free = free.max(sub.next_free_dir_id());
        }
        free
    }

    /// Number of directories below this one, not counting `self`.
    pub fn directory_count(&self) -> usize {
        self.subdirs.len()
            + self
                .subdirs
                .iter()
                .map(Directory::directory_count)
                .sum::<usize>()
    }

    pub fn subdir_index(&self, name: &str) -> Option<usize> {
        self.subdirs.iter().position(|sub| sub.name == name)
    }

    /// Every (path, file ID) pair below this directory, in tree order.
    pub fn file_ids(&self, base: &Path) -> Vec<(PathBuf, u16)> {
        let mut out = Vec::new();
        self.collect_file_ids(base, &mut out);
        out
    }

    fn collect_file_ids(&self, base: &Path, out: &mut Vec<(PathBuf, u16)>) {
        for (i, name) in self.files.iter().enumerate() {
            out.push((base.join(name), self.first_file_id + i as u16));
        }
        for sub in &self.subdirs {
            sub.collect_file_ids(&base.join(&sub.name), out);
        }
    }
}

/// Free-ID watermarks threaded through the recursive merge. A single pair of
/// counters serves the whole run; they are never duplicated per branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    pub next_file_id: u16,
    pub next_dir_id: u16,
}

/// Synthesizes a root directory from the files (not subdirectories) of
/// `path`, starting file IDs at `first_file_id`.
pub fn root_from_disk(path: &Path, first_file_id: u16) -> Result<Directory, NitroError> {
    let mut root = Directory {
        directory_id: ROOT_DIR_ID,
        first_file_id,
        ..Directory::default()
    };
    for (name, file_type) in sorted_entries(path)? {
        if file_type.is_file() {
            root.files.push(name);
        }
    }
    Ok(root)
}

/// Extends `dir` with every on-disk subdirectory of `path` that the tree
/// does not already contain, assigning fresh IDs from `ids`. Subdirectories
/// already present are recursed into without reassigning anything.
pub fn merge_from_disk(
    dir: &mut Directory,
    path: &Path,
    ids: &mut IdAllocator,
) -> Result<(), NitroError> {
    for (name, file_type) in sorted_entries(path)? {
        if !file_type.is_dir() {
            continue;
        }
        let sub_path = path.join(&name);
        match dir.subdir_index(&name) {
            Some(i) => merge_from_disk(&mut dir.subdirs[i], &sub_path, ids)?,
            None => {
                let mut sub = Directory {
                    directory_id: ids.next_dir_id,
                    first_file_id: ids.next_file_id,
                    name,
                    ..Directory::default()
                };
                for (file_name, file_type) in sorted_entries(&sub_path)? {
                    if file_type.is_file() {
                        info!(
                            file = %sub_path.join(&file_name).display(),
                            file_id = sub.first_file_id + sub.files.len() as u16,
                            "assigned file ID"
                        );
                        sub.files.push(file_name);
                    }
                }
                ids.next_file_id += sub.files.len() as u16;
                ids.next_dir_id += 1;
                merge_from_disk(&mut sub, &sub_path, ids)?;
                dir.subdirs.push(sub);
            }
        }
    }
    Ok(())
}

/// Directory listing sorted by name. The platform's listing order is not
/// stable; sorting here makes assigned file IDs reproducible across runs
/// and platforms.
fn sorted_entries(path: &Path) -> Result<Vec<(String, fs::FileType)>, NitroError> {
    let read_dir = fs::read_dir(path).map_err(|source| NitroError::Section {
        path: path.to_owned(),
        source,
    })?;
    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let file_type = entry.file_type()?;
        entries.push((entry.file_name().to_string_lossy().into_owned(), file_type));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn sample_tree() -> Directory {
        Directory {
            directory_id: ROOT_DIR_ID,
            first_file_id: 0,
            name: String::new(),
            files: vec!["a.bin".into(), "b.bin".into()],
            subdirs: vec![Directory {
                directory_id: 0xF001,
                first_file_id: 2,
                name: "sub".into(),
                files: vec!["c.bin".into()],
                subdirs: vec![],
            }],
        }
    }

    #[test]
    fn free_id_scans_cover_the_whole_tree() {
        let tree = sample_tree();
        assert_eq!(tree.next_free_file_id(), 3);
        assert_eq!(tree.next_free_dir_id(), 0xF002);
        assert_eq!(tree.directory_count(), 1);
    }

    #[test]
    fn root_from_disk_lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("zz.bin")).unwrap();
        File::create(dir.path().join("aa.bin")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let root = root_from_disk(dir.path(), 5).unwrap();
        assert_eq!(root.directory_id, ROOT_DIR_ID);
        assert_eq!(root.first_file_id, 5);
        assert_eq!(root.files, vec!["aa.bin".to_string(), "zz.bin".to_string()]);
        assert!(root.subdirs.is_empty());
    }

    #[test]
    fn merge_assigns_contiguous_ids_without_reuse() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("beta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        File::create(dir.path().join("alpha/x.bin")).unwrap();
        File::create(dir.path().join("alpha/y.bin")).unwrap();
        File::create(dir.path().join("beta/z.bin")).unwrap();

        let mut root = Directory {
            directory_id: ROOT_DIR_ID,
            first_file_id: 0,
            ..Directory::default()
        };
        let mut ids = IdAllocator {
            next_file_id: 4,
            next_dir_id: 0xF001,
        };
        merge_from_disk(&mut root, dir.path(), &mut ids).unwrap();

        // Sorted order: alpha first, then beta.
        assert_eq!(root.subdirs.len(), 2);
        assert_eq!(root.subdirs[0].name, "alpha");
        assert_eq!(root.subdirs[0].directory_id, 0xF001);
        assert_eq!(root.subdirs[0].first_file_id, 4);
        assert_eq!(root.subdirs[1].name, "beta");
        assert_eq!(root.subdirs[1].directory_id, 0xF002);
        assert_eq!(root.subdirs[1].first_file_id, 6);
        assert_eq!(ids.next_file_id, 7);
        assert_eq!(ids.next_dir_id, 0xF003);

        let mut seen = root
            .file_ids(Path::new(""))
            .into_iter()
            .map(|(_, id)| id)
            .collect::<Vec<_>>();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, vec![4, 5, 6]);
    }

    #[test]
    fn merge_recurses_into_existing_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        File::create(dir.path().join("sub/deeper/d.bin")).unwrap();

        let mut root = sample_tree();
        let mut ids = IdAllocator {
            next_file_id: root.next_free_file_id(),
            next_dir_id: root.next_free_dir_id(),
        };
        merge_from_disk(&mut root, dir.path(), &mut ids).unwrap();

        // "sub" was already present: no new IDs for it, but "deeper" is new.
        assert_eq!(root.subdirs.len(), 1);
        let sub = &root.subdirs[0];
        assert_eq!(sub.directory_id, 0xF001);
        assert_eq!(sub.subdirs.len(), 1);
        assert_eq!(sub.subdirs[0].name, "deeper");
        assert_eq!(sub.subdirs[0].directory_id, 0xF002);
        assert_eq!(sub.subdirs[0].first_file_id, 3);
        assert_eq!(ids.next_file_id, 4);
    }
}
