//! Codec for the Nitro filesystem embedded in NDS ROM images and the
//! surrounding image layout.
//!
//! The filesystem is described by two tables: the FNT (file name table)
//! encodes the directory hierarchy and names, the FAT (file allocation
//! table) maps file IDs to byte ranges. This crate models the hierarchy as
//! an owned [`tree::Directory`], round-trips it through the FNT wire format,
//! and builds complete images section by section on top of a growable,
//! bounds-checked [`rom::RomImage`] buffer.

pub mod banner;
pub mod build;
pub mod error;
pub mod extract;
pub mod fnt;
pub mod header;
pub mod overlay;
pub mod rom;
pub mod tree;

pub use build::{build, BuildConfig, BuildMode};
pub use error::NitroError;
pub use extract::RomExtractor;
pub use rom::{align_to, RomImage, MAX_IMAGE_SIZE};
pub use tree::{Directory, IdAllocator, ROOT_DIR_ID};
