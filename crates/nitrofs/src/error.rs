use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NitroError {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("access of {size} bytes at {offset:#x} is out of bounds (image is {len:#x} bytes)")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    #[error("ROM image trying to grow larger than 1 GiB")]
    ImageTooLarge,

    #[error("ROM capacity in header exceeds 1 GiB (exponent {exponent})")]
    CapacityTooLarge { exponent: u8 },

    #[error("invalid ROM header size {size:#x}: must be 0x200 or 0x4000")]
    InvalidHeaderSize { size: u64 },

    #[error("failed to read section file {path}")]
    Section {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("section file {path} is not a regular file")]
    MissingSection { path: PathBuf },

    #[error("file size of {path} with {size} bytes exceeds {limit} bytes")]
    SectionTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error("overlay table {path} is invalid: entries must be 32 bytes each")]
    InvalidOverlayTable { path: PathBuf },

    #[error(
        "could not find overlay payload {path} for overlay {overlay_id}: \
         the file name must be the overlay ID in decimal"
    )]
    MissingOverlayPayload { overlay_id: u32, path: PathBuf },

    #[error("overlay {overlay_id} has no file ID assigned")]
    UnassignedOverlay { overlay_id: u32 },

    #[error("invalid RSA signature size: expected 136 bytes, got {size}")]
    InvalidSignatureSize { size: u64 },

    #[error("name '{name}' is {len} bytes long: the file name table limit is 127")]
    NameTooLong { name: String, len: usize },
}
