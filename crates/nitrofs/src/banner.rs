//! Icon/banner sizing.
//!
//! The banner's byte size is keyed by the version word at its start. An
//! unknown version falls back to the 0x0001 size; callers warn when that
//! happens.

/// Fallback size, also the size of a version 0x0001 banner.
pub const DEFAULT_SIZE: usize = 0x840;

/// Banner byte size for a known version word.
pub fn size_for_version(version: u16) -> Option<usize> {
    match version {
        0x0001 => Some(0x840),
        0x0002 => Some(0x940),
        0x0003 => Some(0xA40),
        0x0103 => Some(0x23C0),
        _ => None,
    }
}
