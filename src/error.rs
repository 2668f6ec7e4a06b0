//! Crate-wide error type.
//!
//! Low-level header codec helpers (see [`crate::ubi::headers`]) keep using
//! `anyhow::Result` internally, the way this project's own binaries mix `anyhow`
//! internals with a `thiserror` enum at the edges; [`UbiError::Codec`] bridges
//! the two.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UbiError {
    #[error("read past end of buffer at offset {offset:#x} (wanted {len} bytes, {available} available)")]
    TruncatedInput {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("no `UBI#` signature found in image")]
    NoUBIFound,

    #[error("fewer than two `UBI#` signatures found; cannot infer a block size")]
    AmbiguousLayout,

    #[error("no internal (layout) volume found among decoded blocks")]
    NoInternalVolume,

    #[error("internal volume carries no volume table records")]
    NoVolumeTable,

    #[error("no volume with id {0} in the volume table")]
    UnknownVolume(u32),

    #[error("volume does not begin with a valid device-image header")]
    NotADeviceImage,

    #[error("replacement data at position {position} falls outside the current image (length {image_len})")]
    PutOutOfRange { position: i64, image_len: usize },

    #[error("not enough free physical erase blocks to hold {needed} logical blocks ({available} free)")]
    InsufficientFreeBlocks { needed: usize, available: usize },

    #[error("no U-Boot boot arguments blob found in image")]
    NoBootArguments,

    #[error("boot argument `{0}` not present")]
    MissingBootArgument(&'static str),

    #[error("boot argument `{key}` is not a valid hexadecimal address: {value:?}")]
    InvalidBootArgument { key: &'static str, value: String },

    #[error("header codec error")]
    Codec(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, UbiError>;
