//! Decoding and re-encoding of the UBI (Unsorted Block Images) on-flash
//! format: erase-counter and volume-id headers, the internal volume table,
//! and the physical/logical erase block mapping built on top of them.

mod container;
mod headers;
mod peb;

pub use container::{locate, UnsortedBlockImages};
pub use headers::{VolTableRecord, VolType};
pub use peb::PhysicalEraseBlock;
