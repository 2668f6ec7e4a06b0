//! Parses and rewrites NAND flash images that use the UBI (Unsorted Block Images)
//! on-flash format, including the device-image container (FDT + kernel uImage +
//! RAMdisk uImage) that embedded Linux devices often store inside one of the UBI
//! volumes.

pub mod bootargs;
pub mod device_image;
pub mod error;
pub mod logging;
pub mod reader;
pub mod ubi;
pub mod util;

pub use error::{Result, UbiError};
