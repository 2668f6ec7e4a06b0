//! U-Boot's `bootargs=` environment blob: a NUL-separated run of `key=value`
//! entries embedded in the device image, giving the load addresses used to
//! slice the FDT/kernel/ramdisk sub-payloads back out. Grounded in the
//! source's `boot.py`.

use crate::error::{Result, UbiError};

const MARKER: &[u8] = b"bootargs=";

/// The decoded `key=value` entries of a `bootargs=` blob, in on-flash order.
/// Kept as owned strings rather than borrowed slices: the blob is decoded
/// lossily (non-UTF-8 bytes are dropped), so there's no single borrowed
/// representation to slice from anyway.
#[derive(Debug, Clone, Default)]
pub struct BootArguments {
    entries: Vec<(String, String)>,
}

impl BootArguments {
    /// Locates the `bootargs=` marker in `data`, then reads up to the next
    /// NUL-NUL pair as the argument blob.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let marker_at = find(data, MARKER).ok_or(UbiError::NoBootArguments)?;
        let blob_start = marker_at + MARKER.len();

        let blob_end = find(&data[blob_start..], &[0, 0])
            .map(|rel| blob_start + rel)
            .unwrap_or(data.len());

        let blob = &data[blob_start..blob_end];

        let entries = blob
            .split(|&b| b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| {
                let text = String::from_utf8_lossy(chunk);
                match text.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (text.to_string(), String::new()),
                }
            })
            .collect();

        Ok(Self { entries })
    }

    /// The value of the first entry whose key ends with `suffix`.
    pub fn value_ending_with(&self, suffix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.ends_with(suffix))
            .map(|(_, value)| value.as_str())
    }

    fn hex_address(&self, key: &'static str, suffix: &str) -> Result<u64> {
        let value = self
            .value_ending_with(suffix)
            .ok_or(UbiError::MissingBootArgument(key))?;
        let trimmed = value.trim_start_matches("0x");
        u64::from_str_radix(trimmed, 16).map_err(|_| UbiError::InvalidBootArgument {
            key,
            value: value.to_string(),
        })
    }

    /// The image's base load address (`*_loadaddr`).
    pub fn base_address(&self) -> Result<u64> {
        self.hex_address("loadaddr", "_loadaddr")
    }

    /// The FDT's offset within the device image, relative to its base
    /// address.
    pub fn fdt_offset(&self) -> Result<u64> {
        Ok(self.hex_address("loadaddr_fdt", "_loadaddr_fdt")? - self.base_address()?)
    }

    /// The kernel uImage's offset within the device image, relative to its
    /// base address.
    pub fn kernel_offset(&self) -> Result<u64> {
        Ok(self.hex_address("loadaddr_kernel", "_loadaddr_kernel")? - self.base_address()?)
    }

    /// The RAMdisk uImage's offset within the device image, relative to its
    /// base address.
    pub fn ramdisk_offset(&self) -> Result<u64> {
        Ok(self.hex_address("loadaddr_ramdisk", "_loadaddr_ramdisk")? - self.base_address()?)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> Vec<u8> {
        let mut blob = b"garbage before bootargs=".to_vec();
        blob.extend_from_slice(b"console=ttyS0\0");
        blob.extend_from_slice(b"fw_loadaddr=0x40000000\0");
        blob.extend_from_slice(b"fw_loadaddr_fdt=0x40100000\0");
        blob.extend_from_slice(b"fw_loadaddr_kernel=0x40200000\0");
        blob.extend_from_slice(b"fw_loadaddr_ramdisk=0x41000000\0");
        blob.extend_from_slice(&[0, 0]);
        blob.extend_from_slice(b"trailing garbage");
        blob
    }

    #[test]
    fn parses_key_value_entries_up_to_the_double_nul() {
        let args = BootArguments::parse(&sample_blob()).unwrap();
        assert_eq!(args.value_ending_with("console"), Some("ttyS0"));
        assert_eq!(args.base_address().unwrap(), 0x4000_0000);
    }

    #[test]
    fn computes_relative_offsets_from_the_base_address() {
        let args = BootArguments::parse(&sample_blob()).unwrap();
        assert_eq!(args.fdt_offset().unwrap(), 0x0010_0000);
        assert_eq!(args.kernel_offset().unwrap(), 0x0020_0000);
        assert_eq!(args.ramdisk_offset().unwrap(), 0x0100_0000);
    }

    #[test]
    fn missing_marker_is_an_error() {
        assert!(matches!(
            BootArguments::parse(b"no marker here"),
            Err(UbiError::NoBootArguments)
        ));
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let blob = b"bootargs=console=ttyS0\0\0".to_vec();
        let args = BootArguments::parse(&blob).unwrap();
        assert!(matches!(
            args.base_address(),
            Err(UbiError::MissingBootArgument("loadaddr"))
        ));
    }
}
