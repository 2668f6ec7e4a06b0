//! The device-image container format: a small header (magic, declared size,
//! SHA-1 of the payload) wrapping an FDT blob and two uImage-framed payloads
//! (kernel, RAMdisk) back to back, addressed by the `bootargs=` load
//! addresses rather than a table of contents. Grounded in the source's
//! `device.py`.

use sha1::{Digest, Sha1};

use crate::error::{Result, UbiError};
use crate::reader::{u32_at, Reader};

const MAGIC: u32 = 0x8E73_ED8A;
const HEADER_SIZE: usize = 32;
const UIMAGE_HEADER_SIZE: usize = 64;

/// The fixed 32-byte header at the start of a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeviceImageHeader {
    pub magic_signature: u32,
    pub header_size: u32,
    pub image_size: u32,
    pub image_sha1: [u8; 20],
}

impl DeviceImageHeader {
    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let magic_signature = reader.read_u32()?;
        let header_size = reader.read_u32()?;
        let image_size = reader.read_u32()?;
        let image_sha1 = reader.read_bytes(20)?.try_into().unwrap();

        Ok(Self {
            magic_signature,
            header_size,
            image_size,
            image_sha1,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&self.magic_signature.to_be_bytes());
        out.extend_from_slice(&self.header_size.to_be_bytes());
        out.extend_from_slice(&self.image_size.to_be_bytes());
        out.extend_from_slice(&self.image_sha1);
        out
    }

    pub fn is_magic_valid(&self) -> bool {
        self.magic_signature == MAGIC
    }
}

/// A decoded device image: its header plus the payload bytes that follow it
/// at `header.header_size` (the gap between the header and the payload, if
/// any, is `0xFF` padding and is not preserved on re-encode).
#[derive(Debug, Clone)]
pub struct DeviceImage {
    pub header: DeviceImageHeader,
    image: Vec<u8>,
}

impl DeviceImage {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = DeviceImageHeader::decode(bytes)?;
        if !header.is_magic_valid() {
            return Err(UbiError::NotADeviceImage);
        }

        let start = header.header_size as usize;
        let end = start
            .checked_add(header.image_size as usize)
            .ok_or(UbiError::TruncatedInput {
                offset: start,
                len: header.image_size as usize,
                available: bytes.len().saturating_sub(start.min(bytes.len())),
            })?;
        let image = bytes
            .get(start..end)
            .ok_or(UbiError::TruncatedInput {
                offset: start,
                len: header.image_size as usize,
                available: bytes.len().saturating_sub(start.min(bytes.len())),
            })?
            .to_vec();

        Ok(Self { header, image })
    }

    /// Recomputes `image_sha1` in place from the current payload.
    pub fn refresh_sha1(&mut self) {
        let mut hasher = Sha1::new();
        hasher.update(&self.image);
        self.header.image_sha1 = hasher.finalize().into();
    }

    /// Whether the stored SHA-1 matches the current payload.
    pub fn is_valid(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.image);
        hasher.finalize().as_slice() == self.header.image_sha1.as_slice()
    }

    /// Splices `data` into the image at `position`, an absolute offset that
    /// includes the header (matching the addresses `bootargs=` encodes). The
    /// tail of the image beyond the replaced span is preserved only if it
    /// extended past `position + data.len()` to begin with.
    pub fn put(&mut self, position: u64, data: &[u8]) -> Result<()> {
        let header_size = self.header.header_size as u64;
        let image_start = position
            .checked_sub(header_size)
            .ok_or(UbiError::PutOutOfRange {
                position: position as i64,
                image_len: self.image.len(),
            })?;

        let image_start = usize::try_from(image_start).map_err(|_| UbiError::PutOutOfRange {
            position: position as i64,
            image_len: self.image.len(),
        })?;
        if image_start > self.image.len() {
            return Err(UbiError::PutOutOfRange {
                position: position as i64,
                image_len: self.image.len(),
            });
        }

        let image_end = image_start + data.len();
        if image_end < self.image.len() {
            let tail = self.image[image_end..].to_vec();
            self.image.truncate(image_start);
            self.image.extend_from_slice(data);
            self.image.extend_from_slice(&tail);
        } else {
            self.image.truncate(image_start);
            self.image.extend_from_slice(data);
        }

        self.header.image_size = self.image.len() as u32;
        Ok(())
    }

    /// Re-serializes the container: the header, `0xFF` padding out to
    /// `header_size`, then the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        out.resize(self.header.header_size as usize, 0xFF);
        out.extend_from_slice(&self.image);
        out
    }

    fn relative(&self, absolute_position: u64) -> Result<usize> {
        let header_size = self.header.header_size as u64;
        let position = absolute_position
            .checked_sub(header_size)
            .ok_or(UbiError::PutOutOfRange {
                position: absolute_position as i64,
                image_len: self.image.len(),
            })?;
        usize::try_from(position).map_err(|_| UbiError::PutOutOfRange {
            position: absolute_position as i64,
            image_len: self.image.len(),
        })
    }

    /// Extracts the flattened device tree blob starting at `absolute_position`:
    /// its length is the big-endian `totalsize` field 4 bytes into the FDT
    /// header.
    pub fn get_fdt(&self, absolute_position: u64) -> Result<&[u8]> {
        let position = self.relative(absolute_position)?;
        let size = u32_at(&self.image, position + 4)? as usize;
        self.image
            .get(position..position + size)
            .ok_or(UbiError::TruncatedInput {
                offset: position,
                len: size,
                available: self.image.len().saturating_sub(position.min(self.image.len())),
            })
    }

    fn get_uimage(&self, absolute_position: u64) -> Result<&[u8]> {
        let position = self.relative(absolute_position)?;
        let size = u32_at(&self.image, position + 12)? as usize + UIMAGE_HEADER_SIZE;
        self.image
            .get(position..position + size)
            .ok_or(UbiError::TruncatedInput {
                offset: position,
                len: size,
                available: self.image.len().saturating_sub(position.min(self.image.len())),
            })
    }

    /// Extracts the kernel uImage starting at `absolute_position`: a 64-byte
    /// uImage header followed by `ih_size` bytes of payload.
    pub fn get_kernel(&self, absolute_position: u64) -> Result<&[u8]> {
        self.get_uimage(absolute_position)
    }

    /// Extracts the RAMdisk uImage starting at `absolute_position`, using the
    /// same layout as [`DeviceImage::get_kernel`].
    pub fn get_ramdisk(&self, absolute_position: u64) -> Result<&[u8]> {
        self.get_uimage(absolute_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_image(payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        bytes[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_be_bytes());
        bytes[8..12].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);

        let mut hasher = Sha1::new();
        hasher.update(payload);
        let sha1: [u8; 20] = hasher.finalize().into();
        bytes[12..32].copy_from_slice(&sha1);
        bytes
    }

    #[test]
    fn decodes_header_and_validates_sha1() {
        let bytes = make_image(b"hello device image payload");
        let image = DeviceImage::decode(&bytes).unwrap();
        assert!(image.header.is_magic_valid());
        assert!(image.is_valid());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = make_image(b"payload");
        bytes[0] = 0;
        assert!(matches!(DeviceImage::decode(&bytes), Err(UbiError::NotADeviceImage)));
    }

    #[test]
    fn put_splices_data_and_preserves_the_tail() {
        let mut payload = vec![0u8; 32];
        payload[4..8].copy_from_slice(&64u32.to_be_bytes());
        payload.extend(vec![0xAAu8; 60]);
        payload.extend(vec![0xBBu8; 16]);

        let bytes = make_image(&payload);
        let mut image = DeviceImage::decode(&bytes).unwrap();

        let header_size = image.header.header_size as u64;
        image.put(header_size, &[0x11u8; 20]).unwrap();
        assert_eq!(&image.encode()[HEADER_SIZE..HEADER_SIZE + 20], &[0x11u8; 20]);
        assert_eq!(&image.encode()[HEADER_SIZE + 20..HEADER_SIZE + 20 + 12], &[0u8; 12]);
    }

    #[test]
    fn get_fdt_reads_the_totalsize_field() {
        let mut payload = vec![0u8; 16];
        payload[4..8].copy_from_slice(&16u32.to_be_bytes());
        let bytes = make_image(&payload);
        let image = DeviceImage::decode(&bytes).unwrap();
        let header_size = image.header.header_size as u64;
        assert_eq!(image.get_fdt(header_size).unwrap().len(), 16);
    }

    #[test]
    fn get_kernel_includes_the_uimage_header() {
        let mut payload = vec![0u8; UIMAGE_HEADER_SIZE];
        payload[12..16].copy_from_slice(&100u32.to_be_bytes());
        payload.extend(vec![0u8; 100]);
        let bytes = make_image(&payload);
        let image = DeviceImage::decode(&bytes).unwrap();
        let header_size = image.header.header_size as u64;
        assert_eq!(image.get_kernel(header_size).unwrap().len(), UIMAGE_HEADER_SIZE + 100);
    }
}
