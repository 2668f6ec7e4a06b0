//! A physical erase block (PEB): one flash erase-block's worth of bytes, read
//! as an erase-counter header, an optional volume-id header, and payload
//! data. Grounded in the source's `PhysicalEraseBlock.from_data`/`to_bytes`
//! and `get_volume_table_records`.

use std::borrow::Cow;

use super::headers::{Ec, Vid, VolTableRecord, VolType};
use crate::error::{Result, UbiError};

/// Size in bytes of one volume table record slot on flash.
pub const VTBL_RECORD_SIZE: usize = 172;

/// Number of volume table record slots in the internal (layout) volume's LEB.
pub const VTBL_MAX_RECORDS: usize = 128;

/// One physical erase block, decoded from a contiguous `block_size` slice of
/// the source image.
#[derive(Debug, Clone)]
pub struct PhysicalEraseBlock<'a> {
    pub block_id: u32,
    pub block_size: u32,

    pub ec_header: Ec,

    /// Whether the EC header's magic and CRC both checked out. When `false`,
    /// nothing else on this block is trusted: no VID header is attached and
    /// no payload is read back, though the block itself is still retained
    /// rather than dropped from the image.
    pub ec_header_valid: bool,

    pub vid_header: Option<Vid>,

    /// Volume table records decoded from this block's data region, tagged
    /// with their table-slot index (0..128). Only present when `vid_header`
    /// is both present and an internal (layout) volume.
    pub volume_table: Option<Vec<(u32, VolTableRecord)>>,

    raw_data: Cow<'a, [u8]>,
}

impl<'a> PhysicalEraseBlock<'a> {
    /// Decodes one `block_size`-byte slice of the image, starting at its
    /// first byte (the EC header).
    pub fn decode(block_id: u32, block_size: u32, block: &'a [u8]) -> Result<Self> {
        let ec_bytes = block.get(..64).ok_or(UbiError::TruncatedInput {
            offset: 0,
            len: 64,
            available: block.len(),
        })?;
        let (ec_header, ec_header_valid) = Ec::decode_lenient(ec_bytes);

        if !ec_header_valid {
            log::warn!("block {block_id}: invalid erase-counter header, retaining with empty payload");
            return Ok(Self {
                block_id,
                block_size,
                ec_header,
                ec_header_valid: false,
                vid_header: None,
                volume_table: None,
                raw_data: Cow::Borrowed(&[]),
            });
        }

        let vid_offset = ec_header.vid_hdr_offset as usize;
        let vid_header = block
            .get(vid_offset..vid_offset.saturating_add(64))
            .and_then(Vid::decode_magic_gated);

        let data_offset = ec_header.data_offset as usize;
        let raw_data: &[u8] = block.get(data_offset..).unwrap_or(&[]);

        let volume_table = match vid_header {
            Some(vid) if vid.is_internal() => Some(decode_volume_table(raw_data)),
            _ => None,
        };

        Ok(Self {
            block_id,
            block_size,
            ec_header,
            ec_header_valid: true,
            vid_header,
            volume_table,
            raw_data: Cow::Borrowed(raw_data),
        })
    }

    /// A freshly erased block: a fresh EC header, no VID header, no data.
    /// Used both for newly added capacity and for blocks freed by deleting a
    /// volume.
    pub fn fresh(block_id: u32, block_size: u32) -> Self {
        Self {
            block_id,
            block_size,
            ec_header: Ec::fresh(),
            ec_header_valid: true,
            vid_header: None,
            volume_table: None,
            raw_data: Cow::Owned(Vec::new()),
        }
    }

    /// Whether this block carries no VID header, i.e. is available to be
    /// claimed by `put_volume_blocks`.
    pub fn is_free(&self) -> bool {
        self.ec_header_valid && self.vid_header.is_none()
    }

    /// Claims this free block for `vol_id`'s logical block `lnum`, attaching
    /// `data` as its payload. `data` is supplied fresh by the write path
    /// rather than borrowed from the source image, so it's always owned.
    pub fn claim(mut self, vol_id: u32, lnum: u32, sqnum: u64, data: Vec<u8>) -> Self {
        self.vid_header = Some(Vid {
            vol_type: VolType::Dynamic,
            copy_flag: false,
            compat: 0,
            vol_id,
            lnum,
            data_size: 0,
            used_ebs: 0,
            data_pad: 0,
            data_crc: 0,
            sqnum,
        });
        self.raw_data = Cow::Owned(data);
        self
    }

    /// The logical erase block number this PEB is mapped to, if any.
    pub fn lnum(&self) -> Option<u32> {
        self.vid_header.map(|v| v.lnum)
    }

    /// The volume ID this PEB is mapped to, if any.
    pub fn vol_id(&self) -> Option<u32> {
        self.vid_header.map(|v| v.vol_id)
    }

    /// The VID header's sequence number, used to break `vol_id:lnum` ties
    /// between duplicate copies of the same logical block.
    pub fn sqnum(&self) -> Option<u64> {
        self.vid_header.map(|v| v.sqnum)
    }

    /// The payload bytes attributable to this block: empty if there's no VID
    /// header, the full data region for `Dynamic` volumes, truncated to
    /// `data_size` for `Static` volumes. This is what `encode` re-serializes,
    /// so bytes past `data_size` on a static LEB are not round-tripped.
    pub fn data(&self) -> &[u8] {
        match self.vid_header {
            None => &[],
            Some(vid) if vid.vol_type == VolType::Static => {
                let len = (vid.data_size as usize).min(self.raw_data.len());
                &self.raw_data[..len]
            }
            Some(_) => &self.raw_data,
        }
    }

    /// Re-serializes this block to exactly `block_size` bytes: EC header,
    /// padding, optional VID header, padding, data, padding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.ec_header.to_bytes();
        pad_to(&mut out, self.ec_header.vid_hdr_offset as usize);

        if let Some(vid) = self.vid_header {
            out.extend_from_slice(&vid.to_bytes());
        }
        pad_to(&mut out, self.ec_header.data_offset as usize);

        out.extend_from_slice(self.data());
        pad_to(&mut out, self.block_size as usize);
        out
    }
}

/// Grows `buf` up to `len` bytes with `0xFF` filler, matching the erased
/// state of NAND flash. Never truncates.
fn pad_to(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0xFF);
    }
}

/// Decodes as many volume table records as are present in `data`, tagging
/// each with its table-slot index before filtering. A slot is skipped, not
/// just left undecoded, when its stored CRC is either invalid or the
/// `VTBL_RECORD_EMPTY_CRC` sentinel for a never-written slot.
fn decode_volume_table(data: &[u8]) -> Vec<(u32, VolTableRecord)> {
    let mut records = Vec::new();
    for slot in 0..VTBL_MAX_RECORDS {
        let start = slot * VTBL_RECORD_SIZE;
        let Some(bytes) = data.get(start..start + VTBL_RECORD_SIZE) else {
            break;
        };
        if let Some(record) = VolTableRecord::decode_slot(bytes) {
            records.push((slot as u32, record));
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(ec: Ec, vid: Option<Vid>, data: &[u8], block_size: usize) -> Vec<u8> {
        let mut out = ec.to_bytes();
        pad_to(&mut out, ec.vid_hdr_offset as usize);
        if let Some(vid) = vid {
            out.extend_from_slice(&vid.to_bytes());
        }
        pad_to(&mut out, ec.data_offset as usize);
        out.extend_from_slice(data);
        pad_to(&mut out, block_size);
        out
    }

    #[test]
    fn decodes_a_block_with_no_vid_header() {
        let ec = Ec::fresh();
        let raw = block_with(ec, None, &[], 4096);
        let peb = PhysicalEraseBlock::decode(0, 4096, &raw).unwrap();
        assert!(peb.ec_header_valid);
        assert!(peb.vid_header.is_none());
        assert_eq!(peb.data(), &[] as &[u8]);
        assert!(peb.is_free());
    }

    #[test]
    fn decodes_a_dynamic_volume_block_round_trip() {
        let ec = Ec::fresh();
        let vid = Vid {
            vol_type: VolType::Dynamic,
            vol_id: 3,
            lnum: 7,
            sqnum: 42,
            ..Default::default()
        };
        let payload = vec![0xAB; 1024];
        let raw = block_with(ec, Some(vid), &payload, 4096);
        let peb = PhysicalEraseBlock::decode(0, 4096, &raw).unwrap();
        assert_eq!(peb.vol_id(), Some(3));
        assert_eq!(peb.lnum(), Some(7));
        assert_eq!(peb.data(), payload.as_slice());
        assert_eq!(peb.encode(), raw);
    }

    #[test]
    fn static_volume_data_is_truncated_to_data_size() {
        let ec = Ec::fresh();
        let vid = Vid {
            vol_type: VolType::Static,
            vol_id: 3,
            lnum: 0,
            data_size: 10,
            ..Default::default()
        };
        let mut payload = vec![0x11; 10];
        payload.extend(vec![0x22; 500]);
        let raw = block_with(ec, Some(vid), &payload, 4096);
        let peb = PhysicalEraseBlock::decode(0, 4096, &raw).unwrap();
        assert_eq!(peb.data(), &payload[..10]);
    }

    #[test]
    fn an_invalid_ec_header_yields_no_vid_and_no_data() {
        let raw = vec![0u8; 4096];
        let peb = PhysicalEraseBlock::decode(5, 4096, &raw).unwrap();
        assert!(!peb.ec_header_valid);
        assert!(peb.vid_header.is_none());
        assert_eq!(peb.data(), &[] as &[u8]);
    }

    #[test]
    fn an_all_zero_volume_table_region_decodes_to_no_records() {
        let data = vec![0u8; VTBL_RECORD_SIZE * VTBL_MAX_RECORDS];
        assert_eq!(decode_volume_table(&data).len(), 0);
    }

    #[test]
    fn claiming_a_free_block_attaches_a_dynamic_vid_header() {
        let peb = PhysicalEraseBlock::fresh(9, 4096).claim(4, 1, 99, vec![0x01, 0x02]);
        assert!(!peb.is_free());
        assert_eq!(peb.vol_id(), Some(4));
        assert_eq!(peb.sqnum(), Some(99));
        assert_eq!(peb.data(), &[0x01, 0x02]);
    }
}
