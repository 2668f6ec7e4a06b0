//! The UBI region of a NAND image: a run of same-sized physical erase blocks
//! located by signature-stride inference, decoded into [`PhysicalEraseBlock`]s
//! and reassembled byte-for-byte outside the parts that change. Grounded in
//! the source's `UnsortedBlockImages` class.

use std::collections::BTreeMap;

use super::headers::VolTableRecord;
use super::peb::PhysicalEraseBlock;
use crate::error::{Result, UbiError};

const EC_HDR_MAGIC: &[u8] = b"UBI#";

/// Scans `blob` for `UBI#` erase-counter-header signatures and infers the
/// block layout from the distances between them: the most common stride is
/// the block size, and the number of times that stride occurs plus one is
/// the block count (an image with N same-sized blocks has N-1 gaps between
/// consecutive signatures).
pub fn locate(blob: &[u8]) -> Result<(usize, usize, usize)> {
    let positions = find_all(blob, EC_HDR_MAGIC);

    if positions.is_empty() {
        return Err(UbiError::NoUBIFound);
    }
    if positions.len() < 2 {
        return Err(UbiError::AmbiguousLayout);
    }

    let mut stride_counts: BTreeMap<usize, usize> = BTreeMap::new();
    for pair in positions.windows(2) {
        let stride = pair[1] - pair[0];
        *stride_counts.entry(stride).or_insert(0) += 1;
    }

    let (&block_size, &occurrences) = stride_counts
        .iter()
        .max_by_key(|(_, &count)| count)
        .ok_or(UbiError::AmbiguousLayout)?;

    Ok((positions[0], block_size, occurrences + 1))
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset + needle.len() <= haystack.len() {
        match haystack[offset..].windows(needle.len()).position(|w| w == needle) {
            Some(found) => {
                out.push(offset + found);
                offset += found + 1;
            }
            None => break,
        }
    }
    out
}

/// The decoded UBI region of a NAND image, plus the raw bytes surrounding it
/// (preserved verbatim on re-encode).
pub struct UnsortedBlockImages<'a> {
    prefix: &'a [u8],
    suffix: &'a [u8],
    block_size: usize,
    blocks: Vec<PhysicalEraseBlock<'a>>,
}

impl<'a> UnsortedBlockImages<'a> {
    pub fn decode(blob: &'a [u8]) -> Result<Self> {
        let (start, block_size, block_count) = locate(blob)?;
        let region_len = block_size * block_count;

        let region = blob
            .get(start..start + region_len)
            .ok_or(UbiError::TruncatedInput {
                offset: start,
                len: region_len,
                available: blob.len().saturating_sub(start),
            })?;

        let mut blocks = Vec::with_capacity(block_count);
        for (index, chunk) in region.chunks(block_size).enumerate() {
            blocks.push(PhysicalEraseBlock::decode(index as u32, block_size as u32, chunk)?);
        }

        Ok(Self {
            prefix: &blob[..start],
            suffix: &blob[start + region_len..],
            block_size,
            blocks,
        })
    }

    /// The volume table records of the first internal (layout) volume block
    /// found, tagged with their table-slot index.
    pub fn volume_table(&self) -> Result<&[(u32, VolTableRecord)]> {
        let internal_block = self
            .blocks
            .iter()
            .find(|b| matches!(b.vid_header, Some(v) if v.is_internal()))
            .ok_or(UbiError::NoInternalVolume)?;

        match internal_block.volume_table.as_deref() {
            Some(records) if !records.is_empty() => Ok(records),
            _ => Err(UbiError::NoVolumeTable),
        }
    }

    /// Looks up a volume by id in the volume table.
    pub fn volume_record(&self, volume_id: u32) -> Result<&VolTableRecord> {
        self.volume_table()?
            .iter()
            .find(|(id, _)| *id == volume_id)
            .map(|(_, record)| record)
            .ok_or(UbiError::UnknownVolume(volume_id))
    }

    /// The usable payload size of one logical erase block, derived from the
    /// first decoded block's EC header (uniform across an image in practice).
    fn leb_size(&self) -> usize {
        self.blocks
            .first()
            .map(|b| self.block_size.saturating_sub(b.ec_header.data_offset as usize))
            .unwrap_or(self.block_size)
    }

    /// The logical erase blocks belonging to `volume_id`, keyed by `lnum`.
    /// Among duplicate copies (from interrupted wear-leveling), only blocks
    /// sharing the maximum `image_seq` are considered, and ties on `lnum` are
    /// broken by keeping the highest `sqnum`.
    pub fn logical_erase_blocks(&self, volume_id: u32) -> BTreeMap<u32, &PhysicalEraseBlock<'a>> {
        let candidates: Vec<&PhysicalEraseBlock<'a>> = self
            .blocks
            .iter()
            .filter(|b| b.vol_id() == Some(volume_id))
            .collect();

        let max_seq = candidates.iter().map(|b| b.ec_header.image_seq).max();

        let mut filtered: Vec<&PhysicalEraseBlock<'a>> = candidates
            .into_iter()
            .filter(|b| Some(b.ec_header.image_seq) == max_seq)
            .collect();

        filtered.sort_by(|a, b| a.lnum().cmp(&b.lnum()).then(b.sqnum().cmp(&a.sqnum())));

        let mut result = BTreeMap::new();
        for block in filtered {
            if let Some(lnum) = block.lnum() {
                result.entry(lnum).or_insert(block);
            }
        }
        result
    }

    /// Reassembles a volume's logical contents across `reserved_pebs` LEBs,
    /// filling any LEB with no mapped block with `0xFF` (an erased LEB).
    pub fn volume(&self, volume_id: u32, reserved_pebs: u32) -> Vec<u8> {
        let lebs = self.logical_erase_blocks(volume_id);
        let leb_size = self.leb_size();

        let mut out = Vec::with_capacity(reserved_pebs as usize * leb_size);
        for lnum in 0..reserved_pebs {
            match lebs.get(&lnum) {
                Some(block) => out.extend_from_slice(block.data()),
                None => out.extend(std::iter::repeat(0xFFu8).take(leb_size)),
            }
        }
        out
    }

    /// Returns every block with no VID header, i.e. available for
    /// `put_volume_blocks` to claim.
    pub fn free_blocks(&self) -> impl Iterator<Item = &PhysicalEraseBlock<'a>> {
        self.blocks.iter().filter(|b| b.is_free())
    }

    /// Replaces every block belonging to `volume_id` with a freshly erased
    /// block, returning them to the free pool.
    pub fn delete_volume_blocks(&mut self, volume_id: u32) {
        for block in &mut self.blocks {
            if block.vol_id() == Some(volume_id) {
                *block = PhysicalEraseBlock::fresh(block.block_id, block.block_size);
            }
        }
    }

    fn next_sqnum(&self) -> u64 {
        self.blocks
            .iter()
            .filter_map(|b| b.sqnum())
            .max()
            .map(|s| s + 1)
            .unwrap_or(0)
    }

    /// Splits `volume_id` out of the existing free blocks and writes `data`
    /// into them, chunked to one LEB's worth of bytes per block. A chunk
    /// that's exactly `leb_size` long and entirely `0xFF` is left unallocated
    /// (sparse): `volume()` reconstructs it from the fill value instead. A
    /// short final chunk is always kept, since it can never be byte-for-byte
    /// equal to a full-length empty buffer regardless of its own content.
    pub fn put_volume_blocks(&mut self, volume_id: u32, data: &[u8]) -> Result<()> {
        let leb_size = self.leb_size();
        let lebs = calculate_lebs(data, leb_size);

        let free_block_ids: Vec<u32> = self.free_blocks().map(|b| b.block_id).collect();

        if lebs.len() > free_block_ids.len() {
            return Err(UbiError::InsufficientFreeBlocks {
                needed: lebs.len(),
                available: free_block_ids.len(),
            });
        }

        self.delete_volume_blocks(volume_id);

        let base_sqnum = self.next_sqnum();
        let block_size = self.block_size as u32;
        for (offset, (lnum, leb_data)) in lebs.into_iter().enumerate() {
            let block_id = free_block_ids[offset];
            let index = self
                .blocks
                .iter()
                .position(|b| b.block_id == block_id)
                .expect("free block id was sourced from self.blocks");
            let block = std::mem::replace(
                &mut self.blocks[index],
                PhysicalEraseBlock::fresh(block_id, block_size),
            );
            self.blocks[index] = block.claim(volume_id, lnum, base_sqnum + offset as u64, leb_data);
        }

        Ok(())
    }

    /// Serializes every block's header metadata (not raw payload bytes) as
    /// pretty-printed JSON, for the `--dump` diagnostic flag.
    pub fn to_dump_json(&self) -> Result<String> {
        #[derive(serde::Serialize)]
        struct BlockDump {
            block_id: u32,
            ec_header_valid: bool,
            ec_header: super::headers::Ec,
            vid_header: Option<super::headers::Vid>,
            volume_table: Vec<(u32, VolTableRecord)>,
        }

        let dump: Vec<BlockDump> = self
            .blocks
            .iter()
            .map(|b| BlockDump {
                block_id: b.block_id,
                ec_header_valid: b.ec_header_valid,
                ec_header: b.ec_header,
                vid_header: b.vid_header,
                volume_table: b.volume_table.clone().unwrap_or_default(),
            })
            .collect();

        serde_json::to_string_pretty(&dump).map_err(|e| UbiError::Codec(e.into()))
    }

    /// Re-serializes the whole image: the bytes before the UBI region,
    /// every block in its current (possibly now-mutated) state, then the
    /// bytes after the UBI region, all unchanged outside that middle span.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.prefix.len() + self.blocks.len() * self.block_size + self.suffix.len(),
        );
        out.extend_from_slice(self.prefix);
        for block in &self.blocks {
            out.extend_from_slice(&block.encode());
        }
        out.extend_from_slice(self.suffix);
        out
    }
}

/// Splits `data` into `leb_size`-length chunks, omitting any chunk that's
/// exactly `leb_size` long and entirely `0xFF`.
fn calculate_lebs(data: &[u8], leb_size: usize) -> Vec<(u32, Vec<u8>)> {
    if leb_size == 0 {
        return Vec::new();
    }

    let empty = vec![0xFFu8; leb_size];
    let mut lebs = Vec::new();
    for (lnum, chunk) in data.chunks(leb_size).enumerate() {
        if chunk.len() == leb_size && chunk == empty.as_slice() {
            continue;
        }
        lebs.push((lnum as u32, chunk.to_vec()));
    }
    lebs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_image(block_size: usize, block_count: usize) -> Vec<u8> {
        use super::super::headers::{Ec, Vid, VolType};

        let mut out = Vec::new();
        for i in 0..block_count {
            let ec = Ec::fresh().ec(i as u64);
            let mut block = ec.to_bytes();
            block.resize(ec.vid_hdr_offset as usize, 0xFF);
            if i == 0 {
                let vid = Vid {
                    vol_type: VolType::Dynamic,
                    vol_id: super::super::headers::UBI_INTERNAL_VOL_ID_START,
                    lnum: 0,
                    sqnum: 1,
                    ..Default::default()
                };
                block.extend_from_slice(&vid.to_bytes());
            }
            block.resize(ec.data_offset as usize, 0xFF);
            block.resize(block_size, 0xFF);
            out.extend_from_slice(&block);
        }
        out
    }

    #[test]
    fn locate_infers_block_size_and_count_from_signature_stride() {
        let image = synthetic_image(4096, 4);
        let (start, block_size, block_count) = locate(&image).unwrap();
        assert_eq!(start, 0);
        assert_eq!(block_size, 4096);
        assert_eq!(block_count, 4);
    }

    #[test]
    fn a_single_signature_is_ambiguous() {
        let image = synthetic_image(4096, 1);
        assert!(matches!(locate(&image), Err(UbiError::AmbiguousLayout)));
    }

    #[test]
    fn no_signature_is_not_found() {
        assert!(matches!(locate(&[0u8; 64]), Err(UbiError::NoUBIFound)));
    }

    #[test]
    fn decode_preserves_bytes_outside_the_ubi_region() {
        let mut image = vec![0xDEu8; 128];
        image.extend(synthetic_image(4096, 4));
        image.extend(vec![0xADu8; 64]);

        let ubi = UnsortedBlockImages::decode(&image).unwrap();
        assert_eq!(ubi.encode(), image);
    }

    #[test]
    fn finds_the_internal_volume_table() {
        let image = synthetic_image(4096, 4);
        let ubi = UnsortedBlockImages::decode(&image).unwrap();
        assert!(matches!(ubi.volume_table(), Err(UbiError::NoVolumeTable)));
    }

    fn leb_block(block_id: u32, lnum: u32, sqnum: u64, image_seq: u32, fill: u8) -> PhysicalEraseBlock<'static> {
        let mut peb = PhysicalEraseBlock::fresh(block_id, 4096).claim(7, lnum, sqnum, vec![fill; 100]);
        peb.ec_header.image_seq = image_seq;
        peb
    }

    #[test]
    fn wear_leveled_duplicate_prefers_the_highest_sequence_number() {
        let blocks = vec![
            leb_block(0, 0, 1, 5, b'A'),
            leb_block(1, 0, 2, 5, b'C'),
            leb_block(2, 1, 3, 5, b'B'),
        ];
        let ubi = UnsortedBlockImages {
            prefix: &[],
            suffix: &[],
            block_size: 4096,
            blocks,
        };
        let lebs = ubi.logical_erase_blocks(7);
        assert_eq!(lebs.get(&0).unwrap().data(), &[b'C'; 100]);
        assert_eq!(lebs.get(&1).unwrap().data(), &[b'B'; 100]);
    }

    #[test]
    fn stale_image_sequence_is_ignored() {
        let blocks = vec![
            leb_block(0, 0, 1, 5, b'C'),
            leb_block(1, 1, 2, 5, b'B'),
            leb_block(2, 0, 99, 4, b'Z'),
        ];
        let ubi = UnsortedBlockImages {
            prefix: &[],
            suffix: &[],
            block_size: 4096,
            blocks,
        };
        let lebs = ubi.logical_erase_blocks(7);
        assert_eq!(lebs.get(&0).unwrap().data(), &[b'C'; 100]);
        assert_eq!(lebs.len(), 2);
    }
}
