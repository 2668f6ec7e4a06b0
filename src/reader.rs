//! A cursor over an immutable byte buffer, exposing absolute seek and typed
//! big-endian reads. Mirrors the role `bitstring.ConstBitStream` plays in the
//! original implementation, but as a zero-allocation slice-borrowing cursor.

use crate::error::{Result, UbiError};

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read `len` bytes at the current position, advancing the cursor. Returned
    /// slices borrow from the original buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(UbiError::TruncatedInput {
                offset: self.pos,
                len,
                available: self.buf.len().saturating_sub(self.pos),
            })?;

        let slice = self.buf.get(self.pos..end).ok_or(UbiError::TruncatedInput {
            offset: self.pos,
            len,
            available: self.buf.len().saturating_sub(self.pos),
        })?;

        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }
}

/// Reads a big-endian `u32` at a fixed offset within a byte slice, without
/// going through a [`Reader`]. Used by the device-image sub-payload extractors,
/// which index into an already-sliced `image` buffer by absolute load-address
/// offsets rather than sequential cursor reads.
pub fn u32_at(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or(UbiError::TruncatedInput {
            offset,
            len: 4,
            available: data.len().saturating_sub(offset.min(data.len())),
        })?;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_the_cursor() {
        let buf = [0x00, 0x01, 0x02, 0x03, 0xAA, 0xBB, 0xCC, 0xDD];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0x00010203);
        assert_eq!(r.tell(), 4);
        assert_eq!(r.read_bytes(2).unwrap(), &[0xAA, 0xBB]);
        assert_eq!(r.tell(), 6);
    }

    #[test]
    fn seek_does_not_interpret_contents() {
        let buf = [1u8, 2, 3, 4, 5];
        let mut r = Reader::new(&buf);
        r.seek(3);
        assert_eq!(r.read_bytes(2).unwrap(), &[4, 5]);
    }

    #[test]
    fn out_of_range_read_is_truncated_input() {
        let buf = [1u8, 2, 3];
        let mut r = Reader::new(&buf);
        match r.read_bytes(4) {
            Err(UbiError::TruncatedInput { offset, len, available }) => {
                assert_eq!((offset, len, available), (0, 4, 3));
            }
            other => panic!("expected TruncatedInput, got {other:?}"),
        }
    }
}
