//! Cursor over a frame payload.

use crate::error::{CoreError, CoreResult};
use crate::types::{TransactionId, Xid};

/// Reads little-endian fields from a payload, failing on short input.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Starts reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of payload"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let bytes = self.take(N)?;
        bytes
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid field width"))
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a `u16`.
    pub fn u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Reads a `u32`.
    pub fn u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Reads a `u64`.
    pub fn u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Reads a branch identifier.
    pub fn xid(&mut self) -> CoreResult<Xid> {
        let global = TransactionId::new(self.u64()?);
        Ok(Xid::new(global, self.u32()?))
    }

    /// Reads a `u32` length followed by that many bytes.
    pub fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a `u16` length followed by UTF-8 text.
    pub fn short_str(&mut self) -> CoreResult<String> {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::log_corruption("invalid UTF-8 in payload"))
    }

    /// Fails if unread bytes remain.
    pub fn finish(self, what: &str) -> CoreResult<()> {
        if self.pos != self.buf.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {what} record: expected {} bytes, got {}",
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

/// Appends a `u16` length and the string bytes.
///
/// Longer strings are cut at the last character boundary below 64 KiB.
pub fn put_short_str(buf: &mut Vec<u8>, s: &str) {
    let mut end = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let bytes = &s.as_bytes()[..end];
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Appends a `u32` length and the bytes.
pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_in_order() {
        let mut buf = vec![7u8];
        buf.extend_from_slice(&513u16.to_le_bytes());
        Xid::new(TransactionId::new(9), 3).encode(&mut buf);
        put_short_str(&mut buf, "nodes");
        put_bytes(&mut buf, b"abc");

        let mut r = PayloadReader::new(&buf);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.u16().unwrap(), 513);
        assert_eq!(r.xid().unwrap(), Xid::new(TransactionId::new(9), 3));
        assert_eq!(r.short_str().unwrap(), "nodes");
        assert_eq!(r.bytes().unwrap(), b"abc");
        r.finish("test").unwrap();
    }

    #[test]
    fn short_input_is_corruption() {
        let mut r = PayloadReader::new(&[1, 2]);
        assert!(matches!(r.u32(), Err(CoreError::LogCorruption { .. })));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut r = PayloadReader::new(&[1, 2]);
        r.u8().unwrap();
        assert!(r.finish("test").is_err());
    }
}
