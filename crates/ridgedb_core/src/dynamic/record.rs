//! On-disk layout of one dynamic record block.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordId;

/// Sentinel `next` value that terminates a chain.
pub const NO_NEXT: u64 = u64::MAX;

/// in_use (1) + data_len (2)
const FLAG_AND_LEN: usize = 3;

/// next pointer (8)
const NEXT_SIZE: usize = 8;

/// Bytes of every block not available for data.
pub const BLOCK_HEADER_SIZE: usize = FLAG_AND_LEN + NEXT_SIZE;

/// One decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRecord {
    /// Whether the block belongs to a chain.
    pub in_use: bool,
    /// Payload bytes held by this block.
    pub data: Vec<u8>,
    /// The following block, if any.
    pub next: Option<RecordId>,
}

impl DynamicRecord {
    /// Number of payload bytes a block of `block_size` can hold.
    #[must_use]
    pub const fn capacity(block_size: usize) -> usize {
        block_size - BLOCK_HEADER_SIZE
    }

    /// Encodes into exactly `block_size` bytes.
    ///
    /// The caller guarantees `data` fits the block.
    #[must_use]
    pub fn encode(&self, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; block_size];
        buf[0] = u8::from(self.in_use);
        buf[1..3].copy_from_slice(&(self.data.len() as u16).to_le_bytes());
        buf[FLAG_AND_LEN..FLAG_AND_LEN + self.data.len()].copy_from_slice(&self.data);
        let next = self.next.map_or(NO_NEXT, RecordId::as_u64);
        buf[block_size - NEXT_SIZE..].copy_from_slice(&next.to_le_bytes());
        buf
    }

    /// Decodes a block read from disk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for a bad in-use flag or data length.
    pub fn decode(id: RecordId, buf: &[u8]) -> CoreResult<Self> {
        let block_size = buf.len();
        let in_use = match buf[0] {
            0 => false,
            1 => true,
            other => {
                return Err(CoreError::invalid_record(format!(
                    "{id} has in-use flag {other}"
                )))
            }
        };
        let len = usize::from(u16::from_le_bytes([buf[1], buf[2]]));
        if len > Self::capacity(block_size) {
            return Err(CoreError::invalid_record(format!(
                "{id} claims {len} data bytes, capacity is {}",
                Self::capacity(block_size)
            )));
        }
        let mut next_bytes = [0u8; NEXT_SIZE];
        next_bytes.copy_from_slice(&buf[block_size - NEXT_SIZE..]);
        let next = match u64::from_le_bytes(next_bytes) {
            NO_NEXT => None,
            n => Some(RecordId(n)),
        };
        Ok(Self {
            in_use,
            data: buf[FLAG_AND_LEN..FLAG_AND_LEN + len].to_vec(),
            next,
        })
    }

    /// An unused, empty block.
    #[must_use]
    pub fn free() -> Self {
        Self {
            in_use: false,
            data: Vec::new(),
            next: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_fixed() {
        let record = DynamicRecord {
            in_use: true,
            data: b"abc".to_vec(),
            next: Some(RecordId(5)),
        };
        let buf = record.encode(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..3], &3u16.to_le_bytes());
        assert_eq!(&buf[3..6], b"abc");
        assert_eq!(&buf[8..16], &5u64.to_le_bytes());
        assert_eq!(DynamicRecord::decode(RecordId(0), &buf).unwrap(), record);
    }

    #[test]
    fn chain_end_uses_sentinel() {
        let buf = DynamicRecord {
            in_use: true,
            data: vec![],
            next: None,
        }
        .encode(12);
        assert_eq!(&buf[4..12], &NO_NEXT.to_le_bytes());
        assert_eq!(DynamicRecord::decode(RecordId(0), &buf).unwrap().next, None);
    }

    #[test]
    fn zeroed_block_is_free() {
        let record = DynamicRecord::decode(RecordId(0), &[0u8; 32]).unwrap();
        assert!(!record.in_use);
        assert!(record.data.is_empty());
    }

    #[test]
    fn rejects_bad_flag_and_length() {
        let mut buf = DynamicRecord::free().encode(16);
        buf[0] = 7;
        assert!(DynamicRecord::decode(RecordId(1), &buf).is_err());

        let mut buf = DynamicRecord::free().encode(16);
        buf[1..3].copy_from_slice(&6u16.to_le_bytes());
        assert!(DynamicRecord::decode(RecordId(1), &buf).is_err());
    }
}
