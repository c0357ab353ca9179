//! Frame encoding, appending and streaming replay.

use crate::error::{CoreError, CoreResult};
use ridgedb_storage::StorageBackend;
use tracing::warn;

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
const HEADER_SIZE: usize = 11;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CRC_SIZE;

/// Computes CRC32 checksum.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A record type that can be stored in a framed log.
pub trait LogRecord: Sized {
    /// Magic bytes identifying this kind of log.
    const MAGIC: [u8; 4];

    /// Human-readable name of the log kind, used in errors.
    const KIND: &'static str;

    /// Type byte of this record.
    fn type_byte(&self) -> u8;

    /// Serializes the payload (without envelope).
    fn encode_payload(&self, buf: &mut Vec<u8>);

    /// Deserializes a record from its type byte and payload.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` for unknown types or malformed payloads.
    fn decode_payload(type_byte: u8, payload: &[u8]) -> CoreResult<Self>;
}

fn encode_frame<R: LogRecord>(record: &R, out: &mut Vec<u8>) -> CoreResult<()> {
    let start = out.len();
    out.extend_from_slice(&R::MAGIC);
    out.extend_from_slice(&LOG_VERSION.to_le_bytes());
    out.push(record.type_byte());
    // Length is patched once the payload is known.
    out.extend_from_slice(&[0u8; 4]);
    let payload_start = out.len();
    record.encode_payload(out);
    let len = u32::try_from(out.len() - payload_start)
        .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;
    out[payload_start - 4..payload_start].copy_from_slice(&len.to_le_bytes());
    let crc = compute_crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// An append-only framed log over a storage backend.
///
/// The log itself is not synchronized; owners wrap it in a mutex so that
/// exactly one writer appends at a time.
pub struct FrameLog {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
}

impl FrameLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            sync_on_write,
        }
    }

    /// Appends one record and returns its offset. Does not flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large or the write fails.
    pub fn append<R: LogRecord>(&mut self, record: &R) -> CoreResult<u64> {
        let mut data = Vec::with_capacity(64);
        encode_frame(record, &mut data)?;
        Ok(self.backend.append(&data)?)
    }

    /// Appends several records with a single write. Does not flush.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload is too large or the write fails.
    pub fn append_all<R: LogRecord>(&mut self, records: &[R]) -> CoreResult<()> {
        let mut data = Vec::with_capacity(records.len() * 32);
        for record in records {
            encode_frame(record, &mut data)?;
        }
        self.backend.append(&data)?;
        Ok(())
    }

    /// Makes every appended record durable.
    ///
    /// Always flushes; additionally fsyncs when the log was opened with
    /// `sync_on_write`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot flush.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Returns the current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns a streaming iterator over the records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn iter<R: LogRecord>(&self) -> CoreResult<FrameIterator<'_, R>> {
        FrameIterator::new(self.backend.as_ref())
    }

    /// Reads every record and cuts off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns an error on corruption or I/O failure.
    pub fn replay<R: LogRecord>(&mut self) -> CoreResult<Vec<R>> {
        let mut records = Vec::new();
        let mut iter = self.iter::<R>()?;
        for result in iter.by_ref() {
            let (_, record) = result?;
            records.push(record);
        }
        let valid_end = iter.valid_end();
        let size = self.backend.size()?;
        if valid_end < size {
            warn!(
                log = R::KIND,
                valid_end,
                size,
                "discarding torn record at end of log"
            );
            self.backend.truncate(valid_end)?;
        }
        Ok(records)
    }

    /// Discards every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be truncated.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.backend.truncate(0)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Atomically replaces every record with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload is too large or the backend cannot
    /// swap its contents; the old records then stay in place.
    pub fn rewrite<R: LogRecord>(&mut self, records: &[R]) -> CoreResult<()> {
        let mut data = Vec::with_capacity(records.len() * 32);
        for record in records {
            encode_frame(record, &mut data)?;
        }
        self.backend.replace(&data)?;
        Ok(())
    }
}

impl std::fmt::Debug for FrameLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLog")
            .field("size", &self.backend.size().ok())
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}

/// A streaming iterator over the frames of a log.
///
/// Yields `(offset, record)` pairs. Reading stops at the first torn
/// frame; [`valid_end`](Self::valid_end) then reports where the intact
/// prefix ends.
pub struct FrameIterator<'a, R> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    finished: bool,
    _record: std::marker::PhantomData<R>,
}

impl<'a, R: LogRecord> FrameIterator<'a, R> {
    /// Starts iterating at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        Ok(Self {
            backend,
            total_size: backend.size()?,
            offset: 0,
            finished: false,
            _record: std::marker::PhantomData,
        })
    }

    /// Offset just past the last complete frame read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, R)>> {
        let start = self.offset;
        let remaining = self.total_size - start;
        if remaining < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != R::MAGIC {
            return Err(CoreError::log_corruption(format!(
                "invalid {} magic at offset {start}: {:?}",
                R::KIND,
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported {} version {version} at offset {start}",
                R::KIND
            )));
        }

        let type_byte = header[6];
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;
        let frame_len = HEADER_SIZE as u64 + len + CRC_SIZE as u64;
        if remaining < frame_len {
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, len as usize + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(len as usize);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let actual = hasher.finalize();
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = R::decode_payload(type_byte, payload)?;
        self.offset = start + frame_len;
        Ok(Some((start, record)))
    }
}

impl<R: LogRecord> Iterator for FrameIterator<'_, R> {
    type Item = CoreResult<(u64, R)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
