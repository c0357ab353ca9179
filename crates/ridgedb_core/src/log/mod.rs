//! Framed append-only logs.
//!
//! Both the coordinator's recovery log and every participant's branch
//! journal are sequences of frames:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers the header and payload.
//! Each log kind has its own magic so a journal can never be replayed as
//! a recovery log.
//!
//! ## Recovery Policy
//!
//! ### Tolerated (clean end of log)
//!
//! - **Truncated header**: fewer than 11 bytes left
//! - **Truncated payload**: the length runs past the end of the log
//!
//! These are writes torn by a crash before they were flushed. The torn
//! tail is cut off when the log is opened so later appends stay readable.
//!
//! ### Fatal
//!
//! - **CRC mismatch** → `ChecksumMismatch`
//! - **Wrong magic**, **unknown record type** or **future version** →
//!   `LogCorruption`
//!
//! ## Invariants
//!
//! - Logs are **append-only** until they are truncated as a whole
//! - A record is acted on only after it has been flushed

mod frame;
mod payload;

pub use frame::{compute_crc32, FrameIterator, FrameLog, LogRecord, FRAME_OVERHEAD, LOG_VERSION};
pub use payload::{put_bytes, put_short_str, PayloadReader};
