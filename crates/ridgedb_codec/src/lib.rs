//! # RidgeDB Codec
//!
//! Encoding of property values for RidgeDB.
//!
//! Every property occupies a fixed 64-bit slot plus a type tag. Booleans,
//! integers and floats always fit the slot. Strings are packed into it with
//! one of a handful of character tables when they are short enough; anything
//! that does not fit is handed back as bytes for the dynamic record store.
//!
//! ## Usage
//!
//! ```
//! use ridgedb_codec::{encode_value, decode_inline, EncodedValue, PropertyValue};
//!
//! let value = PropertyValue::from("SOME_VALUE:T");
//! match encode_value(&value) {
//!     EncodedValue::Inline { kind, payload } => {
//!         assert_eq!(decode_inline(kind, payload).unwrap(), value);
//!     }
//!     EncodedValue::Overflow { .. } => unreachable!("fits the upper-case table"),
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod short_string;
mod value;

pub use error::{CodecError, CodecResult};
pub use short_string::{
    decode_short_string, encode_short_string, table_for, ShortStringTable, CODE_AREA_BITS,
    SELECTOR_SHIFT,
};
pub use value::{decode_inline, decode_overflow, encode_value, EncodedValue, PropertyType, PropertyValue};
