//! Table-driven packing of short strings into a single 64-bit word.
//!
//! # Layout
//!
//! ```text
//! 63      60 59                                                      0
//! +---------+--------------------------------------------------------+
//! | selector| code 0 | code 1 | ...                        | padding |
//! +---------+--------------------------------------------------------+
//! ```
//!
//! The selector names the table the string was packed with. The remaining
//! 60 bits hold fixed-width character codes, first character in the most
//! significant position. Code `0` is padding in every table, so the string
//! length is the number of codes before the first zero and no separate
//! length field is needed.
//!
//! Tables are tried in [`ShortStringTable::PREFERENCE`] order; the first
//! one that contains every character and whose capacity covers the length
//! wins. A string no table accepts is not an error: the caller stores it
//! in dynamic records instead.

use crate::error::{CodecError, CodecResult};

/// Bit position of the table selector.
pub const SELECTOR_SHIFT: u32 = 60;

/// Number of bits available for character codes.
pub const CODE_AREA_BITS: u32 = 60;

const NUMERICAL: [char; 15] = [
    ' ', '+', '-', '.', ',', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

const CASE_PUNCTUATION: [char; 4] = ['_', ':', '.', '-'];

/// One of the fixed character tables used for inline strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShortStringTable {
    /// Digits, sign, space, decimal point and comma. 4 bits per character.
    Numerical = 1,
    /// Upper-case letters, space and `_ : . -`. 5 bits per character.
    Upper = 2,
    /// Lower-case letters, space and `_ : . -`. 5 bits per character.
    Lower = 3,
    /// Space, digits and both letter cases. 6 bits per character.
    Alphanumeric = 4,
    /// Printable Latin-1 (U+0020..U+007E, U+00A0..U+00FF). 8 bits per character.
    Latin1 = 5,
}

impl ShortStringTable {
    /// All tables, in the order the encoder tries them.
    pub const PREFERENCE: [Self; 5] = [
        Self::Numerical,
        Self::Upper,
        Self::Lower,
        Self::Alphanumeric,
        Self::Latin1,
    ];

    /// Returns the selector stored in the top bits of the word.
    #[must_use]
    pub const fn selector(self) -> u8 {
        self as u8
    }

    /// Looks up a table by selector.
    #[must_use]
    pub const fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            1 => Some(Self::Numerical),
            2 => Some(Self::Upper),
            3 => Some(Self::Lower),
            4 => Some(Self::Alphanumeric),
            5 => Some(Self::Latin1),
            _ => None,
        }
    }

    /// Width of one character code.
    #[must_use]
    pub const fn bits_per_char(self) -> u32 {
        match self {
            Self::Numerical => 4,
            Self::Upper | Self::Lower => 5,
            Self::Alphanumeric => 6,
            Self::Latin1 => 8,
        }
    }

    /// Longest string this table can hold.
    #[must_use]
    pub const fn max_chars(self) -> usize {
        (CODE_AREA_BITS / self.bits_per_char()) as usize
    }

    /// Returns the non-zero code for `c`, or `None` if `c` is not in the table.
    #[must_use]
    pub fn code_of(self, c: char) -> Option<u8> {
        match self {
            Self::Numerical => NUMERICAL
                .iter()
                .position(|&n| n == c)
                .map(|i| i as u8 + 1),
            Self::Upper => case_code(c, 'A'..='Z', 'A'),
            Self::Lower => case_code(c, 'a'..='z', 'a'),
            Self::Alphanumeric => match c {
                ' ' => Some(1),
                '0'..='9' => Some(c as u8 - b'0' + 2),
                'A'..='Z' => Some(c as u8 - b'A' + 12),
                'a'..='z' => Some(c as u8 - b'a' + 38),
                _ => None,
            },
            Self::Latin1 => match c as u32 {
                cp @ (0x20..=0x7E | 0xA0..=0xFF) => Some(cp as u8),
                _ => None,
            },
        }
    }

    /// Returns the character for `code`, or `None` if the code is unused.
    #[must_use]
    pub fn char_of(self, code: u8) -> Option<char> {
        if code == 0 {
            return None;
        }
        match self {
            Self::Numerical => NUMERICAL.get(usize::from(code) - 1).copied(),
            Self::Upper => case_char(code, b'A'),
            Self::Lower => case_char(code, b'a'),
            Self::Alphanumeric => match code {
                1 => Some(' '),
                2..=11 => Some(char::from(b'0' + code - 2)),
                12..=37 => Some(char::from(b'A' + code - 12)),
                38..=63 => Some(char::from(b'a' + code - 38)),
                _ => None,
            },
            Self::Latin1 => match code {
                0x20..=0x7E | 0xA0..=0xFF => Some(char::from(code)),
                _ => None,
            },
        }
    }

    /// Packs `value` with this table.
    ///
    /// Returns `None` if a character is outside the alphabet or the string
    /// is longer than [`max_chars`](Self::max_chars).
    #[must_use]
    pub fn pack(self, value: &str) -> Option<u64> {
        let bits = self.bits_per_char();
        let mut word = u64::from(self.selector()) << SELECTOR_SHIFT;
        for (i, c) in value.chars().enumerate() {
            if i >= self.max_chars() {
                return None;
            }
            let code = self.code_of(c)?;
            let shift = CODE_AREA_BITS - bits * (i as u32 + 1);
            word |= u64::from(code) << shift;
        }
        Some(word)
    }
}

// Layout shared by Upper and Lower: 1 = space, 2..=27 letters, 28..=31 punctuation.
fn case_code(c: char, letters: std::ops::RangeInclusive<char>, first: char) -> Option<u8> {
    if c == ' ' {
        return Some(1);
    }
    if letters.contains(&c) {
        return Some(c as u8 - first as u8 + 2);
    }
    CASE_PUNCTUATION
        .iter()
        .position(|&p| p == c)
        .map(|i| i as u8 + 28)
}

fn case_char(code: u8, first: u8) -> Option<char> {
    match code {
        1 => Some(' '),
        2..=27 => Some(char::from(first + code - 2)),
        28..=31 => CASE_PUNCTUATION.get(usize::from(code - 28)).copied(),
        _ => None,
    }
}

/// Returns the table `value` would be packed with, if any.
#[must_use]
pub fn table_for(value: &str) -> Option<ShortStringTable> {
    ShortStringTable::PREFERENCE
        .into_iter()
        .find(|table| table.pack(value).is_some())
}

/// Packs `value` into an inline word using the first table that can hold it.
///
/// `None` means the value must be stored out of line.
///
/// # Example
///
/// ```
/// use ridgedb_codec::{decode_short_string, encode_short_string};
///
/// let word = encode_short_string("+123456789 1234").unwrap();
/// assert_eq!(decode_short_string(word).unwrap(), "+123456789 1234");
/// assert!(encode_short_string("+123456789 01234").is_none());
/// ```
#[must_use]
pub fn encode_short_string(value: &str) -> Option<u64> {
    ShortStringTable::PREFERENCE
        .into_iter()
        .find_map(|table| table.pack(value))
}

/// Unpacks a word produced by [`encode_short_string`].
///
/// # Errors
///
/// Fails if the selector is unknown, a code has no character, or bits
/// after the terminating padding are set.
pub fn decode_short_string(word: u64) -> CodecResult<String> {
    let selector = (word >> SELECTOR_SHIFT) as u8;
    let table =
        ShortStringTable::from_selector(selector).ok_or(CodecError::UnknownSelector { selector })?;

    let bits = table.bits_per_char();
    let mask = (1u64 << bits) - 1;
    let mut out = String::with_capacity(table.max_chars());
    let mut consumed = 0u32;

    while (consumed as usize) < table.max_chars() {
        let shift = CODE_AREA_BITS - bits * (consumed + 1);
        let code = ((word >> shift) & mask) as u8;
        if code == 0 {
            break;
        }
        let c = table
            .char_of(code)
            .ok_or(CodecError::UnknownCode { table, code })?;
        out.push(c);
        consumed += 1;
    }

    let rest = CODE_AREA_BITS - bits * consumed;
    if word & ((1u64 << rest) - 1) != 0 {
        return Err(CodecError::DirtyPadding);
    }

    Ok(out)
}
