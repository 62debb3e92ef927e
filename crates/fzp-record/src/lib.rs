//! Self-describing nested attribute records.
//!
//! The persisted cache store and on-disk pool labels both use the same
//! dynamically-typed dictionary format: string-keyed pairs whose values are
//! scalars, strings, or nested dictionaries. This crate models that format as
//! a tagged variant tree ([`RecValue`] / [`RecList`]) and implements the wire
//! codec ([`pack`] / [`unpack`]).
//!
//! Wire layout (all multi-byte integers big-endian):
//! - 4-byte stream header: encoding byte (1 = XDR), endian byte (0 = big),
//!   two reserved zero bytes
//! - list body: `version: i32`, `flags: u32`, pairs, 8-zero-byte terminator
//! - pair: `encoded_size: u32` (bytes of the whole pair, both size words
//!   included), `decoded_size: u32`, XDR name string, `type: i32`,
//!   `nelem: i32`, value payload
//!
//! Pairs with unknown type tags are skipped via `encoded_size`, so readers of
//! this build tolerate attributes written by newer ones.

use fzp_error::{FzpError, Result};
use tracing::debug;

/// Stream encoding byte for the XDR-style layout (the only one supported).
pub const ENCODING_XDR: u8 = 1;
/// Endian byte: big-endian payloads.
pub const ENDIAN_BIG: u8 = 0;
/// List body version emitted and accepted by this build.
pub const LIST_VERSION: i32 = 0;
/// List flag bit: pair names are unique within the list.
pub const FLAG_UNIQUE_NAMES: u32 = 0x1;

/// Type tag for a 64-bit unsigned integer value.
pub const TAG_U64: i32 = 8;
/// Type tag for a string value.
pub const TAG_STRING: i32 = 9;
/// Type tag for a nested list value.
pub const TAG_LIST: i32 = 19;
/// Type tag for a boolean value.
pub const TAG_BOOL: i32 = 21;

/// Size of the 4-byte stream header.
const HEADER_BYTES: usize = 4;
/// Fixed bytes of a pair before the name string: the two size words.
const PAIR_SIZE_WORDS: usize = 8;

// ---------------------------------------------------------------------------
// Tree model
// ---------------------------------------------------------------------------

/// One dynamically-typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecValue {
    Bool(bool),
    U64(u64),
    Str(String),
    List(RecList),
}

impl RecValue {
    /// Wire type tag for this value.
    #[must_use]
    pub fn tag(&self) -> i32 {
        match self {
            Self::Bool(_) => TAG_BOOL,
            Self::U64(_) => TAG_U64,
            Self::Str(_) => TAG_STRING,
            Self::List(_) => TAG_LIST,
        }
    }
}

/// An ordered dictionary of uniquely-named attribute values.
///
/// Order is preserved through pack/unpack; name uniqueness is enforced on
/// insert (and therefore on decode).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecList {
    pairs: Vec<(String, RecValue)>,
}

impl RecList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the list holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecValue)> {
        self.pairs.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Insert a pair, rejecting duplicate names.
    pub fn insert(&mut self, name: impl Into<String>, value: RecValue) -> Result<()> {
        let name = name.into();
        if self.pairs.iter().any(|(existing, _)| *existing == name) {
            return Err(FzpError::MalformedCache(format!(
                "duplicate attribute name: {name}"
            )));
        }
        self.pairs.push((name, value));
        Ok(())
    }

    /// Look up a value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RecValue> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Look up a u64 value by name.
    #[must_use]
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(RecValue::U64(value)) => Some(*value),
            _ => None,
        }
    }

    /// Look up a string value by name.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(RecValue::Str(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Look up a boolean value by name.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(RecValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    /// Look up a nested list by name.
    #[must_use]
    pub fn get_list(&self, name: &str) -> Option<&Self> {
        match self.get(name) {
            Some(RecValue::List(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether any pair named `key` anywhere in the tree (this list or any
    /// nested list) carries the string `value`. Used to match a triggering
    /// device path against a record's vdev tree.
    #[must_use]
    pub fn deep_any_str(&self, key: &str, value: &str) -> bool {
        self.pairs.iter().any(|(name, val)| match val {
            RecValue::Str(s) => name == key && s == value,
            RecValue::List(list) => list.deep_any_str(key, value),
            _ => false,
        })
    }
}

// ---------------------------------------------------------------------------
// Unpack
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            FzpError::MalformedCache("pair length overflows buffer offset".to_owned())
        })?;
        if end > self.buf.len() {
            return Err(FzpError::MalformedCache(format!(
                "truncated record: need {len} bytes at offset {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// XDR string: u32 length, bytes, zero padding to a 4-byte boundary.
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| FzpError::MalformedCache("attribute string is not UTF-8".to_owned()))?
            .to_owned();
        let pad = xdr_pad(len);
        if pad > 0 {
            self.take(pad)?;
        }
        Ok(text)
    }

    fn seek_to(&mut self, pos: usize) -> Result<()> {
        if pos < self.pos || pos > self.buf.len() {
            return Err(FzpError::MalformedCache(format!(
                "pair size points outside buffer (to {pos}, cursor {})",
                self.pos
            )));
        }
        self.pos = pos;
        Ok(())
    }
}

/// Padding bytes needed to round `len` up to a 4-byte boundary.
const fn xdr_pad(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Decode a packed record stream.
///
/// Zero-length input yields an empty [`RecList`]; any structural
/// inconsistency yields [`FzpError::MalformedCache`].
pub fn unpack(buf: &[u8]) -> Result<RecList> {
    if buf.is_empty() {
        return Ok(RecList::new());
    }

    let mut cursor = Cursor::new(buf);
    let header = cursor.take(HEADER_BYTES)?;
    if header[0] != ENCODING_XDR {
        return Err(FzpError::MalformedCache(format!(
            "unsupported stream encoding: {}",
            header[0]
        )));
    }
    if header[1] != ENDIAN_BIG {
        return Err(FzpError::MalformedCache(format!(
            "unsupported endian marker: {}",
            header[1]
        )));
    }
    unpack_list(&mut cursor)
}

fn unpack_list(cursor: &mut Cursor<'_>) -> Result<RecList> {
    let version = cursor.read_i32()?;
    if version != LIST_VERSION {
        return Err(FzpError::MalformedCache(format!(
            "unsupported list version: {version}"
        )));
    }
    // Flags are carried for writers; uniqueness is enforced on insert either way.
    let _flags = cursor.read_u32()?;

    let mut list = RecList::new();
    loop {
        let pair_start = cursor.pos;
        let encoded_size = cursor.read_u32()? as usize;
        if encoded_size == 0 {
            let decoded_size = cursor.read_u32()?;
            if decoded_size != 0 {
                return Err(FzpError::MalformedCache(
                    "corrupt list terminator".to_owned(),
                ));
            }
            return Ok(list);
        }
        if encoded_size < PAIR_SIZE_WORDS {
            return Err(FzpError::MalformedCache(format!(
                "pair encoded size too small: {encoded_size}"
            )));
        }
        let pair_end = pair_start
            .checked_add(encoded_size)
            .ok_or_else(|| FzpError::MalformedCache("pair size overflow".to_owned()))?;
        let _decoded_size = cursor.read_u32()?;

        let name = cursor.read_string()?;
        let tag = cursor.read_i32()?;
        let nelem = cursor.read_i32()?;

        let value = match tag {
            TAG_U64 | TAG_STRING | TAG_LIST | TAG_BOOL => {
                if nelem != 1 {
                    return Err(FzpError::MalformedCache(format!(
                        "attribute '{name}' has unsupported element count {nelem}"
                    )));
                }
                Some(match tag {
                    TAG_U64 => RecValue::U64(cursor.read_u64()?),
                    TAG_STRING => RecValue::Str(cursor.read_string()?),
                    TAG_BOOL => match cursor.read_u32()? {
                        0 => RecValue::Bool(false),
                        1 => RecValue::Bool(true),
                        other => {
                            return Err(FzpError::MalformedCache(format!(
                                "attribute '{name}' has non-boolean payload {other}"
                            )));
                        }
                    },
                    _ => RecValue::List(unpack_list(cursor)?),
                })
            }
            unknown => {
                // Forward compatibility: honor the pair's self-described size
                // and move on.
                debug!(name = %name, tag = unknown, "skipping attribute with unknown type tag");
                None
            }
        };

        match value {
            Some(value) => {
                if cursor.pos != pair_end {
                    return Err(FzpError::MalformedCache(format!(
                        "attribute '{name}' encoded size disagrees with payload \
                         (declared {encoded_size}, consumed {})",
                        cursor.pos - pair_start
                    )));
                }
                list.insert(name, value)?;
            }
            None => cursor.seek_to(pair_end)?,
        }
    }
}

// ---------------------------------------------------------------------------
// Pack
// ---------------------------------------------------------------------------

/// Encode a record tree into the packed stream layout.
#[must_use]
pub fn pack(list: &RecList) -> Vec<u8> {
    let mut out = vec![ENCODING_XDR, ENDIAN_BIG, 0, 0];
    pack_list(&mut out, list);
    out
}

fn pack_list(out: &mut Vec<u8>, list: &RecList) {
    out.extend_from_slice(&LIST_VERSION.to_be_bytes());
    out.extend_from_slice(&FLAG_UNIQUE_NAMES.to_be_bytes());
    for (name, value) in list.iter() {
        pack_pair(out, name, value);
    }
    // Terminator: zero encoded and decoded sizes.
    out.extend_from_slice(&[0_u8; 8]);
}

fn pack_pair(out: &mut Vec<u8>, name: &str, value: &RecValue) {
    let mut body = Vec::new();
    pack_string(&mut body, name);
    body.extend_from_slice(&value.tag().to_be_bytes());
    body.extend_from_slice(&1_i32.to_be_bytes());
    match value {
        RecValue::Bool(flag) => body.extend_from_slice(&u32::from(*flag).to_be_bytes()),
        RecValue::U64(number) => body.extend_from_slice(&number.to_be_bytes()),
        RecValue::Str(text) => pack_string(&mut body, text),
        RecValue::List(nested) => pack_list(&mut body, nested),
    }

    let encoded_size = (PAIR_SIZE_WORDS + body.len()) as u32;
    out.extend_from_slice(&encoded_size.to_be_bytes());
    out.extend_from_slice(&encoded_size.to_be_bytes());
    out.extend_from_slice(&body);
}

fn pack_string(out: &mut Vec<u8>, text: &str) {
    let bytes = text.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    for _ in 0..xdr_pad(bytes.len()) {
        out.push(0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn value_strategy() -> impl Strategy<Value = RecValue> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(RecValue::Bool),
            any::<u64>().prop_map(RecValue::U64),
            "[a-z0-9/_.-]{0,24}".prop_map(RecValue::Str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            proptest::collection::vec(("[a-z_]{1,8}", inner), 0..4).prop_map(|pairs| {
                let mut list = RecList::new();
                for (name, value) in pairs {
                    // Duplicate names are legitimately rejected; just drop them.
                    let _ = list.insert(name, value);
                }
                RecValue::List(list)
            })
        })
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_roundtrip(value in value_strategy()) {
            let mut root = RecList::new();
            root.insert("root", value).unwrap();
            let packed = pack(&root);
            let unpacked = unpack(&packed).expect("packed output must unpack");
            prop_assert_eq!(root, unpacked);
        }
    }
}
