// crates/tally-policy/src/wire.rs
// ============================================================================
// Module: Policy Wire Codec
// Description: Compact binary record format for process-to-process transfer.
// Purpose: Carry config values, rules, nodes, and trees across the RPC boundary.
// Dependencies: bytes
// ============================================================================

//! ## Overview
//! The binary form is a flat sequence of fields: big-endian integers,
//! IEEE-754 `f64` bits, `u32` length-prefixed UTF-8 strings, and `u8` tags.
//! Every optional field is preceded by a one-byte presence marker so decoders
//! never guess which fields follow. Rule variants are tagged through
//! [`RuleKind::wire_tag`].
//!
//! Decoders bound every length against the bytes actually remaining and size
//! preallocations by those bytes through [`bounded_capacity`], so a hostile
//! length prefix cannot trigger a large allocation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::mem;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use crate::error::CodecError;
use crate::node::ConfigPolicyNode;
use crate::rule::FloatRule;
use crate::rule::IntegerRule;
use crate::rule::Rule;
use crate::rule::RuleKind;
use crate::rule::StringRule;
use crate::tree::ConfigPolicyTree;
use crate::tree::PolicyPath;
use crate::value::ConfigMap;
use crate::value::ConfigValue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Wire tag for [`ConfigValue::Int`].
const VALUE_TAG_INT: u8 = 1;
/// Wire tag for [`ConfigValue::Str`].
const VALUE_TAG_STR: u8 = 2;
/// Wire tag for [`ConfigValue::Float`].
const VALUE_TAG_FLOAT: u8 = 3;

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Types with a binary record encoding.
pub trait WireEncode {
    /// Appends the encoded record to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// Types decodable from the binary record encoding.
pub trait WireDecode: Sized {
    /// Decodes one record from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the input is truncated or malformed.
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError>;
}

/// Encodes `value` into a standalone buffer.
#[must_use]
pub fn to_wire_bytes<T: WireEncode + ?Sized>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

/// Decodes a single record that must span all of `bytes`.
///
/// # Errors
///
/// Returns [`CodecError`] on malformed input or trailing bytes.
pub fn from_wire_bytes<T: WireDecode>(bytes: impl Into<Bytes>) -> Result<T, CodecError> {
    let mut buf = bytes.into();
    let value = T::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }
    Ok(value)
}

// ============================================================================
// SECTION: Primitive Helpers
// ============================================================================

/// Fails unless `needed` bytes remain.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] when fewer bytes remain.
pub fn ensure(buf: &Bytes, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

/// Reads a `u8`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

/// Reads a big-endian `u16`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

/// Reads a big-endian `u32`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_u32(buf: &mut Bytes) -> Result<u32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

/// Reads a big-endian `u64`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_u64(buf: &mut Bytes) -> Result<u64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

/// Reads a big-endian `i64`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_i64(buf: &mut Bytes) -> Result<i64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

/// Reads an `f64` from its big-endian bit pattern.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_f64(buf: &mut Bytes) -> Result<f64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

/// Writes a boolean as `0` or `1`.
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Reads a boolean written by [`put_bool`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidMarker`] for bytes other than 0 and 1.
pub fn get_bool(buf: &mut Bytes) -> Result<bool, CodecError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidMarker(other)),
    }
}

/// Writes a length prefix.
///
/// Lengths beyond `u32::MAX` are not representable; callers bound payloads
/// well below that through frame limits.
pub fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
}

/// Reads a length prefix and checks it against the remaining bytes, assuming
/// each element occupies at least `min_element_bytes`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] when the prefix overstates the input.
pub fn get_len(buf: &mut Bytes, min_element_bytes: usize) -> Result<usize, CodecError> {
    let len = usize::try_from(get_u32(buf)?)
        .map_err(|_| CodecError::Invalid("length exceeds address space".to_string()))?;
    ensure(buf, len.saturating_mul(min_element_bytes))?;
    Ok(len)
}

/// Returns a preallocation size for `len` decoded elements of `T`.
///
/// The result never reserves more memory than the bytes left in `buf`, since
/// in-memory elements can be far larger than their encoded form.
#[must_use]
pub fn bounded_capacity<T>(len: usize, buf: &Bytes) -> usize {
    len.min(buf.remaining() / mem::size_of::<T>().max(1))
}

/// Writes raw bytes with a length prefix.
pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_len(buf, value.len());
    buf.put_slice(value);
}

/// Reads length-prefixed raw bytes.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on short input.
pub fn get_bytes(buf: &mut Bytes) -> Result<Bytes, CodecError> {
    let len = get_len(buf, 1)?;
    Ok(buf.split_to(len))
}

/// Writes a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Reads a length-prefixed UTF-8 string.
///
/// # Errors
///
/// Returns [`CodecError`] on short input or invalid UTF-8.
pub fn get_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Writes a presence marker followed by the value when present.
pub fn put_optional<T>(buf: &mut BytesMut, value: Option<T>, put: impl FnOnce(&mut BytesMut, T)) {
    match value {
        Some(value) => {
            put_bool(buf, true);
            put(buf, value);
        }
        None => put_bool(buf, false),
    }
}

/// Reads a presence marker and, when set, the value.
///
/// # Errors
///
/// Returns [`CodecError`] on an invalid marker or malformed value.
pub fn get_optional<T>(
    buf: &mut Bytes,
    get: impl FnOnce(&mut Bytes) -> Result<T, CodecError>,
) -> Result<Option<T>, CodecError> {
    if get_bool(buf)? { get(buf).map(Some) } else { Ok(None) }
}

// ============================================================================
// SECTION: Config Values
// ============================================================================

impl WireEncode for ConfigValue {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Int(value) => {
                buf.put_u8(VALUE_TAG_INT);
                buf.put_i64(*value);
            }
            Self::Str(value) => {
                buf.put_u8(VALUE_TAG_STR);
                put_str(buf, value);
            }
            Self::Float(value) => {
                buf.put_u8(VALUE_TAG_FLOAT);
                buf.put_f64(*value);
            }
        }
    }
}

impl WireDecode for ConfigValue {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        match get_u8(buf)? {
            VALUE_TAG_INT => Ok(Self::Int(get_i64(buf)?)),
            VALUE_TAG_STR => Ok(Self::Str(get_string(buf)?)),
            VALUE_TAG_FLOAT => Ok(Self::Float(get_f64(buf)?)),
            other => Err(CodecError::UnknownValueTag(other)),
        }
    }
}

impl WireEncode for ConfigMap {
    fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        for (key, value) in self {
            put_str(buf, key);
            value.encode(buf);
        }
    }
}

impl WireDecode for ConfigMap {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        // key length prefix plus value tag
        let len = get_len(buf, 5)?;
        let mut map = Self::new();
        for _ in 0..len {
            let key = get_string(buf)?;
            let value = ConfigValue::decode(buf)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

// ============================================================================
// SECTION: Rules
// ============================================================================

impl WireEncode for Rule {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind().wire_tag());
        put_str(buf, self.key());
        put_bool(buf, self.required());
        match self {
            Self::Integer(rule) => {
                put_optional(buf, rule.default(), BytesMut::put_i64);
                put_optional(buf, rule.minimum(), BytesMut::put_i64);
                put_optional(buf, rule.maximum(), BytesMut::put_i64);
            }
            Self::String(rule) => {
                put_optional(buf, rule.default(), put_str);
            }
            Self::Float(rule) => {
                put_optional(buf, rule.default(), BytesMut::put_f64);
                put_optional(buf, rule.minimum(), BytesMut::put_f64);
                put_optional(buf, rule.maximum(), BytesMut::put_f64);
            }
        }
    }
}

impl WireDecode for Rule {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let tag = get_u8(buf)?;
        let kind = RuleKind::from_wire_tag(tag)
            .ok_or_else(|| CodecError::UnknownRuleType(format!("wire tag {tag}")))?;
        let key = get_string(buf)?;
        let required = get_bool(buf)?;
        // Bounds are decoded whether or not a default precedes them.
        match kind {
            RuleKind::Integer => {
                let default = get_optional(buf, get_i64)?;
                let mut rule = IntegerRule::new(key, required, default)?;
                if let Some(minimum) = get_optional(buf, get_i64)? {
                    rule.set_minimum(minimum);
                }
                if let Some(maximum) = get_optional(buf, get_i64)? {
                    rule.set_maximum(maximum);
                }
                Ok(rule.into())
            }
            RuleKind::String => {
                let default = get_optional(buf, get_string)?;
                Ok(StringRule::new(key, required, default)?.into())
            }
            RuleKind::Float => {
                let default = get_optional(buf, get_f64)?;
                let mut rule = FloatRule::new(key, required, default)?;
                if let Some(minimum) = get_optional(buf, get_f64)? {
                    rule.set_minimum(minimum);
                }
                if let Some(maximum) = get_optional(buf, get_f64)? {
                    rule.set_maximum(maximum);
                }
                Ok(rule.into())
            }
        }
    }
}

// ============================================================================
// SECTION: Nodes and Trees
// ============================================================================

impl WireEncode for ConfigPolicyNode {
    fn encode(&self, buf: &mut BytesMut) {
        let rules = self.rules();
        put_len(buf, rules.len());
        for rule in &rules {
            rule.encode(buf);
        }
    }
}

impl WireDecode for ConfigPolicyNode {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        // tag, key length prefix, required flag
        let len = get_len(buf, 6)?;
        let mut rules = Vec::with_capacity(bounded_capacity::<Rule>(len, buf));
        for _ in 0..len {
            rules.push(Rule::decode(buf)?);
        }
        Ok(Self::with_rules(rules))
    }
}

impl WireEncode for PolicyPath {
    fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.segments().len());
        for segment in self.segments() {
            put_str(buf, segment);
        }
    }
}

impl WireDecode for PolicyPath {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let len = get_len(buf, 4)?;
        let mut segments = Vec::with_capacity(bounded_capacity::<String>(len, buf));
        for _ in 0..len {
            segments.push(get_string(buf)?);
        }
        Ok(Self::new(&segments)?)
    }
}

impl WireEncode for ConfigPolicyTree {
    fn encode(&self, buf: &mut BytesMut) {
        let entries = self.entries();
        put_len(buf, entries.len());
        for (path, node) in &entries {
            path.encode(buf);
            node.encode(buf);
        }
    }
}

impl WireDecode for ConfigPolicyTree {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        // path length prefix plus rule count
        let len = get_len(buf, 8)?;
        let tree = Self::new();
        for _ in 0..len {
            let path = PolicyPath::decode(buf)?;
            let node = ConfigPolicyNode::decode(buf)?;
            tree.add_at(path, node);
        }
        Ok(tree)
    }
}

// ============================================================================
// SECTION: Collections
// ============================================================================

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let len = get_len(buf, 1)?;
        let mut items = Self::with_capacity(bounded_capacity::<T>(len, buf));
        for _ in 0..len {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}
