//! Typed, per-attribute key comparator (§4.3).
//!
//! `index::IndexKeyComparator` is a raw closure over two byte slices; the
//! index access methods never decode a key themselves, they just call it.
//! This module is the thing that actually *builds* such a closure for a
//! multi-attribute key: it walks a key's attributes in schema order,
//! decoding each according to its `KeyType`, deciding null ordering first,
//! and running a collation weight transform over string attributes before
//! comparing their bytes. It is distinct from `IndexKeyComparator` -- that
//! type is the generic seam the access methods call through, this one is
//! a concrete implementation of it for attribute-typed keys.
//!
//! Grounded on `DbtuxSearch.cpp`'s `cmpSearchKey`/`readKeyAttrs`: compare
//! attribute by attribute, null before non-null, and fall through to a
//! secondary comparison (there the tuple's `TupLoc`, here the index
//! entry's `ItemPointer`) only once every attribute has tied.

use std::{borrow::Cow, cmp::Ordering};

use crate::{
    catalog::{AttributeHeader, KeyType},
    storage::ItemPointer,
    Error, Result,
};

/// A collation is a weight transform applied to string bytes before
/// comparison. The real server ships locale-aware collation tables; that
/// is out of scope here, so only the identity transform is provided.
pub trait Collation: Send + Sync {
    fn transform<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Plain byte-order collation: `transform` is the identity function.
pub struct BinaryCollation;

impl Collation for BinaryCollation {
    fn transform<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(input)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AttrValue<'a> {
    Null,
    Int32(i32),
    Int64(i64),
    Float64(u64), // bit pattern, so it can implement Eq
    Bytes(&'a [u8]),
}

/// Which side of a range a bound sits on. Needed only to break a tie once
/// every attribute compares equal: a strict bound must not compare equal
/// to the key it was built from, an inclusive one may.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoundSide {
    Inclusive,
    Exclusive,
}

/// Decodes one attribute from `buf`, returning the decoded value and the
/// number of bytes consumed. Wire format: one null-flag byte (`0` = null,
/// `1` = present) followed by the payload -- fixed width for numeric
/// types, a 4-byte little-endian length prefix for `Bytes`/`Text`.
fn decode_attr<'a>(buf: &'a [u8], attr: &AttributeHeader) -> Result<(AttrValue<'a>, usize)> {
    if buf.is_empty() {
        return Err(Error::InvalidAttr(format!(
            "key truncated before null flag for attribute {}",
            attr.name
        )));
    }
    let is_null = buf[0] == 0;
    if is_null {
        if !attr.nullable {
            return Err(Error::InvalidAttr(format!(
                "attribute {} is not nullable but key marks it null",
                attr.name
            )));
        }
        return Ok((AttrValue::Null, 1));
    }

    let payload = &buf[1..];
    match attr.key_type {
        KeyType::Int32 => {
            if payload.len() < 4 {
                return Err(Error::InvalidAttr(format!(
                    "key truncated decoding int32 attribute {}",
                    attr.name
                )));
            }
            let v = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Ok((AttrValue::Int32(v), 1 + 4))
        }
        KeyType::Int64 => {
            if payload.len() < 8 {
                return Err(Error::InvalidAttr(format!(
                    "key truncated decoding int64 attribute {}",
                    attr.name
                )));
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&payload[..8]);
            Ok((AttrValue::Int64(i64::from_le_bytes(b)), 1 + 8))
        }
        KeyType::Float64 => {
            if payload.len() < 8 {
                return Err(Error::InvalidAttr(format!(
                    "key truncated decoding float64 attribute {}",
                    attr.name
                )));
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&payload[..8]);
            Ok((AttrValue::Float64(u64::from_le_bytes(b)), 1 + 8))
        }
        KeyType::Bytes | KeyType::Text => {
            if payload.len() < 4 {
                return Err(Error::InvalidAttr(format!(
                    "key truncated decoding length prefix for attribute {}",
                    attr.name
                )));
            }
            let len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            if payload.len() < 4 + len {
                return Err(Error::InvalidAttr(format!(
                    "key truncated decoding variable-length attribute {}",
                    attr.name
                )));
            }
            Ok((AttrValue::Bytes(&payload[4..4 + len]), 1 + 4 + len))
        }
    }
}

fn compare_values(a: AttrValue, b: AttrValue, collation: &dyn Collation, is_text: bool) -> Ordering {
    match (a, b) {
        (AttrValue::Null, AttrValue::Null) => Ordering::Equal,
        // nulls sort low, matching the teacher's fixed-size-attribute scans
        // where an absent value is always the smallest key.
        (AttrValue::Null, _) => Ordering::Less,
        (_, AttrValue::Null) => Ordering::Greater,
        (AttrValue::Int32(x), AttrValue::Int32(y)) => x.cmp(&y),
        (AttrValue::Int64(x), AttrValue::Int64(y)) => x.cmp(&y),
        (AttrValue::Float64(x), AttrValue::Float64(y)) => {
            f64::from_bits(x).partial_cmp(&f64::from_bits(y)).unwrap_or(Ordering::Equal)
        }
        (AttrValue::Bytes(x), AttrValue::Bytes(y)) => {
            if is_text {
                collation.transform(x).cmp(&collation.transform(y))
            } else {
                x.cmp(y)
            }
        }
        _ => unreachable!("decode_attr always returns the variant matching attr.key_type"),
    }
}

/// Orders keys made of one or more typed attributes, in schema order.
pub struct KeyComparator<'a> {
    attrs: &'a [AttributeHeader],
    collation: &'a dyn Collation,
}

impl<'a> KeyComparator<'a> {
    pub fn new(attrs: &'a [AttributeHeader], collation: &'a dyn Collation) -> Self {
        Self { attrs, collation }
    }

    /// Compares two fully-materialized keys attribute by attribute.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        let mut pa = a;
        let mut pb = b;
        for attr in self.attrs {
            let (va, na) = decode_attr(pa, attr)?;
            let (vb, nb) = decode_attr(pb, attr)?;
            let is_text = matches!(attr.key_type, KeyType::Text);
            match compare_values(va, vb, self.collation, is_text) {
                Ordering::Equal => {
                    pa = &pa[na..];
                    pb = &pb[nb..];
                }
                ord => return Ok(ord),
            }
        }
        Ok(Ordering::Equal)
    }

    /// Compares a stored key against a scan bound, applying `side` as the
    /// tie-break once every attribute has compared equal: an exclusive
    /// bound never equals the key it bounds.
    pub fn compare_bound(&self, stored: &[u8], bound: &[u8], side: BoundSide) -> Result<Ordering> {
        let ord = self.compare(stored, bound)?;
        Ok(match (ord, side) {
            (Ordering::Equal, BoundSide::Exclusive) => Ordering::Greater,
            (ord, _) => ord,
        })
    }

    /// As `compare`, but breaks a whole-key tie using the entries'
    /// `ItemPointer`s -- the deterministic ordering duplicate-key entries
    /// need so "get both key and value" can binary search a duplicate run.
    pub fn compare_get_both(
        &self,
        a_key: &[u8],
        a_loc: ItemPointer,
        b_key: &[u8],
        b_loc: ItemPointer,
    ) -> Result<Ordering> {
        match self.compare(a_key, b_key)? {
            Ordering::Equal => Ok(a_loc.cmp(&b_loc)),
            ord => Ok(ord),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_int32(v: i32) -> Vec<u8> {
        let mut out = vec![1u8];
        out.extend_from_slice(&v.to_le_bytes());
        out
    }

    fn encode_null() -> Vec<u8> {
        vec![0u8]
    }

    fn encode_text(s: &str) -> Vec<u8> {
        let mut out = vec![1u8];
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn orders_int32_numerically() {
        let attrs = vec![AttributeHeader::new("a", KeyType::Int32, false)];
        let coll = BinaryCollation;
        let cmp = KeyComparator::new(&attrs, &coll);
        assert_eq!(
            cmp.compare(&encode_int32(1), &encode_int32(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            cmp.compare(&encode_int32(5), &encode_int32(5)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn nulls_sort_before_values() {
        let attrs = vec![AttributeHeader::new("a", KeyType::Int32, true)];
        let coll = BinaryCollation;
        let cmp = KeyComparator::new(&attrs, &coll);
        assert_eq!(
            cmp.compare(&encode_null(), &encode_int32(0)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn multi_attribute_compares_lexicographically() {
        let attrs = vec![
            AttributeHeader::new("a", KeyType::Int32, false),
            AttributeHeader::new("b", KeyType::Text, false),
        ];
        let coll = BinaryCollation;
        let cmp = KeyComparator::new(&attrs, &coll);
        let mut k1 = encode_int32(1);
        k1.extend(encode_text("abc"));
        let mut k2 = encode_int32(1);
        k2.extend(encode_text("abd"));
        assert_eq!(cmp.compare(&k1, &k2).unwrap(), Ordering::Less);
    }

    #[test]
    fn exclusive_bound_never_ties() {
        let attrs = vec![AttributeHeader::new("a", KeyType::Int32, false)];
        let coll = BinaryCollation;
        let cmp = KeyComparator::new(&attrs, &coll);
        let k = encode_int32(5);
        assert_eq!(
            cmp.compare_bound(&k, &k, BoundSide::Inclusive).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            cmp.compare_bound(&k, &k, BoundSide::Exclusive).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn get_both_breaks_tie_on_item_pointer() {
        let attrs = vec![AttributeHeader::new("a", KeyType::Int32, false)];
        let coll = BinaryCollation;
        let cmp = KeyComparator::new(&attrs, &coll);
        let k = encode_int32(5);
        let lo = ItemPointer::new(1, 0);
        let hi = ItemPointer::new(1, 1);
        assert_eq!(
            cmp.compare_get_both(&k, lo, &k, hi).unwrap(),
            Ordering::Less
        );
    }
}
