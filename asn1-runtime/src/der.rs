// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The strict DER encoder.
//!
//! Encoding runs in two passes. The run-length pass walks the value tree
//! and records every emitted node's content length in a table; the emit
//! pass walks the tree again, consuming the table to write identifier and
//! length octets before each node's content. Values are never mutated;
//! re-encoding a decoded, unmodified value reproduces its input except
//! where the input used non-DER forms, in which case the output is the
//! canonical DER rendition.

use crate::{
    error::Asn1Error,
    real,
    value::{Asn1Value, Kind},
};

/// Encodes a value as DER.
pub fn encode(value: &Asn1Value) -> Result<Vec<u8>, Asn1Error> {
    let mut slots = Vec::new();
    let total = measure(value, &mut slots)?;
    let mut out = Vec::with_capacity(total);
    let mut cursor = 0;
    emit(value, &slots, &mut cursor, &mut out)?;
    Ok(out)
}

/// Encodes only the content octets of a value, omitting its outer
/// identifier and length.
///
/// This is the PKCS#7 v1.5 "content octets only" form used when feeding
/// encapsulated content to a digest or signature engine. For an EXPLICIT
/// tag wrapper the content is the complete encoding of the inner value.
pub fn encode_content_only(value: &Asn1Value) -> Result<Vec<u8>, Asn1Error> {
    let mut slots = Vec::new();
    measure(value, &mut slots)?;
    let mut out = Vec::new();
    let mut cursor = 0;
    content_entry(value, &slots, &mut cursor, &mut out)?;
    Ok(out)
}

fn content_entry(
    value: &Asn1Value,
    slots: &[usize],
    cursor: &mut usize,
    out: &mut Vec<u8>,
) -> Result<(), Asn1Error> {
    match &value.kind {
        Kind::Choice { selected, .. } => match selected.as_deref() {
            Some(inner) => content_entry(inner, slots, cursor, out),
            None => Err(Asn1Error::InvariantViolated("unselected CHOICE")),
        },
        Kind::OpenType { inner, .. } => match inner.as_deref() {
            Some(inner) => content_entry(inner, slots, cursor, out),
            None => Err(Asn1Error::InvariantViolated("unresolved open type")),
        },
        _ => {
            *cursor += 1;
            emit_content(value, slots, cursor, out)
        }
    }
}

/// Run-length pass. Returns the complete encoded length of `value` and
/// appends one content-length slot per emitted node, in emit order.
fn measure(value: &Asn1Value, slots: &mut Vec<usize>) -> Result<usize, Asn1Error> {
    match &value.kind {
        Kind::Choice { selected, .. } => {
            if value.implicit_tag.is_some() {
                return Err(Asn1Error::InvariantViolated(
                    "CHOICE cannot carry an IMPLICIT tag",
                ));
            }
            return match selected.as_deref() {
                Some(inner) => measure(inner, slots),
                None if value.optional => Ok(0),
                None => Err(Asn1Error::InvariantViolated("unselected CHOICE")),
            };
        }
        Kind::OpenType { inner, .. } => {
            return match inner.as_deref() {
                Some(inner) => measure(inner, slots),
                None if value.optional => Ok(0),
                None => Err(Asn1Error::InvariantViolated("unresolved open type")),
            };
        }
        Kind::Tagged { .. } if value.implicit_tag.is_some() => {
            return Err(Asn1Error::InvariantViolated(
                "tagged wrapper must stay EXPLICIT",
            ));
        }
        _ => {}
    }

    let (_, tag) = value
        .identifier()
        .ok_or(Asn1Error::InvariantViolated("value has no identifier"))?;
    let index = slots.len();
    slots.push(0);
    let content = content_len(value, slots)?;
    slots[index] = content;
    Ok(tag.encoded_len() + length_len(content) + content)
}

fn content_len(value: &Asn1Value, slots: &mut Vec<usize>) -> Result<usize, Asn1Error> {
    Ok(match &value.kind {
        Kind::Boolean(_) => 1,
        Kind::Integer(v) | Kind::Enumerated { value: v, .. } => v.as_octets().len(),
        Kind::BitString { bits, .. } => {
            if bits.iter().all(|&b| b == 0) {
                1
            } else {
                1 + bits.len()
            }
        }
        Kind::OctetString(v) => v.len(),
        Kind::Null => 0,
        Kind::Oid(oid) => oid.content_octets().len(),
        Kind::Real(v) => real::encoded_len(*v),
        Kind::String { kind, text } => kind.encoded_len(text)?,
        Kind::Time(time) => time.encoded_text().len(),
        Kind::Sequence(items) | Kind::Set(items) => {
            let mut sum = 0;
            for item in items {
                sum += measure(item, slots)?;
            }
            sum
        }
        Kind::SequenceOf { template, items } | Kind::SetOf { template, items } => {
            let mut sum = 0;
            for item in items {
                if std::mem::discriminant(&item.kind) != std::mem::discriminant(&template.kind) {
                    return Err(Asn1Error::NonAsn1Element(
                        "collection element kind differs from the element template",
                    ));
                }
                sum += measure(item, slots)?;
            }
            sum
        }
        Kind::Tagged { inner, .. } => measure(inner, slots)?,
        Kind::Opaque { content, .. } => content.len(),
        Kind::OpenType { .. } | Kind::Choice { .. } => {
            // Handled by measure before dispatching here.
            return Err(Asn1Error::InvariantViolated("transparent kind in content_len"));
        }
    })
}

fn emit(
    value: &Asn1Value,
    slots: &[usize],
    cursor: &mut usize,
    out: &mut Vec<u8>,
) -> Result<(), Asn1Error> {
    match &value.kind {
        Kind::Choice { selected, .. } => {
            return match selected.as_deref() {
                Some(inner) => emit(inner, slots, cursor, out),
                None if value.optional => Ok(()),
                None => Err(Asn1Error::InvariantViolated("unselected CHOICE")),
            };
        }
        Kind::OpenType { inner, .. } => {
            return match inner.as_deref() {
                Some(inner) => emit(inner, slots, cursor, out),
                None if value.optional => Ok(()),
                None => Err(Asn1Error::InvariantViolated("unresolved open type")),
            };
        }
        _ => {}
    }

    let (class, tag) = value
        .identifier()
        .ok_or(Asn1Error::InvariantViolated("value has no identifier"))?;
    let content = slots[*cursor];
    *cursor += 1;
    tag.write_identifier(class, value.is_constructed(), out);
    write_length(content, out);
    emit_content(value, slots, cursor, out)
}

fn emit_content(
    value: &Asn1Value,
    slots: &[usize],
    cursor: &mut usize,
    out: &mut Vec<u8>,
) -> Result<(), Asn1Error> {
    match &value.kind {
        Kind::Boolean(v) => out.push(if *v { 0xff } else { 0x00 }),
        Kind::Integer(v) | Kind::Enumerated { value: v, .. } => {
            out.extend_from_slice(v.as_octets())
        }
        Kind::BitString { bits, pad } => {
            if bits.iter().all(|&b| b == 0) {
                out.push(0);
            } else {
                out.push(*pad);
                out.extend_from_slice(bits);
            }
        }
        Kind::OctetString(v) => out.extend_from_slice(v),
        Kind::Null => {}
        Kind::Oid(oid) => out.extend_from_slice(&oid.content_octets()),
        Kind::Real(v) => real::encode(*v, out)?,
        Kind::String { kind, text } => kind.encode(text, out)?,
        Kind::Time(time) => out.extend_from_slice(time.encoded_text().as_bytes()),
        Kind::Sequence(items)
        | Kind::Set(items)
        | Kind::SequenceOf { items, .. }
        | Kind::SetOf { items, .. } => {
            for item in items {
                emit(item, slots, cursor, out)?;
            }
        }
        Kind::Tagged { inner, .. } => emit(inner, slots, cursor, out)?,
        Kind::Opaque { content, .. } => out.extend_from_slice(content),
        Kind::OpenType { .. } | Kind::Choice { .. } => {
            return Err(Asn1Error::InvariantViolated("transparent kind in emit_content"));
        }
    }
    Ok(())
}

pub(crate) fn length_len(content: usize) -> usize {
    if content <= 0x7f {
        1
    } else {
        let mut n = content;
        let mut octets = 0;
        while n > 0 {
            octets += 1;
            n >>= 8;
        }
        1 + octets
    }
}

pub(crate) fn write_length(content: usize, out: &mut Vec<u8>) {
    if content <= 0x7f {
        out.push(content as u8);
    } else {
        let octets = length_len(content) - 1;
        out.push(0x80 | octets as u8);
        for i in (0..octets).rev() {
            out.push((content >> (i * 8)) as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{oid::Oid, time::{Time, TimeKind}},
        bytes::Bytes,
    };

    #[test]
    fn integer_forty_two() {
        let der = encode(&Asn1Value::integer(42)).unwrap();
        assert_eq!(der, [0x02, 0x01, 0x2a]);
    }

    #[test]
    fn pkcs7_data_oid() {
        let oid: Oid = "1.2.840.113549.1.7.1".parse().unwrap();
        let der = encode(&Asn1Value::oid(oid)).unwrap();
        assert_eq!(
            der,
            [0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01]
        );
    }

    #[test]
    fn utc_time_scenario() {
        let time = Time::parse(TimeKind::Utc, b"230101000000Z", 0).unwrap();
        let der = encode(&Asn1Value::time(time)).unwrap();
        assert_eq!(
            der,
            [
                0x17, 0x0d, 0x32, 0x33, 0x30, 0x31, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x30,
                0x30, 0x5a
            ]
        );
    }

    #[test]
    fn all_zero_bit_string_collapses() {
        let value = Asn1Value::bit_string(Bytes::from_static(&[0x00, 0x00, 0x00]), 0).unwrap();
        assert_eq!(encode(&value).unwrap(), [0x03, 0x01, 0x00]);

        let value = Asn1Value::bit_string(Bytes::from_static(&[0x6e, 0x5d, 0xc0]), 6).unwrap();
        assert_eq!(encode(&value).unwrap(), [0x03, 0x04, 0x06, 0x6e, 0x5d, 0xc0]);
    }

    #[test]
    fn nested_sequence_lengths() {
        let value = Asn1Value::sequence(vec![
            Asn1Value::integer(1),
            Asn1Value::sequence(vec![Asn1Value::boolean(true)]),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            [0x30, 0x08, 0x02, 0x01, 0x01, 0x30, 0x03, 0x01, 0x01, 0xff]
        );
    }

    #[test]
    fn long_form_length() {
        let value = Asn1Value::octet_string(Bytes::from(vec![0xaa; 200]));
        let der = encode(&value).unwrap();
        assert_eq!(&der[..3], &[0x04, 0x81, 200]);
        assert_eq!(der.len(), 203);

        let value = Asn1Value::octet_string(Bytes::from(vec![0xaa; 0x1234]));
        let der = encode(&value).unwrap();
        assert_eq!(&der[..4], &[0x04, 0x82, 0x12, 0x34]);
    }

    #[test]
    fn explicit_and_implicit_tagging() {
        let explicit = Asn1Value::tagged(0, Asn1Value::integer(5));
        assert_eq!(encode(&explicit).unwrap(), [0xa0, 0x03, 0x02, 0x01, 0x05]);

        let implicit = Asn1Value::octet_string(Bytes::from_static(b"hi")).implicit(1);
        assert_eq!(encode(&implicit).unwrap(), [0x81, 0x02, b'h', b'i']);

        let implicit_set = Asn1Value::set(vec![Asn1Value::integer(5)]).implicit(0);
        assert_eq!(encode(&implicit_set).unwrap(), [0xa0, 0x03, 0x02, 0x01, 0x05]);
    }

    #[test]
    fn content_only_strips_header() {
        let value = Asn1Value::octet_string(Bytes::from_static(b"abc"));
        assert_eq!(encode_content_only(&value).unwrap(), b"abc");

        let seq = Asn1Value::sequence(vec![Asn1Value::integer(1), Asn1Value::integer(2)]);
        assert_eq!(
            encode_content_only(&seq).unwrap(),
            [0x02, 0x01, 0x01, 0x02, 0x01, 0x02]
        );

        // For an EXPLICIT wrapper the content is the inner TLV.
        let tagged = Asn1Value::tagged(0, Asn1Value::integer(7));
        assert_eq!(encode_content_only(&tagged).unwrap(), [0x02, 0x01, 0x07]);
    }

    #[test]
    fn collection_template_mismatch() {
        let value = Asn1Value::sequence_of_with(
            Asn1Value::integer(0),
            vec![Asn1Value::integer(1), Asn1Value::boolean(true)],
        );
        assert!(matches!(
            encode(&value),
            Err(Asn1Error::NonAsn1Element(_))
        ));
    }

    #[test]
    fn oid_requires_two_arcs() {
        assert!(Oid::new(vec![1]).is_err());
    }
}
