// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! REAL content encoding.
//!
//! Finite non-zero values use the binary form with base 2 and a normalized
//! (odd) mantissa. The special values use the single-octet encodings from
//! X.690: `0x40` +infinity, `0x41` -infinity, `0x42` NaN, `0x43` minus
//! zero. Positive zero is a zero-length content.

use crate::error::Asn1Error;

pub(crate) fn encode(value: f64, out: &mut Vec<u8>) -> Result<(), Asn1Error> {
    if value.is_nan() {
        out.push(0x42);
        return Ok(());
    }
    if value.is_infinite() {
        out.push(if value > 0.0 { 0x40 } else { 0x41 });
        return Ok(());
    }
    if value == 0.0 {
        if value.is_sign_negative() {
            out.push(0x43);
        }
        return Ok(());
    }
    if !value.is_finite() {
        return Err(Asn1Error::InvalidInput("non-finite real in base-2 path"));
    }

    let bits = value.to_bits();
    let sign = bits >> 63 != 0;
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & 0x000f_ffff_ffff_ffff;

    let (mut mantissa, mut exponent) = if biased == 0 {
        // Subnormal.
        (fraction, -1074)
    } else {
        (fraction | 1 << 52, biased - 1075)
    };
    while mantissa & 1 == 0 {
        mantissa >>= 1;
        exponent += 1;
    }

    let exp_octets = if (-128..=127).contains(&exponent) {
        1
    } else {
        2
    };
    // Binary flag, sign, base 2, scale 0, exponent length.
    out.push(0x80 | if sign { 0x40 } else { 0x00 } | (exp_octets - 1) as u8);
    if exp_octets == 1 {
        out.push(exponent as i8 as u8);
    } else {
        out.extend_from_slice(&(exponent as i16).to_be_bytes());
    }

    let mantissa_octets = (64 - mantissa.leading_zeros() as usize + 7) / 8;
    out.extend_from_slice(&mantissa.to_be_bytes()[8 - mantissa_octets..]);
    Ok(())
}

pub(crate) fn encoded_len(value: f64) -> usize {
    let mut out = Vec::with_capacity(11);
    // Encoding only fails for values the first match arms already absorb.
    let _ = encode(value, &mut out);
    out.len()
}

pub(crate) fn decode(octets: &[u8], offset: usize) -> Result<f64, Asn1Error> {
    let first = match octets.first() {
        None => return Ok(0.0),
        Some(first) => *first,
    };

    if first & 0x80 == 0 {
        return match first {
            0x40 => Ok(f64::INFINITY),
            0x41 => Ok(f64::NEG_INFINITY),
            0x42 => Ok(f64::NAN),
            0x43 if octets.len() == 1 => Ok(-0.0),
            _ => Err(Asn1Error::invalid(
                offset,
                "unsupported REAL form (only binary and special encodings)",
            )),
        };
    }

    // Binary form.
    let sign = if first & 0x40 != 0 { -1.0 } else { 1.0 };
    let base = match (first >> 4) & 0x03 {
        0 => 2u32,
        1 => 8,
        2 => 16,
        _ => return Err(Asn1Error::invalid(offset, "reserved REAL base")),
    };
    let scale = ((first >> 2) & 0x03) as i32;
    let (exp_len, mut idx) = match first & 0x03 {
        3 => {
            let len = *octets
                .get(1)
                .ok_or_else(|| Asn1Error::invalid(offset, "truncated REAL exponent"))?
                as usize;
            (len, 2)
        }
        n => (n as usize + 1, 1),
    };
    if exp_len == 0 || exp_len > 8 || octets.len() < idx + exp_len {
        return Err(Asn1Error::invalid(offset, "malformed REAL exponent"));
    }

    let mut exponent: i64 = if octets[idx] & 0x80 != 0 { -1 } else { 0 };
    for &b in &octets[idx..idx + exp_len] {
        exponent = exponent << 8 | b as i64 & 0xff;
        if exponent.abs() > 1 << 20 {
            return Err(Asn1Error::invalid(offset, "REAL exponent out of range"));
        }
    }
    idx += exp_len;

    let mantissa_octets = &octets[idx..];
    if mantissa_octets.is_empty() || mantissa_octets.len() > 8 {
        return Err(Asn1Error::invalid(offset, "malformed REAL mantissa"));
    }
    let mut mantissa: u64 = 0;
    for &b in mantissa_octets {
        mantissa = mantissa << 8 | b as u64;
    }

    let base_exp = match base {
        2 => exponent,
        8 => exponent * 3,
        _ => exponent * 4,
    } + scale as i64;

    Ok(sign * ldexp(mantissa as f64, base_exp))
}

/// Exact scaling by a power of two.
///
/// Chunked so every intermediate stays representable; multiplying or
/// dividing by an exact power of two never rounds unless the result
/// over- or underflows.
fn ldexp(mut value: f64, mut exp: i64) -> f64 {
    while exp > 0 {
        let step = exp.min(900);
        value *= 2f64.powi(step as i32);
        exp -= step;
        if value.is_infinite() {
            break;
        }
    }
    while exp < 0 {
        let step = (-exp).min(900);
        value /= 2f64.powi(step as i32);
        exp += step;
        if value == 0.0 {
            break;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: f64) {
        let mut out = Vec::new();
        encode(value, &mut out).unwrap();
        let back = decode(&out, 0).unwrap();
        assert_eq!(value.to_bits(), back.to_bits(), "value {}", value);
    }

    #[test]
    fn special_encodings() {
        let mut out = Vec::new();
        encode(f64::INFINITY, &mut out).unwrap();
        assert_eq!(out, [0x40]);
        out.clear();
        encode(f64::NEG_INFINITY, &mut out).unwrap();
        assert_eq!(out, [0x41]);
        out.clear();
        encode(-0.0, &mut out).unwrap();
        assert_eq!(out, [0x43]);
        out.clear();
        encode(0.0, &mut out).unwrap();
        assert!(out.is_empty());

        let mut nan = Vec::new();
        encode(f64::NAN, &mut nan).unwrap();
        assert_eq!(nan, [0x42]);
        assert!(decode(&nan, 0).unwrap().is_nan());
    }

    #[test]
    fn binary_round_trips() {
        for value in [
            1.0,
            -1.0,
            0.5,
            3.25,
            -123.456,
            1.0e-300,
            8.125e9,
            f64::MIN_POSITIVE,
            5e-324,
            f64::MAX,
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn normalized_mantissa_is_odd() {
        let mut out = Vec::new();
        encode(8.0, &mut out).unwrap();
        // 8.0 = 1 * 2^3: header, exponent 3, mantissa 1.
        assert_eq!(out, [0x80, 0x03, 0x01]);
    }

    #[test]
    fn rejects_decimal_form() {
        // Leading octet with bits 8-7 = 00 and a number-representation
        // nibble is the ISO 6093 character form.
        assert!(decode(&[0x03, b'1'], 0).is_err());
    }
}
