// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Arbitrary-precision INTEGER content.

use std::fmt;

/// An ASN.1 INTEGER of arbitrary precision.
///
/// The value is stored as the minimal big-endian two's-complement octets,
/// which is exactly the DER content encoding. No arithmetic beyond
/// comparison is provided; values that fit are convertible to native
/// integers.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Int {
    octets: Vec<u8>,
}

impl Int {
    /// Creates a value from big-endian two's-complement octets.
    ///
    /// Redundant leading octets are stripped so the stored form is minimal.
    /// An empty slice yields zero.
    pub fn from_twos_complement(octets: &[u8]) -> Self {
        let mut start = 0;
        while start + 1 < octets.len() {
            let (first, second) = (octets[start], octets[start + 1]);
            if (first == 0x00 && second & 0x80 == 0) || (first == 0xff && second & 0x80 != 0) {
                start += 1;
            } else {
                break;
            }
        }
        let octets = if octets.is_empty() {
            vec![0]
        } else {
            octets[start..].to_vec()
        };
        Self { octets }
    }

    /// Creates a value from big-endian unsigned octets.
    pub fn from_unsigned(octets: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(octets.len() + 1);
        // Prepend a zero octet so a set high bit is not read as a sign.
        if octets.first().map_or(true, |b| b & 0x80 != 0) {
            buf.push(0);
        }
        buf.extend_from_slice(octets);
        Self::from_twos_complement(&buf)
    }

    /// The minimal two's-complement content octets.
    pub fn as_octets(&self) -> &[u8] {
        &self.octets
    }

    pub fn is_negative(&self) -> bool {
        self.octets[0] & 0x80 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.octets == [0]
    }

    pub fn to_i64(&self) -> Option<i64> {
        if self.octets.len() > 8 {
            return None;
        }
        let fill = if self.is_negative() { 0xff } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - self.octets.len()..].copy_from_slice(&self.octets);
        Some(i64::from_be_bytes(buf))
    }

    pub fn to_u64(&self) -> Option<u64> {
        if self.is_negative() {
            return None;
        }
        let mag = if self.octets[0] == 0 {
            &self.octets[1..]
        } else {
            &self.octets[..]
        };
        if mag.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[8 - mag.len()..].copy_from_slice(mag);
        Some(u64::from_be_bytes(buf))
    }
}

impl From<i64> for Int {
    fn from(v: i64) -> Self {
        Self::from_twos_complement(&v.to_be_bytes())
    }
}

impl From<u64> for Int {
    fn from(v: u64) -> Self {
        let mut buf = [0u8; 9];
        buf[1..].copy_from_slice(&v.to_be_bytes());
        Self::from_twos_complement(&buf)
    }
}

impl From<i32> for Int {
    fn from(v: i32) -> Self {
        Self::from(v as i64)
    }
}

impl From<u32> for Int {
    fn from(v: u32) -> Self {
        Self::from(v as u64)
    }
}

impl fmt::Debug for Int {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_i64() {
            Some(v) => write!(f, "Int({})", v),
            None => {
                write!(f, "Int(0x")?;
                for b in &self.octets {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Int {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_i64() {
            Some(v) => write!(f, "{}", v),
            None => {
                write!(f, "0x")?;
                for b in &self.octets {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_storage() {
        assert_eq!(Int::from(0i64).as_octets(), &[0x00]);
        assert_eq!(Int::from(42i64).as_octets(), &[0x2a]);
        assert_eq!(Int::from(127i64).as_octets(), &[0x7f]);
        assert_eq!(Int::from(128i64).as_octets(), &[0x00, 0x80]);
        assert_eq!(Int::from(256i64).as_octets(), &[0x01, 0x00]);
        assert_eq!(Int::from(-1i64).as_octets(), &[0xff]);
        assert_eq!(Int::from(-128i64).as_octets(), &[0x80]);
        assert_eq!(Int::from(-129i64).as_octets(), &[0xff, 0x7f]);
    }

    #[test]
    fn unsigned_high_bit() {
        assert_eq!(Int::from_unsigned(&[0x80]).as_octets(), &[0x00, 0x80]);
        assert_eq!(Int::from_unsigned(&[0x7f]).as_octets(), &[0x7f]);
        assert_eq!(Int::from(u64::MAX).to_u64(), Some(u64::MAX));
    }

    #[test]
    fn conversions() {
        assert_eq!(Int::from(-129i64).to_i64(), Some(-129));
        assert_eq!(Int::from(-1i64).to_u64(), None);
        let wide = Int::from_unsigned(&[0xde; 20]);
        assert_eq!(wide.to_i64(), None);
        assert!(!wide.is_negative());
    }
}
