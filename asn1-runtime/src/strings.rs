// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Character string kinds and their per-kind byte codecs.

use crate::{error::Asn1Error, tag::Tag};

/// The supported ASN.1 character string types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StringKind {
    Utf8,
    Numeric,
    Printable,
    /// T.61/Teletex. No character-set validation is performed; octets map
    /// to the first 256 code points in both directions.
    Teletex,
    Videotex,
    Ia5,
    Graphic,
    Visible,
    General,
    /// UCS-4, four bytes per character, big endian.
    Universal,
    /// UCS-2, two bytes per character, big endian.
    Bmp,
}

impl StringKind {
    pub(crate) fn tag(self) -> Tag {
        match self {
            Self::Utf8 => Tag::UTF8_STRING,
            Self::Numeric => Tag::NUMERIC_STRING,
            Self::Printable => Tag::PRINTABLE_STRING,
            Self::Teletex => Tag::TELETEX_STRING,
            Self::Videotex => Tag::VIDEOTEX_STRING,
            Self::Ia5 => Tag::IA5_STRING,
            Self::Graphic => Tag::GRAPHIC_STRING,
            Self::Visible => Tag::VISIBLE_STRING,
            Self::General => Tag::GENERAL_STRING,
            Self::Universal => Tag::UNIVERSAL_STRING,
            Self::Bmp => Tag::BMP_STRING,
        }
    }

    pub(crate) fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            Tag::UTF8_STRING => Some(Self::Utf8),
            Tag::NUMERIC_STRING => Some(Self::Numeric),
            Tag::PRINTABLE_STRING => Some(Self::Printable),
            Tag::TELETEX_STRING => Some(Self::Teletex),
            Tag::VIDEOTEX_STRING => Some(Self::Videotex),
            Tag::IA5_STRING => Some(Self::Ia5),
            Tag::GRAPHIC_STRING => Some(Self::Graphic),
            Tag::VISIBLE_STRING => Some(Self::Visible),
            Tag::GENERAL_STRING => Some(Self::General),
            Tag::UNIVERSAL_STRING => Some(Self::Universal),
            Tag::BMP_STRING => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Bytes of content this kind produces for `text`.
    pub(crate) fn encoded_len(self, text: &str) -> Result<usize, Asn1Error> {
        Ok(match self {
            Self::Utf8 => text.len(),
            Self::Bmp => text.chars().count() * 2,
            Self::Universal => text.chars().count() * 4,
            _ => {
                // One octet per character for the restricted kinds.
                text.chars().count()
            }
        })
    }

    pub(crate) fn encode(self, text: &str, out: &mut Vec<u8>) -> Result<(), Asn1Error> {
        match self {
            Self::Utf8 => out.extend_from_slice(text.as_bytes()),
            Self::Bmp => {
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xffff {
                        return Err(Asn1Error::InvalidInput(
                            "character outside the basic multilingual plane",
                        ));
                    }
                    out.extend_from_slice(&(code as u16).to_be_bytes());
                }
            }
            Self::Universal => {
                for ch in text.chars() {
                    out.extend_from_slice(&(ch as u32).to_be_bytes());
                }
            }
            _ => {
                for ch in text.chars() {
                    let code = ch as u32;
                    if code > 0xff {
                        return Err(Asn1Error::InvalidInput(
                            "character not representable in one octet",
                        ));
                    }
                    out.push(code as u8);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decode(self, octets: &[u8], offset: usize) -> Result<String, Asn1Error> {
        match self {
            Self::Utf8 => std::str::from_utf8(octets)
                .map(str::to_owned)
                .map_err(|_| Asn1Error::invalid(offset, "invalid UTF-8 in UTF8String")),
            Self::Bmp => {
                if octets.len() % 2 != 0 {
                    return Err(Asn1Error::invalid(offset, "BMPString length is odd"));
                }
                octets
                    .chunks_exact(2)
                    .map(|pair| {
                        let code = u16::from_be_bytes([pair[0], pair[1]]);
                        char::from_u32(code as u32)
                            .ok_or_else(|| Asn1Error::invalid(offset, "surrogate in BMPString"))
                    })
                    .collect()
            }
            Self::Universal => {
                if octets.len() % 4 != 0 {
                    return Err(Asn1Error::invalid(
                        offset,
                        "UniversalString length is not a multiple of four",
                    ));
                }
                octets
                    .chunks_exact(4)
                    .map(|quad| {
                        let code = u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]);
                        char::from_u32(code).ok_or_else(|| {
                            Asn1Error::invalid(offset, "invalid code point in UniversalString")
                        })
                    })
                    .collect()
            }
            _ => Ok(octets.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_is_one_octet_per_char() {
        let mut out = Vec::new();
        StringKind::Printable.encode("Test 1", &mut out).unwrap();
        assert_eq!(out, b"Test 1");
        assert_eq!(StringKind::Printable.decode(&out, 0).unwrap(), "Test 1");
        assert!(StringKind::Ia5.encode("\u{0101}", &mut out).is_err());
    }

    #[test]
    fn bmp_is_two_octets_big_endian() {
        let mut out = Vec::new();
        StringKind::Bmp.encode("A\u{0416}", &mut out).unwrap();
        assert_eq!(out, [0x00, 0x41, 0x04, 0x16]);
        assert_eq!(StringKind::Bmp.decode(&out, 0).unwrap(), "A\u{0416}");
    }

    #[test]
    fn universal_is_four_octets_big_endian() {
        let mut out = Vec::new();
        StringKind::Universal.encode("\u{1F600}", &mut out).unwrap();
        assert_eq!(out, [0x00, 0x01, 0xf6, 0x00]);
        assert_eq!(StringKind::Universal.decode(&out, 0).unwrap(), "\u{1F600}");
    }

    #[test]
    fn teletex_round_trips_any_octet() {
        let raw = [0x00, 0x7f, 0x80, 0xff];
        let text = StringKind::Teletex.decode(&raw, 0).unwrap();
        let mut out = Vec::new();
        StringKind::Teletex.encode(&text, &mut out).unwrap();
        assert_eq!(out, raw);
    }
}
