// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UTCTime and GeneralizedTime.

use {
    crate::{error::Asn1Error, tag::Tag},
    chrono::{DateTime, Datelike, TimeZone, Timelike, Utc},
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TimeKind {
    Utc,
    Generalized,
}

impl TimeKind {
    pub(crate) fn tag(self) -> Tag {
        match self {
            Self::Utc => Tag::UTC_TIME,
            Self::Generalized => Tag::GENERALIZED_TIME,
        }
    }
}

/// A decoded time value.
///
/// The exact text that was decoded is preserved so re-encoding reproduces
/// the input (GeneralizedTime fractional seconds survive a round trip).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Time {
    kind: TimeKind,
    at: DateTime<Utc>,
    text: String,
}

impl Time {
    /// Builds a value from an instant, formatting the canonical text form
    /// (no fractional seconds, trailing `Z`).
    pub fn new(kind: TimeKind, at: DateTime<Utc>) -> Self {
        let text = match kind {
            TimeKind::Utc => format!(
                "{:02}{:02}{:02}{:02}{:02}{:02}Z",
                at.year() % 100,
                at.month(),
                at.day(),
                at.hour(),
                at.minute(),
                at.second()
            ),
            TimeKind::Generalized => format!(
                "{:04}{:02}{:02}{:02}{:02}{:02}Z",
                at.year(),
                at.month(),
                at.day(),
                at.hour(),
                at.minute(),
                at.second()
            ),
        };
        Self { kind, at, text }
    }

    pub fn utc_now() -> Self {
        Self::new(TimeKind::Utc, Utc::now())
    }

    pub fn kind(&self) -> TimeKind {
        self.kind
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.at
    }

    /// The printable form that encoding emits.
    pub fn encoded_text(&self) -> &str {
        &self.text
    }

    /// Parses the content octets of a UTCTime or GeneralizedTime value.
    pub(crate) fn parse(kind: TimeKind, octets: &[u8], offset: usize) -> Result<Self, Asn1Error> {
        let text = std::str::from_utf8(octets)
            .ok()
            .filter(|t| t.is_ascii())
            .ok_or_else(|| Asn1Error::invalid(offset, "time value is not ASCII"))?;
        let bad = || Asn1Error::invalid(offset, "malformed time value");

        let (date_len, year) = match kind {
            TimeKind::Utc => {
                if text.len() != "YYMMDDHHMMSSZ".len() {
                    return Err(bad());
                }
                let yy: i32 = text[0..2].parse().map_err(|_| bad())?;
                // Two-digit years pivot at 1950 per X.690.
                (2, if yy >= 50 { yy + 1900 } else { yy + 2000 })
            }
            TimeKind::Generalized => {
                if text.len() < "YYYYMMDDHHMMSSZ".len() {
                    return Err(bad());
                }
                (4, text[0..4].parse().map_err(|_| bad())?)
            }
        };

        let digits = &text[date_len..];
        let month: u32 = digits[0..2].parse().map_err(|_| bad())?;
        let day: u32 = digits[2..4].parse().map_err(|_| bad())?;
        let hour: u32 = digits[4..6].parse().map_err(|_| bad())?;
        let minute: u32 = digits[6..8].parse().map_err(|_| bad())?;
        let second: u32 = digits[8..10].parse().map_err(|_| bad())?;
        let rest = &digits[10..];

        // Optional fractional seconds, GeneralizedTime only.
        let nanos = match (kind, rest.as_bytes().first()) {
            (TimeKind::Generalized, Some(b'.')) => {
                if rest.len() < 3 || rest.as_bytes().last() != Some(&b'Z') {
                    return Err(bad());
                }
                let frac = &rest[1..rest.len() - 1];
                if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(bad());
                }
                let scale = 10u32.pow(9 - frac.len() as u32);
                let value: u32 = frac.parse().map_err(|_| bad())?;
                value * scale
            }
            _ => {
                if rest != "Z" {
                    return Err(bad());
                }
                0
            }
        };

        let at = Utc
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .and_then(|dt| dt.with_nanosecond(nanos))
            .ok_or_else(bad)?;

        Ok(Self {
            kind,
            at,
            text: text.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_time_round_trip() {
        let time = Time::parse(TimeKind::Utc, b"230101000000Z", 0).unwrap();
        assert_eq!(time.encoded_text(), "230101000000Z");
        assert_eq!(
            time.datetime(),
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn utc_time_century_pivot() {
        let nineties = Time::parse(TimeKind::Utc, b"960115120000Z", 0).unwrap();
        assert_eq!(nineties.datetime().year(), 1996);
        let recent = Time::parse(TimeKind::Utc, b"210115120000Z", 0).unwrap();
        assert_eq!(recent.datetime().year(), 2021);
    }

    #[test]
    fn generalized_time_fractions_survive() {
        let time = Time::parse(TimeKind::Generalized, b"20230704120000.125Z", 0).unwrap();
        assert_eq!(time.encoded_text(), "20230704120000.125Z");
        assert_eq!(time.datetime().nanosecond(), 125_000_000);
    }

    #[test]
    fn rejects_missing_zulu() {
        assert!(Time::parse(TimeKind::Utc, b"230101000000", 0).is_err());
        assert!(Time::parse(TimeKind::Generalized, b"20230101000000+0100", 0).is_err());
    }

    #[test]
    fn canonical_format() {
        let at = Utc.with_ymd_and_hms(2023, 7, 4, 9, 30, 1).unwrap();
        assert_eq!(Time::new(TimeKind::Utc, at).encoded_text(), "230704093001Z");
        assert_eq!(
            Time::new(TimeKind::Generalized, at).encoded_text(),
            "20230704093001Z"
        );
    }
}
