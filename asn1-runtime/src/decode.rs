// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The BER/DER decoder.
//!
//! The decoder is dual-mode. Template decoding matches input against a
//! caller-supplied skeleton value, which is the only way to resolve
//! IMPLICIT tags; free-form [`Decoder::read_any`] reads whatever is there.
//! BER mode accepts indefinite lengths and constructed string encodings
//! and reassembles them; DER mode is strict. A settable input budget
//! bounds every header-declared length before anything is buffered.

use {
    crate::{
        der,
        error::Asn1Error,
        int::Int,
        oid::Oid,
        real,
        strings::StringKind,
        tag::{Class, Tag},
        time::{Time, TimeKind},
        value::{Asn1Value, Kind},
    },
    bytes::Bytes,
};

/// The encoding rules applied while decoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Permissive: indefinite lengths, constructed strings, non-minimal
    /// length and integer forms.
    Ber,
    /// Strict: definite minimal lengths and primitive strings only.
    Der,
}

#[derive(Clone, Copy, Debug)]
struct Header {
    class: Class,
    constructed: bool,
    tag: Tag,
    length: Length,
}

#[derive(Clone, Copy, Debug)]
enum Length {
    Definite(usize),
    Indefinite,
}

/// Content boundary of the value currently being decoded.
#[derive(Clone, Copy)]
enum Scope {
    Definite(usize),
    Indefinite,
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// End of the enclosing definite-length window.
    end: usize,
    /// Hard cap on how deep into the input any declared length may reach.
    budget: usize,
    mode: Mode,
    /// Most recently decoded OBJECT IDENTIFIER; consulted by open types.
    last_oid: Option<Oid>,
}

/// Decodes one DER value matching `template`, requiring full consumption.
pub fn decode_der(data: &[u8], template: &Asn1Value) -> Result<Asn1Value, Asn1Error> {
    Decoder::new(data, Mode::Der).decode(template)
}

/// Decodes one BER value matching `template`, requiring full consumption.
pub fn decode_ber(data: &[u8], template: &Asn1Value) -> Result<Asn1Value, Asn1Error> {
    Decoder::new(data, Mode::Ber).decode(template)
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], mode: Mode) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
            budget: data.len(),
            mode,
            last_oid: None,
        }
    }

    /// Caps the number of input bytes any declared length may address.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget.min(self.data.len());
        self
    }

    /// Decodes a single value shaped by `template`. Trailing input is an
    /// error.
    pub fn decode(&mut self, template: &Asn1Value) -> Result<Asn1Value, Asn1Error> {
        let value = self.decode_template(template)?;
        if self.pos != self.end {
            return Err(Asn1Error::invalid(self.pos, "trailing data after value"));
        }
        Ok(value)
    }

    /// Reads whatever value comes next without a template.
    pub fn read_any(&mut self) -> Result<Asn1Value, Asn1Error> {
        let header = self.read_header()?;
        self.read_any_body(header)
    }

    //--- Header parsing

    fn read_header(&mut self) -> Result<Header, Asn1Error> {
        let start = self.pos;
        let first = self.take_u8()?;
        let class = Class::from_bits(first);
        let constructed = first & 0x20 != 0;

        let tag = if first & 0x1f != 0x1f {
            Tag((first & 0x1f) as u32)
        } else {
            let mut number: u32 = 0;
            let mut count = 0;
            loop {
                let octet = self.take_u8()?;
                if count == 0 && octet == 0x80 {
                    return Err(Asn1Error::invalid(start, "redundant leading tag octet"));
                }
                if number >> 25 != 0 {
                    return Err(Asn1Error::invalid(start, "tag number exceeds 32 bits"));
                }
                number = number << 7 | (octet & 0x7f) as u32;
                count += 1;
                if octet & 0x80 == 0 {
                    break;
                }
                if count > 5 {
                    return Err(Asn1Error::invalid(start, "overlong tag"));
                }
            }
            Tag(number)
        };

        let length = self.read_length(start)?;

        if let Length::Indefinite = length {
            if !constructed {
                // PRIMITIVE and INDEFINITE cannot coexist.
                return Err(Asn1Error::invalid(
                    start,
                    "indefinite length on a primitive value",
                ));
            }
            if self.mode == Mode::Der {
                return Err(Asn1Error::invalid(start, "indefinite length in DER"));
            }
        }

        Ok(Header {
            class,
            constructed,
            tag,
            length,
        })
    }

    fn read_length(&mut self, start: usize) -> Result<Length, Asn1Error> {
        let first = self.take_u8()?;
        if first & 0x80 == 0 {
            let len = first as usize;
            self.check_budget(start, len)?;
            return Ok(Length::Definite(len));
        }
        let octets = (first & 0x7f) as usize;
        if octets == 0 {
            return Ok(Length::Indefinite);
        }
        if octets > 8 {
            return Err(Asn1Error::invalid(start, "length field exceeds eight octets"));
        }
        let mut len: usize = 0;
        for _ in 0..octets {
            let octet = self.take_u8()?;
            if len >> (usize::BITS - 8) != 0 {
                return Err(Asn1Error::invalid(start, "length overflows"));
            }
            len = len << 8 | octet as usize;
        }
        if self.mode == Mode::Der {
            // Long form must be minimal.
            let minimal = der::length_len(len);
            if 1 + octets != minimal {
                return Err(Asn1Error::invalid(start, "non-minimal length form in DER"));
            }
        }
        self.check_budget(start, len)?;
        Ok(Length::Definite(len))
    }

    fn check_budget(&self, start: usize, len: usize) -> Result<(), Asn1Error> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Asn1Error::invalid(start, "length overflows"))?;
        if end > self.data.len() || end > self.end {
            return Err(Asn1Error::invalid(
                start,
                "declared length exceeds available input",
            ));
        }
        if end > self.budget {
            return Err(Asn1Error::InputBudgetExceeded {
                needed: len,
                budget: self.budget - self.pos,
            });
        }
        Ok(())
    }

    fn peek_header(&self) -> Result<Header, Asn1Error> {
        let mut probe = Decoder {
            data: self.data,
            pos: self.pos,
            end: self.end,
            budget: self.budget,
            mode: self.mode,
            last_oid: None,
        };
        probe.read_header()
    }

    fn take_u8(&mut self) -> Result<u8, Asn1Error> {
        if self.pos >= self.end {
            return Err(Asn1Error::invalid(self.pos, "unexpected end of input"));
        }
        let octet = self.data[self.pos];
        self.pos += 1;
        Ok(octet)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Asn1Error> {
        if self.pos + len > self.end {
            return Err(Asn1Error::invalid(self.pos, "unexpected end of input"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    //--- Scope handling (definite windows and indefinite EOC scanning)

    fn open_scope(&mut self, header: &Header) -> Result<(Scope, usize), Asn1Error> {
        match header.length {
            Length::Definite(len) => {
                let saved = self.end;
                self.end = self.pos + len;
                Ok((Scope::Definite(self.pos + len), saved))
            }
            Length::Indefinite => Ok((Scope::Indefinite, self.end)),
        }
    }

    fn scope_exhausted(&self, scope: Scope) -> bool {
        match scope {
            Scope::Definite(end) => self.pos >= end,
            Scope::Indefinite => self.at_eoc(),
        }
    }

    fn close_scope(&mut self, scope: Scope, saved_end: usize) -> Result<(), Asn1Error> {
        match scope {
            Scope::Definite(end) => {
                if self.pos != end {
                    return Err(Asn1Error::invalid(self.pos, "content shorter than declared"));
                }
            }
            Scope::Indefinite => {
                if !self.at_eoc() {
                    return Err(Asn1Error::invalid(
                        self.pos,
                        "missing end-of-contents marker",
                    ));
                }
                self.pos += 2;
            }
        }
        self.end = saved_end;
        Ok(())
    }

    fn at_eoc(&self) -> bool {
        self.pos + 2 <= self.end
            && self.data[self.pos] == 0x00
            && self.data[self.pos + 1] == 0x00
    }

    /// Rejects a stray end-of-contents marker inside a definite-length
    /// collection.
    fn reject_stray_eoc(&self, scope: Scope) -> Result<(), Asn1Error> {
        if let Scope::Definite(_) = scope {
            if self.at_eoc() {
                return Err(Asn1Error::invalid(
                    self.pos,
                    "end-of-contents marker inside a definite-length value",
                ));
            }
        }
        Ok(())
    }

    //--- Template decoding

    fn decode_template(&mut self, template: &Asn1Value) -> Result<Asn1Value, Asn1Error> {
        match &template.kind {
            Kind::Choice { .. } => self.decode_choice(template),
            Kind::OpenType { .. } => self.decode_open_type(template),
            _ => {
                let offset = self.pos;
                let header = self.read_header()?;
                if !identifier_matches(template, &header) {
                    return Err(Asn1Error::invalid(
                        offset,
                        format!(
                            "expected {:?}, found {:?} {:?}",
                            template.identifier(),
                            header.class,
                            header.tag
                        ),
                    ));
                }
                self.decode_body(template, header, offset)
            }
        }
    }

    fn decode_body(
        &mut self,
        template: &Asn1Value,
        header: Header,
        offset: usize,
    ) -> Result<Asn1Value, Asn1Error> {
        let kind = match &template.kind {
            Kind::Boolean(_) => {
                let content = self.primitive_content(&header, offset)?;
                if content.len() != 1 {
                    return Err(Asn1Error::invalid(offset, "BOOLEAN content must be one octet"));
                }
                if self.mode == Mode::Der && content[0] != 0x00 && content[0] != 0xff {
                    return Err(Asn1Error::invalid(offset, "non-canonical BOOLEAN in DER"));
                }
                Kind::Boolean(content[0] != 0)
            }
            Kind::Integer(_) => Kind::Integer(self.integer_content(&header, offset)?),
            Kind::Enumerated { allowed, .. } => {
                let value = self.integer_content(&header, offset)?;
                if !allowed.is_empty() && !allowed.contains(&value) {
                    return Err(Asn1Error::ConstraintViolated(format!(
                        "enumerated value {} is not in the allowed set",
                        value
                    )));
                }
                Kind::Enumerated {
                    value,
                    allowed: allowed.clone(),
                }
            }
            Kind::BitString { .. } => {
                let (bits, pad) = self.bit_string_content(&header, offset)?;
                Kind::BitString {
                    bits: Bytes::from(bits),
                    pad,
                }
            }
            Kind::OctetString(_) => {
                let octets = self.string_content(&header, Tag::OCTET_STRING, offset)?;
                Kind::OctetString(Bytes::from(octets))
            }
            Kind::Null => {
                let content = self.primitive_content(&header, offset)?;
                if !content.is_empty() {
                    return Err(Asn1Error::invalid(offset, "NULL content must be empty"));
                }
                Kind::Null
            }
            Kind::Oid(_) => {
                let content = self.primitive_content(&header, offset)?;
                let oid = Oid::from_content_octets(content)?;
                self.last_oid = Some(oid.clone());
                Kind::Oid(oid)
            }
            Kind::Real(_) => {
                let content = self.primitive_content(&header, offset)?;
                Kind::Real(real::decode(content, offset)?)
            }
            Kind::String { kind, .. } => {
                let octets = self.string_content(&header, kind.tag(), offset)?;
                Kind::String {
                    kind: *kind,
                    text: kind.decode(&octets, offset)?,
                }
            }
            Kind::Time(time) => {
                let time_kind = time.kind();
                let octets = self.string_content(&header, time_kind.tag(), offset)?;
                Kind::Time(Time::parse(time_kind, &octets, offset)?)
            }
            Kind::Sequence(fields) | Kind::Set(fields) => {
                self.require_constructed(&header, offset)?;
                let (scope, saved) = self.open_scope(&header)?;
                let items = self.decode_fields(fields, scope)?;
                self.close_scope(scope, saved)?;
                match template.kind {
                    Kind::Set(_) => Kind::Set(items),
                    _ => Kind::Sequence(items),
                }
            }
            Kind::SequenceOf { template: element, .. } | Kind::SetOf { template: element, .. } => {
                self.require_constructed(&header, offset)?;
                let (scope, saved) = self.open_scope(&header)?;
                let mut items = Vec::new();
                while !self.scope_exhausted(scope) {
                    self.reject_stray_eoc(scope)?;
                    let item = self.decode_template(element)?;
                    if let Kind::Oid(oid) = &item.kind {
                        self.last_oid = Some(oid.clone());
                    }
                    items.push(item);
                }
                self.close_scope(scope, saved)?;
                match template.kind {
                    Kind::SetOf { .. } => Kind::SetOf {
                        template: element.clone(),
                        items,
                    },
                    _ => Kind::SequenceOf {
                        template: element.clone(),
                        items,
                    },
                }
            }
            Kind::Tagged { tag, inner } => {
                self.require_constructed(&header, offset)?;
                let (scope, saved) = self.open_scope(&header)?;
                let decoded = self.decode_template(inner)?;
                self.close_scope(scope, saved)?;
                Kind::Tagged {
                    tag: *tag,
                    inner: Box::new(decoded),
                }
            }
            Kind::Opaque { .. } => {
                if header.class != Class::Universal {
                    return Err(Asn1Error::invalid(
                        offset,
                        "opaque values only decode UNIVERSAL contents",
                    ));
                }
                let content = self.capture_content(&header)?;
                Kind::Opaque {
                    tag: header.tag,
                    constructed: header.constructed,
                    content: Bytes::from(content),
                }
            }
            Kind::OpenType { .. } | Kind::Choice { .. } => {
                return Err(Asn1Error::InvariantViolated(
                    "transparent template reached decode_body",
                ));
            }
        };

        let value = Asn1Value {
            class: template.class,
            implicit_tag: template.implicit_tag,
            explicit: template.explicit,
            optional: template.optional,
            constraints: template.constraints.clone(),
            kind,
        };
        value.check_constraints()?;
        Ok(value)
    }

    /// Positional SEQUENCE/SET field matching. OPTIONAL template slots are
    /// skipped when the next element's identifier does not match; any
    /// deficit or surplus afterwards is fatal.
    fn decode_fields(
        &mut self,
        fields: &[Asn1Value],
        scope: Scope,
    ) -> Result<Vec<Asn1Value>, Asn1Error> {
        let mut items = Vec::new();
        for field in fields {
            if self.scope_exhausted(scope) {
                if field.optional {
                    continue;
                }
                return Err(Asn1Error::invalid(
                    self.pos,
                    "content ended before all required fields were read",
                ));
            }
            self.reject_stray_eoc(scope)?;
            let header = self.peek_header()?;
            if !identifier_matches(field, &header) {
                if field.optional {
                    continue;
                }
                return Err(Asn1Error::invalid(
                    self.pos,
                    format!("unexpected element {:?} {:?}", header.class, header.tag),
                ));
            }
            let item = self.decode_template(field)?;
            if let Kind::Oid(oid) = &item.kind {
                self.last_oid = Some(oid.clone());
            }
            items.push(item);
        }
        if !self.scope_exhausted(scope) {
            return Err(Asn1Error::invalid(
                self.pos,
                "content longer than the template",
            ));
        }
        Ok(items)
    }

    fn decode_choice(&mut self, template: &Asn1Value) -> Result<Asn1Value, Asn1Error> {
        let alternatives = match &template.kind {
            Kind::Choice { alternatives, .. } => alternatives,
            _ => return Err(Asn1Error::InvariantViolated("not a CHOICE template")),
        };
        if template.implicit_tag.is_some() {
            return Err(Asn1Error::InvariantViolated(
                "CHOICE cannot carry an IMPLICIT tag",
            ));
        }
        let offset = self.pos;
        let header = self.peek_header()?;
        for alternative in alternatives {
            if identifier_matches(alternative, &header) {
                let selected = self.decode_template(alternative)?;
                let value = Asn1Value {
                    class: template.class,
                    implicit_tag: None,
                    explicit: true,
                    optional: template.optional,
                    constraints: template.constraints.clone(),
                    kind: Kind::Choice {
                        alternatives: alternatives.clone(),
                        selected: Some(Box::new(selected)),
                    },
                };
                value.check_constraints()?;
                return Ok(value);
            }
        }
        Err(Asn1Error::invalid(
            offset,
            format!(
                "no CHOICE alternative matches {:?} {:?}",
                header.class, header.tag
            ),
        ))
    }

    fn decode_open_type(&mut self, template: &Asn1Value) -> Result<Asn1Value, Asn1Error> {
        let resolver = match &template.kind {
            Kind::OpenType { resolver, .. } => resolver.clone(),
            _ => return Err(Asn1Error::InvariantViolated("not an open type template")),
        };
        let inner = match resolver.0.resolve(self.last_oid.as_ref()) {
            Some(resolved) => self.decode_template(&resolved)?,
            None => self.read_any()?,
        };
        let value = Asn1Value {
            class: template.class,
            implicit_tag: template.implicit_tag,
            explicit: template.explicit,
            optional: template.optional,
            constraints: template.constraints.clone(),
            kind: Kind::OpenType {
                resolver,
                inner: Some(Box::new(inner)),
            },
        };
        value.check_constraints()?;
        Ok(value)
    }

    //--- Content readers

    fn require_constructed(&self, header: &Header, offset: usize) -> Result<(), Asn1Error> {
        if !header.constructed {
            return Err(Asn1Error::invalid(offset, "expected a constructed value"));
        }
        Ok(())
    }

    fn primitive_content(&mut self, header: &Header, offset: usize) -> Result<&'a [u8], Asn1Error> {
        match header.length {
            Length::Definite(len) if !header.constructed => self.take(len),
            Length::Definite(_) => Err(Asn1Error::invalid(
                offset,
                "expected a primitive value",
            )),
            Length::Indefinite => Err(Asn1Error::invalid(
                offset,
                "indefinite length on a primitive type",
            )),
        }
    }

    fn integer_content(&mut self, header: &Header, offset: usize) -> Result<Int, Asn1Error> {
        let content = self.primitive_content(header, offset)?;
        if content.is_empty() {
            return Err(Asn1Error::invalid(offset, "INTEGER content is empty"));
        }
        if content.len() > 1 {
            let redundant = (content[0] == 0x00 && content[1] & 0x80 == 0)
                || (content[0] == 0xff && content[1] & 0x80 != 0);
            if redundant && self.mode == Mode::Der {
                return Err(Asn1Error::invalid(
                    offset,
                    "non-minimal INTEGER in DER",
                ));
            }
        }
        Ok(Int::from_twos_complement(content))
    }

    /// Content of a potentially constructed string-like value.
    fn string_content(
        &mut self,
        header: &Header,
        segment_tag: Tag,
        offset: usize,
    ) -> Result<Vec<u8>, Asn1Error> {
        if !header.constructed {
            return Ok(self.primitive_content(header, offset)?.to_vec());
        }
        if self.mode == Mode::Der {
            return Err(Asn1Error::invalid(offset, "constructed string in DER"));
        }
        let mut out = Vec::new();
        self.string_segments(header, segment_tag, &mut out)?;
        Ok(out)
    }

    fn string_segments(
        &mut self,
        header: &Header,
        segment_tag: Tag,
        out: &mut Vec<u8>,
    ) -> Result<(), Asn1Error> {
        let (scope, saved) = self.open_scope(header)?;
        while !self.scope_exhausted(scope) {
            self.reject_stray_eoc(scope)?;
            let offset = self.pos;
            let segment = self.read_header()?;
            if segment.class != Class::Universal || segment.tag != segment_tag {
                return Err(Asn1Error::invalid(offset, "string segment has a foreign tag"));
            }
            if segment.constructed {
                self.string_segments(&segment, segment_tag, out)?;
            } else {
                let content = self.primitive_content(&segment, offset)?;
                out.extend_from_slice(content);
            }
        }
        self.close_scope(scope, saved)
    }

    /// Content of a potentially constructed BIT STRING. Only the final
    /// segment may carry pad bits.
    fn bit_string_content(
        &mut self,
        header: &Header,
        offset: usize,
    ) -> Result<(Vec<u8>, u8), Asn1Error> {
        if !header.constructed {
            let content = self.primitive_content(header, offset)?;
            return split_bit_string(content, offset);
        }
        if self.mode == Mode::Der {
            return Err(Asn1Error::invalid(offset, "constructed BIT STRING in DER"));
        }
        let mut bits = Vec::new();
        let pad = self.bit_string_segments(header, &mut bits)?;
        if bits.is_empty() && pad != 0 {
            return Err(Asn1Error::invalid(
                offset,
                "zero-length BIT STRING requires zero pad",
            ));
        }
        Ok((bits, pad))
    }

    fn bit_string_segments(
        &mut self,
        header: &Header,
        out: &mut Vec<u8>,
    ) -> Result<u8, Asn1Error> {
        let (scope, saved) = self.open_scope(header)?;
        let mut pad = 0u8;
        while !self.scope_exhausted(scope) {
            self.reject_stray_eoc(scope)?;
            if pad != 0 {
                return Err(Asn1Error::invalid(
                    self.pos,
                    "non-final BIT STRING segment has pad bits",
                ));
            }
            let offset = self.pos;
            let segment = self.read_header()?;
            if segment.class != Class::Universal || segment.tag != Tag::BIT_STRING {
                return Err(Asn1Error::invalid(offset, "BIT STRING segment has a foreign tag"));
            }
            if segment.constructed {
                pad = self.bit_string_segments(&segment, out)?;
            } else {
                let content = self.primitive_content(&segment, offset)?;
                let (segment_bits, segment_pad) = split_bit_string(content, offset)?;
                out.extend_from_slice(&segment_bits);
                pad = segment_pad;
            }
        }
        self.close_scope(scope, saved)?;
        Ok(pad)
    }

    /// Raw content octets of the value whose header was just read.
    fn capture_content(&mut self, header: &Header) -> Result<Vec<u8>, Asn1Error> {
        match header.length {
            Length::Definite(len) => Ok(self.take(len)?.to_vec()),
            Length::Indefinite => {
                let start = self.pos;
                let (scope, saved) = self.open_scope(header)?;
                while !self.scope_exhausted(scope) {
                    self.skip_one()?;
                }
                let content = self.data[start..self.pos].to_vec();
                self.close_scope(scope, saved)?;
                Ok(content)
            }
        }
    }

    /// Advances over one complete value, validating nesting.
    fn skip_one(&mut self) -> Result<(), Asn1Error> {
        let header = self.read_header()?;
        match header.length {
            Length::Definite(len) => {
                self.take(len)?;
            }
            Length::Indefinite => {
                let (scope, saved) = self.open_scope(&header)?;
                while !self.scope_exhausted(scope) {
                    self.skip_one()?;
                }
                self.close_scope(scope, saved)?;
            }
        }
        Ok(())
    }

    //--- Free-form decoding

    fn read_any_body(&mut self, header: Header) -> Result<Asn1Value, Asn1Error> {
        let offset = self.pos;
        if header.class != Class::Universal {
            return self.read_any_foreign(header, offset);
        }

        match header.tag {
            Tag::BOOLEAN => {
                let content = self.primitive_content(&header, offset)?;
                if content.len() != 1 {
                    return Err(Asn1Error::invalid(offset, "BOOLEAN content must be one octet"));
                }
                if self.mode == Mode::Der && content[0] != 0x00 && content[0] != 0xff {
                    return Err(Asn1Error::invalid(offset, "non-canonical BOOLEAN in DER"));
                }
                Ok(Asn1Value::boolean(content[0] != 0))
            }
            Tag::INTEGER => Ok(Asn1Value::integer(self.integer_content(&header, offset)?)),
            Tag::ENUMERATED => {
                Ok(Asn1Value::enumerated(self.integer_content(&header, offset)?))
            }
            Tag::BIT_STRING => {
                let (bits, pad) = self.bit_string_content(&header, offset)?;
                Asn1Value::bit_string(Bytes::from(bits), pad)
            }
            Tag::OCTET_STRING => {
                let octets = self.string_content(&header, Tag::OCTET_STRING, offset)?;
                Ok(Asn1Value::octet_string(Bytes::from(octets)))
            }
            Tag::NULL => {
                let content = self.primitive_content(&header, offset)?;
                if !content.is_empty() {
                    return Err(Asn1Error::invalid(offset, "NULL content must be empty"));
                }
                Ok(Asn1Value::null())
            }
            Tag::OID => {
                let content = self.primitive_content(&header, offset)?;
                let oid = Oid::from_content_octets(content)?;
                self.last_oid = Some(oid.clone());
                Ok(Asn1Value::oid(oid))
            }
            Tag::REAL => {
                let content = self.primitive_content(&header, offset)?;
                Ok(Asn1Value::real(real::decode(content, offset)?))
            }
            Tag::UTC_TIME => {
                let octets = self.string_content(&header, Tag::UTC_TIME, offset)?;
                Ok(Asn1Value::time(Time::parse(TimeKind::Utc, &octets, offset)?))
            }
            Tag::GENERALIZED_TIME => {
                let octets = self.string_content(&header, Tag::GENERALIZED_TIME, offset)?;
                Ok(Asn1Value::time(Time::parse(
                    TimeKind::Generalized,
                    &octets,
                    offset,
                )?))
            }
            Tag::SEQUENCE | Tag::SET => {
                self.require_constructed(&header, offset)?;
                let (scope, saved) = self.open_scope(&header)?;
                let mut items = Vec::new();
                while !self.scope_exhausted(scope) {
                    self.reject_stray_eoc(scope)?;
                    items.push(self.read_any()?);
                }
                self.close_scope(scope, saved)?;
                Ok(if header.tag == Tag::SET {
                    Asn1Value::set(items)
                } else {
                    Asn1Value::sequence(items)
                })
            }
            tag => {
                if let Some(kind) = StringKind::from_tag(tag) {
                    let octets = self.string_content(&header, tag, offset)?;
                    return Ok(Asn1Value::string(kind, kind.decode(&octets, offset)?));
                }
                // Unknown universal type: keep it undecoded.
                let content = self.capture_content(&header)?;
                Ok(Asn1Value::opaque(
                    header.tag,
                    header.constructed,
                    Bytes::from(content),
                ))
            }
        }
    }

    /// Free-form reading of APPLICATION, CONTEXT and PRIVATE values.
    ///
    /// Without a template the tagging mode is unknowable. A constructed
    /// value necessarily contains well-formed TLVs, so it is read as an
    /// implicitly tagged collection of them; a primitive value is kept as
    /// implicitly tagged octets. Indefinite lengths are refused because
    /// the reassembly rules depend on the inner type.
    fn read_any_foreign(
        &mut self,
        header: Header,
        offset: usize,
    ) -> Result<Asn1Value, Asn1Error> {
        if let Length::Indefinite = header.length {
            return Err(Asn1Error::invalid(
                offset,
                "indefinite length on a non-UNIVERSAL type is ambiguous; provide a template",
            ));
        }
        if header.constructed {
            let (scope, saved) = self.open_scope(&header)?;
            let mut items = Vec::new();
            while !self.scope_exhausted(scope) {
                self.reject_stray_eoc(scope)?;
                items.push(self.read_any()?);
            }
            self.close_scope(scope, saved)?;
            Ok(Asn1Value::sequence(items)
                .implicit(header.tag.0)
                .with_class(header.class))
        } else {
            let content = self.primitive_content(&header, offset)?;
            Ok(
                Asn1Value::octet_string(Bytes::copy_from_slice(content))
                    .implicit(header.tag.0)
                    .with_class(header.class),
            )
        }
    }
}

fn split_bit_string(content: &[u8], offset: usize) -> Result<(Vec<u8>, u8), Asn1Error> {
    let (pad, bits) = match content.split_first() {
        Some((pad, bits)) => (*pad, bits),
        None => return Err(Asn1Error::invalid(offset, "BIT STRING without a pad octet")),
    };
    if pad > 7 {
        return Err(Asn1Error::invalid(offset, "BIT STRING pad exceeds 7"));
    }
    if bits.is_empty() && pad != 0 {
        return Err(Asn1Error::invalid(
            offset,
            "zero-length BIT STRING requires zero pad",
        ));
    }
    Ok((bits.to_vec(), pad))
}

/// Does `header` satisfy the identifier the template expects?
fn identifier_matches(template: &Asn1Value, header: &Header) -> bool {
    match &template.kind {
        Kind::Choice { alternatives, .. } => alternatives
            .iter()
            .any(|alternative| identifier_matches(alternative, header)),
        Kind::OpenType { .. } => true,
        Kind::Opaque { .. } => header.class == Class::Universal,
        _ => template.identifier() == Some((header.class, header.tag)),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::der};

    fn der_round_trip(value: &Asn1Value, template: &Asn1Value) {
        let encoded = der::encode(value).unwrap();
        let decoded = decode_der(&encoded, template).unwrap();
        assert_eq!(&decoded, value);
        assert_eq!(der::encode(&decoded).unwrap(), encoded);
    }

    #[test]
    fn integer_template_round_trip() {
        der_round_trip(&Asn1Value::integer(42), &Asn1Value::integer(0));
        der_round_trip(&Asn1Value::integer(-32768), &Asn1Value::integer(0));
        assert_eq!(
            decode_der(&[0x02, 0x01, 0x2a], &Asn1Value::integer(0))
                .unwrap()
                .as_int()
                .unwrap()
                .to_i64(),
            Some(42)
        );
    }

    #[test]
    fn free_form_round_trip() {
        let der = der::encode(&Asn1Value::sequence(vec![
            Asn1Value::integer(7),
            Asn1Value::printable_string("hey"),
            Asn1Value::octet_string(Bytes::from_static(b"\x01\x02")),
        ]))
        .unwrap();
        let value = Decoder::new(&der, Mode::Der).read_any().unwrap();
        assert_eq!(der::encode(&value).unwrap(), der);
    }

    #[test]
    fn optional_fields_skip_on_mismatch() {
        let template = Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            Asn1Value::boolean(false).into_optional(),
            Asn1Value::octet_string(Bytes::new()),
        ]);
        let without = der::encode(&Asn1Value::sequence(vec![
            Asn1Value::integer(1),
            Asn1Value::octet_string(Bytes::from_static(b"x")),
        ]))
        .unwrap();
        let decoded = decode_der(&without, &template).unwrap();
        assert_eq!(decoded.children().unwrap().len(), 2);

        let with = der::encode(&Asn1Value::sequence(vec![
            Asn1Value::integer(1),
            Asn1Value::boolean(true),
            Asn1Value::octet_string(Bytes::from_static(b"x")),
        ]))
        .unwrap();
        let decoded = decode_der(&with, &template).unwrap();
        assert_eq!(decoded.children().unwrap().len(), 3);
    }

    #[test]
    fn surplus_content_is_fatal() {
        let template = Asn1Value::sequence(vec![Asn1Value::integer(0)]);
        let long = der::encode(&Asn1Value::sequence(vec![
            Asn1Value::integer(1),
            Asn1Value::integer(2),
        ]))
        .unwrap();
        assert!(decode_der(&long, &template).is_err());
    }

    #[test]
    fn choice_selects_by_tag() {
        let template = Asn1Value::choice(vec![
            Asn1Value::integer(0),
            Asn1Value::ia5_string(""),
        ])
        .unwrap();
        let der = der::encode(&Asn1Value::ia5_string("pick me")).unwrap();
        let decoded = decode_der(&der, &template).unwrap();
        assert_eq!(decoded.selected().unwrap().as_str(), Some("pick me"));

        let boolean = der::encode(&Asn1Value::boolean(true)).unwrap();
        assert!(decode_der(&boolean, &template).is_err());
    }

    #[test]
    fn indefinite_length_sequence() {
        // SEQUENCE (indefinite) { INTEGER 5 } EOC
        let ber = [0x30, 0x80, 0x02, 0x01, 0x05, 0x00, 0x00];
        let template = Asn1Value::sequence(vec![Asn1Value::integer(0)]);
        let decoded = decode_ber(&ber, &template).unwrap();
        assert_eq!(
            decoded.children().unwrap()[0].as_int().unwrap().to_i64(),
            Some(5)
        );
        // Canonical re-encoding uses a definite length.
        assert_eq!(der::encode(&decoded).unwrap(), [0x30, 0x03, 0x02, 0x01, 0x05]);
        // DER mode refuses it.
        assert!(decode_der(&ber, &template).is_err());
    }

    #[test]
    fn primitive_indefinite_is_rejected() {
        let ber = [0x04, 0x80, 0x00, 0x00];
        assert!(decode_ber(&ber, &Asn1Value::octet_string(Bytes::new())).is_err());
    }

    #[test]
    fn constructed_octet_string_reassembly() {
        // Constructed OCTET STRING of two primitive segments.
        let ber = [
            0x24, 0x80, 0x04, 0x02, 0xaa, 0xbb, 0x04, 0x01, 0xcc, 0x00, 0x00,
        ];
        let decoded = decode_ber(&ber, &Asn1Value::octet_string(Bytes::new())).unwrap();
        assert_eq!(decoded.as_octets().unwrap().as_ref(), &[0xaa, 0xbb, 0xcc]);
        // Canonical form is a primitive string.
        assert_eq!(
            der::encode(&decoded).unwrap(),
            [0x04, 0x03, 0xaa, 0xbb, 0xcc]
        );
    }

    #[test]
    fn constructed_bit_string_pad_rules() {
        // Second segment carries the pad; fine.
        let good = [
            0x23, 0x80, 0x03, 0x02, 0x00, 0xaa, 0x03, 0x02, 0x04, 0xb0, 0x00, 0x00,
        ];
        let template = Asn1Value::bit_string(Bytes::new(), 0).unwrap();
        let decoded = decode_ber(&good, &template).unwrap();
        assert_eq!(decoded.as_bit_string().unwrap().1, 4);

        // Pad bits on a non-final segment are rejected.
        let bad = [
            0x23, 0x80, 0x03, 0x02, 0x04, 0xa0, 0x03, 0x02, 0x00, 0xb0, 0x00, 0x00,
        ];
        assert!(decode_ber(&bad, &template).is_err());
    }

    #[test]
    fn budget_rejects_length_bombs() {
        // Declares 4 GiB of content.
        let bomb = [0x04, 0x84, 0xff, 0xff, 0xff, 0xff, 0x00];
        let err = decode_ber(&bomb, &Asn1Value::octet_string(Bytes::new())).unwrap_err();
        assert!(matches!(err, Asn1Error::InvalidEncoding { .. }));

        let der = der::encode(&Asn1Value::octet_string(Bytes::from(vec![0u8; 64]))).unwrap();
        let err = Decoder::new(&der, Mode::Der)
            .with_budget(16)
            .decode(&Asn1Value::octet_string(Bytes::new()))
            .unwrap_err();
        assert!(matches!(err, Asn1Error::InputBudgetExceeded { .. }));
    }

    #[test]
    fn ambiguous_foreign_indefinite_needs_template() {
        let ber = [0xa0, 0x80, 0x02, 0x01, 0x01, 0x00, 0x00];
        let err = Decoder::new(&ber, Mode::Ber).read_any().unwrap_err();
        match err {
            Asn1Error::InvalidEncoding { reason, .. } => {
                assert!(reason.contains("provide a template"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn implicit_template_reads_without_inner_header() {
        let value = Asn1Value::octet_string(Bytes::from_static(b"hi")).implicit(1);
        let der = der::encode(&value).unwrap();
        assert_eq!(der, [0x81, 0x02, b'h', b'i']);
        let template = Asn1Value::octet_string(Bytes::new()).implicit(1);
        let decoded = decode_der(&der, &template).unwrap();
        assert_eq!(decoded.as_octets().unwrap().as_ref(), b"hi");
    }

    #[test]
    fn explicit_template_reads_inner_header() {
        let value = Asn1Value::tagged(0, Asn1Value::integer(9));
        let der = der::encode(&value).unwrap();
        let template = Asn1Value::tagged(0, Asn1Value::integer(0));
        let decoded = decode_der(&der, &template).unwrap();
        assert_eq!(
            decoded.tagged_inner().unwrap().as_int().unwrap().to_i64(),
            Some(9)
        );
    }

    #[test]
    fn non_minimal_der_forms_rejected() {
        // INTEGER 1 with a redundant leading zero.
        assert!(decode_der(&[0x02, 0x02, 0x00, 0x01], &Asn1Value::integer(0)).is_err());
        assert!(decode_ber(&[0x02, 0x02, 0x00, 0x01], &Asn1Value::integer(0)).is_ok());

        // Length 3 in unnecessary long form.
        assert!(decode_der(&[0x04, 0x81, 0x03, 1, 2, 3], &Asn1Value::octet_string(Bytes::new())).is_err());
        assert!(decode_ber(&[0x04, 0x81, 0x03, 1, 2, 3], &Asn1Value::octet_string(Bytes::new())).is_ok());
    }

    #[test]
    fn set_of_preserves_decoded_order() {
        let der = der::encode(&Asn1Value::set_of_with(
            Asn1Value::integer(0),
            vec![Asn1Value::integer(9), Asn1Value::integer(1)],
        ))
        .unwrap();
        let decoded = decode_der(&der, &Asn1Value::set_of(Asn1Value::integer(0))).unwrap();
        let items: Vec<_> = decoded
            .children()
            .unwrap()
            .iter()
            .map(|v| v.as_int().unwrap().to_i64().unwrap())
            .collect();
        assert_eq!(items, [9, 1]);
    }
}
