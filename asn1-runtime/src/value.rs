// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The runtime ASN.1 value model.
//!
//! [`Asn1Value`] is a tagged sum over every supported ASN.1 type. A value
//! doubles as a decode template: collections carry element templates,
//! CHOICE carries its alternatives, and open types carry a resolver. The
//! codecs never mutate a value they are given.

use {
    crate::{
        error::Asn1Error,
        int::Int,
        oid::Oid,
        strings::StringKind,
        tag::{Class, Tag},
        time::{Time, TimeKind},
    },
    bytes::Bytes,
    std::{fmt, sync::Arc},
};

/// A caller-installed value constraint.
///
/// Constraints are attached to values and shared by reference when a value
/// is cloned. The decoder runs them after producing a value; encoders do
/// not consult them.
pub trait Constraint: Send + Sync {
    /// Returns an error describing the violation, if any.
    fn check(&self, value: &Asn1Value) -> Result<(), Asn1Error>;
}

/// Resolver consulted by an open type during decoding.
///
/// The decoder passes the most recently decoded OBJECT IDENTIFIER of the
/// enclosing constructed value, which is how `AlgorithmIdentifier`-shaped
/// structures tie parameters to their algorithm.
pub trait OpenTypeResolver: Send + Sync {
    fn resolve(&self, oid: Option<&Oid>) -> Option<Asn1Value>;
}

/// Open-type resolver backed by an [`crate::OidRegistry`].
pub struct RegistryResolver {
    registry: Arc<crate::OidRegistry>,
}

impl RegistryResolver {
    pub fn new(registry: Arc<crate::OidRegistry>) -> Self {
        Self { registry }
    }
}

impl OpenTypeResolver for RegistryResolver {
    fn resolve(&self, oid: Option<&Oid>) -> Option<Asn1Value> {
        oid.and_then(|oid| self.registry.resolve(oid))
    }
}

/// Shareable resolver handle; exists to give `Kind` usable `Clone`/`Debug`.
#[derive(Clone)]
pub struct Resolver(pub Arc<dyn OpenTypeResolver>);

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Resolver(..)")
    }
}

/// The payload of a value.
#[derive(Clone, Debug)]
pub enum Kind {
    Boolean(bool),
    Integer(Int),
    BitString {
        bits: Bytes,
        /// Unused bits in the final octet, 0..=7.
        pad: u8,
    },
    OctetString(Bytes),
    Null,
    Oid(Oid),
    Real(f64),
    Enumerated {
        value: Int,
        /// When non-empty, decoded values must be members.
        allowed: Vec<Int>,
    },
    String {
        kind: StringKind,
        text: String,
    },
    Time(Time),
    Sequence(Vec<Asn1Value>),
    Set(Vec<Asn1Value>),
    SequenceOf {
        template: Box<Asn1Value>,
        items: Vec<Asn1Value>,
    },
    SetOf {
        template: Box<Asn1Value>,
        items: Vec<Asn1Value>,
    },
    /// An EXPLICIT tagging wrapper. The wrapper itself always emits its
    /// own identifier and length; the inner value may in turn be IMPLICIT.
    Tagged {
        tag: Tag,
        inner: Box<Asn1Value>,
    },
    /// Raw content octets of a value kept undecoded.
    Opaque {
        tag: Tag,
        constructed: bool,
        content: Bytes,
    },
    /// A slot whose concrete type is resolved while decoding.
    OpenType {
        resolver: Resolver,
        inner: Option<Box<Asn1Value>>,
    },
    Choice {
        alternatives: Vec<Asn1Value>,
        selected: Option<Box<Asn1Value>>,
    },
}

/// A value of the runtime ASN.1 model.
///
/// Cloning is a deep snapshot: mutating the clone never affects the
/// original. Constraints are the one exception; they are shared by
/// reference across clones.
#[derive(Clone)]
pub struct Asn1Value {
    pub(crate) class: Class,
    /// IMPLICIT tag override. `None` means the universal tag is used.
    pub(crate) implicit_tag: Option<Tag>,
    pub(crate) explicit: bool,
    pub(crate) optional: bool,
    pub(crate) constraints: Vec<Arc<dyn Constraint>>,
    pub(crate) kind: Kind,
}

impl Asn1Value {
    fn from_kind(kind: Kind) -> Self {
        Self {
            class: Class::Universal,
            implicit_tag: None,
            explicit: true,
            optional: false,
            constraints: Vec::new(),
            kind,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::from_kind(Kind::Boolean(value))
    }

    pub fn integer(value: impl Into<Int>) -> Self {
        Self::from_kind(Kind::Integer(value.into()))
    }

    /// A BIT STRING. A zero-length string must have zero pad bits.
    pub fn bit_string(bits: impl Into<Bytes>, pad: u8) -> Result<Self, Asn1Error> {
        let bits = bits.into();
        if pad > 7 {
            return Err(Asn1Error::InvariantViolated("BIT STRING pad exceeds 7"));
        }
        if bits.is_empty() && pad != 0 {
            return Err(Asn1Error::InvariantViolated(
                "zero-length BIT STRING requires zero pad",
            ));
        }
        Ok(Self::from_kind(Kind::BitString { bits, pad }))
    }

    pub fn octet_string(octets: impl Into<Bytes>) -> Self {
        Self::from_kind(Kind::OctetString(octets.into()))
    }

    pub fn null() -> Self {
        Self::from_kind(Kind::Null)
    }

    pub fn oid(oid: Oid) -> Self {
        Self::from_kind(Kind::Oid(oid))
    }

    pub fn real(value: f64) -> Self {
        Self::from_kind(Kind::Real(value))
    }

    pub fn enumerated(value: impl Into<Int>) -> Self {
        Self::from_kind(Kind::Enumerated {
            value: value.into(),
            allowed: Vec::new(),
        })
    }

    pub fn enumerated_of(value: impl Into<Int>, allowed: Vec<Int>) -> Self {
        Self::from_kind(Kind::Enumerated {
            value: value.into(),
            allowed,
        })
    }

    pub fn string(kind: StringKind, text: impl Into<String>) -> Self {
        Self::from_kind(Kind::String {
            kind,
            text: text.into(),
        })
    }

    pub fn utf8_string(text: impl Into<String>) -> Self {
        Self::string(StringKind::Utf8, text)
    }

    pub fn printable_string(text: impl Into<String>) -> Self {
        Self::string(StringKind::Printable, text)
    }

    pub fn ia5_string(text: impl Into<String>) -> Self {
        Self::string(StringKind::Ia5, text)
    }

    pub fn time(time: Time) -> Self {
        Self::from_kind(Kind::Time(time))
    }

    pub fn utc_time(at: chrono::DateTime<chrono::Utc>) -> Self {
        Self::time(Time::new(TimeKind::Utc, at))
    }

    pub fn generalized_time(at: chrono::DateTime<chrono::Utc>) -> Self {
        Self::time(Time::new(TimeKind::Generalized, at))
    }

    pub fn sequence(items: Vec<Asn1Value>) -> Self {
        Self::from_kind(Kind::Sequence(items))
    }

    pub fn set(items: Vec<Asn1Value>) -> Self {
        Self::from_kind(Kind::Set(items))
    }

    pub fn sequence_of(template: Asn1Value) -> Self {
        Self::from_kind(Kind::SequenceOf {
            template: Box::new(template),
            items: Vec::new(),
        })
    }

    pub fn sequence_of_with(template: Asn1Value, items: Vec<Asn1Value>) -> Self {
        Self::from_kind(Kind::SequenceOf {
            template: Box::new(template),
            items,
        })
    }

    pub fn set_of(template: Asn1Value) -> Self {
        Self::from_kind(Kind::SetOf {
            template: Box::new(template),
            items: Vec::new(),
        })
    }

    pub fn set_of_with(template: Asn1Value, items: Vec<Asn1Value>) -> Self {
        Self::from_kind(Kind::SetOf {
            template: Box::new(template),
            items,
        })
    }

    /// An EXPLICIT context tag wrapper around `inner`.
    pub fn tagged(tag: u32, inner: Asn1Value) -> Self {
        let mut value = Self::from_kind(Kind::Tagged {
            tag: Tag(tag),
            inner: Box::new(inner),
        });
        value.class = Class::Context;
        value
    }

    pub fn opaque(tag: Tag, constructed: bool, content: impl Into<Bytes>) -> Self {
        Self::from_kind(Kind::Opaque {
            tag,
            constructed,
            content: content.into(),
        })
    }

    pub fn open_type(resolver: Arc<dyn OpenTypeResolver>) -> Self {
        Self::from_kind(Kind::OpenType {
            resolver: Resolver(resolver),
            inner: None,
        })
    }

    pub fn open_type_with(resolver: Arc<dyn OpenTypeResolver>, inner: Asn1Value) -> Self {
        Self::from_kind(Kind::OpenType {
            resolver: Resolver(resolver),
            inner: Some(Box::new(inner)),
        })
    }

    /// An ANY slot: an open type whose resolver never produces a
    /// template, so the decoder reads whatever type is present.
    pub fn any() -> Self {
        struct Never;
        impl OpenTypeResolver for Never {
            fn resolve(&self, _: Option<&Oid>) -> Option<Asn1Value> {
                None
            }
        }
        Self::open_type(Arc::new(Never))
    }

    /// Wraps a value in an ANY slot, for building values against
    /// templates that use [`Asn1Value::any`].
    pub fn any_with(inner: Asn1Value) -> Self {
        let mut value = Self::any();
        if let Kind::OpenType { inner: slot, .. } = &mut value.kind {
            *slot = Some(Box::new(inner));
        }
        value
    }

    /// A CHOICE over the given alternatives.
    ///
    /// Alternatives must have pairwise distinct identifier (class, tag)
    /// pairs and may not themselves be CHOICE values. A CHOICE is always
    /// EXPLICIT.
    pub fn choice(alternatives: Vec<Asn1Value>) -> Result<Self, Asn1Error> {
        let mut seen = Vec::new();
        for alt in &alternatives {
            if matches!(alt.kind, Kind::Choice { .. }) {
                return Err(Asn1Error::InvariantViolated("nested CHOICE is forbidden"));
            }
            let ident = alt
                .identifier()
                .ok_or(Asn1Error::InvariantViolated("untagged CHOICE alternative"))?;
            if seen.contains(&ident) {
                return Err(Asn1Error::InvariantViolated(
                    "CHOICE alternatives must have distinct tags",
                ));
            }
            seen.push(ident);
        }
        Ok(Self::from_kind(Kind::Choice {
            alternatives,
            selected: None,
        }))
    }

    /// Marks the selected alternative of a CHOICE.
    pub fn select(&mut self, value: Asn1Value) -> Result<(), Asn1Error> {
        match &mut self.kind {
            Kind::Choice { selected, .. } => {
                *selected = Some(Box::new(value));
                Ok(())
            }
            _ => Err(Asn1Error::InvariantViolated("select on a non-CHOICE value")),
        }
    }

    //--- Metadata builders

    pub fn with_class(mut self, class: Class) -> Self {
        self.class = class;
        self
    }

    /// Applies an IMPLICIT context tag to this value.
    pub fn implicit(mut self, tag: u32) -> Self {
        self.class = Class::Context;
        self.implicit_tag = Some(Tag(tag));
        self.explicit = false;
        self
    }

    pub fn into_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn constrain(mut self, constraint: Arc<dyn Constraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Drops all attached constraints.
    pub fn unconstrained(mut self) -> Self {
        self.constraints.clear();
        self
    }

    //--- Accessors

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn check_constraints(&self) -> Result<(), Asn1Error> {
        for constraint in &self.constraints {
            constraint.check(self)?;
        }
        Ok(())
    }

    /// True when this value encodes nothing (an unfilled optional slot).
    pub fn is_absent(&self) -> bool {
        match &self.kind {
            Kind::OpenType { inner, .. } => inner.is_none(),
            Kind::Choice { selected, .. } => selected.is_none(),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            Kind::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&Int> {
        match &self.kind {
            Kind::Integer(v) | Kind::Enumerated { value: v, .. } => Some(v),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match &self.kind {
            Kind::Oid(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_octets(&self) -> Option<&Bytes> {
        match &self.kind {
            Kind::OctetString(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bit_string(&self) -> Option<(&Bytes, u8)> {
        match &self.kind {
            Kind::BitString { bits, pad } => Some((bits, *pad)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            Kind::String { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&Time> {
        match &self.kind {
            Kind::Time(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match &self.kind {
            Kind::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Elements of any collection kind.
    pub fn children(&self) -> Option<&[Asn1Value]> {
        match &self.kind {
            Kind::Sequence(items) | Kind::Set(items) => Some(items),
            Kind::SequenceOf { items, .. } | Kind::SetOf { items, .. } => Some(items),
            _ => None,
        }
    }

    /// The payload of an EXPLICIT tag wrapper.
    pub fn tagged_inner(&self) -> Option<&Asn1Value> {
        match &self.kind {
            Kind::Tagged { inner, .. } => Some(inner),
            _ => None,
        }
    }

    pub fn selected(&self) -> Option<&Asn1Value> {
        match &self.kind {
            Kind::Choice { selected, .. } => selected.as_deref(),
            Kind::OpenType { inner, .. } => inner.as_deref(),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<(&Bytes, Tag)> {
        match &self.kind {
            Kind::Opaque { content, tag, .. } => Some((content, *tag)),
            _ => None,
        }
    }

    //--- Identifier computation shared by the codecs

    /// The universal tag this kind would carry without overrides.
    ///
    /// `None` for transparent kinds (CHOICE, open type) which have no tag
    /// of their own.
    pub(crate) fn universal_tag(&self) -> Option<Tag> {
        Some(match &self.kind {
            Kind::Boolean(_) => Tag::BOOLEAN,
            Kind::Integer(_) => Tag::INTEGER,
            Kind::BitString { .. } => Tag::BIT_STRING,
            Kind::OctetString(_) => Tag::OCTET_STRING,
            Kind::Null => Tag::NULL,
            Kind::Oid(_) => Tag::OID,
            Kind::Real(_) => Tag::REAL,
            Kind::Enumerated { .. } => Tag::ENUMERATED,
            Kind::String { kind, .. } => kind.tag(),
            Kind::Time(time) => time.kind().tag(),
            Kind::Sequence(_) | Kind::SequenceOf { .. } => Tag::SEQUENCE,
            Kind::Set(_) | Kind::SetOf { .. } => Tag::SET,
            Kind::Tagged { tag, .. } => *tag,
            Kind::Opaque { tag, .. } => *tag,
            Kind::OpenType { .. } | Kind::Choice { .. } => return None,
        })
    }

    /// The identifier (class, tag) this value encodes with, after tagging
    /// overrides. Transparent kinds defer to their selected value.
    pub fn identifier(&self) -> Option<(Class, Tag)> {
        if let Kind::Tagged { tag, .. } = &self.kind {
            return Some((self.class, *tag));
        }
        if let Some(tag) = self.implicit_tag {
            return Some((self.class, tag));
        }
        match &self.kind {
            Kind::Choice { selected, .. } => selected.as_deref().and_then(Asn1Value::identifier),
            Kind::OpenType { inner, .. } => inner.as_deref().and_then(Asn1Value::identifier),
            _ => self.universal_tag().map(|tag| (self.class, tag)),
        }
    }

    /// Whether the encoding of this value is constructed.
    pub fn is_constructed(&self) -> bool {
        match &self.kind {
            Kind::Sequence(_)
            | Kind::Set(_)
            | Kind::SequenceOf { .. }
            | Kind::SetOf { .. }
            | Kind::Tagged { .. } => true,
            Kind::Opaque { constructed, .. } => *constructed,
            Kind::Choice { selected, .. } => {
                selected.as_deref().map_or(false, Asn1Value::is_constructed)
            }
            Kind::OpenType { inner, .. } => {
                inner.as_deref().map_or(false, Asn1Value::is_constructed)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Asn1Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("Asn1Value");
        s.field("class", &self.class);
        if let Some(tag) = self.implicit_tag {
            s.field("implicit_tag", &tag);
        }
        if self.optional {
            s.field("optional", &true);
        }
        if !self.constraints.is_empty() {
            s.field("constraints", &self.constraints.len());
        }
        s.field("kind", &self.kind).finish()
    }
}

impl PartialEq for Asn1Value {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.implicit_tag == other.implicit_tag
            && self.explicit == other.explicit
            && self.optional == other.optional
            && kind_eq(&self.kind, &other.kind)
    }
}

impl Eq for Asn1Value {}

/// Structural equality. Collection templates and open-type resolvers do
/// not participate; constraints are compared by reference identity being
/// irrelevant to value equality.
fn kind_eq(a: &Kind, b: &Kind) -> bool {
    match (a, b) {
        (Kind::Boolean(x), Kind::Boolean(y)) => x == y,
        (Kind::Integer(x), Kind::Integer(y)) => x == y,
        (
            Kind::BitString { bits: xb, pad: xp },
            Kind::BitString { bits: yb, pad: yp },
        ) => xb == yb && xp == yp,
        (Kind::OctetString(x), Kind::OctetString(y)) => x == y,
        (Kind::Null, Kind::Null) => true,
        (Kind::Oid(x), Kind::Oid(y)) => x == y,
        (Kind::Real(x), Kind::Real(y)) => x.to_bits() == y.to_bits(),
        (
            Kind::Enumerated { value: x, .. },
            Kind::Enumerated { value: y, .. },
        ) => x == y,
        (
            Kind::String { kind: xk, text: xt },
            Kind::String { kind: yk, text: yt },
        ) => xk == yk && xt == yt,
        (Kind::Time(x), Kind::Time(y)) => x == y,
        (Kind::Sequence(x), Kind::Sequence(y)) | (Kind::Set(x), Kind::Set(y)) => x == y,
        (Kind::SequenceOf { items: x, .. }, Kind::SequenceOf { items: y, .. }) => x == y,
        (Kind::SetOf { items: x, .. }, Kind::SetOf { items: y, .. }) => x == y,
        (
            Kind::Tagged { tag: xt, inner: xi },
            Kind::Tagged { tag: yt, inner: yi },
        ) => xt == yt && xi == yi,
        (
            Kind::Opaque {
                tag: xt,
                constructed: xc,
                content: xb,
            },
            Kind::Opaque {
                tag: yt,
                constructed: yc,
                content: yb,
            },
        ) => xt == yt && xc == yc && xb == yb,
        (Kind::OpenType { inner: x, .. }, Kind::OpenType { inner: y, .. }) => x == y,
        (Kind::Choice { selected: x, .. }, Kind::Choice { selected: y, .. }) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_deep_but_constraints_are_shared() {
        struct Marker;
        impl Constraint for Marker {
            fn check(&self, _: &Asn1Value) -> Result<(), Asn1Error> {
                Ok(())
            }
        }

        let constraint: Arc<dyn Constraint> = Arc::new(Marker);
        let original = Asn1Value::sequence(vec![Asn1Value::integer(1)]).constrain(constraint.clone());
        let mut copy = original.clone();

        if let Kind::Sequence(items) = &mut copy.kind {
            items.push(Asn1Value::integer(2));
        }
        assert_eq!(original.children().unwrap().len(), 1);
        assert_eq!(copy.children().unwrap().len(), 2);
        assert!(Arc::ptr_eq(&original.constraints[0], &copy.constraints[0]));
    }

    #[test]
    fn choice_alternatives_must_be_distinct() {
        let ok = Asn1Value::choice(vec![
            Asn1Value::integer(0),
            Asn1Value::octet_string(Bytes::new()),
        ]);
        assert!(ok.is_ok());

        let dup = Asn1Value::choice(vec![Asn1Value::integer(0), Asn1Value::integer(1)]);
        assert!(dup.is_err());

        let nested = Asn1Value::choice(vec![ok.unwrap()]);
        assert!(nested.is_err());
    }

    #[test]
    fn implicit_tag_changes_identifier() {
        let value = Asn1Value::octet_string(Bytes::from_static(b"x")).implicit(3);
        assert_eq!(value.identifier(), Some((Class::Context, Tag(3))));
        assert!(!value.is_explicit());

        let wrapped = Asn1Value::tagged(0, Asn1Value::null());
        assert_eq!(wrapped.identifier(), Some((Class::Context, Tag(0))));
        assert!(wrapped.is_explicit());
    }

    #[test]
    fn bit_string_pad_rules() {
        assert!(Asn1Value::bit_string(Bytes::new(), 0).is_ok());
        assert!(Asn1Value::bit_string(Bytes::new(), 1).is_err());
        assert!(Asn1Value::bit_string(Bytes::from_static(&[0xf0]), 4).is_ok());
        assert!(Asn1Value::bit_string(Bytes::from_static(&[0xf0]), 8).is_err());
    }

    #[test]
    fn structural_equality_ignores_templates() {
        let a = Asn1Value::sequence_of_with(Asn1Value::integer(0), vec![Asn1Value::integer(7)]);
        let b = Asn1Value::sequence_of_with(Asn1Value::boolean(false), vec![Asn1Value::integer(7)]);
        assert_eq!(a, b);
    }
}
