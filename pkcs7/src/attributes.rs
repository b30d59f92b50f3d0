// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PKCS#9 attribute bags.
//!
//! Both the authenticated (signed) and unauthenticated (unsigned)
//! attribute sets of a SignerInfo are bags keyed by OID, multi-valued,
//! preserving insertion order.

use {
    crate::error::CmsError,
    asn1_runtime::{der, Asn1Value, Oid},
};

/// One attribute: a type OID with one or more values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribute {
    pub oid: Oid,
    pub values: Vec<Asn1Value>,
}

impl Attribute {
    pub fn new(oid: Oid, value: Asn1Value) -> Self {
        Self {
            oid,
            values: vec![value],
        }
    }

    fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::oid("0.0".parse().expect("static OID")),
            Asn1Value::set_of(Asn1Value::any()),
        ])
    }

    fn to_value(&self) -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::oid(self.oid.clone()),
            Asn1Value::set_of_with(
                Asn1Value::any(),
                self.values
                    .iter()
                    .map(|value| Asn1Value::any_with(value.clone()))
                    .collect(),
            ),
        ])
    }

    fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let children = value
            .children()
            .ok_or_else(|| CmsError::malformed("Attribute", "not a sequence"))?;
        let oid = children
            .first()
            .and_then(Asn1Value::as_oid)
            .ok_or_else(|| CmsError::malformed("Attribute", "missing type OID"))?
            .clone();
        let values = children
            .get(1)
            .and_then(Asn1Value::children)
            .ok_or_else(|| CmsError::malformed("Attribute", "missing value set"))?
            .iter()
            .map(|slot| slot.selected().unwrap_or(slot).clone())
            .collect();
        Ok(Self { oid, values })
    }
}

/// An ordered, OID-keyed, multi-valued attribute bag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attributes {
    entries: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub fn get(&self, oid: &Oid) -> Option<&Attribute> {
        self.entries.iter().find(|attr| &attr.oid == oid)
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.get(oid).is_some()
    }

    /// The single value of an attribute, if it has exactly one.
    pub fn single_value(&self, oid: &Oid) -> Option<&Asn1Value> {
        self.get(oid).and_then(|attr| {
            if attr.values.len() == 1 {
                attr.values.first()
            } else {
                None
            }
        })
    }

    /// Adds a value, extending the existing attribute of the same type if
    /// one exists.
    pub fn add(&mut self, oid: Oid, value: Asn1Value) {
        match self.entries.iter().position(|attr| attr.oid == oid) {
            Some(index) => self.entries[index].values.push(value),
            None => self.entries.push(Attribute::new(oid, value)),
        }
    }

    pub fn remove(&mut self, oid: &Oid) -> Option<Attribute> {
        let index = self.entries.iter().position(|attr| &attr.oid == oid)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn template() -> Asn1Value {
        Asn1Value::set_of(Attribute::template())
    }

    /// As a SET OF Attribute value with the universal SET tag. Callers
    /// re-tag this for the IMPLICIT `[0]`/`[1]` SignerInfo slots.
    pub(crate) fn to_value(&self) -> Asn1Value {
        Asn1Value::set_of_with(
            Attribute::template(),
            self.entries.iter().map(Attribute::to_value).collect(),
        )
    }

    pub(crate) fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let entries = value
            .children()
            .ok_or_else(|| CmsError::malformed("Attributes", "not a set"))?
            .iter()
            .map(Attribute::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// The DER encoding digested and signed for authenticated attributes.
    ///
    /// RFC 5652 §5.4: the message digest is computed over the attribute
    /// set with its EXPLICIT SET OF tag, not the IMPLICIT `[0]` used in
    /// the SignerInfo encoding.
    pub fn explicit_der(&self) -> Result<Vec<u8>, CmsError> {
        Ok(der::encode(&self.to_value())?)
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::oids, asn1_runtime::decode_der, bytes::Bytes};

    #[test]
    fn bag_is_multi_valued_and_ordered() {
        let mut attrs = Attributes::new();
        attrs.add(oids::OID_CONTENT_TYPE.clone(), Asn1Value::oid(oids::OID_DATA.clone()));
        attrs.add(
            oids::OID_MESSAGE_DIGEST.clone(),
            Asn1Value::octet_string(Bytes::from_static(b"d1")),
        );
        attrs.add(
            oids::OID_MESSAGE_DIGEST.clone(),
            Asn1Value::octet_string(Bytes::from_static(b"d2")),
        );

        assert_eq!(attrs.len(), 2);
        let digests = attrs.get(&oids::OID_MESSAGE_DIGEST).unwrap();
        assert_eq!(digests.values.len(), 2);
        assert!(attrs.single_value(&oids::OID_MESSAGE_DIGEST).is_none());
        assert!(attrs.single_value(&oids::OID_CONTENT_TYPE).is_some());
    }

    #[test]
    fn explicit_der_has_universal_set_tag() {
        let mut attrs = Attributes::new();
        attrs.add(oids::OID_CONTENT_TYPE.clone(), Asn1Value::oid(oids::OID_DATA.clone()));
        let der = attrs.explicit_der().unwrap();
        assert_eq!(der[0], 0x31);
    }

    #[test]
    fn value_round_trip() {
        let mut attrs = Attributes::new();
        attrs.add(
            oids::OID_MESSAGE_DIGEST.clone(),
            Asn1Value::octet_string(Bytes::from_static(&[1, 2, 3])),
        );
        attrs.add(oids::OID_CONTENT_TYPE.clone(), Asn1Value::oid(oids::OID_DATA.clone()));

        let der = attrs.explicit_der().unwrap();
        let decoded = decode_der(&der, &Attributes::template()).unwrap();
        let back = Attributes::from_value(&decoded).unwrap();
        assert_eq!(back, attrs);
    }
}
