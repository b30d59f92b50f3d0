// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Object identifiers and the template registry keyed by them.

use {
    crate::{error::Asn1Error, value::Asn1Value},
    once_cell::sync::Lazy,
    std::{
        collections::HashMap,
        fmt,
        str::FromStr,
        sync::{Arc, RwLock},
    },
};

/// An OBJECT IDENTIFIER value.
///
/// At least two subidentifiers; the first is 0, 1 or 2 and the second is
/// at most 39.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Oid {
    arcs: Vec<u32>,
}

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Result<Self, Asn1Error> {
        if arcs.len() < 2 {
            return Err(Asn1Error::InvalidOid(
                "fewer than two subidentifiers".into(),
            ));
        }
        if arcs[0] > 2 {
            return Err(Asn1Error::InvalidOid(format!(
                "first subidentifier {} out of range",
                arcs[0]
            )));
        }
        if arcs[1] > 39 {
            return Err(Asn1Error::InvalidOid(format!(
                "second subidentifier {} out of range",
                arcs[1]
            )));
        }
        Ok(Self { arcs })
    }

    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// The DER content octets: `40 * arc0 + arc1`, then base-128 arcs.
    pub(crate) fn content_octets(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.arcs.len() + 1);
        push_base128(&mut out, self.arcs[0] * 40 + self.arcs[1]);
        for &arc in &self.arcs[2..] {
            push_base128(&mut out, arc);
        }
        out
    }

    /// Parses DER content octets.
    pub(crate) fn from_content_octets(octets: &[u8]) -> Result<Self, Asn1Error> {
        if octets.is_empty() {
            return Err(Asn1Error::InvalidOid("empty content".into()));
        }
        let mut arcs = Vec::new();
        let mut iter = octets.iter().peekable();
        let first = take_base128(&mut iter)?;
        // Values of 120 and above would make the second subidentifier
        // exceed 39 in the 2.x root, which the value model forbids.
        if first >= 120 {
            return Err(Asn1Error::InvalidOid(format!(
                "leading subidentifier {} out of range",
                first
            )));
        }
        arcs.push(first / 40);
        arcs.push(first % 40);
        while iter.peek().is_some() {
            arcs.push(take_base128(&mut iter)?);
        }
        Self::new(arcs)
    }
}

fn push_base128(out: &mut Vec<u8>, value: u32) {
    if value == 0 {
        out.push(0);
        return;
    }
    let bits = 32 - value.leading_zeros() as usize;
    let mut shift = ((bits + 6) / 7 - 1) * 7;
    loop {
        let septet = ((value >> shift) & 0x7f) as u8;
        if shift == 0 {
            out.push(septet);
            break;
        }
        out.push(septet | 0x80);
        shift -= 7;
    }
}

fn take_base128<'a>(
    iter: &mut std::iter::Peekable<impl Iterator<Item = &'a u8>>,
) -> Result<u32, Asn1Error> {
    let mut value: u32 = 0;
    let mut first = true;
    loop {
        let octet = *iter
            .next()
            .ok_or_else(|| Asn1Error::InvalidOid("truncated subidentifier".into()))?;
        if first && octet == 0x80 {
            return Err(Asn1Error::InvalidOid(
                "subidentifier has a redundant leading octet".into(),
            ));
        }
        first = false;
        if value >> 25 != 0 {
            return Err(Asn1Error::InvalidOid("subidentifier exceeds 32 bits".into()));
        }
        value = value << 7 | (octet & 0x7f) as u32;
        if octet & 0x80 == 0 {
            return Ok(value);
        }
    }
}

impl FromStr for Oid {
    type Err = Asn1Error;

    fn from_str(s: &str) -> Result<Self, Asn1Error> {
        let arcs = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| Asn1Error::InvalidOid(format!("bad subidentifier {:?}", part)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, arc) in self.arcs.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", arc)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

/// Capability required to mutate a registry.
///
/// Hosts that gate registry mutation hand this token only to callers their
/// policy allows; the registry itself does not decide who may hold one.
#[derive(Debug)]
pub struct RegistryToken(());

impl RegistryToken {
    pub fn new() -> Self {
        Self(())
    }
}

impl Default for RegistryToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A hierarchical map from OID to decode template.
///
/// Lookups consult the local map first and then the parent chain; the
/// process-wide [`OidRegistry::global`] registry is the final fallback for
/// registries constructed without an explicit parent. Registry identity is
/// the registry allocation itself, not its contents; use
/// [`OidRegistry::same`] to compare.
pub struct OidRegistry {
    parent: Option<Arc<OidRegistry>>,
    entries: RwLock<HashMap<Oid, Asn1Value>>,
}

static GLOBAL_REGISTRY: Lazy<Arc<OidRegistry>> = Lazy::new(|| {
    Arc::new(OidRegistry {
        parent: None,
        entries: RwLock::new(HashMap::new()),
    })
});

impl OidRegistry {
    /// A registry whose fallback is the process-wide registry.
    pub fn new() -> Arc<Self> {
        Self::with_parent(Self::global())
    }

    pub fn with_parent(parent: Arc<OidRegistry>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent),
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// The process-wide fallback registry.
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY.clone()
    }

    /// Looks up the decode template for an OID.
    pub fn resolve(&self, oid: &Oid) -> Option<Asn1Value> {
        if let Some(template) = self
            .entries
            .read()
            .expect("OID registry lock poisoned")
            .get(oid)
        {
            return Some(template.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.resolve(oid))
    }

    pub fn register(&self, _token: &RegistryToken, oid: Oid, template: Asn1Value) {
        self.entries
            .write()
            .expect("OID registry lock poisoned")
            .insert(oid, template);
    }

    pub fn unregister(&self, _token: &RegistryToken, oid: &Oid) -> Option<Asn1Value> {
        self.entries
            .write()
            .expect("OID registry lock poisoned")
            .remove(oid)
    }

    /// Identity comparison; two registries with equal contents are still
    /// distinct.
    pub fn same(this: &Arc<Self>, other: &Arc<Self>) -> bool {
        Arc::ptr_eq(this, other)
    }
}

impl fmt::Debug for OidRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let entries = self.entries.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("OidRegistry")
            .field("entries", &entries)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_validation() {
        assert!(Oid::new(vec![1]).is_err());
        assert!(Oid::new(vec![3, 1]).is_err());
        assert!(Oid::new(vec![1, 40]).is_err());
        assert!("1.2.840.113549".parse::<Oid>().is_ok());
    }

    #[test]
    fn content_octets_round_trip() {
        let oid: Oid = "1.2.840.113549.1.7.1".parse().unwrap();
        let content = oid.content_octets();
        assert_eq!(
            content,
            vec![0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01]
        );
        assert_eq!(Oid::from_content_octets(&content).unwrap(), oid);
    }

    #[test]
    fn leading_subidentifier_cap() {
        // 120 would decode as 3.0, which is outside the root arcs.
        assert!(Oid::from_content_octets(&[120]).is_err());
        assert!(Oid::from_content_octets(&[119]).is_ok());
    }

    #[test]
    fn registry_hierarchy() {
        let token = RegistryToken::new();
        let parent = OidRegistry::new();
        let child = OidRegistry::with_parent(parent.clone());
        let oid: Oid = "1.2.3.4".parse().unwrap();

        assert!(child.resolve(&oid).is_none());
        parent.register(&token, oid.clone(), Asn1Value::null());
        assert!(child.resolve(&oid).is_some());
        assert!(!OidRegistry::same(&parent, &child));
        assert!(OidRegistry::same(&parent, &parent.clone()));
    }
}
