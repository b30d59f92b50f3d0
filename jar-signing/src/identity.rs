// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code-signing identities, key stores and trust anchors.
//!
//! An identity is a private key plus its certificate chain, normalized
//! to forward order (leaf first). Key stores are injected; the built-in
//! implementations read PKCS#12/PFX files and PEM key+chain pairs.
//! Private key DER and passwords are zeroized when dropped.

use {
    crate::error::JarSignError,
    chrono::{DateTime, Utc},
    pkcs7::{Certificate, SigningKey},
    std::path::Path,
    zeroize::Zeroizing,
};

/// A password or passphrase, wiped on drop.
pub type Secret = Zeroizing<String>;

/// A resolved signing identity. Immutable after construction.
#[derive(Debug)]
pub struct Identity {
    alias: String,
    key: SigningKey,
    /// Forward order: leaf first, then issuers toward the root.
    chain: Vec<Certificate>,
}

impl Identity {
    /// Builds an identity, normalizing the chain to forward order.
    pub fn new(
        alias: impl Into<String>,
        key: SigningKey,
        chain: Vec<Certificate>,
    ) -> Result<Self, JarSignError> {
        Ok(Self {
            alias: alias.into(),
            key,
            chain: normalize_chain(chain)?,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// The end-entity certificate.
    pub fn leaf(&self) -> Result<&Certificate, JarSignError> {
        self.chain
            .first()
            .ok_or_else(|| JarSignError::KeyStore("identity has an empty chain".into()))
    }
}

/// Normalizes a certificate chain to forward (leaf-first) order.
///
/// Accepts forward or reverse input and tolerates a self-signed anchor
/// at either end, detected by issuer/subject equality. A set that does
/// not link into a single path is an error.
pub fn normalize_chain(
    certificates: Vec<Certificate>,
) -> Result<Vec<Certificate>, JarSignError> {
    if certificates.len() <= 1 {
        return Ok(certificates);
    }

    // The leaf is the one certificate that issues no other in the set.
    let mut leaf_indexes = (0..certificates.len()).filter(|&candidate| {
        certificates.iter().enumerate().all(|(other, cert)| {
            other == candidate
                || cert.is_self_signed()
                || !cert.is_issued_by(&certificates[candidate])
        })
    });
    let leaf = leaf_indexes
        .next()
        .ok_or_else(|| JarSignError::CertPathInvalid("no leaf certificate in chain".into()))?;

    let mut remaining: Vec<Option<Certificate>> = certificates.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut current = match remaining[leaf].take() {
        Some(certificate) => certificate,
        None => {
            return Err(JarSignError::CertPathInvalid(
                "no leaf certificate in chain".into(),
            ))
        }
    };

    loop {
        let self_signed = current.is_self_signed();
        let issuer = remaining.iter_mut().find_map(|slot| {
            let matches = slot
                .as_ref()
                .map_or(false, |candidate| current.is_issued_by(candidate));
            if matches {
                slot.take()
            } else {
                None
            }
        });
        ordered.push(current);
        match issuer {
            Some(next) => current = next,
            None => {
                if self_signed || remaining.iter().all(Option::is_none) {
                    break;
                }
                return Err(JarSignError::CertPathInvalid(
                    "certificates do not form a single chain".into(),
                ));
            }
        }
    }

    if remaining.iter().any(Option::is_some) {
        return Err(JarSignError::CertPathInvalid(
            "certificates do not form a single chain".into(),
        ));
    }
    Ok(ordered)
}

/// Trust anchors the chain of a verified signature must reach.
#[derive(Debug, Default)]
pub struct TrustStore {
    anchors: Vec<Certificate>,
}

impl TrustStore {
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self { anchors }
    }

    pub fn from_pem_file(path: &Path) -> Result<Self, JarSignError> {
        let data = std::fs::read(path)?;
        Ok(Self::new(Certificate::from_pem_multiple(&data)?))
    }

    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    pub fn contains(&self, certificate: &Certificate) -> bool {
        self.anchors.iter().any(|anchor| anchor == certificate)
    }

    fn anchors_issuer_of(&self, certificate: &Certificate) -> bool {
        self.anchors
            .iter()
            .any(|anchor| certificate.is_issued_by(anchor))
    }
}

/// Checks a forward-ordered chain against a trust store at an instant.
///
/// Linkage is issuer/subject equality and validity windows; signature
/// checking along the path is the caller's path validator's business.
pub fn validate_chain(
    chain: &[Certificate],
    trust: &TrustStore,
    at: DateTime<Utc>,
) -> Result<(), JarSignError> {
    if chain.is_empty() {
        return Err(JarSignError::CertPathInvalid("empty chain".into()));
    }
    for (index, certificate) in chain.iter().enumerate() {
        if !certificate.is_valid_at(at) {
            return Err(JarSignError::CertPathInvalid(format!(
                "certificate {} is outside its validity window",
                index
            )));
        }
        if let Some(issuer) = chain.get(index + 1) {
            if !certificate.is_issued_by(issuer) {
                return Err(JarSignError::CertPathInvalid(format!(
                    "certificate {} is not issued by its successor",
                    index
                )));
            }
        }
    }
    let terminal = &chain[chain.len() - 1];
    if trust.contains(terminal) || trust.anchors_issuer_of(terminal) {
        Ok(())
    } else {
        Err(JarSignError::CertPathInvalid(
            "chain does not reach a trust anchor".into(),
        ))
    }
}

/// The injected key-store surface.
pub trait KeyStore {
    /// Resolves an alias to a signing identity.
    fn resolve(&self, alias: &str, key_password: &Secret) -> Result<Identity, JarSignError>;
}

/// PKCS#12 / PFX key store.
pub struct Pkcs12KeyStore {
    data: Zeroizing<Vec<u8>>,
    store_password: Secret,
}

impl Pkcs12KeyStore {
    pub fn load(path: &Path, store_password: Secret) -> Result<Self, JarSignError> {
        let data = Zeroizing::new(std::fs::read(path)?);
        Ok(Self {
            data,
            store_password,
        })
    }

    pub fn from_der(data: Vec<u8>, store_password: Secret) -> Self {
        Self {
            data: Zeroizing::new(data),
            store_password,
        }
    }
}

impl KeyStore for Pkcs12KeyStore {
    fn resolve(&self, alias: &str, key_password: &Secret) -> Result<Identity, JarSignError> {
        let pfx = p12::PFX::parse(&self.data)
            .map_err(|e| JarSignError::KeyStore(format!("not a PKCS#12 store: {:?}", e)))?;

        if !pfx.verify_mac(&self.store_password) {
            return Err(JarSignError::KeyStore(
                "store integrity check failed; wrong password?".into(),
            ));
        }

        let key_der = pfx
            .key_bags(key_password)
            .map_err(|e| JarSignError::KeyStore(format!("failed reading key bags: {:?}", e)))?
            .into_iter()
            .map(Zeroizing::new)
            .next()
            .ok_or_else(|| JarSignError::KeyStore("store holds no private key".into()))?;
        let key = SigningKey::from_pkcs8_der(&key_der)
            .map_err(|e| JarSignError::KeyStore(e.to_string()))?;

        let chain = pfx
            .cert_x509_bags(key_password)
            .map_err(|e| JarSignError::KeyStore(format!("failed reading cert bags: {:?}", e)))?
            .iter()
            .map(|der| Certificate::from_der(der))
            .collect::<Result<Vec<_>, _>>()?;
        if chain.is_empty() {
            return Err(JarSignError::KeyStore(
                "store holds no certificates".into(),
            ));
        }

        Identity::new(alias, key, chain)
    }
}

/// PEM key store: a PKCS#8 private key file and a certificate bundle.
pub struct PemKeyStore {
    key_pem: Zeroizing<Vec<u8>>,
    chain_pem: Vec<u8>,
}

impl PemKeyStore {
    pub fn load(key_path: &Path, chain_path: &Path) -> Result<Self, JarSignError> {
        Ok(Self {
            key_pem: Zeroizing::new(std::fs::read(key_path)?),
            chain_pem: std::fs::read(chain_path)?,
        })
    }

    pub fn from_pem(key_pem: Vec<u8>, chain_pem: Vec<u8>) -> Self {
        Self {
            key_pem: Zeroizing::new(key_pem),
            chain_pem,
        }
    }
}

impl KeyStore for PemKeyStore {
    fn resolve(&self, alias: &str, _key_password: &Secret) -> Result<Identity, JarSignError> {
        let key_block = pem::parse(self.key_pem.as_slice())?;
        if key_block.tag != "PRIVATE KEY" {
            return Err(JarSignError::KeyStore(format!(
                "expected a PKCS#8 PRIVATE KEY block, found {}",
                key_block.tag
            )));
        }
        let key_der = Zeroizing::new(key_block.contents);
        let key = SigningKey::from_pkcs8_der(&key_der)
            .map_err(|e| JarSignError::KeyStore(e.to_string()))?;

        let chain = Certificate::from_pem_multiple(&self.chain_pem)?;
        if chain.is_empty() {
            return Err(JarSignError::KeyStore(
                "chain file holds no certificates".into(),
            ));
        }
        Identity::new(alias, key, chain)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil, chrono::TimeZone};

    #[test]
    fn pem_store_resolves_identity() {
        let identity = testutil::identity();
        assert_eq!(identity.alias(), "codesigner");
        assert_eq!(identity.chain().len(), 1);
        assert!(identity.leaf().unwrap().is_self_signed());
    }

    #[test]
    fn single_certificate_chain_is_forward_already() {
        let cert = testutil::certificate();
        let chain = normalize_chain(vec![cert.clone()]).unwrap();
        assert_eq!(chain, vec![cert]);
    }

    #[test]
    fn chain_validates_against_anchor() {
        let cert = testutil::certificate();
        let trust = TrustStore::new(vec![cert.clone()]);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        validate_chain(&[cert.clone()], &trust, at).unwrap();

        // Outside the validity window.
        let early = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            validate_chain(&[cert.clone()], &trust, early),
            Err(JarSignError::CertPathInvalid(_))
        ));

        // No anchors at all.
        assert!(matches!(
            validate_chain(&[cert], &TrustStore::default(), at),
            Err(JarSignError::CertPathInvalid(_))
        ));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let trust = TrustStore::default();
        assert!(validate_chain(&[], &trust, Utc::now()).is_err());
    }

    #[test]
    fn reverse_chain_is_normalized_to_forward() {
        let (identity, root) = testutil::chained_identity("chained");
        // Identity::new already normalized; feed it the reverse order
        // explicitly as well.
        let leaf = identity.leaf().unwrap().clone();
        assert!(leaf.is_issued_by(&root));

        let forward = normalize_chain(vec![root.clone(), leaf.clone()]).unwrap();
        assert_eq!(forward[0], leaf);
        assert_eq!(forward[1], root);

        let already = normalize_chain(vec![leaf.clone(), root.clone()]).unwrap();
        assert_eq!(already[0], leaf);
        assert_eq!(already[1], root);
    }

    #[test]
    fn unlinked_certificates_do_not_form_a_chain() {
        let (a, _) = testutil::issue_certificate("Island A", 5, None);
        let (_, b_key) = testutil::issue_certificate("Island B", 6, None);
        let (b_leaf, _) = testutil::issue_certificate("Leaf B", 7, Some(("Island B", &b_key)));
        assert!(matches!(
            normalize_chain(vec![a, b_leaf]),
            Err(JarSignError::CertPathInvalid(_))
        ));
    }

    #[test]
    fn two_certificate_chain_validates_to_its_root() {
        let (identity, root) = testutil::chained_identity("chained");
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let trust = TrustStore::new(vec![root]);
        validate_chain(identity.chain(), &trust, at).unwrap();

        // An unrelated anchor does not help.
        let (stranger, _) = testutil::issue_certificate("Stranger", 9, None);
        let wrong = TrustStore::new(vec![stranger]);
        assert!(matches!(
            validate_chain(identity.chain(), &wrong, at),
            Err(JarSignError::CertPathInvalid(_))
        ));
    }
}
