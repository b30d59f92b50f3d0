// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-lookup between algorithm names, OIDs and the cryptographic
//! provider.
//!
//! Hashing and signing primitives are never implemented here; everything
//! dispatches into `ring`. A failed lookup in any direction is
//! [`CmsError::AlgorithmUnavailable`].

use {
    crate::{error::CmsError, oids, structures::AlgorithmIdentifier},
    asn1_runtime::Oid,
    ring::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, VerificationAlgorithm},
};

/// A hashing algorithm used for digesting content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn oid(self) -> Oid {
        match self {
            Self::Sha1 => oids::OID_SHA1.clone(),
            Self::Sha256 => oids::OID_SHA256.clone(),
            Self::Sha384 => oids::OID_SHA384.clone(),
            Self::Sha512 => oids::OID_SHA512.clone(),
        }
    }

    pub fn from_oid(oid: &Oid) -> Result<Self, CmsError> {
        if oid == &*oids::OID_SHA1 {
            Ok(Self::Sha1)
        } else if oid == &*oids::OID_SHA256 {
            Ok(Self::Sha256)
        } else if oid == &*oids::OID_SHA384 {
            Ok(Self::Sha384)
        } else if oid == &*oids::OID_SHA512 {
            Ok(Self::Sha512)
        } else {
            Err(CmsError::AlgorithmUnavailable(format!(
                "digest OID {}",
                oid
            )))
        }
    }

    /// Looks an algorithm up by its JAR-style name, e.g. `SHA-256`.
    pub fn from_name(name: &str) -> Result<Self, CmsError> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(CmsError::AlgorithmUnavailable(format!("digest {}", name))),
        }
    }

    /// The name used in manifest digest attributes.
    pub fn jar_name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Creates a new content hasher for this algorithm.
    pub fn digester(self) -> ring::digest::Context {
        ring::digest::Context::new(match self {
            Self::Sha1 => &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &ring::digest::SHA256,
            Self::Sha384 => &ring::digest::SHA384,
            Self::Sha512 => &ring::digest::SHA512,
        })
    }

    /// Digests a complete message.
    pub fn digest(self, message: &[u8]) -> Vec<u8> {
        let mut ctx = self.digester();
        ctx.update(message);
        ctx.finish().as_ref().to_vec()
    }

    pub fn identifier(self) -> AlgorithmIdentifier {
        AlgorithmIdentifier {
            algorithm: self.oid(),
            parameters: None,
        }
    }
}

impl TryFrom<&AlgorithmIdentifier> for DigestAlgorithm {
    type Error = CmsError;

    fn try_from(v: &AlgorithmIdentifier) -> Result<Self, CmsError> {
        Self::from_oid(&v.algorithm)
    }
}

/// An algorithm used to digitally sign content.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureAlgorithm {
    Sha1Rsa,
    Sha256Rsa,
    Sha384Rsa,
    Sha512Rsa,
    /// Bare `rsaEncryption`. The digest half of the cross-lookup supplies
    /// the hash; this is what JAR signature blocks conventionally use.
    RsaesPkcsV15,
    EcdsaSha256,
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn oid(self) -> Oid {
        match self {
            Self::Sha1Rsa => oids::OID_SHA1_RSA.clone(),
            Self::Sha256Rsa => oids::OID_SHA256_RSA.clone(),
            Self::Sha384Rsa => oids::OID_SHA384_RSA.clone(),
            Self::Sha512Rsa => oids::OID_SHA512_RSA.clone(),
            Self::RsaesPkcsV15 => oids::OID_RSA_ENCRYPTION.clone(),
            Self::EcdsaSha256 => oids::OID_ECDSA_SHA256.clone(),
            Self::Ed25519 => oids::OID_ED25519.clone(),
        }
    }

    pub fn from_oid(oid: &Oid) -> Result<Self, CmsError> {
        if oid == &*oids::OID_SHA1_RSA {
            Ok(Self::Sha1Rsa)
        } else if oid == &*oids::OID_SHA256_RSA {
            Ok(Self::Sha256Rsa)
        } else if oid == &*oids::OID_SHA384_RSA {
            Ok(Self::Sha384Rsa)
        } else if oid == &*oids::OID_SHA512_RSA {
            Ok(Self::Sha512Rsa)
        } else if oid == &*oids::OID_RSA_ENCRYPTION {
            Ok(Self::RsaesPkcsV15)
        } else if oid == &*oids::OID_ECDSA_SHA256 {
            Ok(Self::EcdsaSha256)
        } else if oid == &*oids::OID_ED25519 {
            Ok(Self::Ed25519)
        } else {
            Err(CmsError::AlgorithmUnavailable(format!(
                "signature OID {}",
                oid
            )))
        }
    }

    pub fn identifier(self) -> AlgorithmIdentifier {
        AlgorithmIdentifier {
            algorithm: self.oid(),
            parameters: None,
        }
    }

    /// Resolves the provider verification algorithm, pairing a bare RSA
    /// identifier with the signer's digest algorithm.
    pub fn verification_algorithm(
        self,
        digest: DigestAlgorithm,
    ) -> Result<&'static dyn VerificationAlgorithm, CmsError> {
        Ok(match (self, digest) {
            (Self::Sha1Rsa, _) | (Self::RsaesPkcsV15, DigestAlgorithm::Sha1) => {
                &ring::signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY
            }
            (Self::Sha256Rsa, _) | (Self::RsaesPkcsV15, DigestAlgorithm::Sha256) => {
                &ring::signature::RSA_PKCS1_2048_8192_SHA256
            }
            (Self::Sha384Rsa, _) | (Self::RsaesPkcsV15, DigestAlgorithm::Sha384) => {
                &ring::signature::RSA_PKCS1_2048_8192_SHA384
            }
            (Self::Sha512Rsa, _) | (Self::RsaesPkcsV15, DigestAlgorithm::Sha512) => {
                &ring::signature::RSA_PKCS1_2048_8192_SHA512
            }
            (Self::EcdsaSha256, DigestAlgorithm::Sha256) => &ring::signature::ECDSA_P256_SHA256_ASN1,
            (Self::Ed25519, _) => &ring::signature::ED25519,
            (alg, digest) => {
                return Err(CmsError::AlgorithmUnavailable(format!(
                    "{:?} with digest {:?}",
                    alg, digest
                )))
            }
        })
    }
}

impl TryFrom<&AlgorithmIdentifier> for SignatureAlgorithm {
    type Error = CmsError;

    fn try_from(v: &AlgorithmIdentifier) -> Result<Self, CmsError> {
        Self::from_oid(&v.algorithm)
    }
}

/// The key algorithm of an identity, used to name JAR signature block
/// files.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    Ed25519,
}

/// A private key capable of producing signatures.
///
/// This wraps the provider's key pair types; the raw key material lives
/// inside the provider and is not retrievable from here.
#[derive(Debug)]
pub enum SigningKey {
    Rsa(RsaKeyPair),
    Ecdsa(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
}

impl SigningKey {
    /// Loads a key from PKCS#8 DER, trying RSA, ECDSA P-256 and Ed25519
    /// in that order.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CmsError> {
        if let Ok(key) = RsaKeyPair::from_pkcs8(der) {
            return Ok(Self::Rsa(key));
        }
        if let Ok(key) =
            EcdsaKeyPair::from_pkcs8(&ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING, der)
        {
            return Ok(Self::Ecdsa(key));
        }
        if let Ok(key) = Ed25519KeyPair::from_pkcs8(der) {
            return Ok(Self::Ed25519(key));
        }
        Err(CmsError::KeyMaterialUnavailable(
            "private key is not RSA, ECDSA P-256 or Ed25519 PKCS#8".into(),
        ))
    }

    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::Rsa(_) => KeyAlgorithm::Rsa,
            Self::Ecdsa(_) => KeyAlgorithm::Ec,
            Self::Ed25519(_) => KeyAlgorithm::Ed25519,
        }
    }

    /// The signature algorithm this key produces when paired with a
    /// digest algorithm.
    pub fn signature_algorithm(
        &self,
        digest: DigestAlgorithm,
    ) -> Result<SignatureAlgorithm, CmsError> {
        match (self, digest) {
            (Self::Rsa(_), _) => Ok(SignatureAlgorithm::RsaesPkcsV15),
            (Self::Ecdsa(_), DigestAlgorithm::Sha256) => Ok(SignatureAlgorithm::EcdsaSha256),
            (Self::Ed25519(_), _) => Ok(SignatureAlgorithm::Ed25519),
            (key, digest) => Err(CmsError::AlgorithmUnavailable(format!(
                "{:?} key with digest {:?}",
                key.key_algorithm(),
                digest
            ))),
        }
    }

    /// Signs a message. The provider hashes the message itself with the
    /// digest the signature algorithm implies.
    pub fn sign(&self, digest: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>, CmsError> {
        match self {
            Self::Rsa(key) => {
                let padding: &'static dyn ring::signature::RsaEncoding = match digest {
                    DigestAlgorithm::Sha1 => {
                        return Err(CmsError::AlgorithmUnavailable(
                            "RSA signing with SHA-1".into(),
                        ))
                    }
                    DigestAlgorithm::Sha256 => &ring::signature::RSA_PKCS1_SHA256,
                    DigestAlgorithm::Sha384 => &ring::signature::RSA_PKCS1_SHA384,
                    DigestAlgorithm::Sha512 => &ring::signature::RSA_PKCS1_SHA512,
                };
                let mut signature = vec![0; key.public_modulus_len()];
                key.sign(
                    padding,
                    &ring::rand::SystemRandom::new(),
                    message,
                    &mut signature,
                )
                .map_err(|_| CmsError::SignatureCreation)?;
                Ok(signature)
            }
            Self::Ecdsa(key) => {
                if digest != DigestAlgorithm::Sha256 {
                    return Err(CmsError::AlgorithmUnavailable(format!(
                        "ECDSA P-256 with digest {:?}",
                        digest
                    )));
                }
                let signature = key
                    .sign(&ring::rand::SystemRandom::new(), message)
                    .map_err(|_| CmsError::SignatureCreation)?;
                Ok(signature.as_ref().to_vec())
            }
            Self::Ed25519(key) => Ok(key.sign(message).as_ref().to_vec()),
        }
    }

    /// The public key bytes matching this private key.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            Self::Rsa(key) => key.public_key().as_ref().to_vec(),
            Self::Ecdsa(key) => key.public_key().as_ref().to_vec(),
            Self::Ed25519(key) => key.public_key().as_ref().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lookups() {
        let alg = DigestAlgorithm::from_name("sha-256").unwrap();
        assert_eq!(alg, DigestAlgorithm::Sha256);
        assert_eq!(alg.jar_name(), "SHA-256");
        assert_eq!(DigestAlgorithm::from_oid(&alg.oid()).unwrap(), alg);
        assert!(DigestAlgorithm::from_name("MD5").is_err());
    }

    #[test]
    fn signature_oid_round_trip() {
        for alg in [
            SignatureAlgorithm::Sha1Rsa,
            SignatureAlgorithm::Sha256Rsa,
            SignatureAlgorithm::RsaesPkcsV15,
            SignatureAlgorithm::EcdsaSha256,
            SignatureAlgorithm::Ed25519,
        ] {
            assert_eq!(SignatureAlgorithm::from_oid(&alg.oid()).unwrap(), alg);
        }
    }

    #[test]
    fn bare_rsa_pairs_with_digest() {
        assert!(SignatureAlgorithm::RsaesPkcsV15
            .verification_algorithm(DigestAlgorithm::Sha256)
            .is_ok());
        assert!(SignatureAlgorithm::EcdsaSha256
            .verification_algorithm(DigestAlgorithm::Sha512)
            .is_err());
    }

    #[test]
    fn sha256_digest_value() {
        assert_eq!(
            hex::encode(DigestAlgorithm::Sha256.digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
