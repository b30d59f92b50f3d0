// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {crate::timestamp::TimeStampError, asn1_runtime::Asn1Error, thiserror::Error};

/// Unified error type for the CMS layer.
#[derive(Debug, Error)]
pub enum CmsError {
    #[error("ASN.1 error: {0}")]
    Asn1(#[from] Asn1Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed {structure}: {reason}")]
    Malformed {
        structure: &'static str,
        reason: String,
    },

    /// An algorithm name/OID cross-lookup failed.
    #[error("algorithm unavailable: {0}")]
    AlgorithmUnavailable(String),

    /// A required attribute is missing from an attribute set.
    #[error("attribute missing: {0}")]
    AttributeMissing(&'static str),

    /// An attribute is present but does not hold what it must.
    #[error("attribute invalid: {0}")]
    AttributeInvalid(String),

    /// No SignerInfo matches the given certificate.
    #[error("no matching signer")]
    NoMatchingSigner,

    /// No certificate matches the given issuer and serial number.
    #[error("no matching certificate")]
    NoMatchingCertificate,

    /// The signed-data value has no encapsulated content to feed.
    #[error("no encapsulated content")]
    MissingContent,

    /// A signer or verifier was driven through an illegal state change.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// Signature generation failed inside the cryptographic provider.
    #[error("signature creation failed")]
    SignatureCreation,

    /// The private key was rejected by the cryptographic provider.
    #[error("key material unavailable: {0}")]
    KeyMaterialUnavailable(String),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("time-stamp protocol error: {0}")]
    TimeStamp(#[from] TimeStampError),
}

impl CmsError {
    pub(crate) fn malformed(structure: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            structure,
            reason: reason.into(),
        }
    }
}
