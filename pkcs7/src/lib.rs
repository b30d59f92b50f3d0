// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PKCS#7 / CMS over the runtime ASN.1 model.

This crate composes the structures from PKCS#7 v1.5 (ContentInfo,
SignedData, SignerInfo, RecipientInfo, EnvelopedData and the PKCS#9
attribute bags) on top of `asn1-runtime`, and drives the signing and
verification flows over them:

* [`Signer`]/[`Verifier`] implement the one-step/two-step split: pure
  Data content with no authenticated attributes feeds the signature
  engine directly; anything else digests the content into the
  `message-digest` attribute and signs the DER of the attribute set.
* [`timestamp`] holds an RFC 3161 client that can wrap a signature in a
  time-stamp token, plus the endpoint selector the retry loop drives.
* [`Certificate`] carries exactly as much X.509 parsing as signing and
  chain ordering need; it is not a path builder.

Cryptographic primitives are provided by `ring` and resolved through the
[`DigestAlgorithm`]/[`SignatureAlgorithm`] cross-lookup tables; an
unknown algorithm is an error, never a fallback.
*/

pub mod oids;
pub mod timestamp;

mod algorithm;
mod attributes;
mod certificate;
mod error;
mod sign;
mod structures;

pub use {
    algorithm::{DigestAlgorithm, KeyAlgorithm, SignatureAlgorithm, SigningKey},
    attributes::{Attribute, Attributes},
    certificate::Certificate,
    error::CmsError,
    sign::{Signer, Verifier},
    structures::{
        cms_registry, AlgorithmIdentifier, ContentInfo, EncryptedContentInfo, EnvelopedData,
        IssuerAndSerialNumber, RecipientInfo, SignedData, SignerInfo,
    },
};
