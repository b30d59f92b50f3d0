// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! JAR/ZIP archive signing.

The pipeline: walk the archive's entries and digest them into the
manifest, derive the signature file from the manifest's exact section
bytes, CMS-sign the signature file into a `META-INF/<SIGNER>.<RSA|EC>`
block (optionally countersigned by an RFC 3161 authority), and rewrite
the archive atomically through a sibling temporary file.

* [`engine`]: [`sign_jar`], [`unsign_jar`], [`verify_jar`],
  [`is_signed`].
* [`Identity`] and the [`KeyStore`] surface (PKCS#12 and PEM built in);
  chains normalize to forward order and key material is zeroized on
  drop.
* [`SigningDriver`]: a bounded worker pool over independent archives,
  first-error-wins cancellation, exponential backoff between attempts
  and time-stamp authority failover through [`pkcs7::timestamp::TsaSelector`].
*/

pub mod engine;
pub mod manifest;

mod driver;
mod error;
mod identity;

#[cfg(test)]
mod testutil;

pub use {
    driver::{SigningDriver, TsaExchange},
    engine::{is_signed, sign_jar, unsign_jar, verify_jar, SignOptions, Timestamper},
    error::{JarSignError, Stage},
    identity::{
        normalize_chain, validate_chain, Identity, KeyStore, PemKeyStore, Pkcs12KeyStore, Secret,
        TrustStore,
    },
};
