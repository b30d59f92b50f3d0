// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    pkcs7::{timestamp::TimeStampError, CmsError},
    std::path::PathBuf,
    thiserror::Error,
};

/// The stage of the signing pipeline an error surfaced in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Reading or rewriting the archive.
    Archive,
    /// Computing manifest or signature-file digests.
    Digest,
    /// Producing the CMS signature.
    Sign,
    /// Obtaining the RFC 3161 countersignature.
    TimeStamp,
    /// Emitting the signature block and signature file.
    BlockWrite,
}

/// Unified error type for JAR signing.
#[derive(Debug, Error)]
pub enum JarSignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("time-stamp error: {0}")]
    TimeStamp(#[from] TimeStampError),

    #[error("malformed manifest: {0}")]
    Manifest(String),

    #[error("certificate path invalid: {0}")]
    CertPathInvalid(String),

    #[error("key store error: {0}")]
    KeyStore(String),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    /// Stage and archive context wrapped around an underlying failure.
    #[error("{}: {stage:?} stage failed: {source}", archive.display())]
    Stage {
        archive: PathBuf,
        stage: Stage,
        #[source]
        source: Box<JarSignError>,
    },

    /// The driver cancelled this work item after a peer failed.
    #[error("cancelled")]
    Cancelled,
}

impl JarSignError {
    /// Wraps an error with the archive and stage it belongs to.
    pub(crate) fn at(archive: &std::path::Path, stage: Stage) -> impl FnOnce(JarSignError) -> Self {
        let archive = archive.to_path_buf();
        move |source| Self::Stage {
            archive,
            stage,
            source: Box::new(source),
        }
    }

    /// Whether the root cause is a time-stamp authority failure, which
    /// is what rotates the TSA selector between retries.
    pub fn is_tsa_failure(&self) -> bool {
        match self {
            Self::TimeStamp(_) => true,
            Self::Stage { stage, source, .. } => {
                *stage == Stage::TimeStamp || source.is_tsa_failure()
            }
            _ => false,
        }
    }
}
