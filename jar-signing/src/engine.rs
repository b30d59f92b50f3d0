// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The archive signing engine: unsign, sign, verify.
//!
//! Signing digests every entry into the manifest, derives the signature
//! file from the manifest's section bytes, signs the signature file into
//! a CMS block (optionally countersigned by a time-stamp authority) and
//! rewrites the archive through a sibling temporary file so the original
//! is untouched on any failure.

use {
    crate::{
        error::{JarSignError, Stage},
        identity::{validate_chain, Identity, TrustStore},
        manifest::Manifest,
    },
    asn1_runtime::Time,
    pkcs7::{
        oids, timestamp::TimeStampError, Certificate, ContentInfo, DigestAlgorithm, KeyAlgorithm,
        SignedData, Signer, SignerInfo, Verifier,
    },
    std::{
        io::{Read, Write},
        path::Path,
        sync::Arc,
    },
    zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter},
};

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Something that can wrap a signature value in an RFC 3161 token.
///
/// The driver implements this per attempt, binding the client to the
/// endpoint its selector chose.
pub trait Timestamper: Send + Sync {
    fn timestamp(&self, message: &[u8]) -> Result<ContentInfo, TimeStampError>;
}

/// Settings for signing one or more archives.
#[derive(Clone)]
pub struct SignOptions {
    pub identity: Arc<Identity>,
    pub digest_algorithm: DigestAlgorithm,
    /// Overrides the alias-derived signer name.
    pub signer_name: Option<String>,
    /// Adds the PKCS#9 signing-time authenticated attribute, forcing the
    /// two-step flow.
    pub include_signing_time: bool,
    pub created_by: Option<String>,
}

impl SignOptions {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            digest_algorithm: DigestAlgorithm::Sha256,
            signer_name: None,
            include_signing_time: false,
            created_by: None,
        }
    }
}

/// Upper-cases, maps anything outside `[A-Z0-9_-]` to `_` and truncates
/// to eight characters.
pub(crate) fn sanitize_signer_name(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            let ch = ch.to_ascii_uppercase();
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .take(8)
        .collect();
    if sanitized.is_empty() {
        "SIGNER".into()
    } else {
        sanitized
    }
}

/// Direct `META-INF/` children that belong to a signature.
fn is_signature_entry(name: &str) -> bool {
    let rest = match name.strip_prefix("META-INF/") {
        Some(rest) if !rest.contains('/') => rest.to_ascii_uppercase(),
        _ => return false,
    };
    rest.ends_with(".SF") || is_block_name(&rest)
}

fn is_block_name(upper: &str) -> bool {
    upper.ends_with(".DSA")
        || upper.ends_with(".RSA")
        || upper.ends_with(".EC")
        || upper.starts_with("SIG-")
}

/// Whether the archive carries at least one recognized signature block.
pub fn is_signed(path: &Path) -> Result<bool, JarSignError> {
    let file = std::fs::File::open(path)?;
    let archive = ZipArchive::new(file)?;
    let signed = archive.file_names().any(|name| {
        match name.strip_prefix("META-INF/") {
            Some(rest) if !rest.contains('/') => is_block_name(&rest.to_ascii_uppercase()),
            _ => false,
        }
    });
    Ok(signed)
}

fn block_extension(identity: &Identity) -> Result<&'static str, JarSignError> {
    match identity.key().key_algorithm() {
        KeyAlgorithm::Rsa => Ok("RSA"),
        KeyAlgorithm::Ec => Ok("EC"),
        KeyAlgorithm::Ed25519 => Err(JarSignError::Cms(pkcs7::CmsError::AlgorithmUnavailable(
            "no signature block extension for Ed25519 keys".into(),
        ))),
    }
}

fn read_entry(file: &mut zip::read::ZipFile) -> Result<Vec<u8>, JarSignError> {
    let mut buffer = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Digests all content entries into the manifest, creating it when the
/// archive has none.
fn digested_manifest(
    archive: &mut ZipArchive<std::fs::File>,
    digest: DigestAlgorithm,
    created_by: &str,
) -> Result<Manifest, JarSignError> {
    let mut manifest = match archive.by_name(MANIFEST_PATH) {
        Ok(mut file) => Manifest::parse(&read_entry(&mut file)?)?,
        Err(zip::result::ZipError::FileNotFound) => {
            let mut fresh = Manifest::new();
            fresh.main_mut().set("Manifest-Version", "1.0");
            fresh.main_mut().set("Created-By", created_by);
            fresh
        }
        Err(error) => return Err(error.into()),
    };

    let attribute = format!("{}-Digest", digest.jar_name());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_owned();
        if name == MANIFEST_PATH || is_signature_entry(&name) {
            continue;
        }
        let bytes = read_entry(&mut file)?;
        manifest
            .entry_mut(&name)
            .set(attribute.clone(), base64::encode(digest.digest(&bytes)));
    }
    Ok(manifest)
}

/// Builds the signature file mirroring a manifest.
fn signature_file(
    manifest: &Manifest,
    manifest_bytes: &[u8],
    digest: DigestAlgorithm,
    created_by: &str,
) -> Manifest {
    let algorithm = digest.jar_name();
    let mut sf = Manifest::new();
    sf.main_mut().set("Signature-Version", "1.0");
    sf.main_mut().set("Created-By", created_by);
    sf.main_mut().set(
        format!("{}-Digest-Manifest", algorithm),
        base64::encode(digest.digest(manifest_bytes)),
    );
    sf.main_mut().set(
        format!("{}-Digest-Manifest-Main-Attributes", algorithm),
        base64::encode(digest.digest(&manifest.main_bytes())),
    );
    for section in manifest.entries() {
        if let Some(name) = section.name() {
            sf.entry_mut(name).set(
                format!("{}-Digest", algorithm),
                base64::encode(digest.digest(&section.to_bytes())),
            );
        }
    }
    sf
}

/// Signs one archive in place.
///
/// The rewritten archive contains `META-INF/MANIFEST.MF`, the signature
/// file and the signature block followed by the original entries; the
/// rewrite lands in a sibling temporary file that replaces the original
/// only on success.
pub fn sign_jar(
    path: &Path,
    options: &SignOptions,
    timestamper: Option<&dyn Timestamper>,
) -> Result<(), JarSignError> {
    let identity = &options.identity;
    let digest = options.digest_algorithm;
    let created_by = options
        .created_by
        .clone()
        .unwrap_or_else(|| format!("{} (jar-signing)", env!("CARGO_PKG_VERSION")));

    log::info!("signing {}", path.display());

    let file = std::fs::File::open(path).map_err(JarSignError::from);
    let mut archive = file
        .and_then(|file| ZipArchive::new(file).map_err(JarSignError::from))
        .map_err(JarSignError::at(path, Stage::Archive))?;

    // Manifest and signature file.
    let manifest = digested_manifest(&mut archive, digest, &created_by)
        .map_err(JarSignError::at(path, Stage::Digest))?;
    let manifest_bytes = manifest.to_bytes();
    let signer_name = sanitize_signer_name(
        options
            .signer_name
            .as_deref()
            .unwrap_or_else(|| identity.alias()),
    );
    let sf = signature_file(&manifest, &manifest_bytes, digest, &created_by);
    let sf_bytes = sf.to_bytes();

    // CMS signature block over the signature file bytes, detached.
    let block_bytes = (|| -> Result<Vec<u8>, JarSignError> {
        let mut signed_data = SignedData::new();
        signed_data.set_external_content(oids::OID_DATA.clone());
        for certificate in identity.chain() {
            signed_data.add_certificate(certificate.clone());
        }
        let signature_algorithm = identity.key().signature_algorithm(digest)?;
        let mut signer_info = SignerInfo::new(identity.leaf()?, digest, signature_algorithm);
        if options.include_signing_time {
            signer_info.set_signing_time(Time::utc_now());
        }
        let mut signer = Signer::new(&mut signed_data, signer_info, identity.key())?;
        signer.update(&sf_bytes)?;
        signer.sign()?;

        if let Some(timestamper) = timestamper {
            let signature = signed_data
                .signer_infos()
                .last()
                .map(|signer| signer.signature.clone())
                .ok_or(pkcs7::CmsError::NoMatchingSigner)?;
            let token = timestamper
                .timestamp(&signature)
                .map_err(JarSignError::from)
                .map_err(JarSignError::at(path, Stage::TimeStamp))?;
            if let Some(signer) = signed_data.signer_infos_mut().last_mut() {
                signer.add_unsigned_attribute(
                    oids::OID_TIME_STAMP_TOKEN.clone(),
                    token.to_value(),
                );
            }
        }

        Ok(signed_data.to_der()?)
    })()
    .map_err(|error| match error {
        stage @ JarSignError::Stage { .. } => stage,
        other => JarSignError::at(path, Stage::Sign)(other),
    })?;

    // Atomic rewrite.
    (|| -> Result<(), JarSignError> {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        let temp = match parent {
            Some(parent) => tempfile::NamedTempFile::new_in(parent)?,
            None => tempfile::NamedTempFile::new()?,
        };
        let mut writer = ZipWriter::new(temp);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        writer.start_file(MANIFEST_PATH, deflated)?;
        writer.write_all(&manifest_bytes)?;
        writer.start_file(format!("META-INF/{}.SF", signer_name), deflated)?;
        writer.write_all(&sf_bytes)?;
        writer.start_file(
            format!(
                "META-INF/{}.{}",
                signer_name,
                block_extension(identity)?
            ),
            deflated,
        )?;
        writer.write_all(&block_bytes)?;

        for index in 0..archive.len() {
            let file = archive.by_index(index)?;
            let name = file.name().to_owned();
            if name == MANIFEST_PATH || is_signature_entry(&name) {
                continue;
            }
            writer.raw_copy_file(file)?;
        }

        let temp = writer.finish()?;
        temp.persist(path).map_err(|error| error.error)?;
        Ok(())
    })()
    .map_err(JarSignError::at(path, Stage::BlockWrite))?;

    log::info!("signed {} as {}", path.display(), signer_name);
    Ok(())
}

/// Removes every signature from an archive.
///
/// Signature files and blocks are dropped and the manifest loses its
/// per-entry digest attributes; emptied entry sections disappear. Other
/// attributes and their order survive.
pub fn unsign_jar(path: &Path) -> Result<(), JarSignError> {
    let file = std::fs::File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let manifest = match archive.by_name(MANIFEST_PATH) {
        Ok(mut file) => {
            let mut manifest = Manifest::parse(&read_entry(&mut file)?)?;
            let names: Vec<String> = manifest
                .entries()
                .filter_map(|section| section.name().map(str::to_owned))
                .collect();
            for name in names {
                manifest.entry_mut(&name).remove_digest_attributes();
            }
            manifest.prune_empty_entries();
            Some(manifest)
        }
        Err(zip::result::ZipError::FileNotFound) => None,
        Err(error) => return Err(error.into()),
    };

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let temp = match parent {
        Some(parent) => tempfile::NamedTempFile::new_in(parent)?,
        None => tempfile::NamedTempFile::new()?,
    };
    let mut writer = ZipWriter::new(temp);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    if let Some(manifest) = &manifest {
        writer.start_file(MANIFEST_PATH, deflated)?;
        writer.write_all(&manifest.to_bytes())?;
    }
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        let name = file.name().to_owned();
        if name == MANIFEST_PATH || is_signature_entry(&name) {
            continue;
        }
        writer.raw_copy_file(file)?;
    }

    let temp = writer.finish()?;
    temp.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Verifies the first signature of an archive.
///
/// Checks the CMS signature over the signature file, the signature
/// file's digests against the manifest and the manifest's digests
/// against the entries. With a trust store, the signer's chain must
/// also validate. Returns the signing certificate.
pub fn verify_jar(path: &Path, trust: Option<&TrustStore>) -> Result<Certificate, JarSignError> {
    let file = std::fs::File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    let sf_name = names
        .iter()
        .find(|name| {
            name.strip_prefix("META-INF/")
                .map_or(false, |rest| {
                    !rest.contains('/') && rest.to_ascii_uppercase().ends_with(".SF")
                })
        })
        .cloned()
        .ok_or_else(|| JarSignError::VerificationFailed("no signature file".into()))?;
    let base = sf_name[..sf_name.len() - 3].to_ascii_uppercase();
    let block_name = names
        .iter()
        .find(|name| {
            let upper = name.to_ascii_uppercase();
            match upper.strip_prefix("META-INF/") {
                Some(rest) if !rest.contains('/') => {
                    upper.starts_with(&base) && is_block_name(rest)
                }
                _ => false,
            }
        })
        .cloned()
        .ok_or_else(|| JarSignError::VerificationFailed("no signature block".into()))?;

    let read_by_name = |archive: &mut ZipArchive<std::fs::File>,
                        name: &str|
     -> Result<Vec<u8>, JarSignError> {
        let mut file = archive.by_name(name)?;
        read_entry(&mut file)
    };

    let manifest_bytes = read_by_name(&mut archive, MANIFEST_PATH)
        .map_err(|_| JarSignError::VerificationFailed("no manifest".into()))?;
    let sf_bytes = read_by_name(&mut archive, &sf_name)?;
    let block_bytes = read_by_name(&mut archive, &block_name)?;

    // The CMS signature over the signature file.
    let signed_data = SignedData::parse_ber(&block_bytes)?;
    let mut verifier = Verifier::new(&signed_data, None, None)?;
    verifier.update(&sf_bytes)?;
    let certificate = verifier
        .verify()?
        .ok_or_else(|| JarSignError::VerificationFailed("signature does not verify".into()))?;

    // The signature file against the manifest.
    let manifest = Manifest::parse(&manifest_bytes)?;
    let sf = Manifest::parse(&sf_bytes)?;
    let digest = sf_digest_algorithm(&sf)?;
    let algorithm = digest.jar_name();

    let manifest_ok = sf
        .main()
        .get(&format!("{}-Digest-Manifest", algorithm))
        .map_or(false, |wanted| {
            wanted == base64::encode(digest.digest(&manifest_bytes))
        });
    if !manifest_ok {
        // The whole-manifest digest can legitimately go stale; fall back
        // to the main-attribute digest plus per-section digests.
        let main_ok = sf
            .main()
            .get(&format!("{}-Digest-Manifest-Main-Attributes", algorithm))
            .map_or(false, |wanted| {
                wanted == base64::encode(digest.digest(&manifest.main_bytes()))
            });
        if !main_ok {
            return Err(JarSignError::VerificationFailed(
                "manifest digest mismatch".into(),
            ));
        }
        for section in sf.entries() {
            let name = section.name().unwrap_or_default();
            let wanted = section
                .get(&format!("{}-Digest", algorithm))
                .ok_or_else(|| {
                    JarSignError::VerificationFailed(format!(
                        "signature file entry {} has no digest",
                        name
                    ))
                })?;
            let actual = manifest
                .entry_bytes(name)
                .map(|bytes| base64::encode(digest.digest(&bytes)));
            if actual.as_deref() != Some(wanted) {
                return Err(JarSignError::VerificationFailed(format!(
                    "manifest section digest mismatch for {}",
                    name
                )));
            }
        }
    }

    // The manifest against the entries.
    for section in manifest.entries() {
        let name = match section.name() {
            Some(name) => name,
            None => continue,
        };
        let wanted = match section.get(&format!("{}-Digest", algorithm)) {
            Some(wanted) => wanted,
            None => {
                return Err(JarSignError::VerificationFailed(format!(
                    "manifest entry {} has no {} digest",
                    name, algorithm
                )))
            }
        };
        let bytes = read_by_name(&mut archive, name).map_err(|_| {
            JarSignError::VerificationFailed(format!("entry {} missing from archive", name))
        })?;
        if wanted != base64::encode(digest.digest(&bytes)) {
            return Err(JarSignError::VerificationFailed(format!(
                "digest mismatch for entry {}",
                name
            )));
        }
    }

    if let Some(trust) = trust {
        let chain = chain_from(&signed_data, &certificate);
        validate_chain(&chain, trust, chrono::Utc::now())?;
    }

    Ok(certificate)
}

fn sf_digest_algorithm(sf: &Manifest) -> Result<DigestAlgorithm, JarSignError> {
    for algorithm in [
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Sha1,
    ] {
        if sf
            .main()
            .get(&format!("{}-Digest-Manifest", algorithm.jar_name()))
            .is_some()
        {
            return Ok(algorithm);
        }
    }
    Err(JarSignError::VerificationFailed(
        "signature file names no supported digest".into(),
    ))
}

/// Orders the certificates embedded in a SignedData into the signer's
/// chain, leaf first.
fn chain_from(signed_data: &SignedData, leaf: &Certificate) -> Vec<Certificate> {
    let mut chain = vec![leaf.clone()];
    loop {
        let current = &chain[chain.len() - 1];
        if current.is_self_signed() {
            break;
        }
        let issuer = signed_data
            .certificates()
            .find(|candidate| current.is_issued_by(candidate) && !chain.contains(candidate));
        match issuer {
            Some(issuer) => chain.push(issuer.clone()),
            None => break,
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil, std::collections::BTreeMap};

    fn entry_map(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let mut map = BTreeMap::new();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index).unwrap();
            if file.is_dir() {
                continue;
            }
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).unwrap();
            map.insert(file.name().to_owned(), bytes);
        }
        map
    }

    #[test]
    fn sign_verify_unsign_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        let entries: &[(&str, &[u8])] =
            &[("a.class", &[0x00, 0x01, 0x02, 0x03]), ("res/b.txt", b"b")];
        testutil::write_jar(&jar, entries);
        let original = entry_map(&jar);

        let options = SignOptions::new(Arc::new(testutil::identity()));
        sign_jar(&jar, &options, None).unwrap();

        assert!(is_signed(&jar).unwrap());
        let signed = entry_map(&jar);
        assert!(signed.contains_key("META-INF/MANIFEST.MF"));
        assert!(signed.contains_key("META-INF/CODESIGN.SF"));
        assert!(signed.contains_key("META-INF/CODESIGN.RSA"));
        assert_eq!(signed["a.class"], [0x00, 0x01, 0x02, 0x03]);

        let certificate = verify_jar(&jar, None).unwrap();
        assert_eq!(certificate, testutil::certificate());

        // With the signer as trust anchor too.
        let trust = crate::identity::TrustStore::new(vec![testutil::certificate()]);
        verify_jar(&jar, Some(&trust)).unwrap();

        unsign_jar(&jar).unwrap();
        assert!(!is_signed(&jar).unwrap());
        let unsigned: BTreeMap<_, _> = entry_map(&jar)
            .into_iter()
            .filter(|(name, _)| name != "META-INF/MANIFEST.MF")
            .collect();
        assert_eq!(unsigned, original);
    }

    #[test]
    fn unsign_of_signed_equals_unsign_of_original() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        testutil::write_jar(&jar, &[("x.class", b"payload x"), ("y.class", b"payload y")]);

        let options = SignOptions::new(Arc::new(testutil::identity()));
        sign_jar(&jar, &options, None).unwrap();
        unsign_jar(&jar).unwrap();
        let after = entry_map(&jar);

        assert_eq!(after["x.class"], b"payload x");
        assert_eq!(after["y.class"], b"payload y");
        // The manifest survives unsigning but carries no digests.
        let manifest = Manifest::parse(&after["META-INF/MANIFEST.MF"]).unwrap();
        assert_eq!(manifest.entries().count(), 0);
        assert_eq!(manifest.main().get("Manifest-Version"), Some("1.0"));
    }

    #[test]
    fn tampered_entry_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        testutil::write_jar(&jar, &[("a.class", b"original")]);

        let options = SignOptions::new(Arc::new(testutil::identity()));
        sign_jar(&jar, &options, None).unwrap();

        // Rewrite one entry, leaving the signature alone.
        let mut entries = entry_map(&jar);
        entries.insert("a.class".into(), b"tampered".to_vec());
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
            .collect();
        testutil::write_jar(&jar, &refs);

        assert!(matches!(
            verify_jar(&jar, None),
            Err(JarSignError::VerificationFailed(_))
        ));
    }

    #[test]
    fn signing_time_produces_authenticated_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        testutil::write_jar(&jar, &[("a.class", b"content")]);

        let mut options = SignOptions::new(Arc::new(testutil::identity()));
        options.include_signing_time = true;
        sign_jar(&jar, &options, None).unwrap();

        let entries = entry_map(&jar);
        let signed_data = SignedData::parse_ber(&entries["META-INF/CODESIGN.RSA"]).unwrap();
        let attributes = signed_data.signer_infos()[0]
            .signed_attributes
            .as_ref()
            .unwrap();
        assert!(attributes.contains(&oids::OID_SIGNING_TIME));
        assert!(attributes.contains(&oids::OID_MESSAGE_DIGEST));
        assert!(attributes.contains(&oids::OID_CONTENT_TYPE));

        verify_jar(&jar, None).unwrap();
    }

    #[test]
    fn signer_name_sanitation() {
        assert_eq!(sanitize_signer_name("codesigner"), "CODESIGN");
        assert_eq!(sanitize_signer_name("my key!"), "MY_KEY_");
        assert_eq!(sanitize_signer_name("a"), "A");
        assert_eq!(sanitize_signer_name(""), "SIGNER");
    }

    #[test]
    fn resigning_a_signed_jar_replaces_the_signature() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        testutil::write_jar(&jar, &[("a.class", b"bytes")]);

        let options = SignOptions::new(Arc::new(testutil::identity()));
        sign_jar(&jar, &options, None).unwrap();
        let mut renamed = options.clone();
        renamed.signer_name = Some("second".into());
        sign_jar(&jar, &renamed, None).unwrap();

        let entries = entry_map(&jar);
        assert!(entries.contains_key("META-INF/SECOND.SF"));
        assert!(!entries.contains_key("META-INF/CODESIGN.SF"));
        verify_jar(&jar, None).unwrap();
    }

    #[test]
    fn chained_ec_identity_signs_and_validates_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        testutil::write_jar(&jar, &[("a.class", b"ec signed")]);

        let (identity, root) = testutil::chained_identity("ec-code");
        let options = SignOptions::new(Arc::new(identity));
        sign_jar(&jar, &options, None).unwrap();

        let entries = entry_map(&jar);
        assert!(entries.contains_key("META-INF/EC-CODE.EC"));

        // Both embedded certificates travel in the block.
        let signed_data = SignedData::parse_ber(&entries["META-INF/EC-CODE.EC"]).unwrap();
        assert_eq!(signed_data.certificates().count(), 2);

        let trust = crate::identity::TrustStore::new(vec![root]);
        let certificate = verify_jar(&jar, Some(&trust)).unwrap();
        assert!(!certificate.is_self_signed());

        // A trust store without the root refuses the chain.
        let (stranger, _) = testutil::issue_certificate("Elsewhere", 3, None);
        let wrong = crate::identity::TrustStore::new(vec![stranger]);
        assert!(matches!(
            verify_jar(&jar, Some(&wrong)),
            Err(JarSignError::CertPathInvalid(_))
        ));
    }

    #[test]
    fn failed_signing_leaves_the_archive_alone() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        std::fs::write(&jar, b"this is not a zip archive").unwrap();

        let options = SignOptions::new(Arc::new(testutil::identity()));
        assert!(sign_jar(&jar, &options, None).is_err());
        assert_eq!(std::fs::read(&jar).unwrap(), b"this is not a zip archive");
    }
}
