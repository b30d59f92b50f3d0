// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The signing and verification flows.
//!
//! Both run the same state machine (fresh, updating, finalized) and the
//! same one-step/two-step split from PKCS#7 v1.5: when there are no
//! authenticated attributes and the content type is plain Data, the
//! content feeds the signature engine directly; otherwise the content is
//! digested, the digest lands in the `message-digest` authenticated
//! attribute, and the DER of the attribute set (with its EXPLICIT SET OF
//! tag) is what gets signed.

use {
    crate::{
        algorithm::{DigestAlgorithm, SignatureAlgorithm, SigningKey},
        attributes::Attributes,
        certificate::Certificate,
        error::CmsError,
        oids,
        structures::{SignedData, SignerInfo},
    },
    asn1_runtime::{der, Asn1Value},
    bytes::Bytes,
    ring::signature::UnparsedPublicKey,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Fresh,
    Updating,
    Finalized,
}

enum Engine {
    /// Content bytes feed the signature primitive directly.
    OneStep { buffer: Vec<u8> },
    /// Content bytes feed a digest; the attribute set is what is signed.
    TwoStep { context: ring::digest::Context },
}

impl Engine {
    fn consume(&mut self, data: &[u8]) {
        match self {
            Self::OneStep { buffer } => buffer.extend_from_slice(data),
            Self::TwoStep { context } => context.update(data),
        }
    }
}

fn one_step(attributes: &Option<Attributes>, content_type: &asn1_runtime::Oid) -> bool {
    attributes.as_ref().map_or(true, Attributes::is_empty) && content_type == &*oids::OID_DATA
}

/// Produces one SignerInfo's signature over a SignedData target.
pub struct Signer<'a> {
    signed_data: &'a mut SignedData,
    signer_info: SignerInfo,
    key: &'a SigningKey,
    digest: DigestAlgorithm,
    engine: Engine,
    state: State,
}

impl<'a> Signer<'a> {
    /// Prepares a signer for a target and a prepared SignerInfo.
    ///
    /// The algorithm cross-lookups happen here; in two-step mode the
    /// `content-type` attribute is verified or synthesized and
    /// `message-digest` must not be present yet.
    pub fn new(
        signed_data: &'a mut SignedData,
        mut signer_info: SignerInfo,
        key: &'a SigningKey,
    ) -> Result<Self, CmsError> {
        let digest = DigestAlgorithm::try_from(&signer_info.digest_algorithm)?;
        SignatureAlgorithm::try_from(&signer_info.signature_algorithm)?;
        // The key must be able to produce signatures with this digest.
        key.signature_algorithm(digest)?;

        let content_type = signed_data.content_info.content_type.clone();
        let engine = if one_step(&signer_info.signed_attributes, &content_type) {
            Engine::OneStep { buffer: Vec::new() }
        } else {
            let attributes = signer_info
                .signed_attributes
                .get_or_insert_with(Attributes::new);
            let declared = attributes
                .single_value(&oids::OID_CONTENT_TYPE)
                .map(|value| value.as_oid() == Some(&content_type));
            match declared {
                Some(true) => {}
                Some(false) => {
                    return Err(CmsError::AttributeInvalid(
                        "content-type attribute does not match the target content type".into(),
                    ))
                }
                None => attributes.add(
                    oids::OID_CONTENT_TYPE.clone(),
                    Asn1Value::oid(content_type.clone()),
                ),
            }
            if attributes.contains(&oids::OID_MESSAGE_DIGEST) {
                return Err(CmsError::AttributeInvalid(
                    "message-digest must be absent before signing".into(),
                ));
            }
            Engine::TwoStep {
                context: digest.digester(),
            }
        };

        Ok(Self {
            signed_data,
            signer_info,
            key,
            digest,
            engine,
            state: State::Fresh,
        })
    }

    /// Feeds raw bytes to the active engine.
    pub fn update(&mut self, data: &[u8]) -> Result<(), CmsError> {
        if self.state == State::Finalized {
            return Err(CmsError::IllegalState("update after sign"));
        }
        self.state = State::Updating;
        self.engine.consume(data);
        Ok(())
    }

    /// Feeds the target's embedded content, content octets only.
    ///
    /// Per PKCS#7 v1.5 the identifier and length octets of the content
    /// value do not participate, so the content is re-encoded with its
    /// header omitted rather than mutating the value's tagging.
    pub fn update_content(&mut self) -> Result<(), CmsError> {
        let content = self
            .signed_data
            .content_info
            .content
            .as_ref()
            .ok_or(CmsError::MissingContent)?;
        let bytes = der::encode_content_only(content)?;
        self.update(&bytes)
    }

    /// Finalizes the signature and registers the SignerInfo.
    pub fn sign(&mut self) -> Result<(), CmsError> {
        if self.state != State::Updating {
            return Err(CmsError::IllegalState(match self.state {
                State::Fresh => "sign before any update",
                _ => "sign after sign",
            }));
        }

        let message = match &self.engine {
            Engine::TwoStep { context } => {
                let digest_value = context.clone().finish();
                let attributes = self
                    .signer_info
                    .signed_attributes
                    .as_mut()
                    .ok_or(CmsError::IllegalState("two-step signer lost its attributes"))?;
                attributes.add(
                    oids::OID_MESSAGE_DIGEST.clone(),
                    Asn1Value::octet_string(Bytes::copy_from_slice(digest_value.as_ref())),
                );
                attributes.explicit_der()?
            }
            Engine::OneStep { buffer } => buffer.clone(),
        };

        let signature = self.key.sign(self.digest, &message)?;
        self.signer_info.signature = Bytes::from(signature);
        self.signed_data.add_signer_info(self.signer_info.clone());
        self.state = State::Finalized;
        Ok(())
    }

    /// The SignerInfo as registered, available after [`Signer::sign`].
    pub fn signer_info(&self) -> &SignerInfo {
        &self.signer_info
    }
}

/// Verifies one SignerInfo of a SignedData target.
pub struct Verifier<'a> {
    signed_data: &'a SignedData,
    signer_info: &'a SignerInfo,
    certificate: Certificate,
    digest: DigestAlgorithm,
    engine: Engine,
    state: State,
}

impl<'a> Verifier<'a> {
    /// Resolves the SignerInfo/certificate pairing.
    ///
    /// When both are supplied they must agree on issuer and serial; when
    /// either is missing it is located through the SignedData.
    pub fn new(
        signed_data: &'a SignedData,
        signer_info: Option<&'a SignerInfo>,
        certificate: Option<&Certificate>,
    ) -> Result<Self, CmsError> {
        let signer_info = match (signer_info, certificate) {
            (Some(signer), Some(certificate)) => {
                if !signer.matches_certificate(certificate) {
                    return Err(CmsError::NoMatchingSigner);
                }
                signer
            }
            (Some(signer), None) => signer,
            (None, Some(certificate)) => signed_data
                .signer_for_certificate(certificate)
                .ok_or(CmsError::NoMatchingSigner)?,
            (None, None) => signed_data
                .signer_infos()
                .first()
                .ok_or(CmsError::NoMatchingSigner)?,
        };

        let certificate = match certificate {
            Some(certificate) => certificate.clone(),
            None => signed_data
                .find_certificate(&signer_info.sid.issuer, &signer_info.sid.serial_number)
                .ok_or(CmsError::NoMatchingCertificate)?
                .clone(),
        };

        let digest = DigestAlgorithm::try_from(&signer_info.digest_algorithm)?;
        let engine = if one_step(
            &signer_info.signed_attributes,
            &signed_data.content_info.content_type,
        ) {
            Engine::OneStep { buffer: Vec::new() }
        } else {
            Engine::TwoStep {
                context: digest.digester(),
            }
        };

        Ok(Self {
            signed_data,
            signer_info,
            certificate,
            digest,
            engine,
            state: State::Fresh,
        })
    }

    pub fn update(&mut self, data: &[u8]) -> Result<(), CmsError> {
        if self.state == State::Finalized {
            return Err(CmsError::IllegalState("update after verify"));
        }
        self.state = State::Updating;
        self.engine.consume(data);
        Ok(())
    }

    /// Feeds the target's embedded content, content octets only.
    pub fn update_content(&mut self) -> Result<(), CmsError> {
        let content = self
            .signed_data
            .content_info
            .content
            .as_ref()
            .ok_or(CmsError::MissingContent)?;
        let bytes = der::encode_content_only(content)?;
        self.update(&bytes)
    }

    /// Completes verification.
    ///
    /// Returns the verifying certificate on success and `None` when the
    /// signature or the authenticated attributes do not check out;
    /// structural attribute defects are an invalid signature, not an
    /// error. Only algorithm-availability problems are errors.
    pub fn verify(&mut self) -> Result<Option<Certificate>, CmsError> {
        if self.state != State::Updating {
            return Err(CmsError::IllegalState(match self.state {
                State::Fresh => "verify before any update",
                _ => "verify after verify",
            }));
        }
        self.state = State::Finalized;

        let message = match &self.engine {
            Engine::TwoStep { context } => {
                let attributes = match &self.signer_info.signed_attributes {
                    Some(attributes) => attributes,
                    None => return Ok(None),
                };
                match attributes.single_value(&oids::OID_CONTENT_TYPE) {
                    Some(value)
                        if value.as_oid()
                            == Some(&self.signed_data.content_info.content_type) => {}
                    _ => return Ok(None),
                }
                let wanted = match attributes
                    .single_value(&oids::OID_MESSAGE_DIGEST)
                    .and_then(Asn1Value::as_octets)
                {
                    Some(wanted) => wanted,
                    None => return Ok(None),
                };
                let computed = context.clone().finish();
                if wanted.as_ref() != computed.as_ref() {
                    return Ok(None);
                }
                attributes.explicit_der()?
            }
            Engine::OneStep { buffer } => buffer.clone(),
        };

        let signature_algorithm = SignatureAlgorithm::try_from(&self.signer_info.signature_algorithm)?;
        let verification = signature_algorithm.verification_algorithm(self.digest)?;
        let public_key = UnparsedPublicKey::new(verification, self.certificate.public_key().clone());

        Ok(match public_key.verify(&message, &self.signer_info.signature) {
            Ok(()) => Some(self.certificate.clone()),
            Err(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::certificate::testdata,
        asn1_runtime::Time,
        bytes::Bytes,
    };

    fn signed_payload(content: &[u8], with_attributes: bool) -> SignedData {
        let key = testdata::signing_key();
        let certificate = testdata::certificate();

        let mut signed_data = SignedData::new();
        signed_data.set_content_data(Bytes::copy_from_slice(content));
        signed_data.add_certificate(certificate.clone());

        let mut signer_info = SignerInfo::new(
            &certificate,
            DigestAlgorithm::Sha256,
            SignatureAlgorithm::RsaesPkcsV15,
        );
        if with_attributes {
            signer_info.set_signing_time(Time::utc_now());
        }

        let mut signer = Signer::new(&mut signed_data, signer_info, &key).unwrap();
        signer.update_content().unwrap();
        signer.sign().unwrap();
        signed_data
    }

    #[test]
    fn one_step_round_trip() {
        let signed_data = signed_payload(b"plain data content", false);
        let signer = &signed_data.signer_infos()[0];
        assert!(signer.signed_attributes.is_none());

        let der = signed_data.to_der().unwrap();
        let parsed = SignedData::parse_der(&der).unwrap();
        let mut verifier = Verifier::new(&parsed, None, None).unwrap();
        verifier.update_content().unwrap();
        let certificate = verifier.verify().unwrap().expect("signature is valid");
        assert_eq!(certificate, testdata::certificate());
    }

    #[test]
    fn two_step_synthesizes_required_attributes() {
        let signed_data = signed_payload(b"attribute-protected content", true);
        let attributes = signed_data.signer_infos()[0]
            .signed_attributes
            .as_ref()
            .unwrap();
        assert!(attributes.contains(&oids::OID_CONTENT_TYPE));
        assert!(attributes.contains(&oids::OID_MESSAGE_DIGEST));
        assert!(attributes.contains(&oids::OID_SIGNING_TIME));

        let der = signed_data.to_der().unwrap();
        let parsed = SignedData::parse_der(&der).unwrap();
        let mut verifier = Verifier::new(&parsed, None, None).unwrap();
        verifier.update_content().unwrap();
        assert!(verifier.verify().unwrap().is_some());
    }

    #[test]
    fn tampered_content_is_invalid_not_an_error() {
        let mut signed_data = signed_payload(b"original", true);
        signed_data.set_content_data(Bytes::from_static(b"tampered"));

        let mut verifier = Verifier::new(&signed_data, None, None).unwrap();
        verifier.update_content().unwrap();
        assert!(verifier.verify().unwrap().is_none());
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let signed_data = signed_payload(b"payload", false);
        let der = signed_data.to_der().unwrap();
        let mut parsed = SignedData::parse_der(&der).unwrap();
        // Corrupt the signature through a rebuilt SignerInfo.
        let mut bad = parsed.signer_infos()[0].clone();
        let mut bytes = bad.signature.to_vec();
        bytes[0] ^= 0xff;
        bad.signature = Bytes::from(bytes);
        parsed = {
            let mut rebuilt = SignedData::new();
            rebuilt.set_content_data(parsed.signed_content().unwrap().clone());
            for certificate in parsed.certificates() {
                rebuilt.add_certificate(certificate.clone());
            }
            rebuilt.add_signer_info(bad);
            rebuilt
        };

        let mut verifier = Verifier::new(&parsed, None, None).unwrap();
        verifier.update_content().unwrap();
        assert!(verifier.verify().unwrap().is_none());
    }

    #[test]
    fn state_machine_is_enforced() {
        let key = testdata::signing_key();
        let certificate = testdata::certificate();
        let mut signed_data = SignedData::new();
        signed_data.set_content_data(Bytes::from_static(b"x"));

        let signer_info = SignerInfo::new(
            &certificate,
            DigestAlgorithm::Sha256,
            SignatureAlgorithm::RsaesPkcsV15,
        );
        let mut signer = Signer::new(&mut signed_data, signer_info, &key).unwrap();

        // Finish before update is illegal.
        assert!(matches!(signer.sign(), Err(CmsError::IllegalState(_))));
        signer.update(b"x").unwrap();
        signer.sign().unwrap();
        // Updating after finalization is illegal.
        assert!(matches!(signer.update(b"y"), Err(CmsError::IllegalState(_))));
        assert!(matches!(signer.sign(), Err(CmsError::IllegalState(_))));
    }

    #[test]
    fn message_digest_must_be_absent_before_signing() {
        let key = testdata::signing_key();
        let certificate = testdata::certificate();
        let mut signed_data = SignedData::new();
        signed_data.set_content_data(Bytes::from_static(b"x"));

        let mut signer_info = SignerInfo::new(
            &certificate,
            DigestAlgorithm::Sha256,
            SignatureAlgorithm::RsaesPkcsV15,
        );
        let mut attributes = Attributes::new();
        attributes.add(
            oids::OID_MESSAGE_DIGEST.clone(),
            Asn1Value::octet_string(Bytes::from_static(b"premature")),
        );
        signer_info.signed_attributes = Some(attributes);

        assert!(matches!(
            Signer::new(&mut signed_data, signer_info, &key),
            Err(CmsError::AttributeInvalid(_))
        ));
    }

    #[test]
    fn mismatched_certificate_pairing_is_rejected() {
        let signed_data = signed_payload(b"data", false);
        let certificate = testdata::certificate();
        let foreign = {
            // Same certificate but a different serial is enough to break
            // the pairing.
            let mut signer = signed_data.signer_infos()[0].clone();
            signer.sid.serial_number = asn1_runtime::Int::from(99i64);
            signer
        };
        assert!(matches!(
            Verifier::new(&signed_data, Some(&foreign), Some(&certificate)),
            Err(CmsError::NoMatchingSigner)
        ));
    }
}
