// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The PKCS#7 / CMS structures.
//!
//! Every structure is a typed wrapper that materializes to and parses
//! from [`Asn1Value`] trees. `template()` produces the skeleton driving
//! template decoding; `to_value()`/`from_value()` convert. Content slots
//! are open types resolved through a registry keyed by content-type OID,
//! so a `ContentInfo` holding `SignedData` decodes structurally without
//! the caller naming the inner type.

use {
    crate::{
        algorithm::{DigestAlgorithm, SignatureAlgorithm},
        attributes::Attributes,
        certificate::Certificate,
        error::CmsError,
        oids,
    },
    asn1_runtime::{
        der, Asn1Value, Class, Int, Oid, OidRegistry, OpenTypeResolver, RegistryToken, Tag,
    },
    bytes::Bytes,
    once_cell::sync::Lazy,
    std::sync::Arc,
};

/// Registry mapping content-type OIDs to their decode templates.
///
/// A child of the process-wide registry; hosts can register further
/// content types globally and open types here will fall through to them.
pub fn cms_registry() -> Arc<OidRegistry> {
    static REGISTRY: Lazy<Arc<OidRegistry>> = Lazy::new(|| {
        let registry = OidRegistry::new();
        let token = RegistryToken::new();
        registry.register(
            &token,
            oids::OID_DATA.clone(),
            Asn1Value::octet_string(Bytes::new()),
        );
        registry.register(&token, oids::OID_SIGNED_DATA.clone(), SignedData::template());
        registry.register(
            &token,
            oids::OID_ENVELOPED_DATA.clone(),
            EnvelopedData::template(),
        );
        // TSTInfo rides inside an OCTET STRING eContent.
        registry.register(
            &token,
            oids::OID_TST_INFO.clone(),
            Asn1Value::octet_string(Bytes::new()),
        );
        registry
    });
    REGISTRY.clone()
}

/// Open-type resolver for `ContentInfo.content`, deferring the registry
/// lookup to decode time.
struct ContentResolver;

impl OpenTypeResolver for ContentResolver {
    fn resolve(&self, oid: Option<&Oid>) -> Option<Asn1Value> {
        oid.and_then(|oid| cms_registry().resolve(oid))
    }
}

fn oid_slot() -> Asn1Value {
    Asn1Value::oid(oids::OID_DATA.clone())
}

/// Strips the open-type / CHOICE wrapper a decoded slot may carry.
pub(crate) fn unwrap_any(value: &Asn1Value) -> &Asn1Value {
    value.selected().unwrap_or(value)
}

/// Positional cursor over the decoded children of a constructed value.
pub(crate) struct Fields<'a> {
    items: std::iter::Peekable<std::slice::Iter<'a, Asn1Value>>,
    what: &'static str,
}

impl<'a> Fields<'a> {
    pub(crate) fn of(value: &'a Asn1Value, what: &'static str) -> Result<Self, CmsError> {
        Ok(Self {
            items: value
                .children()
                .ok_or_else(|| CmsError::malformed(what, "not a constructed value"))?
                .iter()
                .peekable(),
            what,
        })
    }

    pub(crate) fn required(&mut self, field: &'static str) -> Result<&'a Asn1Value, CmsError> {
        let what = self.what;
        self.items.next().ok_or_else(move || CmsError::Malformed {
            structure: what,
            reason: format!("missing {}", field),
        })
    }

    /// Consumes the next child if it carries the context tag.
    pub(crate) fn optional_context(&mut self, tag: u32) -> Option<&'a Asn1Value> {
        let hit = self
            .items
            .peek()
            .map_or(false, |v| v.identifier() == Some((Class::Context, Tag(tag))));
        if hit {
            self.items.next()
        } else {
            None
        }
    }

    pub(crate) fn next(&mut self) -> Option<&'a Asn1Value> {
        self.items.next()
    }
}

/// AlgorithmIdentifier.
///
/// ```ASN.1
/// AlgorithmIdentifier ::= SEQUENCE {
///   algorithm OBJECT IDENTIFIER,
///   parameters ANY DEFINED BY algorithm OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlgorithmIdentifier {
    pub algorithm: Oid,
    pub parameters: Option<Asn1Value>,
}

impl AlgorithmIdentifier {
    pub fn new(algorithm: Oid) -> Self {
        Self {
            algorithm,
            parameters: None,
        }
    }

    pub(crate) fn template() -> Asn1Value {
        Asn1Value::sequence(vec![oid_slot(), Asn1Value::any().into_optional()])
    }

    pub(crate) fn to_value(&self) -> Asn1Value {
        let mut fields = vec![Asn1Value::oid(self.algorithm.clone())];
        if let Some(parameters) = &self.parameters {
            fields.push(parameters.clone());
        }
        Asn1Value::sequence(fields)
    }

    pub(crate) fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "AlgorithmIdentifier")?;
        let algorithm = fields
            .required("algorithm")?
            .as_oid()
            .ok_or_else(|| CmsError::malformed("AlgorithmIdentifier", "algorithm is not an OID"))?
            .clone();
        let parameters = fields.next().map(|slot| unwrap_any(slot).clone());
        Ok(Self {
            algorithm,
            parameters,
        })
    }
}

/// ContentInfo.
///
/// ```ASN.1
/// ContentInfo ::= SEQUENCE {
///   contentType ContentType,
///   content [0] EXPLICIT ANY DEFINED BY contentType OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContentInfo {
    pub content_type: Oid,
    /// The inner value of the `[0]` wrapper, already resolved.
    pub content: Option<Asn1Value>,
}

impl ContentInfo {
    /// Data content embedding the given octets.
    pub fn data(content: impl Into<Bytes>) -> Self {
        Self {
            content_type: oids::OID_DATA.clone(),
            content: Some(Asn1Value::octet_string(content.into())),
        }
    }

    /// An external content declaration: the type is named, the content
    /// octets travel elsewhere.
    pub fn external(content_type: Oid) -> Self {
        Self {
            content_type,
            content: None,
        }
    }

    pub fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            oid_slot(),
            Asn1Value::tagged(0, Asn1Value::open_type(Arc::new(ContentResolver))).into_optional(),
        ])
    }

    pub fn to_value(&self) -> Asn1Value {
        let mut fields = vec![Asn1Value::oid(self.content_type.clone())];
        if let Some(content) = &self.content {
            fields.push(Asn1Value::tagged(0, content.clone()));
        }
        Asn1Value::sequence(fields)
    }

    pub fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "ContentInfo")?;
        let content_type = fields
            .required("contentType")?
            .as_oid()
            .ok_or_else(|| CmsError::malformed("ContentInfo", "contentType is not an OID"))?
            .clone();
        let content = fields
            .optional_context(0)
            .and_then(Asn1Value::tagged_inner)
            .map(|inner| unwrap_any(inner).clone());
        Ok(Self {
            content_type,
            content,
        })
    }

    pub fn parse_ber(data: &[u8]) -> Result<Self, CmsError> {
        Self::from_value(&asn1_runtime::decode_ber(data, &Self::template())?)
    }

    pub fn parse_der(data: &[u8]) -> Result<Self, CmsError> {
        Self::from_value(&asn1_runtime::decode_der(data, &Self::template())?)
    }

    pub fn to_der(&self) -> Result<Vec<u8>, CmsError> {
        Ok(der::encode(&self.to_value())?)
    }

    /// The embedded octets, when the content is a Data-style OCTET
    /// STRING.
    pub fn content_octets(&self) -> Option<&Bytes> {
        self.content.as_ref().and_then(Asn1Value::as_octets)
    }
}

/// IssuerAndSerialNumber.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IssuerAndSerialNumber {
    /// The issuer Name, kept as an undecoded DER subtree.
    pub issuer: Asn1Value,
    pub serial_number: Int,
}

impl IssuerAndSerialNumber {
    pub(crate) fn name_slot() -> Asn1Value {
        Asn1Value::opaque(Tag::SEQUENCE, true, Bytes::new())
    }

    pub(crate) fn template() -> Asn1Value {
        Asn1Value::sequence(vec![Self::name_slot(), Asn1Value::integer(0)])
    }

    pub(crate) fn to_value(&self) -> Asn1Value {
        Asn1Value::sequence(vec![
            self.issuer.clone(),
            Asn1Value::integer(self.serial_number.clone()),
        ])
    }

    pub(crate) fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "IssuerAndSerialNumber")?;
        let issuer = fields.required("issuer")?.clone();
        let serial_number = fields
            .required("serialNumber")?
            .as_int()
            .ok_or_else(|| {
                CmsError::malformed("IssuerAndSerialNumber", "serialNumber is not an INTEGER")
            })?
            .clone();
        Ok(Self {
            issuer,
            serial_number,
        })
    }
}

/// SignerInfo.
///
/// ```ASN.1
/// SignerInfo ::= SEQUENCE {
///   version Version,
///   issuerAndSerialNumber IssuerAndSerialNumber,
///   digestAlgorithm DigestAlgorithmIdentifier,
///   authenticatedAttributes [0] IMPLICIT Attributes OPTIONAL,
///   digestEncryptionAlgorithm DigestEncryptionAlgorithmIdentifier,
///   encryptedDigest EncryptedDigest,
///   unauthenticatedAttributes [1] IMPLICIT Attributes OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignerInfo {
    pub version: Int,
    pub sid: IssuerAndSerialNumber,
    pub digest_algorithm: AlgorithmIdentifier,
    pub signed_attributes: Option<Attributes>,
    pub signature_algorithm: AlgorithmIdentifier,
    pub signature: Bytes,
    pub unsigned_attributes: Option<Attributes>,
}

impl SignerInfo {
    /// A prepared, unsigned SignerInfo for a certificate.
    pub fn new(
        certificate: &Certificate,
        digest: DigestAlgorithm,
        signature: SignatureAlgorithm,
    ) -> Self {
        Self {
            version: Int::from(1i64),
            sid: IssuerAndSerialNumber {
                issuer: certificate.issuer().clone(),
                serial_number: certificate.serial_number().clone(),
            },
            digest_algorithm: digest.identifier(),
            signed_attributes: None,
            signature_algorithm: signature.identifier(),
            signature: Bytes::new(),
            unsigned_attributes: None,
        }
    }

    pub fn matches_certificate(&self, certificate: &Certificate) -> bool {
        &self.sid.issuer == certificate.issuer()
            && &self.sid.serial_number == certificate.serial_number()
    }

    /// Adds an unsigned attribute value.
    pub fn add_unsigned_attribute(&mut self, oid: Oid, value: Asn1Value) {
        self.unsigned_attributes
            .get_or_insert_with(Attributes::new)
            .add(oid, value);
    }

    /// Adds the optional PKCS#9 signing-time authenticated attribute.
    ///
    /// Doing so forces the two-step signing flow.
    pub fn set_signing_time(&mut self, time: asn1_runtime::Time) {
        self.signed_attributes
            .get_or_insert_with(Attributes::new)
            .add(oids::OID_SIGNING_TIME.clone(), Asn1Value::time(time));
    }

    pub(crate) fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            IssuerAndSerialNumber::template(),
            AlgorithmIdentifier::template(),
            Attributes::template().implicit(0).into_optional(),
            AlgorithmIdentifier::template(),
            Asn1Value::octet_string(Bytes::new()),
            Attributes::template().implicit(1).into_optional(),
        ])
    }

    pub(crate) fn to_value(&self) -> Asn1Value {
        let mut fields = vec![
            Asn1Value::integer(self.version.clone()),
            self.sid.to_value(),
            self.digest_algorithm.to_value(),
        ];
        if let Some(attrs) = &self.signed_attributes {
            fields.push(attrs.to_value().implicit(0));
        }
        fields.push(self.signature_algorithm.to_value());
        fields.push(Asn1Value::octet_string(self.signature.clone()));
        if let Some(attrs) = &self.unsigned_attributes {
            fields.push(attrs.to_value().implicit(1));
        }
        Asn1Value::sequence(fields)
    }

    pub(crate) fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "SignerInfo")?;
        let version = fields
            .required("version")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("SignerInfo", "version is not an INTEGER"))?
            .clone();
        let sid = IssuerAndSerialNumber::from_value(fields.required("issuerAndSerialNumber")?)?;
        let digest_algorithm = AlgorithmIdentifier::from_value(fields.required("digestAlgorithm")?)?;
        let signed_attributes = fields
            .optional_context(0)
            .map(Attributes::from_value)
            .transpose()?;
        let signature_algorithm =
            AlgorithmIdentifier::from_value(fields.required("digestEncryptionAlgorithm")?)?;
        let signature = fields
            .required("encryptedDigest")?
            .as_octets()
            .ok_or_else(|| {
                CmsError::malformed("SignerInfo", "encryptedDigest is not an OCTET STRING")
            })?
            .clone();
        let unsigned_attributes = fields
            .optional_context(1)
            .map(Attributes::from_value)
            .transpose()?;
        Ok(Self {
            version,
            sid,
            digest_algorithm,
            signed_attributes,
            signature_algorithm,
            signature,
            unsigned_attributes,
        })
    }
}

/// SignedData, with the operations the signing flows need.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedData {
    pub version: Int,
    digest_algorithms: Vec<AlgorithmIdentifier>,
    pub content_info: ContentInfo,
    certificates: Vec<Certificate>,
    crls: Vec<Asn1Value>,
    signer_infos: Vec<SignerInfo>,
}

impl Default for SignedData {
    fn default() -> Self {
        Self {
            version: Int::from(1i64),
            digest_algorithms: Vec::new(),
            content_info: ContentInfo::external(oids::OID_DATA.clone()),
            certificates: Vec::new(),
            crls: Vec::new(),
            signer_infos: Vec::new(),
        }
    }
}

impl SignedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embeds Data content octets.
    pub fn set_content_data(&mut self, content: impl Into<Bytes>) {
        self.content_info = ContentInfo::data(content);
    }

    /// Declares an external content type with absent content.
    pub fn set_external_content(&mut self, content_type: Oid) {
        self.content_info = ContentInfo::external(content_type);
    }

    /// Adds a certificate, deduplicating by issuer and serial number.
    pub fn add_certificate(&mut self, certificate: Certificate) {
        let duplicate = self.certificates.iter().any(|existing| {
            existing.issuer() == certificate.issuer()
                && existing.serial_number() == certificate.serial_number()
        });
        if !duplicate {
            self.certificates.push(certificate);
        }
    }

    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Looks a certificate up by issuer and serial number.
    pub fn find_certificate(&self, issuer: &Asn1Value, serial: &Int) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|cert| cert.issuer() == issuer && cert.serial_number() == serial)
    }

    /// Finds the SignerInfo whose issuer and serial match a certificate.
    pub fn signer_for_certificate(&self, certificate: &Certificate) -> Option<&SignerInfo> {
        self.signer_infos
            .iter()
            .find(|signer| signer.matches_certificate(certificate))
    }

    /// Adds a SignerInfo, inserting its digest algorithm into the
    /// digest-algorithm set if it is new.
    pub fn add_signer_info(&mut self, signer_info: SignerInfo) {
        let oid = &signer_info.digest_algorithm.algorithm;
        if !self
            .digest_algorithms
            .iter()
            .any(|alg| &alg.algorithm == oid)
        {
            self.digest_algorithms
                .push(signer_info.digest_algorithm.clone());
        }
        self.signer_infos.push(signer_info);
    }

    pub fn digest_algorithms(&self) -> &[AlgorithmIdentifier] {
        &self.digest_algorithms
    }

    pub fn signer_infos(&self) -> &[SignerInfo] {
        &self.signer_infos
    }

    /// Mutable access to registered signers, for attaching unsigned
    /// attributes such as a time-stamp token after signing.
    pub fn signer_infos_mut(&mut self) -> &mut [SignerInfo] {
        &mut self.signer_infos
    }

    /// The embedded Data octets, if any.
    pub fn signed_content(&self) -> Option<&Bytes> {
        self.content_info.content_octets()
    }

    pub fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            Asn1Value::set_of(AlgorithmIdentifier::template()),
            ContentInfo::template(),
            Asn1Value::set_of(Certificate::embed_template())
                .implicit(0)
                .into_optional(),
            Asn1Value::set_of(Asn1Value::any()).implicit(1).into_optional(),
            Asn1Value::set_of(SignerInfo::template()),
        ])
    }

    pub fn to_value(&self) -> Asn1Value {
        let mut fields = vec![
            Asn1Value::integer(self.version.clone()),
            Asn1Value::set_of_with(
                AlgorithmIdentifier::template(),
                self.digest_algorithms
                    .iter()
                    .map(AlgorithmIdentifier::to_value)
                    .collect(),
            ),
            self.content_info.to_value(),
        ];
        if !self.certificates.is_empty() {
            fields.push(
                Asn1Value::set_of_with(
                    Certificate::embed_template(),
                    self.certificates
                        .iter()
                        .map(Certificate::embed_value)
                        .collect(),
                )
                .implicit(0),
            );
        }
        if !self.crls.is_empty() {
            fields.push(
                Asn1Value::set_of_with(
                    Asn1Value::any(),
                    self.crls.iter().map(|crl| Asn1Value::any_with(crl.clone())).collect(),
                )
                .implicit(1),
            );
        }
        fields.push(Asn1Value::set_of_with(
            SignerInfo::template(),
            self.signer_infos.iter().map(SignerInfo::to_value).collect(),
        ));
        Asn1Value::sequence(fields)
    }

    pub fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "SignedData")?;
        let version = fields
            .required("version")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("SignedData", "version is not an INTEGER"))?
            .clone();
        let digest_algorithms = fields
            .required("digestAlgorithms")?
            .children()
            .ok_or_else(|| CmsError::malformed("SignedData", "digestAlgorithms is not a SET"))?
            .iter()
            .map(AlgorithmIdentifier::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let content_info = ContentInfo::from_value(fields.required("contentInfo")?)?;
        let certificates = match fields.optional_context(0) {
            Some(set) => set
                .children()
                .ok_or_else(|| CmsError::malformed("SignedData", "certificates is not a SET"))?
                .iter()
                .map(Certificate::from_embed_value)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let crls = match fields.optional_context(1) {
            Some(set) => set
                .children()
                .ok_or_else(|| CmsError::malformed("SignedData", "crls is not a SET"))?
                .iter()
                .map(|slot| unwrap_any(slot).clone())
                .collect(),
            None => Vec::new(),
        };
        let signer_infos = fields
            .required("signerInfos")?
            .children()
            .ok_or_else(|| CmsError::malformed("SignedData", "signerInfos is not a SET"))?
            .iter()
            .map(SignerInfo::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version,
            digest_algorithms,
            content_info,
            certificates,
            crls,
            signer_infos,
        })
    }

    /// Wraps this structure in its ContentInfo envelope.
    pub fn to_content_info(&self) -> ContentInfo {
        ContentInfo {
            content_type: oids::OID_SIGNED_DATA.clone(),
            content: Some(self.to_value()),
        }
    }

    /// DER of the enveloping ContentInfo, the form signature blocks use.
    pub fn to_der(&self) -> Result<Vec<u8>, CmsError> {
        self.to_content_info().to_der()
    }

    pub fn from_content_info(content_info: &ContentInfo) -> Result<Self, CmsError> {
        if content_info.content_type != *oids::OID_SIGNED_DATA {
            return Err(CmsError::malformed(
                "ContentInfo",
                format!("content type {} is not signed-data", content_info.content_type),
            ));
        }
        let content = content_info
            .content
            .as_ref()
            .ok_or_else(|| CmsError::malformed("ContentInfo", "signed-data content is absent"))?;
        Self::from_value(content)
    }

    pub fn parse_ber(data: &[u8]) -> Result<Self, CmsError> {
        Self::from_content_info(&ContentInfo::parse_ber(data)?)
    }

    pub fn parse_der(data: &[u8]) -> Result<Self, CmsError> {
        Self::from_content_info(&ContentInfo::parse_der(data)?)
    }
}

/// EncryptedContentInfo.
///
/// ```ASN.1
/// EncryptedContentInfo ::= SEQUENCE {
///   contentType ContentType,
///   contentEncryptionAlgorithm AlgorithmIdentifier,
///   encryptedContent [0] IMPLICIT OCTET STRING OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedContentInfo {
    pub content_type: Oid,
    pub content_encryption_algorithm: AlgorithmIdentifier,
    pub encrypted_content: Option<Bytes>,
}

impl EncryptedContentInfo {
    pub(crate) fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            oid_slot(),
            AlgorithmIdentifier::template(),
            Asn1Value::octet_string(Bytes::new())
                .implicit(0)
                .into_optional(),
        ])
    }

    pub(crate) fn to_value(&self) -> Asn1Value {
        let mut fields = vec![
            Asn1Value::oid(self.content_type.clone()),
            self.content_encryption_algorithm.to_value(),
        ];
        if let Some(content) = &self.encrypted_content {
            fields.push(Asn1Value::octet_string(content.clone()).implicit(0));
        }
        Asn1Value::sequence(fields)
    }

    pub(crate) fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "EncryptedContentInfo")?;
        let content_type = fields
            .required("contentType")?
            .as_oid()
            .ok_or_else(|| {
                CmsError::malformed("EncryptedContentInfo", "contentType is not an OID")
            })?
            .clone();
        let content_encryption_algorithm =
            AlgorithmIdentifier::from_value(fields.required("contentEncryptionAlgorithm")?)?;
        let encrypted_content = fields
            .optional_context(0)
            .and_then(Asn1Value::as_octets)
            .cloned();
        Ok(Self {
            content_type,
            content_encryption_algorithm,
            encrypted_content,
        })
    }
}

/// RecipientInfo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecipientInfo {
    pub version: Int,
    pub sid: IssuerAndSerialNumber,
    pub key_encryption_algorithm: AlgorithmIdentifier,
    pub encrypted_key: Bytes,
}

impl RecipientInfo {
    pub(crate) fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            IssuerAndSerialNumber::template(),
            AlgorithmIdentifier::template(),
            Asn1Value::octet_string(Bytes::new()),
        ])
    }

    pub(crate) fn to_value(&self) -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(self.version.clone()),
            self.sid.to_value(),
            self.key_encryption_algorithm.to_value(),
            Asn1Value::octet_string(self.encrypted_key.clone()),
        ])
    }

    pub(crate) fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "RecipientInfo")?;
        let version = fields
            .required("version")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("RecipientInfo", "version is not an INTEGER"))?
            .clone();
        let sid = IssuerAndSerialNumber::from_value(fields.required("issuerAndSerialNumber")?)?;
        let key_encryption_algorithm =
            AlgorithmIdentifier::from_value(fields.required("keyEncryptionAlgorithm")?)?;
        let encrypted_key = fields
            .required("encryptedKey")?
            .as_octets()
            .ok_or_else(|| {
                CmsError::malformed("RecipientInfo", "encryptedKey is not an OCTET STRING")
            })?
            .clone();
        Ok(Self {
            version,
            sid,
            key_encryption_algorithm,
            encrypted_key,
        })
    }
}

/// EnvelopedData.
///
/// Carried for structural completeness; no flow in this workspace
/// produces or opens envelopes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvelopedData {
    pub version: Int,
    pub recipient_infos: Vec<RecipientInfo>,
    pub encrypted_content_info: EncryptedContentInfo,
}

impl EnvelopedData {
    pub fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            Asn1Value::set_of(RecipientInfo::template()),
            EncryptedContentInfo::template(),
        ])
    }

    pub fn to_value(&self) -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(self.version.clone()),
            Asn1Value::set_of_with(
                RecipientInfo::template(),
                self.recipient_infos
                    .iter()
                    .map(RecipientInfo::to_value)
                    .collect(),
            ),
            self.encrypted_content_info.to_value(),
        ])
    }

    pub fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "EnvelopedData")?;
        let version = fields
            .required("version")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("EnvelopedData", "version is not an INTEGER"))?
            .clone();
        let recipient_infos = fields
            .required("recipientInfos")?
            .children()
            .ok_or_else(|| CmsError::malformed("EnvelopedData", "recipientInfos is not a SET"))?
            .iter()
            .map(RecipientInfo::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let encrypted_content_info =
            EncryptedContentInfo::from_value(fields.required("encryptedContentInfo")?)?;
        Ok(Self {
            version,
            recipient_infos,
            encrypted_content_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::certificate::testdata};

    #[test]
    fn content_info_data_round_trip() {
        let info = ContentInfo::data(Bytes::from_static(b"payload"));
        let der = info.to_der().unwrap();
        let back = ContentInfo::parse_der(&der).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.content_octets().unwrap().as_ref(), b"payload");
    }

    #[test]
    fn external_content_omits_the_wrapper() {
        let info = ContentInfo::external(oids::OID_SIGNED_DATA.clone());
        let der = info.to_der().unwrap();
        let back = ContentInfo::parse_der(&der).unwrap();
        assert!(back.content.is_none());
    }

    #[test]
    fn signed_data_round_trip_with_certificate() {
        let certificate = testdata::certificate();
        let mut signed_data = SignedData::new();
        signed_data.set_content_data(Bytes::from_static(b"signed bytes"));
        signed_data.add_certificate(certificate.clone());
        // Deduplicated.
        signed_data.add_certificate(certificate.clone());

        let mut signer_info = SignerInfo::new(
            &certificate,
            DigestAlgorithm::Sha256,
            SignatureAlgorithm::RsaesPkcsV15,
        );
        signer_info.signature = Bytes::from_static(&[0xde, 0xad]);
        signed_data.add_signer_info(signer_info);

        assert_eq!(signed_data.digest_algorithms().len(), 1);

        let der = signed_data.to_der().unwrap();
        let back = SignedData::parse_der(&der).unwrap();

        assert_eq!(back.certificates().count(), 1);
        assert_eq!(back.signer_infos().len(), 1);
        assert_eq!(back.signed_content().unwrap().as_ref(), b"signed bytes");
        assert_eq!(
            back.find_certificate(
                certificate.issuer(),
                certificate.serial_number()
            )
            .unwrap()
            .to_der(),
            certificate.to_der()
        );
        assert!(back.signer_for_certificate(&certificate).is_some());
        assert_eq!(back, signed_data);
    }

    #[test]
    fn signer_info_attribute_slots() {
        let certificate = testdata::certificate();
        let mut signer_info = SignerInfo::new(
            &certificate,
            DigestAlgorithm::Sha256,
            SignatureAlgorithm::RsaesPkcsV15,
        );
        let mut attrs = Attributes::new();
        attrs.add(
            oids::OID_CONTENT_TYPE.clone(),
            Asn1Value::oid(oids::OID_DATA.clone()),
        );
        signer_info.signed_attributes = Some(attrs);
        signer_info.add_unsigned_attribute(
            oids::OID_TIME_STAMP_TOKEN.clone(),
            Asn1Value::octet_string(Bytes::from_static(b"tst")),
        );

        let der = der::encode(&signer_info.to_value()).unwrap();
        let decoded = asn1_runtime::decode_der(&der, &SignerInfo::template()).unwrap();
        let back = SignerInfo::from_value(&decoded).unwrap();
        assert_eq!(back, signer_info);
        assert!(back.signed_attributes.unwrap().contains(&oids::OID_CONTENT_TYPE));
    }

    #[test]
    fn enveloped_data_round_trip() {
        let certificate = testdata::certificate();
        let enveloped = EnvelopedData {
            version: Int::from(0i64),
            recipient_infos: vec![RecipientInfo {
                version: Int::from(0i64),
                sid: IssuerAndSerialNumber {
                    issuer: certificate.issuer().clone(),
                    serial_number: certificate.serial_number().clone(),
                },
                key_encryption_algorithm: AlgorithmIdentifier::new(
                    oids::OID_RSA_ENCRYPTION.clone(),
                ),
                encrypted_key: Bytes::from_static(&[0x11; 16]),
            }],
            encrypted_content_info: EncryptedContentInfo {
                content_type: oids::OID_DATA.clone(),
                content_encryption_algorithm: AlgorithmIdentifier::new(
                    oids::OID_RSA_ENCRYPTION.clone(),
                ),
                encrypted_content: Some(Bytes::from_static(&[0x22; 8])),
            },
        };
        let der = der::encode(&enveloped.to_value()).unwrap();
        let decoded = asn1_runtime::decode_der(&der, &EnvelopedData::template()).unwrap();
        assert_eq!(EnvelopedData::from_value(&decoded).unwrap(), enveloped);
    }
}
