// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-Stamp Protocol (RFC 3161) client.
//!
//! The wire structures encode/decode in both directions so tests can
//! stand up an in-memory authority; the production transport is blocking
//! HTTP. The client checks the response against its request: message
//! imprint always, nonce echo when one was sent, policy echo when one
//! was requested.

use {
    crate::{
        algorithm::DigestAlgorithm,
        error::CmsError,
        oids,
        structures::{AlgorithmIdentifier, ContentInfo, Fields, SignedData},
    },
    asn1_runtime::{der, Asn1Error, Asn1Value, Int, Oid, Time},
    bytes::Bytes,
    ring::rand::SecureRandom,
    std::{
        sync::Mutex,
        time::Duration,
    },
    thiserror::Error,
};

pub const HTTP_CONTENT_TYPE_REQUEST: &str = "application/timestamp-query";
pub const HTTP_CONTENT_TYPE_RESPONSE: &str = "application/timestamp-reply";

#[derive(Debug, Error)]
pub enum TimeStampError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("time-stamp request timed out")]
    Timeout,

    #[error("bad HTTP exchange: {0}")]
    Http(String),

    #[error("ASN.1 error: {0}")]
    Asn1(#[from] Asn1Error),

    #[error("malformed time-stamp response: {0}")]
    BadResponse(String),

    #[error("time-stamp request not granted: {status:?} ({fail_info:?})")]
    Rejected {
        status: PkiStatus,
        fail_info: Option<PkiFailureInfo>,
    },

    #[error("response does not echo the request nonce")]
    NonceMismatch,

    #[error("response message imprint differs from the request")]
    ImprintMismatch,

    #[error("response policy differs from the requested policy")]
    PolicyMismatch,

    #[error("error generating random nonce")]
    Random,
}

fn bad(e: CmsError) -> TimeStampError {
    TimeStampError::BadResponse(e.to_string())
}

/// MessageImprint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifier,
    pub hashed_message: Bytes,
}

impl MessageImprint {
    pub fn compute(digest: DigestAlgorithm, message: &[u8]) -> Self {
        Self {
            hash_algorithm: digest.identifier(),
            hashed_message: Bytes::from(digest.digest(message)),
        }
    }

    fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            AlgorithmIdentifier::template(),
            Asn1Value::octet_string(Bytes::new()),
        ])
    }

    fn to_value(&self) -> Asn1Value {
        Asn1Value::sequence(vec![
            self.hash_algorithm.to_value(),
            Asn1Value::octet_string(self.hashed_message.clone()),
        ])
    }

    fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "MessageImprint")?;
        let hash_algorithm = AlgorithmIdentifier::from_value(fields.required("hashAlgorithm")?)?;
        let hashed_message = fields
            .required("hashedMessage")?
            .as_octets()
            .ok_or_else(|| {
                CmsError::malformed("MessageImprint", "hashedMessage is not an OCTET STRING")
            })?
            .clone();
        Ok(Self {
            hash_algorithm,
            hashed_message,
        })
    }
}

/// TimeStampReq.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeStampRequest {
    pub version: Int,
    pub message_imprint: MessageImprint,
    pub req_policy: Option<Oid>,
    pub nonce: Option<Int>,
    pub cert_req: bool,
}

impl TimeStampRequest {
    fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            MessageImprint::template(),
            Asn1Value::oid(oids::OID_DATA.clone()).into_optional(),
            Asn1Value::integer(0).into_optional(),
            Asn1Value::boolean(false).into_optional(),
            Asn1Value::sequence_of(Asn1Value::any())
                .implicit(0)
                .into_optional(),
        ])
    }

    pub fn to_value(&self) -> Asn1Value {
        let mut fields = vec![
            Asn1Value::integer(self.version.clone()),
            self.message_imprint.to_value(),
        ];
        if let Some(policy) = &self.req_policy {
            fields.push(Asn1Value::oid(policy.clone()));
        }
        if let Some(nonce) = &self.nonce {
            fields.push(Asn1Value::integer(nonce.clone()));
        }
        // certReq DEFAULT FALSE is only emitted when set.
        if self.cert_req {
            fields.push(Asn1Value::boolean(true));
        }
        Asn1Value::sequence(fields)
    }

    pub fn to_der(&self) -> Result<Vec<u8>, TimeStampError> {
        Ok(der::encode(&self.to_value())?)
    }

    pub fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "TimeStampReq")?;
        let version = fields
            .required("version")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("TimeStampReq", "version is not an INTEGER"))?
            .clone();
        let message_imprint = MessageImprint::from_value(fields.required("messageImprint")?)?;
        let mut req_policy = None;
        let mut nonce = None;
        let mut cert_req = false;
        while let Some(field) = fields.next() {
            if let Some(oid) = field.as_oid() {
                req_policy = Some(oid.clone());
            } else if let Some(int) = field.as_int() {
                nonce = Some(int.clone());
            } else if let Some(flag) = field.as_bool() {
                cert_req = flag;
            }
        }
        Ok(Self {
            version,
            message_imprint,
            req_policy,
            nonce,
            cert_req,
        })
    }

    pub fn parse_der(data: &[u8]) -> Result<Self, CmsError> {
        Self::from_value(&asn1_runtime::decode_der(data, &Self::template())?)
    }
}

/// PKIStatus.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PkiStatus {
    Granted = 0,
    GrantedWithMods = 1,
    Rejection = 2,
    Waiting = 3,
    RevocationWarning = 4,
    RevocationNotification = 5,
}

impl PkiStatus {
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted | Self::GrantedWithMods)
    }

    fn from_int(value: &Int) -> Result<Self, CmsError> {
        match value.to_i64() {
            Some(0) => Ok(Self::Granted),
            Some(1) => Ok(Self::GrantedWithMods),
            Some(2) => Ok(Self::Rejection),
            Some(3) => Ok(Self::Waiting),
            Some(4) => Ok(Self::RevocationWarning),
            Some(5) => Ok(Self::RevocationNotification),
            _ => Err(CmsError::malformed("PKIStatusInfo", "unknown status")),
        }
    }
}

/// PKIFailureInfo named bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PkiFailureInfo {
    BadAlg = 0,
    BadRequest = 2,
    BadDataFormat = 5,
    TimeNotAvailable = 14,
    UnacceptedPolicy = 15,
    UnacceptedExtension = 16,
    AddInfoNotAvailable = 17,
    SystemFailure = 25,
}

impl PkiFailureInfo {
    fn from_bit(bit: usize) -> Option<Self> {
        match bit {
            0 => Some(Self::BadAlg),
            2 => Some(Self::BadRequest),
            5 => Some(Self::BadDataFormat),
            14 => Some(Self::TimeNotAvailable),
            15 => Some(Self::UnacceptedPolicy),
            16 => Some(Self::UnacceptedExtension),
            17 => Some(Self::AddInfoNotAvailable),
            25 => Some(Self::SystemFailure),
            _ => None,
        }
    }

    fn to_bit_string(self) -> (Bytes, u8) {
        let bit = self as usize;
        let mut bytes = vec![0u8; bit / 8 + 1];
        bytes[bit / 8] = 0x80 >> (bit % 8);
        let pad = (7 - bit % 8) as u8;
        (Bytes::from(bytes), pad)
    }

    fn first_set_bit(bits: &[u8]) -> Option<Self> {
        for (index, byte) in bits.iter().enumerate() {
            if *byte != 0 {
                let bit = index * 8 + byte.leading_zeros() as usize;
                return Self::from_bit(bit);
            }
        }
        None
    }
}

/// PKIStatusInfo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PkiStatusInfo {
    pub status: PkiStatus,
    pub status_text: Vec<String>,
    pub fail_info: Option<PkiFailureInfo>,
}

impl PkiStatusInfo {
    pub fn granted() -> Self {
        Self {
            status: PkiStatus::Granted,
            status_text: Vec::new(),
            fail_info: None,
        }
    }

    pub fn rejection(fail_info: PkiFailureInfo, text: impl Into<String>) -> Self {
        Self {
            status: PkiStatus::Rejection,
            status_text: vec![text.into()],
            fail_info: Some(fail_info),
        }
    }

    fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            Asn1Value::sequence_of(Asn1Value::utf8_string("")).into_optional(),
            Asn1Value::bit_string(Bytes::new(), 0)
                .unwrap_or_else(|_| Asn1Value::octet_string(Bytes::new()))
                .into_optional(),
        ])
    }

    fn to_value(&self) -> Asn1Value {
        let mut fields = vec![Asn1Value::integer(self.status as i64)];
        if !self.status_text.is_empty() {
            fields.push(Asn1Value::sequence_of_with(
                Asn1Value::utf8_string(""),
                self.status_text
                    .iter()
                    .map(|text| Asn1Value::utf8_string(text.clone()))
                    .collect(),
            ));
        }
        if let Some(fail_info) = self.fail_info {
            let (bits, pad) = fail_info.to_bit_string();
            if let Ok(value) = Asn1Value::bit_string(bits, pad) {
                fields.push(value);
            }
        }
        Asn1Value::sequence(fields)
    }

    fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "PKIStatusInfo")?;
        let status = PkiStatus::from_int(
            fields
                .required("status")?
                .as_int()
                .ok_or_else(|| CmsError::malformed("PKIStatusInfo", "status is not an INTEGER"))?,
        )?;
        let mut status_text = Vec::new();
        let mut fail_info = None;
        while let Some(field) = fields.next() {
            if let Some(texts) = field.children() {
                status_text = texts
                    .iter()
                    .filter_map(|text| text.as_str().map(str::to_owned))
                    .collect();
            } else if let Some((bits, _)) = field.as_bit_string() {
                fail_info = PkiFailureInfo::first_set_bit(bits);
            }
        }
        Ok(Self {
            status,
            status_text,
            fail_info,
        })
    }
}

/// TimeStampResp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeStampResponse {
    pub status: PkiStatusInfo,
    pub token: Option<ContentInfo>,
}

impl TimeStampResponse {
    fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            PkiStatusInfo::template(),
            ContentInfo::template().into_optional(),
        ])
    }

    pub fn to_value(&self) -> Asn1Value {
        let mut fields = vec![self.status.to_value()];
        if let Some(token) = &self.token {
            fields.push(token.to_value());
        }
        Asn1Value::sequence(fields)
    }

    pub fn to_der(&self) -> Result<Vec<u8>, TimeStampError> {
        Ok(der::encode(&self.to_value())?)
    }

    pub fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "TimeStampResp")?;
        let status = PkiStatusInfo::from_value(fields.required("status")?)?;
        let token = fields.next().map(ContentInfo::from_value).transpose()?;
        Ok(Self { status, token })
    }

    pub fn parse_der(data: &[u8]) -> Result<Self, CmsError> {
        Self::from_value(&asn1_runtime::decode_der(data, &Self::template())?)
    }
}

/// Accuracy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Accuracy {
    pub seconds: Option<Int>,
    pub millis: Option<Int>,
    pub micros: Option<Int>,
}

impl Accuracy {
    fn template() -> Asn1Value {
        Asn1Value::sequence(vec![
            Asn1Value::integer(0).into_optional(),
            Asn1Value::integer(0).implicit(0).into_optional(),
            Asn1Value::integer(0).implicit(1).into_optional(),
        ])
    }

    fn to_value(&self) -> Asn1Value {
        let mut fields = Vec::new();
        if let Some(seconds) = &self.seconds {
            fields.push(Asn1Value::integer(seconds.clone()));
        }
        if let Some(millis) = &self.millis {
            fields.push(Asn1Value::integer(millis.clone()).implicit(0));
        }
        if let Some(micros) = &self.micros {
            fields.push(Asn1Value::integer(micros.clone()).implicit(1));
        }
        Asn1Value::sequence(fields)
    }

    fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut accuracy = Accuracy::default();
        for field in value
            .children()
            .ok_or_else(|| CmsError::malformed("Accuracy", "not a sequence"))?
        {
            match field.identifier() {
                Some((asn1_runtime::Class::Context, asn1_runtime::Tag(0))) => {
                    accuracy.millis = field.as_int().cloned()
                }
                Some((asn1_runtime::Class::Context, asn1_runtime::Tag(1))) => {
                    accuracy.micros = field.as_int().cloned()
                }
                _ => accuracy.seconds = field.as_int().cloned(),
            }
        }
        Ok(accuracy)
    }
}

/// TSTInfo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TstInfo {
    pub version: Int,
    pub policy: Oid,
    pub message_imprint: MessageImprint,
    pub serial_number: Int,
    pub gen_time: Time,
    pub accuracy: Option<Accuracy>,
    pub ordering: bool,
    pub nonce: Option<Int>,
    /// The optional GeneralName of the authority, kept undecoded.
    pub tsa: Option<Asn1Value>,
}

impl TstInfo {
    fn template() -> Asn1Value {
        let epoch = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        Asn1Value::sequence(vec![
            Asn1Value::integer(0),
            Asn1Value::oid(oids::OID_DATA.clone()),
            MessageImprint::template(),
            Asn1Value::integer(0),
            Asn1Value::time(Time::new(asn1_runtime::TimeKind::Generalized, epoch)),
            Accuracy::template().into_optional(),
            Asn1Value::boolean(false).into_optional(),
            Asn1Value::integer(0).into_optional(),
            Asn1Value::tagged(0, Asn1Value::any()).into_optional(),
            Asn1Value::sequence_of(Asn1Value::any())
                .implicit(1)
                .into_optional(),
        ])
    }

    pub fn to_value(&self) -> Asn1Value {
        let mut fields = vec![
            Asn1Value::integer(self.version.clone()),
            Asn1Value::oid(self.policy.clone()),
            self.message_imprint.to_value(),
            Asn1Value::integer(self.serial_number.clone()),
            Asn1Value::time(self.gen_time.clone()),
        ];
        if let Some(accuracy) = &self.accuracy {
            fields.push(accuracy.to_value());
        }
        if self.ordering {
            fields.push(Asn1Value::boolean(true));
        }
        if let Some(nonce) = &self.nonce {
            fields.push(Asn1Value::integer(nonce.clone()));
        }
        if let Some(tsa) = &self.tsa {
            fields.push(Asn1Value::tagged(0, tsa.clone()));
        }
        Asn1Value::sequence(fields)
    }

    pub fn from_value(value: &Asn1Value) -> Result<Self, CmsError> {
        let mut fields = Fields::of(value, "TSTInfo")?;
        let version = fields
            .required("version")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("TSTInfo", "version is not an INTEGER"))?
            .clone();
        let policy = fields
            .required("policy")?
            .as_oid()
            .ok_or_else(|| CmsError::malformed("TSTInfo", "policy is not an OID"))?
            .clone();
        let message_imprint = MessageImprint::from_value(fields.required("messageImprint")?)?;
        let serial_number = fields
            .required("serialNumber")?
            .as_int()
            .ok_or_else(|| CmsError::malformed("TSTInfo", "serialNumber is not an INTEGER"))?
            .clone();
        let gen_time = fields
            .required("genTime")?
            .as_time()
            .ok_or_else(|| CmsError::malformed("TSTInfo", "genTime is not a GeneralizedTime"))?
            .clone();

        let mut accuracy = None;
        let mut ordering = false;
        let mut nonce = None;
        let mut tsa = None;
        while let Some(field) = fields.next() {
            match field.identifier() {
                Some((asn1_runtime::Class::Context, asn1_runtime::Tag(0))) => {
                    tsa = field
                        .tagged_inner()
                        .map(|inner| crate::structures::unwrap_any(inner).clone());
                }
                Some((asn1_runtime::Class::Context, asn1_runtime::Tag(1))) => {}
                _ => {
                    if let Some(flag) = field.as_bool() {
                        ordering = flag;
                    } else if let Some(int) = field.as_int() {
                        nonce = Some(int.clone());
                    } else if field.children().is_some() {
                        accuracy = Some(Accuracy::from_value(field)?);
                    }
                }
            }
        }

        Ok(Self {
            version,
            policy,
            message_imprint,
            serial_number,
            gen_time,
            accuracy,
            ordering,
            nonce,
            tsa,
        })
    }

    /// Extracts and parses the TSTInfo from a time-stamp token.
    pub fn from_token(token: &ContentInfo) -> Result<Self, TimeStampError> {
        let signed_data = SignedData::from_content_info(token).map_err(bad)?;
        if signed_data.content_info.content_type != *oids::OID_TST_INFO {
            return Err(TimeStampError::BadResponse(
                "token does not encapsulate TSTInfo".into(),
            ));
        }
        let octets = signed_data
            .content_info
            .content_octets()
            .ok_or_else(|| TimeStampError::BadResponse("token eContent is absent".into()))?;
        let value = asn1_runtime::decode_der(octets, &Self::template())?;
        Self::from_value(&value).map_err(bad)
    }
}

/// Transport over which DER requests and responses travel.
///
/// The production implementation is HTTP; tests install in-memory
/// authorities.
pub trait TimeStampTransport: Send + Sync {
    fn exchange(&self, url: &str, request_der: &[u8]) -> Result<Vec<u8>, TimeStampError>;
}

/// Blocking HTTP POST transport with per-request timeouts.
pub struct HttpTransport {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
        }
    }
}

fn transport_error(error: reqwest::Error) -> TimeStampError {
    if error.is_timeout() {
        TimeStampError::Timeout
    } else {
        TimeStampError::Transport(error.to_string())
    }
}

impl TimeStampTransport for HttpTransport {
    fn exchange(&self, url: &str, request_der: &[u8]) -> Result<Vec<u8>, TimeStampError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()
            .map_err(transport_error)?;

        let response = client
            .post(url)
            .header("Content-Type", HTTP_CONTENT_TYPE_REQUEST)
            .body(request_der.to_vec())
            .send()
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(TimeStampError::Http(format!(
                "status {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if content_type != HTTP_CONTENT_TYPE_RESPONSE {
            return Err(TimeStampError::Http(format!(
                "unexpected content type {:?}",
                content_type
            )));
        }
        Ok(response.bytes().map_err(transport_error)?.to_vec())
    }
}

/// RFC 3161 client: builds requests, runs the exchange, validates the
/// response against the request.
pub struct TimeStampClient<T = HttpTransport> {
    transport: T,
    digest_algorithm: DigestAlgorithm,
    policy: Option<Oid>,
    cert_req: bool,
}

impl TimeStampClient<HttpTransport> {
    pub fn new(digest_algorithm: DigestAlgorithm) -> Self {
        Self::with_transport(HttpTransport::default(), digest_algorithm)
    }

    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.transport = HttpTransport {
            connect_timeout: connect,
            read_timeout: read,
        };
        self
    }
}

impl<T: TimeStampTransport> TimeStampClient<T> {
    pub fn with_transport(transport: T, digest_algorithm: DigestAlgorithm) -> Self {
        Self {
            transport,
            digest_algorithm,
            policy: None,
            cert_req: true,
        }
    }

    pub fn policy(mut self, policy: Oid) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn cert_req(mut self, cert_req: bool) -> Self {
        self.cert_req = cert_req;
        self
    }

    /// Builds a request for a message, with a fresh random nonce.
    pub fn request_for(&self, message: &[u8]) -> Result<TimeStampRequest, TimeStampError> {
        let mut random = [0u8; 8];
        ring::rand::SystemRandom::new()
            .fill(&mut random)
            .map_err(|_| TimeStampError::Random)?;

        Ok(TimeStampRequest {
            version: Int::from(1i64),
            message_imprint: MessageImprint::compute(self.digest_algorithm, message),
            req_policy: self.policy.clone(),
            nonce: Some(Int::from_unsigned(&random)),
            cert_req: self.cert_req,
        })
    }

    /// Obtains a validated time-stamp token over `message`.
    ///
    /// The returned ContentInfo is the token exactly as it should be
    /// attached as the `signature-time-stamp-token` unsigned attribute.
    pub fn timestamp(&self, url: &str, message: &[u8]) -> Result<ContentInfo, TimeStampError> {
        let request = self.request_for(message)?;
        log::debug!("requesting time-stamp from {}", url);

        let response_der = self.transport.exchange(url, &request.to_der()?)?;
        let response = TimeStampResponse::parse_der(&response_der).map_err(bad)?;

        if !response.status.status.is_granted() {
            return Err(TimeStampError::Rejected {
                status: response.status.status,
                fail_info: response.status.fail_info,
            });
        }
        let token = response
            .token
            .ok_or_else(|| TimeStampError::BadResponse("granted without a token".into()))?;

        let tst_info = TstInfo::from_token(&token)?;
        if tst_info.message_imprint != request.message_imprint {
            return Err(TimeStampError::ImprintMismatch);
        }
        if request.nonce.is_some() && tst_info.nonce != request.nonce {
            return Err(TimeStampError::NonceMismatch);
        }
        if let Some(policy) = &request.req_policy {
            if &tst_info.policy != policy {
                return Err(TimeStampError::PolicyMismatch);
            }
        }

        log::debug!(
            "time-stamp granted, serial {}",
            tst_info.serial_number
        );
        Ok(token)
    }
}

/// Round-robin endpoint selection with per-endpoint failure counts.
///
/// The retry loop owns rotation policy: a TSA failure records against
/// the endpoint that served it and moves selection to the next one.
#[derive(Debug)]
pub struct TsaSelector {
    endpoints: Vec<String>,
    state: Mutex<SelectorState>,
}

#[derive(Debug)]
struct SelectorState {
    current: usize,
    failures: Vec<u64>,
}

impl TsaSelector {
    pub fn new(endpoints: Vec<String>) -> Self {
        let failures = vec![0; endpoints.len()];
        Self {
            endpoints,
            state: Mutex::new(SelectorState {
                current: 0,
                failures,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// The endpoint the next request should use.
    pub fn current(&self) -> Option<String> {
        let state = self.state.lock().ok()?;
        self.endpoints.get(state.current).cloned()
    }

    /// Records a failure against the current endpoint and rotates.
    pub fn record_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            if !self.endpoints.is_empty() {
                let index = state.current;
                state.failures[index] += 1;
                state.current = (index + 1) % self.endpoints.len();
                log::warn!(
                    "time-stamp authority {} failed ({} failures), rotating",
                    self.endpoints[index],
                    state.failures[index]
                );
            }
        }
    }

    pub fn failure_count(&self, endpoint: &str) -> u64 {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return 0,
        };
        self.endpoints
            .iter()
            .position(|candidate| candidate == endpoint)
            .map_or(0, |index| state.failures[index])
    }
}

#[cfg(test)]
pub(crate) mod testsupport {
    use {
        super::*,
        crate::{
            algorithm::{SignatureAlgorithm, SigningKey},
            certificate::{testdata, Certificate},
            sign::Signer,
            structures::SignerInfo,
        },
        chrono::TimeZone,
    };

    /// In-memory authority that signs well-formed tokens with the test
    /// key.
    pub(crate) struct TestAuthority {
        pub grant: bool,
        /// Overrides the echoed nonce, for mismatch tests.
        pub forge_nonce: Option<Int>,
    }

    impl TestAuthority {
        pub(crate) fn granting() -> Self {
            Self {
                grant: true,
                forge_nonce: None,
            }
        }

        pub(crate) fn rejecting() -> Self {
            Self {
                grant: false,
                forge_nonce: None,
            }
        }

        fn issue(&self, request: &TimeStampRequest) -> Result<ContentInfo, TimeStampError> {
            let certificate: Certificate = testdata::certificate();
            let key: SigningKey = testdata::signing_key();

            let tst_info = TstInfo {
                version: Int::from(1i64),
                policy: "1.3.6.1.4.1.601.10.3.1".parse().expect("static OID"),
                message_imprint: request.message_imprint.clone(),
                serial_number: Int::from(7i64),
                gen_time: Time::new(
                    asn1_runtime::TimeKind::Generalized,
                    chrono::Utc.with_ymd_and_hms(2023, 7, 4, 12, 0, 0).unwrap(),
                ),
                accuracy: None,
                ordering: false,
                nonce: self
                    .forge_nonce
                    .clone()
                    .or_else(|| request.nonce.clone()),
                tsa: None,
            };
            let tst_der = der::encode(&tst_info.to_value())?;

            let mut signed_data = SignedData::new();
            signed_data.content_info = ContentInfo {
                content_type: oids::OID_TST_INFO.clone(),
                content: Some(Asn1Value::octet_string(Bytes::from(tst_der))),
            };
            if request.cert_req {
                signed_data.add_certificate(certificate.clone());
            }

            let signer_info = SignerInfo::new(
                &certificate,
                DigestAlgorithm::Sha256,
                SignatureAlgorithm::RsaesPkcsV15,
            );
            let mut signer = Signer::new(&mut signed_data, signer_info, &key)
                .map_err(|e| TimeStampError::Transport(e.to_string()))?;
            signer
                .update_content()
                .and_then(|_| signer.sign())
                .map_err(|e| TimeStampError::Transport(e.to_string()))?;

            Ok(signed_data.to_content_info())
        }
    }

    impl TimeStampTransport for TestAuthority {
        fn exchange(&self, _url: &str, request_der: &[u8]) -> Result<Vec<u8>, TimeStampError> {
            let request = TimeStampRequest::parse_der(request_der)
                .map_err(|e| TimeStampError::Transport(e.to_string()))?;

            let response = if self.grant {
                TimeStampResponse {
                    status: PkiStatusInfo::granted(),
                    token: Some(self.issue(&request)?),
                }
            } else {
                TimeStampResponse {
                    status: PkiStatusInfo::rejection(
                        PkiFailureInfo::TimeNotAvailable,
                        "try again later",
                    ),
                    token: None,
                }
            };
            response.to_der()
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::testsupport::TestAuthority, super::*, crate::sign::Verifier};

    #[test]
    fn request_der_round_trip() {
        let request = TimeStampRequest {
            version: Int::from(1i64),
            message_imprint: MessageImprint::compute(DigestAlgorithm::Sha256, b"message"),
            req_policy: None,
            nonce: Some(Int::from(0x1122334455u64)),
            cert_req: true,
        };
        let der = request.to_der().unwrap();
        let back = TimeStampRequest::parse_der(&der).unwrap();
        assert_eq!(back, request);

        // DEFAULT FALSE is absent from the encoding.
        let bare = TimeStampRequest {
            cert_req: false,
            nonce: None,
            ..request
        };
        let der = bare.to_der().unwrap();
        let back = TimeStampRequest::parse_der(&der).unwrap();
        assert!(!back.cert_req);
        assert!(back.nonce.is_none());
    }

    #[test]
    fn granted_token_round_trip_and_verify() {
        let client =
            TimeStampClient::with_transport(TestAuthority::granting(), DigestAlgorithm::Sha256);
        let token = client.timestamp("memory://tsa", b"signature bytes").unwrap();

        let tst_info = TstInfo::from_token(&token).unwrap();
        assert_eq!(
            tst_info.message_imprint,
            MessageImprint::compute(DigestAlgorithm::Sha256, b"signature bytes")
        );
        assert!(tst_info.nonce.is_some());

        // The token itself is a verifiable SignedData.
        let signed_data = SignedData::from_content_info(&token).unwrap();
        let mut verifier = Verifier::new(&signed_data, None, None).unwrap();
        verifier.update_content().unwrap();
        assert!(verifier.verify().unwrap().is_some());
    }

    #[test]
    fn rejection_surfaces_status_and_fail_info() {
        let client =
            TimeStampClient::with_transport(TestAuthority::rejecting(), DigestAlgorithm::Sha256);
        match client.timestamp("memory://tsa", b"message") {
            Err(TimeStampError::Rejected { status, fail_info }) => {
                assert_eq!(status, PkiStatus::Rejection);
                assert_eq!(fail_info, Some(PkiFailureInfo::TimeNotAvailable));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn nonce_mismatch_is_detected() {
        let authority = TestAuthority {
            grant: true,
            forge_nonce: Some(Int::from(1i64)),
        };
        let client = TimeStampClient::with_transport(authority, DigestAlgorithm::Sha256);
        assert!(matches!(
            client.timestamp("memory://tsa", b"message"),
            Err(TimeStampError::NonceMismatch)
        ));
    }

    #[test]
    fn selector_rotates_on_failure() {
        let selector = TsaSelector::new(vec![
            "http://tsa-a.example".into(),
            "http://tsa-b.example".into(),
        ]);
        assert_eq!(selector.current().unwrap(), "http://tsa-a.example");
        selector.record_failure();
        assert_eq!(selector.current().unwrap(), "http://tsa-b.example");
        selector.record_failure();
        assert_eq!(selector.current().unwrap(), "http://tsa-a.example");
        assert_eq!(selector.failure_count("http://tsa-a.example"), 1);
        assert_eq!(selector.failure_count("http://tsa-b.example"), 1);
    }

    #[test]
    fn fail_info_bit_positions() {
        for info in [
            PkiFailureInfo::BadAlg,
            PkiFailureInfo::BadRequest,
            PkiFailureInfo::TimeNotAvailable,
            PkiFailureInfo::SystemFailure,
        ] {
            let (bits, _) = info.to_bit_string();
            assert_eq!(PkiFailureInfo::first_set_bit(&bits), Some(info));
        }
    }
}
