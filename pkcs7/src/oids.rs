// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OID constants used across PKCS#7, PKCS#9, X.509 and RFC 3161.

use {asn1_runtime::Oid, once_cell::sync::Lazy};

macro_rules! oid {
    ($(#[$doc:meta])* $name:ident, $text:literal) => {
        $(#[$doc])*
        pub static $name: Lazy<Oid> = Lazy::new(|| {
            $text.parse().expect("static OID literal")
        });
    };
}

oid!(
    /// The data content type. `id-data` in the specification.
    OID_DATA,
    "1.2.840.113549.1.7.1"
);

oid!(
    /// The signed-data content type.
    OID_SIGNED_DATA,
    "1.2.840.113549.1.7.2"
);

oid!(
    /// The enveloped-data content type.
    OID_ENVELOPED_DATA,
    "1.2.840.113549.1.7.3"
);

oid!(
    /// The signed-and-enveloped-data content type. Deprecated by PKCS#7;
    /// recognized but never produced.
    OID_SIGNED_AND_ENVELOPED_DATA,
    "1.2.840.113549.1.7.4"
);

oid!(
    /// The PKCS#9 content-type attribute.
    OID_CONTENT_TYPE,
    "1.2.840.113549.1.9.3"
);

oid!(
    /// The PKCS#9 message-digest attribute.
    OID_MESSAGE_DIGEST,
    "1.2.840.113549.1.9.4"
);

oid!(
    /// The PKCS#9 signing-time attribute.
    OID_SIGNING_TIME,
    "1.2.840.113549.1.9.5"
);

oid!(
    /// id-aa-timeStampToken, the RFC 3161 countersignature unsigned
    /// attribute.
    OID_TIME_STAMP_TOKEN,
    "1.2.840.113549.1.9.16.2.14"
);

oid!(
    /// Content type of TSTInfo inside a time-stamp token.
    OID_TST_INFO,
    "1.2.840.113549.1.9.16.1.4"
);

//--- Digest algorithms

oid!(OID_SHA1, "1.3.14.3.2.26");
oid!(OID_SHA256, "2.16.840.1.101.3.4.2.1");
oid!(OID_SHA384, "2.16.840.1.101.3.4.2.2");
oid!(OID_SHA512, "2.16.840.1.101.3.4.2.3");

//--- Signature algorithms

oid!(
    /// RSAES-PKCS1-v1_5, the bare `rsaEncryption` identifier JAR
    /// signature blocks traditionally carry.
    OID_RSA_ENCRYPTION,
    "1.2.840.113549.1.1.1"
);
oid!(OID_SHA1_RSA, "1.2.840.113549.1.1.5");
oid!(OID_SHA256_RSA, "1.2.840.113549.1.1.11");
oid!(OID_SHA384_RSA, "1.2.840.113549.1.1.12");
oid!(OID_SHA512_RSA, "1.2.840.113549.1.1.13");
oid!(OID_ECDSA_SHA256, "1.2.840.10045.4.3.2");
oid!(OID_ECDSA_SHA384, "1.2.840.10045.4.3.3");
oid!(OID_ED25519, "1.3.101.112");

//--- Public key algorithms

oid!(OID_EC_PUBLIC_KEY, "1.2.840.10045.2.1");
