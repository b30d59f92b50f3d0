// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Runtime ASN.1 value model with DER and BER codecs.

Unlike derive- or template-macro-based ASN.1 crates, the type model here
is a runtime one: [`Asn1Value`] is a tagged sum over every supported
ASN.1 type, and the same value doubles as the decode template that drives
structural matching. This is what protocols defined in terms of open
types and OID-selected content (PKCS#7 being the motivating consumer)
need.

* Encoding is strict DER, produced by a two-pass encoder
  ([`der::encode`]); [`der::encode_content_only`] emits the content
  octets of a value without its identifier and length, which PKCS#7 v1.5
  requires when digesting encapsulated content.
* Decoding ([`Decoder`]) handles DER and BER, including indefinite
  lengths and constructed string reassembly, in either template-driven
  or free-form mode, with a settable input budget against adversarial
  length claims.
* [`OidRegistry`] maps OIDs to decode templates for open types, with a
  process-wide fallback registry and capability-gated mutation.
*/

pub mod der;

mod decode;
mod error;
mod int;
mod oid;
mod real;
mod strings;
mod tag;
mod time;
mod value;

pub use {
    decode::{decode_ber, decode_der, Decoder, Mode},
    error::Asn1Error,
    int::Int,
    oid::{Oid, OidRegistry, RegistryToken},
    strings::StringKind,
    tag::{Class, Tag},
    time::{Time, TimeKind},
    value::{
        Asn1Value, Constraint, Kind, OpenTypeResolver, RegistryResolver, Resolver,
    },
};
