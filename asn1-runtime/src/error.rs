// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for the ASN.1 runtime.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Asn1Error {
    /// Malformed DER/BER input.
    ///
    /// Carries the byte offset at which decoding gave up.
    #[error("invalid encoding at offset {offset}: {reason}")]
    InvalidEncoding { offset: usize, reason: String },

    /// A value failed a caller-installed constraint.
    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    /// An object identifier violated the subidentifier rules.
    #[error("invalid object identifier: {0}")]
    InvalidOid(String),

    /// A collection element does not conform to its element template.
    #[error("element does not match the collection template: {0}")]
    NonAsn1Element(&'static str),

    /// A value cannot be represented in the requested encoding.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// A header-declared length exceeds the configured input budget.
    #[error("declared length of {needed} bytes exceeds the input budget of {budget} bytes")]
    InputBudgetExceeded { needed: usize, budget: usize },

    /// An internal invariant of the value model was broken.
    #[error("invariant violated: {0}")]
    InvariantViolated(&'static str),
}

impl Asn1Error {
    pub(crate) fn invalid(offset: usize, reason: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            offset,
            reason: reason.into(),
        }
    }
}
