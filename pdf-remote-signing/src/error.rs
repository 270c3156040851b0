// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {crate::session::SessionState, std::path::PathBuf, thiserror::Error};

/// Identifies which certificate input an error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateSlot {
    /// The end-entity (signer) certificate.
    EndEntity,
    /// An entry in the supplied chain, by position.
    Chain(usize),
    /// The optional root certificate.
    Root,
}

impl std::fmt::Display for CertificateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndEntity => f.write_str("end-entity certificate"),
            Self::Chain(index) => write!(f, "chain certificate #{}", index),
            Self::Root => f.write_str("root certificate"),
        }
    }
}

/// Failures transcoding between textual and binary representations.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("PEM block has unexpected tag: {0}")]
    PemTag(String),

    #[error("no data to decode")]
    Empty,
}

/// Failures reported by a document backend.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("unsupported document feature: {0}")]
    Unsupported(String),

    #[error("signature placeholder too small: need {needed} bytes, have {available}")]
    PlaceholderTooSmall { needed: usize, available: usize },

    #[error("placeholder does not belong to this document")]
    PlaceholderMismatch,
}

/// Unified error type for remote signing sessions.
#[derive(Debug, Error)]
pub enum RemoteSignError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unknown conformance level: {0}")]
    UnknownConformanceLevel(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid {slot}: {reason}")]
    Certificate {
        slot: CertificateSlot,
        reason: String,
    },

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("signature does not match signing key: {0}")]
    SignatureMismatch(String),

    #[error("signature value is empty")]
    EmptySignature,

    #[error("document error during {phase} of {}: {source}", .path.display())]
    Document {
        phase: &'static str,
        path: PathBuf,
        source: DocumentError,
    },

    #[error("ASN.1 encoding error: {0}")]
    Asn1(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    CliGeneralError(String),
}

impl RemoteSignError {
    /// Whether this error can only be produced while constructing a session.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::UnknownConformanceLevel(_)
                | Self::UnsupportedAlgorithm(_)
                | Self::Certificate { .. }
        )
    }
}

pub type Result<T, E = RemoteSignError> = std::result::Result<T, E>;
