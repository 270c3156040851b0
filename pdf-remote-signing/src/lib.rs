// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PDF signing with keys held by a remote signer.
//!
//! This crate signs PDF documents when the private key lives somewhere this
//! process cannot reach, such as an HSM or a cloud signing service. Signing
//! is split in two:
//!
//! 1. [SigningSession::begin_signing] reserves room for a signature in the
//!    document, digests the signed byte ranges, builds the CMS signed
//!    attributes and returns their digest as text.
//! 2. The caller sends that digest to the remote signer by whatever means.
//! 3. [SigningSession::finish_signing] takes the returned signature, wraps it
//!    in a detached CMS `SignedData` together with the certificate chain and
//!    writes the signed document via a PDF incremental update.
//!
//! # Features and Capabilities
//!
//! * PAdES baseline B, T, LT and LTA profiles (`ETSI.CAdES.detached`) and
//!   legacy `adbe.pkcs7.detached` signatures. (See [ConformanceLevel].)
//! * SHA-256, SHA-384 and SHA-512 digests, named by OID. (See
//!   [DigestAlgorithm].)
//! * RSA and ECDSA signing certificates. Raw `r || s` ECDSA signatures, as
//!   returned by many HSM APIs, are converted to DER.
//! * Certificates as PEM, Base64 DER or Base64 PEM text.
//! * Digests and signatures exchanged as hex or Base64. (See
//!   [DigestEncoding].)
//!
//! Documents are accessed through the [DocumentBackend] trait. [PdfBackend]
//! is the built-in implementation.
//!
//! There is no support for contacting time-stamp authorities or gathering
//! revocation data. The T, LT and LTA profiles only reserve room for
//! attributes other tools add later.

pub mod algorithm;
pub mod asn1;
pub mod certificate;
pub mod codec;
pub mod document;
pub mod envelope;
pub mod error;
pub mod pdf;
pub mod pdf_syntax;
pub mod session;
pub mod signing_settings;

#[cfg(test)]
mod testutil;

pub use {
    algorithm::{DigestAlgorithm, KeyAlgorithm, SignatureAlgorithm},
    certificate::{Certificate, CertificateChain, CertificateRole},
    codec::{Base64Text, DerBytes, HexText},
    document::{DocumentBackend, PlaceholderRef, SigningDocument},
    envelope::{EnvelopeBuilder, PendingDigest, SignedEnvelope},
    error::{CertificateSlot, DocumentError, EncodingError, RemoteSignError, Result},
    pdf::PdfBackend,
    session::{SessionBuilder, SessionState, SigningSession},
    signing_settings::{ConformanceLevel, DigestEncoding, DocumentConfig, SigningSettings},
};
