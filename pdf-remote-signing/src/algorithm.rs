// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Digest and signature algorithms used by signing sessions.

use {
    crate::error::{RemoteSignError, Result},
    bcder::{ConstOid, Oid},
    ring::digest,
};

pub use x509_certificate::KeyAlgorithm;

/// SHA-256 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.1
pub const OID_SHA256: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 1]);

/// SHA-384 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.2
pub const OID_SHA384: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 2]);

/// SHA-512 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.3
pub const OID_SHA512: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 3]);

/// RSA+SHA-256 encryption.
///
/// 1.2.840.113549.1.1.11
pub const OID_SHA256_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 11]);

/// RSA+SHA-384 encryption.
///
/// 1.2.840.113549.1.1.12
pub const OID_SHA384_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 12]);

/// RSA+SHA-512 encryption.
///
/// 1.2.840.113549.1.1.13
pub const OID_SHA512_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 13]);

/// ECDSA with SHA-256.
///
/// 1.2.840.10045.4.3.2
pub const OID_ECDSA_SHA256: ConstOid = Oid(&[42, 134, 72, 206, 61, 4, 3, 2]);

/// ECDSA with SHA-384.
///
/// 1.2.840.10045.4.3.3
pub const OID_ECDSA_SHA384: ConstOid = Oid(&[42, 134, 72, 206, 61, 4, 3, 3]);

/// ECDSA with SHA-512.
///
/// 1.2.840.10045.4.3.4
pub const OID_ECDSA_SHA512: ConstOid = Oid(&[42, 134, 72, 206, 61, 4, 3, 4]);

/// A hashing algorithm used for digesting document content.
///
/// Sessions name the algorithm by its dotted OID string. Identifiers not
/// in the registry map to [DigestAlgorithm::Unknown], which every
/// operation needing a concrete algorithm rejects.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DigestAlgorithm {
    /// SHA-256.
    ///
    /// Corresponds to OID 2.16.840.1.101.3.4.2.1.
    Sha256,
    /// SHA-384.
    ///
    /// Corresponds to OID 2.16.840.1.101.3.4.2.2.
    Sha384,
    /// SHA-512.
    ///
    /// Corresponds to OID 2.16.840.1.101.3.4.2.3.
    Sha512,
    Unknown,
}

const REGISTRY: &[(&str, DigestAlgorithm)] = &[
    ("2.16.840.1.101.3.4.2.1", DigestAlgorithm::Sha256),
    ("2.16.840.1.101.3.4.2.2", DigestAlgorithm::Sha384),
    ("2.16.840.1.101.3.4.2.3", DigestAlgorithm::Sha512),
];

impl DigestAlgorithm {
    /// Resolve a dotted OID string. Matching is exact.
    pub fn from_identifier(oid: &str) -> Self {
        REGISTRY
            .iter()
            .find(|(id, _)| *id == oid)
            .map(|(_, alg)| *alg)
            .unwrap_or(Self::Unknown)
    }

    /// The dotted OID string, if the algorithm is known.
    pub fn identifier(&self) -> Option<&'static str> {
        REGISTRY
            .iter()
            .find(|(_, alg)| alg == self)
            .map(|(id, _)| *id)
    }

    /// Human readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    fn ring_algorithm(&self) -> Result<&'static digest::Algorithm> {
        match self {
            Self::Sha256 => Ok(&digest::SHA256),
            Self::Sha384 => Ok(&digest::SHA384),
            Self::Sha512 => Ok(&digest::SHA512),
            Self::Unknown => Err(RemoteSignError::UnsupportedAlgorithm(
                self.label().to_string(),
            )),
        }
    }

    /// The ASN.1 object identifier.
    pub fn oid(&self) -> Result<ConstOid> {
        match self {
            Self::Sha256 => Ok(OID_SHA256),
            Self::Sha384 => Ok(OID_SHA384),
            Self::Sha512 => Ok(OID_SHA512),
            Self::Unknown => Err(RemoteSignError::UnsupportedAlgorithm(
                self.label().to_string(),
            )),
        }
    }

    /// Length in bytes of digests produced by this algorithm.
    pub fn digest_len(&self) -> Result<usize> {
        Ok(self.ring_algorithm()?.output_len)
    }

    /// Obtain a context for incremental digesting.
    pub fn digester(&self) -> Result<digest::Context> {
        Ok(digest::Context::new(self.ring_algorithm()?))
    }

    /// Digest a complete buffer.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(digest::digest(self.ring_algorithm()?, data).as_ref().to_vec())
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An algorithm used to digitally sign content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    RsaSha256,
    RsaSha384,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
}

impl SignatureAlgorithm {
    /// Select the algorithm for a key type and digest.
    ///
    /// Ed25519 is refused: PureEdDSA signs the message itself, and a remote
    /// signer only ever sees a digest.
    pub fn for_key(key: KeyAlgorithm, digest: DigestAlgorithm) -> Result<Self> {
        match (key, digest) {
            (_, DigestAlgorithm::Unknown) => Err(RemoteSignError::UnsupportedAlgorithm(
                digest.label().to_string(),
            )),
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha256) => Ok(Self::RsaSha256),
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha384) => Ok(Self::RsaSha384),
            (KeyAlgorithm::Rsa, DigestAlgorithm::Sha512) => Ok(Self::RsaSha512),
            (KeyAlgorithm::Ecdsa { .. }, DigestAlgorithm::Sha256) => Ok(Self::EcdsaSha256),
            (KeyAlgorithm::Ecdsa { .. }, DigestAlgorithm::Sha384) => Ok(Self::EcdsaSha384),
            (KeyAlgorithm::Ecdsa { .. }, DigestAlgorithm::Sha512) => Ok(Self::EcdsaSha512),
            (KeyAlgorithm::Ed25519, _) => Err(RemoteSignError::UnsupportedAlgorithm(
                "Ed25519 keys cannot sign a precomputed digest".into(),
            )),
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RsaSha256 | Self::RsaSha384 | Self::RsaSha512)
    }

    pub fn oid(&self) -> ConstOid {
        match self {
            Self::RsaSha256 => OID_SHA256_RSA,
            Self::RsaSha384 => OID_SHA384_RSA,
            Self::RsaSha512 => OID_SHA512_RSA,
            Self::EcdsaSha256 => OID_ECDSA_SHA256,
            Self::EcdsaSha384 => OID_ECDSA_SHA384,
            Self::EcdsaSha512 => OID_ECDSA_SHA512,
        }
    }
}
