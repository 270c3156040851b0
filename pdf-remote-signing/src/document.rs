// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Document backend interface.

A signing session drives a document through these traits: open it,
reserve room for the signature, digest everything outside that room,
patch the finished envelope in and write the result.
*/

use {
    crate::{
        algorithm::DigestAlgorithm, envelope::SignedEnvelope, error::DocumentError,
        signing_settings::ConformanceLevel,
    },
    chrono::{DateTime, Utc},
    std::path::Path,
};

/// The regions of a document covered by its signature.
///
/// `[offset1, length1, offset2, length2]`, as in a PDF `/ByteRange`. The
/// gap between the two regions holds the signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteRange(pub [usize; 4]);

impl ByteRange {
    /// Total number of signed bytes.
    pub fn signed_len(&self) -> usize {
        self.0[1] + self.0[3]
    }
}

/// What a backend needs to know to lay out a signature.
#[derive(Clone, Debug)]
pub struct PlaceholderRequest<'a> {
    pub conformance_level: ConformanceLevel,
    /// Bytes available for the DER envelope.
    pub capacity: usize,
    pub signing_time: DateTime<Utc>,
    pub signer_name: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub location: Option<&'a str>,
    pub contact_info: Option<&'a str>,
    pub field_name: Option<&'a str>,
}

/// Handle to a reserved signature placeholder.
///
/// Only meaningful to the document that issued it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlaceholderRef {
    token: u64,
    byte_range: ByteRange,
    capacity: usize,
}

impl PlaceholderRef {
    pub fn new(token: u64, byte_range: ByteRange, capacity: usize) -> Self {
        Self {
            token,
            byte_range,
            capacity,
        }
    }

    /// Backend specific identity of the placeholder.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn byte_range(&self) -> ByteRange {
        self.byte_range
    }

    /// Bytes available for the DER envelope.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Opens documents for signing.
pub trait DocumentBackend {
    fn open_for_signing(&self, path: &Path) -> Result<Box<dyn SigningDocument>, DocumentError>;
}

/// A document opened for a single signature.
pub trait SigningDocument {
    /// Where the document was opened from.
    fn path(&self) -> &Path;

    /// Lay out the signature and reserve room for the envelope.
    fn reserve_signature_placeholder(
        &mut self,
        request: &PlaceholderRequest<'_>,
    ) -> Result<PlaceholderRef, DocumentError>;

    /// Digest every byte the signature covers.
    fn compute_byte_range_digest(
        &mut self,
        placeholder: &PlaceholderRef,
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<u8>, DocumentError>;

    /// Place the envelope into the reserved room.
    fn commit_signature(
        &mut self,
        placeholder: &PlaceholderRef,
        envelope: &SignedEnvelope,
    ) -> Result<(), DocumentError>;

    /// Write the signed document. Either the whole file appears at `path`
    /// or nothing does.
    fn save(&mut self, path: &Path) -> Result<(), DocumentError>;

    /// Release the document.
    fn close(self: Box<Self>) -> Result<(), DocumentError>;
}
