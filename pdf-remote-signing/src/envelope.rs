// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CMS envelope construction split across a remote signature.

Signing happens in two halves. [EnvelopeBuilder::prepare_signable_digest]
builds the signed attributes over a document's byte range digest and
digests them; that value travels to the remote signer. The signer returns
a raw signature which [EnvelopeBuilder::finalize_envelope] checks against
the signing key and wraps into a detached `SignedData`.
*/

use {
    crate::{
        algorithm::{DigestAlgorithm, SignatureAlgorithm},
        asn1::{
            algorithm_identifier, oid, signing_time, to_der, DetachedSignedData, EssCertIdV2,
            RawDer, SigningCertificateV2, OID_SIGNING_CERTIFICATE_V2,
        },
        certificate::CertificateChain,
        document::{PlaceholderRef, SigningDocument},
        error::{RemoteSignError, Result},
        signing_settings::ConformanceLevel,
    },
    bcder::{
        encode::{PrimitiveContent, Values},
        Captured, ConstOid, Mode, OctetString,
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    cryptographic_message_syntax::asn1::rfc5652::{
        CmsVersion, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignatureValue,
        SignedAttributes, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
        OID_CONTENT_TYPE, OID_ID_DATA, OID_MESSAGE_DIGEST, OID_SIGNING_TIME,
    },
    log::debug,
    x509_certificate::rfc5652::{Attribute, AttributeValue},
};

/// A finished CMS `ContentInfo` holding detached `SignedData`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedEnvelope(Vec<u8>);

impl SignedEnvelope {
    pub fn new(der: Vec<u8>) -> Self {
        Self(der)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for SignedEnvelope {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// State carried from the first signing half to the second.
///
/// Consumed by [EnvelopeBuilder::finalize_envelope].
#[derive(Clone, Debug)]
pub struct PendingDigest {
    signer_info: SignerInfo,
    signed_attributes_der: Vec<u8>,
    message_digest: Vec<u8>,
    digest: Vec<u8>,
}

impl PendingDigest {
    /// Digest of the signed attributes. This is what gets signed remotely.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Digest of the document byte ranges.
    pub fn message_digest(&self) -> &[u8] {
        &self.message_digest
    }

    /// The exact message the remote signature covers.
    pub fn signed_attributes_der(&self) -> &[u8] {
        &self.signed_attributes_der
    }
}

/// Builds detached CMS signatures for one signer.
#[derive(Clone, Debug)]
pub struct EnvelopeBuilder {
    chain: CertificateChain,
    digest_algorithm: DigestAlgorithm,
    signature_algorithm: SignatureAlgorithm,
    conformance_level: ConformanceLevel,
}

impl EnvelopeBuilder {
    /// Fails if the signing key cannot be paired with `digest_algorithm`.
    pub fn new(
        chain: CertificateChain,
        digest_algorithm: DigestAlgorithm,
        conformance_level: ConformanceLevel,
    ) -> Result<Self> {
        let signature_algorithm =
            SignatureAlgorithm::for_key(chain.signer().key_algorithm, digest_algorithm)?;

        Ok(Self {
            chain,
            digest_algorithm,
            signature_algorithm,
            conformance_level,
        })
    }

    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Digest the document and build the value handed to the remote signer.
    pub fn prepare_signable_digest(
        &self,
        document: &mut dyn SigningDocument,
        placeholder: &PlaceholderRef,
        signing_time: DateTime<Utc>,
    ) -> Result<PendingDigest> {
        let message_digest = document
            .compute_byte_range_digest(placeholder, self.digest_algorithm)
            .map_err(|source| RemoteSignError::Document {
                phase: "digest",
                path: document.path().to_path_buf(),
                source,
            })?;

        self.pending_digest(message_digest, signing_time)
    }

    /// Build signed attributes over an already computed message digest.
    pub fn pending_digest(
        &self,
        message_digest: Vec<u8>,
        signing_time: DateTime<Utc>,
    ) -> Result<PendingDigest> {
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(
                self.chain.signer().issuer_and_serial_number(),
            ),
            digest_algorithm: algorithm_identifier(self.digest_algorithm.oid()?),
            signed_attributes: Some(self.signed_attributes(&message_digest, signing_time)?),
            signature_algorithm: algorithm_identifier(self.signature_algorithm.oid()),
            signature: SignatureValue::new(Bytes::new()),
            unsigned_attributes: None,
            signed_attributes_data: None,
        };

        let signed_attributes_der = signer_info
            .signed_attributes_digested_content()
            .map_err(RemoteSignError::Asn1)?
            .unwrap_or_default();
        let digest = self.digest_algorithm.digest_data(&signed_attributes_der)?;

        debug!(
            "signed attributes prepared for {} ({} digest)",
            self.conformance_level, self.digest_algorithm
        );

        Ok(PendingDigest {
            signer_info,
            signed_attributes_der,
            message_digest,
            digest,
        })
    }

    /// Signed attributes in DER `SET OF` order.
    fn signed_attributes(
        &self,
        message_digest: &[u8],
        time: DateTime<Utc>,
    ) -> Result<SignedAttributes> {
        let mut attributes = vec![
            attribute(OID_CONTENT_TYPE, OID_ID_DATA.encode_ref()),
            attribute(OID_MESSAGE_DIGEST, message_digest.encode()),
        ];

        if self.conformance_level.is_pades() {
            let signing_certificate = self.signing_certificate()?;
            attributes.push(attribute(
                OID_SIGNING_CERTIFICATE_V2,
                signing_certificate.encode_ref(),
            ));
        }

        // PAdES baseline forbids signing-time; the claimed time lives in /M.
        if self.conformance_level.has_signing_time_attribute() {
            attributes.push(attribute(OID_SIGNING_TIME, signing_time(time)?.encode_ref()));
        }

        let mut keyed = attributes
            .into_iter()
            .map(|attr| Ok((to_der(attr.encode_ref())?, attr)))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut signed_attributes = SignedAttributes::default();
        signed_attributes.extend(keyed.into_iter().map(|(_, attr)| attr));

        Ok(signed_attributes)
    }

    fn signing_certificate(&self) -> Result<SigningCertificateV2> {
        let signer = self.chain.signer();
        let cert_hash = self
            .digest_algorithm
            .digest_data(self.chain.end_entity().der())?;

        let hash_algorithm = match self.digest_algorithm {
            DigestAlgorithm::Sha256 => None,
            alg => Some(algorithm_identifier(alg.oid()?)),
        };

        Ok(SigningCertificateV2 {
            cert: EssCertIdV2 {
                hash_algorithm,
                cert_hash: OctetString::new(Bytes::from(cert_hash)),
                issuer: signer.issuer.clone(),
                serial_number: signer.serial_number.clone(),
            },
        })
    }

    /// Wrap a remote signature into a finished envelope.
    pub fn finalize_envelope(
        &self,
        pending: PendingDigest,
        raw_signature: &[u8],
    ) -> Result<SignedEnvelope> {
        if raw_signature.is_empty() {
            return Err(RemoteSignError::EmptySignature);
        }

        let signature = normalize_signature(
            self.signature_algorithm,
            self.chain.signer().rsa_modulus_len,
            raw_signature,
        )?;

        let mut signer_info = pending.signer_info;
        signer_info.signature = SignatureValue::new(Bytes::from(signature));

        let mut digest_algorithms = DigestAlgorithmIdentifiers::default();
        digest_algorithms.push(algorithm_identifier(self.digest_algorithm.oid()?));

        let mut signer_infos = SignerInfos::default();
        signer_infos.push(signer_info);

        let mut certificates = self
            .chain
            .iter()
            .map(|cert| RawDer::new(cert.der()))
            .collect::<Vec<_>>();

        if self.conformance_level.embeds_root_certificate() {
            if let Some(root) = self.chain.root() {
                certificates.push(RawDer::new(root.der()));
            }
        }

        let envelope = DetachedSignedData {
            signed_data: SignedData {
                version: CmsVersion::V1,
                digest_algorithms,
                content_info: EncapsulatedContentInfo {
                    content_type: oid(OID_ID_DATA),
                    content: None,
                },
                certificates: None,
                crls: None,
                signer_infos,
            },
            certificates,
        };

        let der = to_der(envelope.encode_ref())?;
        debug!("assembled {} byte CMS envelope", der.len());

        Ok(SignedEnvelope::new(der))
    }
}

/// A single valued attribute.
fn attribute(typ: ConstOid, value: impl Values) -> Attribute {
    Attribute {
        typ: oid(typ),
        values: vec![AttributeValue::new(Captured::from_values(Mode::Der, value))],
    }
}

/// Check a signature's shape against the signing key.
///
/// Returns the signature in the form CMS stores it. Raw ECDSA `r || s`
/// values are converted to a DER `Ecdsa-Sig-Value`.
pub fn normalize_signature(
    signature_algorithm: SignatureAlgorithm,
    rsa_modulus_len: Option<usize>,
    signature: &[u8],
) -> Result<Vec<u8>> {
    if signature.is_empty() {
        return Err(RemoteSignError::EmptySignature);
    }

    if signature_algorithm.is_rsa() {
        return match rsa_modulus_len {
            Some(len) if len != signature.len() => Err(RemoteSignError::SignatureMismatch(
                format!(
                    "RSA signature is {} bytes but the key modulus is {} bytes",
                    signature.len(),
                    len
                ),
            )),
            _ => Ok(signature.to_vec()),
        };
    }

    if is_ecdsa_der(signature) {
        return Ok(signature.to_vec());
    }

    match signature.len() {
        64 | 96 | 132 => {
            let (r, s) = signature.split_at(signature.len() / 2);

            Ok(yasna::construct_der(|writer| {
                writer.write_sequence(|writer| {
                    writer.next().write_bigint_bytes(r, true);
                    writer.next().write_bigint_bytes(s, true);
                })
            }))
        }
        len => Err(RemoteSignError::SignatureMismatch(format!(
            "{} bytes is neither a DER nor a raw ECDSA signature",
            len
        ))),
    }
}

/// Whether data is exactly one `SEQUENCE { INTEGER, INTEGER }`.
fn is_ecdsa_der(data: &[u8]) -> bool {
    yasna::parse_der(data, |reader| {
        reader.read_sequence(|reader| {
            reader.next().read_bigint_bytes()?;
            reader.next().read_bigint_bytes()?;
            Ok(())
        })
    })
    .is_ok()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{algorithm::OID_SHA384, testutil::*},
        chrono::TimeZone,
        cryptographic_message_syntax::SignedData as ParsedSignedData,
        ring::signature::{KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1},
    };

    fn rsa_chain() -> CertificateChain {
        CertificateChain::resolve(X509_CERTIFICATE, &[X509_CERTIFICATE], None).unwrap()
    }

    fn signing_time() -> DateTime<Utc> {
        Utc.ymd(2022, 5, 4).and_hms(12, 0, 0)
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn attributes_follow_conformance_level() {
        let message_digest = DigestAlgorithm::Sha256.digest_data(b"content").unwrap();

        let pades = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap()
        .pending_digest(message_digest.clone(), signing_time())
        .unwrap();
        let der = pades.signed_attributes_der();
        assert!(contains(&der, OID_SIGNING_CERTIFICATE_V2.as_ref()));
        assert!(!contains(&der, OID_SIGNING_TIME.as_ref()));
        assert!(contains(&der, &message_digest));
        assert_eq!(pades.digest().len(), 32);
        assert_eq!(
            pades.digest(),
            DigestAlgorithm::Sha256.digest_data(&der).unwrap().as_slice()
        );

        let legacy = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::Pkcs7Detached,
        )
        .unwrap()
        .pending_digest(message_digest, signing_time())
        .unwrap();
        let der = legacy.signed_attributes_der();
        assert!(!contains(&der, OID_SIGNING_CERTIFICATE_V2.as_ref()));
        assert!(contains(&der, OID_SIGNING_TIME.as_ref()));
        assert!(contains(&der, b"220504120000Z"));
    }

    #[test]
    fn non_default_hash_is_named_in_signing_certificate() {
        let pending = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha384,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap()
        .pending_digest(vec![0; 48], signing_time())
        .unwrap();

        assert!(contains(
            &pending.signed_attributes_der(),
            OID_SHA384.as_ref()
        ));
        assert_eq!(pending.digest().len(), 48);
    }

    #[test]
    fn same_inputs_same_digest() {
        let builder = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::Pkcs7Detached,
        )
        .unwrap();

        let a = builder.pending_digest(vec![7; 32], signing_time()).unwrap();
        let b = builder.pending_digest(vec![7; 32], signing_time()).unwrap();
        assert_eq!(a.digest(), b.digest());

        let later = builder
            .pending_digest(vec![7; 32], Utc.ymd(2022, 5, 4).and_hms(12, 0, 1))
            .unwrap();
        assert_ne!(a.digest(), later.digest());
    }

    #[test]
    fn rsa_envelope_verifies() {
        let content = b"signed document bytes";
        let builder = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap();

        let pending = builder
            .pending_digest(
                DigestAlgorithm::Sha256.digest_data(content).unwrap(),
                signing_time(),
            )
            .unwrap();
        let signature = rsa_sign_sha256(&pending.signed_attributes_der());

        let envelope = builder.finalize_envelope(pending, &signature).unwrap();
        let signed_data = ParsedSignedData::parse_ber(envelope.as_slice()).unwrap();

        assert_eq!(signed_data.certificates().count(), 2);
        let signers = signed_data.signers().collect::<Vec<_>>();
        assert_eq!(signers.len(), 1);
        signers[0]
            .verify_signature_with_signed_data(&signed_data)
            .unwrap();
        signers[0]
            .verify_message_digest_with_content(content)
            .unwrap();
        assert!(signers[0]
            .verify_message_digest_with_content(b"other bytes")
            .is_err());
    }

    #[test]
    fn root_embedded_only_for_long_term_levels() {
        let chain =
            CertificateChain::resolve::<&str>(X509_CERTIFICATE, &[], Some(X509_CERTIFICATE))
                .unwrap();
        let signature = vec![0x5a; 256];

        for (level, count) in [
            (ConformanceLevel::PadesBaselineB, 1),
            (ConformanceLevel::PadesBaselineT, 1),
            (ConformanceLevel::PadesBaselineLt, 2),
            (ConformanceLevel::PadesBaselineLta, 2),
        ] {
            let builder =
                EnvelopeBuilder::new(chain.clone(), DigestAlgorithm::Sha256, level).unwrap();
            let pending = builder.pending_digest(vec![1; 32], signing_time()).unwrap();
            let envelope = builder.finalize_envelope(pending, &signature).unwrap();

            let signed_data = ParsedSignedData::parse_ber(envelope.as_slice()).unwrap();
            assert_eq!(signed_data.certificates().count(), count, "{}", level);
        }
    }

    #[test]
    fn rsa_signature_length_checked() {
        let builder = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap();

        let pending = builder.pending_digest(vec![0; 32], signing_time()).unwrap();
        assert!(matches!(
            builder.finalize_envelope(pending.clone(), &[1; 255]),
            Err(RemoteSignError::SignatureMismatch(_))
        ));
        assert!(matches!(
            builder.finalize_envelope(pending, &[]),
            Err(RemoteSignError::EmptySignature)
        ));
    }

    #[test]
    fn raw_ecdsa_signature_converted_to_der() {
        let chain = CertificateChain::resolve::<&str>(ECDSA_CERTIFICATE, &[], None).unwrap();
        let builder = EnvelopeBuilder::new(
            chain,
            DigestAlgorithm::Sha256,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap();
        assert_eq!(builder.signature_algorithm(), SignatureAlgorithm::EcdsaSha256);

        let pending = builder.pending_digest(vec![3; 32], signing_time()).unwrap();
        let message = pending.signed_attributes_der();

        let key = ecdsa_key_pair();
        let raw = key
            .sign(&ring::rand::SystemRandom::new(), &message)
            .unwrap();
        assert_eq!(raw.as_ref().len(), 64);

        let der = normalize_signature(SignatureAlgorithm::EcdsaSha256, None, raw.as_ref()).unwrap();
        assert_eq!(der[0], 0x30);
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, key.public_key().as_ref())
            .verify(&message, &der)
            .unwrap();

        // DER input is kept as is.
        assert_eq!(
            normalize_signature(SignatureAlgorithm::EcdsaSha256, None, &der).unwrap(),
            der
        );

        let envelope = builder.finalize_envelope(pending, raw.as_ref()).unwrap();
        assert!(contains(envelope.as_slice(), &der));
    }

    #[test]
    fn malformed_ecdsa_signature_rejected() {
        for len in [1, 63, 65, 100] {
            assert!(matches!(
                normalize_signature(SignatureAlgorithm::EcdsaSha256, None, &vec![0x11; len]),
                Err(RemoteSignError::SignatureMismatch(_))
            ));
        }
    }

    #[test]
    fn rsa_signature_must_match_modulus() {
        assert!(normalize_signature(SignatureAlgorithm::RsaSha256, Some(256), &[1; 256]).is_ok());
        assert!(normalize_signature(SignatureAlgorithm::RsaSha512, None, &[1; 100]).is_ok());
        assert!(matches!(
            normalize_signature(SignatureAlgorithm::RsaSha256, Some(256), &[1; 64]),
            Err(RemoteSignError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn signed_attributes_sorted_by_encoding() {
        let pending = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::Pkcs7Detached,
        )
        .unwrap()
        .pending_digest(vec![9; 32], signing_time())
        .unwrap();

        let attributes = pending
            .signer_info
            .signed_attributes
            .as_ref()
            .unwrap()
            .iter()
            .map(|attr| to_der(attr.encode_ref()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(attributes.len(), 3);

        let mut sorted = attributes.clone();
        sorted.sort();
        assert_eq!(attributes, sorted);
    }

    #[test]
    fn signing_time_beyond_utc_time_refused() {
        let builder = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::Pkcs7Detached,
        )
        .unwrap();
        assert!(matches!(
            builder.pending_digest(vec![0; 32], Utc.ymd(2050, 1, 1).and_hms(0, 0, 0)),
            Err(RemoteSignError::InvalidConfiguration(_))
        ));

        // No signing-time attribute, so /M alone carries the year.
        let pades = EnvelopeBuilder::new(
            rsa_chain(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap();
        assert!(pades
            .pending_digest(vec![0; 32], Utc.ymd(2050, 1, 1).and_hms(0, 0, 0))
            .is_ok());
    }

    #[test]
    fn certificates_embedded_verbatim() {
        let chain = CertificateChain::resolve::<&str>(ECDSA_CERTIFICATE, &[], None).unwrap();
        let builder = EnvelopeBuilder::new(
            chain.clone(),
            DigestAlgorithm::Sha256,
            ConformanceLevel::PadesBaselineB,
        )
        .unwrap();

        let pending = builder.pending_digest(vec![2; 32], signing_time()).unwrap();
        let envelope = builder.finalize_envelope(pending, &[0x22; 64]).unwrap();

        assert!(contains(envelope.as_slice(), chain.end_entity().der()));
        let signed_data = ParsedSignedData::parse_ber(envelope.as_slice()).unwrap();
        assert_eq!(signed_data.certificates().count(), 1);
    }

    #[test]
    fn ed25519_signer_refused() {
        let chain = CertificateChain::resolve::<&str>(ED25519_CERTIFICATE, &[], None).unwrap();
        assert!(matches!(
            EnvelopeBuilder::new(
                chain,
                DigestAlgorithm::Sha256,
                ConformanceLevel::PadesBaselineB
            ),
            Err(RemoteSignError::UnsupportedAlgorithm(_))
        ));
    }
}
