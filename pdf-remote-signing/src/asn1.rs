// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ASN.1 pieces for detached CMS signatures not provided elsewhere.

The CMS structures themselves come from
`cryptographic_message_syntax::asn1::rfc5652`. This module adds the ESS
signing-certificate-v2 attribute (RFC 5035), the signing-time value and
a `ContentInfo` encoder that embeds certificates as their original DER.
*/

use {
    crate::error::{RemoteSignError, Result},
    bcder::{
        encode::{self, PrimitiveContent, Values},
        ConstOid, Integer, Mode, OctetString, Oid, Tag,
    },
    bytes::Bytes,
    chrono::{DateTime, Datelike, Utc},
    cryptographic_message_syntax::asn1::rfc5652::{SignedData, OID_ID_SIGNED_DATA},
    std::io::Write,
    x509_certificate::{asn1time::Time, rfc3280::Name, rfc5280::AlgorithmIdentifier},
};

/// Identifies the ESS signing-certificate-v2 attribute.
///
/// 1.2.840.113549.1.9.16.2.47
pub const OID_SIGNING_CERTIFICATE_V2: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 16, 2, 47]);

/// Serialize values as DER.
pub fn to_der(values: impl Values) -> Result<Vec<u8>> {
    let mut der = Vec::new();
    values
        .write_encoded(Mode::Der, &mut der)
        .map_err(RemoteSignError::Asn1)?;

    Ok(der)
}

/// Owned copy of a constant OID.
pub fn oid(value: ConstOid) -> Oid {
    Oid(Bytes::copy_from_slice(value.as_ref()))
}

/// An algorithm identifier without parameters.
pub fn algorithm_identifier(algorithm: ConstOid) -> AlgorithmIdentifier {
    AlgorithmIdentifier {
        algorithm: oid(algorithm),
        parameters: None,
    }
}

/// Value of the signing-time attribute.
///
/// Only UTCTime is produced, which limits the year to 1950 through 2049.
pub fn signing_time(time: DateTime<Utc>) -> Result<Time> {
    if !(1950..2050).contains(&time.year()) {
        return Err(RemoteSignError::InvalidConfiguration(format!(
            "signing time {} cannot be expressed as UTCTime",
            time
        )));
    }

    Ok(Time::from(time))
}

/// A complete, already encoded TLV.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawDer(Vec<u8>);

impl RawDer {
    pub fn new(der: impl Into<Vec<u8>>) -> Self {
        Self(der.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Values for RawDer {
    fn encoded_len(&self, _: Mode) -> usize {
        self.0.len()
    }

    fn write_encoded<W: Write>(&self, _: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(&self.0)
    }
}

/// ESS certificate identifier.
///
/// ```ASN.1
/// ESSCertIDv2 ::= SEQUENCE {
///   hashAlgorithm AlgorithmIdentifier DEFAULT {algorithm id-sha256},
///   certHash Hash,
///   issuerSerial IssuerSerial OPTIONAL }
///
/// IssuerSerial ::= SEQUENCE {
///   issuer GeneralNames,
///   serialNumber CertificateSerialNumber }
/// ```
#[derive(Clone, Debug)]
pub struct EssCertIdV2 {
    /// `None` encodes the SHA-256 default.
    pub hash_algorithm: Option<AlgorithmIdentifier>,
    pub cert_hash: OctetString,
    pub issuer: Name,
    pub serial_number: Integer,
}

impl EssCertIdV2 {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.hash_algorithm.as_ref(),
            self.cert_hash.encode_ref(),
            encode::sequence((
                // GeneralNames holding a single directoryName [4].
                encode::sequence(encode::sequence_as(Tag::CTX_4, self.issuer.encode_ref())),
                (&self.serial_number).encode(),
            )),
        ))
    }
}

/// ```ASN.1
/// SigningCertificateV2 ::= SEQUENCE {
///   certs SEQUENCE OF ESSCertIDv2,
///   policies SEQUENCE OF PolicyInformation OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct SigningCertificateV2 {
    pub cert: EssCertIdV2,
}

impl SigningCertificateV2 {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence(encode::sequence(self.cert.encode_ref()))
    }
}

/// Detached [SignedData] wrapped in a `ContentInfo`.
///
/// [SignedData::encode_ref] writes certificates from their parsed form,
/// which does not reproduce every certificate byte for byte. The
/// certificates here are copied from their original DER and
/// `signed_data.certificates` is ignored.
#[derive(Clone, Debug)]
pub struct DetachedSignedData {
    pub signed_data: SignedData,
    pub certificates: Vec<RawDer>,
}

impl DetachedSignedData {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            OID_ID_SIGNED_DATA.encode_ref(),
            encode::sequence_as(
                Tag::CTX_0,
                encode::sequence((
                    self.signed_data.version.encode(),
                    self.signed_data.digest_algorithms.encode_ref(),
                    self.signed_data.content_info.encode_ref(),
                    encode::set_as(Tag::CTX_0, &self.certificates),
                    self.signed_data.signer_infos.encode_ref(),
                )),
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{algorithm::OID_SHA384, testutil::*},
        chrono::TimeZone,
        x509_certificate::CapturedX509Certificate,
    };

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn ess_cert_id(hash_algorithm: Option<AlgorithmIdentifier>) -> EssCertIdV2 {
        let cert = CapturedX509Certificate::from_der(rsa_certificate_der()).unwrap();

        EssCertIdV2 {
            hash_algorithm,
            cert_hash: OctetString::new(Bytes::from_static(&[1, 2, 3])),
            issuer: cert.issuer_name().clone(),
            serial_number: cert.serial_number_asn1().clone(),
        }
    }

    #[test]
    fn signing_time_is_utc_time() {
        let t = Utc.ymd(2021, 3, 7).and_hms(4, 5, 6);

        let der = to_der(signing_time(t).unwrap().encode_ref()).unwrap();
        assert_eq!(der[0], 0x17);
        assert_eq!(&der[2..], b"210307040506Z");
    }

    #[test]
    fn signing_time_outside_utc_time_range_rejected() {
        assert!(signing_time(Utc.ymd(2049, 12, 31).and_hms(23, 59, 59)).is_ok());
        assert!(signing_time(Utc.ymd(1950, 1, 1).and_hms(0, 0, 0)).is_ok());

        for t in [
            Utc.ymd(2050, 1, 1).and_hms(0, 0, 0),
            Utc.ymd(1949, 12, 31).and_hms(23, 59, 59),
        ] {
            assert!(matches!(
                signing_time(t),
                Err(RemoteSignError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn ess_cert_id_omits_default_hash_algorithm() {
        let id = ess_cert_id(None);
        let der = to_der(id.encode_ref()).unwrap();

        let issuer = to_der(id.issuer.encode_ref()).unwrap();
        let serial = to_der((&id.serial_number).encode()).unwrap();

        // SEQUENCE { OCTET STRING, SEQUENCE { SEQUENCE { [4] { Name } }, INTEGER } }
        let header = match der[1] {
            len if len < 0x80 => 2,
            len => 2 + (len & 0x7f) as usize,
        };
        assert_eq!(der[0], 0x30);
        assert_eq!(&der[header..header + 5], &[0x04, 0x03, 1, 2, 3]);
        assert!(der.ends_with(&serial));
        assert!(contains(&der, &issuer));
        assert!(!contains(&der, OID_SHA384.as_ref()));
    }

    #[test]
    fn ess_cert_id_names_other_hash_algorithms() {
        let id = ess_cert_id(Some(algorithm_identifier(OID_SHA384)));
        let der = to_der(id.encode_ref()).unwrap();

        assert!(contains(&der, OID_SHA384.as_ref()));
    }
}
