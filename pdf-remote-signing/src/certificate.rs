// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolution of signer certificates into an ordered chain.

Remote signing services hand out the signer certificate and its issuers as
text. [CertificateChain::resolve] decodes every entry, checks that each one
is structurally an X.509 certificate and records what the CMS envelope
later needs from the signer certificate.

No path building or trust evaluation happens here: the chain is kept in
the order supplied, duplicates included.
*/

use {
    crate::{
        algorithm::KeyAlgorithm,
        codec::{decode_certificate_text, DerBytes},
        error::{CertificateSlot, RemoteSignError, Result},
    },
    bcder::{decode::Constructed, Integer, Mode},
    cryptographic_message_syntax::asn1::rfc5652::IssuerAndSerialNumber,
    x509_certificate::{rfc3280::Name, rfc8017::RsaPublicKey, CapturedX509Certificate},
};

/// Position of a certificate in the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateRole {
    EndEntity,
    IntermediateOrRoot,
}

/// A validated certificate.
#[derive(Clone, Debug)]
pub struct Certificate {
    der: DerBytes,
    role: CertificateRole,
    parsed: CapturedX509Certificate,
}

impl Certificate {
    fn decode(text: &str, role: CertificateRole, slot: CertificateSlot) -> Result<Self> {
        let der = decode_certificate_text(text).map_err(|e| RemoteSignError::Certificate {
            slot,
            reason: e.to_string(),
        })?;

        let parsed = CapturedX509Certificate::from_der(der.as_slice().to_vec()).map_err(|e| {
            RemoteSignError::Certificate {
                slot,
                reason: format!("not a valid X.509 certificate: {}", e),
            }
        })?;

        Ok(Self { der, role, parsed })
    }

    pub fn der(&self) -> &[u8] {
        self.der.as_slice()
    }

    pub fn role(&self) -> CertificateRole {
        self.role
    }

    /// Subject name rendered for display. Empty when it cannot be decoded.
    pub fn subject(&self) -> String {
        self.parsed
            .subject_name()
            .user_friendly_str()
            .unwrap_or_default()
    }

    pub fn parsed(&self) -> &CapturedX509Certificate {
        &self.parsed
    }
}

/// What the envelope needs to know about the signing key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignerIdentity {
    pub issuer: Name,
    pub serial_number: Integer,
    pub key_algorithm: KeyAlgorithm,
    /// RSA modulus length in bytes. Only set for RSA keys.
    pub rsa_modulus_len: Option<usize>,
}

impl SignerIdentity {
    fn from_certificate(cert: &CapturedX509Certificate) -> std::result::Result<Self, String> {
        let key_algorithm = cert
            .key_algorithm()
            .ok_or_else(|| "unsupported public key algorithm".to_string())?;

        let rsa_modulus_len = match key_algorithm {
            KeyAlgorithm::Rsa => {
                let key = Constructed::decode(cert.public_key_data().as_ref(), Mode::Der, |cons| {
                    RsaPublicKey::take_from(cons)
                })
                .map_err(|e| format!("error parsing RSA public key: {}", e))?;

                Some(
                    key.modulus
                        .into_bytes()
                        .iter()
                        .skip_while(|b| **b == 0)
                        .count(),
                )
            }
            _ => None,
        };

        Ok(Self {
            issuer: cert.issuer_name().clone(),
            serial_number: cert.serial_number_asn1().clone(),
            key_algorithm,
            rsa_modulus_len,
        })
    }

    /// The CMS `sid` naming this signer.
    pub fn issuer_and_serial_number(&self) -> IssuerAndSerialNumber {
        IssuerAndSerialNumber {
            issuer: self.issuer.clone(),
            serial_number: self.serial_number.clone(),
        }
    }
}

/// The signer certificate followed by its issuers.
#[derive(Clone, Debug)]
pub struct CertificateChain {
    end_entity: Certificate,
    chain: Vec<Certificate>,
    root: Option<Certificate>,
    signer: SignerIdentity,
}

impl CertificateChain {
    /// Decode and validate all certificate inputs.
    ///
    /// The first invalid entry aborts resolution. Errors identify the
    /// entry by [CertificateSlot].
    pub fn resolve<S: AsRef<str>>(
        end_entity: &str,
        chain: &[S],
        root: Option<&str>,
    ) -> Result<Self> {
        if end_entity.trim().is_empty() {
            return Err(RemoteSignError::Certificate {
                slot: CertificateSlot::EndEntity,
                reason: "no certificate data".into(),
            });
        }

        let end_entity = Certificate::decode(
            end_entity,
            CertificateRole::EndEntity,
            CertificateSlot::EndEntity,
        )?;

        let chain = chain
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Certificate::decode(
                    text.as_ref(),
                    CertificateRole::IntermediateOrRoot,
                    CertificateSlot::Chain(i),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let root = root
            .map(|text| {
                Certificate::decode(
                    text,
                    CertificateRole::IntermediateOrRoot,
                    CertificateSlot::Root,
                )
            })
            .transpose()?;

        let signer = SignerIdentity::from_certificate(end_entity.parsed()).map_err(|reason| {
            RemoteSignError::Certificate {
                slot: CertificateSlot::EndEntity,
                reason,
            }
        })?;

        Ok(Self {
            end_entity,
            chain,
            root,
            signer,
        })
    }

    pub fn end_entity(&self) -> &Certificate {
        &self.end_entity
    }

    /// Chain entries in the order supplied, excluding the end-entity.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn root(&self) -> Option<&Certificate> {
        self.root.as_ref()
    }

    pub fn signer(&self) -> &SignerIdentity {
        &self.signer
    }

    /// End-entity first, then the chain.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        std::iter::once(&self.end_entity).chain(self.chain.iter())
    }

    /// Number of certificates in [Self::iter].
    pub fn len(&self) -> usize {
        1 + self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
