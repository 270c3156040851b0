// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Transcoding between textual and binary representations.

Certificates and signature values cross the boundary to the remote signer
as text. The newtypes in this module keep raw DER apart from its textual
forms so the two cannot be confused at call sites.
*/

use crate::error::EncodingError;

const PEM_BEGIN: &str = "-----BEGIN";

/// Raw DER encoded bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DerBytes(Vec<u8>);

impl DerBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for DerBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Standard alphabet Base64 text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Base64Text(String);

impl Base64Text {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Base64Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Base64Text> for String {
    fn from(v: Base64Text) -> Self {
        v.0
    }
}

/// Lowercase hexadecimal text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HexText(String);

impl HexText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HexText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<HexText> for String {
    fn from(v: HexText) -> Self {
        v.0
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

pub fn base64_encode(data: &[u8]) -> Base64Text {
    Base64Text(base64::encode(data))
}

/// Decode Base64 text. Line wrapping and other ASCII whitespace is ignored.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(base64::decode(strip_whitespace(text))?)
}

/// Base64 text made safe for a URL query or form body.
pub fn url_encoded_base64_encode(data: &[u8]) -> String {
    let text = base64::encode(data);

    url::form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

/// Decode URL-encoded Base64.
///
/// A literal `+` or `=` stays part of the Base64 text, so unescaped input is
/// accepted too.
pub fn url_encoded_base64_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    let escaped = text
        .replace('+', "%2B")
        .replace('=', "%3D")
        .replace('&', "%26");

    let unescaped = url::form_urlencoded::parse(escaped.as_bytes())
        .map(|(key, _)| key)
        .collect::<String>();

    base64_decode(&unescaped)
}

pub fn hex_encode(data: &[u8]) -> HexText {
    HexText(hex::encode(data))
}

/// Decode hex text of either case. Whitespace is ignored.
pub fn hex_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(hex::decode(strip_whitespace(text))?)
}

/// Extract the DER payload of a PEM `CERTIFICATE` block.
pub fn pem_to_der(text: &str) -> Result<DerBytes, EncodingError> {
    let parsed = pem::parse(text.trim())?;

    if parsed.tag != "CERTIFICATE" {
        return Err(EncodingError::PemTag(parsed.tag));
    }

    if parsed.contents.is_empty() {
        return Err(EncodingError::Empty);
    }

    Ok(DerBytes(parsed.contents))
}

/// Wrap DER in a PEM `CERTIFICATE` block.
pub fn der_to_pem(der: &[u8]) -> String {
    pem::encode(&pem::Pem {
        tag: "CERTIFICATE".to_string(),
        contents: der.to_vec(),
    })
}

/// Decode certificate text as handed out by signing services.
///
/// Accepts PEM, Base64 of DER and Base64 of a whole PEM document.
pub fn decode_certificate_text(text: &str) -> Result<DerBytes, EncodingError> {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(EncodingError::Empty);
    }

    if trimmed.starts_with(PEM_BEGIN) {
        return pem_to_der(trimmed);
    }

    let decoded = base64_decode(trimmed)?;

    if decoded.starts_with(PEM_BEGIN.as_bytes()) {
        let inner = String::from_utf8_lossy(&decoded);
        pem_to_der(&inner)
    } else {
        Ok(DerBytes(decoded))
    }
}
