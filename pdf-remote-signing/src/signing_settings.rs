// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing settings.

use {
    crate::{
        codec,
        error::{EncodingError, RemoteSignError, Result},
    },
    chrono::{DateTime, Utc},
    std::{
        convert::TryFrom,
        path::{Path, PathBuf},
    },
};

/// Signature profile applied to the document.
///
/// The PAdES baseline levels are defined by ETSI EN 319 142-1.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConformanceLevel {
    PadesBaselineB,
    PadesBaselineT,
    PadesBaselineLt,
    PadesBaselineLta,
    /// Legacy `adbe.pkcs7.detached` signatures.
    Pkcs7Detached,
}

impl ConformanceLevel {
    /// Value of the signature dictionary `/SubFilter`.
    pub fn sub_filter(&self) -> &'static str {
        match self {
            Self::Pkcs7Detached => "adbe.pkcs7.detached",
            _ => "ETSI.CAdES.detached",
        }
    }

    pub fn is_pades(&self) -> bool {
        !matches!(self, Self::Pkcs7Detached)
    }

    /// Whether the CMS signed attributes carry `signing-time`.
    ///
    /// PAdES baseline signatures must not; the claimed time goes in the
    /// signature dictionary `/M` entry instead.
    pub fn has_signing_time_attribute(&self) -> bool {
        matches!(self, Self::Pkcs7Detached)
    }

    /// Whether the root certificate is embedded alongside the chain.
    pub fn embeds_root_certificate(&self) -> bool {
        matches!(self, Self::PadesBaselineLt | Self::PadesBaselineLta)
    }

    /// Space in the signature placeholder left for unsigned attributes
    /// added after signing (timestamp tokens, revocation values).
    pub fn reserved_unsigned_space(&self) -> usize {
        match self {
            Self::PadesBaselineB | Self::Pkcs7Detached => 0,
            Self::PadesBaselineT => 8192,
            Self::PadesBaselineLt | Self::PadesBaselineLta => 8192 + 16384,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PadesBaselineB => "PAdES-B-B",
            Self::PadesBaselineT => "PAdES-B-T",
            Self::PadesBaselineLt => "PAdES-B-LT",
            Self::PadesBaselineLta => "PAdES-B-LTA",
            Self::Pkcs7Detached => "adbe.pkcs7.detached",
        }
    }
}

impl std::fmt::Display for ConformanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConformanceLevel {
    type Error = RemoteSignError;

    /// Parse a level name.
    ///
    /// Case, `-`, `_`, `.` and spaces are ignored, so `baseline-B`,
    /// `PAdES_B_B` and `Ades_B_B` all name the same level.
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let normalized = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        let level = normalized
            .strip_prefix("pades")
            .or_else(|| normalized.strip_prefix("ades"))
            .or_else(|| normalized.strip_prefix("baseline"))
            .map(|rest| rest.strip_prefix("baseline").unwrap_or(rest));

        match (normalized.as_str(), level) {
            ("pkcs7" | "adbepkcs7detached" | "pkcs7detached", _) => Ok(Self::Pkcs7Detached),
            (_, Some("bb" | "b")) | ("bb", _) => Ok(Self::PadesBaselineB),
            (_, Some("bt" | "t")) | ("bt", _) => Ok(Self::PadesBaselineT),
            (_, Some("blt" | "lt")) | ("blt", _) => Ok(Self::PadesBaselineLt),
            (_, Some("blta" | "lta")) | ("blta", _) => Ok(Self::PadesBaselineLta),
            _ => Err(RemoteSignError::UnknownConformanceLevel(s.to_string())),
        }
    }
}

/// Textual encoding of digests sent to, and signatures received from, the
/// remote signer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestEncoding {
    Hex,
    Base64,
    /// Base64 with `+`, `/` and `=` percent-escaped.
    UrlEncodedBase64,
}

impl Default for DigestEncoding {
    fn default() -> Self {
        Self::Hex
    }
}

impl DigestEncoding {
    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            Self::Hex => codec::hex_encode(data).into(),
            Self::Base64 => codec::base64_encode(data).into(),
            Self::UrlEncodedBase64 => codec::url_encoded_base64_encode(data),
        }
    }

    pub fn decode(&self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Hex => codec::hex_decode(text),
            Self::Base64 => codec::base64_decode(text),
            Self::UrlEncodedBase64 => codec::url_encoded_base64_decode(text),
        }
    }
}

impl TryFrom<&str> for DigestEncoding {
    type Error = RemoteSignError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            "urlencoded-base64" | "url-base64" => Ok(Self::UrlEncodedBase64),
            _ => Err(RemoteSignError::InvalidConfiguration(format!(
                "unknown digest encoding: {}",
                s
            ))),
        }
    }
}

/// Where the document comes from and goes to, and how it is signed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DocumentConfig {
    input_path: PathBuf,
    output_path: PathBuf,
    conformance_level: ConformanceLevel,
}

impl DocumentConfig {
    /// Construct an instance after checking the paths.
    ///
    /// The input must be an existing file. The output must differ from
    /// the input and its parent directory must exist. Only file metadata
    /// is consulted.
    pub fn new(
        conformance_level: ConformanceLevel,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let input_path = input_path.as_ref().to_path_buf();
        let output_path = output_path.as_ref().to_path_buf();

        if input_path.as_os_str().is_empty() {
            return Err(RemoteSignError::InvalidConfiguration(
                "input path is empty".into(),
            ));
        }
        if output_path.as_os_str().is_empty() {
            return Err(RemoteSignError::InvalidConfiguration(
                "output path is empty".into(),
            ));
        }

        if !input_path.is_file() {
            return Err(RemoteSignError::InvalidConfiguration(format!(
                "input is not a file: {}",
                input_path.display()
            )));
        }

        if output_path == input_path
            || std::fs::canonicalize(&input_path).ok()
                == std::fs::canonicalize(&output_path).ok()
        {
            return Err(RemoteSignError::InvalidConfiguration(
                "output path must differ from input path".into(),
            ));
        }

        if output_path.is_dir() {
            return Err(RemoteSignError::InvalidConfiguration(format!(
                "output path is a directory: {}",
                output_path.display()
            )));
        }

        let parent = match output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(RemoteSignError::InvalidConfiguration(format!(
                "output directory does not exist: {}",
                parent.display()
            )));
        }

        Ok(Self {
            input_path,
            output_path,
            conformance_level,
        })
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn conformance_level(&self) -> ConformanceLevel {
        self.conformance_level
    }
}

/// Optional knobs for a signing session.
#[derive(Clone, Debug, Default)]
pub struct SigningSettings {
    digest_encoding: DigestEncoding,
    signing_time: Option<DateTime<Utc>>,
    reason: Option<String>,
    location: Option<String>,
    contact_info: Option<String>,
    field_name: Option<String>,
    signature_size: Option<usize>,
}

impl SigningSettings {
    /// Encoding of the digest handed out and the signature accepted back.
    pub fn digest_encoding(&self) -> DigestEncoding {
        self.digest_encoding
    }

    /// Set the digest encoding. The default is lowercase hex.
    pub fn set_digest_encoding(&mut self, encoding: DigestEncoding) {
        self.digest_encoding = encoding;
    }

    /// Claimed signing time. `None` means the time `begin_signing` runs.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.signing_time
    }

    /// Pin the claimed signing time.
    ///
    /// With a pinned time, two sessions over the same inputs produce the
    /// same digest.
    pub fn set_signing_time(&mut self, time: DateTime<Utc>) {
        self.signing_time = Some(time);
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_reason(&mut self, value: impl ToString) {
        self.reason = Some(value.to_string());
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn set_location(&mut self, value: impl ToString) {
        self.location = Some(value.to_string());
    }

    pub fn contact_info(&self) -> Option<&str> {
        self.contact_info.as_deref()
    }

    pub fn set_contact_info(&mut self, value: impl ToString) {
        self.contact_info = Some(value.to_string());
    }

    /// Name of the signature form field.
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn set_field_name(&mut self, value: impl ToString) {
        self.field_name = Some(value.to_string());
    }

    /// Capacity in bytes reserved for the CMS envelope.
    pub fn signature_size(&self) -> Option<usize> {
        self.signature_size
    }

    /// Override the computed envelope capacity.
    pub fn set_signature_size(&mut self, size: usize) {
        self.signature_size = Some(size);
    }
}
