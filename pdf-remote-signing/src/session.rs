// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Remote signing sessions.

A [SigningSession] signs one document with a key it never sees. The
caller asks for a digest with [SigningSession::begin_signing], has it
signed somewhere else and hands the signature back to
[SigningSession::finish_signing]. Between those calls the session holds the
opened document and the prepared signed attributes.

Sessions move through [SessionState::Constructed],
[SessionState::DigestPrepared] and [SessionState::Finalized]. Any failed
operation leaves the session in [SessionState::Error], which is terminal.
Calls made in the wrong state are rejected without changing it.
*/

use {
    crate::{
        algorithm::DigestAlgorithm,
        certificate::CertificateChain,
        document::{DocumentBackend, PlaceholderRef, PlaceholderRequest, SigningDocument},
        envelope::{EnvelopeBuilder, PendingDigest},
        error::{DocumentError, RemoteSignError, Result},
        pdf::PdfBackend,
        signing_settings::{ConformanceLevel, DocumentConfig, SigningSettings},
    },
    chrono::Utc,
    log::{debug, info, warn},
    std::{
        convert::TryFrom,
        fmt::Write,
        path::{Path, PathBuf},
    },
};

/// Room for everything in an envelope besides certificates and the
/// unsigned attribute reserve.
const ENVELOPE_BASE_SIZE: usize = 8192;

/// Externally visible phase of a [SigningSession].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Constructed,
    DigestPrepared,
    Finalized,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Constructed => "Constructed",
            Self::DigestPrepared => "DigestPrepared",
            Self::Finalized => "Finalized",
            Self::Error => "Error",
        })
    }
}

enum Phase {
    Constructed,
    DigestPrepared {
        document: Box<dyn SigningDocument>,
        placeholder: PlaceholderRef,
        pending: PendingDigest,
    },
    Finalized,
    Error,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Constructed => SessionState::Constructed,
            Self::DigestPrepared { .. } => SessionState::DigestPrepared,
            Self::Finalized => SessionState::Finalized,
            Self::Error => SessionState::Error,
        }
    }
}

/// Construct a [SigningSession] with optional settings and backend.
pub struct SessionBuilder {
    conformance_level: String,
    hash_algorithm_oid: String,
    input_path: PathBuf,
    output_path: PathBuf,
    end_entity_certificate: String,
    certificate_chain: Vec<String>,
    root_certificate: Option<String>,
    label: Option<String>,
    settings: SigningSettings,
    backend: Box<dyn DocumentBackend>,
}

impl SessionBuilder {
    /// Start with the inputs every session needs.
    ///
    /// Documents are handled by [PdfBackend] unless another backend is
    /// registered.
    pub fn new(
        conformance_level: impl ToString,
        hash_algorithm_oid: impl ToString,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        end_entity_certificate: impl ToString,
    ) -> Self {
        Self {
            conformance_level: conformance_level.to_string(),
            hash_algorithm_oid: hash_algorithm_oid.to_string(),
            input_path: input_path.as_ref().to_path_buf(),
            output_path: output_path.as_ref().to_path_buf(),
            end_entity_certificate: end_entity_certificate.to_string(),
            certificate_chain: vec![],
            root_certificate: None,
            label: None,
            settings: SigningSettings::default(),
            backend: Box::new(PdfBackend),
        }
    }

    /// Append a certificate to the chain after the signer.
    pub fn chain_certificate(mut self, certificate: impl ToString) -> Self {
        self.certificate_chain.push(certificate.to_string());
        self
    }

    pub fn root_certificate(mut self, certificate: impl ToString) -> Self {
        self.root_certificate = Some(certificate.to_string());
        self
    }

    pub fn label(mut self, label: impl ToString) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn settings(mut self, settings: SigningSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn backend(mut self, backend: Box<dyn DocumentBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Validate everything and produce a session.
    ///
    /// Checks run in order: digest algorithm, conformance level, paths,
    /// certificates, then key and digest compatibility. The document is not
    /// opened.
    pub fn build(self) -> Result<SigningSession> {
        let digest_algorithm = DigestAlgorithm::from_identifier(&self.hash_algorithm_oid);
        if !digest_algorithm.is_supported() {
            return Err(RemoteSignError::UnsupportedAlgorithm(
                self.hash_algorithm_oid,
            ));
        }

        let level = ConformanceLevel::try_from(self.conformance_level.as_str())?;
        let config = DocumentConfig::new(level, &self.input_path, &self.output_path)?;

        let chain = CertificateChain::resolve(
            &self.end_entity_certificate,
            self.certificate_chain.as_slice(),
            self.root_certificate.as_deref(),
        )?;

        let builder = EnvelopeBuilder::new(chain, digest_algorithm, level)?;

        info!(
            "signing session for {} constructed ({}, {})",
            config.input_path().display(),
            level,
            digest_algorithm
        );

        Ok(SigningSession {
            config,
            builder,
            label: self.label,
            settings: self.settings,
            backend: self.backend,
            phase: Phase::Constructed,
        })
    }
}

/// Two-phase signature over a single document.
///
/// Not clonable. The document opened by [Self::begin_signing] is released
/// by [Self::finish_signing], [Self::dispose] or drop, whichever comes
/// first.
pub struct SigningSession {
    config: DocumentConfig,
    builder: EnvelopeBuilder,
    label: Option<String>,
    settings: SigningSettings,
    backend: Box<dyn DocumentBackend>,
    phase: Phase,
}

impl SigningSession {
    /// Construct a session using the PDF backend and default settings.
    ///
    /// Certificates are PEM or Base64 text. See [SessionBuilder::build] for
    /// the checks performed.
    ///
    /// The signature's `/M` entry is taken from [Utc::now] when signing
    /// begins, so two sessions over the same document produce different
    /// digests. Pin the time with [SigningSettings::set_signing_time] through
    /// [SessionBuilder::settings] to make digests reproducible.
    #[allow(clippy::too_many_arguments)]
    pub fn new<S: AsRef<str>>(
        conformance_level: &str,
        hash_algorithm_oid: &str,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        end_entity_certificate: &str,
        certificate_chain: &[S],
        root_certificate: Option<&str>,
        label: Option<&str>,
    ) -> Result<Self> {
        let mut builder = SessionBuilder::new(
            conformance_level,
            hash_algorithm_oid,
            input_path,
            output_path,
            end_entity_certificate,
        );

        for cert in certificate_chain {
            builder = builder.chain_certificate(cert.as_ref());
        }
        if let Some(root) = root_certificate {
            builder = builder.root_certificate(root);
        }
        if let Some(label) = label {
            builder = builder.label(label);
        }

        builder.build()
    }

    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn settings(&self) -> &SigningSettings {
        &self.settings
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.builder.digest_algorithm()
    }

    pub fn chain(&self) -> &CertificateChain {
        self.builder.chain()
    }

    /// Whether the session can still make progress.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.phase,
            Phase::Constructed | Phase::DigestPrepared { .. }
        )
    }

    /// The DER message the remote signature must cover.
    ///
    /// Only available between the two signing calls. Signers that hash
    /// their input themselves need this rather than the digest.
    pub fn signed_attributes(&self) -> Option<&[u8]> {
        match &self.phase {
            Phase::DigestPrepared { pending, .. } => Some(pending.signed_attributes_der()),
            _ => None,
        }
    }

    /// Open the document and compute the digest to be signed remotely.
    ///
    /// Returns the digest in the configured [crate::DigestEncoding].
    ///
    /// The digest covers the signing time, which defaults to the current
    /// time. Only sessions sharing a pinned
    /// [SigningSettings::signing_time] agree on it.
    pub fn begin_signing(&mut self) -> Result<String> {
        if !matches!(self.phase, Phase::Constructed) {
            return Err(RemoteSignError::InvalidState {
                operation: "begin_signing",
                state: self.state(),
            });
        }

        match self.prepare() {
            Ok((document, placeholder, pending)) => {
                let digest = self.settings.digest_encoding().encode(pending.digest());

                info!(
                    "digest prepared for {}",
                    self.config.input_path().display()
                );
                self.phase = Phase::DigestPrepared {
                    document,
                    placeholder,
                    pending,
                };

                Ok(digest)
            }
            Err(e) => {
                self.phase = Phase::Error;
                Err(e)
            }
        }
    }

    fn prepare(&self) -> Result<(Box<dyn SigningDocument>, PlaceholderRef, PendingDigest)> {
        let mut document = self
            .backend
            .open_for_signing(self.config.input_path())
            .map_err(|source| self.document_error("open", self.config.input_path(), source))?;

        match self.reserve_and_digest(document.as_mut()) {
            Ok((placeholder, pending)) => Ok((document, placeholder, pending)),
            Err(e) => {
                release(document);
                Err(e)
            }
        }
    }

    fn reserve_and_digest(
        &self,
        document: &mut dyn SigningDocument,
    ) -> Result<(PlaceholderRef, PendingDigest)> {
        let level = self.config.conformance_level();
        let signing_time = self.settings.signing_time().unwrap_or_else(Utc::now);
        let capacity = self.envelope_capacity();
        debug!("reserving {} bytes for the signature envelope", capacity);

        let request = PlaceholderRequest {
            conformance_level: level,
            capacity,
            signing_time,
            signer_name: self.label.as_deref(),
            reason: self.settings.reason(),
            location: self.settings.location(),
            contact_info: self.settings.contact_info(),
            field_name: self.settings.field_name(),
        };

        let placeholder = document
            .reserve_signature_placeholder(&request)
            .map_err(|source| self.document_error("reserve", self.config.input_path(), source))?;
        debug!("signed byte range: {:?}", placeholder.byte_range());

        let pending = self
            .builder
            .prepare_signable_digest(document, &placeholder, signing_time)?;

        Ok((placeholder, pending))
    }

    /// Bytes to reserve for the CMS envelope.
    fn envelope_capacity(&self) -> usize {
        if let Some(size) = self.settings.signature_size() {
            return size;
        }

        let level = self.config.conformance_level();
        let chain = self.builder.chain();
        let mut certificates = chain.iter().map(|cert| cert.der().len()).sum::<usize>();
        if level.embeds_root_certificate() {
            certificates += chain.root().map(|cert| cert.der().len()).unwrap_or(0);
        }

        ENVELOPE_BASE_SIZE + certificates + level.reserved_unsigned_space()
    }

    /// Embed the remote signature and write the output document.
    ///
    /// `signed_hash` uses the same encoding as the digest returned by
    /// [Self::begin_signing].
    pub fn finish_signing(&mut self, signed_hash: &str) -> Result<()> {
        let (mut document, placeholder, pending) =
            match std::mem::replace(&mut self.phase, Phase::Error) {
                Phase::DigestPrepared {
                    document,
                    placeholder,
                    pending,
                } => (document, placeholder, pending),
                other => {
                    let state = other.state();
                    self.phase = other;

                    return Err(RemoteSignError::InvalidState {
                        operation: "finish_signing",
                        state,
                    });
                }
            };

        let result = self.complete(document.as_mut(), &placeholder, pending, signed_hash);
        release(document);
        result?;

        info!("signed document written to {}", self.config.output_path().display());
        self.phase = Phase::Finalized;

        Ok(())
    }

    fn complete(
        &self,
        document: &mut dyn SigningDocument,
        placeholder: &PlaceholderRef,
        pending: PendingDigest,
        signed_hash: &str,
    ) -> Result<()> {
        let signed_hash = signed_hash.trim();
        if signed_hash.is_empty() {
            return Err(RemoteSignError::EmptySignature);
        }

        let signature = self.settings.digest_encoding().decode(signed_hash)?;
        let envelope = self.builder.finalize_envelope(pending, &signature)?;

        document
            .commit_signature(placeholder, &envelope)
            .map_err(|source| self.document_error("commit", self.config.input_path(), source))?;
        document
            .save(self.config.output_path())
            .map_err(|source| self.document_error("save", self.config.output_path(), source))?;

        Ok(())
    }

    /// Release the session and any document it holds.
    pub fn dispose(mut self) -> Result<()> {
        if let Phase::DigestPrepared { document, .. } =
            std::mem::replace(&mut self.phase, Phase::Error)
        {
            let path = document.path().to_path_buf();
            document
                .close()
                .map_err(|source| self.document_error("close", &path, source))?;
        }

        Ok(())
    }

    /// Describe the session. Has no effect on its state.
    pub fn print_state(&self) -> String {
        let mut s = String::new();
        let chain = self.builder.chain();

        // Writing to a String cannot fail.
        let _ = writeln!(s, "state: {}", self.state());
        let _ = writeln!(s, "label: {}", self.label.as_deref().unwrap_or("<none>"));
        let _ = writeln!(
            s,
            "conformance level: {}",
            self.config.conformance_level()
        );
        let _ = writeln!(
            s,
            "digest algorithm: {} ({})",
            self.digest_algorithm(),
            self.digest_algorithm().identifier().unwrap_or("?")
        );
        let _ = writeln!(
            s,
            "digest encoding: {:?}",
            self.settings.digest_encoding()
        );
        let _ = writeln!(s, "input: {}", self.config.input_path().display());
        let _ = writeln!(s, "output: {}", self.config.output_path().display());
        let _ = writeln!(
            s,
            "signer: {} ({:?})",
            chain.end_entity().subject(),
            chain.signer().key_algorithm
        );
        for (i, cert) in chain.chain().iter().enumerate() {
            let _ = writeln!(s, "chain #{}: {}", i, cert.subject());
        }
        if let Some(root) = chain.root() {
            let _ = writeln!(s, "root: {}", root.subject());
        }

        s
    }

    fn document_error(
        &self,
        phase: &'static str,
        path: &Path,
        source: DocumentError,
    ) -> RemoteSignError {
        RemoteSignError::Document {
            phase,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Drop for SigningSession {
    fn drop(&mut self) {
        if let Phase::DigestPrepared { document, .. } =
            std::mem::replace(&mut self.phase, Phase::Error)
        {
            warn!(
                "signing session dropped before finishing; releasing {}",
                document.path().display()
            );
            release(document);
        }
    }
}

fn release(document: Box<dyn SigningDocument>) {
    let path = document.path().to_path_buf();
    if let Err(e) = document.close() {
        warn!("error closing {}: {}", path.display(), e);
    }
}
