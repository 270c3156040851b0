// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PDF document backend.

Signatures are added with an incremental update: the original file is
kept byte for byte and a new section is appended holding

* the signature dictionary, with a zero filled `/Contents` placeholder
  and a `/ByteRange` covering everything except that placeholder,
* an invisible signature widget which is also the form field,
* the updated interactive form and document catalog (and first page, so
  the widget is listed among its annotations),
* a cross-reference table for the new and rewritten objects and a trailer
  chaining to the previous one.

Objects are located by scanning for their `N G obj` headers, the last
definition winning. Objects stored inside compressed object streams
cannot be found that way and are reported as unsupported.
*/

use {
    crate::{
        algorithm::DigestAlgorithm,
        codec,
        document::{
            ByteRange, DocumentBackend, PlaceholderRef, PlaceholderRequest, SigningDocument,
        },
        envelope::SignedEnvelope,
        error::DocumentError,
        pdf_syntax::{self, Dictionary, ObjectRef},
    },
    log::{debug, info},
    once_cell::sync::Lazy,
    regex::bytes::Regex,
    std::{
        collections::HashMap,
        fs::File,
        io::{Read, Write},
        ops::Range,
        path::{Path, PathBuf},
    },
};

/// Indirect object header, e.g. `12 0 obj`.
static RE_OBJECT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+)[\x00\t\n\x0c\r ]+([0-9]+)[\x00\t\n\x0c\r ]+obj").unwrap()
});

const BYTE_RANGE_PLACEHOLDER: &str = "[0000000000 0000000000 0000000000 0000000000]";

/// Annotation flags: print and locked.
const WIDGET_FLAGS: u32 = 132;

/// Signature flags: signatures exist and the file is append only.
const SIG_FLAGS: u32 = 3;

/// Opens PDF files for signing.
#[derive(Clone, Copy, Debug, Default)]
pub struct PdfBackend;

impl DocumentBackend for PdfBackend {
    fn open_for_signing(&self, path: &Path) -> Result<Box<dyn SigningDocument>, DocumentError> {
        Ok(Box::new(PdfDocument::open(path)?))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// The parts of the last trailer an update carries forward.
#[derive(Clone, Debug)]
struct Trailer {
    root: ObjectRef,
    size: u32,
    /// Offset of the last cross-reference section.
    prev: usize,
    id: Option<Vec<u8>>,
    info: Option<Vec<u8>>,
}

impl Trailer {
    fn parse(data: &[u8]) -> Result<Self, DocumentError> {
        let marker = rfind(data, b"startxref")
            .ok_or_else(|| DocumentError::Malformed("no startxref marker".into()))?;

        let start = pdf_syntax::skip_whitespace(data, marker + b"startxref".len());
        let end = data[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map(|i| start + i)
            .unwrap_or(data.len());

        let prev = pdf_syntax::parse_integer(&data[start..end])
            .map(|v| v as usize)
            .filter(|v| *v < data.len())
            .ok_or_else(|| DocumentError::Malformed("invalid startxref offset".into()))?;

        let section = &data[prev..];

        let dict = if section.starts_with(b"xref") {
            let trailer = find(section, b"trailer")
                .ok_or_else(|| DocumentError::Malformed("no trailer after xref".into()))?;
            Dictionary::parse(data, prev + trailer + b"trailer".len())?.0
        } else {
            // Cross-reference stream, whose dictionary doubles as trailer.
            let obj = find(section, b"obj").ok_or_else(|| {
                DocumentError::Malformed("startxref does not point at a cross-reference".into())
            })?;
            let dict = Dictionary::parse(data, prev + obj + b"obj".len())?.0;
            if !dict.has_name("Type", "XRef") {
                return Err(DocumentError::Malformed(
                    "startxref does not point at a cross-reference".into(),
                ));
            }
            dict
        };

        let root = dict
            .get_reference("Root")
            .ok_or_else(|| DocumentError::Malformed("trailer has no /Root".into()))?;
        let size = dict
            .get("Size")
            .and_then(pdf_syntax::parse_integer)
            .ok_or_else(|| DocumentError::Malformed("trailer has no /Size".into()))?
            as u32;

        Ok(Self {
            root,
            size,
            prev,
            id: dict.get("ID").map(|v| v.to_vec()),
            info: dict.get("Info").map(|v| v.to_vec()),
        })
    }
}

/// Offsets just past each object header. Later definitions win.
fn index_objects(data: &[u8]) -> HashMap<ObjectRef, usize> {
    let mut objects = HashMap::new();

    for caps in RE_OBJECT_HEADER.captures_iter(data) {
        let number = caps
            .get(1)
            .and_then(|m| pdf_syntax::parse_integer(m.as_bytes()));
        let generation = caps
            .get(2)
            .and_then(|m| pdf_syntax::parse_integer(m.as_bytes()));
        let end = caps.get(0).map(|m| m.end());

        if let (Some(number), Some(generation), Some(end)) = (number, generation, end) {
            if number <= u32::MAX as u64 && generation <= u16::MAX as u64 {
                objects.insert(ObjectRef::new(number as u32, generation as u16), end);
            }
        }
    }

    objects
}

/// The appended section, once laid out.
#[derive(Debug)]
struct IncrementalUpdate {
    token: u64,
    bytes: Vec<u8>,
    /// `/Contents` hex string including delimiters, relative to `bytes`.
    contents: Range<usize>,
    capacity: usize,
    committed: bool,
}

/// A PDF file opened for signing.
pub struct PdfDocument {
    path: PathBuf,
    // Held open until the document is closed.
    _file: File,
    data: Vec<u8>,
    trailer: Trailer,
    objects: HashMap<ObjectRef, usize>,
    update: Option<IncrementalUpdate>,
    next_token: u64,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if !data
            .get(..1024.min(data.len()))
            .map(|head| find(head, b"%PDF-").is_some())
            .unwrap_or(false)
        {
            return Err(DocumentError::Malformed("missing %PDF header".into()));
        }

        let trailer = Trailer::parse(&data)?;
        let objects = index_objects(&data);

        debug!(
            "opened {}: {} bytes, {} objects, root {}",
            path.display(),
            data.len(),
            objects.len(),
            trailer.root
        );

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            data,
            trailer,
            objects,
            update: None,
            next_token: 1,
        })
    }

    fn object_dictionary(&self, reference: ObjectRef) -> Result<Dictionary, DocumentError> {
        let offset = self.objects.get(&reference).ok_or_else(|| {
            DocumentError::Unsupported(format!(
                "object {} not found (compressed object streams are not supported)",
                reference
            ))
        })?;

        Ok(Dictionary::parse(&self.data, *offset)?.0)
    }

    fn first_page(&self, catalog: &Dictionary) -> Option<(ObjectRef, Dictionary)> {
        let mut node = catalog.get_reference("Pages")?;

        for _ in 0..32 {
            let dict = self.object_dictionary(node).ok()?;
            if dict.has_name("Type", "Page") {
                return Some((node, dict));
            }

            node = *pdf_syntax::array_references(dict.get("Kids")?).first()?;
        }

        None
    }

    fn update_for(&self, placeholder: &PlaceholderRef) -> Result<&IncrementalUpdate, DocumentError> {
        match &self.update {
            Some(update) if update.token == placeholder.token() => Ok(update),
            _ => Err(DocumentError::PlaceholderMismatch),
        }
    }

    fn layout(
        &self,
        request: &PlaceholderRequest<'_>,
    ) -> Result<(Vec<u8>, Range<usize>, Range<usize>), DocumentError> {
        let mut catalog = self.object_dictionary(self.trailer.root)?;

        let signature_ref = ObjectRef::new(self.trailer.size, 0);
        let widget_ref = ObjectRef::new(self.trailer.size + 1, 0);

        let mut objects = vec![];

        let existing_fields = if let Some(raw) = catalog.get("AcroForm").map(|v| v.to_vec()) {
            if let Some(form_ref) = pdf_syntax::parse_reference(&raw) {
                let mut form = self.object_dictionary(form_ref)?;
                let existing = add_form_field(&mut form, widget_ref)?;
                objects.push((form_ref, form.to_bytes()));
                existing
            } else {
                let (mut form, _) = Dictionary::parse(&raw, 0)?;
                let existing = add_form_field(&mut form, widget_ref)?;
                catalog.set("AcroForm", form.to_bytes());
                existing
            }
        } else {
            let mut form = Dictionary::default();
            add_form_field(&mut form, widget_ref)?;
            catalog.set("AcroForm", form.to_bytes());
            0
        };

        let field_name = request
            .field_name
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Signature{}", existing_fields + 1));

        let mut widget = Dictionary::default();
        widget.set("Type", "/Annot");
        widget.set("Subtype", "/Widget");
        widget.set("FT", "/Sig");
        widget.set("T", pdf_syntax::text_string(&field_name));
        widget.set("V", signature_ref.to_string());
        widget.set("F", WIDGET_FLAGS.to_string());
        widget.set("Rect", "[0 0 0 0]");

        if let Some((page_ref, mut page)) = self.first_page(&catalog) {
            // An indirect /Annots array is left alone; the form still
            // reaches the widget.
            let annots = match page.get("Annots") {
                None => Some(pdf_syntax::array_with_reference(None, widget_ref)?),
                Some(raw) => pdf_syntax::array_with_reference(Some(raw), widget_ref).ok(),
            };

            if let Some(annots) = annots {
                page.set("Annots", annots);
                objects.push((page_ref, page.to_bytes()));
            }
            widget.set("P", page_ref.to_string());
        }

        let mut signature = format!(
            "<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /{} /ByteRange {} /Contents <{}> /M {}",
            request.conformance_level.sub_filter(),
            BYTE_RANGE_PLACEHOLDER,
            "0".repeat(request.capacity * 2),
            pdf_syntax::date_string(&request.signing_time),
        );
        for (key, value) in [
            ("Name", request.signer_name),
            ("Reason", request.reason),
            ("Location", request.location),
            ("ContactInfo", request.contact_info),
        ] {
            if let Some(value) = value {
                signature.push_str(&format!(" /{} {}", key, pdf_syntax::text_string(value)));
            }
        }
        signature.push_str(" >>");

        objects.push((self.trailer.root, catalog.to_bytes()));
        objects.push((signature_ref, signature.into_bytes()));
        objects.push((widget_ref, widget.to_bytes()));
        objects.sort_by_key(|(r, _)| *r);

        let base = self.data.len();
        let mut bytes = vec![];
        if !matches!(self.data.last(), Some(b'\n' | b'\r')) {
            bytes.push(b'\n');
        }

        let mut offsets = vec![];
        let mut byte_range = 0..0;
        let mut contents = 0..0;

        for (reference, body) in &objects {
            offsets.push((*reference, base + bytes.len()));
            bytes.extend_from_slice(
                format!("{} {} obj\n", reference.number, reference.generation).as_bytes(),
            );

            if *reference == signature_ref {
                let start = bytes.len();
                let range_at = find(body, BYTE_RANGE_PLACEHOLDER.as_bytes()).ok_or_else(|| {
                    DocumentError::Malformed("signature dictionary layout".into())
                })?;
                let contents_at = find(body, b"/Contents <").ok_or_else(|| {
                    DocumentError::Malformed("signature dictionary layout".into())
                })? + b"/Contents ".len();

                byte_range = start + range_at..start + range_at + BYTE_RANGE_PLACEHOLDER.len();
                contents = start + contents_at..start + contents_at + request.capacity * 2 + 2;
            }

            bytes.extend_from_slice(body);
            bytes.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = base + bytes.len();
        bytes.extend_from_slice(b"xref\n");
        for group in consecutive_runs(&offsets) {
            bytes.extend_from_slice(
                format!("{} {}\n", group[0].0.number, group.len()).as_bytes(),
            );
            for (reference, offset) in group {
                bytes.extend_from_slice(
                    format!("{:010} {:05} n \n", offset, reference.generation).as_bytes(),
                );
            }
        }

        let mut trailer = Dictionary::default();
        trailer.set("Size", (self.trailer.size + 2).to_string());
        trailer.set("Root", self.trailer.root.to_string());
        if let Some(info) = &self.trailer.info {
            trailer.set("Info", info.clone());
        }
        trailer.set("Prev", self.trailer.prev.to_string());
        trailer.set(
            "ID",
            self.trailer.id.clone().unwrap_or_else(|| {
                let id = codec::hex_encode(
                    &ring::digest::digest(&ring::digest::SHA256, &self.data).as_ref()[..16],
                );
                format!("[<{}> <{}>]", id, id).into_bytes()
            }),
        );

        bytes.extend_from_slice(b"trailer\n");
        bytes.extend_from_slice(&trailer.to_bytes());
        bytes.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        Ok((bytes, byte_range, contents))
    }
}

/// Split `(reference, offset)` pairs sorted by object number into runs of
/// consecutive numbers, one per cross-reference subsection.
fn consecutive_runs(entries: &[(ObjectRef, usize)]) -> Vec<&[(ObjectRef, usize)]> {
    let mut runs = vec![];
    let mut start = 0;

    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].0.number != entries[i - 1].0.number + 1 {
            runs.push(&entries[start..i]);
            start = i;
        }
    }

    runs
}

/// Add a field to an interactive form dictionary.
///
/// Returns the number of fields present before.
fn add_form_field(form: &mut Dictionary, field: ObjectRef) -> Result<usize, DocumentError> {
    let existing = form
        .get("Fields")
        .map(|raw| pdf_syntax::array_references(raw).len())
        .unwrap_or(0);
    let fields = pdf_syntax::array_with_reference(form.get("Fields"), field)?;

    form.set("Fields", fields);
    form.set("SigFlags", SIG_FLAGS.to_string());

    Ok(existing)
}

impl SigningDocument for PdfDocument {
    fn path(&self) -> &Path {
        &self.path
    }

    fn reserve_signature_placeholder(
        &mut self,
        request: &PlaceholderRequest<'_>,
    ) -> Result<PlaceholderRef, DocumentError> {
        if self.update.is_some() {
            return Err(DocumentError::Unsupported(
                "a signature placeholder is already reserved".into(),
            ));
        }

        let (mut bytes, byte_range_pos, contents) = self.layout(request)?;

        let base = self.data.len();
        let total = base + bytes.len();
        let byte_range = ByteRange([
            0,
            base + contents.start,
            base + contents.end,
            total - (base + contents.end),
        ]);

        let rendered = format!(
            "[{:010} {:010} {:010} {:010}]",
            byte_range.0[0], byte_range.0[1], byte_range.0[2], byte_range.0[3]
        );
        if rendered.len() != byte_range_pos.len() {
            return Err(DocumentError::Unsupported(
                "document too large for byte range".into(),
            ));
        }
        bytes[byte_range_pos].copy_from_slice(rendered.as_bytes());

        let token = self.next_token;
        self.next_token += 1;

        debug!(
            "reserved {} byte signature placeholder in {}; byte range {:?}",
            request.capacity,
            self.path.display(),
            byte_range.0
        );

        self.update = Some(IncrementalUpdate {
            token,
            bytes,
            contents,
            capacity: request.capacity,
            committed: false,
        });

        Ok(PlaceholderRef::new(token, byte_range, request.capacity))
    }

    fn compute_byte_range_digest(
        &mut self,
        placeholder: &PlaceholderRef,
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<u8>, DocumentError> {
        let update = self.update_for(placeholder)?;

        let mut ctx = algorithm
            .digester()
            .map_err(|e| DocumentError::Unsupported(e.to_string()))?;
        ctx.update(&self.data);
        ctx.update(&update.bytes[..update.contents.start]);
        ctx.update(&update.bytes[update.contents.end..]);

        Ok(ctx.finish().as_ref().to_vec())
    }

    fn commit_signature(
        &mut self,
        placeholder: &PlaceholderRef,
        envelope: &SignedEnvelope,
    ) -> Result<(), DocumentError> {
        self.update_for(placeholder)?;

        let update = self
            .update
            .as_mut()
            .ok_or(DocumentError::PlaceholderMismatch)?;

        if envelope.len() > update.capacity {
            return Err(DocumentError::PlaceholderTooSmall {
                needed: envelope.len(),
                available: update.capacity,
            });
        }

        let hex = codec::hex_encode(envelope.as_slice());
        let start = update.contents.start + 1;
        update.bytes[start..start + hex.as_str().len()].copy_from_slice(hex.as_str().as_bytes());
        update.committed = true;

        debug!(
            "committed {} byte signature ({} bytes of room)",
            envelope.len(),
            update.capacity
        );

        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<(), DocumentError> {
        let update = match &self.update {
            Some(update) if update.committed => update,
            _ => {
                return Err(DocumentError::Unsupported(
                    "no signature has been committed".into(),
                ))
            }
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&self.data)?;
        temp.write_all(&update.bytes)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| DocumentError::Io(e.error))?;

        info!(
            "wrote signed document to {} ({} bytes)",
            path.display(),
            self.data.len() + update.bytes.len()
        );

        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), DocumentError> {
        debug!("closing {}", self.path.display());
        Ok(())
    }
}
