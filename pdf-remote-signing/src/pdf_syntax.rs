// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Minimal PDF object syntax.

Incremental updates rewrite a handful of dictionaries (catalog, form,
page) while leaving every other entry exactly as it was. This module
therefore parses dictionaries into ordered key and raw value pairs rather
than into a full object model. Values are kept as the bytes found in the
file and written back unchanged.
*/

use {
    crate::error::DocumentError,
    chrono::{DateTime, Utc},
};

const MAX_DEPTH: usize = 64;

fn malformed(msg: impl Into<String>) -> DocumentError {
    DocumentError::Malformed(msg.into())
}

pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0')
}

pub fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Skip whitespace and comments.
pub fn skip_whitespace(data: &[u8], mut pos: usize) -> usize {
    while let Some(&b) = data.get(pos) {
        if is_whitespace(b) {
            pos += 1;
        } else if b == b'%' {
            while let Some(&b) = data.get(pos) {
                if b == b'\r' || b == b'\n' {
                    break;
                }
                pos += 1;
            }
        } else {
            break;
        }
    }

    pos
}

fn token_end(data: &[u8], mut pos: usize) -> usize {
    while let Some(&b) = data.get(pos) {
        if is_whitespace(b) || is_delimiter(b) {
            break;
        }
        pos += 1;
    }

    pos
}

fn is_integer(token: &[u8]) -> bool {
    !token.is_empty() && token.iter().all(|b| b.is_ascii_digit())
}

/// Parse a non-negative integer, ignoring surrounding whitespace.
pub fn parse_integer(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

/// An indirect object reference.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectRef {
    pub number: u32,
    pub generation: u16,
}

impl ObjectRef {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// Parse `N G R`.
pub fn parse_reference(raw: &[u8]) -> Option<ObjectRef> {
    let text = std::str::from_utf8(raw).ok()?;
    let mut parts = text.split_ascii_whitespace();

    let number = parts.next()?.parse().ok()?;
    let generation = parts.next()?.parse().ok()?;

    match (parts.next(), parts.next()) {
        (Some("R"), None) => Some(ObjectRef::new(number, generation)),
        _ => None,
    }
}

/// Find the end of the object starting at or after `pos`.
///
/// A reference (`N G R`) is treated as one object.
pub fn skip_object(data: &[u8], pos: usize) -> Result<usize, DocumentError> {
    skip_object_depth(data, pos, 0)
}

fn skip_object_depth(data: &[u8], pos: usize, depth: usize) -> Result<usize, DocumentError> {
    if depth > MAX_DEPTH {
        return Err(malformed("objects nested too deeply"));
    }

    let pos = skip_whitespace(data, pos);

    match data.get(pos) {
        None => Err(malformed("unexpected end of data")),
        Some(b'<') if data.get(pos + 1) == Some(&b'<') => {
            parse_dictionary_depth(data, pos, depth + 1).map(|(_, end)| end)
        }
        Some(b'<') => data[pos..]
            .iter()
            .position(|b| *b == b'>')
            .map(|i| pos + i + 1)
            .ok_or_else(|| malformed("unterminated hex string")),
        Some(b'(') => skip_literal_string(data, pos),
        Some(b'[') => {
            let mut p = pos + 1;
            loop {
                p = skip_whitespace(data, p);
                match data.get(p) {
                    None => return Err(malformed("unterminated array")),
                    Some(b']') => return Ok(p + 1),
                    Some(_) => p = skip_object_depth(data, p, depth + 1)?,
                }
            }
        }
        Some(b'/') => Ok(token_end(data, pos + 1)),
        Some(b')' | b'>' | b']' | b'{' | b'}') => Err(malformed(format!(
            "unexpected delimiter at offset {}",
            pos
        ))),
        Some(_) => {
            let end = token_end(data, pos);
            if end == pos {
                return Err(malformed(format!("empty token at offset {}", pos)));
            }

            if is_integer(&data[pos..end]) {
                let p2 = skip_whitespace(data, end);
                let e2 = token_end(data, p2);
                if e2 > p2 && is_integer(&data[p2..e2]) {
                    let p3 = skip_whitespace(data, e2);
                    if data.get(p3) == Some(&b'R') && token_end(data, p3) == p3 + 1 {
                        return Ok(p3 + 1);
                    }
                }
            }

            Ok(end)
        }
    }
}

fn skip_literal_string(data: &[u8], pos: usize) -> Result<usize, DocumentError> {
    let mut depth = 0usize;
    let mut p = pos;

    while let Some(&b) = data.get(p) {
        match b {
            b'\\' => p += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(p + 1);
                }
            }
            _ => {}
        }
        p += 1;
    }

    Err(malformed("unterminated literal string"))
}

/// A dictionary with entries in file order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Dictionary {
    entries: Vec<(String, Vec<u8>)>,
}

impl Dictionary {
    /// Parse the dictionary starting at or after `pos`.
    ///
    /// Returns the dictionary and the offset just past its closing `>>`.
    pub fn parse(data: &[u8], pos: usize) -> Result<(Self, usize), DocumentError> {
        parse_dictionary_depth(data, pos, 0)
    }

    /// Raw value for a key given without the leading slash.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Value of a key holding a reference.
    pub fn get_reference(&self, key: &str) -> Option<ObjectRef> {
        self.get(key).and_then(parse_reference)
    }

    /// Whether a name-valued key holds `name` (given without slash).
    pub fn has_name(&self, key: &str, name: &str) -> bool {
        self.get(key)
            .map(|v| v.strip_prefix(b"/") == Some(name.as_bytes()))
            .unwrap_or(false)
    }

    /// Replace or append an entry.
    pub fn set(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = b"<<".to_vec();
        for (key, value) in &self.entries {
            out.extend_from_slice(b" /");
            out.extend_from_slice(key.as_bytes());
            out.push(b' ');
            out.extend_from_slice(value);
        }
        out.extend_from_slice(b" >>");

        out
    }
}

fn parse_dictionary_depth(
    data: &[u8],
    pos: usize,
    depth: usize,
) -> Result<(Dictionary, usize), DocumentError> {
    let pos = skip_whitespace(data, pos);

    if !data[pos.min(data.len())..].starts_with(b"<<") {
        return Err(malformed(format!("expected dictionary at offset {}", pos)));
    }

    let mut dict = Dictionary::default();
    let mut p = pos + 2;

    loop {
        p = skip_whitespace(data, p);

        if data[p.min(data.len())..].starts_with(b">>") {
            return Ok((dict, p + 2));
        }

        if data.get(p) != Some(&b'/') {
            return Err(malformed(format!("expected name at offset {}", p)));
        }

        let key_end = token_end(data, p + 1);
        let key = String::from_utf8_lossy(&data[p + 1..key_end]).to_string();

        let value_start = skip_whitespace(data, key_end);
        let value_end = skip_object_depth(data, value_start, depth)?;

        dict.entries.push((key, data[value_start..value_end].to_vec()));
        p = value_end;
    }
}

/// Append a reference to a raw array value, or start a new array.
pub fn array_with_reference(
    raw: Option<&[u8]>,
    reference: ObjectRef,
) -> Result<Vec<u8>, DocumentError> {
    let item = reference.to_string();

    match raw {
        None => Ok(format!("[{}]", item).into_bytes()),
        Some(raw) => {
            let trimmed = trim(raw);
            if !trimmed.starts_with(b"[") || !trimmed.ends_with(b"]") {
                return Err(DocumentError::Unsupported(
                    "array value is not a direct array".into(),
                ));
            }

            let mut out = trimmed[..trimmed.len() - 1].to_vec();
            if out.len() > 1 {
                out.push(b' ');
            }
            out.extend_from_slice(item.as_bytes());
            out.push(b']');

            Ok(out)
        }
    }
}

/// References contained in a raw array value, in order.
pub fn array_references(raw: &[u8]) -> Vec<ObjectRef> {
    let trimmed = trim(raw);
    let inner = trimmed
        .strip_prefix(b"[")
        .and_then(|s| s.strip_suffix(b"]"))
        .unwrap_or(trimmed);

    let mut refs = vec![];
    let mut p = 0;
    while p < inner.len() {
        let start = skip_whitespace(inner, p);
        if start >= inner.len() {
            break;
        }
        match skip_object(inner, start) {
            Ok(end) => {
                if let Some(r) = parse_reference(&inner[start..end]) {
                    refs.push(r);
                }
                p = end;
            }
            Err(_) => break,
        }
    }

    refs
}

fn trim(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| !is_whitespace(*b)).unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !is_whitespace(*b))
        .map(|i| i + 1)
        .unwrap_or(start);

    &raw[start..end]
}

/// Encode a text string.
///
/// ASCII becomes a literal string with `\`, `(` and `)` escaped. Anything
/// else becomes UTF-16BE with a byte order mark, written as hex.
pub fn text_string(s: &str) -> String {
    if s.is_ascii() {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('(');
        for c in s.chars() {
            match c {
                '\\' | '(' | ')' => {
                    out.push('\\');
                    out.push(c);
                }
                '\r' => out.push_str("\\r"),
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
        }
        out.push(')');
        out
    } else {
        let mut out = String::from("<FEFF");
        for unit in s.encode_utf16() {
            out.push_str(&format!("{:04X}", unit));
        }
        out.push('>');
        out
    }
}

/// Format a PDF date string, e.g. `(D:20210307040506+00'00')`.
pub fn date_string(time: &DateTime<Utc>) -> String {
    format!("(D:{}+00'00')", time.format("%Y%m%d%H%M%S"))
}
