//! Content-based media type detection.
//!
//! Persona documents are labelled by what they contain, not by their file
//! extension. Only the first [`SNIFF_LEN`] bytes are inspected.

use std::fmt;

/// Number of leading bytes considered.
pub const SNIFF_LEN: usize = 512;

/// A detected media type, possibly with parameters (`text/plain; charset=utf-8`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType(&'static str);

impl MediaType {
    pub const OCTET_STREAM: MediaType = MediaType("application/octet-stream");
    pub const TEXT_UTF8: MediaType = MediaType("text/plain; charset=utf-8");

    /// Full value including parameters.
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Type and subtype only (`text/plain`).
    pub fn essence(&self) -> &'static str {
        self.0.split(';').next().unwrap_or(self.0).trim()
    }

    pub fn is_text(&self) -> bool {
        self.essence().starts_with("text/")
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Fixed byte prefixes. Checked in order.
const PREFIXES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", "text/plain; charset=utf-8"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\r\n\x1A\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
    (b"ID3", "audio/mpeg"),
    (b"PK\x03\x04", "application/zip"),
];

/// Tags that mark an HTML document when they open it (case-insensitive).
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Classify `data` by its leading bytes.
pub fn sniff(data: &[u8]) -> MediaType {
    let data = &data[..data.len().min(SNIFF_LEN)];

    for &(prefix, media_type) in PREFIXES {
        if data.starts_with(prefix) {
            return MediaType(media_type);
        }
    }

    if let Some(media_type) = riff_form(data) {
        return MediaType(media_type);
    }

    let markup = skip_whitespace(data);
    if HTML_TAGS.iter().any(|tag| opens_with_tag(markup, tag)) {
        return MediaType("text/html; charset=utf-8");
    }
    if markup.starts_with(b"<?xml") {
        return MediaType("text/xml; charset=utf-8");
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        MediaType::OCTET_STREAM
    } else {
        MediaType::TEXT_UTF8
    }
}

/// RIFF containers carry their form type at offset 8.
fn riff_form(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 || !data.starts_with(b"RIFF") {
        return None;
    }
    match &data[8..12] {
        b"WAVE" => Some("audio/wave"),
        b"WEBP" => Some("image/webp"),
        b"AVI " => Some("video/avi"),
        _ => None,
    }
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

/// The tag must be followed by a space or `>` so `<BRAND>` is not `<BR`.
fn opens_with_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 || !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    tag == b"<!--" || matches!(data[tag.len()], b' ' | b'>')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
