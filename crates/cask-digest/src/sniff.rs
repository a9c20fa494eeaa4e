//! Media-type detection over the scan sample.
//!
//! Sniffing proper is a collaborator, not part of the store: the engine only
//! needs *a* media type for the record. [`MediaSniffer`] is the seam; the
//! builtin [`MagicSniffer`] covers common magic numbers and a text
//! heuristic, and callers with richer needs plug in their own oracle.

use cask_types::DEFAULT_MEDIA_TYPE;

/// The media-type oracle consulted during `add`.
///
/// Receives the sample (first [`crate::SAMPLE_SIZE`] bytes) and the source's
/// file name when it has one; returns a media-type token.
pub trait MediaSniffer: Send + Sync {
    /// Detect a media type for the sampled content.
    fn sniff(&self, sample: &[u8], file_name: Option<&str>) -> String;
}

/// Magic-number table: prefix, detected type.
const MAGIC: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"\x1f\x8b", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"\xfd7zXZ\x00", "application/x-xz"),
    (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (b"!<arch>\n", "application/x-archive"),
    (b"\x7fELF", "application/x-executable"),
    (b"OggS", "application/ogg"),
    (b"fLaC", "audio/flac"),
    (b"ID3", "audio/mpeg"),
];

/// OOXML container types, recognized inside a zip by member path.
const OOXML: &[(&[u8], &str)] = &[
    (
        b"word/",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        b"xl/",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        b"ppt/",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
];

/// File-extension refinements consulted when the source has a name.
const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("jar", "application/java-archive"),
    ("epub", "application/epub+zip"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
];

/// The builtin oracle: magic numbers, zip/OOXML awareness, and a text
/// heuristic. Anything unrecognized is `application/octet-stream`. When the
/// source has a file name whose extension maps to a refinement of the
/// content-derived type, the extension wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct MagicSniffer;

impl MagicSniffer {
    fn sniff_content(&self, sample: &[u8]) -> String {
        if sample.is_empty() {
            return DEFAULT_MEDIA_TYPE.to_string();
        }
        for (prefix, media_type) in MAGIC {
            if sample.starts_with(prefix) {
                return (*media_type).to_string();
            }
        }
        if sample.starts_with(b"PK\x03\x04") {
            return sniff_zip(sample).to_string();
        }
        if looks_textual(sample) {
            return "text/plain".to_string();
        }
        DEFAULT_MEDIA_TYPE.to_string()
    }
}

impl MediaSniffer for MagicSniffer {
    fn sniff(&self, sample: &[u8], file_name: Option<&str>) -> String {
        let content_type = self.sniff_content(sample);
        let by_extension = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .and_then(|ext| {
                EXTENSIONS
                    .iter()
                    .find(|(e, _)| *e == ext)
                    .map(|(_, ty)| (*ty).to_string())
            });
        match by_extension {
            Some(ext_type) if is_refinement(&ext_type, &content_type) => ext_type,
            _ => content_type,
        }
    }
}

/// Distinguish OOXML containers from plain zip by scanning member names in
/// the sampled local-file headers.
fn sniff_zip(sample: &[u8]) -> &'static str {
    for (member, media_type) in OOXML {
        if find(sample, member) {
            return media_type;
        }
    }
    if find(sample, b"mimetypeapplication/epub+zip") {
        return "application/epub+zip";
    }
    "application/zip"
}

fn find(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

/// A sample is textual when it decodes as UTF-8 and carries no control
/// characters other than whitespace.
fn looks_textual(sample: &[u8]) -> bool {
    // A truncated multi-byte sequence at the sample boundary is fine.
    let text = match std::str::from_utf8(sample) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => {
            match std::str::from_utf8(&sample[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    !text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

/// Whether `specific` is a refinement of `general`.
///
/// Used twice by `add`: a path-derived type only wins over the content scan
/// when it refines it, and a caller-supplied type is only kept when the
/// detected type refines it.
pub fn is_refinement(specific: &str, general: &str) -> bool {
    if specific == general || general == DEFAULT_MEDIA_TYPE {
        return true;
    }
    if general == "text/plain" && specific.starts_with("text/") {
        return true;
    }
    if general == "application/zip"
        && (specific.starts_with("application/vnd.openxmlformats-officedocument.")
            || specific == "application/epub+zip"
            || specific == "application/java-archive")
    {
        return true;
    }
    if general == "application/gzip" && specific == "application/x-gtar" {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_text_is_text_plain() {
        assert_eq!(MagicSniffer.sniff(b"some data", None), "text/plain");
    }

    #[test]
    fn binary_is_octet_stream() {
        let sample = [0x00u8, 0x01, 0x02, 0xfe, 0xff];
        assert_eq!(MagicSniffer.sniff(&sample, None), DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn empty_is_octet_stream() {
        assert_eq!(MagicSniffer.sniff(b"", None), DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn png_magic() {
        let sample = b"\x89PNG\r\n\x1a\n....";
        assert_eq!(MagicSniffer.sniff(sample, None), "image/png");
    }

    #[test]
    fn pdf_magic() {
        assert_eq!(MagicSniffer.sniff(b"%PDF-1.7 ...", None), "application/pdf");
    }

    #[test]
    fn plain_zip() {
        assert_eq!(MagicSniffer.sniff(b"PK\x03\x04rest", None), "application/zip");
    }

    #[test]
    fn ooxml_document_detected_inside_zip() {
        let mut sample = b"PK\x03\x04".to_vec();
        sample.extend_from_slice(b"............word/document.xml");
        assert_eq!(
            MagicSniffer.sniff(&sample, None),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[test]
    fn truncated_utf8_tail_still_textual() {
        let mut sample = b"hello ".to_vec();
        // First byte of a two-byte sequence, cut off at the boundary.
        sample.push(0xc3);
        assert_eq!(MagicSniffer.sniff(&sample, None), "text/plain");
    }

    #[test]
    fn extension_refines_content_type() {
        // .html refines the textual detection.
        assert_eq!(
            MagicSniffer.sniff(b"<!doctype html><p>hi", Some("page.html")),
            "text/html"
        );
        // .docx refines plain zip.
        assert_eq!(
            MagicSniffer.sniff(b"PK\x03\x04....", Some("report.DOCX")),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        // An extension that contradicts the content does not win.
        assert_eq!(
            MagicSniffer.sniff(b"\x89PNG\r\n\x1a\n..", Some("image.txt")),
            "image/png"
        );
    }

    #[test]
    fn refinement_relation() {
        assert!(is_refinement("text/html", "text/plain"));
        assert!(is_refinement("anything/else", DEFAULT_MEDIA_TYPE));
        assert!(is_refinement(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "application/zip"
        ));
        assert!(!is_refinement("image/png", "text/plain"));
        assert!(!is_refinement("text/plain", "text/html"));
    }
}
