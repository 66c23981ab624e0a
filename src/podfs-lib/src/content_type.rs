/// Number of leading bytes inspected when classifying file content.
pub const SNIFF_LEN: usize = 512;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"Rar!\x1a\x07", "application/x-rar-compressed"),
    (b"\x00asm", "application/wasm"),
    (b"OggS", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"fLaC", "audio/flac"),
    (b"\x1aE\xdf\xa3", "video/webm"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xef\xbb\xbf", "text/plain; charset=utf-8"),
];

const HTML_PREFIXES: &[&str] = &[
    "<!doctype html",
    "<html",
    "<head",
    "<script",
    "<body",
    "<title",
    "<table",
    "<div",
    "<p",
    "<!--",
];

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

/// Classify content from its first bytes, in the manner of a browser sniffer.
///
/// Returns a MIME type string; unrecognised binary falls back to
/// `application/octet-stream`, unrecognised text to `text/plain; charset=utf-8`.
pub fn sniff_content_type(head: &[u8]) -> String {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if head.is_empty() {
        return mime::TEXT_PLAIN_UTF_8.to_string();
    }

    for (magic, content_type) in SIGNATURES {
        if head.starts_with(magic) {
            return content_type.to_string();
        }
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp".to_string();
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return "video/mp4".to_string();
    }

    let trimmed: Vec<u8> = head
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(32)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    let lower = String::from_utf8_lossy(&trimmed);
    if lower.starts_with("<?xml") {
        return mime::TEXT_XML.to_string();
    }
    if HTML_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return mime::TEXT_HTML_UTF_8.to_string();
    }

    if head.iter().any(|b| is_binary_byte(*b)) {
        return mime::APPLICATION_OCTET_STREAM.to_string();
    }
    mime::TEXT_PLAIN_UTF_8.to_string()
}

/// Sniff the content, and when the bytes say nothing more specific than
/// "some binary", fall back to a guess from the file name extension.
pub fn detect_content_type(name: &str, head: &[u8]) -> String {
    let sniffed = sniff_content_type(head);
    if sniffed == mime::APPLICATION_OCTET_STREAM.as_ref() {
        if let Some(guess) = mime_guess::from_path(name).first() {
            return guess.essence_str().to_string();
        }
    }
    sniffed
}
