//! Content type detection for uploads without an explicit type.

/// Fallback for binary content nothing else recognizes.
pub const OCTET_STREAM: &str = "application/octet-stream";
/// Fallback for UTF-8 content nothing else recognizes.
pub const TEXT_PLAIN: &str = "text/plain";

/// Guesses the content type of an upload.
pub trait MimeTypeDetector: Send + Sync {
    /// Best-guess content type for `content` stored at `path`.
    ///
    /// `content` may be only the first chunk of a streamed upload.
    fn detect(&self, path: &str, content: &[u8]) -> String;
}

/// Sniffs magic numbers first, then falls back to the path extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuessingMimeTypeDetector;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"\x00asm", "application/wasm"),
];

fn sniff(content: &[u8]) -> Option<&'static str> {
    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| content.starts_with(magic)) {
        return Some(*mime);
    }
    if content.len() >= 12 && &content[..4] == b"RIFF" && &content[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    let head = &content[..content.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start().to_ascii_lowercase();
    if text.starts_with("<!doctype html") || text.starts_with("<html") {
        return Some("text/html");
    }
    if text.starts_with("<?xml") {
        return Some("text/xml");
    }
    None
}

fn guess_from_path(path: &str) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

impl MimeTypeDetector for GuessingMimeTypeDetector {
    fn detect(&self, path: &str, content: &[u8]) -> String {
        let by_extension = guess_from_path(path);

        match sniff(content) {
            // docx, jar, epub and friends are zip containers with a better name
            Some("application/zip") => {
                by_extension.unwrap_or_else(|| "application/zip".to_string())
            }
            Some(mime) => mime.to_string(),
            None => by_extension.unwrap_or_else(|| {
                if std::str::from_utf8(content).is_ok() {
                    TEXT_PLAIN.to_string()
                } else {
                    OCTET_STREAM.to_string()
                }
            }),
        }
    }
}
