//! Filename resolution and sanitization.
//!
//! Resolution order for a probed download: `Content-Disposition` header
//! (RFC 6266, quoted and `filename*=` forms), then the last path segment of
//! the final post-redirect URL (percent-decoded), then the caller-supplied
//! override, with `download.bin` as the last resort.

use url::Url;

/// Name used when nothing else yields a usable filename.
pub const FALLBACK_FILENAME: &str = "download.bin";

/// Resolves the destination filename for a probed response.
///
/// `content_disposition` is the raw header value when present;
/// `final_url` is the post-redirect URL; `override_name` is a
/// caller-supplied preference consulted last.
#[must_use]
pub fn resolve_filename(
    content_disposition: Option<&str>,
    final_url: &Url,
    override_name: Option<&str>,
) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition)
        .or_else(|| filename_from_url(final_url))
        .or_else(|| override_name.map(str::to_string));

    match candidate.map(|name| sanitize_filename(&name)) {
        Some(name) if !name.is_empty() => name,
        _ => FALLBACK_FILENAME.to_string(),
    }
}

/// Parses a Content-Disposition header to extract the filename.
///
/// Handles:
/// - `attachment; filename="example.bin"`
/// - `attachment; filename=example.bin`
/// - `attachment; filename*=UTF-8''example%20file.bin` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim();
            if let Ok(decoded) = urlencoding::decode(encoded_name)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    // Regular filename=
    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                let name = &stripped[..end];
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Last path segment of the URL, percent-decoded.
pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    let last = segments.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| last.to_string());
    Some(decoded)
}

/// Sanitizes a filename for filesystem safety.
///
/// Strips directory separators, replaces characters invalid on common
/// filesystems (`: * ? " < > |`) and control characters with `_`, and trims
/// surrounding whitespace. Returns an empty string if nothing survives.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    // Directory separators are stripped rather than replaced so a header
    // like `filename="../../etc/passwd"` cannot traverse.
    let last_component = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let sanitized: String = last_component
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.chars().all(|c| c == '.' || c == '_') {
        return String::new();
    }
    trimmed.to_string()
}
