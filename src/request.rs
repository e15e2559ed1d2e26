//! HTTP request parsing for the status page server.
//!
//! Hardware-free so the host test crate can compile it directly.

/// Method and path of the request line, query string stripped.
pub fn request_parts(request: &str) -> (&str, &str) {
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("").split('?').next().unwrap_or("");
    (method, path)
}

/// Non-empty body after the header/body separator, if it has arrived.
/// Returns `None` while the separator or the body itself is still
/// missing, so callers know to keep reading: headers and body may land
/// in separate TCP segments.
pub fn post_body(raw: &[u8]) -> Option<&str> {
    let text = core::str::from_utf8(raw).ok()?;
    let (_, body) = text.split_once("\r\n\r\n")?;
    let body = body.trim();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}
