/// Code Extractor - Candidate Source From Model Output
///
/// Pure function over the raw response text. Only the first
/// ```` ```python ```` block is considered.
///
/// **Quirk:** a block that is opened but never closed yields everything
/// after the marker through the end of the text. Kept for compatibility
/// with earlier result sets.

const OPEN_MARKER: &str = "```python";
const CLOSE_MARKER: &str = "```";

/// Return the candidate source embedded in `response`
///
/// The line break that ends the marker line is dropped; trimming the
/// remaining whitespace is left to the caller.
pub fn extract_code(response: &str) -> &str {
    let Some(pos) = response.find(OPEN_MARKER) else {
        return response;
    };

    let body = &response[pos + OPEN_MARKER.len()..];
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);

    match body.find(CLOSE_MARKER) {
        Some(end) => &body[..end],
        None => body,
    }
}
