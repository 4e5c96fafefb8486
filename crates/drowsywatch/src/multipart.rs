//! `multipart/x-mixed-replace` framing for the JPEG video stream.
//!
//! Browsers render such a response in an `<img>` tag, replacing the image
//! each time a new part arrives.

use bytes::{BufMut, Bytes, BytesMut};

/// Part boundary.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` header of the stream response.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG image as a multipart part.
///
/// ```
/// let part = drowsywatch::multipart::jpeg_part(b"JPEG");
/// assert_eq!(&part[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n");
/// ```
#[must_use]
pub fn jpeg_part(jpeg: &[u8]) -> Bytes {
    const HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";

    let mut part = BytesMut::with_capacity(BOUNDARY.len() + HEADER.len() + jpeg.len() + 6);
    part.put_slice(b"--");
    part.put_slice(BOUNDARY.as_bytes());
    part.put_slice(b"\r\n");
    part.put_slice(HEADER);
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Split a stream body back into its JPEG payloads.
///
/// Used by clients and tests that consume `/video_feed`.
#[must_use]
pub fn split_parts(body: &[u8]) -> Vec<&[u8]> {
    let delimiter = format!("--{BOUNDARY}\r\n");
    let separator = b"\r\n\r\n";

    let mut parts = Vec::new();
    let mut rest = body;
    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        let Some(header_end) = find(rest, separator) else {
            break;
        };
        let payload = &rest[header_end + separator.len()..];
        let end = find(payload, delimiter.as_bytes()).unwrap_or(payload.len());
        let chunk = &payload[..end];
        parts.push(chunk.strip_suffix(b"\r\n").unwrap_or(chunk));
        rest = &payload[end..];
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
