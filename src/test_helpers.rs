//! Shared test utilities for the webpify test suite.
//!
//! Provides synthetic image fixtures and a one-shot http server that
//! captures the raw request it was sent, so converter tests can assert on
//! exactly what went over the wire.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let source = dir.path().join("photo.jpg");
//! create_test_jpeg(&source, 64, 48);
//!
//! let server = serve_once(200, Some("application/octet-stream"), b"RIFF...");
//! // ... point a converter at server.url() ...
//! let request = server.into_request();
//! assert!(contains(&request, b"name=\"file\""));
//! ```

use image::ImageEncoder;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;

// =========================================================================
// Image fixtures
// =========================================================================

/// Create a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Create a JPEG carrying the given bytes as its ICC profile.
pub fn create_test_jpeg_with_icc(path: &Path, width: u32, height: u32, profile: &[u8]) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new(writer);
    encoder.set_icc_profile(profile.to_vec()).unwrap();
    encoder
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

// =========================================================================
// One-shot http server
// =========================================================================

/// Handle to a server that answers exactly one request.
pub struct ReplyServer {
    url: String,
    handle: thread::JoinHandle<Vec<u8>>,
}

impl ReplyServer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Block until the request has been served, returning its raw bytes
    /// (request line, headers and body).
    pub fn into_request(self) -> Vec<u8> {
        self.handle.join().unwrap()
    }
}

/// Start a server on an ephemeral loopback port that serves one request
/// with the canned reply and captures what it was sent.
pub fn serve_once(status: u16, content_type: Option<&str>, body: &[u8]) -> ReplyServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/convert", listener.local_addr().unwrap());
    let body = body.to_vec();
    let content_type = content_type.map(str::to_owned);

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_http_request(&mut stream);

        let reason = match status {
            200 => "OK",
            404 => "Not Found",
            _ => "Error",
        };
        let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
        if let Some(ct) = &content_type {
            response.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        response.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        ));
        stream.write_all(response.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
        request
    });

    ReplyServer { url, handle }
}

/// Read one full request: headers, then as many body bytes as the
/// Content-Length header declares.
fn read_http_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(body_start) = headers_end(&request) {
            let content_length = parse_content_length(&request[..body_start]).unwrap_or(0);
            if request.len() >= body_start + content_length {
                break;
            }
        }
    }
    request
}

fn headers_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(headers);
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            return value.trim().parse().ok();
        }
    }
    None
}

// =========================================================================
// Byte assertions
// =========================================================================

/// Whether `haystack` contains `needle` as a contiguous byte run.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
