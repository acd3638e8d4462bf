//! Conversion through a remote service.
//!
//! Uploads the source as a multipart POST and writes the returned bytes.
//! The request carries the file, a JSON rendering of the non-sensitive
//! options, the reporting host name, and authentication for one of two
//! protocol versions:
//!
//! - version 0: a `hash` field, `md5(md5_hex(file) + secret)`. The pair
//!   (file, secret) is authenticated without the secret travelling.
//! - version 1: the `api-key` in clear, or, with
//!   `crypt-api-key-in-transfer`, a freshly salted Blowfish crypt of the
//!   key (`salt` plus `api-key-crypted`) so the raw key never travels.
//!   If salted hashing is unavailable while crypting was requested, the
//!   converter reports not operational; it never falls back to sending
//!   the key in clear.
//!
//! The service answers with either raw image bytes
//! (`application/octet-stream`) or an error it encodes as JSON, as a
//! legacy `failed!` prefix, or as a bare 404. `interpret_response` reads
//! them in a fixed order and turns everything that is not an image into a
//! [`ConversionError::Failed`] message.

use log::debug;
use rand::Rng;
use reqwest::blocking::multipart::{Form, Part};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::capability::{CapabilityProvider, HostCapabilities};
use crate::options::{ConversionOptions, DEFAULT_SECRET, OptionSpec, OptionType};
use crate::quality::{self, QualityDecision};

use super::{ConversionError, Converter, write_destination};

pub struct CloudConverter<P: CapabilityProvider = HostCapabilities> {
    provider: P,
}

impl CloudConverter<HostCapabilities> {
    pub fn new() -> Self {
        Self {
            provider: HostCapabilities,
        }
    }
}

impl Default for CloudConverter<HostCapabilities> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CapabilityProvider> CloudConverter<P> {
    pub fn with_provider(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: CapabilityProvider> Converter for CloudConverter<P> {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn schema(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec {
                name: "api-version",
                kind: OptionType::Number,
                sensitive: false,
                default: json!(0),
                required: false,
            },
            OptionSpec {
                name: "secret",
                kind: OptionType::String,
                sensitive: true,
                default: json!(DEFAULT_SECRET),
                required: false,
            },
            OptionSpec {
                name: "api-key",
                kind: OptionType::String,
                sensitive: true,
                default: json!(DEFAULT_SECRET),
                required: false,
            },
            OptionSpec {
                name: "url",
                kind: OptionType::String,
                sensitive: true,
                default: json!(""),
                required: true,
            },
            OptionSpec {
                name: "crypt-api-key-in-transfer",
                kind: OptionType::Boolean,
                sensitive: false,
                default: json!(false),
                required: false,
            },
            OptionSpec {
                name: "servername",
                kind: OptionType::String,
                sensitive: false,
                default: json!(""),
                required: false,
            },
            OptionSpec {
                name: "timeout",
                kind: OptionType::Number,
                sensitive: false,
                default: json!(60),
                required: false,
            },
            OptionSpec {
                name: "allow-invalid-certs",
                kind: OptionType::Boolean,
                sensitive: false,
                default: json!(false),
                required: false,
            },
            OptionSpec {
                name: "max-upload",
                kind: OptionType::Number,
                sensitive: false,
                default: json!(67_108_864u64),
                required: false,
            },
        ]
    }

    fn operational(&self, options: &ConversionOptions) -> Result<(), ConversionError> {
        let caps = self.provider.cloud();
        if !caps.http_client {
            return Err(ConversionError::NotOperational(
                "no http client is available".into(),
            ));
        }
        let cloud = &options.cloud;
        if cloud.url.is_empty() {
            return Err(ConversionError::NotOperational(
                "missing url. the conversion service endpoint must be configured".into(),
            ));
        }
        match cloud.api_version {
            0 => {
                if !caps.signing_hash {
                    return Err(ConversionError::NotOperational(
                        "md5 hashing for request signing is not available".into(),
                    ));
                }
            }
            1 => {
                if cloud.crypt_api_key_in_transfer && !caps.key_crypt {
                    return Err(ConversionError::NotOperational(
                        "configured to crypt the api key in transfer, \
                         but salted key hashing is not available"
                            .into(),
                    ));
                }
            }
            other => {
                return Err(ConversionError::NotOperational(format!(
                    "unsupported api-version {other}"
                )));
            }
        }
        Ok(())
    }

    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        options: &ConversionOptions,
    ) -> Result<(), ConversionError> {
        self.operational(options)?;
        let cloud = &options.cloud;

        // Size ceiling is enforced before anything is read or sent.
        let size = fs::metadata(source)
            .map_err(|e| ConversionError::Failed(format!("could not read source: {e}")))?
            .len();
        if size > cloud.max_upload {
            return Err(ConversionError::NotOperational(format!(
                "source file is {size} bytes, over the {} byte upload ceiling",
                cloud.max_upload
            )));
        }
        let file_bytes = fs::read(source)
            .map_err(|e| ConversionError::Failed(format!("could not read source: {e}")))?;

        let decision = quality::resolve(source, options.quality, options.max_quality);
        let payload = wire_options(options, decision);

        let mut form = Form::new()
            .text("options", payload.to_string())
            .text("servername", cloud.servername.clone());

        if cloud.api_version == 0 {
            form = form.text("hash", sign_v0(&file_bytes, &cloud.secret));
        } else if cloud.crypt_api_key_in_transfer {
            let (salt, crypted) = crypt_api_key(&cloud.api_key)?;
            form = form.text("salt", salt).text("api-key-crypted", crypted);
        } else {
            form = form.text("api-key", cloud.api_key.clone());
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| ConversionError::Failed(format!("could not build upload: {e}")))?;
        form = form.part("file", part);

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cloud.timeout))
            .danger_accept_invalid_certs(cloud.allow_invalid_certs)
            .build()
            .map_err(|e| {
                ConversionError::NotOperational(format!("could not build http client: {e}"))
            })?;

        debug!(
            "cloud: posting {} ({size} bytes) to the conversion service",
            source.display()
        );
        // Transport errors are scrubbed of the url; the endpoint is a
        // sensitive option and must not surface in messages.
        let response = client
            .post(&cloud.url)
            .multipart(form)
            .send()
            .map_err(|e| {
                ConversionError::Failed(format!("transport error: {}", e.without_url()))
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().map_err(|e| {
            ConversionError::Failed(format!("transport error: {}", e.without_url()))
        })?;

        let image = match interpret_response(status, content_type.as_deref(), &body) {
            ServiceReply::Image(bytes) => bytes,
            ServiceReply::Rejected(message) => return Err(ConversionError::Failed(message)),
        };
        if image.is_empty() {
            return Err(ConversionError::Failed(
                "error saving file, check permissions".into(),
            ));
        }
        write_destination(destination, image)
            .map_err(|_| ConversionError::Failed("error saving file, check permissions".into()))?;
        debug!(
            "cloud: {} -> {} ({} bytes)",
            source.display(),
            destination.display(),
            image.len()
        );
        Ok(())
    }
}

/// The options rendered into the request's `options` field.
///
/// Only non-sensitive settings the service acts on are included; secrets,
/// keys, the endpoint itself and client-side settings stay out. Quality
/// follows the resolver: a concrete number when known, otherwise the
/// literal `"auto"` so the service runs its own detection on the uploaded
/// file.
fn wire_options(options: &ConversionOptions, decision: QualityDecision) -> serde_json::Value {
    let quality = match decision {
        QualityDecision::Fixed(q) => json!(q),
        QualityDecision::DetectionFailed => json!("auto"),
    };
    json!({
        "quality": quality,
        "max-quality": options.max_quality,
        "metadata": options.metadata,
        "api-version": options.cloud.api_version,
        "crypt-api-key-in-transfer": options.cloud.crypt_api_key_in_transfer,
    })
}

/// Version 0 request signature: md5 over the hex md5 of the file
/// concatenated with the secret.
fn sign_v0(file_bytes: &[u8], secret: &str) -> String {
    let inner = format!("{:x}", md5::compute(file_bytes));
    format!("{:x}", md5::compute(format!("{inner}{secret}").as_bytes()))
}

/// Version 1 crypted key material: a fresh 22-character salt and the
/// crypt output with its first 28 characters stripped.
///
/// The strip width is the service's wire protocol. It leaves the last
/// salt character attached to the 31-character digest, 32 characters in
/// all; the verifying side slices identically.
fn crypt_api_key(api_key: &str) -> Result<(String, String), ConversionError> {
    let salt: [u8; 16] = rand::rng().random();
    let parts = bcrypt::hash_with_salt(api_key, 10, salt).map_err(|e| {
        ConversionError::NotOperational(format!("salted key hashing failed: {e}"))
    })?;
    let full = parts.format_for_version(bcrypt::Version::TwoY);
    Ok((parts.get_salt(), full[28..].to_string()))
}

#[derive(Debug, PartialEq)]
enum ServiceReply<'a> {
    Image(&'a [u8]),
    Rejected(String),
}

/// Read the service's answer. The rules apply in order; the first match
/// wins, and every non-image outcome carries a diagnosable message.
fn interpret_response<'a>(
    status: u16,
    content_type: Option<&str>,
    body: &'a [u8],
) -> ServiceReply<'a> {
    if status == 404 {
        return ServiceReply::Rejected("service not found at the specified url (404)".into());
    }
    if content_type == Some("application/octet-stream") {
        return ServiceReply::Image(body);
    }
    if let Some(message) = json_error_message(body) {
        return ServiceReply::Rejected(message);
    }
    if let Some(rest) = body.strip_prefix(b"failed!") {
        return ServiceReply::Rejected(format!(
            "service failed converting image: \"{}\"",
            String::from_utf8_lossy(rest)
        ));
    }
    if body.is_empty() {
        return ServiceReply::Rejected(format!("unexpected empty result, http code {status}"));
    }
    ServiceReply::Rejected(format!(
        "unexpected response, not an image: \"{}...\"",
        sanitize_excerpt(body)
    ))
}

/// Map a JSON error body to its message. `None` means the body is not a
/// usable JSON error and the caller should keep matching.
fn json_error_message(body: &[u8]) -> Option<String> {
    if body.first() != Some(&b'{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let code = value.get("errorCode")?.as_i64()?;
    let message = value
        .get("errorMessage")
        .and_then(|m| m.as_str())
        .unwrap_or("");
    Some(match code {
        0 => format!("server setup problem: \"{message}\""),
        1 => format!("access denied: {message}"),
        _ => format!("conversion failed: \"{message}\""),
    })
}

/// First 400 bytes of an unexpected body, made safe for a one-line error
/// message: lossy utf-8, newlines dropped, html-significant characters
/// escaped.
fn sanitize_excerpt(body: &[u8]) -> String {
    let head = &body[..body.len().min(400)];
    let text = String::from_utf8_lossy(head);
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' | '\n' => {}
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
