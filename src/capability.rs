//! Capability probing.
//!
//! Converters never assume their machinery is present; they ask a
//! [`CapabilityProvider`] first and report themselves not operational when
//! something is missing, so the stack can move on to the next converter.
//!
//! [`HostCapabilities`] answers for the running binary. Decoder support is
//! probed against the formats actually compiled into the image library;
//! the remaining capabilities are linked unconditionally in this build and
//! report as present. The provider trait stays the seam: tests (and
//! embedders with different builds) inject a provider with other answers
//! to drive the degraded paths.

use image::ImageFormat;
use std::sync::LazyLock;

/// What the local converter has to work with.
#[derive(Debug, Clone)]
pub struct LocalCapabilities {
    /// Formats the compiled image library can decode.
    pub input_formats: Vec<ImageFormat>,
    /// Whether a webp encoder is linked.
    pub webp_encoding: bool,
}

impl LocalCapabilities {
    pub fn can_decode(&self, format: ImageFormat) -> bool {
        self.input_formats.contains(&format)
    }
}

/// What the cloud converter has to work with.
#[derive(Debug, Clone, Copy)]
pub struct CloudCapabilities {
    /// Whether an http client is available.
    pub http_client: bool,
    /// Whether the md5 request-signing hash is available (api-version 0).
    pub signing_hash: bool,
    /// Whether salted one-way key hashing is available (api-version 1
    /// with `crypt-api-key-in-transfer`).
    pub key_crypt: bool,
}

/// Source of capability reports, injected into each converter.
pub trait CapabilityProvider: Sync {
    fn local(&self) -> LocalCapabilities;
    fn cloud(&self) -> CloudCapabilities;
}

/// Input formats worth probing, with the file extensions they cover.
const INPUT_CANDIDATES: &[(ImageFormat, &[&str])] = &[
    (ImageFormat::Jpeg, &["jpg", "jpeg"]),
    (ImageFormat::Png, &["png"]),
];

static DECODABLE_FORMATS: LazyLock<Vec<ImageFormat>> = LazyLock::new(|| {
    INPUT_CANDIDATES
        .iter()
        .map(|(format, _)| *format)
        .filter(|format| format.reading_enabled())
        .collect()
});

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    INPUT_CANDIDATES
        .iter()
        .filter(|(format, _)| format.reading_enabled())
        .flat_map(|(_, extensions)| extensions.iter().copied())
        .collect()
});

/// Extensions of files the local converter can take as input, lowercase.
pub fn supported_input_extensions() -> &'static [&'static str] {
    SUPPORTED_EXTENSIONS.as_slice()
}

/// Capability reports for the running binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCapabilities;

impl CapabilityProvider for HostCapabilities {
    fn local(&self) -> LocalCapabilities {
        LocalCapabilities {
            input_formats: DECODABLE_FORMATS.clone(),
            // libwebp is linked statically; there is no build of this
            // binary without it.
            webp_encoding: true,
        }
    }

    fn cloud(&self) -> CloudCapabilities {
        CloudCapabilities {
            http_client: true,
            signing_hash: true,
            key_crypt: true,
        }
    }
}
