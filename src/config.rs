//! Configuration file loading.
//!
//! webpify reads an optional TOML file: `--config <path>` names one
//! explicitly, otherwise `./webpify.toml` is picked up when present, and
//! built-in defaults apply when neither exists. CLI flags override file
//! values either way.
//!
//! ## Example Configuration
//!
//! ```toml
//! [conversion]
//! quality = "auto"       # 0-100, or "auto" to match the source JPEG
//! max-quality = 85       # ceiling applied to auto-detected quality
//! metadata = "none"      # "none" or "keep-all"
//! converters = ["local", "cloud"]
//!
//! [cloud]
//! url = "https://example.org/wpc.php"
//! api-version = 1
//! api-key = "my dog is white"
//! crypt-api-key-in-transfer = true
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! # Only pin the quality; everything else keeps its default
//! [conversion]
//! quality = 80
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::options::{
    CloudOptions, ConversionOptions, MetadataPolicy, OptionsError, QualityRequest,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Validation(#[from] OptionsError),
}

/// File name looked up in the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "webpify.toml";

/// On-disk shape of the config file: a `[conversion]` table and a
/// `[cloud]` table, both optional. This is deliberately a separate type
/// from [`ConversionOptions`] so the file layout can group keys without
/// dictating the in-memory layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    conversion: ConversionSection,
    cloud: CloudOptions,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
struct ConversionSection {
    quality: QualityRequest,
    max_quality: u8,
    metadata: MetadataPolicy,
    converters: Vec<String>,
}

impl Default for ConversionSection {
    fn default() -> Self {
        let defaults = ConversionOptions::default();
        Self {
            quality: defaults.quality,
            max_quality: defaults.max_quality,
            metadata: defaults.metadata,
            converters: defaults.converters,
        }
    }
}

impl FileConfig {
    fn into_options(self) -> ConversionOptions {
        ConversionOptions {
            quality: self.conversion.quality,
            max_quality: self.conversion.max_quality,
            metadata: self.conversion.metadata,
            converters: self.conversion.converters,
            cloud: self.cloud,
        }
    }
}

// =============================================================================
// Config loading
// =============================================================================

/// Load options from the config file at `path`.
///
/// A missing file is an error here; use [`load_config_if_present`] for the
/// "pick it up if the user created one" path. Unknown keys are rejected.
/// Validation is not performed at this layer because CLI flags may still
/// override values; callers validate the merged result.
pub fn load_config(path: &Path) -> Result<ConversionOptions, ConfigError> {
    let content = fs::read_to_string(path)?;
    let file: FileConfig = toml::from_str(&content)?;
    Ok(file.into_options())
}

/// Load `webpify.toml` from `dir` if one exists, defaults otherwise.
pub fn load_config_if_present(dir: &Path) -> Result<ConversionOptions, ConfigError> {
    let path = dir.join(DEFAULT_CONFIG_FILE);
    if path.exists() {
        load_config(&path)
    } else {
        Ok(ConversionOptions::default())
    }
}

/// Returns a fully-commented stock `webpify.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# webpify configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# webpify reads this file from ./webpify.toml, or from wherever the
# --config flag points. Command-line flags override file values.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Conversion
# ---------------------------------------------------------------------------
[conversion]
# Target quality for the WebP encode: a fixed value (0 = worst, 100 = best)
# or "auto" to estimate the source JPEG's own quality, so the re-encode
# doesn't spend bytes exceeding what the source ever had.
quality = "auto"

# Ceiling applied when an auto-detected quality comes out higher.
# Ignored for fixed quality values.
max-quality = 85

# Embedded metadata handling: "none" strips ICC profiles and EXIF,
# "keep-all" carries them into the output.
metadata = "none"

# Converters to try, in order. The first one that succeeds wins; a
# converter that is not operational in this environment is skipped and
# the next one gets its turn.
converters = ["local", "cloud"]

# ---------------------------------------------------------------------------
# Remote conversion service (the "cloud" converter)
# ---------------------------------------------------------------------------
[cloud]
# Endpoint of the conversion service. The cloud converter reports itself
# not operational until this is set.
url = ""

# Authentication protocol version: 0 signs each upload with `secret`,
# 1 authenticates with `api-key`.
api-version = 0

# Shared secret for api-version 0. The value below is the service's
# out-of-the-box default; change it on both ends.
secret = "my dog is white"

# Api key for api-version 1. Same out-of-the-box default as `secret`.
api-key = "my dog is white"

# Send a salted one-way hash of the api key instead of the key itself
# (api-version 1 only).
crypt-api-key-in-transfer = false

# Host name reported to the service alongside each upload, for the
# service's own logs.
servername = ""

# Whole-request timeout in seconds.
timeout = 60

# Skip TLS certificate verification. Insecure; only for services still
# running on self-signed certificates.
allow-invalid-certs = false

# Largest upload the service accepts, in bytes (default 64 MiB). Files
# over the ceiling are declined before any bytes are sent.
max-upload = 67108864
"##
}

// =============================================================================
// Tests
// =============================================================================
