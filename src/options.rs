//! Conversion option model.
//!
//! [`ConversionOptions`] is the single validated bag of settings every
//! converter receives. The TOML config file maps onto it (see
//! [`crate::config`]), and CLI flags override individual fields afterwards.
//!
//! ## Types
//!
//! - [`QualityRequest`]: what the caller asked for, either a fixed 0-100
//!   quality or `auto` (estimate from the source, see [`crate::quality`]).
//! - [`MetadataPolicy`]: `keep-all` carries ICC/EXIF into the output,
//!   `none` strips everything.
//! - [`CloudOptions`]: settings for the remote conversion service,
//!   including its two authentication schemes.
//! - [`OptionSpec`]: a converter's declaration of one extra option it
//!   understands (name, type, sensitivity, default, required). Converters
//!   return these as plain data from their `schema` method
//!   (see [`crate::convert`]); nothing here is global or mutable.
//!
//! Sensitive values (`secret`, `api-key`, `url`) are never logged and never
//! serialized into anything that leaves the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("invalid options: {0}")]
    Invalid(String),
}

/// Default shared secret / api key, matching the conversion service's
/// out-of-the-box configuration.
pub const DEFAULT_SECRET: &str = "my dog is white";

const DEFAULT_MAX_QUALITY: u8 = 85;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// Requested encoding quality: an exact value, or `auto`.
///
/// `auto` asks the quality resolver to estimate the source JPEG's original
/// encoding quality so the re-encode doesn't waste bytes exceeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityRequest {
    /// Estimate from the source; converters fall back to their encoder's
    /// default when estimation fails.
    Auto,
    /// Exact quality, 0 (worst) to 100 (best).
    Fixed(u8),
}

impl Default for QualityRequest {
    fn default() -> Self {
        Self::Auto
    }
}

impl FromStr for QualityRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let n: u8 = s
            .parse()
            .map_err(|_| format!("expected 0-100 or \"auto\", got \"{s}\""))?;
        if n > 100 {
            return Err(format!("quality {n} is out of range 0-100"));
        }
        Ok(Self::Fixed(n))
    }
}

impl<'de> Deserialize<'de> for QualityRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct QualityVisitor;

        impl serde::de::Visitor<'_> for QualityVisitor {
            type Value = QualityRequest;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "an integer 0-100 or the string \"auto\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                if v <= 100 {
                    Ok(QualityRequest::Fixed(v as u8))
                } else {
                    Err(E::custom(format!("quality {v} is out of range 0-100")))
                }
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if (0..=100).contains(&v) {
                    Ok(QualityRequest::Fixed(v as u8))
                } else {
                    Err(E::custom(format!("quality {v} is out of range 0-100")))
                }
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "auto" {
                    Ok(QualityRequest::Auto)
                } else {
                    Err(E::custom(format!(
                        "expected 0-100 or \"auto\", got \"{v}\""
                    )))
                }
            }
        }

        deserializer.deserialize_any(QualityVisitor)
    }
}

/// What to do with embedded metadata (ICC profile, EXIF) on conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataPolicy {
    /// Carry ICC and EXIF payloads from the source into the output.
    KeepAll,
    /// Strip all metadata; the output is a bare image.
    None,
}

impl MetadataPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepAll => "keep-all",
            Self::None => "none",
        }
    }
}

impl Default for MetadataPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl FromStr for MetadataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-all" => Ok(Self::KeepAll),
            "none" => Ok(Self::None),
            other => Err(format!("expected \"keep-all\" or \"none\", got \"{other}\"")),
        }
    }
}

/// The full option set for one conversion.
///
/// All fields have working defaults; a config file (see [`crate::config`])
/// or CLI flags override just the values they care about.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Target quality, or `auto` to estimate from the source.
    pub quality: QualityRequest,
    /// Ceiling applied to an auto-detected quality. Ignored for fixed
    /// quality requests.
    pub max_quality: u8,
    /// Metadata handling policy.
    pub metadata: MetadataPolicy,
    /// Converter names in the order they are tried.
    pub converters: Vec<String>,
    /// Remote conversion service settings.
    pub cloud: CloudOptions,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            quality: QualityRequest::Auto,
            max_quality: DEFAULT_MAX_QUALITY,
            metadata: MetadataPolicy::None,
            converters: vec!["local".to_string(), "cloud".to_string()],
            cloud: CloudOptions::default(),
        }
    }
}

impl ConversionOptions {
    /// Check constraints the types can't express.
    ///
    /// `registered` is the set of converter names the stack knows about.
    /// Runs after config-file loading and again after CLI overrides. The
    /// per-converter requirements (e.g. a non-empty cloud `url`) are not
    /// checked here: a converter that is missing its own config reports
    /// itself not operational during the attempt, so the remaining
    /// converters still get their turn.
    pub fn validate(&self, registered: &[&str]) -> Result<(), OptionsError> {
        if let QualityRequest::Fixed(q) = self.quality
            && q > 100
        {
            return Err(OptionsError::Invalid("quality must be 0-100".into()));
        }
        if self.max_quality > 100 {
            return Err(OptionsError::Invalid("max-quality must be 0-100".into()));
        }
        if self.converters.is_empty() {
            return Err(OptionsError::Invalid(
                "converters must name at least one converter".into(),
            ));
        }
        for name in &self.converters {
            if !registered.contains(&name.as_str()) {
                return Err(OptionsError::Invalid(format!(
                    "unknown converter \"{name}\" (available: {})",
                    registered.join(", ")
                )));
            }
        }
        if self.cloud.timeout == 0 {
            return Err(OptionsError::Invalid(
                "cloud.timeout must be at least 1 second".into(),
            ));
        }
        if self.cloud.max_upload == 0 {
            return Err(OptionsError::Invalid(
                "cloud.max-upload must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the remote conversion service.
///
/// `api-version` selects the authentication scheme: 0 signs requests with
/// an md5 pair hash over the file and the shared `secret`; 1 sends
/// `api-key`, optionally crypted in transfer (Blowfish, salted per call)
/// so the raw key never travels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CloudOptions {
    /// Service endpoint. Required before the cloud converter will attempt
    /// anything.
    pub url: String,
    /// Authentication protocol version, 0 or 1.
    pub api_version: u8,
    /// Shared secret for api-version 0.
    pub secret: String,
    /// Api key for api-version 1.
    pub api_key: String,
    /// When set, derive a one-way salted hash of the api key and send
    /// that instead of the key itself.
    pub crypt_api_key_in_transfer: bool,
    /// Host name reported to the service alongside the upload.
    pub servername: String,
    /// Whole-request timeout in seconds.
    pub timeout: u64,
    /// Skip TLS peer verification. Insecure; only for services running on
    /// legacy self-signed setups.
    pub allow_invalid_certs: bool,
    /// Pre-flight ceiling on the source file size in bytes; larger files
    /// are not uploaded at all.
    pub max_upload: u64,
}

impl Default for CloudOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_version: 0,
            secret: DEFAULT_SECRET.to_string(),
            api_key: DEFAULT_SECRET.to_string(),
            crypt_api_key_in_transfer: false,
            servername: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            allow_invalid_certs: false,
            max_upload: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

// =============================================================================
// Option schema declarations
// =============================================================================

/// Value type of a declared option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    String,
    Number,
    Boolean,
    Array,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
        };
        f.write_str(s)
    }
}

/// One declared option: common, or a converter-specific extra.
///
/// Converters return their extras as a plain `Vec<OptionSpec>`; the value
/// is rebuilt on every call and nothing is cached or shared.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionType,
    /// Sensitive values are masked in every display path and excluded from
    /// any payload that leaves the process.
    pub sensitive: bool,
    pub default: serde_json::Value,
    pub required: bool,
}

impl OptionSpec {
    /// Default value for display, with sensitive values masked.
    pub fn display_default(&self) -> String {
        if self.sensitive && self.default.as_str().is_some_and(|s| !s.is_empty()) {
            "*****".to_string()
        } else {
            self.default.to_string()
        }
    }
}

/// The options every converter understands.
pub fn common_schema() -> Vec<OptionSpec> {
    vec![
        OptionSpec {
            name: "quality",
            kind: OptionType::Number,
            sensitive: false,
            default: serde_json::Value::String("auto".into()),
            required: false,
        },
        OptionSpec {
            name: "max-quality",
            kind: OptionType::Number,
            sensitive: false,
            default: serde_json::Value::from(DEFAULT_MAX_QUALITY),
            required: false,
        },
        OptionSpec {
            name: "metadata",
            kind: OptionType::String,
            sensitive: false,
            default: serde_json::Value::String("none".into()),
            required: false,
        },
        OptionSpec {
            name: "converters",
            kind: OptionType::Array,
            sensitive: false,
            default: serde_json::json!(["local", "cloud"]),
            required: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTERED: &[&str] = &["local", "cloud"];

    // =========================================================================
    // QualityRequest parsing
    // =========================================================================

    #[test]
    fn quality_from_str_auto() {
        assert_eq!("auto".parse::<QualityRequest>(), Ok(QualityRequest::Auto));
        assert_eq!("AUTO".parse::<QualityRequest>(), Ok(QualityRequest::Auto));
    }

    #[test]
    fn quality_from_str_fixed() {
        assert_eq!("0".parse::<QualityRequest>(), Ok(QualityRequest::Fixed(0)));
        assert_eq!(
            "80".parse::<QualityRequest>(),
            Ok(QualityRequest::Fixed(80))
        );
        assert_eq!(
            "100".parse::<QualityRequest>(),
            Ok(QualityRequest::Fixed(100))
        );
    }

    #[test]
    fn quality_from_str_rejects_out_of_range() {
        assert!("101".parse::<QualityRequest>().is_err());
        assert!("-1".parse::<QualityRequest>().is_err());
        assert!("eighty".parse::<QualityRequest>().is_err());
    }

    #[test]
    fn quality_deserializes_from_integer_and_auto() {
        #[derive(Deserialize)]
        struct Wrap {
            quality: QualityRequest,
        }

        let w: Wrap = toml::from_str("quality = 70").unwrap();
        assert_eq!(w.quality, QualityRequest::Fixed(70));

        let w: Wrap = toml::from_str("quality = \"auto\"").unwrap();
        assert_eq!(w.quality, QualityRequest::Auto);
    }

    #[test]
    fn quality_deserialize_rejects_other_strings() {
        #[derive(Deserialize)]
        struct Wrap {
            #[allow(dead_code)]
            quality: QualityRequest,
        }

        assert!(toml::from_str::<Wrap>("quality = \"high\"").is_err());
        assert!(toml::from_str::<Wrap>("quality = 150").is_err());
    }

    // =========================================================================
    // MetadataPolicy
    // =========================================================================

    #[test]
    fn metadata_policy_from_str() {
        assert_eq!("keep-all".parse(), Ok(MetadataPolicy::KeepAll));
        assert_eq!("none".parse(), Ok(MetadataPolicy::None));
        assert!("all".parse::<MetadataPolicy>().is_err());
    }

    #[test]
    fn metadata_policy_serializes_kebab() {
        assert_eq!(
            serde_json::to_value(MetadataPolicy::KeepAll).unwrap(),
            serde_json::json!("keep-all")
        );
        assert_eq!(MetadataPolicy::None.as_str(), "none");
    }

    // =========================================================================
    // Defaults and deserialization
    // =========================================================================

    #[test]
    fn default_options() {
        let options = ConversionOptions::default();
        assert_eq!(options.quality, QualityRequest::Auto);
        assert_eq!(options.max_quality, 85);
        assert_eq!(options.metadata, MetadataPolicy::None);
        assert_eq!(options.converters, vec!["local", "cloud"]);
        assert_eq!(options.cloud.url, "");
        assert_eq!(options.cloud.api_version, 0);
        assert_eq!(options.cloud.secret, DEFAULT_SECRET);
        assert_eq!(options.cloud.api_key, DEFAULT_SECRET);
        assert!(!options.cloud.crypt_api_key_in_transfer);
        assert_eq!(options.cloud.timeout, 60);
        assert!(!options.cloud.allow_invalid_certs);
        assert_eq!(options.cloud.max_upload, 67_108_864);
    }

    #[test]
    fn parse_partial_cloud_options() {
        let cloud: CloudOptions = toml::from_str(
            r#"
url = "https://convert.example/wpc.php"
api-version = 1
"#,
        )
        .unwrap();
        assert_eq!(cloud.url, "https://convert.example/wpc.php");
        assert_eq!(cloud.api_version, 1);
        // Untouched fields keep their defaults
        assert_eq!(cloud.secret, DEFAULT_SECRET);
        assert_eq!(cloud.timeout, 60);
    }

    #[test]
    fn parse_kebab_case_cloud_keys() {
        let cloud: CloudOptions = toml::from_str(
            r#"
crypt-api-key-in-transfer = true
allow-invalid-certs = true
max-upload = 1048576
api-key = "k"
"#,
        )
        .unwrap();
        assert!(cloud.crypt_api_key_in_transfer);
        assert!(cloud.allow_invalid_certs);
        assert_eq!(cloud.max_upload, 1_048_576);
        assert_eq!(cloud.api_key, "k");
    }

    #[test]
    fn unknown_cloud_key_rejected() {
        let result: Result<CloudOptions, _> = toml::from_str("api-keey = \"x\"");
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_default_passes() {
        assert!(ConversionOptions::default().validate(REGISTERED).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_converter() {
        let mut options = ConversionOptions::default();
        options.converters = vec!["imagemagick".to_string()];
        let err = options.validate(REGISTERED).unwrap_err();
        assert!(err.to_string().contains("imagemagick"));
    }

    #[test]
    fn validate_rejects_empty_converter_list() {
        let mut options = ConversionOptions::default();
        options.converters.clear();
        assert!(options.validate(REGISTERED).is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut options = ConversionOptions::default();
        options.cloud.timeout = 0;
        let err = options.validate(REGISTERED).unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn validate_rejects_zero_max_upload() {
        let mut options = ConversionOptions::default();
        options.cloud.max_upload = 0;
        assert!(options.validate(REGISTERED).is_err());
    }

    #[test]
    fn validate_rejects_max_quality_over_100() {
        let mut options = ConversionOptions::default();
        options.max_quality = 101;
        let err = options.validate(REGISTERED).unwrap_err();
        assert!(err.to_string().contains("max-quality"));
    }

    // =========================================================================
    // Schema
    // =========================================================================

    #[test]
    fn common_schema_names() {
        let names: Vec<&str> = common_schema().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["quality", "max-quality", "metadata", "converters"]);
    }

    #[test]
    fn sensitive_default_is_masked() {
        let spec = OptionSpec {
            name: "secret",
            kind: OptionType::String,
            sensitive: true,
            default: serde_json::Value::String(DEFAULT_SECRET.into()),
            required: false,
        };
        assert_eq!(spec.display_default(), "*****");
        assert!(!spec.display_default().contains("dog"));
    }

    #[test]
    fn sensitive_empty_default_not_masked() {
        let spec = OptionSpec {
            name: "url",
            kind: OptionType::String,
            sensitive: true,
            default: serde_json::Value::String(String::new()),
            required: true,
        };
        assert_eq!(spec.display_default(), "\"\"");
    }
}
