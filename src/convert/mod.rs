//! Converters and the stack that tries them in order.
//!
//! A [`Converter`] turns one source image into one webp file. Each
//! implementation declares its extra options as data, can report whether
//! it is operational at all, and fails with one of exactly two error
//! kinds so the stack knows how to read an unsuccessful attempt:
//!
//! - [`ConversionError::NotOperational`]: the converter cannot work in
//!   this environment or with this configuration (a decoder that is not
//!   compiled in, a missing service url). The stack logs it and moves on.
//! - [`ConversionError::Failed`]: the converter was operational but this
//!   attempt failed (corrupt source, service rejection, full disk).
//!
//! Neither kind ever leaves a partial destination file behind.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::options::{ConversionOptions, OptionSpec};

pub mod cloud;
pub mod local;
pub mod stack;

pub use cloud::CloudConverter;
pub use local::LocalConverter;
pub use stack::{AttemptReport, Conversion, ConverterStack, StackError};

/// Why a conversion attempt did not produce a file.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The converter cannot work at all right now; retrying with the same
    /// environment and options is pointless.
    #[error("{0}")]
    NotOperational(String),
    /// The converter is operational but this attempt failed.
    #[error("{0}")]
    Failed(String),
}

impl ConversionError {
    pub fn kind(&self) -> FailKind {
        match self {
            Self::NotOperational(_) => FailKind::NotOperational,
            Self::Failed(_) => FailKind::Failed,
        }
    }
}

/// The two attempt outcomes, separated from their messages so reports can
/// label attempts uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    NotOperational,
    Failed,
}

impl fmt::Display for FailKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::NotOperational => "not operational",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One way of producing a webp file from a source image.
pub trait Converter: Sync {
    /// Stable name used in the `converters` option and in reports.
    fn name(&self) -> &'static str;

    /// The options this converter understands beyond the common set.
    fn schema(&self) -> Vec<OptionSpec>;

    /// Whether this converter could work at all with these options.
    ///
    /// `Err` is always [`ConversionError::NotOperational`] and names the
    /// missing capability or option without echoing sensitive values.
    fn operational(&self, options: &ConversionOptions) -> Result<(), ConversionError>;

    /// Convert `source` into a webp file at `destination`.
    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        options: &ConversionOptions,
    ) -> Result<(), ConversionError>;
}

/// Write converted bytes in a single call, creating parent directories as
/// needed. A failed write removes whatever partial file it left.
pub(crate) fn write_destination(destination: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    match fs::write(destination, bytes) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(destination);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map() {
        let err = ConversionError::NotOperational("no decoder".into());
        assert_eq!(err.kind(), FailKind::NotOperational);
        assert_eq!(err.to_string(), "no decoder");

        let err = ConversionError::Failed("disk full".into());
        assert_eq!(err.kind(), FailKind::Failed);
    }

    #[test]
    fn fail_kind_display() {
        assert_eq!(FailKind::NotOperational.to_string(), "not operational");
        assert_eq!(FailKind::Failed.to_string(), "failed");
    }

    #[test]
    fn write_destination_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/out.webp");
        write_destination(&dest, b"RIFF").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"RIFF");
    }

    #[test]
    fn write_destination_reports_unwritable_target() {
        let dir = tempfile::tempdir().unwrap();
        // The destination path is an existing directory; the write must
        // error rather than succeed or panic.
        assert!(write_destination(dir.path(), b"x").is_err());
    }
}
