//! The fallback loop.
//!
//! A [`ConverterStack`] holds the registered converters and tries them in
//! the order the `converters` option names them. The first one to produce
//! a file wins; everything tried before it is kept as an
//! [`AttemptReport`] so callers can show why earlier converters passed.
//! Both failure kinds move the loop along: a converter that is not
//! operational was never going to work, and a converter that failed may
//! be followed by one that succeeds.

use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::options::ConversionOptions;

use super::{CloudConverter, Converter, FailKind, LocalConverter};

/// One unsuccessful attempt.
#[derive(Debug)]
pub struct AttemptReport {
    pub converter: String,
    pub kind: FailKind,
    pub message: String,
}

impl fmt::Display for AttemptReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}): {}", self.converter, self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum StackError {
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("no converter succeeded:{}", render_attempts(.attempts))]
    AllFailed { attempts: Vec<AttemptReport> },
}

fn render_attempts(attempts: &[AttemptReport]) -> String {
    attempts.iter().map(|a| format!("\n  {a}")).collect()
}

/// A finished conversion: who produced the file, and what was tried
/// before them.
#[derive(Debug)]
pub struct Conversion {
    pub converter: &'static str,
    pub attempts: Vec<AttemptReport>,
}

pub struct ConverterStack {
    converters: Vec<Box<dyn Converter>>,
}

impl ConverterStack {
    /// The built-in stack: the in-process converter and the cloud
    /// service, in that order.
    pub fn new() -> Self {
        Self {
            converters: vec![
                Box::new(LocalConverter::new()),
                Box::new(CloudConverter::new()),
            ],
        }
    }

    /// A stack over caller-supplied converters.
    pub fn with_converters(converters: Vec<Box<dyn Converter>>) -> Self {
        Self { converters }
    }

    /// Registered converter names, for option validation and display.
    pub fn names(&self) -> Vec<&'static str> {
        self.converters.iter().map(|c| c.name()).collect()
    }

    pub fn converters(&self) -> impl Iterator<Item = &dyn Converter> {
        self.converters.iter().map(Box::as_ref)
    }

    /// Convert `source` to a webp at `destination`, trying converters in
    /// the order `options.converters` names them.
    pub fn run(
        &self,
        source: &Path,
        destination: &Path,
        options: &ConversionOptions,
    ) -> Result<Conversion, StackError> {
        if !source.exists() {
            return Err(StackError::SourceNotFound(source.to_path_buf()));
        }
        let mut attempts = Vec::new();
        for name in &options.converters {
            let Some(converter) = self
                .converters
                .iter()
                .find(|c| c.name() == name.as_str())
            else {
                attempts.push(AttemptReport {
                    converter: name.clone(),
                    kind: FailKind::NotOperational,
                    message: "no such converter is registered".into(),
                });
                continue;
            };
            debug!("trying converter {}", converter.name());
            match converter.convert(source, destination, options) {
                Ok(()) => {
                    return Ok(Conversion {
                        converter: converter.name(),
                        attempts,
                    });
                }
                Err(err) => {
                    debug!("converter {} {}: {err}", converter.name(), err.kind());
                    attempts.push(AttemptReport {
                        converter: converter.name().to_string(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Err(StackError::AllFailed { attempts })
    }
}

impl Default for ConverterStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConversionError;
    use crate::options::OptionSpec;
    use crate::test_helpers::create_test_jpeg;
    use std::fs;
    use std::sync::{Arc, Mutex};

    enum Script {
        Succeed,
        NotOperational(&'static str),
        Fail(&'static str),
    }

    struct Scripted {
        name: &'static str,
        script: Script,
        calls: Arc<Mutex<u32>>,
    }

    impl Scripted {
        fn new(name: &'static str, script: Script) -> Box<Self> {
            Box::new(Self {
                name,
                script,
                calls: Arc::new(Mutex::new(0)),
            })
        }

        /// Handle on the call counter that survives the box moving into
        /// a stack.
        fn counter(&self) -> Arc<Mutex<u32>> {
            Arc::clone(&self.calls)
        }
    }

    impl Converter for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn schema(&self) -> Vec<OptionSpec> {
            Vec::new()
        }

        fn operational(&self, _options: &ConversionOptions) -> Result<(), ConversionError> {
            match self.script {
                Script::NotOperational(msg) => Err(ConversionError::NotOperational(msg.into())),
                _ => Ok(()),
            }
        }

        fn convert(
            &self,
            _source: &Path,
            destination: &Path,
            _options: &ConversionOptions,
        ) -> Result<(), ConversionError> {
            *self.calls.lock().unwrap() += 1;
            match self.script {
                Script::Succeed => {
                    fs::write(destination, b"RIFF....WEBP").unwrap();
                    Ok(())
                }
                Script::NotOperational(msg) => Err(ConversionError::NotOperational(msg.into())),
                Script::Fail(msg) => Err(ConversionError::Failed(msg.into())),
            }
        }
    }

    fn scripted_options(names: &[&str]) -> ConversionOptions {
        let mut options = ConversionOptions::default();
        options.converters = names.iter().map(|s| s.to_string()).collect();
        options
    }

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        let source = dir.path().join("photo.jpg");
        create_test_jpeg(&source, 16, 16);
        (source, dir.path().join("photo.webp"))
    }

    // =========================================================================
    // Fallback order
    // =========================================================================

    #[test]
    fn first_success_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let second = Scripted::new("b", Script::Succeed);
        let second_calls = second.counter();
        let stack = ConverterStack::with_converters(vec![
            Scripted::new("a", Script::Succeed),
            second,
        ]);
        let conversion = stack
            .run(&source, &dest, &scripted_options(&["a", "b"]))
            .unwrap();

        assert_eq!(conversion.converter, "a");
        assert!(conversion.attempts.is_empty());
        assert_eq!(*second_calls.lock().unwrap(), 0);
        assert!(dest.exists());
    }

    #[test]
    fn options_order_overrides_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let stack = ConverterStack::with_converters(vec![
            Scripted::new("a", Script::Succeed),
            Scripted::new("b", Script::Succeed),
        ]);
        let conversion = stack
            .run(&source, &dest, &scripted_options(&["b", "a"]))
            .unwrap();
        assert_eq!(conversion.converter, "b");
    }

    #[test]
    fn not_operational_falls_through_to_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let stack = ConverterStack::with_converters(vec![
            Scripted::new("a", Script::NotOperational("no decoder")),
            Scripted::new("b", Script::Succeed),
        ]);
        let conversion = stack
            .run(&source, &dest, &scripted_options(&["a", "b"]))
            .unwrap();

        assert_eq!(conversion.converter, "b");
        assert_eq!(conversion.attempts.len(), 1);
        assert_eq!(conversion.attempts[0].converter, "a");
        assert_eq!(conversion.attempts[0].kind, FailKind::NotOperational);
        assert!(dest.exists());
    }

    #[test]
    fn failure_also_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let stack = ConverterStack::with_converters(vec![
            Scripted::new("a", Script::Fail("service said no")),
            Scripted::new("b", Script::Succeed),
        ]);
        let conversion = stack
            .run(&source, &dest, &scripted_options(&["a", "b"]))
            .unwrap();
        assert_eq!(conversion.converter, "b");
        assert_eq!(conversion.attempts[0].kind, FailKind::Failed);
    }

    #[test]
    fn all_failed_reports_every_attempt_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let stack = ConverterStack::with_converters(vec![
            Scripted::new("a", Script::NotOperational("no decoder")),
            Scripted::new("b", Script::Fail("service said no")),
        ]);
        let err = stack
            .run(&source, &dest, &scripted_options(&["a", "b"]))
            .unwrap_err();

        let StackError::AllFailed { attempts } = &err else {
            panic!("expected AllFailed, got {err:?}");
        };
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].converter, "a");
        assert_eq!(attempts[1].converter, "b");

        let rendered = err.to_string();
        assert!(rendered.contains("a (not operational): no decoder"));
        assert!(rendered.contains("b (failed): service said no"));
        assert!(!dest.exists());
    }

    #[test]
    fn unregistered_name_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let stack = ConverterStack::with_converters(vec![Scripted::new("a", Script::Succeed)]);
        let conversion = stack
            .run(&source, &dest, &scripted_options(&["imagick", "a"]))
            .unwrap();

        assert_eq!(conversion.converter, "a");
        assert_eq!(conversion.attempts[0].converter, "imagick");
        assert!(conversion.attempts[0].message.contains("registered"));
    }

    #[test]
    fn missing_source_is_checked_before_any_converter_runs() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.webp");

        let converter = Scripted::new("a", Script::Succeed);
        let stack = ConverterStack::with_converters(vec![converter]);
        let err = stack
            .run(
                &dir.path().join("nothing.jpg"),
                &dest,
                &scripted_options(&["a"]),
            )
            .unwrap_err();

        assert!(matches!(err, StackError::SourceNotFound(_)));
        assert!(err.to_string().contains("nothing.jpg"));
    }

    // =========================================================================
    // The built-in stack
    // =========================================================================

    #[test]
    fn builtin_stack_registers_local_then_cloud() {
        assert_eq!(ConverterStack::new().names(), vec!["local", "cloud"]);
    }

    #[test]
    fn builtin_stack_converts_locally() {
        let dir = tempfile::tempdir().unwrap();
        let (source, dest) = paths(&dir);

        let conversion = ConverterStack::new()
            .run(&source, &dest, &ConversionOptions::default())
            .unwrap();
        assert_eq!(conversion.converter, "local");
        assert!(conversion.attempts.is_empty());

        let bytes = fs::read(&dest).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
    }
}
