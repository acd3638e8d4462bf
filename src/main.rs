use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use walkdir::WalkDir;

use webpify::capability::supported_input_extensions;
use webpify::config::{self, ConfigError};
use webpify::convert::{Conversion, ConverterStack};
use webpify::options::{
    ConversionOptions, MetadataPolicy, OptionSpec, QualityRequest, common_schema,
};

/// Conversion was attempted and at least one file did not convert.
const EXIT_CONVERSION_FAILED: u8 = 1;
/// Bad configuration or usage; nothing was attempted.
const EXIT_USAGE: u8 = 2;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup; called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "webpify")]
#[command(about = "Convert JPEG and PNG images to WebP")]
#[command(long_about = "\
Convert JPEG and PNG images to WebP

Converters are tried in order until one produces a file. The built-in
order is \"local\" (codecs compiled into this binary) followed by
\"cloud\" (a remote conversion service). A converter that cannot run in
this environment is skipped; one that fails falls through to the next.

Examples:

  webpify convert photo.jpg                  # writes photo.webp
  webpify convert photo.jpg small.webp       # explicit destination
  webpify convert shoot/ --out-dir webp/     # whole tree, mirrored
  webpify convert photo.jpg --quality 80     # fixed encoding quality
  webpify probe                              # what can run here?

Run 'webpify gen-config' to generate a documented webpify.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file to read (default: ./webpify.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log converter attempts and decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert an image, or every image under a directory
    Convert(ConvertArgs),
    /// Report whether each converter could run in this environment
    Probe,
    /// Print a stock webpify.toml with all options documented
    GenConfig,
}

#[derive(Args)]
struct ConvertArgs {
    /// Source image, or a directory to convert recursively
    source: PathBuf,

    /// Destination file; defaults to the source with a .webp extension.
    /// Single-file mode only
    dest: Option<PathBuf>,

    /// Mirror converted files into this directory instead of writing
    /// them alongside the sources (directory mode)
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Encoding quality: 0-100, or "auto" to match the source JPEG
    #[arg(long, value_name = "Q")]
    quality: Option<QualityRequest>,

    /// Ceiling applied to auto-detected quality
    #[arg(long, value_name = "N")]
    max_quality: Option<u8>,

    /// Metadata handling: "none" or "keep-all"
    #[arg(long, value_name = "POLICY")]
    metadata: Option<MetadataPolicy>,

    /// Converter to try; repeat the flag to set the whole order
    #[arg(long = "converter", value_name = "NAME")]
    converters: Vec<String>,

    /// Parallel conversions in directory mode (default: all cores)
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// Cloud service endpoint
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Cloud authentication protocol version, 0 or 1
    #[arg(long, value_name = "V")]
    api_version: Option<u8>,

    /// Shared secret for api-version 0
    #[arg(long, value_name = "SECRET")]
    secret: Option<String>,

    /// Api key for api-version 1
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// Send a salted hash of the api key instead of the key itself
    #[arg(long)]
    crypt_api_key_in_transfer: bool,

    /// Host name reported to the cloud service
    #[arg(long, value_name = "NAME")]
    servername: Option<String>,

    /// Cloud request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Skip TLS certificate verification for the cloud service
    #[arg(long)]
    allow_invalid_certs: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init();

    match cli.command {
        Command::Convert(args) => run_convert(cli.config.as_deref(), args),
        Command::Probe => run_probe(cli.config.as_deref()),
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            ExitCode::SUCCESS
        }
    }
}

fn run_convert(config_path: Option<&Path>, args: ConvertArgs) -> ExitCode {
    let stack = ConverterStack::new();
    let mut options = match load_options(config_path) {
        Ok(options) => options,
        Err(err) => return usage_error(&err),
    };
    apply_overrides(&mut options, &args);
    if let Err(err) = options.validate(&stack.names()) {
        return usage_error(&err);
    }

    if args.source.is_dir() {
        convert_tree(&stack, &options, &args)
    } else {
        convert_file(&stack, &options, &args)
    }
}

fn convert_file(
    stack: &ConverterStack,
    options: &ConversionOptions,
    args: &ConvertArgs,
) -> ExitCode {
    let dest = match &args.dest {
        Some(dest) => dest.clone(),
        None => args.source.with_extension("webp"),
    };
    match stack.run(&args.source, &dest, options) {
        Ok(done) => {
            report_success(&args.source, &dest, &done);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}: {err}", args.source.display());
            ExitCode::from(EXIT_CONVERSION_FAILED)
        }
    }
}

fn convert_tree(
    stack: &ConverterStack,
    options: &ConversionOptions,
    args: &ConvertArgs,
) -> ExitCode {
    if args.dest.is_some() {
        let err = "a destination file only applies to single-file conversion; \
                   use --out-dir for directories";
        return usage_error(&err);
    }
    init_thread_pool(args.jobs);

    let sources = collect_sources(&args.source);
    if sources.is_empty() {
        println!("no convertible images under {}", args.source.display());
        return ExitCode::SUCCESS;
    }

    let failed = sources
        .par_iter()
        .map(|source| {
            let dest = destination_for(source, &args.source, args.out_dir.as_deref());
            match stack.run(source, &dest, options) {
                Ok(done) => {
                    report_success(source, &dest, &done);
                    false
                }
                Err(err) => {
                    eprintln!("{}: {err}", source.display());
                    true
                }
            }
        })
        .filter(|&failed| failed)
        .count();

    println!("{} converted, {failed} failed", sources.len() - failed);
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CONVERSION_FAILED)
    }
}

fn run_probe(config_path: Option<&Path>) -> ExitCode {
    let stack = ConverterStack::new();
    let options = match load_options(config_path) {
        Ok(options) => options,
        Err(err) => return usage_error(&err),
    };

    println!("common options:");
    print_schema(&common_schema());

    for converter in stack.converters() {
        println!();
        match converter.operational(&options) {
            Ok(()) => println!("{}: operational", converter.name()),
            Err(err) => println!("{}: not operational ({err})", converter.name()),
        }
        print_schema(&converter.schema());
    }
    ExitCode::SUCCESS
}

/// Read options from the named config file, or from `./webpify.toml` when
/// no file was named and one exists.
fn load_options(config_path: Option<&Path>) -> Result<ConversionOptions, ConfigError> {
    match config_path {
        Some(path) => config::load_config(path),
        None => config::load_config_if_present(Path::new(".")),
    }
}

/// Lay CLI flags over config-file values. A flag that was not given
/// leaves the loaded value alone.
fn apply_overrides(options: &mut ConversionOptions, args: &ConvertArgs) {
    if let Some(quality) = args.quality {
        options.quality = quality;
    }
    if let Some(max_quality) = args.max_quality {
        options.max_quality = max_quality;
    }
    if let Some(metadata) = args.metadata {
        options.metadata = metadata;
    }
    if !args.converters.is_empty() {
        options.converters = args.converters.clone();
    }
    if let Some(url) = &args.url {
        options.cloud.url = url.clone();
    }
    if let Some(api_version) = args.api_version {
        options.cloud.api_version = api_version;
    }
    if let Some(secret) = &args.secret {
        options.cloud.secret = secret.clone();
    }
    if let Some(api_key) = &args.api_key {
        options.cloud.api_key = api_key.clone();
    }
    if args.crypt_api_key_in_transfer {
        options.cloud.crypt_api_key_in_transfer = true;
    }
    if let Some(servername) = &args.servername {
        options.cloud.servername = servername.clone();
    }
    if let Some(timeout) = args.timeout {
        options.cloud.timeout = timeout;
    }
    if args.allow_invalid_certs {
        options.cloud.allow_invalid_certs = true;
    }
}

/// Every convertible file under `root`, by extension.
fn collect_sources(root: &Path) -> Vec<PathBuf> {
    let extensions = supported_input_extensions();
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect()
}

/// Destination for one source in directory mode: mirrored under
/// `--out-dir` when given, a sibling of the source otherwise.
fn destination_for(source: &Path, root: &Path, out_dir: Option<&Path>) -> PathBuf {
    match out_dir {
        Some(out) => {
            let relative = source.strip_prefix(root).unwrap_or(source);
            out.join(relative).with_extension("webp")
        }
        None => source.with_extension("webp"),
    }
}

/// Initialize the rayon thread pool for directory mode.
///
/// Caps at the number of available cores; the user can constrain down,
/// not up.
fn init_thread_pool(jobs: Option<usize>) {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let threads = jobs.map(|n| n.min(cores)).unwrap_or(cores);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn report_success(source: &Path, dest: &Path, done: &Conversion) {
    println!(
        "{} -> {} ({})",
        source.display(),
        dest.display(),
        done.converter
    );
}

fn print_schema(specs: &[OptionSpec]) {
    for spec in specs {
        let required = if spec.required { ", required" } else { "" };
        println!(
            "  {} ({}{required}) default {}",
            spec.name,
            spec.kind,
            spec.display_default()
        );
    }
}

fn usage_error(err: &dyn std::fmt::Display) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(EXIT_USAGE)
}
