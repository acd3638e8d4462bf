//! # webpify
//!
//! Converts JPEG and PNG images to WebP, either on this machine or through
//! a remote conversion service, with automatic quality detection.
//!
//! # Architecture: A Stack of Converters
//!
//! Conversion methods differ in what they need from the environment: the
//! local encoder needs the right codecs compiled into the binary, the
//! cloud converter needs a configured endpoint and working credentials.
//! webpify treats each method as a [`convert::Converter`] and tries them
//! in configured order until one delivers:
//!
//! ```text
//! 1. Resolve   options + quality    (config file, CLI flags, JPEG probing)
//! 2. Attempt   converters in order  (each succeeds, fails, or is skipped)
//! 3. Write     dest.webp            (no partial files survive an error)
//! ```
//!
//! The stack design exists for one reason: a conversion setup should keep
//! working when parts of it degrade. A missing codec, an unreachable
//! service, or absent credentials each knock out one converter, not the
//! whole tool.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`convert`] | The `Converter` trait, the local and cloud converters, and the stack that tries them in order |
//! | [`options`] | The validated option model every converter receives, including cloud credentials |
//! | [`quality`] | `auto` quality resolution: estimates a JPEG's original encoding quality from its quantization tables |
//! | [`webp_mux`] | RIFF-level WebP editing used to carry ICC and EXIF payloads into the encoded output |
//! | [`capability`] | What the running build can actually decode and encode; the seam tests use to fake degraded hosts |
//! | [`config`] | Optional `webpify.toml` loading and the stock commented config |
//!
//! # Design Decisions
//!
//! ## Two Kinds of Failure
//!
//! A converter that cannot run here (codec not compiled in, no endpoint
//! configured, file too big for the service) is a different situation from
//! a converter that ran and failed. [`convert::ConversionError`] keeps the
//! two apart, and the stack uses the distinction: "not operational" is
//! expected and merely skips ahead, while a genuine failure is still
//! recorded per attempt so the final error names what each converter said.
//!
//! ## No Partial Destination Files
//!
//! The destination is written only after a converter has produced a
//! complete WebP payload in memory, and a failed or interrupted write
//! removes whatever landed on disk. Callers never have to distinguish "not
//! converted yet" from "half converted".
//!
//! ## Quality Detection Degrades Gracefully
//!
//! With `quality = "auto"`, the source JPEG's own encoding quality is
//! estimated by matching its luminance quantization table against the
//! standard table at every scaling factor. When the source is not a JPEG
//! or the estimate fails, the local encoder falls back to its default
//! quality and the cloud converter tells the service to decide. A failed
//! estimate never fails a conversion.
//!
//! ## Secrets Stay Out of Logs and Errors
//!
//! The cloud `secret`, `api-key`, and `url` never appear in log lines or
//! error messages; transport errors are scrubbed of the request URL before
//! they are reported. With `crypt-api-key-in-transfer` enabled, the raw
//! api key never travels at all: each request carries a fresh salt and a
//! one-way hash derived from it.
//!
//! ## Wire Compatibility Over Elegance
//!
//! The cloud protocol (multipart field names, the md5 pair signature of
//! api-version 0, the exact crypted api-key transform of api-version 1)
//! matches what already-deployed conversion endpoints expect, byte for
//! byte. Where the historical protocol has quirks, webpify reproduces
//! them rather than inventing a cleaner dialect no server speaks.
//!
//! ## No External Binaries
//!
//! Decoding uses the `image` crate and encoding links libwebp statically
//! through the `webp` crate; TLS is rustls. Nothing shells out to `cwebp`
//! or ImageMagick and nothing probes the host for helper programs, so a
//! single downloaded binary converts images on any machine. What the build
//! can do is knowable at compile time, which is also what makes the
//! [`capability`] seam honest.
//!
//! ## Blocking HTTP
//!
//! The cloud converter uses reqwest's blocking client. Conversions are
//! batch work parallelized per file with rayon; each worker holds at most
//! one request in flight, so an async runtime would add machinery without
//! adding throughput.

pub mod capability;
pub mod config;
pub mod convert;
pub mod options;
pub mod quality;
pub mod webp_mux;

#[cfg(test)]
pub(crate) mod test_helpers;
