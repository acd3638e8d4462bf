//! In-process conversion through the compiled image codecs.
//!
//! Decodes the source with the image library, encodes with libwebp, and
//! writes the result in one shot. Anything the build cannot decode is a
//! [`ConversionError::NotOperational`]: a different converter in the
//! stack (the cloud service runs its own codecs) may still handle the
//! file, so inability to read it here must not end the conversion.

use image::{DynamicImage, ImageDecoder, ImageReader};
use log::debug;
use std::path::Path;

use crate::capability::{CapabilityProvider, HostCapabilities};
use crate::options::{ConversionOptions, MetadataPolicy, OptionSpec};
use crate::quality::{self, QualityDecision};
use crate::webp_mux;

use super::{ConversionError, Converter, write_destination};

pub struct LocalConverter<P: CapabilityProvider = HostCapabilities> {
    provider: P,
}

impl LocalConverter<HostCapabilities> {
    pub fn new() -> Self {
        Self {
            provider: HostCapabilities,
        }
    }
}

impl Default for LocalConverter<HostCapabilities> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CapabilityProvider> LocalConverter<P> {
    pub fn with_provider(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: CapabilityProvider> Converter for LocalConverter<P> {
    fn name(&self) -> &'static str {
        "local"
    }

    // No options beyond the common set.
    fn schema(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn operational(&self, _options: &ConversionOptions) -> Result<(), ConversionError> {
        let caps = self.provider.local();
        if caps.input_formats.is_empty() {
            return Err(ConversionError::NotOperational(
                "no image decoders are compiled into this build".into(),
            ));
        }
        if !caps.webp_encoding {
            return Err(ConversionError::NotOperational(
                "no webp encoder is compiled into this build".into(),
            ));
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
        let caps = self.provider.local();

        let reader = ImageReader::open(source)
            .map_err(|e| {
                ConversionError::NotOperational(format!("could not open source image: {e}"))
            })?
            .with_guessed_format()
            .map_err(|e| {
                ConversionError::NotOperational(format!("could not probe source image: {e}"))
            })?;
        let format = reader.format().ok_or_else(|| {
            ConversionError::NotOperational(
                "source is not an image in a recognized format".into(),
            )
        })?;
        if !caps.can_decode(format) {
            return Err(ConversionError::NotOperational(format!(
                "decoding {} is not supported by this build",
                format.to_mime_type()
            )));
        }

        let mut decoder = reader.into_decoder().map_err(|e| {
            ConversionError::NotOperational(format!("could not decode source image: {e}"))
        })?;
        // With the `none` policy nothing is read, so nothing can leak
        // into the output.
        let (icc, exif) = match options.metadata {
            MetadataPolicy::KeepAll => (
                decoder.icc_profile().ok().flatten(),
                decoder.exif_metadata().ok().flatten(),
            ),
            MetadataPolicy::None => (None, None),
        };
        let image = DynamicImage::from_decoder(decoder).map_err(|e| {
            ConversionError::NotOperational(format!("could not decode source image: {e}"))
        })?;

        let width = image.width();
        let height = image.height();
        let has_alpha = image.color().has_alpha();

        let decision = quality::resolve(source, options.quality, options.max_quality);
        let encoded = encode_webp(&image, decision)?;

        let bytes = if icc.is_some() || exif.is_some() {
            webp_mux::with_metadata(
                &encoded,
                icc.as_deref(),
                exif.as_deref(),
                width,
                height,
                has_alpha,
            )
            .map_err(|e| ConversionError::Failed(format!("could not attach metadata: {e}")))?
        } else {
            encoded
        };

        if bytes.is_empty() {
            return Err(ConversionError::Failed(
                "encoder produced an empty result".into(),
            ));
        }
        write_destination(destination, &bytes)
            .map_err(|e| ConversionError::Failed(format!("failed writing file: {e}")))?;
        debug!(
            "local: {} -> {} ({} bytes)",
            source.display(),
            destination.display(),
            bytes.len()
        );
        Ok(())
    }
}

fn encode_webp(image: &DynamicImage, decision: QualityDecision) -> Result<Vec<u8>, ConversionError> {
    let width = image.width();
    let height = image.height();

    let rgba;
    let rgb;
    let encoder = if image.color().has_alpha() {
        rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height)
    } else {
        rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height)
    };

    let memory = match decision {
        QualityDecision::Fixed(q) => encoder
            .encode_simple(false, q as f32)
            .map_err(|e| ConversionError::Failed(format!("webp encoding failed: {e:?}")))?,
        QualityDecision::DetectionFailed => {
            debug!("quality detection failed, keeping the encoder's default quality");
            let config = webp::WebPConfig::new()
                .map_err(|_| ConversionError::Failed("webp encoder configuration failed".into()))?;
            encoder
                .encode_advanced(&config)
                .map_err(|e| ConversionError::Failed(format!("webp encoding failed: {e:?}")))?
        }
    };
    Ok(memory.to_vec())
}
