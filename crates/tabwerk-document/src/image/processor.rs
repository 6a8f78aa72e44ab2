// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — grayscale decoding, area-style resizing, and JPEG
// encoding of scanned table images. Operates on in-memory 8-bit luma buffers
// using the `image` crate.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::GrayImage;
use tabwerk_core::error::{ImageStage, Result, TabwerkError};
use tracing::{debug, info, instrument};

/// Grayscale image pipeline operating on a single in-memory scan.
///
/// Transformations consume `self` and return a new `ImageProcessor`, so calls
/// chain:
///
/// ```ignore
/// let gray = ImageProcessor::open_grayscale("table.png")?
///     .resize_exact(1024, 768)
///     .into_gray();
/// ```
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    /// The current working image.
    image: GrayImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Decode an image file and convert it to 8-bit grayscale.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_grayscale(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|err| TabwerkError::image(ImageStage::Decode, path, err))?;
        info!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self {
            image: img.to_luma8(),
        })
    }

    pub fn from_gray(image: GrayImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    /// Current image width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Current image height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn into_gray(self) -> GrayImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Resize to exactly `width` x `height`.
    ///
    /// The triangle filter widens its support with the reduction ratio, so
    /// downscaling averages every source pixel in the footprint (area-style),
    /// which keeps thin table rules from aliasing away.
    #[instrument(skip(self), fields(width, height))]
    pub fn resize_exact(self, width: u32, height: u32) -> Self {
        if (width, height) == self.image.dimensions() {
            return self;
        }
        debug!(
            from_w = self.image.width(),
            from_h = self.image.height(),
            width,
            height,
            "Resizing image"
        );
        Self {
            image: resize_gray(&self.image, width, height),
        }
    }
}

/// Area-style resize of a borrowed luma buffer to `width` x `height`.
pub fn resize_gray(gray: &GrayImage, width: u32, height: u32) -> GrayImage {
    imageops::resize(gray, width.max(1), height.max(1), FilterType::Triangle)
}

/// Encode a luma buffer as JPEG at `quality` (0..=100; the encoder treats 0
/// like 1).
pub fn encode_jpeg(gray: &GrayImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality.min(100));
    gray.write_with_encoder(encoder).map_err(|err| {
        TabwerkError::image(ImageStage::Encode, "<memory>", format!("JPEG encoding failed: {err}"))
    })?;
    Ok(buffer)
}

/// Dimensions after scaling to `percent`%, never below 1 pixel.
pub fn scaled_dimensions((width, height): (u32, u32), percent: u8) -> (u32, u32) {
    let percent = u64::from(percent.min(100));
    let scale = |v: u32| ((u64::from(v) * percent / 100) as u32).max(1);
    (scale(width), scale(height))
}
