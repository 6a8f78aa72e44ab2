// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pixel bounds normalization — closed-form uniform rescale into the
// service's [min, max] pixel window.

use tabwerk_core::config::CompressionConstraint;
use tabwerk_core::error::{ImageStage, Result, TabwerkError};
use tracing::debug;

use crate::image::processor::ImageProcessor;

/// Result of checking an image against the pixel window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleDecision {
    /// Already inside the window.
    Unchanged { width: u32, height: u32 },
    /// Needs a uniform rescale by `scale` to `width` x `height`.
    Rescale { scale: f64, width: u32, height: u32 },
}

impl ScaleDecision {
    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            ScaleDecision::Unchanged { width, height }
            | ScaleDecision::Rescale { width, height, .. } => (width, height),
        }
    }

    pub fn scale(&self) -> f64 {
        match *self {
            ScaleDecision::Unchanged { .. } => 1.0,
            ScaleDecision::Rescale { scale, .. } => scale,
        }
    }
}

/// Brings image dimensions into `[min_pixel_dim, max_pixel_dim]`.
#[derive(Debug, Clone, Copy)]
pub struct PixelBoundsNormalizer {
    min_dim: u32,
    max_dim: u32,
}

impl PixelBoundsNormalizer {
    pub fn new(constraint: &CompressionConstraint) -> Self {
        Self {
            min_dim: constraint.min_pixel_dim,
            max_dim: constraint.max_pixel_dim,
        }
    }

    /// Compute the scale for a `width` x `height` image.
    ///
    /// An oversize longer side wins over an undersize shorter side; after
    /// rounding each side is clamped into the window.
    pub fn normalize(&self, width: u32, height: u32) -> ScaleDecision {
        let longer = width.max(height);
        let shorter = width.min(height);

        let scale = if longer > self.max_dim {
            f64::from(self.max_dim) / f64::from(longer)
        } else if shorter < self.min_dim {
            f64::from(self.min_dim) / f64::from(shorter.max(1))
        } else {
            return ScaleDecision::Unchanged { width, height };
        };

        let fit = |v: u32| {
            let scaled = (f64::from(v) * scale).round() as u32;
            scaled.clamp(self.min_dim, self.max_dim)
        };
        ScaleDecision::Rescale {
            scale,
            width: fit(width),
            height: fit(height),
        }
    }

    /// Normalize an image, returning it resized when needed.
    ///
    /// An image with a zero-length side has no aspect ratio to keep and is
    /// rejected with an [`ImageStage::Normalize`] error.
    pub fn apply(&self, image: ImageProcessor) -> Result<(ImageProcessor, ScaleDecision)> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(TabwerkError::image(
                ImageStage::Normalize,
                "<memory>",
                format!("cannot normalize a {width}x{height} image"),
            ));
        }
        let decision = self.normalize(width, height);
        Ok(match decision {
            ScaleDecision::Unchanged { .. } => (image, decision),
            ScaleDecision::Rescale {
                scale,
                width,
                height,
            } => {
                debug!(scale, width, height, "Normalizing pixel bounds");
                (image.resize_exact(width, height), decision)
            }
        })
    }
}
