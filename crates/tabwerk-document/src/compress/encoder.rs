// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Size-constrained JPEG encoding. Finds the highest JPEG quality, and if
// necessary the largest downscale percent, whose encoding stays within the
// byte ceiling and the pixel window. Both searches are integer binary
// searches, so an image costs at most ~7 encodes per dimension instead of 101.

use image::GrayImage;
use tabwerk_core::config::CompressionConstraint;
use tabwerk_core::error::{Result, TabwerkError};
use tracing::{debug, info, instrument, warn};

use super::search::binary_search_max;
use crate::image::processor::{encode_jpeg, resize_gray, scaled_dimensions};

pub const MIN_QUALITY: u8 = 0;
pub const MAX_QUALITY: u8 = 100;
pub const MIN_SCALE_PERCENT: u8 = 1;
pub const MAX_SCALE_PERCENT: u8 = 100;

/// One probed point of the search space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingCandidate {
    pub quality: u8,
    pub scale_percent: u8,
    pub encoded_len: usize,
}

/// The accepted encoding of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub scale_percent: u8,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Searches JPEG quality and scale against a [`CompressionConstraint`].
#[derive(Debug, Clone, Copy)]
pub struct SizeConstrainedEncoder {
    constraint: CompressionConstraint,
}

impl SizeConstrainedEncoder {
    pub fn new(constraint: CompressionConstraint) -> Self {
        Self { constraint }
    }

    /// Highest quality in `0..=100` whose encoding is at most `ceiling` bytes.
    ///
    /// Fails with `EncodingInfeasible` when even quality 0 is too large.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn find_best_quality(&self, image: &GrayImage, ceiling: u64) -> Result<u8> {
        let (quality, _) = self.search_quality(image, ceiling)?;
        Ok(quality)
    }

    /// Largest scale percent in `1..=100` at which the image, encoded at
    /// `quality`, sits inside the pixel window and under the byte ceiling.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn find_best_scale(&self, image: &GrayImage, quality: u8) -> Result<u8> {
        let (scale, _) = self.search_scale(image, quality)?;
        Ok(scale)
    }

    /// Encode `image` so that it satisfies the whole constraint.
    ///
    /// Quality is searched first at full size. The scale search runs when the
    /// image is outside the pixel window, or when quality 0 still overflows
    /// the ceiling (then at quality 0).
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn encode_within(&self, image: &GrayImage) -> Result<EncodedImage> {
        let (width, height) = image.dimensions();
        let in_window = self.constraint.dims_within(width, height);

        let quality = match self.search_quality(image, self.constraint.max_byte_size) {
            Ok((quality, bytes)) if in_window => {
                info!(quality, encoded_len = bytes.len(), "Quality search converged");
                return Ok(EncodedImage {
                    bytes,
                    quality,
                    scale_percent: MAX_SCALE_PERCENT,
                    width,
                    height,
                });
            }
            Ok((quality, _)) => {
                debug!(quality, width, height, "Outside pixel window; searching scale");
                quality
            }
            Err(TabwerkError::EncodingInfeasible(reason)) => {
                warn!(%reason, "Full-size encode overflows at lowest quality; searching scale");
                MIN_QUALITY
            }
            Err(err) => return Err(err),
        };

        let (scale_percent, bytes) = self.search_scale(image, quality)?;
        let (width, height) = scaled_dimensions((width, height), scale_percent);
        info!(quality, scale_percent, width, height, encoded_len = bytes.len(), "Scale search converged");
        Ok(EncodedImage {
            bytes,
            quality,
            scale_percent,
            width,
            height,
        })
    }

    // -- Searches -------------------------------------------------------------

    /// JPEG size is not monotone at the very bottom of the quality range, so
    /// feasibility is decided by quality 0 itself before searching above it.
    fn search_quality(&self, image: &GrayImage, ceiling: u64) -> Result<(u8, Vec<u8>)> {
        let floor = encode_jpeg(image, MIN_QUALITY)?;
        if floor.len() as u64 > ceiling {
            debug!(encoded_len = floor.len(), ceiling, "Lowest quality overflows");
            return Err(TabwerkError::EncodingInfeasible(format!(
                "{}x{} image exceeds {ceiling} bytes even at quality {MIN_QUALITY}",
                image.width(),
                image.height()
            )));
        }

        let mut best: (u8, Vec<u8>) = (MIN_QUALITY, floor);
        let found = binary_search_max(u32::from(MIN_QUALITY) + 1, u32::from(MAX_QUALITY), |q| -> Result<bool> {
            let quality = q as u8;
            let bytes = encode_jpeg(image, quality)?;
            let candidate = EncodingCandidate {
                quality,
                scale_percent: MAX_SCALE_PERCENT,
                encoded_len: bytes.len(),
            };
            let fits = candidate.encoded_len as u64 <= ceiling;
            debug!(?candidate, fits, "Probed quality");
            if fits && quality > best.0 {
                best = (quality, bytes);
            }
            Ok(fits)
        })?;

        match found {
            Some(q) if q as u8 != best.0 => {
                let quality = q as u8;
                Ok((quality, encode_jpeg(image, quality)?))
            }
            _ => Ok(best),
        }
    }

    fn search_scale(&self, image: &GrayImage, quality: u8) -> Result<(u8, Vec<u8>)> {
        let constraint = self.constraint;
        let dims = image.dimensions();
        let mut best: Option<(u8, Vec<u8>)> = None;

        let found = binary_search_max(
            u32::from(MIN_SCALE_PERCENT),
            u32::from(MAX_SCALE_PERCENT),
            |p| -> Result<bool> {
                let percent = p as u8;
                let (w, h) = scaled_dimensions(dims, percent);
                if !constraint.dims_within(w, h) {
                    debug!(percent, w, h, "Scale outside pixel window");
                    return Ok(false);
                }
                let bytes = if (w, h) == dims {
                    encode_jpeg(image, quality)?
                } else {
                    encode_jpeg(&resize_gray(image, w, h), quality)?
                };
                let fits = bytes.len() as u64 <= constraint.max_byte_size;
                debug!(percent, encoded_len = bytes.len(), fits, "Probed scale");
                if fits {
                    best = Some((percent, bytes));
                }
                Ok(fits)
            },
        )?;

        match (found, best) {
            (Some(p), Some((percent, bytes))) if p as u8 == percent => Ok((percent, bytes)),
            _ => Err(TabwerkError::EncodingInfeasible(format!(
                "no scale in {MIN_SCALE_PERCENT}..={MAX_SCALE_PERCENT}% fits {}x{} into {} bytes within [{}, {}] px at quality {quality}",
                dims.0,
                dims.1,
                constraint.max_byte_size,
                constraint.min_pixel_dim,
                constraint.max_pixel_dim
            ))),
        }
    }
}
