// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan enhancement — edge-preserving denoising, morphological cleanup, and
// Gaussian adaptive binarization for photographed or scanned tables.

use image::{GrayImage, Luma};
use tabwerk_core::error::{ImageStage, Result, TabwerkError};
use imageproc::filter::{self, gaussian_blur_f32};
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_open};
use tracing::{debug, info, instrument};

/// Tuning for one kind of source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPreset {
    /// Dark lines on a white or lightly coloured background.
    Table,
    /// Blueprints and other dark-background drawings.
    Blueprint,
}

/// Morphological step applied after smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Morphology {
    /// Erode then dilate: removes bright specks smaller than the kernel.
    Open,
    /// Grow bright regions: thickens light strokes on dark paper.
    Dilate,
}

/// Parameters of a [`FilterPreset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetParams {
    pub bilateral_diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
    pub morphology: Morphology,
    /// Adaptive threshold neighbourhood (odd, in pixels).
    pub block_size: u32,
    /// Subtracted from the local weighted mean.
    pub offset: i32,
}

impl FilterPreset {
    pub fn from_blueprint_flag(blueprint: bool) -> Self {
        if blueprint {
            FilterPreset::Blueprint
        } else {
            FilterPreset::Table
        }
    }

    pub fn params(&self) -> PresetParams {
        match self {
            FilterPreset::Table => PresetParams {
                bilateral_diameter: 9,
                sigma_color: 55.0,
                sigma_space: 55.0,
                morphology: Morphology::Open,
                block_size: 11,
                offset: 5,
            },
            FilterPreset::Blueprint => PresetParams {
                bilateral_diameter: 9,
                sigma_color: 55.0,
                sigma_space: 55.0,
                morphology: Morphology::Dilate,
                block_size: 15,
                offset: 21,
            },
        }
    }
}

/// 5x5 elliptical structuring element, row-major.
const ELLIPSE_5X5: [[u8; 5]; 5] = [
    [0, 0, 1, 0, 0],
    [1, 1, 1, 1, 1],
    [1, 1, 1, 1, 1],
    [1, 1, 1, 1, 1],
    [0, 0, 1, 0, 0],
];

/// Enhances a grayscale scan ahead of table recognition.
///
/// Operations consume `self` and return the transformed enhancer. An empty
/// image is rejected with an [`ImageStage::Filter`] error.
pub struct ScanEnhancer {
    /// The working image.
    image: GrayImage,
    preset: FilterPreset,
}

impl ScanEnhancer {
    // -- Construction ---------------------------------------------------------

    pub fn new(image: GrayImage, preset: FilterPreset) -> Self {
        Self { image, preset }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn into_gray(self) -> GrayImage {
        self.image
    }

    // -- Pipeline steps -------------------------------------------------------

    /// Bilateral smoothing followed by the preset's morphological step.
    #[instrument(skip(self), fields(preset = ?self.preset))]
    pub fn denoise(self) -> Result<Self> {
        self.ensure_not_empty()?;
        let params = self.preset.params();
        info!(
            diameter = params.bilateral_diameter,
            morphology = ?params.morphology,
            "Denoising scan"
        );
        let smoothed = bilateral_filter(
            &self.image,
            params.bilateral_diameter,
            params.sigma_color,
            params.sigma_space,
        );
        let mask = ellipse_5x5();
        let cleaned = match params.morphology {
            Morphology::Open => grayscale_open(&smoothed, &mask),
            Morphology::Dilate => grayscale_dilate(&smoothed, &mask),
        };
        Ok(Self {
            image: cleaned,
            preset: self.preset,
        })
    }

    /// Gaussian adaptive threshold with the preset's block size and offset.
    #[instrument(skip(self), fields(preset = ?self.preset))]
    pub fn binarize(self) -> Result<Self> {
        self.ensure_not_empty()?;
        let params = self.preset.params();
        info!(block_size = params.block_size, offset = params.offset, "Binarizing scan");
        let image = adaptive_threshold_gaussian(&self.image, params.block_size, params.offset);
        Ok(Self {
            image,
            preset: self.preset,
        })
    }

    fn ensure_not_empty(&self) -> Result<()> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(TabwerkError::image(
                ImageStage::Filter,
                "<memory>",
                format!("cannot filter a {}x{} image", self.image.width(), self.image.height()),
            ));
        }
        Ok(())
    }
}

// -- Filters ------------------------------------------------------------------

/// Edge-preserving bilateral smoothing. Empty images pass through unchanged.
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    if diameter < 2 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let output = filter::bilateral_filter(image, diameter, sigma_color, sigma_space);
    debug!(diameter, "Bilateral filter complete");
    output
}

/// The 5x5 elliptical structuring element centred on (2, 2).
pub fn ellipse_5x5() -> Mask {
    let kernel = GrayImage::from_fn(5, 5, |x, y| Luma([ELLIPSE_5X5[y as usize][x as usize] * 255]));
    Mask::from_image(&kernel, 2, 2)
}

/// Gaussian sigma matching a square neighbourhood of `block_size` pixels.
pub fn sigma_for_block(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Binary threshold against a Gaussian-weighted local mean.
///
/// A pixel becomes white when it is brighter than `local_mean - offset`,
/// black otherwise.
pub fn adaptive_threshold_gaussian(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let local_mean = gaussian_blur_f32(image, sigma_for_block(block_size));
    let (width, height) = image.dimensions();
    let mut output = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let threshold = local_mean.get_pixel(x, y).0[0] as i32 - offset;
            let value = image.get_pixel(x, y).0[0] as i32;
            let binary = if value > threshold { 255u8 } else { 0u8 };
            output.put_pixel(x, y, Luma([binary]));
        }
    }

    output
}

// -- Tests --------------------------------------------------------------------
