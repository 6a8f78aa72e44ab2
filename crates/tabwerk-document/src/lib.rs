// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tabwerk-document — Image processing for the Tabwerk table recognition pipeline.
//
// Provides grayscale decoding and resizing, scan denoising and adaptive
// binarization, pixel bounds normalization, and a binary-searched JPEG encoder
// that fits an image under the recognition service's upload ceiling.

pub mod compress;
pub mod image;
pub mod preprocess;
pub mod scan;

// Re-export the primary structs so callers can use `tabwerk_document::ImagePreprocessor` etc.
pub use compress::bounds::{PixelBoundsNormalizer, ScaleDecision};
pub use compress::encoder::{EncodedImage, SizeConstrainedEncoder};
pub use image::processor::ImageProcessor;
pub use preprocess::ImagePreprocessor;
pub use scan::enhance::{FilterPreset, ScanEnhancer};
