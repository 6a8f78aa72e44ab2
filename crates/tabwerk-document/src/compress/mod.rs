// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Compression — pixel bounds normalization and binary-searched JPEG quality
// and scale under a byte ceiling.

pub mod bounds;
pub mod encoder;
pub mod search;

pub use bounds::{PixelBoundsNormalizer, ScaleDecision};
pub use encoder::{EncodedImage, SizeConstrainedEncoder};
pub use search::binary_search_max;
