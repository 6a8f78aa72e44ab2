// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanning pipeline — denoising, morphology, and adaptive binarization of
// photographed table pages.

pub mod enhance;

pub use enhance::{FilterPreset, ScanEnhancer};
