// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Tabwerk.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Preprocessing stage an image failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageStage {
    Decode,
    Filter,
    Normalize,
    Encode,
    Write,
}

impl ImageStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStage::Decode => "decode",
            ImageStage::Filter => "filter",
            ImageStage::Normalize => "normalize",
            ImageStage::Encode => "encode",
            ImageStage::Write => "write",
        }
    }
}

impl fmt::Display for ImageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for all Tabwerk operations.
#[derive(Debug, Error)]
pub enum TabwerkError {
    // -- Discovery --
    #[error("image discovery failed: {0}")]
    Discovery(String),

    // -- Preprocessing --
    #[error("image {stage} failed for {}: {message}", path.display())]
    Image {
        stage: ImageStage,
        path: PathBuf,
        message: String,
    },

    #[error("no quality/scale satisfies the constraints: {0}")]
    EncodingInfeasible(String),

    // -- Recognition service --
    #[error("job submission rejected: {0}")]
    Submission(String),

    #[error("job polling failed: {0}")]
    Poll(String),

    #[error("job {request_id} not ready after {waited_secs}s")]
    PollTimeout { request_id: String, waited_secs: u64 },

    #[error("result download failed: {0}")]
    Download(String),

    #[error("saving result to {} failed: {message}", path.display())]
    Save { path: PathBuf, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TabwerkError {
    /// Build an [`TabwerkError::Image`] for `path` failing at `stage`.
    pub fn image(stage: ImageStage, path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        TabwerkError::Image {
            stage,
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Only configuration-level errors abort a whole run; everything else is
    /// recorded against a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TabwerkError::Config(_) | TabwerkError::Discovery(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TabwerkError>;
