// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Run configuration. Loaded once (TOML file and/or defaults), overridden by
// the command line, and validated before any work starts.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TabwerkError};

/// Default byte ceiling: 4 MiB service limit divided by 1.6 to absorb the
/// base64 and URL-encoding overhead of the upload.
pub const DEFAULT_MAX_BYTE_SIZE: u64 = 2_621_440;
pub const DEFAULT_MIN_PIXEL_DIM: u32 = 15;
pub const DEFAULT_MAX_PIXEL_DIM: u32 = 4096;

/// Hard limits an encoded image must satisfy before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConstraint {
    /// Maximum encoded size in bytes (inclusive).
    pub max_byte_size: u64,
    /// Minimum length of the shorter side, in pixels.
    pub min_pixel_dim: u32,
    /// Maximum length of the longer side, in pixels.
    pub max_pixel_dim: u32,
}

impl CompressionConstraint {
    pub fn new(max_byte_size: u64, min_pixel_dim: u32, max_pixel_dim: u32) -> Result<Self> {
        let constraint = Self {
            max_byte_size,
            min_pixel_dim,
            max_pixel_dim,
        };
        constraint.validate()?;
        Ok(constraint)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_byte_size == 0 {
            return Err(TabwerkError::Config("max_byte_size must be > 0".into()));
        }
        if self.min_pixel_dim == 0 {
            return Err(TabwerkError::Config("min_pixel_dim must be > 0".into()));
        }
        if self.min_pixel_dim >= self.max_pixel_dim {
            return Err(TabwerkError::Config(format!(
                "min_pixel_dim ({}) must be below max_pixel_dim ({})",
                self.min_pixel_dim, self.max_pixel_dim
            )));
        }
        Ok(())
    }

    /// Whether a `width` x `height` image lies inside the pixel window.
    pub fn dims_within(&self, width: u32, height: u32) -> bool {
        let (short, long) = (width.min(height), width.max(height));
        short >= self.min_pixel_dim && long <= self.max_pixel_dim
    }
}

impl Default for CompressionConstraint {
    fn default() -> Self {
        Self {
            max_byte_size: DEFAULT_MAX_BYTE_SIZE,
            min_pixel_dim: DEFAULT_MIN_PIXEL_DIM,
            max_pixel_dim: DEFAULT_MAX_PIXEL_DIM,
        }
    }
}

/// Concurrency limits for the two pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerLimits {
    /// Concurrent preprocessing workers (CPU and disk bound).
    pub preprocess: usize,
    /// Concurrent recognition jobs. The service enforces a per-account
    /// ceiling on running jobs, free accounts allow very few.
    pub recognition: usize,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            preprocess: 16,
            recognition: 1,
        }
    }
}

/// Result polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds to wait between status polls of one job.
    pub interval_secs: u64,
    /// Give up on a job after this many seconds. `None` waits forever.
    pub timeout_secs: Option<u64>,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            timeout_secs: None,
        }
    }
}

/// Format of the recognition result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    Excel,
    Json,
}

impl ResultFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultFormat::Excel => "excel",
            ResultFormat::Json => "json",
        }
    }
}

/// Recognition language set understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "CHN_ENG")]
    ChnEng,
    #[serde(rename = "ENG")]
    Eng,
    #[serde(rename = "JAP")]
    Jap,
    #[serde(rename = "KOR")]
    Kor,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::ChnEng => "CHN_ENG",
            Language::Eng => "ENG",
            Language::Jap => "JAP",
            Language::Kor => "KOR",
        }
    }
}

/// Per-job options sent with every submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    pub result_format: ResultFormat,
    pub language: Language,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            result_format: ResultFormat::Excel,
            language: Language::ChnEng,
        }
    }
}

/// Where the recognition service lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the service API.
    pub base_url: String,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://aip.baidubce.com".into(),
            request_timeout_secs: 60,
        }
    }
}

/// Complete settings for one Tabwerk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabwerkConfig {
    pub constraint: CompressionConstraint,
    pub workers: WorkerLimits,
    pub polling: PollingConfig,
    pub recognition: RecognitionOptions,
    pub service: ServiceConfig,
    /// Use the dark-background (blueprint) filter preset.
    pub blueprint: bool,
    /// Name of the per-directory folder that receives recognition results.
    pub output_dir_name: String,
    /// File name of the failure log written into the run root.
    pub error_log_name: String,
}

impl Default for TabwerkConfig {
    fn default() -> Self {
        Self {
            constraint: CompressionConstraint::default(),
            workers: WorkerLimits::default(),
            polling: PollingConfig::default(),
            recognition: RecognitionOptions::default(),
            service: ServiceConfig::default(),
            blueprint: false,
            output_dir_name: "表格输出成果".into(),
            error_log_name: "error.log".into(),
        }
    }
}

impl TabwerkConfig {
    /// Read a TOML config file. Missing keys fall back to defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TabwerkError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TabwerkError::Config(format!("bad TOML: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.constraint.validate()?;
        if self.workers.preprocess == 0 || self.workers.recognition == 0 {
            return Err(TabwerkError::Config("worker limits must be at least 1".into()));
        }
        if self.polling.interval_secs == 0 {
            return Err(TabwerkError::Config("poll interval must be at least 1s".into()));
        }
        if self.output_dir_name.trim().is_empty() || self.output_dir_name.contains(['/', '\\']) {
            return Err(TabwerkError::Config(format!(
                "output_dir_name {:?} must be a plain folder name",
                self.output_dir_name
            )));
        }
        if self.error_log_name.trim().is_empty() {
            return Err(TabwerkError::Config("error_log_name must not be empty".into()));
        }
        if !self.service.base_url.starts_with("http") {
            return Err(TabwerkError::Config(format!(
                "service base_url {:?} is not an http(s) URL",
                self.service.base_url
            )));
        }
        Ok(())
    }
}
