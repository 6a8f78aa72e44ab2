// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Tabwerk pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source images grouped by the directory that owns them.
pub type ImageGroups = BTreeMap<PathBuf, Vec<PathBuf>>;

/// Status code the recognition service reports for a finished job.
pub const STATUS_READY: i64 = 3;

/// Lifecycle of one source image during preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Preprocessing,
    Preprocessed,
    Failed,
}

/// One source image picked up by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub path: PathBuf,
    /// Directory used for grouping and reporting.
    pub directory: PathBuf,
    pub status: TaskStatus,
}

impl ImageTask {
    pub fn new(path: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            directory: directory.into(),
            status: TaskStatus::Pending,
        }
    }

    /// File name without directory, for log lines.
    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }
}

/// What the preprocessor produced for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessOutcome {
    /// Where the original file was moved to.
    pub backup: PathBuf,
    /// The newly written, upload-ready JPEG.
    pub output: PathBuf,
    pub quality: u8,
    pub scale_percent: u8,
    pub width: u32,
    pub height: u32,
    pub encoded_len: usize,
}

/// Local correlation id for a recognition job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the recognition service assigns to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw answer to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub code: i64,
    pub result_url: Option<String>,
    /// Progress percentage, when the service reports one.
    pub percent: Option<u8>,
}

impl PollStatus {
    pub fn is_ready(&self) -> bool {
        self.code == STATUS_READY
    }
}

/// States of a recognition job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Polling,
    Ready,
    Failed,
}

/// One image travelling through the recognition service.
#[derive(Debug, Clone)]
pub struct RecognitionJob {
    pub id: JobId,
    pub source: PathBuf,
    pub directory: PathBuf,
    pub request_id: Option<RequestId>,
    pub state: JobState,
    pub last_code: Option<i64>,
    pub result_url: Option<String>,
    pub polls: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecognitionJob {
    pub fn new(source: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source: source.into(),
            directory: directory.into(),
            request_id: None,
            state: JobState::Submitted,
            last_code: None,
            result_url: None,
            polls: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_submitted(&mut self, request_id: RequestId) {
        self.request_id = Some(request_id);
        self.state = JobState::Polling;
        self.touch();
    }

    pub fn record_poll(&mut self, status: &PollStatus) {
        self.polls += 1;
        self.last_code = Some(status.code);
        if status.is_ready() {
            self.result_url = status.result_url.clone();
            self.state = JobState::Ready;
        }
        self.touch();
    }

    pub fn mark_failed(&mut self) {
        self.state = JobState::Failed;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Aggregate outcome of one stage in one directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchResult {
    pub fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn merge(&mut self, other: BatchResult) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed == self.attempted
    }
}

/// Per-directory results of a full run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub preprocessing: Option<BatchResult>,
    pub recognition: Option<BatchResult>,
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
