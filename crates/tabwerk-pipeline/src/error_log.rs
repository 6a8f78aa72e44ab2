// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-run failure log written into the run root.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tabwerk_core::error::Result;
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Append-only log of item failures, one line each:
/// `<timestamp> - <caller> - Line <n>: <message>`.
///
/// Shared by all workers of a run. Writing never fails the caller; a broken
/// log file only produces a tracing warning.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl ErrorLog {
    /// Open (or create) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line attributed to `caller` and the calling source line.
    #[track_caller]
    pub fn record(&self, caller: &str, message: impl Display) {
        let line = Location::caller().line();
        let entry = format!(
            "{} - {caller} - Line {line}: {message}\n",
            Local::now().format(TIMESTAMP_FORMAT)
        );
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writer.write_all(entry.as_bytes()) {
            warn!(path = %self.path.display(), error = %err, "Could not write error log");
        }
    }

    /// Flush buffered lines to disk.
    pub fn flush(&self) -> Result<()> {
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.flush()?;
        Ok(())
    }
}

impl Drop for ErrorLog {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), error = %err, "Could not flush error log");
        }
    }
}
