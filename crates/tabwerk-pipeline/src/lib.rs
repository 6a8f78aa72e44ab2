// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tabwerk-pipeline — Discovery, bounded batch execution, and the two-stage
// preprocess-then-recognize pipeline.

pub mod batch;
pub mod discovery;
pub mod error_log;
pub mod pipeline;

pub use batch::{BatchFailure, BatchOutcome, BoundedBatchRunner};
pub use discovery::{discover, discover_preprocessed};
pub use error_log::ErrorLog;
pub use pipeline::{Pipeline, RunMode, RunReport};
