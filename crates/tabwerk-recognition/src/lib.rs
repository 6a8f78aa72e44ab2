// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tabwerk-recognition — Asynchronous table recognition for Tabwerk.
//
// Wraps the recognition service behind the `RecognitionService` trait, downloads
// results through `HttpFetch`, and drives each job from submission to a saved
// result file with `JobOrchestrator`.

pub mod fetch;
pub mod orchestrator;
pub mod service;

pub use fetch::{BROWSER_HEADERS, HttpFetch, ReqwestFetcher};
pub use orchestrator::{JobOrchestrator, extract_extension};
pub use service::{BaiduTableClient, RecognitionService};
