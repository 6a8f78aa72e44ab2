// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Two-stage pipeline — preprocess every discovered image under one worker
// limit, then recognize the preprocessed JPEGs under another, reporting
// per-directory counts for both stages.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tabwerk_core::config::TabwerkConfig;
use tabwerk_core::error::{Result, TabwerkError};
use tabwerk_core::types::{
    BatchResult, DirectoryReport, ImageGroups, ImageTask, TaskStatus, display_name,
};
use tabwerk_document::ImagePreprocessor;
use tabwerk_recognition::JobOrchestrator;
use tracing::{error, info, instrument};

use crate::batch::{BatchFailure, BoundedBatchRunner};
use crate::discovery::{discover, discover_preprocessed};
use crate::error_log::ErrorLog;

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Preprocess, then recognize the results.
    Full,
    PreprocessOnly,
    /// Recognize JPEGs an earlier run already preprocessed.
    RecognizeOnly,
}

impl RunMode {
    fn preprocesses(self) -> bool {
        matches!(self, RunMode::Full | RunMode::PreprocessOnly)
    }

    fn recognizes(self) -> bool {
        matches!(self, RunMode::Full | RunMode::RecognizeOnly)
    }
}

/// Summary of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub directories: Vec<DirectoryReport>,
    pub elapsed: Duration,
    pub error_log: PathBuf,
}

impl RunReport {
    /// Preprocessing and recognition totals across all directories.
    pub fn totals(&self) -> (BatchResult, BatchResult) {
        let mut preprocessing = BatchResult::default();
        let mut recognition = BatchResult::default();
        for report in &self.directories {
            if let Some(result) = report.preprocessing {
                preprocessing.merge(result);
            }
            if let Some(result) = report.recognition {
                recognition.merge(result);
            }
        }
        (preprocessing, recognition)
    }
}

/// Per-directory results of one stage plus the files it produced.
#[derive(Debug, Default)]
pub struct StageReport {
    pub results: BTreeMap<PathBuf, BatchResult>,
    pub produced: Vec<PathBuf>,
}

/// Drives discovery, both batch stages, and failure logging for one root.
pub struct Pipeline {
    config: TabwerkConfig,
    preprocessor: ImagePreprocessor,
    orchestrator: Option<Arc<JobOrchestrator>>,
}

impl Pipeline {
    /// A pipeline that can only preprocess until an orchestrator is attached.
    pub fn new(config: TabwerkConfig) -> Self {
        let preprocessor = ImagePreprocessor::from_config(&config);
        Self {
            config,
            preprocessor,
            orchestrator: None,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: JobOrchestrator) -> Self {
        self.orchestrator = Some(Arc::new(orchestrator));
        self
    }

    /// Run the stages `mode` selects on `root` (a directory or one image).
    ///
    /// Only configuration-level problems abort the run; per-image failures
    /// are counted and written to the error log.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn run(&self, root: &Path, mode: RunMode) -> Result<RunReport> {
        let started = Instant::now();
        if mode.recognizes() && self.orchestrator.is_none() {
            return Err(TabwerkError::Config(
                "recognition requested without service credentials".into(),
            ));
        }

        let root_is_file = root.is_file();
        let log_dir = if root_is_file {
            root.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            root.to_path_buf()
        };
        // Discovery first so a missing root is reported before anything is created.
        let sources = if mode.preprocesses() {
            Some(discover(root)?)
        } else {
            None
        };
        let log = ErrorLog::open(log_dir.join(&self.config.error_log_name))?;

        let mut reports: BTreeMap<PathBuf, DirectoryReport> = BTreeMap::new();
        let mut produced = Vec::new();

        if let Some(groups) = sources {
            let stage = self.preprocess_stage(&groups, &log).await;
            for (directory, result) in stage.results {
                entry(&mut reports, &directory).preprocessing = Some(result);
            }
            produced = stage.produced;
        }

        if mode.recognizes() {
            let groups = if mode == RunMode::Full && root_is_file {
                // The single source was renamed away; recognize what it became.
                group_by_parent(produced)
            } else {
                discover_preprocessed(root)?
            };
            let results = self.recognition_stage(&groups, &log).await?;
            for (directory, result) in results {
                entry(&mut reports, &directory).recognition = Some(result);
            }
        }

        log.flush()?;
        let report = RunReport {
            directories: reports.into_values().collect(),
            elapsed: started.elapsed(),
            error_log: log.path().to_path_buf(),
        };
        let (pre, rec) = report.totals();
        info!(
            preprocessed = pre.succeeded,
            preprocess_failed = pre.failed,
            recognized = rec.succeeded,
            recognize_failed = rec.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run complete"
        );
        Ok(report)
    }

    /// Preprocess each directory's images with the preprocessing worker limit.
    pub async fn preprocess_stage(&self, groups: &ImageGroups, log: &ErrorLog) -> StageReport {
        let runner = BoundedBatchRunner::new(self.config.workers.preprocess);
        let mut report = StageReport::default();

        for (directory, paths) in groups {
            let mut tasks: Vec<ImageTask> = paths
                .iter()
                .map(|p| ImageTask::new(p.clone(), directory.clone()))
                .collect();
            for task in &mut tasks {
                task.status = TaskStatus::Preprocessing;
            }
            info!(
                directory = %directory.display(),
                images = tasks.len(),
                workers = runner.worker_limit(),
                "Preprocessing directory"
            );

            let preprocessor = self.preprocessor;
            let outcome = runner
                .run_blocking(tasks.clone(), move |task: ImageTask| {
                    preprocessor.process(&task.path)
                })
                .await;

            for (index, done) in &outcome.successes {
                tasks[*index].status = TaskStatus::Preprocessed;
                report.produced.push(done.output.clone());
            }
            for failure in &outcome.failures {
                let task = &mut tasks[failure.index()];
                task.status = TaskStatus::Failed;
                log_failure(log, "preprocess", &task.file_name(), failure);
            }

            let result = outcome.summary();
            info!(
                directory = %display_name(directory),
                attempted = result.attempted,
                succeeded = result.succeeded,
                failed = result.failed,
                "Preprocessing finished"
            );
            report.results.insert(directory.clone(), result);
        }
        report
    }

    /// Recognize each directory's preprocessed images with the recognition
    /// worker limit.
    pub async fn recognition_stage(
        &self,
        groups: &ImageGroups,
        log: &ErrorLog,
    ) -> Result<BTreeMap<PathBuf, BatchResult>> {
        let Some(orchestrator) = self.orchestrator.clone() else {
            return Err(TabwerkError::Config(
                "recognition requested without service credentials".into(),
            ));
        };
        let runner = BoundedBatchRunner::new(self.config.workers.recognition);
        let mut results = BTreeMap::new();

        for (directory, paths) in groups {
            info!(
                directory = %directory.display(),
                images = paths.len(),
                workers = runner.worker_limit(),
                "Recognizing directory"
            );

            let orchestrator = Arc::clone(&orchestrator);
            let dir = directory.clone();
            let outcome = runner
                .run(paths.clone(), move |path: PathBuf| {
                    let orchestrator = Arc::clone(&orchestrator);
                    let dir = dir.clone();
                    async move { orchestrator.process(&path, &dir).await }
                })
                .await;

            for failure in &outcome.failures {
                let name = display_name(&paths[failure.index()]);
                log_failure(log, "recognize", &name, failure);
            }

            let result = outcome.summary();
            info!(
                directory = %display_name(directory),
                attempted = result.attempted,
                succeeded = result.succeeded,
                failed = result.failed,
                "Recognition finished"
            );
            results.insert(directory.clone(), result);
        }
        Ok(results)
    }
}

fn entry<'a>(
    reports: &'a mut BTreeMap<PathBuf, DirectoryReport>,
    directory: &Path,
) -> &'a mut DirectoryReport {
    reports
        .entry(directory.to_path_buf())
        .or_insert_with(|| DirectoryReport {
            directory: directory.to_path_buf(),
            ..Default::default()
        })
}

fn group_by_parent(paths: Vec<PathBuf>) -> ImageGroups {
    let mut groups = ImageGroups::new();
    for path in paths {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        groups.entry(parent).or_default().push(path);
    }
    groups
}

#[track_caller]
fn log_failure(log: &ErrorLog, stage: &str, name: &str, failure: &BatchFailure<TabwerkError>) {
    error!(stage, file = name, error = %failure, "Item failed");
    log.record(stage, format!("{name}: {failure}"));
}
