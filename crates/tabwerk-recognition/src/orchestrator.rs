// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job orchestrator — drives one preprocessed image through submit, poll,
// download and save.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tabwerk_core::config::{PollingConfig, RecognitionOptions, TabwerkConfig};
use tabwerk_core::error::{Result, TabwerkError};
use tabwerk_core::types::{JobState, RecognitionJob};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::fetch::{BROWSER_HEADERS, HttpFetch};
use crate::service::RecognitionService;

static EXTENSION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\.(\w+)(?:\?|$)").ok());

/// Extension of the file a result URL points at: the first `.<word>` that is
/// followed by the query string or the end of the URL.
pub fn extract_extension(url: &str) -> Option<String> {
    EXTENSION_RE
        .as_ref()?
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Runs recognition jobs against a [`RecognitionService`].
pub struct JobOrchestrator {
    service: Arc<dyn RecognitionService>,
    fetcher: Arc<dyn HttpFetch>,
    options: RecognitionOptions,
    polling: PollingConfig,
    output_dir_name: String,
}

impl JobOrchestrator {
    pub fn new(
        service: Arc<dyn RecognitionService>,
        fetcher: Arc<dyn HttpFetch>,
        config: &TabwerkConfig,
    ) -> Self {
        Self {
            service,
            fetcher,
            options: config.recognition,
            polling: config.polling,
            output_dir_name: config.output_dir_name.clone(),
        }
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_output_dir_name(mut self, name: impl Into<String>) -> Self {
        self.output_dir_name = name.into();
        self
    }

    /// Recognize the image at `path` and save the result under
    /// `<parent>/<output_dir_name>/`. Returns the saved file.
    #[instrument(skip(self, directory), fields(path = %path.display()))]
    pub async fn process(&self, path: &Path, directory: &Path) -> Result<PathBuf> {
        let mut job = RecognitionJob::new(path, directory);
        match self.run(&mut job).await {
            Ok(saved) => Ok(saved),
            Err(err) => {
                job.mark_failed();
                warn!(job = %job.id, polls = job.polls, error = %err, "Recognition job failed");
                Err(err)
            }
        }
    }

    async fn run(&self, job: &mut RecognitionJob) -> Result<PathBuf> {
        let image = tokio::fs::read(&job.source).await?;

        let request_id = self.service.submit(&image, &self.options).await?;
        job.mark_submitted(request_id);

        let url = self.await_result(job).await?;

        let extension = extract_extension(&url);
        if extension.is_none() {
            warn!(%url, "Result URL has no file extension; saving without one");
        }

        let data = self.fetcher.get(&url, &BROWSER_HEADERS).await?;
        let saved = self.save(job, extension.as_deref(), &data).await?;
        info!(job = %job.id, saved = %saved.display(), polls = job.polls, "Result saved");
        Ok(saved)
    }

    /// Poll until the job is ready, sleeping `interval` between attempts.
    async fn await_result(&self, job: &mut RecognitionJob) -> Result<String> {
        let Some(request_id) = job.request_id.clone() else {
            return Err(TabwerkError::Poll("job was never submitted".into()));
        };
        let interval = self.polling.interval();
        let timeout = self.polling.timeout();
        let started = Instant::now();

        loop {
            let status = self.service.poll_status(&request_id, &self.options).await?;
            job.record_poll(&status);

            if job.state == JobState::Ready {
                return job.result_url.clone().ok_or_else(|| {
                    TabwerkError::Poll(format!("request {request_id} finished without a result URL"))
                });
            }
            debug!(code = status.code, percent = ?status.percent, polls = job.polls, "Not ready yet");

            if let Some(limit) = timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(TabwerkError::PollTimeout {
                        request_id: request_id.to_string(),
                        waited_secs: waited.as_secs(),
                    });
                }
            }
            sleep(interval.max(Duration::from_millis(1))).await;
        }
    }

    async fn save(
        &self,
        job: &RecognitionJob,
        extension: Option<&str>,
        data: &[u8],
    ) -> Result<PathBuf> {
        let parent = job.source.parent().unwrap_or(&job.directory);
        let out_dir = parent.join(&self.output_dir_name);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| TabwerkError::Save {
                path: out_dir.clone(),
                message: e.to_string(),
            })?;

        let stem = job
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = match extension {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        };
        let target = out_dir.join(file_name);

        tokio::fs::write(&target, data)
            .await
            .map_err(|e| TabwerkError::Save {
                path: target.clone(),
                message: e.to_string(),
            })?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tabwerk_core::types::{PollStatus, RequestId};
    use tempfile::TempDir;

    /// Turns ready on poll number `ready_on`; never ready when `None`.
    struct ScriptedService {
        ready_on: Option<u32>,
        url: String,
        polls: AtomicU32,
        poll_times: Mutex<Vec<Instant>>,
        fail_poll: bool,
    }

    impl ScriptedService {
        fn ready_on(n: u32, url: &str) -> Self {
            Self {
                ready_on: Some(n),
                url: url.into(),
                polls: AtomicU32::new(0),
                poll_times: Mutex::new(Vec::new()),
                fail_poll: false,
            }
        }
    }

    #[async_trait]
    impl RecognitionService for ScriptedService {
        async fn submit(&self, image: &[u8], _: &RecognitionOptions) -> Result<RequestId> {
            assert!(!image.is_empty());
            Ok(RequestId("req-1".into()))
        }

        async fn poll_status(&self, _: &RequestId, _: &RecognitionOptions) -> Result<PollStatus> {
            if self.fail_poll {
                return Err(TabwerkError::Poll("282000:internal error".into()));
            }
            self.poll_times.lock().unwrap().push(Instant::now());
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let ready = self.ready_on.is_some_and(|r| n >= r);
            Ok(PollStatus {
                code: if ready { 3 } else { 1 },
                result_url: ready.then(|| self.url.clone()),
                percent: Some(if ready { 100 } else { 50 }),
            })
        }
    }

    #[derive(Default)]
    struct RecordingFetcher {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpFetch for RecordingFetcher {
        async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>> {
            assert!(headers.iter().any(|(name, _)| *name == "User-Agent"));
            self.urls.lock().unwrap().push(url.to_string());
            Ok(b"recognized table".to_vec())
        }
    }

    fn source_image(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"\xFF\xD8 fake jpeg").unwrap();
        path
    }

    fn orchestrator(service: Arc<ScriptedService>, fetcher: Arc<RecordingFetcher>) -> JobOrchestrator {
        JobOrchestrator::new(service, fetcher, &TabwerkConfig::default())
    }

    #[test]
    fn extension_is_taken_before_query_or_end() {
        assert_eq!(
            extract_extension("https://bj.bcebos.com/ocr/abc.xls?authorization=bce-auth-v1%2Fx").as_deref(),
            Some("xls")
        );
        assert_eq!(
            extract_extension("https://host.example/out/result.json").as_deref(),
            Some("json")
        );
        assert_eq!(extract_extension("https://host.example/download/result"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_interval_until_ready() {
        let dir = TempDir::new().unwrap();
        let source = source_image(&dir, "page.jpg");
        let service = Arc::new(ScriptedService::ready_on(
            4,
            "https://files.example/page.xls?sig=1",
        ));
        let fetcher = Arc::new(RecordingFetcher::default());

        let started = Instant::now();
        let saved = orchestrator(service.clone(), fetcher.clone())
            .process(&source, dir.path())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(service.polls.load(Ordering::SeqCst), 4);
        assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
        let times = service.poll_times.lock().unwrap();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }

        assert_eq!(saved, dir.path().join("表格输出成果").join("page.xls"));
        assert_eq!(std::fs::read(&saved).unwrap(), b"recognized table");
        assert_eq!(
            fetcher.urls.lock().unwrap().as_slice(),
            ["https://files.example/page.xls?sig=1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_poll_does_not_sleep() {
        let dir = TempDir::new().unwrap();
        let source = source_image(&dir, "quick.jpg");
        let service = Arc::new(ScriptedService::ready_on(1, "https://files.example/q.xls"));

        let started = Instant::now();
        orchestrator(service.clone(), Arc::new(RecordingFetcher::default()))
            .process(&source, dir.path())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn existing_result_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let source = source_image(&dir, "sheet.jpg");
        let out_dir = dir.path().join("表格输出成果");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("sheet.xls"), b"stale").unwrap();

        let service = Arc::new(ScriptedService::ready_on(1, "https://files.example/sheet.xls"));
        let saved = orchestrator(service, Arc::new(RecordingFetcher::default()))
            .process(&source, dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(saved).unwrap(), b"recognized table");
    }

    #[tokio::test]
    async fn url_without_extension_saves_bare_stem() {
        let dir = TempDir::new().unwrap();
        let source = source_image(&dir, "ledger.jpg");
        let service = Arc::new(ScriptedService::ready_on(1, "https://files.example/download/result"));

        let saved = orchestrator(service, Arc::new(RecordingFetcher::default()))
            .with_output_dir_name("out")
            .process(&source, dir.path())
            .await
            .unwrap();

        assert_eq!(saved, dir.path().join("out").join("ledger"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timeout_bounds_the_wait() {
        let dir = TempDir::new().unwrap();
        let source = source_image(&dir, "slow.jpg");
        let service = Arc::new(ScriptedService {
            ready_on: None,
            url: String::new(),
            polls: AtomicU32::new(0),
            poll_times: Mutex::new(Vec::new()),
            fail_poll: false,
        });
        let polling = PollingConfig {
            interval_secs: 2,
            timeout_secs: Some(5),
        };

        let err = orchestrator(service.clone(), Arc::new(RecordingFetcher::default()))
            .with_polling(polling)
            .process(&source, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, TabwerkError::PollTimeout { waited_secs: 6, .. }), "{err:?}");
        // Polls at 0, 2, 4 and 6 seconds.
        assert_eq!(service.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn poll_error_fails_job_without_writing() {
        let dir = TempDir::new().unwrap();
        let source = source_image(&dir, "bad.jpg");
        let service = Arc::new(ScriptedService {
            fail_poll: true,
            ..ScriptedService::ready_on(1, "https://files.example/bad.xls")
        });
        let fetcher = Arc::new(RecordingFetcher::default());

        let err = orchestrator(service, fetcher.clone())
            .process(&source, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, TabwerkError::Poll(_)));
        assert!(fetcher.urls.lock().unwrap().is_empty());
        assert!(!dir.path().join("表格输出成果").exists());
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(ScriptedService::ready_on(1, "https://files.example/x.xls"));
        let err = orchestrator(service, Arc::new(RecordingFetcher::default()))
            .process(&dir.path().join("absent.jpg"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TabwerkError::Io(_)));
    }
}
