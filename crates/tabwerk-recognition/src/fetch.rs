// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Result download over plain HTTP GET.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tabwerk_core::error::{Result, TabwerkError};
use tracing::{debug, instrument};

/// Headers sent with every result download. The file host serves the
/// recognized workbook to browser-like clients.
pub const BROWSER_HEADERS: [(&str, &str); 3] = [
    (
        "User-Agent",
        "Mozilla/5.0 (Linux; Android 11; Find X6 Build/RKQ1.201217.002; wv) \
         AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/96.0.4664.45 \
         Mobile Safari/537.36",
    ),
    ("Accept-Language", "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
    ("Accept-Encoding", "gzip, deflate, br"),
];

/// Downloads a URL into memory.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>>;
}

/// [`HttpFetch`] backed by reqwest. Compressed bodies are decoded transparently.
#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TabwerkError::Http(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    #[instrument(skip(self, headers))]
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TabwerkError::Download(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TabwerkError::Download(format!("{url}: HTTP {status}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TabwerkError::Download(format!("{url}: {e}")))?;
        debug!(bytes = body.len(), "Download complete");
        Ok(body.to_vec())
    }
}
