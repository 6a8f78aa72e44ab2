// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition service — the asynchronous table recognition API and its
// Baidu form_ocr implementation.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tabwerk_core::config::{RecognitionOptions, ServiceConfig};
use tabwerk_core::error::{Result, TabwerkError};
use tabwerk_core::types::{PollStatus, RequestId};
use tracing::{debug, info, instrument};

const TOKEN_PATH: &str = "/oauth/2.0/token";
const SUBMIT_PATH: &str = "/rest/2.0/solution/v1/form_ocr/request";
const RESULT_PATH: &str = "/rest/2.0/solution/v1/form_ocr/get_request_result";

/// An asynchronous table recognition backend.
///
/// A submission returns a request id immediately; the result is fetched by
/// polling until the service reports the job finished.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Upload one encoded image. Fails with `Submission` when the service
    /// does not hand back a request id.
    async fn submit(&self, image: &[u8], options: &RecognitionOptions) -> Result<RequestId>;

    /// Ask for the state of an earlier submission.
    async fn poll_status(
        &self,
        request_id: &RequestId,
        options: &RecognitionOptions,
    ) -> Result<PollStatus>;
}

// -- Wire types ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    result: Vec<SubmitResult>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResult {
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    result: Option<PollResult>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResult {
    ret_code: i64,
    #[serde(default)]
    result_data: Option<String>,
    #[serde(default)]
    percent: Option<u8>,
}

fn describe_api_error(code: Option<i64>, message: Option<String>) -> String {
    format!(
        "{}:{}",
        code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
        message.unwrap_or_default()
    )
}

// -- Baidu client -------------------------------------------------------------

/// Client for Baidu's asynchronous table recognition (`form_ocr`) endpoints.
#[derive(Clone, Debug)]
pub struct BaiduTableClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl BaiduTableClient {
    /// Build a client around an already-issued access token.
    pub fn with_token(access_token: impl Into<String>, config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TabwerkError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Exchange API credentials for an access token and build a client.
    ///
    /// Rejected credentials are a configuration error: nothing can be
    /// submitted without a token.
    #[instrument(skip_all, fields(base_url = %config.base_url))]
    pub async fn connect(api_key: &str, secret_key: &str, config: &ServiceConfig) -> Result<Self> {
        let mut this = Self::with_token(String::new(), config)?;

        let response = this
            .client
            .post(format!("{}{TOKEN_PATH}", this.base_url))
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", api_key),
                ("client_secret", secret_key),
            ])
            .send()
            .await
            .map_err(|e| TabwerkError::Http(format!("Token request failed: {e}")))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TabwerkError::Http(format!("Failed to parse token response: {e}")))?;

        match token.access_token {
            Some(access_token) if !access_token.is_empty() => {
                info!("Access token issued");
                this.access_token = access_token;
                Ok(this)
            }
            _ => Err(TabwerkError::Config(format!(
                "credentials rejected by recognition service: {} {}",
                token.error.unwrap_or_default(),
                token.error_description.unwrap_or_default()
            ))),
        }
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> std::result::Result<T, String> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .query(&[("access_token", self.access_token.as_str())])
            .form(form)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status} - {body}"));
        }

        resp.json::<T>()
            .await
            .map_err(|e| format!("Failed to parse response: {e}"))
    }
}

#[async_trait]
impl RecognitionService for BaiduTableClient {
    #[instrument(skip(self, image), fields(image_len = image.len()))]
    async fn submit(&self, image: &[u8], options: &RecognitionOptions) -> Result<RequestId> {
        let encoded = STANDARD.encode(image);
        let form = [
            ("image", encoded.as_str()),
            ("is_sync", "false"),
            ("request_type", options.result_format.as_str()),
            ("language_type", options.language.as_str()),
        ];

        let response: SubmitResponse = self
            .post_form(SUBMIT_PATH, &form)
            .await
            .map_err(TabwerkError::Submission)?;

        let request_id = response
            .result
            .into_iter()
            .next()
            .and_then(|r| r.request_id)
            .filter(|id| !id.is_empty());

        match request_id {
            Some(id) => {
                info!(request_id = %id, "Submission accepted");
                Ok(RequestId(id))
            }
            None => Err(TabwerkError::Submission(describe_api_error(
                response.error_code,
                response.error_msg,
            ))),
        }
    }

    #[instrument(skip(self, options), fields(request_id = %request_id))]
    async fn poll_status(
        &self,
        request_id: &RequestId,
        options: &RecognitionOptions,
    ) -> Result<PollStatus> {
        let form = [
            ("request_id", request_id.0.as_str()),
            ("result_type", options.result_format.as_str()),
        ];

        let response: PollResponse = self
            .post_form(RESULT_PATH, &form)
            .await
            .map_err(TabwerkError::Poll)?;

        let Some(result) = response.result else {
            return Err(TabwerkError::Poll(describe_api_error(
                response.error_code,
                response.error_msg,
            )));
        };

        let status = PollStatus {
            code: result.ret_code,
            result_url: result.result_data.filter(|url| !url.is_empty()),
            percent: result.percent,
        };
        debug!(code = status.code, percent = ?status.percent, "Poll answered");

        if status.is_ready() && status.result_url.is_none() {
            return Err(TabwerkError::Poll(format!(
                "request {request_id} finished without a result URL"
            )));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path, query_param},
    };

    fn config(server: &MockServer) -> ServiceConfig {
        ServiceConfig {
            base_url: server.uri(),
            request_timeout_secs: 10,
        }
    }

    async fn client(server: &MockServer) -> BaiduTableClient {
        BaiduTableClient::with_token("test-token", &config(server)).unwrap()
    }

    #[tokio::test]
    async fn connect_exchanges_credentials_for_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(query_param("grant_type", "client_credentials"))
            .and(query_param("client_id", "key"))
            .and(query_param("client_secret", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "issued-token",
                "expires_in": 2592000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = BaiduTableClient::connect("key", "secret", &config(&server))
            .await
            .unwrap();
        assert_eq!(client.access_token, "issued-token");
    }

    #[tokio::test]
    async fn rejected_credentials_are_config_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "unknown client id"
            })))
            .mount(&server)
            .await;

        let err = BaiduTableClient::connect("bad", "creds", &config(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, TabwerkError::Config(msg) if msg.contains("invalid_client")));
    }

    #[tokio::test]
    async fn submit_sends_form_and_returns_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .and(query_param("access_token", "test-token"))
            .and(body_string_contains("is_sync=false"))
            .and(body_string_contains("request_type=excel"))
            .and(body_string_contains("language_type=CHN_ENG"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{"request_id": "req-42"}],
                "log_id": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .await
            .submit(b"jpeg bytes", &RecognitionOptions::default())
            .await
            .unwrap();
        assert_eq!(id, RequestId("req-42".into()));
    }

    #[tokio::test]
    async fn submit_without_request_id_is_submission_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error_code": 18,
                "error_msg": "Open api qps request limit reached"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .submit(b"jpeg", &RecognitionOptions::default())
            .await
            .unwrap_err();
        match err {
            TabwerkError::Submission(msg) => assert!(msg.starts_with("18:"), "{msg}"),
            other => panic!("expected submission error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_reports_pending_then_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RESULT_PATH))
            .and(body_string_contains("request_id=req-1"))
            .and(body_string_contains("result_type=excel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {"ret_code": 1, "ret_msg": "已排队", "percent": 0, "result_data": ""}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "ret_code": 3,
                    "ret_msg": "已完成",
                    "percent": 100,
                    "result_data": "https://files.example/req-1.xls?auth=x"
                }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let id = RequestId("req-1".into());
        let options = RecognitionOptions::default();

        let pending = client.poll_status(&id, &options).await.unwrap();
        assert!(!pending.is_ready());
        assert_eq!(pending.result_url, None);

        let ready = client.poll_status(&id, &options).await.unwrap();
        assert!(ready.is_ready());
        assert_eq!(ready.percent, Some(100));
        assert_eq!(
            ready.result_url.as_deref(),
            Some("https://files.example/req-1.xls?auth=x")
        );
    }

    #[tokio::test]
    async fn poll_error_payload_is_poll_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error_code": 282004,
                "error_msg": "invalid request_id"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .poll_status(&RequestId("nope".into()), &RecognitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TabwerkError::Poll(msg) if msg.contains("282004")));
    }

    #[tokio::test]
    async fn ready_without_url_is_poll_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {"ret_code": 3, "result_data": ""}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .poll_status(&RequestId("r".into()), &RecognitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TabwerkError::Poll(_)));
    }

    #[tokio::test]
    async fn server_error_status_surfaces_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBMIT_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .submit(b"jpeg", &RecognitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TabwerkError::Submission(msg) if msg.contains("503")));
    }
}
