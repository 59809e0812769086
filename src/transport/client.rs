//! 调用对端服务的 HTTP 客户端与响应解析

use crate::models::BasicAuth;
use crate::transport::destination::Endpoint;
use crate::transport::envelope::{self, Envelope};
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const EXCERPT_LEN: usize = 500;
const PHP_ERROR_MARKERS: &[&str] = &[
    "Fatal error",
    "Parse error",
    "Warning:",
    "Notice:",
    "Deprecated:",
];
const LIFTED_LISTS: &[&str] = &["errors", "warnings", "infos", "debugs"];

/// 一次调用的选项
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// 失败时是否重试；令牌相关调用关闭重试
    pub retry: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self { retry: true }
    }
}

impl CallOptions {
    pub fn no_retry() -> Self {
        Self { retry: false }
    }
}

/// 统一的调用结果
#[derive(Debug, Clone, Default)]
pub struct RemoteResult {
    pub success: bool,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// 去掉 errors 等列表后的载荷
    pub payload: Value,
    pub attachments: Vec<envelope::Attachment>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
    pub debugs: Vec<String>,
}

impl RemoteResult {
    /// 网络层失败
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    /// 解析对端响应；access_key 用于解密信封
    pub fn from_response(
        status_code: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        access_key: Option<&str>,
    ) -> Self {
        let mut result = Self {
            status_code,
            headers,
            ..Default::default()
        };
        let content = body.strip_prefix(UTF8_BOM).unwrap_or(&body).to_vec();
        result.body = content;
        result.parse(access_key);
        result.success = result.errors.is_empty();
        result
    }

    fn parse(&mut self, access_key: Option<&str>) {
        if self.status_code == 401 {
            let scheme = self.header("www-authenticate").unwrap_or_default();
            if scheme.contains("Basic realm") {
                self.errors.push(
                    "Remote host requires basic authentication. Add username and password to the migration."
                        .to_string(),
                );
            } else {
                self.errors.push(format!(
                    "Remote host denied access (HTTP 401). Check the access key and the authentication scheme{}.",
                    if scheme.is_empty() { String::new() } else { format!(" ({})", scheme) }
                ));
            }
            return;
        }

        if (300..400).contains(&self.status_code) {
            let location = self.header("location").unwrap_or_default();
            self.errors.push(format!(
                "Remote host redirected the request to \"{}\" (HTTP {}). Check that the site URL is correct.",
                location, self.status_code
            ));
            return;
        }

        let (junk, document) = match envelope::find_magic(&self.body) {
            Some(pos) => (&self.body[..pos], Some(Document::Envelope(pos))),
            None => match self.body.iter().position(|b| *b == b'{') {
                Some(pos) => (&self.body[..pos], Some(Document::Json(pos))),
                None => (&self.body[..], None),
            },
        };

        if let Some(marker) = php_error_marker(junk) {
            self.errors.push(format!(
                "Remote host returned PHP {} in the response, which means the remote site is not working correctly: {}",
                marker.trim_end_matches(':'),
                excerpt(junk)
            ));
            return;
        }

        let parsed = match document {
            Some(Document::Envelope(pos)) => Envelope::decode(&self.body[pos..], access_key)
                .map(|env| (env.payload, env.attachments)),
            Some(Document::Json(pos)) => serde_json::from_slice::<Value>(&self.body[pos..])
                .map(|payload| (payload, Vec::new()))
                .map_err(AppError::from),
            None => Err(AppError::Transport("empty or non-structured body".to_string())),
        };

        match parsed {
            Ok((payload, attachments)) => {
                self.payload = payload;
                self.attachments = attachments;
                self.lift_lists();
            }
            Err(e) => {
                if let Some(marker) = php_error_marker(&self.body) {
                    self.errors.push(format!(
                        "Remote host returned PHP {} in the response, which means the remote site is not working correctly: {}",
                        marker.trim_end_matches(':'),
                        excerpt(&self.body)
                    ));
                } else {
                    self.errors.push(format!(
                        "Could not parse response from remote host (HTTP {}): {} - Response: {}",
                        self.status_code,
                        e,
                        excerpt(&self.body)
                    ));
                }
                return;
            }
        }

        if self.status_code != 200 && self.errors.is_empty() {
            let detail = self
                .payload
                .get("error")
                .and_then(Value::as_str)
                .map(|e| format!(": {}", e))
                .unwrap_or_default();
            self.errors.push(format!(
                "Remote host responded with HTTP status {}{}",
                self.status_code, detail
            ));
        }
    }

    fn lift_lists(&mut self) {
        let Some(object) = self.payload.as_object_mut() else {
            return;
        };
        for key in LIFTED_LISTS {
            let Some(Value::Array(items)) = object.remove(*key) else {
                continue;
            };
            let messages = items.into_iter().map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            });
            match *key {
                "errors" => self.errors.extend(messages),
                "warnings" => self.warnings.extend(messages),
                "infos" => self.infos.extend(messages),
                _ => self.debugs.extend(messages),
            }
        }
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_lowercase()).cloned()
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn attachment(&self, name: &str) -> Option<&envelope::Attachment> {
        self.attachments.iter().find(|a| a.name == name)
    }
}

enum Document {
    Envelope(usize),
    Json(usize),
}

fn php_error_marker(data: &[u8]) -> Option<&'static str> {
    if data.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(data);
    PHP_ERROR_MARKERS.iter().copied().find(|m| text.contains(m))
}

fn excerpt(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.chars().take(EXCERPT_LEN).collect::<String>().trim().to_string()
}

/// 对端服务调用
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn call(
        &self,
        endpoint: &Endpoint,
        action: &str,
        request: &Envelope,
        options: CallOptions,
    ) -> RemoteResult;
}

/// 基于 reqwest 的实现
pub struct HttpTransport {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration, retries: u32) -> Result<Self> {
        let build = |accept_invalid_certs: bool| {
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid_certs)
                .user_agent(concat!("wp_synchro/", env!("CARGO_PKG_VERSION")))
                .build()
        };

        Ok(Self {
            client: build(false)?,
            insecure_client: build(true)?,
            retries: retries.max(1),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// 两次重试之间的基础等待时间，第 n 次失败后等待 n 倍
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn send_once(
        &self,
        endpoint: &Endpoint,
        action: &str,
        body: Vec<u8>,
    ) -> std::result::Result<RemoteResult, reqwest::Error> {
        let client = if endpoint.verify_ssl {
            &self.client
        } else {
            &self.insecure_client
        };

        let mut request = client
            .post(endpoint.service_url(action))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(BasicAuth { username, password }) = &endpoint.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RemoteResult::from_response(
            status,
            headers,
            body,
            Some(&endpoint.access_key),
        ))
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        action: &str,
        request: &Envelope,
        options: CallOptions,
    ) -> RemoteResult {
        let body = match request.encode(Some(&endpoint.access_key), true) {
            Ok(body) => body,
            Err(e) => return RemoteResult::failed(format!("Could not encode request: {}", e)),
        };

        let attempts = if options.retry { self.retries } else { 1 };
        let mut last = RemoteResult::default();

        for attempt in 1..=attempts {
            tracing::debug!(
                "Calling {} action {} (attempt {}/{})",
                endpoint.base_url,
                action,
                attempt,
                attempts
            );

            last = match self.send_once(endpoint, action, body.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Request to {} failed: {}", endpoint.base_url, e);
                    RemoteResult::failed(format!(
                        "Could not connect to {}: {}",
                        endpoint.base_url, e
                    ))
                }
            };

            let retryable = last.status_code == 0 || last.status_code >= 500;
            if last.success || !retryable {
                break;
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        if !last.success {
            tracing::error!(
                "Action {} on {} failed: {}",
                action,
                endpoint.base_url,
                last.errors.join("; ")
            );
        }
        last
    }
}
