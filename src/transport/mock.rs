//! 测试用传输：把请求直接交给已注册站点的路由

use crate::api::create_router;
use crate::models::BasicAuth;
use crate::services::AppState;
use crate::transport::client::{CallOptions, RemoteResult, RemoteTransport};
use crate::transport::destination::Endpoint;
use crate::transport::envelope::Envelope;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::sync::Mutex;
use tower::ServiceExt;

#[derive(Default)]
pub struct LoopbackTransport {
    sites: Mutex<HashMap<String, Router>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, base_url: &str, state: AppState) {
        self.sites
            .lock()
            .unwrap()
            .insert(base_url.trim_end_matches('/').to_string(), create_router(state));
    }
}

#[async_trait]
impl RemoteTransport for LoopbackTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        action: &str,
        request: &Envelope,
        _options: CallOptions,
    ) -> RemoteResult {
        let router = match self.sites.lock().unwrap().get(&endpoint.base_url) {
            Some(router) => router.clone(),
            None => return RemoteResult::failed(format!("Could not connect to {}", endpoint.base_url)),
        };

        let body = request.encode(Some(&endpoint.access_key), true).unwrap();
        let url = endpoint.service_url(action);
        let path = &url[endpoint.base_url.len()..];

        let mut builder = Request::post(path).header(header::CONTENT_TYPE, "application/octet-stream");
        if let Some(BasicAuth { username, password }) = &endpoint.basic_auth {
            let credentials = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
            builder = builder.header(header::AUTHORIZATION, format!("Basic {}", credentials));
        }

        let response = router
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
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
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        RemoteResult::from_response(status, headers, body, Some(&endpoint.access_key))
    }
}
