//! Kubernetes API server backend.
//!
//! Talks plain REST to `apps/v1` and `v1` with a bearer token. Watches use
//! the streaming `?watch=true` form scoped to one object by field selector,
//! with newline-delimited JSON events pumped into a [`Subscription`].

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::decode::{
    generation_from_value, list_items, pod_from_value, status_message, watch_event_from_line,
    workload_from_value,
};
use crate::error::{PlatformError, PlatformResult};
use crate::platform::{BoxFuture, Platform};
use crate::types::{Pod, PatchOp, ReplicaGeneration, Workload, WorkloadRef};
use crate::watch::{SUBSCRIPTION_BUFFER, Subscription};

const JSON_PATCH: &str = "application/json-patch+json";
const APPS_V1: &str = "/apis/apps/v1";

/// Connection parameters for one API server.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub api_server: String,
    pub token: Option<String>,
    pub ca_cert_pem: Option<String>,
    pub insecure_skip_tls_verify: bool,
    /// Applied to every call except watches.
    pub request_timeout: Duration,
}

impl KubeConfig {
    pub fn new(api_server: impl Into<String>) -> Self {
        Self {
            api_server: api_server.into(),
            token: None,
            ca_cert_pem: None,
            insecure_skip_tls_verify: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct KubePlatform {
    client: Client,
    base: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl KubePlatform {
    pub fn new(config: KubeConfig) -> PlatformResult<Self> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| PlatformError::Config(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure_skip_tls_verify {
            warn!(api_server = %config.api_server, "TLS verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| PlatformError::Config(e.to_string()))?;

        let base = config.api_server.trim_end_matches('/').to_string();
        Url::parse(&base)
            .map_err(|e| PlatformError::Config(format!("invalid api server {base:?}: {e}")))?;

        Ok(Self {
            client,
            base,
            token: config.token,
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> PlatformResult<Url> {
        Url::parse(&format!("{}{}", self.base, path))
            .map_err(|e| PlatformError::Config(format!("invalid url for {path}: {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_json(&self, request: RequestBuilder, what: &str) -> PlatformResult<Value> {
        let response = self
            .authorized(request)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status.as_u16(), what, &body))
    }

    async fn get(&self, target: &WorkloadRef) -> PlatformResult<Workload> {
        let url = self.url(&workload_path(target))?;
        let body = self
            .send_json(self.client.get(url), &target.to_string())
            .await?;
        workload_from_value(target.kind, &body)
    }

    async fn patch(&self, target: &WorkloadRef, ops: &[PatchOp]) -> PlatformResult<Workload> {
        let url = self.url(&workload_path(target))?;
        let payload =
            serde_json::to_vec(ops).map_err(|e| PlatformError::Decode(e.to_string()))?;
        debug!(workload = %target, ops = ops.len(), "patching workload");
        let request = self
            .client
            .patch(url)
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(payload);
        let body = self.send_json(request, &target.to_string()).await?;
        workload_from_value(target.kind, &body)
    }

    async fn watch(&self, target: &WorkloadRef, since: Option<&str>) -> PlatformResult<Subscription> {
        let url = watch_url(&self.url(&collection_path(target))?, target, since);
        debug!(workload = %target, since = ?since, "opening watch");
        let response = self.authorized(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), &target.to_string(), &body));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let kind = target.kind;
        let label = target.to_string();
        let pump = tokio::spawn(async move {
            let mut response = response;
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                let chunk = match response.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = line.trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    match watch_event_from_line(kind, line) {
                        Ok(None) => {}
                        Ok(Some(event)) => {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            debug!(workload = %label, "watch stream ended");
        });
        Ok(Subscription::new(rx, pump))
    }

    async fn generations(&self, namespace: &str) -> PlatformResult<Vec<ReplicaGeneration>> {
        let url = self.url(&format!("{APPS_V1}/namespaces/{namespace}/replicasets"))?;
        let body = self
            .send_json(self.client.get(url), &format!("replicasets in {namespace}"))
            .await?;
        list_items(&body, generation_from_value)
    }

    async fn pods(&self, namespace: &str) -> PlatformResult<Vec<Pod>> {
        let url = self.url(&format!("/api/v1/namespaces/{namespace}/pods"))?;
        let body = self
            .send_json(self.client.get(url), &format!("pods in {namespace}"))
            .await?;
        list_items(&body, pod_from_value)
    }
}

impl Platform for KubePlatform {
    fn get_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
    ) -> BoxFuture<'a, PlatformResult<Workload>> {
        Box::pin(self.get(target))
    }

    fn patch_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
        ops: &'a [PatchOp],
    ) -> BoxFuture<'a, PlatformResult<Workload>> {
        Box::pin(self.patch(target, ops))
    }

    fn watch_workload<'a>(
        &'a self,
        target: &'a WorkloadRef,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, PlatformResult<Subscription>> {
        Box::pin(self.watch(target, since))
    }

    fn list_replica_generations<'a>(
        &'a self,
        namespace: &'a str,
    ) -> BoxFuture<'a, PlatformResult<Vec<ReplicaGeneration>>> {
        Box::pin(self.generations(namespace))
    }

    fn list_pods<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, PlatformResult<Vec<Pod>>> {
        Box::pin(self.pods(namespace))
    }
}

fn collection_path(target: &WorkloadRef) -> String {
    format!(
        "{APPS_V1}/namespaces/{}/{}",
        target.namespace,
        target.kind.resource()
    )
}

fn workload_path(target: &WorkloadRef) -> String {
    format!("{}/{}", collection_path(target), target.name)
}

fn watch_url(collection: &Url, target: &WorkloadRef, since: Option<&str>) -> Url {
    let mut url = collection.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("watch", "true");
        query.append_pair("fieldSelector", &format!("metadata.name={}", target.name));
        if let Some(rv) = since.filter(|rv| !rv.is_empty()) {
            query.append_pair("resourceVersion", rv);
        }
    }
    url
}

fn error_for_status(status: u16, what: &str, body: &str) -> PlatformError {
    let message = serde_json::from_str::<Value>(body)
        .map(|v| status_message(&v))
        .unwrap_or_else(|_| body.to_string());
    match status {
        404 => PlatformError::NotFound(what.to_string()),
        422 => PlatformError::Rejected(message),
        _ => PlatformError::Api { status, message },
    }
}
