// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Yorc HTTP Client
//!
//! reqwest-backed implementation of [`ProvisioningClient`] acting as the
//! anti-corruption layer in front of the Yorc REST control plane.
//!
//! # API Endpoints
//!
//! - `PUT|PATCH /deployments/{id}` - Submit or update a zipped topology
//! - `GET /deployments[/{id}]` - Deployment listing and status
//! - `POST /deployments/{id}/scale/{node}?delta=N` - Scale a node
//! - `DELETE /deployments/{id}` - Undeploy
//! - `POST /deployments/{id}/purge` - Synchronous purge
//! - `POST /deployments/{id}/workflows/{name}` - Run a workflow
//! - `POST /deployments/{id}/custom` - Run a custom command
//! - `GET|DELETE|PUT /deployments/{id}/tasks/{taskId}` - Task status, cancel, resume
//! - `GET|HEAD /events`, `GET|HEAD /logs` - Long-poll streams and their current index
//!
//! Asynchronous operations answer with a `Location` header pointing at the
//! created task; that value becomes the [`TaskHandle`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::domain::bridge_config::OrchestratorEndpoint;
use crate::domain::deployment::{DeploymentId, TaskHandle};
use crate::domain::events::{EventsPage, LogsPage};
use crate::domain::provisioning::{
    CustomCommand, ProvisioningClient, ProvisioningError, RemoteDeployment, RemoteTask,
    UndeployOptions,
};

/// Added to the server-side long-poll wait to get the client read timeout.
const LONG_POLL_MARGIN: Duration = Duration::from_secs(10);

const YORC_INDEX_HEADER: &str = "X-Yorc-Index";

#[derive(Debug, Deserialize)]
struct DeploymentsCollection {
    #[serde(default)]
    deployments: Vec<RemoteDeployment>,
}

/// Yorc REST adapter
#[derive(Clone)]
pub struct YorcClient {
    client: Client,

    /// Control plane base URL without trailing slash
    base_url: String,

    long_poll_wait: Duration,
}

impl YorcClient {
    /// Build a client from the orchestrator endpoint configuration. TLS and
    /// URL problems are configuration errors and are not retried.
    pub fn new(config: &OrchestratorEndpoint) -> Result<Self, ProvisioningError> {
        url::Url::parse(&config.url).map_err(|e| {
            ProvisioningError::Configuration(format!("invalid url '{}': {}", config.url, e))
        })?;

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);

        if let Some(path) = &config.ca_certificate {
            let pem = std::fs::read(path).map_err(|e| {
                ProvisioningError::Configuration(format!(
                    "cannot read CA certificate {:?}: {}",
                    path, e
                ))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ProvisioningError::Configuration(format!(
                    "invalid CA certificate {:?}: {}",
                    path, e
                ))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        if config.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| {
            ProvisioningError::Configuration(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            long_poll_wait: config.long_poll_wait,
        })
    }

    /// Build full URL for API endpoint
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Task URLs from `Location` are usually relative to the base URL.
    fn task_url(&self, task: &TaskHandle) -> String {
        if task.task_url.starts_with("http://") || task.task_url.starts_with("https://") {
            task.task_url.clone()
        } else {
            self.build_url(&task.task_url)
        }
    }

    fn deployment_path(id: &DeploymentId) -> String {
        format!("/deployments/{}", id)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProvisioningError> {
        request.send().await.map_err(transport_error)
    }

    async fn send_long_poll(&self, request: RequestBuilder) -> Result<Response, ProvisioningError> {
        request
            .query(&[("wait", format!("{}s", self.long_poll_wait.as_secs()))])
            .timeout(self.long_poll_wait + LONG_POLL_MARGIN)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(long_poll_error)
    }

    async fn expect_task(
        &self,
        response: Response,
        id: &DeploymentId,
        operation: &str,
    ) -> Result<TaskHandle, ProvisioningError> {
        match response.status() {
            status if status.is_success() => location(&response)
                .map(|url| TaskHandle::new(id.clone(), url))
                .ok_or_else(|| ProvisioningError::MissingLocation(format!("{} {}", operation, id))),
            StatusCode::NOT_FOUND => Err(ProvisioningError::NotFound(Self::deployment_path(id))),
            _ => Err(unexpected(response).await),
        }
    }

    /// `HEAD` on a stream endpoint, returning its `X-Yorc-Index`.
    async fn head_index(&self, path: &str) -> Result<u64, ProvisioningError> {
        let response = self.send(self.client.head(self.build_url(path))).await?;
        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        let header = response.headers().get(YORC_INDEX_HEADER).ok_or_else(|| {
            ProvisioningError::InvalidResponse(format!(
                "HEAD {} without {}",
                path, YORC_INDEX_HEADER
            ))
        })?;
        header
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                ProvisioningError::InvalidResponse(format!(
                    "unparsable {} header",
                    YORC_INDEX_HEADER
                ))
            })
    }

    async fn expect_json<T: for<'de> Deserialize<'de>>(
        response: Response,
    ) -> Result<T, ProvisioningError> {
        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProvisioningError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> ProvisioningError {
    ProvisioningError::Transport(e.to_string())
}

/// Only an idle server holding the request open is a poll timeout. A
/// connect timeout also reports `is_timeout()` and is a transport failure.
fn long_poll_error(e: reqwest::Error) -> ProvisioningError {
    if e.is_connect() || !e.is_timeout() {
        transport_error(e)
    } else {
        ProvisioningError::PollTimeout
    }
}

fn location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn unexpected(response: Response) -> ProvisioningError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| format!("HTTP {}", status));
    ProvisioningError::Http {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl ProvisioningClient for YorcClient {
    async fn submit_topology(
        &self,
        id: &DeploymentId,
        archive: Bytes,
    ) -> Result<TaskHandle, ProvisioningError> {
        debug!(deployment_id = %id, size = archive.len(), "Submitting deployment archive");
        let response = self
            .send(
                self.client
                    .put(self.build_url(&Self::deployment_path(id)))
                    .header(CONTENT_TYPE, "application/zip")
                    .body(archive),
            )
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::ACCEPTED => location(&response)
                .map(|url| TaskHandle::new(id.clone(), url))
                .ok_or_else(|| ProvisioningError::MissingLocation(format!("submit {}", id))),
            _ => Err(unexpected(response).await),
        }
    }

    async fn update_topology(
        &self,
        id: &DeploymentId,
        archive: Bytes,
    ) -> Result<Option<TaskHandle>, ProvisioningError> {
        debug!(deployment_id = %id, size = archive.len(), "Submitting topology update");
        let response = self
            .send(
                self.client
                    .patch(self.build_url(&Self::deployment_path(id)))
                    .header(CONTENT_TYPE, "application/zip")
                    .body(archive),
            )
            .await?;

        match response.status() {
            status if status.is_success() => {
                Ok(location(&response).map(|url| TaskHandle::new(id.clone(), url)))
            }
            StatusCode::NOT_FOUND => Err(ProvisioningError::NotFound(Self::deployment_path(id))),
            _ => Err(unexpected(response).await),
        }
    }

    async fn get_deployment(
        &self,
        id: &DeploymentId,
    ) -> Result<Option<RemoteDeployment>, ProvisioningError> {
        let response = self
            .send(
                self.client
                    .get(self.build_url(&Self::deployment_path(id)))
                    .header(ACCEPT, "application/json"),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_json(response).await.map(Some)
    }

    async fn list_deployments(&self) -> Result<Vec<RemoteDeployment>, ProvisioningError> {
        let response = self
            .send(
                self.client
                    .get(self.build_url("/deployments"))
                    .header(ACCEPT, "application/json"),
            )
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let collection: DeploymentsCollection = Self::expect_json(response).await?;
        Ok(collection.deployments)
    }

    async fn scale(
        &self,
        id: &DeploymentId,
        node: &str,
        delta: i32,
    ) -> Result<TaskHandle, ProvisioningError> {
        let response = self
            .send(
                self.client
                    .post(self.build_url(&format!("{}/scale/{}", Self::deployment_path(id), node)))
                    .query(&[("delta", delta)]),
            )
            .await?;
        self.expect_task(response, id, "scale").await
    }

    async fn undeploy(
        &self,
        id: &DeploymentId,
        options: UndeployOptions,
    ) -> Result<TaskHandle, ProvisioningError> {
        let mut request = self.client.delete(self.build_url(&Self::deployment_path(id)));
        if options.purge {
            request = request.query(&[("purge", "true")]);
        }
        if options.stop_on_error {
            request = request.query(&[("stopOnError", "true")]);
        }
        let response = self.send(request).await?;
        self.expect_task(response, id, "undeploy").await
    }

    async fn purge(&self, id: &DeploymentId, force: bool) -> Result<(), ProvisioningError> {
        let mut request = self
            .client
            .post(self.build_url(&format!("{}/purge", Self::deployment_path(id))));
        if force {
            request = request.query(&[("force", "true")]);
        }
        let response = self.send(request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProvisioningError::NotFound(Self::deployment_path(id))),
            _ => Err(unexpected(response).await),
        }
    }

    async fn execute_workflow(
        &self,
        id: &DeploymentId,
        workflow: &str,
        inputs: HashMap<String, serde_json::Value>,
        continue_on_error: bool,
    ) -> Result<TaskHandle, ProvisioningError> {
        let mut request = self
            .client
            .post(self.build_url(&format!("{}/workflows/{}", Self::deployment_path(id), workflow)))
            .json(&serde_json::json!({ "inputs": inputs }));
        if continue_on_error {
            request = request.query(&[("continueOnError", "true")]);
        }
        let response = self.send(request).await?;
        self.expect_task(response, id, "workflow").await
    }

    async fn execute_custom_command(
        &self,
        id: &DeploymentId,
        command: &CustomCommand,
    ) -> Result<TaskHandle, ProvisioningError> {
        let response = self
            .send(
                self.client
                    .post(self.build_url(&format!("{}/custom", Self::deployment_path(id))))
                    .json(command),
            )
            .await?;
        self.expect_task(response, id, "custom command").await
    }

    async fn get_task(&self, task: &TaskHandle) -> Result<RemoteTask, ProvisioningError> {
        let response = self
            .send(self.client.get(self.task_url(task)).header(ACCEPT, "application/json"))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProvisioningError::NotFound(task.task_url.clone()));
        }
        Self::expect_json(response).await
    }

    async fn cancel_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError> {
        let response = self.send(self.client.delete(self.task_url(task))).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProvisioningError::NotFound(task.task_url.clone())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn resume_task(&self, task: &TaskHandle) -> Result<(), ProvisioningError> {
        let response = self.send(self.client.put(self.task_url(task))).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProvisioningError::NotFound(task.task_url.clone())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn poll_events(&self, index: u64) -> Result<EventsPage, ProvisioningError> {
        let response = self
            .send_long_poll(self.client.get(self.build_url("/events")).query(&[("index", index)]))
            .await?;
        Self::expect_json(response).await
    }

    async fn poll_logs(&self, index: u64) -> Result<LogsPage, ProvisioningError> {
        let response = self
            .send_long_poll(self.client.get(self.build_url("/logs")).query(&[("index", index)]))
            .await?;
        Self::expect_json(response).await
    }

    async fn latest_event_index(&self) -> Result<u64, ProvisioningError> {
        self.head_index("/events").await
    }

    async fn latest_log_index(&self) -> Result<u64, ProvisioningError> {
        self.head_index("/logs").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(url: &str) -> YorcClient {
        let config = OrchestratorEndpoint {
            url: url.to_string(),
            long_poll_wait: Duration::from_secs(1),
            ..OrchestratorEndpoint::default()
        };
        YorcClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_submit_topology_returns_task_handle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/deployments/d1")
            .match_header("content-type", "application/zip")
            .match_body(Matcher::Exact("PK-archive".to_string()))
            .with_status(201)
            .with_header("location", "/deployments/d1/tasks/t1")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let handle = client
            .submit_topology(&DeploymentId::from("d1"), Bytes::from_static(b"PK-archive"))
            .await
            .unwrap();

        assert_eq!(handle.task_url, "/deployments/d1/tasks/t1");
        assert_eq!(handle.task_id(), "t1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_topology_without_location_fails() {
        let mut server = mockito::Server::new_async().await;
        server.mock("PUT", "/deployments/d1").with_status(201).create_async().await;

        let client = client_for(&server.url());
        let result = client
            .submit_topology(&DeploymentId::from("d1"), Bytes::from_static(b"zip"))
            .await;
        assert!(matches!(result, Err(ProvisioningError::MissingLocation(_))));
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/deployments/d1")
            .with_status(400)
            .with_body("invalid topology")
            .create_async()
            .await;

        let client = client_for(&server.url());
        match client.submit_topology(&DeploymentId::from("d1"), Bytes::from_static(b"zip")).await {
            Err(ProvisioningError::Http { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid topology");
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_deployment_not_found_is_none() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/deployments/gone").with_status(404).create_async().await;
        server
            .mock("GET", "/deployments/d1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"d1","status":"DEPLOYED","links":[]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        assert!(client.get_deployment(&DeploymentId::from("gone")).await.unwrap().is_none());
        let found = client.get_deployment(&DeploymentId::from("d1")).await.unwrap().unwrap();
        assert_eq!(found.status, "DEPLOYED");
    }

    #[tokio::test]
    async fn test_list_deployments() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/deployments")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"deployments":[
                    {"id":"d1","status":"DEPLOYED"},
                    {"id":"d2","status":"UNDEPLOYMENT_IN_PROGRESS"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let ids: Vec<String> = client
            .list_deployments()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_undeploy_and_scale_send_query_flags() {
        let mut server = mockito::Server::new_async().await;
        let undeploy = server
            .mock("DELETE", "/deployments/d1")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("purge".into(), "true".into()),
                Matcher::UrlEncoded("stopOnError".into(), "true".into()),
            ]))
            .with_status(202)
            .with_header("location", "/deployments/d1/tasks/u1")
            .create_async()
            .await;
        let scale = server
            .mock("POST", "/deployments/d1/scale/Compute")
            .match_query(Matcher::UrlEncoded("delta".into(), "-1".into()))
            .with_status(202)
            .with_header("location", "/deployments/d1/tasks/s1")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let id = DeploymentId::from("d1");
        let task = client
            .undeploy(&id, UndeployOptions { purge: true, stop_on_error: true })
            .await
            .unwrap();
        assert_eq!(task.task_id(), "u1");
        assert_eq!(client.scale(&id, "Compute", -1).await.unwrap().task_id(), "s1");

        undeploy.assert_async().await;
        scale.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_task_uses_location_url() {
        let mut server = mockito::Server::new_async().await;
        let cancel = server
            .mock("DELETE", "/deployments/d2/tasks/t2")
            .with_status(202)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let task = TaskHandle::new(DeploymentId::from("d2"), "/deployments/d2/tasks/t2");
        client.cancel_task(&task).await.unwrap();
        cancel.assert_async().await;
    }

    #[tokio::test]
    async fn test_poll_events_sends_index_and_wait() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("index".into(), "7".into()),
                Matcher::UrlEncoded("wait".into(), "1s".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"events":[{
                    "timestamp":"2026-03-01T10:00:00Z",
                    "deploymentId":"d1",
                    "type":"deployment",
                    "status":"DEPLOYED"
                }],"last_index":9}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let page = client.poll_events(7).await.unwrap();
        assert_eq!(page.last_index, 9);
        assert_eq!(page.events.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_log_index_reads_header() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/logs")
            .with_status(200)
            .with_header("X-Yorc-Index", "1234")
            .create_async()
            .await;

        let client = client_for(&server.url());
        assert_eq!(client.latest_log_index().await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = client_for("http://127.0.0.1:1");
        let result = client.list_deployments().await;
        assert!(matches!(result, Err(ProvisioningError::Transport(_))));
    }

    #[tokio::test]
    async fn test_idle_long_poll_is_poll_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the connection without ever answering
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let config = OrchestratorEndpoint {
            url: format!("http://{}", addr),
            long_poll_wait: Duration::from_millis(200),
            ..OrchestratorEndpoint::default()
        };
        let client = YorcClient::new(&config).unwrap();
        let result = client.poll_events(0).await;

        assert!(matches!(result, Err(ProvisioningError::PollTimeout)), "got {:?}", result);
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_timeout_on_long_poll_is_transport_error() {
        // Listener with a single-slot backlog that never accepts
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        // Fill the accept queue until new handshakes stall
        let mut held = Vec::new();
        for _ in 0..256 {
            let attempt = tokio::net::TcpStream::connect(addr);
            match tokio::time::timeout(Duration::from_millis(200), attempt).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }

        let config = OrchestratorEndpoint {
            url: format!("http://{}", addr),
            connect_timeout: Duration::from_millis(300),
            long_poll_wait: Duration::from_secs(1),
            ..OrchestratorEndpoint::default()
        };
        let client = YorcClient::new(&config).unwrap();
        let result = client.poll_events(0).await;

        assert!(matches!(result, Err(ProvisioningError::Transport(_))), "got {:?}", result);
        drop(held);
        drop(listener);
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let config = OrchestratorEndpoint {
            url: "::not-a-url".to_string(),
            ..OrchestratorEndpoint::default()
        };
        assert!(matches!(YorcClient::new(&config), Err(ProvisioningError::Configuration(_))));
    }
}
