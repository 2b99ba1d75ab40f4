//! Docker Engine API client.
//!
//! Talks to the engine over its unix socket (`unix:///var/run/docker.sock`)
//! or over HTTP (`tcp://host:port` or `http(s)://` endpoints). The unix
//! transport opens one HTTP/1.1 connection per request, which suits the
//! engine's long-lived `/events` stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use fabric_common::{ContainerId, RuntimeError};
use futures::StreamExt;
use futures::stream::BoxStream;
use http_body_util::{BodyStream, Empty};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Container, EventKind, ListenerId, RuntimeClient, RuntimeEvent, RuntimeResult};

/// Message the engine uses for missing containers.
const NOT_FOUND_PREFIX: &str = "No such container";

/// `/events` restricted to container events, with the filter pre-encoded.
const EVENTS_PATH: &str = "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How requests reach the engine.
#[derive(Debug)]
enum Transport {
    Http {
        base_url: String,
        client: reqwest::Client,
    },
    Unix {
        socket: PathBuf,
    },
}

/// Status and streamed body of an engine response.
struct ApiResponse {
    status: u16,
    body: BoxStream<'static, Result<Bytes, String>>,
}

impl ApiResponse {
    const fn is_success(&self) -> bool {
        200 <= self.status && self.status < 300
    }

    async fn bytes(mut self) -> Result<Vec<u8>, String> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected)
    }

    async fn json<T: DeserializeOwned>(self) -> RuntimeResult<T> {
        let body = self
            .bytes()
            .await
            .map_err(|message| RuntimeError::Decode { message })?;
        serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode {
            message: e.to_string(),
        })
    }
}

/// Docker Engine API client.
#[derive(Debug)]
pub struct DockerClient {
    endpoint: String,
    transport: Transport,
    streams: DashMap<ListenerId, JoinHandle<()>>,
    next_listener: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectBody {
    id: String,
    name: String,
    config: InspectConfig,
    state: InspectState,
    #[serde(default)]
    network_settings: Option<InspectNetwork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    host_port: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    image: String,
    #[serde(default)]
    ports: Vec<ListPort>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPort {
    private_port: u16,
    #[serde(default)]
    public_port: Option<u16>,
}

/// One line of the `/events` stream.
#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: Option<EventActor>,
    #[serde(default)]
    time: i64,
}

#[derive(Debug, Deserialize)]
struct EventActor {
    #[serde(rename = "ID")]
    id: String,
}

impl From<InspectBody> for Container {
    fn from(body: InspectBody) -> Self {
        let ports = body
            .network_settings
            .and_then(|net| net.ports)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(spec, bindings)| {
                let private = spec.split('/').next()?.parse().ok()?;
                let public = bindings?.first()?.host_port.parse().ok()?;
                Some((private, public))
            })
            .collect();

        Self {
            id: body.id,
            name: body.name.trim_start_matches('/').to_string(),
            image: body.config.image,
            ports,
            labels: body.config.labels.unwrap_or_default(),
            running: body.state.running,
        }
    }
}

impl From<ListEntry> for Container {
    fn from(entry: ListEntry) -> Self {
        let name = entry
            .names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let ports = entry
            .ports
            .iter()
            .filter_map(|port| Some((port.private_port, port.public_port?)))
            .collect();

        Self {
            id: entry.id,
            name,
            image: entry.image,
            ports,
            labels: entry.labels.unwrap_or_default(),
            running: entry.state == "running",
        }
    }
}

impl EventMessage {
    fn into_event(self) -> Option<RuntimeEvent> {
        let status = self.action.or(self.status)?;
        let id = self.actor.map(|actor| actor.id).or(self.id)?;
        Some(RuntimeEvent {
            id: ContainerId::new(id).ok()?,
            kind: EventKind::from_status(&status),
            timestamp: self.time,
        })
    }
}

impl DockerClient {
    /// Create a client for a Docker Engine endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Unavailable`] for unsupported schemes.
    pub fn new(endpoint: &str) -> RuntimeResult<Self> {
        let unavailable = |message: String| RuntimeError::Unavailable {
            endpoint: endpoint.to_string(),
            message,
        };

        let transport = if let Some(socket) = endpoint.strip_prefix("unix://") {
            if socket.is_empty() {
                return Err(unavailable("missing unix socket path".to_string()));
            }
            Transport::Unix {
                socket: PathBuf::from(socket),
            }
        } else {
            let base_url = if let Some(rest) = endpoint.strip_prefix("tcp://") {
                format!("http://{rest}")
            } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                return Err(unavailable(
                    "unsupported endpoint scheme, expected unix://, tcp://, http:// or https://"
                        .to_string(),
                ));
            };
            // No overall timeout: the events request is a long-lived stream.
            let client = reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .map_err(|e| unavailable(e.to_string()))?;
            Transport::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                client,
            }
        };

        tracing::info!(endpoint, "Creating a docker runtime client");

        Ok(Self {
            endpoint: endpoint.to_string(),
            transport,
            streams: DashMap::new(),
            next_listener: AtomicU64::new(1),
        })
    }

    /// Issue a GET and return the response head with a streaming body.
    ///
    /// Transport failures come back as plain messages so callers can pick
    /// the error variant.
    async fn request(&self, path: &str) -> Result<ApiResponse, String> {
        match &self.transport {
            Transport::Http { base_url, client } => {
                let response = client
                    .get(format!("{base_url}{path}"))
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(ApiResponse {
                    status: response.status().as_u16(),
                    body: response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(|e| e.to_string()))
                        .boxed(),
                })
            }
            Transport::Unix { socket } => unix_get(socket, path).await,
        }
    }

    async fn get(&self, path: &str) -> RuntimeResult<ApiResponse> {
        self.request(path)
            .await
            .map_err(|message| RuntimeError::Unavailable {
                endpoint: self.endpoint.clone(),
                message,
            })
    }

    /// Turn an error response into a [`RuntimeError`], reading the engine's
    /// message to tell a missing container apart from other failures.
    async fn api_error(response: ApiResponse, id: Option<&str>) -> RuntimeError {
        let status = response.status;
        let body = response.bytes().await.unwrap_or_default();
        let text = String::from_utf8_lossy(&body).into_owned();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);

        match id {
            Some(id) if status == 404 || message.starts_with(NOT_FOUND_PREFIX) => {
                RuntimeError::NotFound { id: id.to_string() }
            }
            _ => RuntimeError::Api { status, message },
        }
    }
}

/// GET `path` over a fresh HTTP/1.1 connection on the engine's unix socket.
async fn unix_get(socket: &Path, path: &str) -> Result<ApiResponse, String> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket))
        .await
        .map_err(|_| format!("timed out connecting to {}", socket.display()))?
        .map_err(|e| format!("{}: {e}", socket.display()))?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| e.to_string())?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Docker socket connection closed");
        }
    });

    let request = hyper::Request::get(path)
        .header(hyper::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(|e| e.to_string())?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status().as_u16();
    let body = BodyStream::new(response.into_body())
        .filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(e.to_string())),
            }
        })
        .boxed();
    Ok(ApiResponse { status, body })
}

/// Read the newline-delimited JSON event stream into `listener`.
async fn pump_events(response: ApiResponse, listener: mpsc::Sender<RuntimeEvent>) {
    let mut body = response.body;
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Docker event stream failed");
                return;
            }
        };
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let event = match serde_json::from_slice::<EventMessage>(&line) {
                Ok(message) => message.into_event(),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping undecodable docker event");
                    None
                }
            };
            if let Some(event) = event {
                if listener.send(event).await.is_err() {
                    tracing::debug!("Event listener closed, stopping docker event stream");
                    return;
                }
            }
        }
    }
    tracing::info!("Docker event stream ended");
}

#[async_trait]
impl RuntimeClient for DockerClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> RuntimeResult<()> {
        let response = self.get("/_ping").await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response, None).await)
        }
    }

    async fn add_event_listener(
        &self,
        listener: mpsc::Sender<RuntimeEvent>,
    ) -> RuntimeResult<ListenerId> {
        let response = self
            .request(EVENTS_PATH)
            .await
            .map_err(|message| RuntimeError::ListenerRejected { message })?;

        if !response.is_success() {
            let err = Self::api_error(response, None).await;
            return Err(RuntimeError::ListenerRejected {
                message: err.to_string(),
            });
        }

        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        let handle = tokio::spawn(pump_events(response, listener));
        self.streams.insert(id, handle);
        tracing::debug!(listener = id.0, "Added docker event listener");
        Ok(id)
    }

    async fn remove_event_listener(&self, id: ListenerId) -> RuntimeResult<()> {
        if let Some((_, handle)) = self.streams.remove(&id) {
            handle.abort();
            tracing::debug!(listener = id.0, "Removed docker event listener");
        }
        Ok(())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<Container> {
        let response = self.get(&format!("/containers/{id}/json")).await?;
        if !response.is_success() {
            return Err(Self::api_error(response, Some(id)).await);
        }
        let body: InspectBody = response.json().await?;
        Ok(body.into())
    }

    async fn list(&self) -> RuntimeResult<Vec<Container>> {
        let response = self.get("/containers/json").await?;
        if !response.is_success() {
            return Err(Self::api_error(response, None).await);
        }
        let entries: Vec<ListEntry> = response.json().await?;
        Ok(entries.into_iter().map(Container::from).collect())
    }
}

impl Drop for DockerClient {
    fn drop(&mut self) {
        for entry in &self.streams {
            entry.value().abort();
        }
    }
}
