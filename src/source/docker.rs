//! Concrete [`super::ContainerRuntime`] backed by the local Docker Engine API, reached over its
//! unix domain socket (the same transport `docker.from_env()` resolves to in the Python
//! original: `unix:///var/run/docker.sock`).
//!
//! The [`super::ContainerRuntime`] trait stays synchronous on purpose, the same way the
//! `Provider` trait stays synchronous over the Cloudflare client's blocking feature - each
//! call here drives its own small single-threaded tokio runtime rather than forcing async
//! through every collaborator.

use std::collections::HashMap;
use std::time::Duration;

use hyper::{body::HttpBody, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use log::{debug, error, warn};
use serde_json::{Deserializer, Value};
use tokio::sync::mpsc::Sender;
use tokio::time::timeout;

use super::{Container, ContainerEvent, ContainerNetwork, ContainerRuntime, SourceError};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

pub struct DockerRuntime {
    socket_path: String,
    rt: tokio::runtime::Runtime,
}

impl DockerRuntime {
    pub fn new(socket_path: impl Into<String>) -> Result<Self, SourceError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        Ok(DockerRuntime {
            socket_path: socket_path.into(),
            rt,
        })
    }

    /// Cheap reachability check used by the health endpoint.
    pub fn ping(&self) -> bool {
        self.rt.block_on(async { get(&self.socket_path, "/_ping").await.is_ok() })
    }
}

impl ContainerRuntime for DockerRuntime {
    fn list_containers(&self) -> Result<Vec<Container>, SourceError> {
        self.rt.block_on(list_containers(&self.socket_path))
    }
}

impl crate::health::RuntimeReachability for DockerRuntime {
    fn is_reachable(&self) -> bool {
        self.ping()
    }
}

async fn get(socket_path: &str, path: &str) -> Result<hyper::Response<Body>, SourceError> {
    let client: Client<UnixConnector, Body> = Client::unix();
    let uri: hyper::Uri = UnixUri::new(socket_path, path).into();
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| SourceError::Internal(e.to_string()))?;
    client
        .request(req)
        .await
        .map_err(|e| SourceError::RuntimeUnreachable(e.to_string()))
}

async fn list_containers(socket_path: &str) -> Result<Vec<Container>, SourceError> {
    let resp = get(socket_path, "/containers/json?all=false").await?;
    let bytes = hyper::body::to_bytes(resp.into_body())
        .await
        .map_err(|e| SourceError::Internal(e.to_string()))?;
    let raw: Vec<Value> = serde_json::from_slice(&bytes).map_err(|e| SourceError::Internal(e.to_string()))?;
    Ok(raw.iter().filter_map(parse_container_summary).collect())
}

fn parse_container_summary(v: &Value) -> Option<Container> {
    let id = v.get("Id")?.as_str()?.to_string();
    let name = v
        .get("Names")?
        .as_array()?
        .first()?
        .as_str()?
        .trim_start_matches('/')
        .to_string();
    let labels: HashMap<String, String> = v
        .get("Labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, val)| val.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let networks: HashMap<String, ContainerNetwork> = v
        .get("NetworkSettings")
        .and_then(|n| n.get("Networks"))
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(name, net)| {
                    let ip_address = net.get("IPAddress").and_then(Value::as_str).filter(|s| !s.is_empty()).map(String::from);
                    let global_ipv6_address = net
                        .get("GlobalIPv6Address")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(String::from);
                    (
                        name.clone(),
                        ContainerNetwork {
                            ip_address,
                            global_ipv6_address,
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Container {
        id,
        name,
        labels,
        networks,
    })
}

/// Container lifecycle statuses the watcher forwards to the controller. Everything else Docker
/// emits on the `container` event type (`exec_start`, `health_status`, `attach`, ...) is dropped
/// here; the controller decides which of these forwarded statuses actually warrant a reconcile.
pub const INTERESTING_STATUSES: &[&str] = &["start", "die", "stop", "kill", "pause", "unpause"];

/// Runs the blocking event stream on a dedicated OS thread, bridging into the async world via
/// `tx`. Reconnects with a fixed backoff on any stream error; never returns.
pub fn spawn_event_watcher(socket_path: String, tx: Sender<ContainerEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!("could not start docker event watcher runtime: {e}");
                return;
            }
        };
        loop {
            rt.block_on(watch_events_once(&socket_path, &tx));
            debug!("docker event stream disconnected, reconnecting in {RECONNECT_BACKOFF:?}");
            std::thread::sleep(RECONNECT_BACKOFF);
        }
    })
}

async fn watch_events_once(socket_path: &str, tx: &Sender<ContainerEvent>) {
    let resp = match get(socket_path, "/events").await {
        Ok(r) => r,
        Err(e) => {
            warn!("could not connect to docker event stream: {e}");
            return;
        }
    };

    let mut body = resp.into_body();
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let chunk = match body.data().await {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                warn!("docker event stream error: {e}");
                return;
            }
            None => return,
        };
        buf.extend_from_slice(&chunk);

        let mut stream = Deserializer::from_slice(&buf).into_iter::<Value>();
        let mut consumed = 0;
        while let Some(Ok(value)) = stream.next() {
            consumed = stream.byte_offset();
            if let Some(event) = parse_event(&value) {
                if timeout(ENQUEUE_TIMEOUT, tx.send(event)).await.is_err() {
                    warn!("dropped a docker event, reconciler did not keep up");
                }
            }
        }
        buf.drain(..consumed);
    }
}

fn parse_event(v: &Value) -> Option<ContainerEvent> {
    if v.get("Type")?.as_str()? != "container" {
        return None;
    }
    let status = v.get("status").or_else(|| v.get("Action"))?.as_str()?.to_string();
    if !INTERESTING_STATUSES.contains(&status.as_str()) {
        return None;
    }
    Some(ContainerEvent {
        status,
        container_id: v.get("id").or_else(|| v.get("Actor").and_then(|a| a.get("ID")))?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_container_summary_reads_names_labels_and_networks() {
        let raw: Value = serde_json::json!({
            "Id": "abc123",
            "Names": ["/web-1"],
            "Labels": {"sherpa.dns/hostname": "web.example.com"},
            "NetworkSettings": {"Networks": {"bridge": {"IPAddress": "10.0.0.5", "GlobalIPv6Address": ""}}}
        });
        let c = parse_container_summary(&raw).unwrap();
        assert_eq!(c.id, "abc123");
        assert_eq!(c.name, "web-1");
        assert_eq!(c.labels.get("sherpa.dns/hostname").unwrap(), "web.example.com");
        assert_eq!(c.networks["bridge"].ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(c.networks["bridge"].global_ipv6_address, None);
    }

    #[test]
    fn parse_event_extracts_status_and_id() {
        let raw: Value = serde_json::json!({"Type": "container", "status": "start", "id": "abc123"});
        let event = parse_event(&raw).unwrap();
        assert_eq!(event.status, "start");
        assert_eq!(event.container_id, "abc123");
    }

    #[test]
    fn parse_event_ignores_non_container_events() {
        let raw: Value = serde_json::json!({"Type": "network", "status": "connect"});
        assert!(parse_event(&raw).is_none());
    }

    #[test]
    fn parse_event_ignores_uninteresting_container_statuses() {
        let raw: Value = serde_json::json!({"Type": "container", "status": "exec_start", "id": "abc123"});
        assert!(parse_event(&raw).is_none());
    }
}
