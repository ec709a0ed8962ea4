//! Utilities to help with testing resolution

use crate::cluster::{ClusterRecord, ClusterState};
use crate::connector::{self, Connector};
use crate::fleet::{self, FleetClient};
use crate::render::ConnectionString;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn setup_tracing_subscriber() {
    use tracing_subscriber::fmt::format::FmtSpan;
    let _ = tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_span_events(FmtSpan::ENTER)
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A cluster serving HiveServer2 on its master node, `<name>-m`.
pub fn hive_cluster(name: &str, state: ClusterState, available_mb: Option<i64>) -> ClusterRecord {
    let cluster = ClusterRecord::new(name)
        .with_state(state)
        .with_http_port(
            format!("HiveServer2 ({name}-m)"),
            format!("https://{name}-m:10002/cliservice"),
        );
    match available_mb {
        Some(mb) => cluster.with_load_metric(mb),
        None => cluster,
    }
}

/// A fleet which answers every listing with the same clusters, and
/// remembers the filters it was asked for.
pub struct ScriptedFleet {
    clusters: Vec<ClusterRecord>,
    fail: bool,
    filters: Mutex<Vec<String>>,
}

impl ScriptedFleet {
    pub fn listing(clusters: Vec<ClusterRecord>) -> Self {
        Self {
            clusters,
            fail: false,
            filters: Mutex::new(vec![]),
        }
    }

    /// A fleet whose every request fails with a server error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::listing(vec![])
        }
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), fleet::Error> {
        if self.fail {
            return Err(fleet::Error::Api {
                status: http::StatusCode::INTERNAL_SERVER_ERROR,
                message: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FleetClient for ScriptedFleet {
    async fn get_cluster(
        &self,
        _project_id: &str,
        _region: &str,
        cluster_name: &str,
    ) -> Result<ClusterRecord, fleet::Error> {
        self.check()?;
        self.clusters
            .iter()
            .find(|c| c.cluster_name == cluster_name)
            .cloned()
            .ok_or_else(|| fleet::Error::NotFound(cluster_name.to_string()))
    }

    async fn list_clusters(
        &self,
        _project_id: &str,
        _region: &str,
        filter: &str,
    ) -> Result<Vec<ClusterRecord>, fleet::Error> {
        self.filters.lock().unwrap().push(filter.to_string());
        self.check()?;
        Ok(self.clusters.clone())
    }
}

/// A connector which "connects" by handing back the connection string,
/// and records every string it was given.
pub struct RecordingConnector {
    urls: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self {
            urls: Mutex::new(vec![]),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Makes the next connection attempt fail with an I/O error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    type Connection = String;

    async fn connect(&self, url: &ConnectionString) -> Result<Self::Connection, connector::Error> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
        }
        self.urls.lock().unwrap().push(url.to_string());
        Ok(url.to_string())
    }
}

/// An HTTP/1.1 server which answers each connection with the next canned
/// JSON response, then closes it.
pub struct FakeHttpServer {
    addr: SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

impl FakeHttpServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::task::spawn(async move {
            let mut requests = vec![];
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = vec![];
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                requests.push(String::from_utf8_lossy(&request).into_owned());

                let response = format!(
                    "HTTP/1.1 {status} Fake\r\n\
                     content-type: application/json\r\n\
                     content-length: {}\r\n\
                     connection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            requests
        });
        Self { addr, handle }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Waits for every canned response to be served, and returns the raw
    /// request heads in the order they arrived.
    pub async fn requests(self) -> Vec<String> {
        self.handle.await.unwrap()
    }
}
