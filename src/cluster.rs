//! Cluster records, as reported by the fleet API.
//!
//! These types follow the JSON encoding of the Dataproc `Cluster` resource,
//! trimmed to the fields which matter for picking an endpoint. They are
//! snapshots: nothing here tracks a cluster after it has been read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The YARN metric used as a cluster's spare capacity.
pub const YARN_MEMORY_MB_AVAILABLE: &str = "yarn-memory-mb-available";

/// The lifecycle state of a cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Creating,
    Running,
    Error,
    ErrorDueToUpdate,
    Deleting,
    Updating,
    Stopping,
    Stopped,
    Starting,
    Repairing,
    /// A state this crate does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ClusterState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Unknown => "UNKNOWN",
            ClusterState::Creating => "CREATING",
            ClusterState::Running => "RUNNING",
            ClusterState::Error => "ERROR",
            ClusterState::ErrorDueToUpdate => "ERROR_DUE_TO_UPDATE",
            ClusterState::Deleting => "DELETING",
            ClusterState::Updating => "UPDATING",
            ClusterState::Stopping => "STOPPING",
            ClusterState::Stopped => "STOPPED",
            ClusterState::Starting => "STARTING",
            ClusterState::Repairing => "REPAIRING",
        }
    }

    /// Matches the fleet API's `ACTIVE` state class in filter expressions.
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            ClusterState::Creating | ClusterState::Running | ClusterState::Updating
        )
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub state: ClusterState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Describes the externally reachable HTTP ports of a cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Maps a port's description (e.g. "HiveServer2 (master)") to its URI.
    #[serde(default)]
    pub http_ports: BTreeMap<String, String>,
    #[serde(default)]
    pub enable_http_port_access: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default)]
    pub endpoint_config: EndpointConfig,
}

/// An int64 metric value.
///
/// The JSON encoding of int64 fields is a string, but plain numbers are
/// accepted too.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Int64Repr", into = "String")]
pub struct Int64(pub i64);

#[derive(Deserialize)]
#[serde(untagged)]
enum Int64Repr {
    Number(i64),
    String(String),
}

impl TryFrom<Int64Repr> for Int64 {
    type Error = std::num::ParseIntError;

    fn try_from(repr: Int64Repr) -> Result<Self, Self::Error> {
        match repr {
            Int64Repr::Number(n) => Ok(Int64(n)),
            Int64Repr::String(s) => s.parse().map(Int64),
        }
    }
}

impl From<Int64> for String {
    fn from(value: Int64) -> Self {
        value.0.to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    #[serde(default)]
    pub hdfs_metrics: BTreeMap<String, Int64>,
    #[serde(default)]
    pub yarn_metrics: BTreeMap<String, Int64>,
}

/// A snapshot of one cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    #[serde(default)]
    pub project_id: String,
    pub cluster_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub config: ClusterConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ClusterMetrics>,
}

impl ClusterRecord {
    pub fn new(name: impl ToString) -> Self {
        Self {
            cluster_name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: ClusterState) -> Self {
        self.status.state = state;
        self
    }

    pub fn with_label(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_http_port(mut self, name: impl ToString, uri: impl ToString) -> Self {
        self.config
            .endpoint_config
            .http_ports
            .insert(name.to_string(), uri.to_string());
        self
    }

    pub fn with_load_metric(mut self, available_mb: i64) -> Self {
        self.metrics
            .get_or_insert_with(ClusterMetrics::default)
            .yarn_metrics
            .insert(YARN_MEMORY_MB_AVAILABLE.to_string(), Int64(available_mb));
        self
    }

    pub fn state(&self) -> ClusterState {
        self.status.state
    }

    /// Spare YARN memory in MB, or zero if the cluster reports no metrics.
    pub fn load_metric(&self) -> i64 {
        self.metrics
            .as_ref()
            .and_then(|metrics| metrics.yarn_metrics.get(YARN_MEMORY_MB_AVAILABLE))
            .map(|metric| metric.0)
            .unwrap_or(0)
    }

    /// The host of the first HTTP port URI, if there is one and it parses.
    pub fn reachable_host(&self) -> Option<String> {
        let uri = self.config.endpoint_config.http_ports.values().next()?;
        let uri: http::Uri = uri.parse().ok()?;
        uri.host().map(str::to_string)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deserialize_dataproc_cluster() {
        let cluster: ClusterRecord = serde_json::from_value(serde_json::json!({
            "projectId": "pid",
            "clusterName": "pool-1",
            "labels": { "team": "dataproc" },
            "status": { "state": "RUNNING", "stateStartTime": "2020-01-01T00:00:00Z" },
            "config": {
                "endpointConfig": {
                    "httpPorts": {
                        "HiveServer2 (pool-1-m)": "https://abc-dot-us-central1.dataproc.googleusercontent.com/gateway/default/hive/"
                    },
                    "enableHttpPortAccess": true
                },
                "softwareConfig": { "imageVersion": "2.1" }
            },
            "metrics": {
                "yarnMetrics": { "yarn-memory-mb-available": "2048", "yarn-nodes-active": 2 }
            }
        }))
        .unwrap();

        assert_eq!(cluster.cluster_name, "pool-1");
        assert_eq!(cluster.state(), ClusterState::Running);
        assert_eq!(cluster.labels.get("team").map(String::as_str), Some("dataproc"));
        assert_eq!(cluster.load_metric(), 2048);
        assert_eq!(
            cluster.reachable_host().as_deref(),
            Some("abc-dot-us-central1.dataproc.googleusercontent.com")
        );
    }

    #[test]
    fn deserialize_sparse_cluster() {
        let cluster: ClusterRecord = serde_json::from_value(serde_json::json!({
            "clusterName": "bare",
            "status": { "state": "SOME_FUTURE_STATE" }
        }))
        .unwrap();
        assert_eq!(cluster.state(), ClusterState::Unknown);
        assert_eq!(cluster.load_metric(), 0);
        assert_eq!(cluster.reachable_host(), None);
    }

    #[test]
    fn reject_garbage_metric() {
        let result = serde_json::from_value::<ClusterRecord>(serde_json::json!({
            "clusterName": "bad",
            "metrics": { "yarnMetrics": { "yarn-memory-mb-available": "lots" } }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn active_states() {
        let active: Vec<_> = [
            ClusterState::Unknown,
            ClusterState::Creating,
            ClusterState::Running,
            ClusterState::Error,
            ClusterState::Deleting,
            ClusterState::Updating,
            ClusterState::Stopped,
        ]
        .into_iter()
        .filter(ClusterState::is_active)
        .collect();
        assert_eq!(
            active,
            vec![
                ClusterState::Creating,
                ClusterState::Running,
                ClusterState::Updating
            ]
        );
    }

    #[test]
    fn unrecognized_states_are_unknown() {
        let status: ClusterStatus =
            serde_json::from_value(serde_json::json!({ "state": "SOME_FUTURE_STATE" })).unwrap();
        assert_eq!(status.state, ClusterState::Unknown);
        assert!(!status.state.is_active());

        let status: ClusterStatus =
            serde_json::from_value(serde_json::json!({ "state": "ERROR_DUE_TO_UPDATE" })).unwrap();
        assert_eq!(status.state, ClusterState::ErrorDueToUpdate);

        assert_eq!(ClusterStatus::default().state, ClusterState::Unknown);
    }

    #[test]
    fn reachable_host_uses_first_port() {
        let cluster = ClusterRecord::new("c1")
            .with_http_port("a: HiveServer2", "https://c1-m:10001/cliservice")
            .with_http_port("b: YARN", "https://c1-yarn/yarn/");
        assert_eq!(cluster.reachable_host().as_deref(), Some("c1-m"));
    }
}
