//! Implementation of [FleetClient] that always describes a fixed set of
//! clusters.

use async_trait::async_trait;

use crate::cluster::ClusterRecord;
use crate::filter::PoolFilter;
use crate::fleet::{Error, FleetClient};

/// A [`FleetClient`] backed by an in-memory list of clusters.
///
/// Filters are evaluated locally, with the same semantics as the Dataproc
/// API for the expressions this crate produces.
#[derive(Clone, Debug, Default)]
pub struct FixedFleet {
    clusters: Vec<(String, ClusterRecord)>,
}

impl FixedFleet {
    /// Creates a fleet with `clusters` placed in `project_id`/`region`.
    pub fn new(
        project_id: impl ToString,
        region: impl ToString,
        clusters: impl IntoIterator<Item = ClusterRecord>,
    ) -> FixedFleet {
        let mut fleet = FixedFleet::default();
        let project_id = project_id.to_string();
        let region = region.to_string();
        for cluster in clusters {
            fleet.insert(&project_id, &region, cluster);
        }
        fleet
    }

    /// Adds a cluster, replacing any cluster of the same name in the same
    /// location.
    pub fn insert(&mut self, project_id: &str, region: &str, mut cluster: ClusterRecord) {
        cluster.project_id = project_id.to_string();
        self.clusters.retain(|(r, c)| {
            !(r == region && c.project_id == project_id && c.cluster_name == cluster.cluster_name)
        });
        self.clusters.push((region.to_string(), cluster));
    }

    fn located<'a>(
        &'a self,
        project_id: &'a str,
        region: &'a str,
    ) -> impl Iterator<Item = &'a ClusterRecord> + 'a {
        self.clusters
            .iter()
            .filter(move |(r, c)| r == region && c.project_id == project_id)
            .map(|(_, c)| c)
    }
}

#[async_trait]
impl FleetClient for FixedFleet {
    async fn get_cluster(
        &self,
        project_id: &str,
        region: &str,
        cluster_name: &str,
    ) -> Result<ClusterRecord, Error> {
        self.located(project_id, region)
            .find(|c| c.cluster_name == cluster_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{project_id}/{region}/{cluster_name}")))
    }

    async fn list_clusters(
        &self,
        project_id: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<ClusterRecord>, Error> {
        let filter = PoolFilter::parse(filter).map_err(|e| Error::Api {
            status: http::StatusCode::BAD_REQUEST,
            message: e.to_string(),
        })?;
        Ok(self
            .located(project_id, region)
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }
}
