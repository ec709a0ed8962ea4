//! The interface for the fleet API, which knows about clusters.

use crate::cluster::ClusterRecord;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fleet API returned {status}: {message}")]
    Api {
        status: http::StatusCode,
        message: String,
    },

    #[error(transparent)]
    Other(anyhow::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Reads cluster records from the fleet-management API.
///
/// Implementations are used by shared reference for the duration of a
/// single resolution, and may be called concurrently.
#[async_trait]
pub trait FleetClient: Send + Sync {
    /// Fetches exactly one cluster by name.
    ///
    /// Returns [Error::NotFound] if no such cluster exists.
    async fn get_cluster(
        &self,
        project_id: &str,
        region: &str,
        cluster_name: &str,
    ) -> Result<ClusterRecord, Error>;

    /// Lists every cluster matching `filter`.
    ///
    /// `filter` is an `AND`-joined list of `key = value` equalities, as
    /// produced by [crate::filter::PoolFilter].
    async fn list_clusters(
        &self,
        project_id: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<ClusterRecord>, Error>;
}

/// Helper type for anything that implements the FleetClient interface.
pub type BoxedFleetClient = Box<dyn FleetClient>;

pub type SharedFleetClient = Arc<dyn FleetClient>;

#[async_trait]
impl<F: FleetClient + ?Sized> FleetClient for Arc<F> {
    async fn get_cluster(
        &self,
        project_id: &str,
        region: &str,
        cluster_name: &str,
    ) -> Result<ClusterRecord, Error> {
        (**self).get_cluster(project_id, region, cluster_name).await
    }

    async fn list_clusters(
        &self,
        project_id: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<ClusterRecord>, Error> {
        (**self).list_clusters(project_id, region, filter).await
    }
}

#[async_trait]
impl<F: FleetClient + ?Sized> FleetClient for Box<F> {
    async fn get_cluster(
        &self,
        project_id: &str,
        region: &str,
        cluster_name: &str,
    ) -> Result<ClusterRecord, Error> {
        (**self).get_cluster(project_id, region, cluster_name).await
    }

    async fn list_clusters(
        &self,
        project_id: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<ClusterRecord>, Error> {
        (**self).list_clusters(project_id, region, filter).await
    }
}
