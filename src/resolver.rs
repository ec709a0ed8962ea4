//! Resolves [ConnectionOptions] to a single reachable cluster.
//!
//! Resolution is one pass, with no caching and no retries:
//!
//! - With a cluster name, exactly that cluster is fetched.
//! - Otherwise, the pool constraint becomes a filter expression, every
//!   matching cluster is listed, and [crate::picker::pick_cluster] chooses
//!   one of them.
//!
//! The chosen cluster's first HTTP port provides the host for the rendered
//! [ConnectionString].

use crate::auth::{self, Authentication};
use crate::cluster::ClusterRecord;
use crate::filter::PoolFilter;
use crate::fleet::{self, FleetClient};
use crate::locator::{ConnectionOptions, MalformedLocator};
use crate::picker::pick_cluster;
#[cfg(feature = "probes")]
use crate::probes;
use crate::render::{ConnectionString, HIVE_PROTOCOL};

use thiserror::Error;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    MalformedLocator(#[from] MalformedLocator),

    #[error("{0}")]
    Resolution(String),

    #[error("Fleet API request failed")]
    Fleet(#[from] fleet::Error),

    #[error("Unable to authenticate")]
    Credentials(#[from] auth::Error),
}

impl Error {
    #[cfg(feature = "probes")]
    // Convert to a static string for USDT probes.
    const fn as_str(&self) -> &'static str {
        match self {
            Error::MalformedLocator(_) => "MalformedLocator",
            Error::Resolution(_) => "Resolution",
            Error::Fleet(_) => "Fleet",
            Error::Credentials(_) => "Credentials",
        }
    }
}

/// Configuration options which alter how connection strings are rendered.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Scheme of the rendered connection string.
    ///
    /// Default: "jdbc:hive2"
    pub protocol: String,

    /// How the rendered connection string authenticates.
    ///
    /// Default: [Authentication::None]
    pub authentication: Authentication,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            protocol: HIVE_PROTOCOL.to_string(),
            authentication: Authentication::None,
        }
    }
}

struct Resolved {
    #[cfg_attr(not(feature = "probes"), allow(dead_code))]
    cluster_name: String,
    #[cfg_attr(not(feature = "probes"), allow(dead_code))]
    host: String,
    url: ConnectionString,
}

/// Resolves connection options against a fleet.
///
/// The resolver borrows its fleet client; it neither creates nor closes it.
pub struct PoolResolver<'a, F: ?Sized> {
    fleet: &'a F,
    config: &'a ResolverConfig,
}

impl<'a, F: FleetClient + ?Sized> PoolResolver<'a, F> {
    pub fn new(fleet: &'a F, config: &'a ResolverConfig) -> Self {
        Self { fleet, config }
    }

    /// Picks a cluster for `options` and renders a connection string to it.
    #[instrument(
        skip(self, options),
        err,
        name = "PoolResolver::resolve",
        fields(project = options.project_id(), region = options.region())
    )]
    pub async fn resolve(&self, options: &ConnectionOptions) -> Result<ConnectionString, Error> {
        #[cfg(feature = "probes")]
        probes::resolve__start!(|| (options.project_id(), options.region()));
        let result = self.do_resolve(options).await;
        #[cfg(feature = "probes")]
        match &result {
            Ok(resolved) => probes::resolve__done!(|| (
                resolved.cluster_name.as_str(),
                resolved.host.as_str()
            )),
            Err(e) => probes::resolve__failed!(|| e.as_str()),
        }
        result.map(|resolved| resolved.url)
    }

    // Resolution only succeeds once the connection string is fully rendered.
    async fn do_resolve(&self, options: &ConnectionOptions) -> Result<Resolved, Error> {
        let cluster = self.find_cluster(options).await?;
        let host = endpoint_host(&cluster)?;
        event!(Level::DEBUG, cluster = %cluster.cluster_name, host = %host, "Resolved endpoint");

        let auth = self.config.authentication.session_params().await?;
        let url = ConnectionString::render(&self.config.protocol, &host, options, &auth);
        Ok(Resolved {
            cluster_name: cluster.cluster_name,
            host,
            url,
        })
    }

    /// Finds the cluster `options` should connect to.
    pub async fn find_cluster(&self, options: &ConnectionOptions) -> Result<ClusterRecord, Error> {
        match options.cluster_name() {
            Some(name) => {
                if options.cluster_pool_label().is_some() {
                    event!(
                        Level::DEBUG,
                        cluster = name,
                        "Cluster name given, ignoring cluster pool label"
                    );
                }
                self.cluster_by_name(options, name).await
            }
            None => {
                let filter = PoolFilter::from_pool_label(options.cluster_pool_label())?;
                self.cluster_from_pool(options, &filter.to_string()).await
            }
        }
    }

    async fn cluster_by_name(
        &self,
        options: &ConnectionOptions,
        name: &str,
    ) -> Result<ClusterRecord, Error> {
        let project = options.project_id();
        let region = options.region();
        match self.fleet.get_cluster(project, region, name).await {
            Ok(cluster) => Ok(cluster),
            Err(err) if err.is_not_found() => Err(Error::Resolution(format!(
                "Unable to retrieve cluster information for {project}/{region}/{name}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn cluster_from_pool(
        &self,
        options: &ConnectionOptions,
        filter: &str,
    ) -> Result<ClusterRecord, Error> {
        let project = options.project_id();
        let region = options.region();
        let no_clusters = || {
            Error::Resolution(format!(
                "Unable to find active clusters matching {filter} in {project}/{region}"
            ))
        };

        event!(Level::DEBUG, filter, "Listing clusters in pool");
        let clusters = match self.fleet.list_clusters(project, region, filter).await {
            Ok(clusters) => clusters,
            Err(err) if err.is_not_found() => return Err(no_clusters()),
            Err(err) => return Err(err.into()),
        };
        event!(Level::DEBUG, listed = clusters.len(), "Listed clusters in pool");

        let picked = pick_cluster(&clusters, &mut rand::rng()).cloned();
        let Some(cluster) = picked else {
            return Err(no_clusters());
        };
        #[cfg(feature = "probes")]
        probes::cluster__picked!(|| (cluster.cluster_name.as_str(), cluster.load_metric()));
        Ok(cluster)
    }
}

fn endpoint_host(cluster: &ClusterRecord) -> Result<String, Error> {
    cluster.reachable_host().ok_or_else(|| {
        Error::Resolution(format!(
            "Unable to find a reachable endpoint for cluster {}",
            cluster.cluster_name
        ))
    })
}

/// Resolves `options` against `fleet` with the given configuration.
pub async fn resolve<F: FleetClient + ?Sized>(
    options: &ConnectionOptions,
    fleet: &F,
    config: &ResolverConfig,
) -> Result<ConnectionString, Error> {
    PoolResolver::new(fleet, config).resolve(options).await
}
