//! hive-locator resolves Dataproc Hive locators to a reachable endpoint.
//!
//! A locator names a cluster, or a pool of clusters, rather than a host:
//!
//! ```text
//! jdbc:dataproc://hive/<database>;projectId=<p>;region=<r>[;clusterName=<c> | ;clusterPoolLabel=<f=v:...>][;<session>][?<query>][#<fragment>]
//! ```
//!
//! Resolution turns it into a HiveServer2-over-HTTP connection string for
//! one concrete cluster:
//!
//! ```text
//! jdbc:hive2://<host>:<port>/<database>;transportMode=http;httpPath=cliservice[;<session>][?<query>][#<fragment>]
//! ```
//!
//! # Usage
//!
//! * [locator::parse] turns a locator into [locator::ConnectionOptions].
//! * [resolver::PoolResolver] looks up clusters through a
//!   [fleet::FleetClient] and renders a [render::ConnectionString]. When a
//!   pool is named, [picker::pick_cluster] chooses among its members in
//!   proportion to their spare capacity.
//! * [driver::HiveDriver] combines both with a [connector::Connector], which
//!   supplies the actual Hive connection.
//!
//! # DTrace probes
//!
//! hive-locator contains a few DTrace USDT probes, which fire as locators
//! are resolved:
//!
//! - `resolve-start`: Fires before resolving a locator.
//! - `resolve-done`: Fires once a cluster and its endpoint host are known.
//! - `resolve-failed`: Fires when resolution fails, with a string naming the
//!   reason.
//! - `cluster-picked`: Fires when a cluster is picked from a pool, with its
//!   spare capacity.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly enabled,
//! by tracing the program with the `dtrace(1)` command-line tool.
//!
//! Registration with the DTrace kernel module happens in
//! [driver::Registry::new], which is fallible for that reason. Its `Err`
//! variant still gives access to the registry, in the manner of
//! `std::sync::PoisonError`.

// Public API
pub mod auth;
pub mod cluster;
pub mod connector;
pub mod driver;
pub mod filter;
pub mod fleet;
pub mod locator;
pub mod picker;
pub mod render;
pub mod resolver;

// Default implementations of generic interfaces
pub mod fleets;

#[cfg(test)]
mod test_utils;

/// USDT probes for tracing how locators are resolved.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "hive_locator")]
mod probes {
    /// Fires right before resolving a locator.
    fn resolve__start(project: &str, region: &str) {}

    /// Fires when a locator resolved to a cluster with a reachable host.
    fn resolve__done(cluster: &str, host: &str) {}

    /// Fires when resolution fails, with a string identifying the reason.
    fn resolve__failed(reason: &str) {}

    /// Fires when a cluster is picked from a pool, along with the spare
    /// capacity it reported.
    fn cluster__picked(cluster: &str, available_mb: i64) {}
}
