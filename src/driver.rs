//! Locator-driven connection entry points.
//!
//! A [Driver] claims the locators it understands and turns them into
//! connections. [HiveDriver] is the driver for `jdbc:dataproc://hive/`
//! locators, and a [Registry] picks between several drivers.

use crate::auth;
use crate::connector::{self, Connection, SharedConnector};
use crate::fleet::FleetClient;
use crate::fleets::dataproc::{DataprocFleet, DataprocFleetConfig};
use crate::locator;
use crate::render::ConnectionString;
use crate::resolver::{self, PoolResolver, ResolverConfig};

use async_trait::async_trait;
use debug_ignore::DebugIgnore;
use derive_where::derive_where;
use std::sync::Arc;
use thiserror::Error;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("No driver accepts the URL {0}")]
    UnsupportedUrl(String),

    #[error(transparent)]
    Resolve(#[from] resolver::Error),

    #[error("Unable to connect to {url}")]
    Connect {
        /// The connection string, with any credentials redacted.
        url: String,
        #[source]
        source: connector::Error,
    },
}

/// Turns locators into connections.
#[async_trait]
pub trait Driver<Conn: Connection>: Send + Sync {
    /// Returns true if this driver understands `url`.
    fn accepts_url(&self, url: &str) -> bool;

    /// Connects to the endpoint `url` describes.
    async fn connect(&self, url: &str) -> Result<Conn, Error>;
}

pub type SharedDriver<Conn> = Arc<dyn Driver<Conn>>;

/// The driver for `jdbc:dataproc://hive/` locators.
///
/// Each call to [HiveDriver::connect] resolves the locator afresh, so
/// successive connections to a cluster pool may land on different clusters.
#[derive_where(Debug; F)]
pub struct HiveDriver<F, Conn: Connection> {
    fleet: F,
    connector: DebugIgnore<SharedConnector<Conn>>,
    config: ResolverConfig,
}

impl<F: FleetClient, Conn: Connection> HiveDriver<F, Conn> {
    pub fn new(fleet: F, connector: SharedConnector<Conn>, config: ResolverConfig) -> Self {
        Self {
            fleet,
            connector: DebugIgnore(connector),
            config,
        }
    }

    pub fn fleet(&self) -> &F {
        &self.fleet
    }

    /// Resolves `url` without connecting to it.
    #[instrument(skip(self, url), err, name = "HiveDriver::resolve_url")]
    pub async fn resolve_url(&self, url: &str) -> Result<ConnectionString, Error> {
        if !self.accepts_url(url) {
            return Err(Error::UnsupportedUrl(url.to_string()));
        }
        let options = locator::parse(url).map_err(resolver::Error::from)?;
        Ok(PoolResolver::new(&self.fleet, &self.config)
            .resolve(&options)
            .await?)
    }

    pub fn accepts_url(&self, url: &str) -> bool {
        locator::accepts_url(url)
    }
}

impl<Conn: Connection> HiveDriver<DataprocFleet, Conn> {
    /// Creates a driver which talks to the Dataproc API with the
    /// application's default credentials.
    pub fn with_default_client(
        connector: SharedConnector<Conn>,
        config: ResolverConfig,
    ) -> Result<Self, Error> {
        let credentials = auth::default_credentials().map_err(resolver::Error::from)?;
        let fleet = DataprocFleet::new(credentials, DataprocFleetConfig::default())
            .map_err(resolver::Error::from)?;
        Ok(Self::new(fleet, connector, config))
    }
}

#[async_trait]
impl<F: FleetClient, Conn: Connection> Driver<Conn> for HiveDriver<F, Conn> {
    fn accepts_url(&self, url: &str) -> bool {
        HiveDriver::accepts_url(self, url)
    }

    async fn connect(&self, url: &str) -> Result<Conn, Error> {
        let target = self.resolve_url(url).await?;
        event!(Level::DEBUG, url = %target.redacted(), "Connecting");
        self.connector
            .connect(&target)
            .await
            .map_err(|source| Error::Connect {
                url: target.redacted(),
                source,
            })
    }
}

/// Probe registration failed.
///
/// The registry is still usable; its probes just won't fire.
pub struct RegistrationError<Conn: Connection>(Registry<Conn>);

impl<Conn: Connection> std::fmt::Debug for RegistrationError<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationError").finish_non_exhaustive()
    }
}

impl<Conn: Connection> std::fmt::Display for RegistrationError<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "USDT probe registration failed".fmt(f)
    }
}

impl<Conn: Connection> RegistrationError<Conn> {
    /// Consume the error and get access to the contained registry.
    pub fn into_inner(self) -> Registry<Conn> {
        self.0
    }
}

/// An ordered set of drivers; the first one accepting a URL handles it.
#[derive_where(Debug)]
pub struct Registry<Conn: Connection> {
    drivers: Vec<DebugIgnore<SharedDriver<Conn>>>,
}

impl<Conn: Connection> Registry<Conn> {
    /// Creates an empty registry.
    ///
    /// This also registers the crate's USDT probes, and hands back the
    /// registry in the `Err` variant if that fails.
    pub fn new() -> Result<Self, RegistrationError<Conn>> {
        let self_ = Self { drivers: vec![] };
        #[cfg(feature = "probes")]
        match usdt::register_probes() {
            Ok(_) => Ok(self_),
            Err(_) => Err(RegistrationError(self_)),
        }
        #[cfg(not(feature = "probes"))]
        Ok(self_)
    }

    pub fn register(&mut self, driver: SharedDriver<Conn>) {
        self.drivers.push(DebugIgnore(driver));
    }

    /// Returns the driver which would handle `url`.
    pub fn find(&self, url: &str) -> Option<&SharedDriver<Conn>> {
        self.drivers
            .iter()
            .map(|driver| &driver.0)
            .find(|driver| driver.accepts_url(url))
    }

    pub async fn connect(&self, url: &str) -> Result<Conn, Error> {
        let Some(driver) = self.find(url) else {
            return Err(Error::UnsupportedUrl(url.to_string()));
        };
        driver.connect(url).await
    }
}
