//! The interface for opening connections to a resolved endpoint.
//!
//! This crate stops at a rendered [ConnectionString]; speaking the Hive
//! protocol is left to a [Connector] supplied by the caller.

use crate::render::ConnectionString;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Interface for raw connections.
pub trait Connection: Send + 'static {}

impl<T> Connection for T where T: Send + 'static {}

/// Describes how a connection to a resolved endpoint should be constructed.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Creates a connection to the endpoint named by `url`.
    async fn connect(&self, url: &ConnectionString) -> Result<Self::Connection, Error>;
}

pub type SharedConnector<Conn> = Arc<dyn Connector<Connection = Conn>>;
