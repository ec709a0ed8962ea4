//! Implementation of [FleetClient] for the Dataproc REST API

use crate::auth::{current_token, SharedCredentials};
use crate::cluster::ClusterRecord;
use crate::fleet::{Error, FleetClient};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{event, instrument, Level};

/// Configuration options which may be supplied to [DataprocFleet].
#[derive(Clone, Debug)]
pub struct DataprocFleetConfig {
    /// Base URL of the Dataproc API, without a trailing slash.
    ///
    /// Default: None, meaning the regional endpoint
    /// `https://<region>-dataproc.googleapis.com`.
    pub endpoint: Option<String>,

    /// Timeout for each request to the API, including every page of a
    /// listing.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,
}

impl Default for DataprocFleetConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ListClustersResponse {
    #[serde(default)]
    clusters: Vec<ClusterRecord>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// A [`FleetClient`] which talks to the Dataproc cluster controller.
pub struct DataprocFleet {
    client: reqwest::Client,
    credentials: SharedCredentials,
    config: DataprocFleetConfig,
}

impl DataprocFleet {
    pub fn new(credentials: SharedCredentials, config: DataprocFleetConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Other(e.into()))?;
        Ok(Self::with_client(client, credentials, config))
    }

    /// Uses an existing HTTP client. [DataprocFleetConfig::request_timeout]
    /// is ignored in favor of the client's own settings.
    pub fn with_client(
        client: reqwest::Client,
        credentials: SharedCredentials,
        config: DataprocFleetConfig,
    ) -> Self {
        Self {
            client,
            credentials,
            config,
        }
    }

    // Caller-supplied names are pushed as single, percent-encoded path
    // segments; a '/' in a cluster name can't reach another resource.
    fn clusters_url(
        &self,
        project_id: &str,
        region: &str,
        cluster_name: Option<&str>,
    ) -> Result<reqwest::Url, Error> {
        let base = match &self.config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{region}-dataproc.googleapis.com"),
        };
        let mut url = reqwest::Url::parse(&base).map_err(|e| Error::Other(e.into()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Other(anyhow::anyhow!("{base} cannot be a base URL")))?;
            segments
                .pop_if_empty()
                .extend(["v1", "projects", project_id, "regions", region, "clusters"]);
            if let Some(cluster_name) = cluster_name {
                segments.push(cluster_name);
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, Error> {
        let token = current_token(self.credentials.as_ref())
            .await
            .map_err(|e| Error::Other(e.into()))?;
        let response = request
            .bearer_auth(token.value())
            .send()
            .await
            .map_err(|e| Error::Other(e.into()))?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| Error::Other(e.into()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        event!(Level::DEBUG, %status, error = %message, "Dataproc API request failed");
        if status == http::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(what.to_string()));
        }
        Err(Error::Api { status, message })
    }
}

#[async_trait]
impl FleetClient for DataprocFleet {
    #[instrument(skip(self), err, name = "DataprocFleet::get_cluster")]
    async fn get_cluster(
        &self,
        project_id: &str,
        region: &str,
        cluster_name: &str,
    ) -> Result<ClusterRecord, Error> {
        let url = self.clusters_url(project_id, region, Some(cluster_name))?;
        self.send(
            self.client.get(url),
            &format!("{project_id}/{region}/{cluster_name}"),
        )
        .await
    }

    #[instrument(skip(self), err, name = "DataprocFleet::list_clusters")]
    async fn list_clusters(
        &self,
        project_id: &str,
        region: &str,
        filter: &str,
    ) -> Result<Vec<ClusterRecord>, Error> {
        let url = self.clusters_url(project_id, region, None)?;
        let mut clusters = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(url.clone()).query(&[("filter", filter)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListClustersResponse = self
                .send(request, &format!("{project_id}/{region}"))
                .await?;
            event!(
                Level::DEBUG,
                listed = page.clusters.len(),
                more = page.next_page_token.is_some(),
                "Listed page of clusters"
            );
            clusters.extend(page.clusters);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(clusters)
    }
}
