//! Parsing for `jdbc:dataproc://hive/...` locators.
//!
//! A locator names a Hive endpoint indirectly: instead of a host, it carries
//! the project and region to search, and either an exact cluster name or a
//! label constraint describing a pool of clusters. Everything the driver does
//! not recognize is carried through to the downstream connection string.
//!
//! ```text
//! jdbc:dataproc://hive/<database>;<key>=<value>;...?<query>#<fragment>
//! ```

use std::collections::HashMap;
use thiserror::Error;

/// Every locator accepted by [parse] starts with this prefix.
pub const LOCATOR_PREFIX: &str = "jdbc:dataproc://hive/";

const JDBC_PREFIX: &str = "jdbc:";
const SCHEME_PREFIX: &str = "dataproc://";
const AUTHORITY: &str = "hive";

pub const DEFAULT_DATABASE: &str = "";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_HTTP_PATH: &str = "cliservice";
pub const DEFAULT_TRANSPORT_MODE: &str = "http";

/// The locator (or the pool constraint it carries) violates the grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed locator: {0}")]
pub struct MalformedLocator(pub String);

impl MalformedLocator {
    pub(crate) fn new(msg: impl ToString) -> Self {
        Self(msg.to_string())
    }
}

/// Session keys owned by the driver, which never reach the session extras.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ReservedKey {
    ProjectId,
    Region,
    ClusterName,
    ClusterPoolLabel,
    Port,
    HttpPath,
    TransportMode,
}

impl ReservedKey {
    const ALL: [ReservedKey; 7] = [
        ReservedKey::ProjectId,
        ReservedKey::Region,
        ReservedKey::ClusterName,
        ReservedKey::ClusterPoolLabel,
        ReservedKey::Port,
        ReservedKey::HttpPath,
        ReservedKey::TransportMode,
    ];

    const fn as_str(&self) -> &'static str {
        match self {
            ReservedKey::ProjectId => "projectId",
            ReservedKey::Region => "region",
            ReservedKey::ClusterName => "clusterName",
            ReservedKey::ClusterPoolLabel => "clusterPoolLabel",
            ReservedKey::Port => "port",
            ReservedKey::HttpPath => "httpPath",
            ReservedKey::TransportMode => "transportMode",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reserved| reserved.as_str() == key)
    }
}

/// Validated connection options, built once per connection request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    project_id: String,
    region: String,
    cluster_name: Option<String>,
    cluster_pool_label: Option<String>,
    database: String,
    port: u16,
    http_path: String,
    transport_mode: String,
    session_extras: Option<String>,
    query_extras: Option<String>,
    fragment_extras: Option<String>,
}

impl ConnectionOptions {
    /// Creates options targeting the whole pool of active clusters in
    /// `project_id`/`region`, with every other field at its default.
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            cluster_name: None,
            cluster_pool_label: None,
            database: DEFAULT_DATABASE.to_string(),
            port: DEFAULT_PORT,
            http_path: DEFAULT_HTTP_PATH.to_string(),
            transport_mode: DEFAULT_TRANSPORT_MODE.to_string(),
            session_extras: None,
            query_extras: None,
            fragment_extras: None,
        }
    }

    pub fn with_cluster_name(self, name: impl Into<String>) -> Self {
        Self {
            cluster_name: Some(name.into()),
            ..self
        }
    }

    pub fn with_cluster_pool_label(self, label: impl Into<String>) -> Self {
        Self {
            cluster_pool_label: Some(label.into()),
            ..self
        }
    }

    pub fn with_database(self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self
        }
    }

    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    pub fn with_session_extras(self, extras: impl Into<String>) -> Self {
        Self {
            session_extras: Some(extras.into()),
            ..self
        }
    }

    pub fn with_query_extras(self, extras: impl Into<String>) -> Self {
        Self {
            query_extras: Some(extras.into()),
            ..self
        }
    }

    pub fn with_fragment_extras(self, extras: impl Into<String>) -> Self {
        Self {
            fragment_extras: Some(extras.into()),
            ..self
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// If set, resolution looks up exactly this cluster and ignores
    /// [Self::cluster_pool_label].
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// The raw, unparsed `field=value:field=value` pool constraint.
    pub fn cluster_pool_label(&self) -> Option<&str> {
        self.cluster_pool_label.as_deref()
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn http_path(&self) -> &str {
        &self.http_path
    }

    pub fn transport_mode(&self) -> &str {
        &self.transport_mode
    }

    /// Unreserved `key=value` session pairs, joined by `;`, in the order
    /// they appeared in the locator.
    pub fn session_extras(&self) -> Option<&str> {
        self.session_extras.as_deref()
    }

    pub fn query_extras(&self) -> Option<&str> {
        self.query_extras.as_deref()
    }

    pub fn fragment_extras(&self) -> Option<&str> {
        self.fragment_extras.as_deref()
    }
}

/// Returns true if `url` looks like a locator handled by this crate.
///
/// This is only a prefix check; [parse] reports what is actually wrong with
/// an accepted but invalid locator.
pub fn accepts_url(url: &str) -> bool {
    url.starts_with(LOCATOR_PREFIX)
}

/// Parses a locator into [ConnectionOptions].
pub fn parse(url: &str) -> Result<ConnectionOptions, MalformedLocator> {
    let rest = url
        .strip_prefix(JDBC_PREFIX)
        .and_then(|rest| rest.strip_prefix(SCHEME_PREFIX))
        .ok_or_else(|| {
            MalformedLocator::new(format!("'{url}' must start with {LOCATOR_PREFIX}"))
        })?;

    // The fragment starts at the first '#', and may itself contain '?'.
    let (rest, fragment_extras) = split_off(rest, '#');
    let (rest, query_extras) = split_off(rest, '?');

    let Some((authority, path)) = rest.split_once('/') else {
        return Err(MalformedLocator::new(format!(
            "'{url}' is missing the database path, expected {LOCATOR_PREFIX}<database>;..."
        )));
    };
    if authority != AUTHORITY {
        return Err(MalformedLocator::new(format!(
            "'{authority}' is not a supported service, expected '{AUTHORITY}'"
        )));
    }

    let mut segments: Vec<&str> = path.split(';').collect();
    // A trailing ';' is tolerated, but not an empty pair in the middle.
    while segments.len() > 1 && segments.last() == Some(&"") {
        segments.pop();
    }

    let database = segments[0];
    if database.contains('=') {
        return Err(MalformedLocator::new(format!(
            "'{database}' Database name must not contain '='. \
             If no database is specified, the format should be: {LOCATOR_PREFIX};projectId=<projectId>;region=<region>"
        )));
    }

    let pairs = session_pairs(&segments[1..])?;

    let mut reserved = HashMap::new();
    let mut session_extras = vec![];
    for (key, value) in pairs {
        match ReservedKey::from_key(key) {
            Some(key) => {
                reserved.insert(key, value);
            }
            None => session_extras.push(format!("{key}={value}")),
        }
    }

    for managed in [ReservedKey::HttpPath, ReservedKey::TransportMode] {
        if reserved.contains_key(&managed) {
            return Err(MalformedLocator::new(format!(
                "Invalid variable '{}': it is managed by the driver, please do not include it",
                managed.as_str()
            )));
        }
    }

    let required = |key: ReservedKey| -> Result<String, MalformedLocator> {
        match reserved.get(&key) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => {
                let key = key.as_str();
                Err(MalformedLocator::new(format!("Please provide {key}")))
            }
        }
    };
    let project_id = required(ReservedKey::ProjectId)?;
    let region = required(ReservedKey::Region)?;

    let port = match reserved.get(&ReservedKey::Port) {
        Some(port) => parse_port(port)?,
        None => DEFAULT_PORT,
    };

    let optional = |key: ReservedKey| reserved.get(&key).map(|value| value.to_string());

    Ok(ConnectionOptions {
        project_id,
        region,
        cluster_name: optional(ReservedKey::ClusterName),
        cluster_pool_label: optional(ReservedKey::ClusterPoolLabel),
        database: database.to_string(),
        port,
        http_path: DEFAULT_HTTP_PATH.to_string(),
        transport_mode: DEFAULT_TRANSPORT_MODE.to_string(),
        session_extras: (!session_extras.is_empty()).then(|| session_extras.join(";")),
        query_extras: query_extras.map(str::to_string),
        fragment_extras: fragment_extras.map(str::to_string),
    })
}

// Splits `s` at the first `delim`, returning the text on either side.
fn split_off(s: &str, delim: char) -> (&str, Option<&str>) {
    match s.split_once(delim) {
        Some((head, tail)) => (head, Some(tail)),
        None => (s, None),
    }
}

// Collects `key=value` segments, keeping the position where each key was
// first seen. Values may contain '=', so only the first one separates.
fn session_pairs<'a>(segments: &[&'a str]) -> Result<Vec<(&'a str, &'a str)>, MalformedLocator> {
    let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(segments.len());
    for segment in segments {
        let Some((key, value)) = segment.split_once('=') else {
            return Err(MalformedLocator::new(format!(
                "'{segment}' Please provide session configs in the format key=value"
            )));
        };
        if key.is_empty() {
            return Err(MalformedLocator::new(format!(
                "'{segment}' Session config keys must not be empty"
            )));
        }
        match pairs.iter_mut().find(|(seen, _)| *seen == key) {
            Some(pair) => pair.1 = value,
            None => pairs.push((key, value)),
        }
    }
    Ok(pairs)
}

fn parse_port(port: &str) -> Result<u16, MalformedLocator> {
    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(MalformedLocator::new(format!(
            "'port={port}' Please indicate a correct port number or remove the field"
        ))),
    }
}
