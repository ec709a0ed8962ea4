//! Rendering of the downstream Hive connection string.

use crate::auth::PROXY_AUTHORIZATION_SESSION_KEY;
use crate::locator::ConnectionOptions;

/// The scheme understood by the downstream Hive client.
pub const HIVE_PROTOCOL: &str = "jdbc:hive2";

/// A rendered connection string for the downstream Hive client:
///
/// ```text
/// <protocol>://<host>:<port>/<database>;transportMode=<mode>;httpPath=<path>[;<auth>][;<session>][?<query>][#<fragment>]
/// ```
///
/// The string may embed a live bearer token; its `Debug` output hides it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString(String);

impl ConnectionString {
    /// Renders a connection string to `host`.
    ///
    /// `auth` holds session parameters placed directly after the
    /// driver-managed ones; see [crate::auth::Authentication].
    pub fn render(
        protocol: &str,
        host: &str,
        options: &ConnectionOptions,
        auth: &[(String, String)],
    ) -> Self {
        let mut url = format!(
            "{protocol}://{host}:{port}/{database};transportMode={mode};httpPath={path}",
            port = options.port(),
            database = options.database(),
            mode = options.transport_mode(),
            path = options.http_path(),
        );
        for (key, value) in auth {
            url.push(';');
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }
        if let Some(session) = options.session_extras() {
            url.push(';');
            url.push_str(session);
        }
        if let Some(query) = options.query_extras() {
            url.push('?');
            url.push_str(query);
        }
        if let Some(fragment) = options.fragment_extras() {
            url.push('#');
            url.push_str(fragment);
        }
        Self(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The connection string with any embedded bearer token replaced.
    pub fn redacted(&self) -> String {
        let marker = format!("{PROXY_AUTHORIZATION_SESSION_KEY}=");
        let Some(start) = self.0.find(&marker).map(|i| i + marker.len()) else {
            return self.0.clone();
        };
        let end = self.0[start..]
            .find([';', '?', '#'])
            .map(|i| start + i)
            .unwrap_or(self.0.len());
        format!("{}<redacted>{}", &self.0[..start], &self.0[end..])
    }
}

impl std::fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionString")
            .field(&self.redacted())
            .finish()
    }
}

impl AsRef<str> for ConnectionString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
