//! Translation of pool constraints into fleet API filter expressions.
//!
//! A pool constraint is written by the caller as `field=value` assertions
//! separated by `:`, for example `com=google:team=dataproc`. The fleet API
//! expects `key = value` equalities joined by ` AND `, with labels addressed
//! as `labels.<field>`:
//!
//! ```text
//! status.state = ACTIVE AND labels.com = google AND labels.team = dataproc
//! ```
//!
//! The status assertion is always present, and always first.

use crate::cluster::ClusterRecord;
use crate::locator::MalformedLocator;

use thiserror::Error;

pub const STATUS_KEY: &str = "status.state";
pub const ACTIVE: &str = "ACTIVE";
pub const CLUSTER_NAME_KEY: &str = "clusterName";
pub const LABEL_PREFIX: &str = "labels.";

const ASSERTION_SEPARATOR: char = ':';
const CONJUNCTION: &str = " AND ";
const EQUALITY: &str = " = ";

/// A filter expression which cannot be evaluated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid filter expression: {0}")]
pub struct InvalidFilter(pub String);

/// An ordered conjunction of `key = value` equalities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolFilter {
    assertions: Vec<(String, String)>,
}

impl PoolFilter {
    /// The filter matching every active cluster.
    pub fn active() -> Self {
        Self {
            assertions: vec![(STATUS_KEY.to_string(), ACTIVE.to_string())],
        }
    }

    /// Builds a filter from a caller-supplied pool constraint.
    ///
    /// `None` produces [Self::active].
    pub fn from_pool_label(pool_label: Option<&str>) -> Result<Self, MalformedLocator> {
        let mut filter = Self::active();
        let Some(pool_label) = pool_label else {
            return Ok(filter);
        };

        for label in pool_label.split(ASSERTION_SEPARATOR) {
            let (field, value) = match label.split_once('=') {
                Some((field, value)) if is_token(field) && is_token(value) => (field, value),
                _ => {
                    return Err(MalformedLocator::new(format!(
                        "'{label}' Invalid clusterPoolLabel. \
                         Example format: clusterPoolLabel=field1=value1:field2=value2"
                    )))
                }
            };

            if field == STATUS_KEY {
                return Err(MalformedLocator::new(
                    "Please do not provide cluster status as a label, \
                     only clusters with status.state = ACTIVE are considered",
                ));
            }

            let key = if field == CLUSTER_NAME_KEY {
                field.to_string()
            } else {
                format!("{LABEL_PREFIX}{field}")
            };
            if filter.get(&key).is_some() {
                return Err(MalformedLocator::new(format!(
                    "{key}: the key portion of a label must be unique"
                )));
            }
            filter.assertions.push((key, value.to_string()));
        }
        Ok(filter)
    }

    /// Parses an expression in the form produced by this type's `Display`.
    pub fn parse(expression: &str) -> Result<Self, InvalidFilter> {
        let mut assertions = vec![];
        for term in expression.split(CONJUNCTION) {
            let Some((key, value)) = term.split_once(EQUALITY) else {
                return Err(InvalidFilter(format!("'{term}' is not an equality")));
            };
            let key = key.trim();
            let value = value.trim();
            let known = key == STATUS_KEY
                || key == CLUSTER_NAME_KEY
                || key
                    .strip_prefix(LABEL_PREFIX)
                    .is_some_and(|label| !label.is_empty());
            if !known || value.is_empty() || value.contains(char::is_whitespace) {
                return Err(InvalidFilter(format!("'{term}' cannot be evaluated")));
            }
            assertions.push((key.to_string(), value.to_string()));
        }
        Ok(Self { assertions })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.assertions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn assertions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.assertions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Evaluates the filter against a cluster, the way the fleet API would.
    pub fn matches(&self, cluster: &ClusterRecord) -> bool {
        self.assertions().all(|(key, value)| match key {
            STATUS_KEY if value == ACTIVE => cluster.state().is_active(),
            STATUS_KEY => cluster.state().as_str() == value,
            CLUSTER_NAME_KEY => cluster.cluster_name == value,
            _ => key
                .strip_prefix(LABEL_PREFIX)
                .and_then(|label| cluster.labels.get(label))
                .is_some_and(|actual| actual == value),
        })
    }
}

impl std::fmt::Display for PoolFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (key, value)) in self.assertions.iter().enumerate() {
            if i > 0 {
                f.write_str(CONJUNCTION)?;
            }
            write!(f, "{key}{EQUALITY}{value}")?;
        }
        Ok(())
    }
}

// Pool constraint fields and values end up verbatim in the filter
// expression, so they must not be able to spell out another equality.
fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.contains(char::is_whitespace)
}

/// Formats a pool constraint as a fleet API filter expression.
pub fn format_pool_filter(pool_label: Option<&str>) -> Result<String, MalformedLocator> {
    PoolFilter::from_pool_label(pool_label).map(|filter| filter.to_string())
}
