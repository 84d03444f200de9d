//! # Task rows
//!
//! One record of `task_server.task` and the plugin configuration embedded in its `config` column.
//!
//! The `config` column is a JSON object keyed by plugin type, each value holding that plugin's settings:
//!
//! ```json
//! {"/raintank/apps/ns1": {"ns1_key": "abc", "zone": "example.com"}}
//! ```

use chrono::NaiveDateTime;
use serde_json::{
    Map,
    Value,
};

pub type OrgId = i64;

pub const DNS_PLUGIN: &str = "/raintank/apps/ns1";
pub const TELEPHONY_PLUGIN: &str = "/raintank/apps/voxter";
pub const REPO_STATS_PLUGIN: &str = "/raintank/apps/gitstats";

const DNS_API_KEY: &str = "ns1_key";
const DNS_ZONE: &str = "zone";
const TELEPHONY_API_KEY: &str = "voxter_key";

/// A row of `task_server.task`, columns in table order.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub name: String,
    pub config: String,
    pub interval: i64,
    pub org_id: OrgId,
    pub enabled: i8,
    pub route: String,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl TaskRow {
    pub fn is_enabled(&self) -> bool {
        self.enabled == 1
    }

    /// Parse and validate every plugin entry in the row's config.
    ///
    /// Validation happens up front so a rejected row leaves no partial counts behind.
    pub fn plugins(&self) -> Result<Vec<PluginEntry>, ClassifyError> {
        let config: Map<String, Value> =
            serde_json::from_str(&self.config).map_err(|source| ClassifyError::MalformedConfig {
                row_id: self.id,
                source,
            })?;

        config
            .iter()
            .map(|(plugin_type, settings)| PluginEntry::parse(self.id, plugin_type, settings))
            .collect()
    }
}

/// The recognized shape of one plugin entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEntry {
    Dns { api_key: String, zone: Option<String> },
    Telephony { api_key: String },
    RepoStats,
    Unknown(String),
}

impl PluginEntry {
    fn parse(row_id: i64, plugin_type: &str, settings: &Value) -> Result<Self, ClassifyError> {
        match plugin_type {
            DNS_PLUGIN => {
                let api_key = required_trimmed(row_id, plugin_type, settings, DNS_API_KEY)?;
                let zone = match settings.get(DNS_ZONE) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(zone)) => Some(zone.trim().to_string()),
                    Some(_) => {
                        return Err(ClassifyError::InvalidZone {
                            row_id,
                            plugin: plugin_type.to_string(),
                        })
                    }
                };
                Ok(Self::Dns { api_key, zone })
            }
            TELEPHONY_PLUGIN => Ok(Self::Telephony {
                api_key: required_trimmed(row_id, plugin_type, settings, TELEPHONY_API_KEY)?,
            }),
            REPO_STATS_PLUGIN => Ok(Self::RepoStats),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

fn required_trimmed(row_id: i64, plugin: &str, settings: &Value, field: &'static str) -> Result<String, ClassifyError> {
    settings
        .get(field)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .ok_or_else(|| ClassifyError::MissingApiKey {
            row_id,
            plugin: plugin.to_string(),
            field,
        })
}

/// A row the classifier cannot account for. Any of these aborts the run.
#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    #[error("task {row_id} has a malformed config: {source}")]
    MalformedConfig {
        row_id: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("task {row_id}: plugin {plugin} has no string `{field}` setting")]
    MissingApiKey {
        row_id: i64,
        plugin: String,
        field: &'static str,
    },
    #[error("task {row_id}: plugin {plugin} has a non-string `zone` setting")]
    InvalidZone { row_id: i64, plugin: String },
}
