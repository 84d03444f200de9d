#[macro_use]
extern crate tracing;

mod app_config;
mod args;

pub use app_config::get_config_dir;
pub use args::Args;
use eyre::{
    Context as _,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    path::PathBuf,
    time::Duration,
};

/// Effective settings for one stats run.
///
/// Layers, lowest first: the embedded defaults, `config.yaml` (or `--config`), `APPS_STATS_*` environment
/// variables, command-line flags.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub sql_host: String,
    pub sql_port: u16,
    pub sql_user: String,
    pub sql_password: String,
    pub sql_database: String,
    pub sql_timeout_secs: u64,
    pub graphite_host: String,
    pub graphite_port: u16,
    pub graphite_timeout_secs: u64,
    pub publish_delay_ms: u64,
    pub directory_url: url::Url,
    pub directory_timeout_secs: u64,
    pub cache_file: PathBuf,
    #[serde(default)]
    pub emit_gap_metrics: bool,
    #[serde(default)]
    pub fail_on_error: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    pub fn new(args: Args) -> Result<Self> {
        let config_file = match &args.config {
            Some(file) => config::File::from(file.clone()).required(true),
            None => config::File::from(get_config_dir().join("config.yaml")).required(false),
        };

        let cfg: Self = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml))
            .add_source(config_file.format(config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix(&app_config::PROJECT_NAME).try_parsing(true))
            .add_source(args)
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        debug!(?cfg.sql_host, cfg.sql_port, ?cfg.graphite_host, cfg.graphite_port, "loaded configuration");
        Ok(cfg)
    }

    pub fn sql_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_timeout_secs)
    }

    pub fn graphite_timeout(&self) -> Duration {
        Duration::from_secs(self.graphite_timeout_secs)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }
}
