use clap::Parser;
use std::path::PathBuf;

/// Send raintank-apps database stats to graphite
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Optional config file, used instead of `config.yaml` in the config directory.
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// MySQL hostname
    #[clap(long = "sqlhost", value_name = "HOST")]
    pub sql_host: Option<String>,

    /// MySQL port
    #[clap(long = "sqlport", value_name = "PORT")]
    pub sql_port: Option<u16>,

    /// MySQL username
    #[clap(long = "sqluser", value_name = "USER")]
    pub sql_user: Option<String>,

    /// MySQL password
    #[clap(long = "sqlpassword", value_name = "PASSWORD")]
    pub sql_password: Option<String>,

    /// MySQL database holding the task table
    #[clap(long = "sqldatabase", value_name = "DATABASE")]
    pub sql_database: Option<String>,

    /// graphite hostname
    #[clap(long = "graphite-host", value_name = "HOST")]
    pub graphite_host: Option<String>,

    /// graphite port
    #[clap(long = "graphite-port", value_name = "PORT")]
    pub graphite_port: Option<u16>,

    /// Base URL of the organization directory used for slug lookups.
    #[clap(long = "directory-url", value_name = "URL")]
    pub directory_url: Option<String>,

    /// Where resolved org slugs are cached between runs.
    #[clap(long = "cache-file", value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// Also publish the gitstats and unknown-plugin triads.
    #[clap(long = "emit-gap-metrics", action)]
    pub emit_gap_metrics: bool,

    /// Exit with a nonzero status when the pipeline fails.
    #[clap(long = "fail-on-error", action)]
    pub fail_on_error: bool,

    /// Print metric lines to stdout instead of sending them to graphite.
    #[clap(long = "dry-run", action)]
    pub dry_run: bool,

    /// Append logs to this file in addition to stderr.
    #[clap(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Enables debug logging.
    #[clap(short, long, action)]
    pub verbose: bool,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(host) = &self.sql_host {
                cache.insert("sql_host".to_string(), host.clone().into());
            }
            if let Some(port) = self.sql_port {
                cache.insert("sql_port".to_string(), (port as u64).into());
            }
            if let Some(user) = &self.sql_user {
                cache.insert("sql_user".to_string(), user.clone().into());
            }
            if let Some(password) = &self.sql_password {
                cache.insert("sql_password".to_string(), password.clone().into());
            }
            if let Some(database) = &self.sql_database {
                cache.insert("sql_database".to_string(), database.clone().into());
            }
            if let Some(host) = &self.graphite_host {
                cache.insert("graphite_host".to_string(), host.clone().into());
            }
            if let Some(port) = self.graphite_port {
                cache.insert("graphite_port".to_string(), (port as u64).into());
            }
            if let Some(url) = &self.directory_url {
                cache.insert("directory_url".to_string(), url.clone().into());
            }
            if let Some(cache_file) = &self.cache_file {
                cache.insert("cache_file".to_string(), cache_file.display().to_string().into());
            }
            if let Some(log_file) = &self.log_file {
                cache.insert("log_file".to_string(), log_file.display().to_string().into());
            }
            // Flags only ever switch behavior on; absence leaves lower layers in charge.
            if self.emit_gap_metrics {
                cache.insert("emit_gap_metrics".to_string(), true.into());
            }
            if self.fail_on_error {
                cache.insert("fail_on_error".to_string(), true.into());
            }
            if self.dry_run {
                cache.insert("dry_run".to_string(), true.into());
            }
            if self.verbose {
                cache.insert("verbose".to_string(), true.into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "\
{}

Authors: {author}

Config directory: {config_dir_path}",
        clap::crate_version!()
    )
}
