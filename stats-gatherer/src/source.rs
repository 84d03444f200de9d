//! # Task source
//!
//! Reads every row of `task_server.task` through a single MySQL connection.

use crate::task::TaskRow;
use apps_stats_config::Config;
use eyre::{
    eyre,
    Context as _,
    Result,
};
use sqlx::{
    mysql::MySqlConnectOptions,
    ConnectOptions as _,
    Connection as _,
};
use std::{
    future::Future,
    pin::Pin,
    time::Duration,
};

/// Columns in table order. `interval` is a reserved word in MySQL.
const TASK_QUERY: &str =
    "SELECT id, name, config, `interval`, org_id, enabled, route, created, updated FROM task;";

/// Where task rows come from.
pub trait TaskSource: Send {
    fn fetch_tasks(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<TaskRow>>> + Send + '_>>;
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    options: MySqlConnectOptions,
    timeout: Duration,
}

impl TaskStore {
    pub fn new(options: MySqlConnectOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.sql_host)
            .port(config.sql_port)
            .username(&config.sql_user)
            .password(&config.sql_password)
            .database(&config.sql_database);
        Self::new(options, config.sql_timeout())
    }

    async fn fetch(&self) -> Result<Vec<TaskRow>> {
        let mut conn = tokio::time::timeout(self.timeout, self.options.connect())
            .await
            .map_err(|_| eyre!("connecting to MySQL took over {} second(s)", self.timeout.as_secs()))?
            .context("failed to connect to MySQL")?;

        let rows = tokio::time::timeout(
            self.timeout,
            sqlx::query_as::<_, TaskRow>(TASK_QUERY).fetch_all(&mut conn),
        )
        .await;

        // The connection is released whatever the query did.
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close MySQL connection");
        }

        let rows = rows
            .map_err(|_| eyre!("querying tasks took over {} second(s)", self.timeout.as_secs()))?
            .context("failed to query tasks")?;
        info!("Total Row(s): {}", rows.len());
        Ok(rows)
    }
}

impl TaskSource for TaskStore {
    fn fetch_tasks(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<TaskRow>>> + Send + '_>> {
        Box::pin(self.fetch())
    }
}
