//! # Graphite output
//!
//! Metric lines in the plaintext protocol with tag support:
//!
//! ```text
//! raintank.apps.plugin.ns1.total;app=raintank-apps 12 1700000000
//! ```
//!
//! Publishing is best effort. Every publish call opens its own connection, failures are logged and reported as a
//! [`PublishOutcome`], never raised.

use std::{
    fmt,
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt as _,
    net::TcpStream,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tag {
    key: &'static str,
    value: String,
}

/// One `path[;tag=value...] value timestamp` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLine {
    path: String,
    tags: Vec<Tag>,
    value: i64,
    timestamp: i64,
}

impl MetricLine {
    pub fn new(path: impl Into<String>, value: i64, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            tags: Vec::new(),
            value,
            timestamp,
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl ToString) -> Self {
        self.tags.push(Tag {
            key,
            value: value.to_string(),
        });
        self
    }

    /// Tag whose value is wrapped in double quotes, used for free-form values like domains and API keys.
    pub fn quoted_tag(self, key: &'static str, value: impl fmt::Display) -> Self {
        self.tag(key, format!("\"{value}\""))
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for tag in &self.tags {
            write!(f, ";{}={}", tag.key, tag.value)?;
        }
        write!(f, " {} {}", self.value, self.timestamp)
    }
}

/// Newline terminated wire form of `lines`.
pub fn encode(lines: &[MetricLine]) -> String {
    lines.iter().map(|line| format!("{line}\n")).collect()
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent { lines: usize },
    /// Nothing to send, no connection was made.
    Skipped,
    /// Connecting or writing took longer than the configured ceiling.
    TimedOut,
    /// The host name did not resolve to any address.
    Unresolved,
    Failed(String),
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent { .. })
    }
}

/// Destination for rendered metric lines.
pub trait MetricsSink: Send + Sync {
    fn publish<'a>(&'a self, lines: &'a [MetricLine]) -> Pin<Box<dyn Future<Output = PublishOutcome> + Send + 'a>>;
}

/// Writes metric lines to a Graphite plaintext listener.
#[derive(Debug, Clone)]
pub struct GraphitePublisher {
    host: String,
    port: u16,
    timeout: Duration,
    delay: Duration,
}

#[derive(Debug)]
enum SendError {
    Unresolved(io::Error),
    NoAddress,
    NotAscii,
    Io(io::Error),
}

impl GraphitePublisher {
    /// `timeout` bounds connecting and writing together, `delay` is slept after every successful publish so
    /// back-to-back publishes do not flood the listener.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, delay: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            delay,
        }
    }

    async fn send(&self, payload: &str) -> Result<(), SendError> {
        if !payload.is_ascii() {
            return Err(SendError::NotAscii);
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(SendError::Unresolved)?
            .collect();
        if addrs.is_empty() {
            return Err(SendError::NoAddress);
        }

        let mut conn = TcpStream::connect(&addrs[..]).await.map_err(SendError::Io)?;
        conn.write_all(payload.as_bytes()).await.map_err(SendError::Io)?;
        conn.shutdown().await.map_err(SendError::Io)?;
        Ok(())
    }

    async fn publish_lines(&self, lines: &[MetricLine]) -> PublishOutcome {
        if lines.is_empty() {
            return PublishOutcome::Skipped;
        }

        info!("Publishing... {}:{}", self.host, self.port);
        let payload = encode(lines);

        match tokio::time::timeout(self.timeout, self.send(&payload)).await {
            Ok(Ok(())) => {
                debug!(lines = lines.len(), "published metrics");
                tokio::time::sleep(self.delay).await;
                PublishOutcome::Sent { lines: lines.len() }
            }
            Err(_elapsed) => {
                error!(
                    "Took over {} second(s) to connect to {}",
                    self.timeout.as_secs(),
                    self.host
                );
                PublishOutcome::TimedOut
            }
            Ok(Err(SendError::Unresolved(e))) => {
                error!(error = %e, "No address associated with hostname {}", self.host);
                PublishOutcome::Unresolved
            }
            Ok(Err(SendError::NoAddress)) => {
                error!("No address associated with hostname {}", self.host);
                PublishOutcome::Unresolved
            }
            Ok(Err(SendError::NotAscii)) => {
                let reason = "metric payload is not ASCII".to_string();
                error!("unknown exception while connecting to {} - {reason}", self.host);
                PublishOutcome::Failed(reason)
            }
            Ok(Err(SendError::Io(e))) => {
                error!("unknown exception while connecting to {} - {e}", self.host);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}

impl MetricsSink for GraphitePublisher {
    fn publish<'a>(&'a self, lines: &'a [MetricLine]) -> Pin<Box<dyn Future<Output = PublishOutcome> + Send + 'a>> {
        Box::pin(self.publish_lines(lines))
    }
}

/// Prints metric lines to stdout, for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl MetricsSink for StdoutSink {
    fn publish<'a>(&'a self, lines: &'a [MetricLine]) -> Pin<Box<dyn Future<Output = PublishOutcome> + Send + 'a>> {
        Box::pin(async move {
            if lines.is_empty() {
                return PublishOutcome::Skipped;
            }
            print!("{}", encode(lines));
            PublishOutcome::Sent { lines: lines.len() }
        })
    }
}
