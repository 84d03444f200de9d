//! # raintank-apps Stats Gatherer
//!
//! Turns the raintank-apps task table into Graphite metrics.
//!
//! ## Features
//!
//! - **Task totals**: enabled, disabled and total counts over every task
//! - **DNS (ns1) breakdown**: tasks per org (tagged with the org slug), per API key and per domain
//! - **Telephony (voxter) breakdown**: tasks per org and per API key
//! - **Org slugs**: resolved once per org through the organization directory and cached on disk
//!
//! ## Architecture
//!
//! - **`task`**: The task row and the plugin entries embedded in its config
//! - **`aggregate`**: Counters and groupings, filled by [`Aggregator::classify`]
//! - **`slug`**: Org slug resolution and its on-disk cache
//! - **`summary`**: One [`Summarizer`] per category, rendering metric lines
//! - **`graphite`**: Metric lines and the sinks that publish them
//! - **`source`**: The MySQL task source
//! - **`pipeline`**: [`StatsPipeline`] runs all of the above in order
//!
//! Everything runs sequentially: one query, one pass over the rows, at most one directory lookup per org and one
//! Graphite connection per category.

#[macro_use]
extern crate tracing;

pub mod aggregate;
pub mod graphite;
pub mod pipeline;
pub mod slug;
pub mod source;
pub mod summary;
pub mod task;

pub use aggregate::Aggregator;
pub use graphite::{
    GraphitePublisher,
    MetricLine,
    MetricsSink,
    PublishOutcome,
    StdoutSink,
};
pub use pipeline::{
    RunReport,
    StatsPipeline,
};
pub use slug::{
    HttpOrgDirectory,
    OrgSlugResolver,
    SlugCache,
};
pub use source::{
    TaskSource,
    TaskStore,
};
pub use summary::{
    summarizers,
    Summarizer,
};
pub use task::TaskRow;
