#[macro_use]
extern crate tracing;

mod logging;

use apps_stats_config::Config;
use apps_stats_gatherer::{
    summarizers,
    GraphitePublisher,
    HttpOrgDirectory,
    OrgSlugResolver,
    SlugCache,
    StatsPipeline,
    StdoutSink,
    TaskStore,
};
use color_eyre::Result;
use eyre::eyre;
pub use logging::init_logging;

pub fn init_errors() -> Result<()> {
    color_eyre::install()
}

/// One stats run: load the slug cache, run the pipeline, write the cache back.
///
/// Failures are logged. They only surface as an error when `fail_on_error` is set.
pub async fn run(config: Config) -> Result<()> {
    let timestamp = chrono::Utc::now().timestamp();

    let resolver = OrgSlugResolver::new(
        HttpOrgDirectory::new(config.directory_url.clone(), config.directory_timeout())?,
        SlugCache::load(&config.cache_file),
    );
    let source = TaskStore::from_config(&config);
    let summarizers = summarizers(config.emit_gap_metrics);

    let mut pipeline = if config.dry_run {
        StatsPipeline::new(source, resolver, StdoutSink, summarizers)
    } else {
        let publisher = GraphitePublisher::new(
            config.graphite_host.clone(),
            config.graphite_port,
            config.graphite_timeout(),
            config.publish_delay(),
        );
        StatsPipeline::new(source, resolver, publisher, summarizers)
    };

    let mut failures = Vec::new();
    match pipeline.run(timestamp).await {
        Ok(report) => {
            let overall = report.stats.overall;
            info!(
                tasks = overall.total,
                enabled = overall.enabled,
                disabled = overall.disabled,
                unknown_plugins = report.stats.unknown.total,
                "stats run finished"
            );
            let lost: Vec<_> = report
                .published
                .iter()
                .filter(|(_, outcome)| !outcome.is_sent())
                .map(|(name, _)| *name)
                .collect();
            if !lost.is_empty() {
                warn!(?lost, "metrics for some categories were not delivered");
                failures.push(format!("metrics not delivered for {}", lost.join(", ")));
            }
        }
        Err(e) => {
            error!("{e:#}");
            failures.push(format!("{e:#}"));
        }
    }

    if let Err(e) = pipeline.into_cache().save() {
        error!("{e:#}");
        failures.push(format!("{e:#}"));
    }

    if config.fail_on_error && !failures.is_empty() {
        return Err(eyre!("stats run failed: {}", failures.join("; ")));
    }
    Ok(())
}
