use crate::{
    aggregate::Aggregator,
    graphite::{
        MetricsSink,
        PublishOutcome,
    },
    slug::{
        OrgSlugResolver,
        SlugCache,
    },
    source::TaskSource,
    summary::Summarizer,
    task::PluginEntry,
};
use eyre::{
    Context as _,
    Result,
};

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub stats: Aggregator,
    /// Publish outcome per summarizer that had lines to send, in publish order.
    pub published: Vec<(&'static str, PublishOutcome)>,
}

/// Fetch, classify, summarize and publish, strictly one step after the other.
pub struct StatsPipeline {
    source: Box<dyn TaskSource>,
    resolver: OrgSlugResolver,
    sink: Box<dyn MetricsSink>,
    summarizers: Vec<Box<dyn Summarizer>>,
}

impl StatsPipeline {
    pub fn new(
        source: impl TaskSource + 'static,
        resolver: OrgSlugResolver,
        sink: impl MetricsSink + 'static,
        summarizers: Vec<Box<dyn Summarizer>>,
    ) -> Self {
        Self {
            source: Box::new(source),
            resolver,
            sink: Box::new(sink),
            summarizers,
        }
    }

    /// Run once with every line stamped `timestamp`.
    ///
    /// A database or classification failure aborts before anything is published. Publish failures are absorbed
    /// and show up in [`RunReport::published`].
    pub async fn run(&mut self, timestamp: i64) -> Result<RunReport> {
        info!("Pulling stats from database");
        let rows = self.source.fetch_tasks().await.context("failed to fetch tasks")?;

        let mut stats = Aggregator::default();
        for row in &rows {
            let plugins = stats.classify(row)?;
            if plugins.iter().any(|p| matches!(p, PluginEntry::Dns { .. })) {
                self.resolver.resolve(row.org_id).await;
            }
        }

        let mut published = Vec::new();
        for summarizer in &self.summarizers {
            info!("Summary of {}", summarizer.name());
            let lines = summarizer.summarize(&stats, self.resolver.cache(), timestamp);
            if lines.is_empty() {
                continue;
            }
            let outcome = self.sink.publish(&lines).await;
            published.push((summarizer.name(), outcome));
        }

        Ok(RunReport { stats, published })
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &SlugCache {
        self.resolver.cache()
    }

    pub fn into_cache(self) -> SlugCache {
        self.resolver.into_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graphite::MetricLine,
        slug::{
            tests::FakeDirectory,
            SlugLookup,
        },
        summary::summarizers,
        task::{
            tests::row,
            TaskRow,
        },
    };
    use eyre::eyre;
    use pretty_assertions::assert_eq;
    use std::{
        future::Future,
        pin::Pin,
        sync::{
            atomic::Ordering,
            Arc,
            Mutex,
        },
    };

    struct FakeSource(Option<Vec<TaskRow>>);

    impl TaskSource for FakeSource {
        fn fetch_tasks(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<TaskRow>>> + Send + '_>> {
            let rows = self.0.clone();
            Box::pin(async move { rows.ok_or_else(|| eyre!("connection refused")) })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl MetricsSink for RecordingSink {
        fn publish<'a>(&'a self, lines: &'a [MetricLine]) -> Pin<Box<dyn Future<Output = PublishOutcome> + Send + 'a>> {
            self.batches
                .lock()
                .unwrap()
                .push(lines.iter().map(ToString::to_string).collect());
            Box::pin(async move { PublishOutcome::Sent { lines: lines.len() } })
        }
    }

    struct DroppingSink;

    impl MetricsSink for DroppingSink {
        fn publish<'a>(
            &'a self,
            _lines: &'a [MetricLine],
        ) -> Pin<Box<dyn Future<Output = PublishOutcome> + Send + 'a>> {
            Box::pin(async { PublishOutcome::Failed("connection refused".to_string()) })
        }
    }

    fn rows() -> Vec<TaskRow> {
        vec![
            row(1, r#"{"/raintank/apps/ns1":{"ns1_key":" k1 ","zone":"example.com"}}"#, 42, 1),
            row(2, r#"{"/raintank/apps/ns1":{"ns1_key":"k1","zone":"example.org"}}"#, 42, 1),
            row(3, r#"{"/raintank/apps/ns1":{"ns1_key":"k2","zone":"example.com"}}"#, 7, 0),
            row(4, r#"{"/raintank/apps/voxter":{"voxter_key":"v1"}}"#, 8, 1),
            row(5, r#"{"/raintank/apps/gitstats":{}}"#, 9, 1),
        ]
    }

    fn pipeline(
        rows: Option<Vec<TaskRow>>,
        directory: FakeDirectory,
        sink: impl MetricsSink + 'static,
    ) -> StatsPipeline {
        StatsPipeline::new(
            FakeSource(rows),
            OrgSlugResolver::new(directory, SlugCache::empty("unused.json")),
            sink,
            summarizers(false),
        )
    }

    #[tokio::test]
    async fn publishes_each_category_separately() {
        let sink = RecordingSink::default();
        let directory = FakeDirectory::with([(42, SlugLookup::Resolved("acme".to_string()))]);
        let mut pipeline = pipeline(Some(rows()), directory, sink.clone());

        let report = pipeline.run(1_700_000_000).await.unwrap();

        let names: Vec<_> = report.published.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["ns1", "voxter", "app"]);
        assert!(report.published.iter().all(|(_, outcome)| outcome.is_sent()));

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches[0].contains(
            &"raintank.apps.plugin.ns1.domain_count;app=raintank-apps;org_id=42;org_slug=acme 2 1700000000".to_string()
        ));
        assert!(batches[0].contains(
            &"raintank.apps.plugin.ns1.domain_count;app=raintank-apps;org_id=7;org_slug=unknown 1 1700000000"
                .to_string()
        ));
        assert!(batches[0].contains(
            &r#"raintank.apps.plugin.ns1.domains.org_id;app=raintank-apps;domain="example.com" 42 1700000000"#
                .to_string()
        ));
        assert_eq!(
            batches[2],
            vec![
                "raintank.apps.summary.tasks.total;app=raintank-apps 5 1700000000",
                "raintank.apps.summary.tasks.enabled;app=raintank-apps 4 1700000000",
                "raintank.apps.summary.tasks.disabled;app=raintank-apps 1 1700000000",
            ]
        );
        assert!(batches.iter().flatten().all(|line| line.ends_with(" 1700000000")));
    }

    #[tokio::test]
    async fn looks_up_each_dns_org_once() {
        let directory = FakeDirectory::default();
        let calls = directory.calls.clone();
        let mut pipeline = pipeline(Some(rows()), directory, RecordingSink::default());

        pipeline.run(0).await.unwrap();

        // Orgs 42 and 7 own DNS tasks, 8 and 9 do not.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.cache().len(), 2);
        assert_eq!(pipeline.into_cache().get(8), None);
    }

    #[tokio::test]
    async fn database_failure_publishes_nothing() {
        let sink = RecordingSink::default();
        let mut pipeline = pipeline(None, FakeDirectory::default(), sink.clone());

        assert!(pipeline.run(0).await.is_err());
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_row_aborts_the_run() {
        let sink = RecordingSink::default();
        let mut rows = rows();
        rows.insert(2, row(99, "{broken", 1, 1));
        let mut pipeline = pipeline(Some(rows), FakeDirectory::default(), sink.clone());

        let err = pipeline.run(0).await.unwrap_err();
        assert!(err.to_string().contains("task 99"));
        assert!(sink.batches.lock().unwrap().is_empty());
        // Lookups done before the bad row are kept for the cache file.
        assert_eq!(pipeline.cache().len(), 1);
    }

    #[tokio::test]
    async fn publish_failures_do_not_touch_aggregates() {
        let mut dropping = pipeline(Some(rows()), FakeDirectory::default(), DroppingSink);
        let mut recording = pipeline(Some(rows()), FakeDirectory::default(), RecordingSink::default());

        let dropped = dropping.run(0).await.unwrap();
        let recorded = recording.run(0).await.unwrap();

        assert_eq!(dropped.stats, recorded.stats);
        assert!(dropped
            .published
            .iter()
            .all(|(_, outcome)| matches!(outcome, PublishOutcome::Failed(_))));
    }
}
