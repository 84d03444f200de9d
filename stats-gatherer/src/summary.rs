//! # Summaries
//!
//! Each [`Summarizer`] renders one category of the finished [`Aggregator`] into metric lines. All lines of a run
//! share the run's start timestamp.
//!
//! Repository stats and unknown plugins are log-only unless gap metrics are switched on, so the default output
//! has the same series as always.

use crate::{
    aggregate::{
        Aggregator,
        Triad,
    },
    graphite::MetricLine,
    slug::SlugCache,
};

/// Value of the `app` tag carried by every line.
pub const APP_TAG: &str = "raintank-apps";

const SUMMARY_PREFIX: &str = "raintank.apps.summary.tasks";
const DNS_PREFIX: &str = "raintank.apps.plugin.ns1";
const TELEPHONY_PREFIX: &str = "raintank.apps.plugin.voxter";
const REPO_STATS_PREFIX: &str = "raintank.apps.plugin.gitstats";
const UNKNOWN_PREFIX: &str = "raintank.apps.plugin.unknown";

pub trait Summarizer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Log a human readable summary and return the lines to publish. May be empty.
    fn summarize(&self, stats: &Aggregator, slugs: &SlugCache, timestamp: i64) -> Vec<MetricLine>;
}

/// All summarizers in publish order.
pub fn summarizers(emit_gap_metrics: bool) -> Vec<Box<dyn Summarizer>> {
    vec![
        Box::new(DnsSummary),
        Box::new(TelephonySummary),
        Box::new(RepoStatsSummary { emit_gap_metrics }),
        Box::new(UnknownSummary { emit_gap_metrics }),
        Box::new(OverallSummary),
    ]
}

fn line(path: String, value: u64, timestamp: i64) -> MetricLine {
    MetricLine::new(path, value as i64, timestamp).tag("app", APP_TAG)
}

fn triad_lines(prefix: &str, triad: &Triad, timestamp: i64) -> Vec<MetricLine> {
    vec![
        line(format!("{prefix}.total"), triad.total, timestamp),
        line(format!("{prefix}.enabled"), triad.enabled, timestamp),
        line(format!("{prefix}.disabled"), triad.disabled, timestamp),
    ]
}

/// Every task in the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverallSummary;

impl Summarizer for OverallSummary {
    fn name(&self) -> &'static str {
        "app"
    }

    fn summarize(&self, stats: &Aggregator, _slugs: &SlugCache, timestamp: i64) -> Vec<MetricLine> {
        let triad = &stats.overall;
        info!(
            "APP TASKS {} ENABLED {} DISABLED {}",
            triad.total, triad.enabled, triad.disabled
        );
        triad_lines(SUMMARY_PREFIX, triad, timestamp)
    }
}

/// DNS zone tasks, broken down by org, API key and domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsSummary;

impl Summarizer for DnsSummary {
    fn name(&self) -> &'static str {
        "ns1"
    }

    fn summarize(&self, stats: &Aggregator, slugs: &SlugCache, timestamp: i64) -> Vec<MetricLine> {
        let dns = &stats.dns;
        info!(
            "NS1 TASKS {} ENABLED {} DISABLED {}",
            dns.tasks.total, dns.tasks.enabled, dns.tasks.disabled
        );

        let mut lines = triad_lines(DNS_PREFIX, &dns.tasks, timestamp);

        for (org_id, count) in dns.orgs.iter() {
            let org_slug = slugs.slug_or_unknown(*org_id);
            info!(org_id, org_slug, domain_count = count, "NS1 org");
            lines.push(
                line(format!("{DNS_PREFIX}.domain_count"), count, timestamp)
                    .tag("org_id", org_id)
                    .tag("org_slug", org_slug),
            );
        }

        for (domain, org_id) in dns.domain_owners.iter() {
            lines.push(
                MetricLine::new(format!("{DNS_PREFIX}.domains.org_id"), *org_id, timestamp)
                    .tag("app", APP_TAG)
                    .quoted_tag("domain", domain),
            );
        }

        for (api_key, count) in dns.api_keys.iter() {
            debug!(api_key, domain_count = count, "NS1 api key");
            lines.push(
                line(format!("{DNS_PREFIX}.api_key.domain_count"), count, timestamp).quoted_tag("api_key", api_key),
            );
        }

        // Same domains again, indexed by API key instead of org.
        for (domain, api_key) in dns.domain_keys.iter() {
            lines.push(
                line(format!("{DNS_PREFIX}.domains.api_key"), 1, timestamp)
                    .quoted_tag("domain", domain)
                    .quoted_tag("api_key", api_key),
            );
        }

        lines
    }
}

/// Telephony tasks, broken down by org and API key.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelephonySummary;

impl Summarizer for TelephonySummary {
    fn name(&self) -> &'static str {
        "voxter"
    }

    fn summarize(&self, stats: &Aggregator, _slugs: &SlugCache, timestamp: i64) -> Vec<MetricLine> {
        let telephony = &stats.telephony;
        info!(
            "VOXTER TASKS {} ENABLED {} DISABLED {}",
            telephony.tasks.total, telephony.tasks.enabled, telephony.tasks.disabled
        );

        let mut lines = triad_lines(TELEPHONY_PREFIX, &telephony.tasks, timestamp);

        for (org_id, count) in telephony.orgs.iter() {
            info!(org_id, task_count = count, "VOXTER org");
            lines.push(line(format!("{TELEPHONY_PREFIX}.org_id.domain_count"), count, timestamp).tag("org_id", org_id));
        }

        for (api_key, count) in telephony.api_keys.iter() {
            debug!(api_key, task_count = count, "VOXTER api key");
            lines.push(
                line(format!("{TELEPHONY_PREFIX}.api_key.domain_count"), count, timestamp)
                    .quoted_tag("api_key", api_key),
            );
        }

        lines
    }
}

/// Repository stats tasks. Only the total is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepoStatsSummary {
    pub emit_gap_metrics: bool,
}

impl Summarizer for RepoStatsSummary {
    fn name(&self) -> &'static str {
        "gitstats"
    }

    fn summarize(&self, stats: &Aggregator, _slugs: &SlugCache, timestamp: i64) -> Vec<MetricLine> {
        let triad = &stats.repo_stats;
        info!(
            "GITSTATS TASKS {} ENABLED {} DISABLED {}",
            triad.total, triad.enabled, triad.disabled
        );
        if self.emit_gap_metrics {
            triad_lines(REPO_STATS_PREFIX, triad, timestamp)
        } else {
            Vec::new()
        }
    }
}

/// Plugin types nobody recognizes. Anything here deserves a look.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownSummary {
    pub emit_gap_metrics: bool,
}

impl Summarizer for UnknownSummary {
    fn name(&self) -> &'static str {
        "unknown"
    }

    fn summarize(&self, stats: &Aggregator, _slugs: &SlugCache, timestamp: i64) -> Vec<MetricLine> {
        let triad = &stats.unknown;
        if triad.total > 0 {
            warn!(
                "UNKNOWN TASKS {} ENABLED {} DISABLED {}",
                triad.total, triad.enabled, triad.disabled
            );
        } else {
            info!(
                "UNKNOWN TASKS {} ENABLED {} DISABLED {}",
                triad.total, triad.enabled, triad.disabled
            );
        }
        if self.emit_gap_metrics {
            triad_lines(UNKNOWN_PREFIX, triad, timestamp)
        } else {
            Vec::new()
        }
    }
}
