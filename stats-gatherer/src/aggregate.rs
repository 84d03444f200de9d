//! # Aggregation
//!
//! Counters and groupings built from one pass over the task table.
//!
//! [`Aggregator::classify`] is the only writer. Summaries read the finished state.

use crate::task::{
    ClassifyError,
    OrgId,
    PluginEntry,
    TaskRow,
};
use std::collections::{
    btree_map::Entry,
    BTreeMap,
};

/// Enabled, disabled and total counts for one category.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Triad {
    pub enabled: u64,
    pub disabled: u64,
    pub total: u64,
}

impl Triad {
    pub fn record(&mut self, enabled: bool) {
        self.total += 1;
        if enabled {
            self.enabled += 1;
        } else {
            self.disabled += 1;
        }
    }

    /// Count a task without attributing it to either side. Breaks `enabled + disabled == total` on purpose,
    /// see [`Aggregator::repo_stats`].
    pub fn record_total(&mut self) {
        self.total += 1;
    }
}

/// Occurrence count per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally<K: Ord>(BTreeMap<K, u64>);

impl<K: Ord> Default for Tally<K> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord> Tally<K> {
    pub fn increment(&mut self, key: K) {
        *self.0.entry(key).or_default() += 1;
    }

    pub fn get(&self, key: &K) -> u64 {
        self.0.get(key).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.0.iter().map(|(key, count)| (key, *count))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A map that keeps the first value stored under each key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstSeen<K: Ord, V>(BTreeMap<K, V>);

impl<K: Ord, V> Default for FirstSeen<K, V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord, V> FirstSeen<K, V> {
    /// Returns `false` and leaves the map untouched when `key` is already present.
    pub fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        match self.0.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// DNS zone tasks (`/raintank/apps/ns1`).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DnsStats {
    pub tasks: Triad,
    pub api_keys: Tally<String>,
    pub orgs: Tally<OrgId>,
    pub domain_owners: FirstSeen<String, OrgId>,
    pub domain_keys: FirstSeen<String, String>,
}

/// Telephony tasks (`/raintank/apps/voxter`).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TelephonyStats {
    pub tasks: Triad,
    pub api_keys: Tally<String>,
    pub orgs: Tally<OrgId>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Aggregator {
    pub overall: Triad,
    pub dns: DnsStats,
    pub telephony: TelephonyStats,
    /// Only `total` is ever populated for repository stats tasks.
    pub repo_stats: Triad,
    /// Should stay at zero. Only `total` is populated.
    pub unknown: Triad,
}

impl Aggregator {
    /// Fold one row into the aggregate and return the plugin entries it carried.
    ///
    /// A row whose config cannot be classified is rejected before any counter moves.
    pub fn classify(&mut self, row: &TaskRow) -> Result<Vec<PluginEntry>, ClassifyError> {
        let plugins = row.plugins()?;
        let enabled = row.is_enabled();

        self.overall.record(enabled);

        for plugin in &plugins {
            match plugin {
                PluginEntry::Dns { api_key, zone } => {
                    if let Some(zone) = zone {
                        self.dns.domain_owners.insert_if_absent(zone.clone(), row.org_id);
                        self.dns.domain_keys.insert_if_absent(zone.clone(), api_key.clone());
                    }
                    self.dns.api_keys.increment(api_key.clone());
                    self.dns.orgs.increment(row.org_id);
                    self.dns.tasks.record(enabled);
                }
                PluginEntry::Telephony { api_key } => {
                    debug!(row_id = row.id, api_key, "telephony task");
                    self.telephony.api_keys.increment(api_key.clone());
                    self.telephony.orgs.increment(row.org_id);
                    self.telephony.tasks.record(enabled);
                }
                PluginEntry::RepoStats => {
                    self.repo_stats.record_total();
                }
                PluginEntry::Unknown(plugin_type) => {
                    warn!(row_id = row.id, plugin_type, "found unknown plugin");
                    self.unknown.record_total();
                }
            }
        }

        Ok(plugins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{
        tests::row,
        DNS_PLUGIN,
        REPO_STATS_PLUGIN,
        TELEPHONY_PLUGIN,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const NS1_ROW: &str = r#"{"/raintank/apps/ns1":{"ns1_key":" k1 ","zone":"example.com"}}"#;

    #[test]
    fn dns_row_updates_every_grouping() {
        let mut stats = Aggregator::default();
        stats.classify(&row(1, NS1_ROW, 42, 1)).unwrap();

        assert_eq!(
            stats.dns.tasks,
            Triad {
                enabled: 1,
                disabled: 0,
                total: 1
            }
        );
        assert_eq!(stats.dns.api_keys.iter().collect::<Vec<_>>(), vec![(&"k1".to_string(), 1)]);
        assert_eq!(stats.dns.orgs.iter().collect::<Vec<_>>(), vec![(&42, 1)]);
        assert_eq!(stats.dns.domain_owners.get(&"example.com".to_string()), Some(&42));
        assert_eq!(stats.dns.domain_keys.get(&"example.com".to_string()), Some(&"k1".to_string()));
        assert_eq!(stats.overall.total, 1);
    }

    #[test]
    fn first_domain_owner_wins() {
        let mut stats = Aggregator::default();
        stats.classify(&row(1, NS1_ROW, 42, 1)).unwrap();
        let snapshot = stats.dns.domain_owners.clone();

        stats
            .classify(&row(
                2,
                r#"{"/raintank/apps/ns1":{"ns1_key":"k2","zone":"example.com"}}"#,
                7,
                0,
            ))
            .unwrap();

        assert_eq!(stats.dns.domain_owners, snapshot);
        assert_eq!(stats.dns.domain_keys.get(&"example.com".to_string()), Some(&"k1".to_string()));
        assert_eq!(stats.dns.orgs.get(&7), 1);
        assert_eq!(stats.dns.api_keys.get(&"k2".to_string()), 1);
    }

    #[test]
    fn insert_if_absent_reports_second_write() {
        let mut map = FirstSeen::default();
        assert!(map.insert_if_absent("a", 1));
        assert!(!map.insert_if_absent("a", 2));
        assert_eq!(map.get(&"a"), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn triads_stay_balanced() {
        let rows = [
            row(1, NS1_ROW, 1, 1),
            row(2, NS1_ROW, 1, 0),
            row(3, r#"{"/raintank/apps/voxter":{"voxter_key":"v1"}}"#, 2, 1),
            row(4, r#"{"/raintank/apps/voxter":{"voxter_key":"v1 "}}"#, 3, 0),
            row(5, "{}", 3, 1),
        ];
        let mut stats = Aggregator::default();
        for row in &rows {
            stats.classify(row).unwrap();
        }

        let enabled_rows = rows.iter().filter(|r| r.enabled == 1).count() as u64;
        assert_eq!(stats.overall.enabled, enabled_rows);
        for triad in [stats.overall, stats.dns.tasks, stats.telephony.tasks] {
            assert_eq!(triad.enabled + triad.disabled, triad.total);
        }
        assert_eq!(stats.overall.total, 5);
        assert_eq!(stats.telephony.api_keys.get(&"v1".to_string()), 2);
        assert_eq!(stats.telephony.orgs.len(), 2);
    }

    #[test]
    fn unknown_plugin_only_touches_unknown_bucket() {
        let mut stats = Aggregator::default();
        stats.classify(&row(1, r#"{"/raintank/apps/ping":{}}"#, 1, 1)).unwrap();

        let expected = Aggregator {
            overall: stats.overall,
            unknown: Triad {
                enabled: 0,
                disabled: 0,
                total: 1,
            },
            ..Default::default()
        };
        assert_eq!(stats, expected);
    }

    #[test]
    fn repo_stats_only_counts_total() {
        let mut stats = Aggregator::default();
        stats.classify(&row(1, r#"{"/raintank/apps/gitstats":{}}"#, 1, 1)).unwrap();
        assert_eq!(
            stats.repo_stats,
            Triad {
                enabled: 0,
                disabled: 0,
                total: 1
            }
        );
    }

    #[test]
    fn rejected_row_leaves_state_untouched() {
        let mut stats = Aggregator::default();
        stats.classify(&row(1, NS1_ROW, 42, 1)).unwrap();
        let before = stats.clone();

        assert!(stats
            .classify(&row(
                2,
                r#"{"/raintank/apps/gitstats":{},"/raintank/apps/ns1":{"zone":"x.com"}}"#,
                42,
                1
            ))
            .is_err());
        assert!(stats.classify(&row(3, "not json", 42, 1)).is_err());
        assert_eq!(stats, before);
    }

    fn dns_config(zone: &str, api_key: &str) -> String {
        format!(r#"{{"{DNS_PLUGIN}":{{"ns1_key":"{api_key}","zone":"{zone}"}}}}"#)
    }

    fn plugin_config(kind: u8) -> String {
        match kind {
            0 => dns_config("a.example", "k1"),
            1 => format!(r#"{{"{TELEPHONY_PLUGIN}":{{"voxter_key":"v1"}}}}"#),
            2 => format!(r#"{{"{REPO_STATS_PLUGIN}":{{}}}}"#),
            3 => r#"{"/raintank/apps/ping":{}}"#.to_string(),
            4 => format!(r#"{{"{DNS_PLUGIN}":{{"ns1_key":"k2"}},"{TELEPHONY_PLUGIN}":{{"voxter_key":"v2"}}}}"#),
            _ => "{}".to_string(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn later_zone_claims_never_replace_the_first(
            claims in prop::collection::vec((0..4u8, 1..6i64, 0..3u8, 0..=1i8), 1..40),
        ) {
            let mut stats = Aggregator::default();
            let mut owners = BTreeMap::new();
            let mut keys = BTreeMap::new();
            for (id, (zone, org_id, api_key, enabled)) in claims.into_iter().enumerate() {
                let zone = format!("zone{zone}.example");
                let api_key = format!("key{api_key}");
                stats.classify(&row(id as i64, &dns_config(&zone, &api_key), org_id, enabled)).unwrap();
                owners.entry(zone.clone()).or_insert(org_id);
                keys.entry(zone).or_insert(api_key);
            }

            let seen_owners: BTreeMap<_, _> =
                stats.dns.domain_owners.iter().map(|(zone, org_id)| (zone.clone(), *org_id)).collect();
            let seen_keys: BTreeMap<_, _> =
                stats.dns.domain_keys.iter().map(|(zone, key)| (zone.clone(), key.clone())).collect();
            prop_assert_eq!(seen_owners, owners);
            prop_assert_eq!(seen_keys, keys);
        }

        #[test]
        fn triads_balance_over_any_rows(rows in prop::collection::vec((0..6u8, 1..4i64, 0..=2i8), 0..60)) {
            let mut stats = Aggregator::default();
            for (id, (kind, org_id, enabled)) in rows.iter().enumerate() {
                stats.classify(&row(id as i64, &plugin_config(*kind), *org_id, *enabled)).unwrap();
            }

            let enabled_rows = rows.iter().filter(|(_, _, enabled)| *enabled == 1).count() as u64;
            prop_assert_eq!(stats.overall.enabled, enabled_rows);
            prop_assert_eq!(stats.overall.total, rows.len() as u64);
            for triad in [stats.overall, stats.dns.tasks, stats.telephony.tasks] {
                prop_assert_eq!(triad.enabled + triad.disabled, triad.total);
            }
        }
    }
}
