use crate::types::{BackendTarget, RoutingRule};
use indexmap::{IndexMap, IndexSet};
use std::cmp::{Ordering, Reverse};

const ROOT_PATH: &str = "/";

/// Rules grouped by host, most specific path first within each host.
///
/// Exact hosts come first in the order the snapshot first mentions them. Then
/// wildcard hosts, longest suffix first, and the catch-all host (empty name)
/// last. The proxy takes the first matching route, so a broader host never
/// shadows a narrower one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteTable {
    hosts: IndexMap<String, Vec<RoutingRule>>,
}

impl RouteTable {
    pub fn build(rules: &[RoutingRule]) -> Self {
        let mut by_host: IndexMap<String, IndexMap<String, RoutingRule>> = IndexMap::new();

        for rule in rules {
            let mut rule = rule.clone();
            if rule.path_prefix.is_empty() {
                rule.path_prefix = ROOT_PATH.into();
            }
            // A later rule for the same host and path replaces the earlier one.
            by_host
                .entry(rule.host.clone())
                .or_default()
                .insert(rule.path_prefix.clone(), rule);
        }

        by_host.sort_by(|a, _, b, _| host_rank(a).cmp(&host_rank(b)));

        let hosts = by_host
            .into_iter()
            .filter(|(_, paths)| !paths.is_empty())
            .map(|(host, paths)| {
                let mut paths: Vec<RoutingRule> = paths.into_values().collect();
                paths.sort_by(|a, b| by_specificity(&a.path_prefix, &b.path_prefix));
                (host, paths)
            })
            .collect();

        RouteTable { hosts }
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&str, &[RoutingRule])> {
        self.hosts
            .iter()
            .map(|(host, rules)| (host.as_str(), rules.as_slice()))
    }

    pub fn rules_for(&self, host: &str) -> Option<&[RoutingRule]> {
        self.hosts.get(host).map(Vec::as_slice)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn rule_count(&self) -> usize {
        self.hosts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Unique targets in the order the table first references them.
    pub fn backend_targets(&self) -> Vec<BackendTarget> {
        let targets: IndexSet<BackendTarget> = self
            .hosts
            .values()
            .flatten()
            .map(RoutingRule::target)
            .collect();
        targets.into_iter().collect()
    }
}

/// Sort key for hosts. The sort is stable, so exact hosts keep their order.
fn host_rank(host: &str) -> (u8, Reverse<usize>) {
    if host.is_empty() {
        (2, Reverse(0))
    } else if host.starts_with('*') {
        (1, Reverse(host.len()))
    } else {
        (0, Reverse(0))
    }
}

/// Descending lexicographic order with `/` pinned last. This approximates
/// longest-prefix-first for prefixes sharing leading segments; it is not a
/// segment-aware match.
fn by_specificity(a: &str, b: &str) -> Ordering {
    match (a == ROOT_PATH, b == ROOT_PATH) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.cmp(a),
    }
}
