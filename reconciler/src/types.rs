use sha2::{Digest, Sha256};
use std::fmt;

/// One host/path entry of the routing intent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoutingRule {
    /// Empty for rules that apply to any host.
    pub host: String,
    pub path_prefix: String,
    pub backend_service: String,
    pub backend_namespace: String,
    pub backend_port: u16,
}

impl RoutingRule {
    pub fn new<H, P, S, N>(host: H, path_prefix: P, service: S, namespace: N, port: u16) -> Self
    where
        H: Into<String>,
        P: Into<String>,
        S: Into<String>,
        N: Into<String>,
    {
        RoutingRule {
            host: host.into(),
            path_prefix: path_prefix.into(),
            backend_service: service.into(),
            backend_namespace: namespace.into(),
            backend_port: port,
        }
    }

    pub fn target(&self) -> BackendTarget {
        BackendTarget {
            service_name: self.backend_service.clone(),
            namespace: self.backend_namespace.clone(),
            port: self.backend_port,
        }
    }
}

/// Concrete network destination for matched traffic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    pub service_name: String,
    pub namespace: String,
    pub port: u16,
}

impl BackendTarget {
    /// Backend name used in the proxy configuration. Kubernetes object names
    /// never contain `_`, so the parts cannot run into each other.
    pub fn id(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.service_name, self.port)
    }

    pub fn address(&self, cluster_domain: &str) -> String {
        format!(
            "{}.{}.{}:{}",
            self.service_name, self.namespace, cluster_domain, self.port
        )
    }
}

/// Point-in-time copy of the routing intent.
///
/// Rules keep the order the source listed them in, because duplicate paths
/// resolve last-seen-wins. Equality ignores order: the orchestrator does not
/// guarantee a stable listing order, so two listings with the same rules are
/// the same intent.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    rules: Vec<RoutingRule>,
}

impl Snapshot {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Snapshot { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn sorted(&self) -> Vec<&RoutingRule> {
        let mut rules: Vec<&RoutingRule> = self.rules.iter().collect();
        rules.sort();
        rules
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.rules.len() == other.rules.len() && self.sorted() == other.sorted()
    }
}

impl Eq for Snapshot {}

impl From<Vec<RoutingRule>> for Snapshot {
    fn from(rules: Vec<RoutingRule>) -> Self {
        Snapshot::new(rules)
    }
}

/// SHA-256 of a rendered configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Fingerprint(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines.
        write!(f, "{}", &self.0[..12])
    }
}

/// Fully rendered and sanitized configuration, ready to be applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigArtifact {
    text: String,
    fingerprint: Fingerprint,
}

impl ConfigArtifact {
    pub fn new(text: String) -> Self {
        let fingerprint = Fingerprint::of(&text);
        ConfigArtifact { text, fingerprint }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_equality_ignores_order() {
        let a = RoutingRule::new("a.example.com", "/", "svc1", "default", 80);
        let b = RoutingRule::new("a.example.com", "/api", "svc2", "default", 80);

        let first = Snapshot::new(vec![a.clone(), b.clone()]);
        let second = Snapshot::new(vec![b.clone(), a.clone()]);
        assert_eq!(first, second);

        let third = Snapshot::new(vec![a.clone(), b.clone(), b.clone()]);
        assert_ne!(first, third);

        let mut changed = b.clone();
        changed.backend_port = 8080;
        assert_ne!(first, Snapshot::new(vec![a, changed]));
    }

    #[test]
    fn test_backend_target_naming() {
        let rule = RoutingRule::new("a.example.com", "/", "svc1", "web", 8080);
        let target = rule.target();
        assert_eq!(target.id(), "web_svc1_8080");
        assert_eq!(
            target.address("svc.cluster.local"),
            "svc1.web.svc.cluster.local:8080"
        );
    }

    #[test]
    fn test_fingerprint() {
        let artifact = ConfigArtifact::new("global\n".into());
        assert_eq!(artifact.fingerprint(), &Fingerprint::of("global\n"));
        assert_ne!(artifact.fingerprint(), &Fingerprint::of("global\n\n"));
        assert_eq!(artifact.fingerprint().as_str().len(), 64);
        assert_eq!(artifact.fingerprint().to_string().len(), 12);
    }
}
