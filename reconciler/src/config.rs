use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub const CONFIG_PLACEHOLDER: &str = "{config}";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Rate limit qps must be positive, got {0}")]
    InvalidQps(f64),

    #[error("Rate limit burst must be at least 1")]
    InvalidBurst,

    #[error("{0} command cannot be empty")]
    EmptyCommand(&'static str),

    #[error("Command timeout must be at least one second")]
    InvalidTimeout,

    #[error("Cluster domain cannot be empty")]
    EmptyClusterDomain,

    #[error("Intent source path cannot be empty")]
    EmptySourcePath,

    #[error("Kubernetes page size must be positive")]
    InvalidPageSize,

    #[error("Bypass backend entries cannot be empty")]
    EmptyBypassBackend,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 9090,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Where routing intent is read from.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum IntentSourceConfig {
    Kubernetes(KubernetesConfig),
    /// An ingress list captured from the API, read from disk every cycle.
    Filesystem { path: PathBuf },
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct KubernetesConfig {
    #[serde(default = "default_api_url")]
    pub api_url: Url,
    /// Empty watches every namespace.
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_token_path")]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_ca_path")]
    pub ca_path: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_api_url() -> Url {
    Url::parse("https://kubernetes.default.svc").expect("static url is valid")
}

fn default_token_path() -> Option<PathBuf> {
    Some("/var/run/secrets/kubernetes.io/serviceaccount/token".into())
}

fn default_ca_path() -> Option<PathBuf> {
    Some("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".into())
}

fn default_page_size() -> u32 {
    500
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq)]
pub struct RateLimit {
    /// Tokens added per second.
    pub qps: f64,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit { qps: 0.1, burst: 1 }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ProxyConfig {
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    /// Check-only invocation. `{config}` is replaced with the candidate path.
    #[serde(default = "default_check_command")]
    pub check_command: Vec<String>,
    /// Graceful reload invocation. `{config}` is replaced with the live path.
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            config_path: default_config_path(),
            check_command: default_check_command(),
            reload_command: default_reload_command(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_config_path() -> PathBuf {
    "/etc/haproxy/haproxy.cfg".into()
}

fn default_check_command() -> Vec<String> {
    ["haproxy", "-c", "-f", CONFIG_PLACEHOLDER]
        .map(String::from)
        .to_vec()
}

fn default_reload_command() -> Vec<String> {
    [
        "sh",
        "-c",
        "haproxy -f {config} -p /var/run/haproxy-private.pid -sf $(cat /var/run/haproxy-private.pid)",
    ]
    .map(String::from)
    .to_vec()
}

fn default_command_timeout() -> u64 {
    30
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct RenderConfig {
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
    #[serde(default = "default_frontend_bind")]
    pub frontend_bind: String,
    #[serde(default = "default_frontend_maxconn")]
    pub frontend_maxconn: u32,
    /// Replaces the built-in global/defaults/stats block.
    #[serde(default)]
    pub preamble_path: Option<PathBuf>,
    /// `host:port` of the error page handler used when no rule matches.
    #[serde(default)]
    pub default_backend: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            cluster_domain: default_cluster_domain(),
            frontend_bind: default_frontend_bind(),
            frontend_maxconn: default_frontend_maxconn(),
            preamble_path: None,
            default_backend: None,
        }
    }
}

fn default_cluster_domain() -> String {
    "svc.cluster.local".into()
}

fn default_frontend_bind() -> String {
    "*:80".into()
}

fn default_frontend_maxconn() -> u32 {
    65536
}

/// When the loop records a changed snapshot as known.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// As soon as the snapshot rendered. A failed validation or reload is not
    /// retried until the routing intent changes again.
    #[default]
    AdvanceOnRender,
    /// Only once the configuration is active. A failed apply is retried on
    /// every cycle.
    AdvanceOnSuccess,
}

fn default_bypass_backends() -> Vec<String> {
    vec!["lets-encrypt".into()]
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub admin_listener: Listener,
    pub intent_source: IntentSourceConfig,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default = "default_bypass_backends")]
    pub bypass_backends: Vec<String>,
    #[serde(default)]
    pub snapshot_policy: SnapshotPolicy,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.admin_listener.validate()?;

        match &self.intent_source {
            IntentSourceConfig::Kubernetes(k8s) => {
                if k8s.page_size == 0 {
                    return Err(ValidationError::InvalidPageSize);
                }
            }
            IntentSourceConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ValidationError::EmptySourcePath);
                }
            }
        }

        if !self.rate_limit.qps.is_finite() || self.rate_limit.qps <= 0.0 {
            return Err(ValidationError::InvalidQps(self.rate_limit.qps));
        }
        if self.rate_limit.burst == 0 {
            return Err(ValidationError::InvalidBurst);
        }

        if self.proxy.check_command.is_empty() {
            return Err(ValidationError::EmptyCommand("check"));
        }
        if self.proxy.reload_command.is_empty() {
            return Err(ValidationError::EmptyCommand("reload"));
        }
        if self.proxy.command_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        if self.render.cluster_domain.is_empty() {
            return Err(ValidationError::EmptyClusterDomain);
        }

        if self.bypass_backends.iter().any(|b| b.is_empty()) {
            return Err(ValidationError::EmptyBypassBackend);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
admin_listener:
    host: 0.0.0.0
    port: 9100
intent_source:
    type: kubernetes
    api_url: https://10.0.0.1:6443
    namespace: web
    token_path: /tmp/token
    ca_path: null
    page_size: 50
rate_limit:
    qps: 0.5
    burst: 2
proxy:
    config_path: /tmp/haproxy.cfg
    check_command: [haproxy, -c, -f, "{config}"]
    reload_command: [haproxy_reload]
    command_timeout_secs: 5
render:
    cluster_domain: cluster.internal
    frontend_bind: "*:8080"
    frontend_maxconn: 2000
    default_backend: 127.0.0.1:8081
bypass_backends: [lets-encrypt, acme]
snapshot_policy: advance_on_success
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.admin_listener.port, 9100);
        let IntentSourceConfig::Kubernetes(k8s) = &config.intent_source else {
            panic!("expected kubernetes source");
        };
        assert_eq!(k8s.api_url.as_str(), "https://10.0.0.1:6443/");
        assert_eq!(k8s.namespace, "web");
        assert_eq!(k8s.token_path, Some("/tmp/token".into()));
        assert_eq!(k8s.ca_path, None);
        assert_eq!(k8s.page_size, 50);
        assert_eq!(config.rate_limit, RateLimit { qps: 0.5, burst: 2 });
        assert_eq!(config.proxy.reload_command, vec!["haproxy_reload"]);
        assert_eq!(config.render.default_backend.as_deref(), Some("127.0.0.1:8081"));
        assert_eq!(config.render.frontend_maxconn, 2000);
        assert_eq!(config.bypass_backends, vec!["lets-encrypt", "acme"]);
        assert_eq!(config.snapshot_policy, SnapshotPolicy::AdvanceOnSuccess);
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
intent_source:
    type: kubernetes
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.admin_listener, Listener::default());
        assert_eq!(config.rate_limit, RateLimit { qps: 0.1, burst: 1 });
        assert_eq!(config.proxy, ProxyConfig::default());
        assert_eq!(config.proxy.check_command[3], CONFIG_PLACEHOLDER);
        assert_eq!(config.render, RenderConfig::default());
        assert_eq!(config.bypass_backends, vec!["lets-encrypt"]);
        assert_eq!(config.snapshot_policy, SnapshotPolicy::AdvanceOnRender);

        let IntentSourceConfig::Kubernetes(k8s) = config.intent_source else {
            panic!("expected kubernetes source");
        };
        assert_eq!(k8s.api_url.as_str(), "https://kubernetes.default.svc/");
        assert_eq!(k8s.namespace, "");
        assert_eq!(k8s.page_size, 500);
    }

    #[test]
    fn test_filesystem_source() {
        let yaml = r#"
intent_source:
    type: filesystem
    path: /tmp/ingresses.json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.intent_source,
            IntentSourceConfig::Filesystem {
                path: "/tmp/ingresses.json".into()
            }
        );
    }

    #[test]
    fn test_validation_errors() {
        let base: Config = serde_yaml::from_str("intent_source: {type: kubernetes}").unwrap();

        let mut config = base.clone();
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base.clone();
        config.rate_limit.qps = 0.0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidQps(0.0)));

        let mut config = base.clone();
        config.rate_limit.burst = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidBurst));

        let mut config = base.clone();
        config.proxy.check_command.clear();
        assert_eq!(config.validate(), Err(ValidationError::EmptyCommand("check")));

        let mut config = base.clone();
        config.proxy.reload_command.clear();
        assert_eq!(config.validate(), Err(ValidationError::EmptyCommand("reload")));

        let mut config = base.clone();
        config.proxy.command_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidTimeout));

        let mut config = base.clone();
        config.render.cluster_domain.clear();
        assert_eq!(config.validate(), Err(ValidationError::EmptyClusterDomain));

        let mut config = base.clone();
        config.bypass_backends.push(String::new());
        assert_eq!(config.validate(), Err(ValidationError::EmptyBypassBackend));

        let mut config = base;
        config.intent_source = IntentSourceConfig::Filesystem { path: "".into() };
        assert_eq!(config.validate(), Err(ValidationError::EmptySourcePath));
    }

    #[test]
    fn test_invalid_yaml() {
        // Missing intent source
        assert!(serde_yaml::from_str::<Config>("rate_limit: {qps: 1.0, burst: 1}").is_err());

        // Unknown source type
        assert!(serde_yaml::from_str::<Config>("intent_source: {type: consul}").is_err());

        // Invalid policy
        assert!(
            serde_yaml::from_str::<Config>(
                "intent_source: {type: kubernetes}\nsnapshot_policy: always"
            )
            .is_err()
        );
    }
}
