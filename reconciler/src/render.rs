//! Renders a route table into HAProxy configuration.
//!
//! Output layout: preamble (global, defaults, stats listener), then the
//! `frontend http` section with one host/path condition pair per rule, then
//! one `backend` section per unique target.
use crate::config::RenderConfig;
use crate::route_table::RouteTable;
use crate::types::RoutingRule;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_PREAMBLE: &str = r"global
    daemon
    stats socket /tmp/haproxy
    server-state-file global
    server-state-base /var/state/haproxy/
    pidfile /var/run/haproxy-private.pid

defaults
    log global
    option httplog
    load-server-state-from-file global
    option redispatch
    option dontlognull
    option http-server-close
    option forwardfor
    option http-keep-alive
    timeout http-request    5s
    timeout connect         5s
    timeout client          50s
    timeout client-fin      50s
    timeout server          50s
    timeout tunnel          1h
    timeout http-keep-alive 60s
    mode http

# haproxy stats, required hostport and firewall rules for :1936
listen stats
    bind *:1936
    stats enable
    stats hide-version
    stats realm Haproxy\ Statistics
    stats uri /
";

const ERROR_PAGES_BACKEND: &str = "error_pages";
const CATCH_ALL_LABEL: &str = "_default";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RenderError {
    #[error("invalid host {host:?}")]
    InvalidHost { host: String },

    #[error("invalid path {path:?} for host {host:?}")]
    InvalidPath { host: String, path: String },

    #[error("invalid backend {namespace:?}/{service:?} for host {host:?}")]
    InvalidBackend {
        host: String,
        service: String,
        namespace: String,
    },

    #[error("backend port cannot be 0 for {namespace}/{service}")]
    InvalidPort { service: String, namespace: String },

    #[error("could not read preamble {path:?}: {message}")]
    Preamble { path: PathBuf, message: String },

    #[error("formatting error")]
    Format(#[from] std::fmt::Error),
}

pub struct Renderer {
    preamble: String,
    cluster_domain: String,
    frontend_bind: String,
    frontend_maxconn: u32,
    default_backend: Option<String>,
}

impl Renderer {
    pub fn new(config: &RenderConfig) -> Result<Self, RenderError> {
        let preamble = match &config.preamble_path {
            Some(path) => fs::read_to_string(path).map_err(|e| RenderError::Preamble {
                path: path.clone(),
                message: e.to_string(),
            })?,
            None => DEFAULT_PREAMBLE.to_string(),
        };

        Ok(Renderer {
            preamble,
            cluster_domain: config.cluster_domain.clone(),
            frontend_bind: config.frontend_bind.clone(),
            frontend_maxconn: config.frontend_maxconn,
            default_backend: config.default_backend.clone(),
        })
    }

    /// Same table, same bytes.
    pub fn render(&self, table: &RouteTable) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.preamble.len() + 256 * table.rule_count());

        writeln!(out, "{}", self.preamble.trim_end())?;
        writeln!(out)?;

        self.render_frontend(&mut out, table)?;
        self.render_backends(&mut out, table)?;

        Ok(out)
    }

    fn render_frontend(&self, out: &mut String, table: &RouteTable) -> Result<(), RenderError> {
        writeln!(out, "frontend http")?;
        writeln!(out, "    bind {}", self.frontend_bind)?;
        writeln!(out, "    mode http")?;
        writeln!(out, "    maxconn {}", self.frontend_maxconn)?;

        for (host, rules) in table.hosts() {
            let label = host_label(host)?;
            writeln!(out)?;

            let host_acl = if host.is_empty() {
                writeln!(out, "    # any host")?;
                None
            } else {
                writeln!(out, "    # {host}")?;
                let acl = format!("host_{label}");
                match host.strip_prefix('*') {
                    Some(suffix) => writeln!(out, "    acl {acl} hdr_end(host) -i {suffix}")?,
                    None => writeln!(out, "    acl {acl} hdr(host) -i {host}")?,
                }
                Some(acl)
            };

            for (index, rule) in rules.iter().enumerate() {
                validate_rule(rule)?;
                let path_acl = format!("path_{label}_{index}");
                let backend = rule.target().id();

                writeln!(out, "    acl {path_acl} path_beg {}", rule.path_prefix)?;
                match &host_acl {
                    Some(host_acl) => writeln!(
                        out,
                        "    use_backend {backend} if {host_acl} {path_acl}"
                    )?,
                    None => writeln!(out, "    use_backend {backend} if {path_acl}")?,
                }
            }
        }

        if self.default_backend.is_some() {
            writeln!(out)?;
            writeln!(out, "    default_backend {ERROR_PAGES_BACKEND}")?;
        }

        Ok(())
    }

    fn render_backends(&self, out: &mut String, table: &RouteTable) -> Result<(), RenderError> {
        for target in table.backend_targets() {
            let id = target.id();
            writeln!(out)?;
            writeln!(out, "backend {id}")?;
            writeln!(
                out,
                "    server {id} {} check",
                target.address(&self.cluster_domain)
            )?;
        }

        if let Some(address) = &self.default_backend {
            writeln!(out)?;
            writeln!(out, "backend {ERROR_PAGES_BACKEND}")?;
            writeln!(out, "    server {ERROR_PAGES_BACKEND} {address} check")?;
        }

        Ok(())
    }
}

/// ACL-safe label for a host. Wildcard hosts map `*` to `_`, which cannot
/// appear in a real host name.
fn host_label(host: &str) -> Result<String, RenderError> {
    if host.is_empty() {
        return Ok(CATCH_ALL_LABEL.into());
    }

    let name = host.strip_prefix("*.").unwrap_or(host);
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(RenderError::InvalidHost { host: host.into() });
    }

    Ok(host.replace('*', "_"))
}

fn is_object_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

fn validate_rule(rule: &RoutingRule) -> Result<(), RenderError> {
    let path = &rule.path_prefix;
    if !path.starts_with('/') || path.chars().any(|c| c.is_whitespace() || c == '#') {
        return Err(RenderError::InvalidPath {
            host: rule.host.clone(),
            path: path.clone(),
        });
    }

    if !is_object_name(&rule.backend_service) || !is_object_name(&rule.backend_namespace) {
        return Err(RenderError::InvalidBackend {
            host: rule.host.clone(),
            service: rule.backend_service.clone(),
            namespace: rule.backend_namespace.clone(),
        });
    }

    if rule.backend_port == 0 {
        return Err(RenderError::InvalidPort {
            service: rule.backend_service.clone(),
            namespace: rule.backend_namespace.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn renderer() -> Renderer {
        Renderer::new(&RenderConfig::default()).unwrap()
    }

    fn frontend_region(text: &str) -> &str {
        let start = text.find("frontend http").unwrap();
        let end = text[start..]
            .find("\nbackend ")
            .map(|i| start + i)
            .unwrap_or(text.len());
        &text[start..end]
    }

    #[test]
    fn test_two_rules_same_host() {
        let rules = vec![
            RoutingRule::new("a.example.com", "/", "svc1", "default", 80),
            RoutingRule::new("a.example.com", "/api", "svc2", "default", 80),
        ];
        let text = renderer().render(&RouteTable::build(&rules)).unwrap();

        let frontend = frontend_region(&text);
        let api = frontend.find("path_beg /api").unwrap();
        let root = frontend.find("path_beg /\n").unwrap();
        assert!(api < root);

        assert_eq!(text.matches("\nbackend ").count(), 2);
        assert!(text.contains(
            "backend default_svc1_80\n    server default_svc1_80 svc1.default.svc.cluster.local:80 check\n"
        ));
        assert!(text.contains(
            "backend default_svc2_80\n    server default_svc2_80 svc2.default.svc.cluster.local:80 check\n"
        ));
    }

    #[test]
    fn test_render_layout() {
        let rules = vec![RoutingRule::new("a.example.com", "/", "svc1", "web", 8080)];
        let text = renderer().render(&RouteTable::build(&rules)).unwrap();

        let expected_tail = "\
frontend http
    bind *:80
    mode http
    maxconn 65536

    # a.example.com
    acl host_a.example.com hdr(host) -i a.example.com
    acl path_a.example.com_0 path_beg /
    use_backend web_svc1_8080 if host_a.example.com path_a.example.com_0

backend web_svc1_8080
    server web_svc1_8080 svc1.web.svc.cluster.local:8080 check
";
        assert!(text.starts_with("global\n"));
        assert!(text.ends_with(expected_tail), "{text}");

        let global = text.find("global").unwrap();
        let stats = text.find("listen stats").unwrap();
        let frontend = text.find("frontend http").unwrap();
        let backend = text.find("backend web_svc1_8080").unwrap();
        assert!(global < stats && stats < frontend && frontend < backend);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let rules = vec![
            RoutingRule::new("b.example.com", "/", "svc1", "default", 80),
            RoutingRule::new("a.example.com", "/x", "svc2", "default", 80),
            RoutingRule::new("a.example.com", "/", "svc1", "default", 80),
            RoutingRule::new("", "/", "fallback", "default", 80),
        ];
        let table = RouteTable::build(&rules);
        let r = renderer();

        assert_eq!(r.render(&table).unwrap(), r.render(&table).unwrap());
        assert_eq!(
            r.render(&table).unwrap(),
            r.render(&RouteTable::build(&rules)).unwrap()
        );
    }

    #[test]
    fn test_conditions_are_disambiguated_across_hosts() {
        // Two hosts routing to the same service must not share conditions.
        let rules = vec![
            RoutingRule::new("a.example.com", "/", "shared", "default", 80),
            RoutingRule::new("b.example.com", "/", "shared", "default", 80),
        ];
        let text = renderer().render(&RouteTable::build(&rules)).unwrap();

        assert!(text.contains(
            "use_backend default_shared_80 if host_a.example.com path_a.example.com_0"
        ));
        assert!(text.contains(
            "use_backend default_shared_80 if host_b.example.com path_b.example.com_0"
        ));
        assert_eq!(text.matches("\nbackend default_shared_80\n").count(), 1);
    }

    #[test]
    fn test_wildcard_and_catch_all_hosts() {
        let rules = vec![
            RoutingRule::new("", "/", "fallback", "default", 80),
            RoutingRule::new("*.example.com", "/", "wild", "default", 80),
        ];
        let text = renderer().render(&RouteTable::build(&rules)).unwrap();

        assert!(text.contains("acl host__.example.com hdr_end(host) -i .example.com\n"));
        assert!(text.contains("use_backend default_fallback_80 if path__default_0\n"));

        let wild = text.find("host__.example.com").unwrap();
        let any = text.find("# any host").unwrap();
        assert!(wild < any);
    }

    #[test]
    fn test_wildcard_listed_first_does_not_shadow_exact_host() {
        let rules = vec![
            RoutingRule::new("*.example.com", "/", "wild", "default", 80),
            RoutingRule::new("a.example.com", "/", "exact", "default", 80),
        ];
        let text = renderer().render(&RouteTable::build(&rules)).unwrap();
        let frontend = frontend_region(&text);

        let exact = frontend.find("use_backend default_exact_80").unwrap();
        let wild = frontend.find("use_backend default_wild_80").unwrap();
        assert!(exact < wild, "{frontend}");
    }

    #[test]
    fn test_same_service_in_two_namespaces() {
        let rules = vec![
            RoutingRule::new("a.example.com", "/", "api", "team-a", 80),
            RoutingRule::new("b.example.com", "/", "api", "team-b", 80),
        ];
        let text = renderer().render(&RouteTable::build(&rules)).unwrap();

        assert_eq!(text.matches("\nbackend ").count(), 2, "{text}");
        assert!(text.contains(
            "backend team-a_api_80\n    server team-a_api_80 api.team-a.svc.cluster.local:80 check\n"
        ));
        assert!(text.contains(
            "backend team-b_api_80\n    server team-b_api_80 api.team-b.svc.cluster.local:80 check\n"
        ));
        assert!(text.contains("use_backend team-b_api_80 if host_b.example.com"));
    }

    #[test]
    fn test_frontend_maxconn() {
        let config = RenderConfig {
            frontend_maxconn: 2000,
            ..RenderConfig::default()
        };
        let text = Renderer::new(&config)
            .unwrap()
            .render(&RouteTable::default())
            .unwrap();
        assert!(text.ends_with("    mode http\n    maxconn 2000\n"));
    }

    #[test]
    fn test_default_backend() {
        let config = RenderConfig {
            default_backend: Some("127.0.0.1:8081".into()),
            ..RenderConfig::default()
        };
        let text = Renderer::new(&config)
            .unwrap()
            .render(&RouteTable::default())
            .unwrap();

        assert!(text.contains("    default_backend error_pages\n"));
        assert!(
            text.ends_with("backend error_pages\n    server error_pages 127.0.0.1:8081 check\n")
        );
    }

    #[test]
    fn test_custom_preamble() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "global\n    maxconn 100\n\n\n").unwrap();

        let config = RenderConfig {
            preamble_path: Some(file.path().to_path_buf()),
            ..RenderConfig::default()
        };
        let text = Renderer::new(&config)
            .unwrap()
            .render(&RouteTable::default())
            .unwrap();
        assert_eq!(
            text,
            "global\n    maxconn 100\n\nfrontend http\n    bind *:80\n    mode http\n    maxconn 65536\n"
        );

        let missing = RenderConfig {
            preamble_path: Some("/nonexistent/preamble.cfg".into()),
            ..RenderConfig::default()
        };
        assert!(matches!(
            Renderer::new(&missing),
            Err(RenderError::Preamble { .. })
        ));
    }

    #[test]
    fn test_malformed_rules() {
        let r = renderer();
        let render_one = |rule: RoutingRule| r.render(&RouteTable::build(&[rule]));

        assert_eq!(
            render_one(RoutingRule::new("bad host", "/", "svc", "default", 80)),
            Err(RenderError::InvalidHost {
                host: "bad host".into()
            })
        );
        assert!(matches!(
            render_one(RoutingRule::new("a.example.com", "api", "svc", "default", 80)),
            Err(RenderError::InvalidPath { .. })
        ));
        assert!(matches!(
            render_one(RoutingRule::new("a.example.com", "/a b", "svc", "default", 80)),
            Err(RenderError::InvalidPath { .. })
        ));
        assert!(matches!(
            render_one(RoutingRule::new("a.example.com", "/", "", "default", 80)),
            Err(RenderError::InvalidBackend { .. })
        ));
        assert!(matches!(
            render_one(RoutingRule::new("a.example.com", "/", "svc", "default", 0)),
            Err(RenderError::InvalidPort { .. })
        ));
    }
}
