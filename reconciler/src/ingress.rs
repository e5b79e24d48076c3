//! The subset of the Kubernetes Ingress API the controller reads.
//!
//! Both the `networking.k8s.io/v1` backend shape (`service.name`,
//! `service.port.number`) and the older `extensions/v1beta1` shape
//! (`serviceName`, `servicePort`) are accepted. `pathType` is ignored; every
//! path is matched as a prefix.
use crate::types::RoutingRule;
use serde::Deserialize;

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IngressList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Ingress>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListMeta {
    #[serde(rename = "continue", default)]
    pub continue_token: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Ingress {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IngressSpec,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default, alias = "backend")]
    pub default_backend: Option<IngressBackend>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IngressRule {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub http: Option<HttpRuleValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HttpRuleValue {
    #[serde(default)]
    pub paths: Vec<HttpPath>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpPath {
    #[serde(default)]
    pub path: String,
    pub backend: IngressBackend,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressBackend {
    #[serde(default)]
    pub service: Option<ServiceBackend>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub service_port: Option<PortValue>,
    #[serde(default)]
    pub resource: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceBackend {
    pub name: String,
    #[serde(default)]
    pub port: ServiceBackendPort,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceBackendPort {
    #[serde(default)]
    pub number: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Name(String),
}

/// Why a path was left out of the snapshot.
#[derive(Debug, PartialEq)]
pub enum Unroutable {
    NamedPort(String),
    ResourceBackend,
    MissingService,
}

impl IngressBackend {
    fn service_and_port(&self) -> Result<(&str, u16), Unroutable> {
        if let Some(service) = &self.service {
            return match (service.port.number, &service.port.name) {
                (Some(number), _) => Ok((service.name.as_str(), number)),
                (None, Some(name)) => Err(Unroutable::NamedPort(name.clone())),
                (None, None) => Err(Unroutable::MissingService),
            };
        }

        if let Some(name) = &self.service_name {
            return match &self.service_port {
                Some(PortValue::Number(number)) => Ok((name.as_str(), *number)),
                Some(PortValue::Name(port)) => match port.parse::<u16>() {
                    Ok(number) => Ok((name.as_str(), number)),
                    Err(_) => Err(Unroutable::NamedPort(port.clone())),
                },
                None => Err(Unroutable::MissingService),
            };
        }

        if self.resource.is_some() {
            return Err(Unroutable::ResourceBackend);
        }

        Err(Unroutable::MissingService)
    }
}

impl Ingress {
    fn namespace(&self) -> &str {
        if self.metadata.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.metadata.namespace
        }
    }

    /// Flattens the ingress into rules, in listing order. The ingress-wide
    /// default backend becomes a catch-all rule for `/`.
    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        let namespace = self.namespace();
        let mut rules = Vec::new();

        let mut push = |host: &str, path: &str, backend: &IngressBackend| {
            match backend.service_and_port() {
                Ok((service, port)) => {
                    rules.push(RoutingRule::new(host, path, service, namespace, port));
                }
                Err(reason) => {
                    tracing::warn!(
                        ingress = %self.metadata.name,
                        namespace,
                        host,
                        path,
                        reason = ?reason,
                        "Skipping unroutable ingress path"
                    );
                }
            }
        };

        if let Some(backend) = &self.spec.default_backend {
            push("", "/", backend);
        }

        for rule in &self.spec.rules {
            let Some(http) = &rule.http else {
                continue;
            };
            for path in &http.paths {
                push(&rule.host, &path.path, &path.backend);
            }
        }

        rules
    }
}

impl IngressList {
    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        self.items.iter().flat_map(Ingress::routing_rules).collect()
    }
}
