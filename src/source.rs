//! Observe the local container runtime and turn container labels into desired [`Endpoint`]s.
//!
//! The concrete runtime client lives in [`docker`]; this module is the runtime-agnostic label
//! parsing and endpoint extraction logic, tested against [`MockContainerRuntime`].
pub mod docker;

use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;
use log::warn;
use thiserror::Error;

use crate::endpoint::{Endpoint, RecordType};

/// One network a container is attached to, as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerNetwork {
    pub ip_address: Option<String>,
    pub global_ipv6_address: Option<String>,
}

/// A running container as observed by [`ContainerRuntime::list_containers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Keyed by network name (e.g. `bridge`).
    pub networks: HashMap<String, ContainerNetwork>,
}

/// A lifecycle event as observed by the runtime's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub status: String,
    pub container_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("could not reach the container runtime: `{0}`")]
    RuntimeUnreachable(String),
    #[error("internal source error: `{0}`")]
    Internal(String),
}

/// Abstraction over the local container runtime. Implemented concretely by
/// [`docker::DockerRuntime`].
#[cfg_attr(test, automock)]
pub trait ContainerRuntime: Send + Sync {
    fn list_containers(&self) -> Result<Vec<Container>, SourceError>;
}

/// How to select which containers contribute endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelFilter {
    None,
    /// The label key must be present, value irrelevant.
    KeyPresent(String),
    /// The label key must be present with exactly this value.
    KeyEquals(String, String),
}
impl LabelFilter {
    pub fn parse(s: &str) -> LabelFilter {
        match s.split_once('=') {
            Some((k, v)) => LabelFilter::KeyEquals(k.to_string(), v.to_string()),
            None if s.is_empty() => LabelFilter::None,
            None => LabelFilter::KeyPresent(s.to_string()),
        }
    }

    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            LabelFilter::None => true,
            LabelFilter::KeyPresent(k) => labels.contains_key(k),
            LabelFilter::KeyEquals(k, v) => labels.get(k).map(String::as_str) == Some(v.as_str()),
        }
    }
}

/// Extracts desired [`Endpoint`]s from the live container set.
pub struct Source {
    runtime: Box<dyn ContainerRuntime>,
    label_prefix: String,
    label_filter: LabelFilter,
}

impl Source {
    pub fn new(runtime: Box<dyn ContainerRuntime>, label_prefix: String, label_filter: LabelFilter) -> Self {
        Source {
            runtime,
            label_prefix,
            label_filter,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let containers = self.runtime.list_containers()?;
        let mut endpoints = Vec::new();
        for container in &containers {
            if !self.label_filter.matches(&container.labels) {
                continue;
            }
            endpoints.extend(self.endpoints_for_container(container));
        }
        Ok(endpoints)
    }

    /// Endpoints declared by a single container. Used both by [`Source::endpoints`] and by the
    /// controller's fast-path re-query on a `start` event.
    pub fn endpoints_for_container(&self, container: &Container) -> Vec<Endpoint> {
        let hostname_key = format!("{}/hostname", self.label_prefix);
        let mut wanted: Vec<(String, Option<String>)> = Vec::new(); // (hostname, alias)

        for (key, value) in &container.labels {
            if key == &hostname_key {
                wanted.extend(value.split(',').map(|h| (h.trim().to_string(), None)));
            } else if let Some(alias) = key
                .strip_prefix(&hostname_key)
                .and_then(|rest| rest.strip_prefix('.'))
            {
                wanted.extend(
                    value
                        .split(',')
                        .map(|h| (h.trim().to_string(), Some(alias.to_string()))),
                );
            }
        }

        wanted
            .into_iter()
            .filter(|(h, _)| !h.is_empty())
            .filter_map(|(hostname, alias)| self.build_endpoint(container, &hostname, alias.as_deref()))
            .collect()
    }

    fn label(&self, container: &Container, key: &str, alias: Option<&str>) -> Option<String> {
        if let Some(alias) = alias {
            if let Some(v) = container.labels.get(&format!("{}/{}.{}", self.label_prefix, key, alias)) {
                return Some(v.clone());
            }
        }
        container.labels.get(&format!("{}/{}", self.label_prefix, key)).cloned()
    }

    fn build_endpoint(&self, container: &Container, hostname: &str, alias: Option<&str>) -> Option<Endpoint> {
        let record_type: RecordType = self
            .label(container, "type", alias)
            .and_then(|v| v.parse().ok())
            .unwrap_or(RecordType::A);
        let ttl = self
            .label(container, "ttl", alias)
            .and_then(|v| v.parse::<u32>().ok());
        let proxied = self
            .label(container, "proxied", alias)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let explicit_target = self.label(container, "target", alias);
        let network_label = self.label(container, "network", alias);

        let target = explicit_target.or_else(|| self.resolve_target(container, record_type, network_label.as_deref()));

        let Some(target) = target else {
            warn!(
                "container {} requested hostname {} but no target could be resolved, skipping",
                container.name, hostname
            );
            return None;
        };

        Some(Endpoint {
            dnsname: hostname.to_string(),
            targets: vec![target],
            record_type,
            record_ttl: ttl,
            proxied,
            container_id: Some(container.id.clone()),
            container_name: Some(container.name.clone()),
        })
    }

    fn resolve_target(&self, container: &Container, record_type: RecordType, network_label: Option<&str>) -> Option<String> {
        match record_type {
            RecordType::Cname => Some(container.name.clone()),
            RecordType::A | RecordType::Aaaa => {
                let network = self.select_network(container, network_label)?;
                match record_type {
                    RecordType::A => network.ip_address.clone(),
                    RecordType::Aaaa => network.global_ipv6_address.clone(),
                    _ => unreachable!(),
                }
            }
            RecordType::Txt => None,
        }
    }

    /// Network selection heuristic: an explicit label wins; otherwise prefer `bridge`;
    /// otherwise the lexicographically-first network name (so the choice is at least stable).
    fn select_network<'a>(&self, container: &'a Container, network_label: Option<&str>) -> Option<&'a ContainerNetwork> {
        if let Some(name) = network_label {
            return container.networks.get(name);
        }
        if let Some(bridge) = container.networks.get("bridge") {
            return Some(bridge);
        }
        container
            .networks
            .keys()
            .min()
            .and_then(|name| container.networks.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_with(labels: &[(&str, &str)], networks: &[(&str, Option<&str>, Option<&str>)]) -> Container {
        Container {
            id: "abc123".to_string(),
            name: "web-1".to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            networks: networks
                .iter()
                .map(|(name, v4, v6)| {
                    (
                        name.to_string(),
                        ContainerNetwork {
                            ip_address: v4.map(String::from),
                            global_ipv6_address: v6.map(String::from),
                        },
                    )
                })
                .collect(),
        }
    }

    fn source() -> Source {
        Source::new(
            Box::new(MockContainerRuntime::new()),
            "sherpa.dns".to_string(),
            LabelFilter::None,
        )
    }

    #[test]
    fn bare_hostname_resolves_to_bridge_ip() {
        let c = container_with(
            &[("sherpa.dns/hostname", "web.example.com")],
            &[("bridge", Some("10.0.0.5"), None)],
        );
        let eps = source().endpoints_for_container(&c);
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].dnsname, "web.example.com");
        assert_eq!(eps[0].targets, vec!["10.0.0.5".to_string()]);
        assert_eq!(eps[0].record_type, RecordType::A);
    }

    #[test]
    fn alias_labels_take_precedence_over_generic_ones() {
        let c = container_with(
            &[
                ("sherpa.dns/hostname.api", "api.example.com"),
                ("sherpa.dns/ttl", "60"),
                ("sherpa.dns/ttl.api", "300"),
            ],
            &[("bridge", Some("10.0.0.5"), None)],
        );
        let eps = source().endpoints_for_container(&c);
        assert_eq!(eps[0].record_ttl, Some(300));
    }

    #[test]
    fn explicit_network_label_is_honored() {
        let c = container_with(
            &[
                ("sherpa.dns/hostname", "web.example.com"),
                ("sherpa.dns/network", "internal"),
            ],
            &[("bridge", Some("10.0.0.5"), None), ("internal", Some("10.0.1.5"), None)],
        );
        let eps = source().endpoints_for_container(&c);
        assert_eq!(eps[0].targets, vec!["10.0.1.5".to_string()]);
    }

    #[test]
    fn explicit_target_label_overrides_network_lookup() {
        let c = container_with(
            &[
                ("sherpa.dns/hostname", "web.example.com"),
                ("sherpa.dns/target", "203.0.113.9"),
            ],
            &[],
        );
        let eps = source().endpoints_for_container(&c);
        assert_eq!(eps[0].targets, vec!["203.0.113.9".to_string()]);
    }

    #[test]
    fn cname_defaults_to_container_name() {
        let c = container_with(
            &[
                ("sherpa.dns/hostname", "alias.example.com"),
                ("sherpa.dns/type", "CNAME"),
            ],
            &[],
        );
        let eps = source().endpoints_for_container(&c);
        assert_eq!(eps[0].targets, vec!["web-1".to_string()]);
    }

    #[test]
    fn unresolvable_target_is_dropped() {
        let c = container_with(&[("sherpa.dns/hostname", "web.example.com")], &[]);
        assert!(source().endpoints_for_container(&c).is_empty());
    }

    #[test]
    fn multiple_hostnames_on_one_label_all_resolve() {
        let c = container_with(
            &[("sherpa.dns/hostname", "a.example.com, b.example.com")],
            &[("bridge", Some("10.0.0.5"), None)],
        );
        let eps = source().endpoints_for_container(&c);
        let names: Vec<&str> = eps.iter().map(|e| e.dnsname.as_str()).collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn label_filter_key_equals_excludes_non_matching_containers() {
        let filter = LabelFilter::parse("sherpa.dns/enable=true");
        let mut labels = HashMap::new();
        labels.insert("sherpa.dns/enable".to_string(), "false".to_string());
        assert!(!filter.matches(&labels));
        labels.insert("sherpa.dns/enable".to_string(), "true".to_string());
        assert!(filter.matches(&labels));
    }

    #[test]
    fn network_without_explicit_label_falls_back_to_lexicographic_first() {
        let c = container_with(
            &[("sherpa.dns/hostname", "web.example.com")],
            &[("zzz", Some("10.0.2.1"), None), ("aaa", Some("10.0.1.1"), None)],
        );
        let eps = source().endpoints_for_container(&c);
        assert_eq!(eps[0].targets, vec!["10.0.1.1".to_string()]);
    }
}
