//! Interface with DNS providers and get/set zone records.
//!
//! Providers are DNS server providers such as Cloudflare that can be accessed through an API.
//! All providers must implement the [`Provider`] trait. Currently, the following providers are
//! available:
//! - [`CloudflareProvider`]: Interfaces with the Cloudflare DNS and zone API
mod cloudflare;

// Re-exports for convenience
pub use self::cloudflare::{CloudflareProvider, CloudflareProviderConfig};

use crate::endpoint::{Endpoint, RecordType};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Two-label public suffixes for which zone matching must keep a third label.
/// Hardcoded and non-exhaustive; see the design notes on the zone suffix heuristic.
const TWO_LABEL_PUBLIC_SUFFIXES: &[&str] = &["com.au", "co.uk", "co.nz", "co.za", "com.br", "com.mx"];

/// Returns the registrable "zone apex" that an endpoint's dnsname would live under, using a
/// longest-suffix heuristic with a small table of two-label public suffixes that need an
/// extra label kept.
///
/// This does not consult an actual public suffix list; it is a pragmatic approximation that
/// matches how the rest of the system has always picked zones.
pub fn domain_for_hostname(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    let last_two = labels[labels.len() - 2..].join(".");
    if TWO_LABEL_PUBLIC_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

/// A single DNS zone as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Whether `domain_filter`/`exclude_domains` glob-style patterns (`*.example.com` or an exact
/// apex) match a zone name.
pub fn domain_pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => name == suffix || name.ends_with(&format!(".{suffix}")),
        None => pattern == name,
    }
}

/// Filters a list of zones by an include list (empty means "match nothing" - see design
/// notes, this is intentional) and an optional exclude list.
pub fn filter_zones(zones: Vec<Zone>, domain_filter: &[String], exclude_domains: &[String]) -> Vec<Zone> {
    zones
        .into_iter()
        .filter(|z| domain_filter.iter().any(|p| domain_pattern_matches(p, &z.name)))
        .filter(|z| !exclude_domains.iter().any(|p| domain_pattern_matches(p, &z.name)))
        .collect()
}

/// Trait implemented by DNS providers such as Cloudflare, PowerDNS, etc. Responsible for
/// reading and writing [`Endpoint`]s (of any [`RecordType`], including TXT ownership markers)
/// against the zones it is configured to manage.
#[cfg_attr(test, automock)]
pub trait Provider: Send + Sync {
    /// Tell the provider to not apply any changes, only to log what it would have done.
    fn set_dry_run(&mut self, dry_run: bool);
    fn dry_run(&self) -> bool;

    /// All zones this provider is configured to manage, after domain filtering.
    fn zones(&self) -> Result<Vec<Zone>, ProviderError>;

    /// All non-TXT records across managed zones, one [`Endpoint`] per record.
    fn records(&self) -> Result<Vec<Endpoint>, ProviderError>;

    /// All TXT records across managed zones, one [`Endpoint`] per record. Kept distinct from
    /// [`Provider::records`] because the registry needs to see TXT content the plain record
    /// view intentionally hides.
    fn txt_records(&self) -> Result<Vec<Endpoint>, ProviderError>;

    /// Create a single record.
    fn create(&self, endpoint: &Endpoint) -> Result<(), ProviderError>;
    /// Update a single record in place (content/ttl/proxied changed, name and type did not).
    fn update(&self, old: &Endpoint, new: &Endpoint) -> Result<(), ProviderError>;
    /// Delete a single record.
    fn delete(&self, endpoint: &Endpoint) -> Result<(), ProviderError>;
}

/// Generic error returned by providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("no zone found for record {0}")]
    NoZoneForRecord(String),
    #[error("no matching record found for {0} {1}")]
    RecordNotFound(String, RecordType),
    #[error("internal provider error: `{0}`")]
    Internal(String),
}
impl From<String> for ProviderError {
    fn from(s: String) -> Self {
        ProviderError::Internal(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_for_hostname_picks_last_two_labels_by_default() {
        assert_eq!(domain_for_hostname("web.apps.example.com"), "example.com");
        assert_eq!(domain_for_hostname("example.com"), "example.com");
    }

    #[test]
    fn domain_for_hostname_extends_known_two_label_suffixes() {
        assert_eq!(domain_for_hostname("web.shop.example.co.uk"), "example.co.uk");
        assert_eq!(domain_for_hostname("web.example.com.au"), "example.com.au");
    }

    #[test]
    fn domain_pattern_matches_wildcard_and_exact() {
        assert!(domain_pattern_matches("*.example.com", "apps.example.com"));
        assert!(domain_pattern_matches("*.example.com", "example.com"));
        assert!(!domain_pattern_matches("*.example.com", "example.org"));
        assert!(domain_pattern_matches("example.com", "example.com"));
        assert!(!domain_pattern_matches("example.com", "apps.example.com"));
    }

    #[test]
    fn filter_zones_empty_include_list_matches_nothing() {
        let zones = vec![Zone { id: "1".into(), name: "example.com".into() }];
        assert!(filter_zones(zones, &[], &[]).is_empty());
    }

    #[test]
    fn filter_zones_respects_exclude() {
        let zones = vec![
            Zone { id: "1".into(), name: "example.com".into() },
            Zone { id: "2".into(), name: "internal.example.com".into() },
        ];
        let filtered = filter_zones(
            zones,
            &["*.example.com".to_string(), "example.com".to_string()],
            &["internal.example.com".to_string()],
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "example.com");
    }
}
