//! The core data model: [`Endpoint`]s and the [`Changes`] needed to reconcile them.

use std::collections::HashSet;
use std::fmt::Display;

/// TTL sentinel meaning "let the provider pick its default". Mirrors the provider-side
/// convention of using 1 second as a value no one would configure on purpose.
pub const TTL_AUTO: u32 = 1;

/// The DNS record types this controller is willing to manage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Txt,
}
impl Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RecordType::A => "A",
                RecordType::Aaaa => "AAAA",
                RecordType::Cname => "CNAME",
                RecordType::Txt => "TXT",
            }
        )
    }
}
impl std::str::FromStr for RecordType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            other => Err(format!("unrecognized record type: {other}")),
        }
    }
}

/// Identity of an [`Endpoint`]: the pair that two endpoints must share to be considered
/// "the same record" by the planner and registry.
pub type EndpointId = (String, RecordType);

/// A single desired (or observed) DNS record, along with the container that declared it.
///
/// Two endpoints are the same record iff [`Endpoint::id`] matches; `targets` may still hold
/// more than one value (e.g. round-robin A records).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub dnsname: String,
    pub targets: Vec<String>,
    pub record_type: RecordType,
    /// `None` and `Some(TTL_AUTO)` are equivalent: both mean "provider default".
    pub record_ttl: Option<u32>,
    pub proxied: bool,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
}

impl Endpoint {
    pub fn id(&self) -> EndpointId {
        (self.dnsname.to_ascii_lowercase(), self.record_type)
    }

    pub fn ttl_or_auto(&self) -> u32 {
        self.record_ttl.unwrap_or(TTL_AUTO)
    }

    /// Whether `other` is an acceptable substitute for `self` as far as the DNS backend is
    /// concerned: same target set (order-independent), same TTL, same proxied flag.
    pub fn matches(&self, other: &Endpoint) -> bool {
        let self_targets: HashSet<&String> = self.targets.iter().collect();
        let other_targets: HashSet<&String> = other.targets.iter().collect();
        self_targets == other_targets
            && self.ttl_or_auto() == other.ttl_or_auto()
            && self.proxied == other.proxied
    }
}
impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {:?} (ttl={}, proxied={})",
            self.record_type,
            self.dnsname,
            self.targets,
            self.ttl_or_auto(),
            self.proxied
        )
    }
}

/// The result of diffing a desired endpoint set against a current one: what the registry and
/// provider need to do to converge. `update_old[i]` and `update_new[i]` always share an id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Changes {
    pub create: Vec<Endpoint>,
    pub update_old: Vec<Endpoint>,
    pub update_new: Vec<Endpoint>,
    pub delete: Vec<Endpoint>,
}

impl Changes {
    pub fn has_changes(&self) -> bool {
        !self.create.is_empty()
            || !self.update_old.is_empty()
            || !self.delete.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(name: &str, targets: &[&str]) -> Endpoint {
        Endpoint {
            dnsname: name.to_string(),
            targets: targets.iter().map(|s| s.to_string()).collect(),
            record_type: RecordType::A,
            record_ttl: None,
            proxied: false,
            container_id: None,
            container_name: None,
        }
    }

    #[test]
    fn id_is_case_insensitive_on_name() {
        let a = ep("Web.Example.com", &["10.0.0.1"]);
        let b = ep("web.example.com", &["10.0.0.1"]);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn matches_ignores_target_order() {
        let a = ep("web.example.com", &["10.0.0.1", "10.0.0.2"]);
        let b = ep("web.example.com", &["10.0.0.2", "10.0.0.1"]);
        assert!(a.matches(&b));
    }

    #[test]
    fn matches_treats_auto_ttl_as_equal_to_sentinel() {
        let mut a = ep("web.example.com", &["10.0.0.1"]);
        let mut b = ep("web.example.com", &["10.0.0.1"]);
        a.record_ttl = None;
        b.record_ttl = Some(TTL_AUTO);
        assert!(a.matches(&b));
    }

    #[test]
    fn record_type_roundtrips_through_display_and_fromstr() {
        use std::str::FromStr;
        for rt in [RecordType::A, RecordType::Aaaa, RecordType::Cname, RecordType::Txt] {
            assert_eq!(RecordType::from_str(&rt.to_string().to_lowercase()).unwrap(), rt);
        }
    }
}
