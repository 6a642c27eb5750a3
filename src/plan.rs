//! Diff desired endpoints against current endpoints and produce the [`Changes`] required to
//! bring a provider and registry up to date.

use std::collections::HashMap;

use log::info;

use crate::endpoint::{Changes, Endpoint, EndpointId};

/// Policies limit the types of change that will be added to a generated [`Changes`] set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Only create new records. Never update or delete existing ones, even if owned.
    CreateOnly,
    /// Create new records and update owned ones. Never delete.
    Upsert,
    /// Create, update and delete as needed to converge desired and current state.
    Sync,
}

/// Generates a [`Changes`] set from a desired and current endpoint snapshot.
///
/// `current` is expected to already be filtered to the endpoints this instance owns (see
/// [`crate::registry`]) - this function has no concept of ownership, it only diffs sets.
pub fn generate(current: &[Endpoint], desired: &[Endpoint], policy: Policy) -> Changes {
    let mut changes = Changes::default();
    let current_by_id: HashMap<EndpointId, &Endpoint> =
        current.iter().map(|e| (e.id(), e)).collect();
    let mut seen: Vec<EndpointId> = Vec::new();

    for want in desired {
        seen.push(want.id());
        match current_by_id.get(&want.id()) {
            None => {
                info!("{} is not yet present, creating", want.dnsname);
                changes.create.push(want.clone());
            }
            Some(have) => {
                if have.matches(want) {
                    continue;
                }
                match policy {
                    Policy::CreateOnly => {
                        info!(
                            "{} is out of date but policy is create-only, not modifying",
                            want.dnsname
                        );
                    }
                    Policy::Upsert | Policy::Sync => {
                        info!("{} is out of date, updating", want.dnsname);
                        changes.update_old.push((*have).clone());
                        changes.update_new.push(want.clone());
                    }
                }
            }
        }
    }

    if policy == Policy::Sync {
        for have in current {
            if !seen.contains(&have.id()) {
                info!("{} is no longer desired, deleting", have.dnsname);
                changes.delete.push(have.clone());
            }
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;

    fn ep(name: &str, target: &str) -> Endpoint {
        Endpoint {
            dnsname: name.to_string(),
            targets: vec![target.to_string()],
            record_type: RecordType::A,
            record_ttl: None,
            proxied: false,
            container_id: None,
            container_name: None,
        }
    }

    #[test]
    fn sync_creates_updates_and_deletes() {
        let current = vec![
            ep("stale.example.com", "10.0.0.9"),
            ep("outdated.example.com", "10.0.0.8"),
            ep("uptodate.example.com", "10.0.0.1"),
        ];
        let desired = vec![
            ep("new.example.com", "10.0.0.2"),
            ep("outdated.example.com", "10.0.0.3"),
            ep("uptodate.example.com", "10.0.0.1"),
        ];

        let changes = generate(&current, &desired, Policy::Sync);

        assert_eq!(changes.create, vec![ep("new.example.com", "10.0.0.2")]);
        assert_eq!(changes.update_old, vec![ep("outdated.example.com", "10.0.0.8")]);
        assert_eq!(changes.update_new, vec![ep("outdated.example.com", "10.0.0.3")]);
        assert_eq!(changes.delete, vec![ep("stale.example.com", "10.0.0.9")]);
    }

    #[test]
    fn upsert_never_deletes() {
        let current = vec![ep("stale.example.com", "10.0.0.9")];
        let desired = vec![];

        let changes = generate(&current, &desired, Policy::Upsert);
        assert!(changes.delete.is_empty());
    }

    #[test]
    fn create_only_never_updates_or_deletes() {
        let current = vec![
            ep("stale.example.com", "10.0.0.9"),
            ep("outdated.example.com", "10.0.0.8"),
        ];
        let desired = vec![
            ep("new.example.com", "10.0.0.2"),
            ep("outdated.example.com", "10.0.0.3"),
        ];

        let changes = generate(&current, &desired, Policy::CreateOnly);
        assert_eq!(changes.create, vec![ep("new.example.com", "10.0.0.2")]);
        assert!(changes.update_old.is_empty());
        assert!(changes.delete.is_empty());
    }

    #[test]
    fn unchanged_state_produces_no_changes() {
        let current = vec![ep("stable.example.com", "10.0.0.1")];
        let desired = vec![ep("stable.example.com", "10.0.0.1")];
        let changes = generate(&current, &desired, Policy::Sync);
        assert!(changes.is_empty());
    }
}
