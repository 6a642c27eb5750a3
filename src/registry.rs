//! Manage ownership of DNS records.
//!
//! Registries are responsible for ensuring that changes are only ever made to records that
//! this instance created, by tracking ownership markers alongside the records themselves.
//!
//! All registries must implement the [`Registry`] trait. Currently, the following registry is
//! available:
//! - [`TxtRegistry`]: tracks ownership via TXT records living in the same zone as the managed
//!   records.
mod txt;

pub use txt::{TxtRegistry, TxtRegistryConfig};

use crate::endpoint::{Changes, Endpoint};
use crate::provider::Provider;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Tracks ownership of managed records and carries ownership-marker mutations alongside
/// record mutations.
#[cfg_attr(test, automock)]
pub trait Registry: Send + Sync {
    fn set_dry_run(&mut self, dry_run: bool);

    /// The observed-owned view: provider records that carry this instance's ownership marker.
    #[allow(clippy::needless_lifetimes)] // needed for mockall
    fn records<'a>(&self, provider: &'a dyn Provider) -> Result<Vec<Endpoint>, RegistryError>;

    /// Applies a [`Changes`] set: non-TXT changes go to the provider first, then ownership
    /// markers are created, updated or deleted to match.
    #[allow(clippy::needless_lifetimes)] // needed for mockall
    fn sync<'a>(&self, provider: &'a dyn Provider, changes: &Changes) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("internal registry error: `{0}`")]
    Internal(String),
}
impl From<String> for RegistryError {
    fn from(s: String) -> Self {
        RegistryError::Internal(s)
    }
}
