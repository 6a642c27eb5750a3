//! Core library for the `sherpa-dns` controller.
//!
//! For usage information, see: [here](https://github.com/spacebird-dev/sherpa-dns)
//!
//! The following modules are of interest if you want to add new functionality:
//! - [`source`]s observe a container runtime and produce the set of desired [`endpoint::Endpoint`]s
//! - [`provider`]s are DNS providers such as Cloudflare that ultimately serve the records we manage
//! - [`registry`] tracks ownership of DNS records so that multiple instances or unrelated records are not clobbered
//! - [`plan`] diffs desired against current state and produces a [`endpoint::Changes`] set
//! - [`cleanup`] delays deletion of records so that flapping containers don't cause churn
//! - [`controller`] ties the above together into a running reconciliation loop

#![allow(clippy::uninlined_format_args)]

pub mod cleanup;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod health;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod source;
