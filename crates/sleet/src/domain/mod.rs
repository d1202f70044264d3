//! Domain types - core feed entities
//!
//! Versions, package identities and descriptors, the tool's own configuration and the feed
//! settings document. Independent of storage and of the services that publish them.

pub mod config;
pub mod package;
pub mod package_set;
pub mod settings;
pub mod version;
