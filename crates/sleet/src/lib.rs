//! sleet - publishes a package feed as static documents on blob storage.
//!
//! All feed writes go through [`fs::FileSystem`], are serialized across processes by
//! [`lock::FeedLock`] and are produced by the [`pipeline::UpdatePipeline`] in a single commit.

pub mod catalog;
pub mod commands;
pub mod domain;
pub mod fs;
pub mod lock;
pub mod pipeline;
pub mod retention;
pub mod service;

pub use domain::{config, package, settings, version};

#[cfg(test)]
mod __tests__;
