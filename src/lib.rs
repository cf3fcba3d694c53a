//! Client caching core for the hub front-end.
//!
//! - [`cache`]: stale-while-revalidate value cache persisted as one manifest
//! - [`worker`]: versioned, offline-first response cache for intercepted requests

pub mod cache;
pub mod clock;
pub mod config;
pub mod worker;
