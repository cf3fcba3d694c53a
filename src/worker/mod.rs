//! Offline-first response cache that sits in front of the site's network
//! traffic.
//!
//! A worker generation is tied to a version tag. Installing it fills a cache
//! named `<purpose>-<version>` with the app shell; activating it deletes every
//! cache from other generations. While active it intercepts GETs:
//! navigations are network-first with an offline fallback chain, same-origin
//! subresources are stale-while-revalidate.

mod fetch;
mod http;
mod lifecycle;
mod network;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use fetch::{FetchEvent, Handled, PreloadFuture, ResponseSource, Served};
pub use http::{Method, Request, RequestMode, Response};
pub use lifecycle::{Registration, ServiceWorker, WorkerOptions, WorkerState};
pub use network::{HttpNetwork, Network};
pub use store::{MemoryResponseStore, ResponseStore, SqliteResponseStore};
