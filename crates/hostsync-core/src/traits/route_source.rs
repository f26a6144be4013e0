// # Route Source Trait
//
// Defines the boundary to the remote route API.
//
// ## Implementations
//
// - HTTP-based: `hostsync-route-http` crate
// - Test doubles: scripted sources in the contract tests
//
// ## Usage
//
// ```rust,ignore
// use hostsync_core::RouteSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* RouteSource implementation */;
//
//     for route in source.fetch().await? {
//         println!("{} enabled={}", route.domain, route.enabled);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One route record as returned by the route API
///
/// Only `domain` and `enabled` are consumed by the engine; the remaining
/// fields are carried so the record round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Record identifier
    #[serde(default)]
    pub id: i64,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Hostname to resolve locally
    #[serde(default)]
    pub domain: String,
    /// Upstream the reverse proxy forwards to
    #[serde(default)]
    pub target: String,
    /// Whether the route is active
    #[serde(default)]
    pub enabled: bool,
}

impl Route {
    /// Create an enabled route for `domain`
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: String::new(),
            domain: domain.into(),
            target: String::new(),
            enabled: true,
        }
    }

    /// Enable or disable the route
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Trait for route source implementations
///
/// A route source performs exactly one read of the remote route set per
/// call. Implementations must bound the call with a timeout and must not
/// retry internally: the engine's next scheduled cycle is the retry.
///
/// Every failure mode (unreachable endpoint, non-2xx status, malformed
/// payload) is reported as [`Error::Fetch`](crate::Error::Fetch).
#[async_trait]
pub trait RouteSource: Send + Sync {
    /// Fetch the current route set, in the order the API returned it
    async fn fetch(&self) -> Result<Vec<Route>, crate::Error>;

    /// Short name used in log messages
    fn source_name(&self) -> &'static str {
        "routes"
    }
}
