//! Publish-once gate for the subscription route.
//!
//! The HTTP layer and the orchestrator share one [`SubscriptionSlot`]. The
//! first successful [`SubscriptionSlot::publish`] fixes route and body for
//! the lifetime of the process; later calls are ignored.

use edgeboot_common::Timestamp;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PublishedSubscription {
    /// Route without leading slash.
    pub route: String,
    /// Base64 bundle served as the response body.
    pub body: String,
    pub published_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionSlot {
    inner: Arc<OnceLock<PublishedSubscription>>,
}

impl SubscriptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this call registered the route.
    pub fn publish(&self, route: &str, body: String) -> bool {
        let route = route.trim_matches('/').to_string();
        let mut won = false;

        self.inner.get_or_init(|| {
            won = true;
            PublishedSubscription {
                route: route.clone(),
                body,
                published_at: Timestamp::now(),
            }
        });

        if won {
            info!("Subscription published at /{}", route);
        } else {
            warn!("Subscription already published, ignoring /{}", route);
        }
        won
    }

    pub fn get(&self) -> Option<&PublishedSubscription> {
        self.inner.get()
    }

    pub fn is_published(&self) -> bool {
        self.inner.get().is_some()
    }

    /// Body for a request path such as `/sub`, if that route is registered.
    pub fn lookup(&self, path: &str) -> Option<&str> {
        let published = self.inner.get()?;
        let requested = path.strip_prefix('/').unwrap_or(path);
        (requested == published.route).then_some(published.body.as_str())
    }
}
