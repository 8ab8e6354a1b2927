//! Per-host token bucket shared by every fetch worker.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::trace;
use url::Url;

/// Token bucket keyed by host name.
///
/// Cloning is cheap and every clone draws from the same buckets.
#[derive(Clone)]
pub struct HostRateLimiter {
    inner: Arc<DefaultKeyedRateLimiter<String>>,
    per_second: NonZeroU32,
}

impl HostRateLimiter {
    /// A limiter allowing `per_second` requests per host, with bursts of the
    /// same size. Zero is treated as one.
    pub fn per_second(per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(per_second);
        Self {
            inner: Arc::new(RateLimiter::keyed(quota)),
            per_second,
        }
    }

    /// Wait until a request to `url`'s host is permitted.
    pub async fn acquire(&self, url: &str) {
        let host = host_key(url);
        self.inner.until_key_ready(&host).await;
        trace!(%host, "Rate limiter token acquired");
    }

    pub fn rate(&self) -> u32 {
        self.per_second.get()
    }
}

impl std::fmt::Debug for HostRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRateLimiter")
            .field("per_second", &self.per_second)
            .finish()
    }
}

/// Bucket key for a URL; unparsable URLs share one bucket.
fn host_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str().map(|h| match u.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            })
        })
        .unwrap_or_default()
}
