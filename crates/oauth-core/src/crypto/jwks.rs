use crate::error::CryptoError;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// How long a failed fetch suppresses retries for the same URL.
const NEGATIVE_TTL: Duration = Duration::from_secs(60);

/// A JWKS document as fetched, with the origin's caching hint.
pub struct FetchedJwks {
    pub keys: JwkSet,
    /// `Cache-Control: max-age` of the response, if any.
    pub max_age: Option<Duration>,
}

/// Fetches a JWKS document from a URL.
///
/// Behind a trait so tests can count fetches and serve fixtures without a
/// network.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch_jwks(&self, url: &str) -> Result<FetchedJwks, CryptoError>;
}

/// Production fetcher: HTTP GET with a 5 second total deadline.
pub struct HttpJwksFetcher {
    client: reqwest::Client,
}

impl HttpJwksFetcher {
    pub fn new() -> Result<Self, CryptoError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CryptoError::Failure(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch_jwks(&self, url: &str) -> Result<FetchedJwks, CryptoError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CryptoError::Failure(format!("JWKS fetch from {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CryptoError::Failure(format!(
                "JWKS endpoint {url} returned {}",
                response.status()
            )));
        }

        let max_age = parse_max_age(response.headers());
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| CryptoError::Failure(format!("JWKS document from {url} unreadable: {e}")))?;

        Ok(FetchedJwks { keys, max_age })
    }
}

fn parse_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?;
    for directive in value.split(',') {
        if let Some(seconds) = directive.trim().strip_prefix("max-age=") {
            return seconds.trim().parse::<u64>().ok().map(Duration::from_secs);
        }
    }
    None
}

struct CacheSlot {
    /// `None` marks a negative entry (recent fetch failure).
    keys: Option<Arc<JwkSet>>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheSlot {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Per-URL JWKS cache with single-flight fetches.
///
/// Entry TTL is `min(Cache-Control max-age, configured ttl)`; a non-2xx or
/// unreachable endpoint is negative-cached for 60 seconds. Concurrent misses
/// for one URL coalesce behind a per-URL mutex so at most one fetch is in
/// flight.
pub struct JwksCache {
    fetcher: Arc<dyn JwksFetcher>,
    max_ttl: Duration,
    entries: RwLock<HashMap<String, CacheSlot>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JwksCache {
    pub fn new(fetcher: Arc<dyn JwksFetcher>, max_ttl: Duration) -> Self {
        Self {
            fetcher,
            max_ttl,
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, url: &str) -> Result<Arc<JwkSet>, CryptoError> {
        if let Some(hit) = self.lookup(url).await {
            return hit;
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // Whoever held the gate before us may have already filled the slot.
        if let Some(hit) = self.lookup(url).await {
            return hit;
        }

        let outcome = match self.fetcher.fetch_jwks(url).await {
            Ok(fetched) => {
                let ttl = fetched.max_age.unwrap_or(self.max_ttl).min(self.max_ttl);
                let keys = Arc::new(fetched.keys);
                self.entries.write().await.insert(
                    url.to_string(),
                    CacheSlot {
                        keys: Some(keys.clone()),
                        fetched_at: Instant::now(),
                        ttl,
                    },
                );
                tracing::debug!(url, ttl_secs = ttl.as_secs(), "JWKS cached");
                Ok(keys)
            }
            Err(e) => {
                self.entries.write().await.insert(
                    url.to_string(),
                    CacheSlot {
                        keys: None,
                        fetched_at: Instant::now(),
                        ttl: NEGATIVE_TTL,
                    },
                );
                tracing::warn!(url, error = %e, "JWKS fetch failed; negative-cached");
                Err(e)
            }
        };

        self.inflight.lock().await.remove(url);
        outcome
    }

    async fn lookup(&self, url: &str) -> Option<Result<Arc<JwkSet>, CryptoError>> {
        let entries = self.entries.read().await;
        let slot = entries.get(url)?;
        if !slot.is_fresh() {
            return None;
        }
        Some(match &slot.keys {
            Some(keys) => Ok(keys.clone()),
            None => Err(CryptoError::Failure(format!(
                "JWKS fetch for {url} failed recently; retry suppressed"
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl CountingFetcher {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: None,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
                delay: None,
            }
        }

        fn slow() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Some(Duration::from_millis(50)),
            }
        }
    }

    #[async_trait]
    impl JwksFetcher for CountingFetcher {
        async fn fetch_jwks(&self, _url: &str) -> Result<FetchedJwks, CryptoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(CryptoError::Failure("boom".to_string()));
            }
            Ok(FetchedJwks {
                keys: JwkSet { keys: Vec::new() },
                max_age: None,
            })
        }
    }

    #[tokio::test]
    async fn test_second_get_hits_cache() {
        let fetcher = Arc::new(CountingFetcher::ok());
        let cache = JwksCache::new(fetcher.clone(), Duration::from_secs(3600));

        cache.get("https://idp.test/jwks").await.unwrap();
        cache.get("https://idp.test/jwks").await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let fetcher = Arc::new(CountingFetcher::slow());
        let cache = Arc::new(JwksCache::new(fetcher.clone(), Duration::from_secs(3600)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get("https://idp.test/jwks").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_negative_cached() {
        let fetcher = Arc::new(CountingFetcher::failing());
        let cache = JwksCache::new(fetcher.clone(), Duration::from_secs(3600));

        assert!(cache.get("https://idp.test/jwks").await.is_err());
        assert!(cache.get("https://idp.test/jwks").await.is_err());

        // second error came from the negative entry, not a second fetch
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_urls_are_cached_independently() {
        let fetcher = Arc::new(CountingFetcher::ok());
        let cache = JwksCache::new(fetcher.clone(), Duration::from_secs(3600));

        cache.get("https://a.test/jwks").await.unwrap();
        cache.get("https://b.test/jwks").await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
