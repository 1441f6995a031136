//! Per-profile catalogue loading with in-flight deduplication.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use foundation::ProfileId;
use futures_util::FutureExt;
use futures_util::future::Shared;
use parking_lot::Mutex;
use runtime::BoxFuture;

use crate::catalogue::{ThemeCatalogue, parse_catalogue};
use crate::error::{SourceError, ThemeLoadError};

/// Where raw catalogue documents come from.
pub trait CatalogueSource: Send + Sync {
    fn fetch_catalogue<'a>(&'a self, profile: &'a ProfileId) -> BoxFuture<'a, Result<String, SourceError>>;
}

/// Catalogue documents held in memory, keyed by profile.
#[derive(Debug, Default)]
pub struct StaticCatalogueSource {
    documents: HashMap<ProfileId, String>,
    fetches: AtomicUsize,
}

impl StaticCatalogueSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, profile: impl Into<ProfileId>, raw: impl Into<String>) -> Self {
        self.documents.insert(profile.into(), raw.into());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl CatalogueSource for StaticCatalogueSource {
    fn fetch_catalogue<'a>(&'a self, profile: &'a ProfileId) -> BoxFuture<'a, Result<String, SourceError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let found = self
            .documents
            .get(profile)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(profile.to_string()));
        Box::pin(async move { found })
    }
}

type LoadResult = Result<Arc<ThemeCatalogue>, ThemeLoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Loads and memoizes theme catalogues.
///
/// Concurrent loads of one profile share a single fetch. Only successful
/// loads are memoized, so a failed load is retried on the next call.
pub struct ThemeLoader {
    source: Arc<dyn CatalogueSource>,
    completed: Mutex<HashMap<ProfileId, Arc<ThemeCatalogue>>>,
    in_flight: Mutex<HashMap<ProfileId, (u64, SharedLoad)>>,
    next_ticket: AtomicU64,
}

impl std::fmt::Debug for ThemeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeLoader")
            .field("completed", &self.completed.lock().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl ThemeLoader {
    pub fn new(source: Arc<dyn CatalogueSource>) -> Self {
        Self {
            source,
            completed: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub async fn load(&self, profile: &ProfileId) -> LoadResult {
        if let Some(done) = self.completed.lock().get(profile).cloned() {
            return Ok(done);
        }

        let (ticket, pending) = {
            let mut in_flight = self.in_flight.lock();
            if let Some(done) = self.completed.lock().get(profile).cloned() {
                return Ok(done);
            }
            match in_flight.get(profile) {
                Some((ticket, pending)) => (*ticket, pending.clone()),
                None => {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                    let pending = self.start_fetch(profile.clone());
                    in_flight.insert(profile.clone(), (ticket, pending.clone()));
                    (ticket, pending)
                }
            }
        };

        let result = pending.await;

        let mut in_flight = self.in_flight.lock();
        let still_current = in_flight.get(profile).is_some_and(|(t, _)| *t == ticket);
        if still_current {
            in_flight.remove(profile);
            if let Ok(catalogue) = &result {
                self.completed.lock().insert(profile.clone(), catalogue.clone());
            }
        }
        result
    }

    fn start_fetch(&self, profile: ProfileId) -> SharedLoad {
        let source = self.source.clone();
        let fut: BoxFuture<'static, LoadResult> = Box::pin(async move {
            tracing::debug!(profile = %profile, "fetching theme catalogue");
            let raw = source
                .fetch_catalogue(&profile)
                .await
                .map_err(|e| ThemeLoadError::Fetch {
                    profile: profile.clone(),
                    message: e.to_string(),
                });
            let parsed = raw.and_then(|raw| parse_catalogue(&profile, &raw));
            match parsed {
                Ok(catalogue) => {
                    tracing::info!(
                        profile = %profile,
                        themes = catalogue.themes.len(),
                        default = %catalogue.default_theme,
                        "theme catalogue loaded"
                    );
                    Ok(Arc::new(catalogue))
                }
                Err(e) => {
                    tracing::warn!(profile = %profile, "theme catalogue load failed: {e}");
                    Err(e)
                }
            }
        });
        fut.shared()
    }

    /// Memoized catalogue, if one is loaded.
    pub fn cached(&self, profile: &ProfileId) -> Option<Arc<ThemeCatalogue>> {
        self.completed.lock().get(profile).cloned()
    }

    pub fn is_loading(&self, profile: &ProfileId) -> bool {
        self.in_flight.lock().contains_key(profile)
    }

    /// Forgets one profile, or every profile when `None`.
    ///
    /// A load already in flight still resolves for its waiters but is not
    /// memoized.
    pub fn clear_cache(&self, profile: Option<&ProfileId>) {
        let mut in_flight = self.in_flight.lock();
        let mut completed = self.completed.lock();
        match profile {
            Some(p) => {
                in_flight.remove(p);
                completed.remove(p);
            }
            None => {
                in_flight.clear();
                completed.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CATALOGUE: &str = r#"{"defaultTheme":"a","themes":[{"id":"a"},{"id":"b"}]}"#;

    /// Yields before answering so concurrent callers overlap.
    struct SlowSource {
        inner: StaticCatalogueSource,
    }

    impl CatalogueSource for SlowSource {
        fn fetch_catalogue<'a>(&'a self, profile: &'a ProfileId) -> BoxFuture<'a, Result<String, SourceError>> {
            Box::pin(async move {
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                self.inner.fetch_catalogue(profile).await
            })
        }
    }

    fn slow_loader() -> (Arc<SlowSource>, ThemeLoader) {
        let source = Arc::new(SlowSource {
            inner: StaticCatalogueSource::new().with_document("alps", CATALOGUE),
        });
        let loader = ThemeLoader::new(source.clone());
        (source, loader)
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let (source, loader) = slow_loader();
        let profile = ProfileId::new("alps");

        let (a, b) = tokio::join!(loader.load(&profile), loader.load(&profile));
        let (a, b) = (a.expect("first"), b.expect("second"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.inner.fetch_count(), 1);
        assert!(!loader.is_loading(&profile));

        let again = loader.load(&profile).await.expect("memoized");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(source.inner.fetch_count(), 1);
    }

    #[tokio::test]
    async fn clear_cache_forces_refetch() {
        let (source, loader) = slow_loader();
        let profile = ProfileId::new("alps");

        loader.load(&profile).await.expect("load");
        loader.clear_cache(Some(&profile));
        assert!(loader.cached(&profile).is_none());
        loader.load(&profile).await.expect("reload");
        assert_eq!(source.inner.fetch_count(), 2);

        loader.clear_cache(None);
        loader.load(&profile).await.expect("reload");
        assert_eq!(source.inner.fetch_count(), 3);
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let source = Arc::new(StaticCatalogueSource::new().with_document("broken", "{"));
        let loader = ThemeLoader::new(source.clone());

        let missing = loader.load(&ProfileId::new("nowhere")).await.unwrap_err();
        assert!(matches!(missing, ThemeLoadError::Fetch { .. }));
        assert_eq!(missing.profile().as_str(), "nowhere");

        let broken = ProfileId::new("broken");
        assert!(matches!(loader.load(&broken).await, Err(ThemeLoadError::Parse { .. })));
        assert!(matches!(loader.load(&broken).await, Err(ThemeLoadError::Parse { .. })));
        assert_eq!(source.fetch_count(), 3);
        assert!(loader.cached(&broken).is_none());
    }
}
