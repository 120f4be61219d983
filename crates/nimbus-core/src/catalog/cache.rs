//! Per-service cache over another catalog backend.

use super::{CatalogError, OperationCatalog, ServiceDefinition};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

type Entry = (Instant, Option<Arc<ServiceDefinition>>);

/// Caches loaded service definitions, including "service unknown" answers.
///
/// Entries live for `ttl`, or for the life of the process when `ttl` is
/// `None`. [`refresh`](Self::refresh) drops everything.
pub struct CachedCatalog<C> {
    inner: C,
    ttl: Option<Duration>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl<C: OperationCatalog> CachedCatalog<C> {
    pub fn new(inner: C, ttl: Option<Duration>) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Forget every cached service.
    pub fn refresh(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let dropped = entries.len();
        entries.clear();
        tracing::info!(dropped, "Catalog cache refreshed");
    }

    /// Number of cached services.
    pub fn cached_services(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or_default()
    }

    fn is_fresh(&self, loaded_at: Instant) -> bool {
        self.ttl.is_none_or(|ttl| loaded_at.elapsed() < ttl)
    }
}

impl<C: OperationCatalog> OperationCatalog for CachedCatalog<C> {
    fn load_service(&self, service: &str) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some((loaded_at, definition)) = entries.get(service)
                && self.is_fresh(*loaded_at)
            {
                return Ok(definition.clone());
            }
        }

        let definition = self.inner.load_service(service)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(service.to_string(), (Instant::now(), definition.clone()));
        Ok(definition)
    }

    fn list_services(&self) -> Result<Vec<String>, CatalogError> {
        self.inner.list_services()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCatalog {
        loads: AtomicUsize,
    }

    impl OperationCatalog for CountingCatalog {
        fn load_service(
            &self,
            service: &str,
        ) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok((service == "ec2").then(|| {
                Arc::new(ServiceDefinition {
                    name: service.to_string(),
                    operations: Default::default(),
                })
            }))
        }

        fn list_services(&self) -> Result<Vec<String>, CatalogError> {
            Ok(vec!["ec2".to_string()])
        }
    }

    #[test]
    fn test_hits_are_served_from_cache() {
        let cache = CachedCatalog::new(CountingCatalog::default(), None);
        assert!(cache.load_service("ec2").unwrap().is_some());
        assert!(cache.load_service("ec2").unwrap().is_some());
        assert!(cache.load_service("nope").unwrap().is_none());
        assert!(cache.load_service("nope").unwrap().is_none());
        assert_eq!(cache.inner.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_services(), 2);
    }

    #[test]
    fn test_expired_entries_and_refresh_reload() {
        let cache = CachedCatalog::new(CountingCatalog::default(), Some(Duration::ZERO));
        cache.load_service("ec2").unwrap();
        cache.load_service("ec2").unwrap();
        assert_eq!(cache.inner.loads.load(Ordering::SeqCst), 2);

        let cache = CachedCatalog::new(CountingCatalog::default(), None);
        cache.load_service("ec2").unwrap();
        cache.refresh();
        assert_eq!(cache.cached_services(), 0);
        cache.load_service("ec2").unwrap();
        assert_eq!(cache.inner.loads.load(Ordering::SeqCst), 2);
    }
}
