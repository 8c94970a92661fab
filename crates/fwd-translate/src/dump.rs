//! Read-transaction scoped caching of bulk dumps.
//!
//! Dumps are the expensive "list everything" calls to the engine. Several
//! readers usually need the same dump within one read transaction (the
//! interface list reader enumerates interfaces, then every interface reader
//! looks up its own entry). [`DumpCache`] runs each distinct dump once per
//! transaction; [`DumpManager`] packages the executor, the cache key and an
//! optional post-processing step for one kind of dump.

use crate::error::DumpError;
use async_trait::async_trait;
use fwd_types::SchemaPath;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Canonical identity of a dump: namespace plus sorted parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter. Parameter order does not affect equality.
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)?;
        let mut sep = '?';
        for (name, value) in &self.params {
            write!(f, "{}{}={}", sep, name, value)?;
            sep = '&';
        }
        Ok(())
    }
}

/// Cached outcome; `None` records an empty dump.
type Outcome = Option<Arc<dyn Any + Send + Sync>>;

struct Slot {
    created: Instant,
    cell: OnceCell<Outcome>,
}

/// Dump results of one read transaction.
///
/// Successful and empty outcomes are cached; timeouts and call failures are
/// not, so a later reader in the same transaction retries the dump.
#[derive(Default)]
pub struct DumpCache {
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DumpCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached result for `key` or runs `dump` and caches it.
    ///
    /// Concurrent callers with the same key wait for the first one instead of
    /// issuing a second dump.
    pub async fn get_or_dump<T, F, Fut>(&self, key: CacheKey, dump: F) -> Result<Arc<T>, DumpError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DumpError>>,
    {
        let slot = self
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Slot {
                    created: Instant::now(),
                    cell: OnceCell::new(),
                })
            })
            .clone();

        let mut missed = false;
        let missed_flag = &mut missed;
        let outcome = slot
            .cell
            .get_or_try_init(|| async move {
                *missed_flag = true;
                match dump().await {
                    Ok(value) => Ok(Some(Arc::new(value) as Arc<dyn Any + Send + Sync>)),
                    Err(e) if e.is_empty() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?
            .clone();

        if missed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            log::debug!("dump cache miss: {}", key);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("dump cache hit: {}", key);
        }

        match outcome {
            Some(value) => value
                .downcast::<T>()
                .map_err(|_| DumpError::call_failed(&key, "cached dump has a different type")),
            None => Err(DumpError::empty(&key)),
        }
    }

    /// Returns true if a completed outcome is cached for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|slot| slot.cell.initialized())
    }

    /// Age of the cached entry for `key`.
    pub fn entry_age(&self, key: &CacheKey) -> Option<Duration> {
        self.lock().get(key).map(|slot| slot.created.elapsed())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of cached outcomes.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|s| s.cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DumpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpCache")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

/// Parameters of a dump that contribute to its cache key.
pub trait DumpParams: Send + Sync {
    fn key_params(&self) -> BTreeMap<String, String>;
}

impl DumpParams for () {
    fn key_params(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

impl DumpParams for u32 {
    fn key_params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("param".to_string(), self.to_string())])
    }
}

impl DumpParams for String {
    fn key_params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("param".to_string(), self.clone())])
    }
}

impl DumpParams for BTreeMap<String, String> {
    fn key_params(&self) -> BTreeMap<String, String> {
        self.clone()
    }
}

/// Performs one kind of dump against the engine.
#[async_trait]
pub trait DumpExecutor<T, P>: Send + Sync {
    async fn execute(&self, path: &SchemaPath, params: &P) -> Result<T, DumpError>;
}

/// Computes the cache key of a dump from namespace, path and parameters.
pub type KeyFactory<P> = Arc<dyn Fn(&str, &SchemaPath, &P) -> CacheKey + Send + Sync>;

/// Pure transformation applied to a fresh dump before it is cached.
pub type PostProcess<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Cached access to one kind of dump.
pub struct DumpManager<T, P> {
    namespace: String,
    executor: Arc<dyn DumpExecutor<T, P>>,
    key_factory: KeyFactory<P>,
    post_process: Option<PostProcess<T>>,
}

impl<T, P> DumpManager<T, P>
where
    T: Any + Send + Sync,
    P: DumpParams,
{
    /// Starts building a manager for dumps in `namespace`.
    pub fn builder(
        namespace: impl Into<String>,
        executor: Arc<dyn DumpExecutor<T, P>>,
    ) -> DumpManagerBuilder<T, P> {
        DumpManagerBuilder {
            namespace: namespace.into(),
            executor,
            key_factory: None,
            post_process: None,
        }
    }

    /// Default key: namespace, dump scope of the path and the parameters.
    ///
    /// The scope is `path` with the key of its last list segment replaced by
    /// `*`: every instance of one list shares the dump, while lists under
    /// different parent instances do not.
    pub fn default_key(namespace: &str, path: &SchemaPath, params: &P) -> CacheKey {
        let scope = match path.last() {
            Some(last) if last.is_list() => path.truncate(path.len() - 1).append(last.to_schema()),
            _ => path.clone(),
        };
        let mut key = CacheKey::new(namespace).with_param("path", scope);
        for (name, value) in params.key_params() {
            key = key.with_param(name, value);
        }
        key
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the cache key for a dump.
    pub fn key(&self, path: &SchemaPath, params: &P) -> CacheKey {
        (self.key_factory)(&self.namespace, path, params)
    }

    /// Returns the dump for `path`, from `cache` if it is already there.
    pub async fn get_dump(
        &self,
        path: &SchemaPath,
        cache: &DumpCache,
        params: &P,
    ) -> Result<Arc<T>, DumpError> {
        let key = self.key(path, params);
        cache
            .get_or_dump(key, || async {
                let dump = self.executor.execute(path, params).await?;
                Ok(match &self.post_process {
                    Some(post) => post(dump),
                    None => dump,
                })
            })
            .await
    }
}

/// Builder for [`DumpManager`].
pub struct DumpManagerBuilder<T, P> {
    namespace: String,
    executor: Arc<dyn DumpExecutor<T, P>>,
    key_factory: Option<KeyFactory<P>>,
    post_process: Option<PostProcess<T>>,
}

impl<T, P> DumpManagerBuilder<T, P>
where
    T: Any + Send + Sync,
    P: DumpParams + 'static,
{
    pub fn key_factory(
        mut self,
        factory: impl Fn(&str, &SchemaPath, &P) -> CacheKey + Send + Sync + 'static,
    ) -> Self {
        self.key_factory = Some(Arc::new(factory));
        self
    }

    pub fn post_process(mut self, post: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.post_process = Some(Arc::new(post));
        self
    }

    pub fn build(self) -> DumpManager<T, P> {
        let key_factory: KeyFactory<P> = match self.key_factory {
            Some(factory) => factory,
            None => Arc::new(DumpManager::<T, P>::default_key),
        };
        DumpManager {
            namespace: self.namespace,
            executor: self.executor,
            key_factory,
            post_process: self.post_process,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn p(s: &str) -> SchemaPath {
        s.parse().unwrap()
    }

    #[test]
    fn test_cache_key_equality_ignores_param_order() {
        let a = CacheKey::new("ipv4-address")
            .with_param("sw_if_index", 1)
            .with_param("af", "ip4");
        let b = CacheKey::new("ipv4-address")
            .with_param("af", "ip4")
            .with_param("sw_if_index", 1);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ipv4-address?af=ip4&sw_if_index=1");
        assert_ne!(a, CacheKey::new("ipv4-address").with_param("sw_if_index", 2));
    }

    #[tokio::test]
    async fn test_identical_keys_dump_once() {
        let cache = DumpCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_dump(CacheKey::new("interfaces"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1u32, 2])
                })
                .await
                .unwrap();
            assert_eq!(*value, vec![1, 2]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[tokio::test]
    async fn test_different_keys_dump_twice() {
        let cache = DumpCache::new();
        let calls = AtomicUsize::new(0);
        for index in [1u32, 2] {
            cache
                .get_or_dump(CacheKey::new("address").with_param("if", index), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(index)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_outcome_is_cached() {
        let cache = DumpCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let err = cache
                .get_or_dump::<u32, _, _>(CacheKey::new("routes"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DumpError::empty("routes"))
                })
                .await
                .unwrap_err();
            assert!(err.is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = DumpCache::new();
        let err = cache
            .get_or_dump::<u32, _, _>(CacheKey::new("routes"), || async {
                Err(DumpError::call_failed("routes", "engine busy"))
            })
            .await
            .unwrap_err();
        assert!(!err.is_empty());
        assert!(!cache.contains(&CacheKey::new("routes")));

        let value = cache
            .get_or_dump(CacheKey::new("routes"), || async { Ok(5u32) })
            .await
            .unwrap();
        assert_eq!(*value, 5);
    }

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DumpExecutor<Vec<String>, u32> for CountingExecutor {
        async fn execute(&self, _path: &SchemaPath, params: &u32) -> Result<Vec<String>, DumpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("b{}", params), format!("a{}", params)])
        }
    }

    #[tokio::test]
    async fn test_manager_shares_dump_across_instances() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        let manager = DumpManager::builder("addresses", executor.clone() as Arc<dyn DumpExecutor<_, _>>)
            .post_process(|mut v: Vec<String>| {
                v.sort();
                v
            })
            .build();
        let cache = DumpCache::new();

        let first = manager
            .get_dump(&p("/if[eth0]/address[10.0.0.1]"), &cache, &1)
            .await
            .unwrap();
        let second = manager
            .get_dump(&p("/if[eth0]/address[10.0.0.2]"), &cache, &1)
            .await
            .unwrap();
        let other = manager
            .get_dump(&p("/if[eth1]/address[10.0.1.1]"), &cache, &2)
            .await
            .unwrap();

        assert_eq!(*first, vec!["a1".to_string(), "b1".to_string()]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*other, vec!["a2".to_string(), "b2".to_string()]);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_key_separates_parent_instances() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        let manager = DumpManager::builder("addresses", executor.clone() as Arc<dyn DumpExecutor<_, _>>).build();
        let cache = DumpCache::new();

        manager.get_dump(&p("/if[eth0]/address[*]"), &cache, &0).await.unwrap();
        manager.get_dump(&p("/if[eth0]/address[10.0.0.1]"), &cache, &0).await.unwrap();
        manager.get_dump(&p("/if[eth1]/address[*]"), &cache, &0).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        assert_eq!(
            DumpManager::<Vec<String>, u32>::default_key("addresses", &p("/if[eth0]/address[10.0.0.1]"), &0),
            DumpManager::<Vec<String>, u32>::default_key("addresses", &p("/if[eth0]/address[*]"), &0),
        );
        assert_ne!(
            DumpManager::<Vec<String>, u32>::default_key("addresses", &p("/if[eth0]/address[*]"), &0),
            DumpManager::<Vec<String>, u32>::default_key("addresses", &p("/if[eth1]/address[*]"), &0),
        );
    }

    #[tokio::test]
    async fn test_manager_custom_key_factory() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        let manager = DumpManager::builder("all", executor.clone() as Arc<dyn DumpExecutor<_, _>>)
            .key_factory(|ns, _path, _params| CacheKey::new(ns))
            .build();
        let cache = DumpCache::new();
        manager.get_dump(&p("/a"), &cache, &1).await.unwrap();
        manager.get_dump(&p("/b"), &cache, &2).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }
}
