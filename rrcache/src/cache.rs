// Copyright 2026 rrcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rrcache_common::{
    error::{Error, ErrorKind, Result},
    mem::{MemoryContext, Water},
    strict_assert,
    task::TaskManager,
    time::{stdtime_now, StdTime},
    timer::{timer, Timer, TimerMode},
};
use rrcache_db::{Database, DbRegistry, DeleteOutcome, Name, NodeRef, RdataClass, MEMDB_TYPE};

use crate::{
    cleaner::{clean_now, Cleaner, CleanerEvent, CleanerShared, CleanerState, Diagnostic},
    config::{CacheConfig, DEFAULT_CLEANING_INCREMENT, DEFAULT_CLEANING_INTERVAL},
    listener::{CacheEventListener, DefaultCacheEventListener},
    water,
};

/// State guarded by the handle lock.
#[derive(Debug, Default)]
pub(crate) struct HandleState {
    pub(crate) references: usize,
    /// Cleaner tasks still holding the cache, 0 or 1.
    pub(crate) live_tasks: usize,
    pub(crate) cleaning_interval: u32,
    pub(crate) cache_size: usize,
    /// Taken by the cleaner task on shutdown.
    pub(crate) timer: Option<Timer>,
}

pub(crate) struct CacheInner {
    pub(crate) mctx: Arc<MemoryContext>,
    pub(crate) class: RdataClass,
    db_type: String,
    db_args: Vec<String>,
    registry: DbRegistry,
    pub(crate) increment: usize,
    pub(crate) listener: Arc<dyn CacheEventListener>,

    /// Lock order: `handle` before `cleaner`, `handle` before `file`.
    pub(crate) handle: Mutex<HandleState>,
    pub(crate) cleaner: Mutex<CleanerShared>,
    file: Mutex<Option<PathBuf>>,

    pub(crate) db: ArcSwap<Arc<dyn Database>>,
}

impl CacheInner {
    pub(crate) fn store(&self) -> Arc<dyn Database> {
        (**self.db.load()).clone()
    }

    fn create_db(&self) -> Result<Arc<dyn Database>> {
        self.registry
            .create(&self.db_type, &self.mctx, &Name::root(), self.class, &self.db_args)
    }

    fn start_cleaner(self: &Arc<Self>, manager: &TaskManager, diagnostic_interval: Option<Duration>) {
        let (task, ctx) = manager.create_task::<CleanerEvent>(format!("{}-cleaner", self.mctx.name()));
        let (timer, ticker) = timer(TimerMode::Inactive);
        {
            let mut handle = self.handle.lock();
            strict_assert!(handle.live_tasks == 0, "a cache runs at most one cleaner task");
            handle.live_tasks += 1;
            handle.timer = Some(timer);
        }
        self.cleaner.lock().task = Some(task);

        let diagnostic = diagnostic_interval.filter(|d| !d.is_zero()).map(Diagnostic::new);
        let cleaner = Cleaner::new(self.clone(), ctx, ticker, diagnostic);
        manager.spawn(cleaner.run());
    }

    fn dump(&self) -> Result<()> {
        let db = self.store();
        let file = self.file.lock();
        let Some(path) = file.as_deref() else {
            return Ok(());
        };
        let res = db
            .dump(path, stdtime_now())
            .map(|written| tracing::debug!("[cache] dumped {written} rdatasets to {}", path.display()));
        drop(file);
        self.listener.on_dump(&res);
        res
    }

    /// Called exactly once, by whoever released the last reference.
    fn on_last_reference(&self, live_tasks: usize) {
        let task = {
            let mut cleaner = self.cleaner.lock();
            cleaner.overmem = false;
            cleaner.task.clone()
        };

        if let Err(e) = self.dump() {
            tracing::warn!("[cache] error dumping cache: {e}");
        }

        if live_tasks > 0 {
            // The cleaner task holds the last strong reference and frees the cache once it has shut down.
            tracing::debug!("[cache] last reference released, shutting down cleaner");
            if let Some(task) = task {
                task.shutdown();
            }
        } else {
            tracing::debug!("[cache] last reference released, freeing");
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.mctx.set_water(None);
        self.listener.on_free();
        tracing::info!("[cache] {} freed", self.mctx.name());
    }
}

/// A reference counted resource record cache.
///
/// Cloning a [`Cache`] attaches a new reference, dropping it detaches one. When the last reference is detached the
/// cache is dumped to its file, if it has one, and freed as soon as its cleaner task is gone.
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("class", &self.inner.class)
            .field("db_type", &self.inner.db_type)
            .field("references", &self.references())
            .finish()
    }
}

impl Clone for Cache {
    fn clone(&self) -> Self {
        self.inner.handle.lock().references += 1;
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        let live_tasks = {
            let mut handle = self.inner.handle.lock();
            strict_assert!(handle.references > 0);
            handle.references = handle.references.saturating_sub(1);
            if handle.references > 0 {
                return;
            }
            handle.live_tasks
        };
        self.inner.on_last_reference(live_tasks);
    }
}

impl Cache {
    /// Attach a new reference.
    pub fn attach(&self) -> Self {
        self.clone()
    }

    /// Detach this reference.
    pub fn detach(self) {}

    /// Number of attached references.
    pub fn references(&self) -> usize {
        self.inner.handle.lock().references
    }

    /// Class of the cached records.
    pub fn class(&self) -> RdataClass {
        self.inner.class
    }

    /// Memory context the cache accounts to.
    pub fn memory_context(&self) -> &Arc<MemoryContext> {
        &self.inner.mctx
    }

    /// The current store.
    ///
    /// The returned store stays valid after a [`Cache::flush`] replaced it, until the caller drops it.
    pub fn store(&self) -> Arc<dyn Database> {
        self.inner.store()
    }

    /// Set the file the cache is dumped to and loaded from.
    pub fn set_filename(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::new(ErrorKind::Config, "empty cache filename"));
        }
        let old = self.inner.file.lock().replace(path);
        drop(old);
        Ok(())
    }

    /// The file the cache is dumped to and loaded from.
    pub fn filename(&self) -> Option<PathBuf> {
        self.inner.file.lock().clone()
    }

    /// Populate the store from the cache file. Does nothing without a file.
    pub fn load(&self) -> Result<()> {
        let db = self.store();
        let file = self.inner.file.lock();
        let Some(path) = file.as_deref() else {
            return Ok(());
        };
        let loaded = db.load(path, stdtime_now())?;
        tracing::info!("[cache] loaded {loaded} rdatasets from {}", path.display());
        Ok(())
    }

    /// Write the store to the cache file. Does nothing without a file.
    pub fn dump(&self) -> Result<()> {
        self.inner.dump()
    }

    /// Replace the store with a new empty one.
    pub fn flush(&self) -> Result<()> {
        let db = self.inner.create_db()?;
        let old = {
            let _handle = self.inner.handle.lock();
            let mut cleaner = self.inner.cleaner.lock();
            db.set_overmem(cleaner.overmem);
            cleaner.generation += 1;
            self.inner.db.swap(Arc::new(db))
        };
        // Freeing the old store may cross the low watermark, whose callback takes the cleaner lock.
        drop(old);
        tracing::info!("[cache] flushed");
        Ok(())
    }

    /// Remove every rdataset cached for `name`.
    pub fn flush_name(&self, name: &Name) -> Result<()> {
        let db = self.store();
        let Some(node) = db.find_node(name, false)? else {
            return Ok(());
        };
        let res = delete_all(db.as_ref(), &node);
        db.detach_node(node);
        res
    }

    /// Size the cache. Nonzero sizes below [`crate::MIN_CACHE_SIZE`] are raised to it, 0 means unlimited.
    ///
    /// Memory pressure is signalled above 7/8 of the size and relieved below 3/4 of it.
    pub fn set_cache_size(&self, size: usize) {
        self.inner.handle.lock().cache_size = size;
        match water::watermarks(size) {
            Some((hi, lo)) => {
                tracing::debug!("[cache] watermarks hi {hi} lo {lo}");
                let callback = water::callback(Arc::downgrade(&self.inner));
                self.inner.mctx.set_water(Some(Water::new(hi, lo, callback)));
            }
            None => self.inner.mctx.set_water(None),
        }
    }

    /// Cache size as last set, 0 means unlimited.
    pub fn cache_size(&self) -> usize {
        self.inner.handle.lock().cache_size
    }

    /// Set the periodic cleaning interval in seconds, 0 disables periodic cleaning.
    ///
    /// Does nothing once the cleaner is gone, or if the cache was built without a task manager.
    pub fn set_cleaning_interval(&self, interval: u32) {
        let mut handle = self.inner.handle.lock();
        if handle.timer.is_none() {
            return;
        }
        handle.cleaning_interval = interval;
        let mode = match interval {
            0 => TimerMode::Inactive,
            secs => TimerMode::Ticker(Duration::from_secs(u64::from(secs))),
        };
        if let Some(Err(e)) = handle.timer.as_ref().map(|timer| timer.reset(mode)) {
            tracing::warn!("[cache] could not set cache cleaning interval: {e}");
        }
    }

    /// Periodic cleaning interval in seconds.
    pub fn cleaning_interval(&self) -> u32 {
        self.inner.handle.lock().cleaning_interval
    }

    /// Mark stale every rdataset expiring at or before `now`, walking the whole store.
    pub fn clean(&self, now: StdTime) -> Result<()> {
        let examined = clean_now(&self.store(), now)?;
        tracing::debug!("[cache] cleaned {examined} nodes");
        Ok(())
    }

    /// State of the cleaner.
    pub fn cleaner_state(&self) -> CleanerState {
        self.inner.cleaner.lock().state
    }

    /// Whether the cache is over its memory budget.
    pub fn is_overmem(&self) -> bool {
        self.inner.cleaner.lock().overmem
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<CacheInner> {
        &self.inner
    }

    #[cfg(test)]
    pub(crate) fn live_tasks(&self) -> usize {
        self.inner.handle.lock().live_tasks
    }
}

fn delete_all(db: &dyn Database, node: &NodeRef) -> Result<()> {
    for rdataset in db.all_rdatasets(node)? {
        match db.delete_rdataset(node, rdataset.rtype, rdataset.covers)? {
            DeleteOutcome::Deleted | DeleteOutcome::Unchanged => {}
        }
    }
    Ok(())
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
    mctx: Option<Arc<MemoryContext>>,
    task_manager: Option<TaskManager>,
    class: RdataClass,
    db_type: String,
    db_args: Vec<String>,
    registry: DbRegistry,
    cache_size: usize,
    cleaning_interval: u32,
    increment: usize,
    filename: Option<PathBuf>,
    listener: Arc<dyn CacheEventListener>,
    diagnostic_interval: Option<Duration>,
}

impl Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("class", &self.class)
            .field("db_type", &self.db_type)
            .field("db_args", &self.db_args)
            .field("cache_size", &self.cache_size)
            .field("cleaning_interval", &self.cleaning_interval)
            .field("increment", &self.increment)
            .field("filename", &self.filename)
            .finish()
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuilder {
    /// Builder of an `IN` cache on the default store type, without cleaner task.
    pub fn new() -> Self {
        Self {
            mctx: None,
            task_manager: None,
            class: RdataClass::In,
            db_type: MEMDB_TYPE.to_string(),
            db_args: vec![],
            registry: DbRegistry::default(),
            cache_size: 0,
            cleaning_interval: DEFAULT_CLEANING_INTERVAL,
            increment: DEFAULT_CLEANING_INCREMENT,
            filename: None,
            listener: Arc::new(DefaultCacheEventListener),
            diagnostic_interval: None,
        }
    }

    /// Builder initialized from a declarative config.
    pub fn from_config(config: CacheConfig) -> Self {
        let mut builder = Self::new()
            .with_class(config.class)
            .with_db_type(config.db_type)
            .with_db_args(config.db_args)
            .with_cache_size(config.cache_size)
            .with_cleaning_interval(config.cleaning_interval)
            .with_cleaning_increment(config.cleaning_increment);
        builder.filename = config.filename;
        builder.diagnostic_interval = config.diagnostic_interval;
        builder
    }

    /// Set the memory context the cache and its stores account to.
    ///
    /// A private context is created if none is given.
    pub fn with_memory_context(mut self, mctx: Arc<MemoryContext>) -> Self {
        self.mctx = Some(mctx);
        self
    }

    /// Run a cleaner task on the given task manager.
    ///
    /// Without a task manager there is no background cleaning: no periodic sweep and no sweep on memory pressure.
    pub fn with_task_manager(mut self, task_manager: TaskManager) -> Self {
        self.task_manager = Some(task_manager);
        self
    }

    /// Set the class of the cached records.
    pub fn with_class(mut self, class: RdataClass) -> Self {
        self.class = class;
        self
    }

    /// Set the store type.
    pub fn with_db_type(mut self, db_type: impl Into<String>) -> Self {
        self.db_type = db_type.into();
        self
    }

    /// Set the store constructor arguments.
    pub fn with_db_args(mut self, db_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.db_args = db_args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the registry store types are looked up in.
    pub fn with_registry(mut self, registry: DbRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the cache size in bytes, see [`Cache::set_cache_size`].
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Set the periodic cleaning interval in seconds.
    pub fn with_cleaning_interval(mut self, cleaning_interval: u32) -> Self {
        self.cleaning_interval = cleaning_interval;
        self
    }

    /// Set how many nodes a cleaning pass examines before yielding.
    ///
    /// The default value is 1000.
    pub fn with_cleaning_increment(mut self, increment: usize) -> Self {
        self.increment = increment;
        self
    }

    /// Set the file the cache is dumped to and loaded from.
    pub fn with_filename(mut self, filename: impl AsRef<Path>) -> Self {
        self.filename = Some(filename.as_ref().to_path_buf());
        self
    }

    /// Set the cache event listener.
    pub fn with_event_listener(mut self, listener: Arc<dyn CacheEventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Log cache statistics at the given interval from the cleaner task.
    pub fn with_diagnostic_interval(mut self, interval: Duration) -> Self {
        self.diagnostic_interval = Some(interval);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<Cache> {
        if self.increment == 0 {
            return Err(Error::new(ErrorKind::Config, "cleaning increment must be positive"));
        }
        if matches!(&self.filename, Some(f) if f.as_os_str().is_empty()) {
            return Err(Error::new(ErrorKind::Config, "empty cache filename"));
        }

        let mctx = self.mctx.unwrap_or_else(|| Arc::new(MemoryContext::new("cache")));
        let db = self
            .registry
            .create(&self.db_type, &mctx, &Name::root(), self.class, &self.db_args)?;

        let inner = Arc::new(CacheInner {
            mctx,
            class: self.class,
            db_type: self.db_type,
            db_args: self.db_args,
            registry: self.registry,
            increment: self.increment,
            listener: self.listener,
            handle: Mutex::new(HandleState {
                references: 1,
                ..Default::default()
            }),
            cleaner: Mutex::new(CleanerShared::default()),
            file: Mutex::new(self.filename),
            db: ArcSwap::from_pointee(db),
        });
        if let Some(manager) = self.task_manager.as_ref() {
            inner.start_cleaner(manager, self.diagnostic_interval);
        }

        let cache = Cache { inner };
        if self.cache_size != 0 {
            cache.set_cache_size(self.cache_size);
        }
        cache.set_cleaning_interval(self.cleaning_interval);
        tracing::info!(
            "[cache] {} created, class {}, store {}",
            cache.inner.mctx.name(),
            cache.inner.class,
            cache.inner.db_type
        );
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    };

    use itertools::Itertools;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use rrcache_common::mem::WaterMark;
    use rrcache_db::{RdataType, Rdataset};

    use super::*;
    use crate::test_utils::RecordingListener;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn a(ttl: u32, addr: &str, now: StdTime) -> Rdataset {
        Rdataset::new(RdataType::A, ttl, vec![addr.to_string()], now)
    }

    fn cache_with(listener: &Arc<RecordingListener>) -> Cache {
        CacheBuilder::new()
            .with_event_listener(listener.clone())
            .build()
            .unwrap()
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(60), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test_log::test]
    fn test_attach_detach_sequence() {
        let listener = Arc::new(RecordingListener::default());
        let mut rng = SmallRng::seed_from_u64(114514);
        let mut handles = vec![cache_with(&listener)];
        let (mut attaches, mut detaches) = (0, 0);

        for _ in 0..1000 {
            if handles.len() > 1 && rng.random_bool(0.5) {
                let index = rng.random_range(0..handles.len());
                handles.swap_remove(index).detach();
                detaches += 1;
            } else {
                let index = rng.random_range(0..handles.len());
                let attached = handles[index].attach();
                handles.push(attached);
                attaches += 1;
            }
            assert_eq!(handles[0].references(), 1 + attaches - detaches);
            assert_eq!(listener.frees(), 0);
        }

        handles.clear();
        assert_eq!(listener.frees(), 1);
        assert!(listener.dumps().is_empty());
    }

    #[test_log::test]
    fn test_concurrent_detach_shuts_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let cache = CacheBuilder::new()
            .with_event_listener(listener.clone())
            .with_filename(dir.path().join("cache.db"))
            .build()
            .unwrap();
        cache
            .store()
            .insert(&name("example."), a(3600, "192.0.2.1", stdtime_now()), stdtime_now())
            .unwrap();

        let barrier = Arc::new(Barrier::new(16));
        let threads = (0..16)
            .map(|_| {
                let cache = cache.attach();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.detach();
                })
            })
            .collect_vec();
        cache.detach();
        threads.into_iter().for_each(|t| t.join().unwrap());

        assert_eq!(listener.dumps(), vec![true]);
        assert_eq!(listener.frees(), 1);
        assert!(dir.path().join("cache.db").exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_free_deferred_until_cleaner_shutdown() {
        let listener = Arc::new(RecordingListener::default());
        let cache = CacheBuilder::new()
            .with_task_manager(TaskManager::current())
            .with_event_listener(listener.clone())
            .build()
            .unwrap();
        assert_eq!(cache.live_tasks(), 1);

        cache.detach();
        // The cleaner task has not run yet and still holds the cache.
        assert_eq!(listener.frees(), 0);
        wait_until(|| listener.frees() == 1).await;
    }

    #[test_log::test(tokio::test)]
    async fn test_runtime_shutdown_before_detach() {
        let listener = Arc::new(RecordingListener::default());
        let manager = TaskManager::current();
        let cache = CacheBuilder::new()
            .with_task_manager(manager.clone())
            .with_cleaning_interval(60)
            .with_event_listener(listener.clone())
            .build()
            .unwrap();
        assert_eq!(cache.cleaning_interval(), 60);

        manager.shutdown();
        wait_until(|| cache.live_tasks() == 0).await;
        assert_eq!(listener.frees(), 0);

        // The timer is gone.
        cache.set_cleaning_interval(120);
        assert_eq!(cache.cleaning_interval(), 60);

        cache.detach();
        assert_eq!(listener.frees(), 1);
    }

    #[test_log::test]
    fn test_dump_load_without_file() {
        let listener = Arc::new(RecordingListener::default());
        let cache = cache_with(&listener);
        cache.dump().unwrap();
        cache.load().unwrap();
        assert!(listener.dumps().is_empty());
        assert!(cache.set_filename("").is_err());
        assert_eq!(cache.filename(), None);
    }

    #[test_log::test]
    fn test_dump_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let now = stdtime_now();

        let cache = CacheBuilder::new().with_filename(&path).build().unwrap();
        let db = cache.store();
        db.insert(&name("example."), a(3600, "192.0.2.1", now), now).unwrap();
        db.insert(
            &name("example."),
            Rdataset::new(RdataType::TXT, 3600, vec!["\"hello world\"".to_string()], now),
            now,
        )
        .unwrap();
        db.insert(&name("www.example."), a(3600, "192.0.2.2", now), now).unwrap();
        db.insert(
            &name("key._domainkey.example."),
            Rdataset::new(
                RdataType::TXT,
                3600,
                vec!["\"v=DKIM1; k=rsa; p=MIGf\"".to_string(), "".to_string()],
                now,
            ),
            now,
        )
        .unwrap();
        cache.dump().unwrap();

        let loaded = CacheBuilder::new().build().unwrap();
        loaded.set_filename(&path).unwrap();
        assert_eq!(loaded.filename(), Some(path.clone()));
        loaded.load().unwrap();

        let db = loaded.store();
        let now = stdtime_now();
        assert_eq!(db.node_count(), 3);
        let txt = db.lookup(&name("example."), RdataType::TXT, now).unwrap().unwrap();
        assert_eq!(txt.rdata, vec!["\"hello world\"".to_string()]);
        let dkim = db.lookup(&name("key._domainkey.example."), RdataType::TXT, now).unwrap().unwrap();
        assert_eq!(dkim.rdata, vec!["\"v=DKIM1; k=rsa; p=MIGf\"".to_string(), "".to_string()]);
        let a = db.lookup(&name("www.example."), RdataType::A, now).unwrap().unwrap();
        assert_eq!(a.rdata, vec!["192.0.2.2".to_string()]);
    }

    #[test_log::test]
    fn test_flush_keeps_old_store_valid() {
        let cache = CacheBuilder::new().build().unwrap();
        let now = stdtime_now();
        let old = cache.store();
        old.insert(&name("example."), a(3600, "192.0.2.1", now), now).unwrap();

        cache.flush().unwrap();
        let new = cache.store();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.node_count(), 0);
        assert_eq!(old.node_count(), 1);
        assert!(old.lookup(&name("example."), RdataType::A, now).unwrap().is_some());
    }

    #[test_log::test]
    fn test_flush_carries_store_parameters() {
        let cache = CacheBuilder::new()
            .with_class(RdataClass::Ch)
            .with_db_args(["purge-batch=1"])
            .build()
            .unwrap();
        cache.flush().unwrap();
        assert_eq!(cache.store().class(), RdataClass::Ch);

        let err = CacheBuilder::new().with_db_type("rbt").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = CacheBuilder::new().with_db_args(["bogus"]).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test_log::test]
    fn test_flush_name() {
        let cache = CacheBuilder::new().build().unwrap();
        let now = stdtime_now();
        let db = cache.store();
        db.insert(&name("a.example."), a(3600, "192.0.2.1", now), now).unwrap();
        db.insert(
            &name("a.example."),
            Rdataset::new(RdataType::MX, 3600, vec!["10 mx.example.".to_string()], now),
            now,
        )
        .unwrap();
        db.insert(&name("b.example."), a(3600, "192.0.2.2", now), now).unwrap();

        cache.flush_name(&name("absent.example.")).unwrap();
        assert!(db.lookup(&name("a.example."), RdataType::A, now).unwrap().is_some());
        assert!(db.lookup(&name("b.example."), RdataType::A, now).unwrap().is_some());

        cache.flush_name(&name("A.Example.")).unwrap();
        assert!(db.lookup(&name("a.example."), RdataType::A, now).unwrap().is_none());
        assert!(db.lookup(&name("a.example."), RdataType::MX, now).unwrap().is_none());
        assert!(db.lookup(&name("b.example."), RdataType::A, now).unwrap().is_some());
    }

    #[test_log::test]
    fn test_clean_is_exact_and_idempotent() {
        let cache = CacheBuilder::new().build().unwrap();
        let db = cache.store();
        let node = db.find_node(&name("example."), true).unwrap().unwrap();
        db.add_rdataset(&node, a(100, "192.0.2.1", 0), 0).unwrap();
        db.add_rdataset(&node, Rdataset::new(RdataType::TXT, 200, vec!["\"x\"".to_string()], 0), 0)
            .unwrap();
        db.add_rdataset(&node, Rdataset::new(RdataType::MX, 201, vec!["10 mx.".to_string()], 0), 0)
            .unwrap();

        let snapshot = |db: &Arc<dyn Database>| {
            db.all_rdatasets(&node)
                .unwrap()
                .into_iter()
                .map(|r| r.rtype)
                .sorted()
                .collect_vec()
        };

        cache.clean(200).unwrap();
        let once = snapshot(&db);
        assert_eq!(once, vec![RdataType::MX]);
        assert!(db.find_rdataset(&node, RdataType::MX, RdataType::NONE, 200).unwrap().is_some());

        cache.clean(200).unwrap();
        assert_eq!(snapshot(&db), once);
        db.detach_node(node);
    }

    #[test_log::test]
    fn test_set_cache_size() {
        let cache = CacheBuilder::new().build().unwrap();
        let mctx = cache.memory_context().clone();

        cache.set_cache_size(0);
        assert_eq!(mctx.watermarks(), None);

        let size = 64 * 1024 * 1024;
        cache.set_cache_size(size);
        assert_eq!(cache.cache_size(), size);
        assert_eq!(mctx.watermarks(), Some((size - size / 8, size - size / 4)));

        cache.set_cache_size(1024);
        let min = crate::MIN_CACHE_SIZE;
        assert_eq!(mctx.watermarks(), Some((min - min / 8, min - min / 4)));

        cache.set_cache_size(0);
        assert_eq!(mctx.watermarks(), None);
    }

    #[test_log::test]
    fn test_watermark_signals_are_idempotent() {
        let listener = Arc::new(RecordingListener::default());
        let cache = cache_with(&listener);

        water::on_watermark(cache.inner(), WaterMark::High);
        water::on_watermark(cache.inner(), WaterMark::High);
        assert!(cache.is_overmem());
        assert!(cache.store().is_overmem());
        assert_eq!(listener.overmem(), vec![true]);

        water::on_watermark(cache.inner(), WaterMark::Low);
        water::on_watermark(cache.inner(), WaterMark::Low);
        assert!(!cache.is_overmem());
        assert!(!cache.store().is_overmem());
        assert_eq!(listener.overmem(), vec![true, false]);
    }

    #[test_log::test]
    fn test_overmem_follows_memory_usage() {
        let listener = Arc::new(RecordingListener::default());
        let cache = CacheBuilder::new()
            .with_event_listener(listener.clone())
            .with_cache_size(crate::MIN_CACHE_SIZE)
            .build()
            .unwrap();
        let now = stdtime_now();
        let db = cache.store();
        let rdata = "x".repeat(1024);
        for i in 0..4096 {
            let set = Rdataset::new(RdataType::TXT, 3600, vec![rdata.clone()], now);
            db.insert(&name(&format!("n{i}.example.")), set, now).unwrap();
            if cache.is_overmem() {
                break;
            }
        }
        assert!(cache.is_overmem());
        assert!(db.is_overmem());

        // The flushed store carries the overmem mode until its predecessor is freed.
        cache.flush().unwrap();
        assert!(cache.store().is_overmem());
        drop(db);
        assert!(!cache.is_overmem());
        assert!(!cache.store().is_overmem());
        assert_eq!(listener.overmem(), vec![true, false]);
    }

    #[test_log::test(tokio::test)]
    async fn test_cleaning_interval() {
        let cache = CacheBuilder::new()
            .with_task_manager(TaskManager::current())
            .build()
            .unwrap();
        assert_eq!(cache.cleaning_interval(), 0);
        cache.set_cleaning_interval(30);
        assert_eq!(cache.cleaning_interval(), 30);
        assert_eq!(
            cache.inner().handle.lock().timer.as_ref().map(|t| t.mode()),
            Some(TimerMode::Ticker(Duration::from_secs(30)))
        );
        cache.set_cleaning_interval(0);
        assert_eq!(
            cache.inner().handle.lock().timer.as_ref().map(|t| t.mode()),
            Some(TimerMode::Inactive)
        );

        // Without a task manager there is no timer to program.
        let cache = CacheBuilder::new().build().unwrap();
        cache.set_cleaning_interval(30);
        assert_eq!(cache.cleaning_interval(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_periodic_sweep() {
        let listener = Arc::new(RecordingListener::default());
        let cache = CacheBuilder::new()
            .with_task_manager(TaskManager::current())
            .with_event_listener(listener.clone())
            .with_cleaning_interval(10)
            .with_cleaning_increment(2)
            .build()
            .unwrap();
        let now = stdtime_now();
        let db = cache.store();
        for i in 0..5 {
            db.insert(&name(&format!("live{i}.example.")), a(3600, "192.0.2.1", now), now)
                .unwrap();
            db.insert(&name(&format!("dead{i}.example.")), a(1, "192.0.2.2", now - 100), now)
                .unwrap();
        }
        assert_eq!(db.node_count(), 10);

        wait_until(|| !listener.sweeps().is_empty()).await;
        assert_eq!(listener.sweeps()[0], 10);
        assert_eq!(db.node_count(), 5);
        assert_eq!(cache.cleaner_state(), CleanerState::Idle);
    }

    #[test_log::test(tokio::test)]
    async fn test_overmem_sweep() {
        let listener = Arc::new(RecordingListener::default());
        let cache = CacheBuilder::new()
            .with_task_manager(TaskManager::current())
            .with_event_listener(listener.clone())
            .build()
            .unwrap();
        let now = stdtime_now();
        let db = cache.store();
        db.insert(&name("live.example."), a(3600, "192.0.2.1", now), now).unwrap();
        db.insert(&name("dead.example."), a(1, "192.0.2.2", now - 100), now).unwrap();

        water::on_watermark(cache.inner(), WaterMark::High);
        // The first sweep expires something and the pressure lasts, so a second one follows.
        wait_until(|| listener.sweeps().len() == 2).await;
        assert_eq!(cache.cleaner_state(), CleanerState::Done);
        assert_eq!(db.node_count(), 1);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_concurrent_pressure_flush_resize_clean() {
        const INSERTERS: u64 = 4;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let listener = Arc::new(RecordingListener::default());
        let cache = CacheBuilder::new()
            .with_task_manager(TaskManager::current())
            .with_event_listener(listener.clone())
            .with_cache_size(crate::MIN_CACHE_SIZE)
            .with_cleaning_increment(16)
            .with_filename(&path)
            .build()
            .unwrap();

        let handle = cache.attach();
        let run = tokio::task::spawn_blocking(move || {
            let barrier = Arc::new(Barrier::new(INSERTERS as usize + 3));
            let stop = Arc::new(AtomicBool::new(false));

            let inserters = (0..INSERTERS)
                .map(|t| {
                    let cache = handle.attach();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let mut rng = SmallRng::seed_from_u64(t);
                        let rdata = "x".repeat(1024);
                        barrier.wait();
                        for _ in 0..4096 {
                            let now = stdtime_now();
                            // Half of the records are expired on arrival.
                            let cached = if rng.random_bool(0.5) { now } else { now - 100 };
                            let set = Rdataset::new(RdataType::TXT, 10, vec![rdata.clone()], cached);
                            let owner = name(&format!("t{t}-n{}.example.", rng.random_range(0..1024)));
                            cache.store().insert(&owner, set, now).unwrap();
                        }
                    })
                })
                .collect_vec();

            let spawn_aux = |op: Box<dyn Fn(&Cache, usize) + Send>| {
                let cache = handle.attach();
                let barrier = barrier.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let mut round = 0;
                    while !stop.load(Ordering::Acquire) {
                        op(&cache, round);
                        round += 1;
                        std::thread::yield_now();
                    }
                })
            };
            let aux = vec![
                spawn_aux(Box::new(|cache: &Cache, _: usize| cache.flush().unwrap())),
                spawn_aux(Box::new(|cache: &Cache, round: usize| {
                    cache.set_cache_size(crate::MIN_CACHE_SIZE * (1 + round % 4))
                })),
                spawn_aux(Box::new(|cache: &Cache, _: usize| cache.clean(stdtime_now()).unwrap())),
            ];

            inserters.into_iter().for_each(|t| t.join().unwrap());
            stop.store(true, Ordering::Release);
            aux.into_iter().for_each(|t| t.join().unwrap());
        });
        tokio::time::timeout(Duration::from_secs(60), run)
            .await
            .expect("cache operations deadlocked")
            .unwrap();

        assert_eq!(cache.references(), 1);
        assert_eq!(cache.is_overmem(), cache.store().is_overmem());

        cache.detach();
        wait_until(|| listener.frees() == 1).await;
        let events = listener.events();
        assert_eq!(events.last(), Some(&"free"));
        assert_eq!(events.iter().filter(|e| **e == "dump").count(), 1);
        assert_eq!(listener.dumps(), vec![true]);

        let loaded = CacheBuilder::new().with_filename(&path).build().unwrap();
        loaded.load().unwrap();
    }
}
