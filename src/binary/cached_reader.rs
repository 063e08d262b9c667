//! Cached database reader with hot reload support.
//!
//! This module provides a database reader with:
//! - LRU cache for lookup results
//! - Atomic hot reload for replacing a database without downtime
//! - Thread-safe concurrent access

use arc_swap::ArcSwap;
use quick_cache::sync::Cache;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::reader::{Database, Lookup};
use crate::{Error, Result};

/// Default cache capacity (number of entries).
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Configuration for the cached reader.
#[derive(Debug, Clone)]
pub struct CachedReaderConfig {
    /// Maximum number of entries in the cache.
    pub cache_capacity: usize,
    /// Whether to enable caching.
    pub cache_enabled: bool,
}

impl Default for CachedReaderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_enabled: true,
        }
    }
}

impl CachedReaderConfig {
    /// Create a new configuration with the specified cache capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache_capacity: capacity,
            cache_enabled: true,
        }
    }

    /// Create a configuration with caching disabled.
    pub fn no_cache() -> Self {
        Self {
            cache_capacity: 0,
            cache_enabled: false,
        }
    }
}

/// Cached database with hot reload support.
///
/// Wraps [`Database`] and adds:
/// - a bounded cache of lookups keyed by address
/// - atomic replacement of the database after a recompile
///
/// # Example
///
/// ```ignore
/// use iptool::binary::CachedDatabase;
/// use std::path::Path;
///
/// let db = CachedDatabase::open(Path::new("geo.dat"))?;
/// let lookup = db.find_str("8.8.8.8")?;
///
/// // Swap in a recompiled file
/// db.reload(Path::new("geo.dat"))?;
/// ```
pub struct CachedDatabase {
    /// The underlying database, wrapped in ArcSwap for atomic replacement.
    inner: ArcSwap<Database>,
    /// Cache of lookup results, keyed by generation and address.
    cache: Option<Cache<(u64, u32), Lookup>>,
    config: CachedReaderConfig,
    /// Generation counter, incremented on each reload.
    generation: AtomicU64,
}

impl CachedDatabase {
    /// Open a database file with default configuration.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_config(path, CachedReaderConfig::default())
    }

    /// Open a database file with custom configuration.
    pub fn open_with_config(path: &Path, config: CachedReaderConfig) -> Result<Self> {
        Ok(Self::with_database(Database::open(path)?, config))
    }

    /// Create from bytes with default configuration.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_config(data, CachedReaderConfig::default())
    }

    /// Create from bytes with custom configuration.
    pub fn from_bytes_with_config(data: Vec<u8>, config: CachedReaderConfig) -> Result<Self> {
        Ok(Self::with_database(Database::from_bytes(data)?, config))
    }

    /// Wrap an already opened database.
    pub fn with_database(db: Database, config: CachedReaderConfig) -> Self {
        let cache = if config.cache_enabled && config.cache_capacity > 0 {
            Some(Cache::new(config.cache_capacity))
        } else {
            None
        };

        Self {
            inner: ArcSwap::from_pointee(db),
            cache,
            config,
            generation: AtomicU64::new(0),
        }
    }

    /// Hot reload from a new file.
    ///
    /// In-flight queries complete against the old database, new queries use
    /// the new one. On error the current database stays in place.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let db = Database::open(path)?;
        self.replace(db);
        log::info!("Hot reloaded database from {:?}", path);
        Ok(())
    }

    /// Hot reload from bytes.
    pub fn reload_from_bytes(&self, data: Vec<u8>) -> Result<()> {
        let db = Database::from_bytes(data)?;
        self.replace(db);
        log::info!("Hot reloaded database from bytes");
        Ok(())
    }

    // The store must precede the generation bump: a reader that sees the
    // new generation then always loads the new database.
    fn replace(&self, db: Database) {
        self.inner.store(Arc::new(db));
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.clear_cache();
    }

    /// Find the range containing `ip`, consulting the cache first.
    pub fn find(&self, ip: Ipv4Addr) -> Result<Lookup> {
        let key = (self.generation.load(Ordering::SeqCst), u32::from(ip));

        if let Some(ref cache) = self.cache {
            if let Some(lookup) = cache.get(&key) {
                return Ok(lookup);
            }
        }

        // A lookup racing a reload lands under the old generation and is
        // never served once the reload has finished.
        let lookup = self.inner.load().find(ip)?;

        if let Some(ref cache) = self.cache {
            cache.insert(key, lookup.clone());
        }
        Ok(lookup)
    }

    /// Parse a dotted-quad address and [`find`](Self::find) it.
    pub fn find_str(&self, address: &str) -> Result<Lookup> {
        let ip: Ipv4Addr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        self.find(ip)
    }

    /// Clear the cache.
    pub fn clear_cache(&self) {
        if let Some(ref cache) = self.cache {
            cache.clear();
        }
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        if let Some(ref cache) = self.cache {
            CacheStats {
                capacity: self.config.cache_capacity,
                len: cache.len(),
                enabled: true,
            }
        } else {
            CacheStats::default()
        }
    }

    /// Get the current generation (incremented on each reload).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Get the current database.
    ///
    /// The returned guard keeps the database alive across a concurrent
    /// reload, so it may be stale.
    pub fn inner(&self) -> arc_swap::Guard<Arc<Database>> {
        self.inner.load()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Maximum cache capacity.
    pub capacity: usize,
    /// Current number of entries in the cache.
    pub len: usize,
    /// Whether caching is enabled.
    pub enabled: bool,
}
