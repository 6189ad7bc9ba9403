//! Tenant container: page table, session registry, memory accounting.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::metrics::{AppMetrics, MetricsSnapshot};
use crate::page::Page;
use crate::session::{generate_session_id, SessionRegistry};
use crate::template::Template;

/// Fixed per-page overhead on top of template and data size, covering
/// tree baselines, keys, and bookkeeping.
const PAGE_BASE_BYTES: u64 = 4096;

struct PageEntry {
    page: Arc<Page>,
    bytes: u64,
}

/// Handle returned from page creation, carrying the opaque session id the
/// caller uses to retrieve the page later.
#[derive(Clone)]
pub struct PageHandle {
    pub session_id: String,
    pub page: Arc<Page>,
}

/// A tenant boundary owning pages, sessions, and a memory budget.
///
/// There are no cross-tenant references: a session id issued by one
/// application never resolves in another.
pub struct Application {
    id: String,
    options: Options,
    pages: DashMap<String, PageEntry>,
    sessions: SessionRegistry,
    bytes_in_use: AtomicU64,
    metrics: Arc<AppMetrics>,
}

impl Application {
    /// Create an application with default options.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_options(id, Options::default())
    }

    pub fn with_options(id: impl Into<String>, options: Options) -> Self {
        let id = id.into();
        info!(application = %id, "creating application");
        Self {
            id,
            options,
            pages: DashMap::new(),
            sessions: SessionRegistry::new(),
            bytes_in_use: AtomicU64::new(0),
            metrics: Arc::new(AppMetrics::default()),
        }
    }

    /// The tenant id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Number of live pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Estimated resident bytes across all pages.
    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use.load(Ordering::Relaxed)
    }

    /// Parse a template with this application's configured delimiters.
    pub fn parse_template(&self, source: &str) -> Result<Arc<Template>> {
        Template::parse_with_delimiters(source, self.options.delimiters).map(Arc::new)
    }

    /// Create a page for `template` with initial `data`, register it, and
    /// allocate a session pointing at it.
    pub fn new_page<T: Serialize>(
        &self,
        template: Arc<Template>,
        data: T,
    ) -> Result<PageHandle> {
        let data = serde_json::to_value(data)
            .map_err(|e| Error::Hydration(format!("failed to serialize data: {e}")))?;

        if let Some(max_pages) = self.options.max_pages {
            let current = self.pages.len();
            if current >= max_pages {
                return Err(Error::PageLimit {
                    current,
                    limit: max_pages,
                });
            }
        }

        let bytes = estimate_page_bytes(&template, &data);
        if let Some(limit) = self.options.max_memory_bytes() {
            let current = self.bytes_in_use();
            if current + bytes > limit {
                warn!(
                    application = %self.id,
                    current,
                    requested = bytes,
                    limit,
                    "page creation exceeds memory cap"
                );
                return Err(Error::MemoryLimit {
                    current,
                    requested: bytes,
                    limit,
                });
            }
        }

        let page_id = uuid::Uuid::new_v4().simple().to_string();
        let token = generate_session_id();
        let metrics = self
            .options
            .metrics_enabled
            .then(|| Arc::clone(&self.metrics));
        let page = Arc::new(Page::new(
            page_id.clone(),
            template,
            data,
            token,
            metrics,
        ));

        self.pages.insert(
            page_id.clone(),
            PageEntry {
                page: Arc::clone(&page),
                bytes,
            },
        );
        self.bytes_in_use.fetch_add(bytes, Ordering::Relaxed);
        let session_id = self.sessions.create(&self.id, &page_id);
        if self.options.metrics_enabled {
            AppMetrics::incr(&self.metrics.pages_created);
        }
        debug!(application = %self.id, page = %page_id, bytes, "page created");

        Ok(PageHandle { session_id, page })
    }

    /// Resolve a session id within this application only.
    pub fn get_page(&self, session_id: &str) -> Result<Arc<Page>> {
        let page_id = self
            .sessions
            .resolve(&self.id, session_id)
            .ok_or(Error::InvalidSession)?;
        self.pages
            .get(&page_id)
            .map(|entry| Arc::clone(&entry.page))
            .ok_or(Error::InvalidSession)
    }

    /// Close one page and destroy its session.
    pub fn close_page(&self, session_id: &str) -> Result<()> {
        let record = self
            .sessions
            .remove(&self.id, session_id)
            .ok_or(Error::InvalidSession)?;
        self.remove_page(&record.page_id);
        Ok(())
    }

    /// Close pages whose sessions idled beyond the TTL; returns the
    /// number removed.
    pub fn cleanup_expired_pages(&self) -> usize {
        let ttl = self.options.session_ttl();
        let expired = self.sessions.take_expired(ttl);
        let count = expired.len();
        for record in expired {
            debug!(
                application = %record.tenant,
                page = %record.page_id,
                "session expired"
            );
            self.remove_page(&record.page_id);
            if self.options.metrics_enabled {
                AppMetrics::incr(&self.metrics.sessions_expired);
            }
        }
        if count > 0 {
            info!(application = %self.id, count, "expired pages cleaned up");
        }
        count
    }

    /// Close every page and release the registry.
    pub fn close(&self) {
        info!(application = %self.id, pages = self.pages.len(), "closing application");
        for entry in self.pages.iter() {
            entry.page.close();
            if self.options.metrics_enabled {
                AppMetrics::incr(&self.metrics.pages_closed);
            }
        }
        self.pages.clear();
        self.sessions.clear();
        self.bytes_in_use.store(0, Ordering::Relaxed);
    }

    /// Counters snapshot, when metrics are enabled.
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.options
            .metrics_enabled
            .then(|| self.metrics.snapshot())
    }

    /// Spawn a background task running
    /// [`cleanup_expired_pages`](Self::cleanup_expired_pages) every
    /// `interval` until `cancel` fires.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let app = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(application = %app.id, "cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        app.cleanup_expired_pages();
                    }
                }
            }
        })
    }

    fn remove_page(&self, page_id: &str) {
        if let Some((_, entry)) = self.pages.remove(page_id) {
            entry.page.close();
            self.bytes_in_use.fetch_sub(entry.bytes, Ordering::Relaxed);
            if self.options.metrics_enabled {
                AppMetrics::incr(&self.metrics.pages_closed);
            }
        }
    }
}

/// Resident-size estimate for one page: template source, serialized
/// data, and fixed overhead.
fn estimate_page_bytes(template: &Template, data: &Value) -> u64 {
    let data_len = serde_json::to_string(data).map(|s| s.len()).unwrap_or(0);
    PAGE_BASE_BYTES + template.source().len() as u64 + data_len as u64
}
