//! Cursor-based pagination with retry, caching and a safety page cap.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::InstantlyError;
use crate::types::{Page, VendorLead};

/// Cursor-paginated lead listing endpoint.
pub const LEADS_LIST_ENDPOINT: &str = "/api/v2/leads/list";

/// Default lifetime of cached pagination results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Request parameters that describe a position in the walk, not its shape.
const CURSOR_PARAMS: [&str; 4] = ["starting_after", "limit", "page", "per_page"];

/// A source of pages for a cursor-paginated endpoint.
///
/// `InstantlyClient` implements this against the live API; tests substitute
/// an in-memory source.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page. `body` already carries `limit` and `starting_after`.
    async fn fetch_page(&self, endpoint: &str, body: &Value) -> Result<Page<Value>, InstantlyError>;
}

/// Tuning knobs for a single walk.
#[derive(Debug, Clone)]
pub struct PaginationOptions {
    /// Items requested per page.
    pub page_size: u32,
    /// Consecutive page failures tolerated before returning partial results.
    pub max_retries: u32,
    /// Linear backoff step between retries.
    pub retry_base_delay: Duration,
    /// Log progress every N pages (0 disables).
    pub progress_interval: u32,
    /// Hard stop to prevent runaway loops.
    pub max_pages: u32,
    /// Fixed pause between successful pages (vendor rate limit).
    pub page_delay: Duration,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            progress_interval: 20,
            max_pages: 1000,
            page_delay: Duration::ZERO,
        }
    }
}

/// Statistics for one walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginationStats {
    pub total_pages: u32,
    pub total_items: usize,
    pub duration: Duration,
    /// Served from the in-memory cache.
    pub cache_hit: bool,
    /// The walk stopped early (retries exhausted, page cap, or cursor loop).
    pub truncated: bool,
}

impl PaginationStats {
    pub fn avg_items_per_page(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            self.total_items as f64 / self.total_pages as f64
        }
    }
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cached_queries: usize,
    pub total_cached_items: usize,
}

#[derive(Debug, Clone)]
struct CachedResult {
    items: Vec<Value>,
    stored_at: Instant,
    stats: PaginationStats,
}

/// Walks cursor-paginated endpoints to completion.
pub struct CursorPaginator<S> {
    source: S,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedResult>>,
}

impl<S: PageSource> CursorPaginator<S> {
    /// Create a paginator with the default five minute cache.
    pub fn new(source: S) -> Self {
        Self::with_cache_ttl(source, DEFAULT_CACHE_TTL)
    }

    /// Create a paginator with a custom cache lifetime. Zero disables caching.
    pub fn with_cache_ttl(source: S, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying page source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch every item from `endpoint`, starting from `base_params`.
    ///
    /// Never fails: page errors are retried with linear backoff and, once
    /// `max_retries` consecutive failures accumulate, the items collected so
    /// far are returned with `stats.truncated` set.
    pub async fn fetch_all(
        &self,
        endpoint: &str,
        base_params: &Map<String, Value>,
        options: &PaginationOptions,
    ) -> (Vec<Value>, PaginationStats) {
        let key = cache_key(endpoint, base_params, options.page_size);

        if let Some(hit) = self.cached(&key).await {
            return hit;
        }

        let started = Instant::now();
        let mut items: Vec<Value> = Vec::new();
        let mut starting_after: Option<String> = None;
        let mut pages = 0u32;
        let mut consecutive_failures = 0u32;
        let mut truncated = false;

        loop {
            let mut body = base_params.clone();
            body.insert("limit".to_string(), Value::from(options.page_size));
            if let Some(cursor) = &starting_after {
                body.insert("starting_after".to_string(), Value::String(cursor.clone()));
            }

            let page = match self.source.fetch_page(endpoint, &Value::Object(body)).await {
                Ok(page) => page,
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "Pagination error on {} (attempt {}/{}): {}",
                        endpoint, consecutive_failures, options.max_retries, e
                    );
                    if consecutive_failures >= options.max_retries {
                        error!(
                            "Max retries reached for {}; returning partial results: {} items",
                            endpoint,
                            items.len()
                        );
                        truncated = true;
                        break;
                    }
                    let backoff = options.retry_base_delay * consecutive_failures;
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            consecutive_failures = 0;

            if page.items.is_empty() {
                debug!("No more items returned, ending pagination");
                break;
            }

            pages += 1;
            debug!("Page {}: {} items fetched", pages, page.items.len());
            items.extend(page.items);

            if options.progress_interval > 0 && pages % options.progress_interval == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 { items.len() as f64 / elapsed } else { 0.0 };
                info!("Progress: {} pages, {} items ({:.1} items/sec)", pages, items.len(), rate);
            }
            if pages == 100 {
                warn!("Large dataset: {} pages, {} items", pages, items.len());
            } else if pages == 200 {
                warn!("Very large dataset: {} pages, {} items", pages, items.len());
            }

            let next = match page.next_starting_after {
                Some(next) => next,
                None => {
                    debug!("No next_starting_after, pagination complete");
                    break;
                }
            };

            if starting_after.as_deref() == Some(next.as_str()) {
                error!("Cursor did not advance on {} ({}); stopping", endpoint, next);
                truncated = true;
                break;
            }

            if pages >= options.max_pages {
                error!(
                    "Safety limit reached on {}: {} pages. Possible pagination corruption.",
                    endpoint, pages
                );
                truncated = true;
                break;
            }

            starting_after = Some(next);

            if !options.page_delay.is_zero() {
                tokio::time::sleep(options.page_delay).await;
            }
        }

        let stats = PaginationStats {
            total_pages: pages,
            total_items: items.len(),
            duration: started.elapsed(),
            cache_hit: false,
            truncated,
        };

        info!(
            "Pagination complete: {} items in {} pages ({:.1}s)",
            stats.total_items,
            stats.total_pages,
            stats.duration.as_secs_f64()
        );

        if !self.cache_ttl.is_zero() && !truncated {
            self.cache.lock().await.insert(
                key,
                CachedResult {
                    items: items.clone(),
                    stored_at: Instant::now(),
                    stats: stats.clone(),
                },
            );
        }

        (items, stats)
    }

    /// Fetch every lead, optionally restricted to one campaign.
    ///
    /// Items that fail to decode are logged and skipped.
    pub async fn fetch_all_leads(
        &self,
        campaign_id: Option<&str>,
        options: &PaginationOptions,
    ) -> (Vec<VendorLead>, PaginationStats) {
        let mut params = Map::new();
        if let Some(campaign_id) = campaign_id {
            params.insert("campaign".to_string(), Value::String(campaign_id.to_string()));
        }

        let (items, stats) = self.fetch_all(LEADS_LIST_ENDPOINT, &params, options).await;
        let leads = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<VendorLead>(item) {
                Ok(lead) => Some(lead),
                Err(e) => {
                    warn!("Skipping undecodable lead: {}", e);
                    None
                }
            })
            .collect();

        (leads, stats)
    }

    /// Drop every cached result.
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.lock().await;
        let count = cache.len();
        cache.clear();
        info!("Cleared {} cached pagination results", count);
    }

    /// Current cache contents.
    pub async fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().await;
        CacheStats {
            cached_queries: cache.len(),
            total_cached_items: cache.values().map(|c| c.items.len()).sum(),
        }
    }

    async fn cached(&self, key: &str) -> Option<(Vec<Value>, PaginationStats)> {
        if self.cache_ttl.is_zero() {
            return None;
        }

        let mut cache = self.cache.lock().await;
        let expired = match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.cache_ttl => {
                debug!("Using cached results: {} items", entry.items.len());
                let stats = PaginationStats {
                    cache_hit: true,
                    ..entry.stats.clone()
                };
                return Some((entry.items.clone(), stats));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            cache.remove(key);
        }
        None
    }
}

/// Cache key for a request shape: endpoint, page size, and the sorted
/// non-cursor parameters.
pub fn cache_key(endpoint: &str, params: &Map<String, Value>, page_size: u32) -> String {
    let mut parts = vec![endpoint.to_string(), page_size.to_string()];

    let mut keys: Vec<&String> = params
        .keys()
        .filter(|k| !CURSOR_PARAMS.contains(&k.as_str()))
        .collect();
    keys.sort();

    for key in keys {
        parts.push(format!("{}:{}", key, params[key.as_str()]));
    }

    parts.join("|")
}
