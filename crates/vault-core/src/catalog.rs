//! ============================================================================
//! Catalog Cache - Conditional Download & Offer Visibility
//! ============================================================================
//! The catalog is fetched with conditional GETs and published as an
//! immutable Arc snapshot. A 304 revalidation extends the freshness window
//! without republishing; a 200 swaps the pointer. `flush_cache` bumps a
//! generation counter so an in-flight download that started before the
//! flush can never publish into the flushed cache.
//!
//! Freshness windows are calendar-aligned (see `time_interval`) so every
//! client refreshes on the same schedule regardless of when it last asked.
//! ============================================================================

use crate::error::{QueryResult, ERR_MALFORMED_RESPONSE, ERR_TRANSPORT};
use crate::item::ItemStore;
use crate::protocol::{CatalogDownload, CatalogOffer, OfferType, RequirementType, Storefront};
use crate::time_interval::{refresh_interval, same_interval};
use crate::transport::{Transport, TransportError, WireRequest};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type ClockFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct CatalogState {
    download: Option<Arc<CatalogDownload>>,
    etag: Option<String>,
    /// Calendar-aligned window in which the snapshot is considered fresh.
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    in_flight: Option<u64>,
    generation: u64,
    waiters: Vec<oneshot::Sender<QueryResult>>,
}

struct CatalogInner {
    transport: Arc<dyn Transport>,
    catalog_url: String,
    clock: ClockFn,
    state: Mutex<CatalogState>,
}

#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<CatalogInner>,
}

impl CatalogService {
    pub fn new(transport: Arc<dyn Transport>, catalog_url: impl Into<String>) -> Self {
        Self::with_clock(transport, catalog_url, Utc::now)
    }

    /// Test seam: inject the clock used for freshness windows.
    pub fn with_clock(
        transport: Arc<dyn Transport>,
        catalog_url: impl Into<String>,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                transport,
                catalog_url: catalog_url.into(),
                clock: Box::new(clock),
                state: Mutex::new(CatalogState {
                    download: None,
                    etag: None,
                    window: None,
                    in_flight: None,
                    generation: 0,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    pub fn current(&self) -> Option<Arc<CatalogDownload>> {
        self.lock_state().download.clone()
    }

    pub fn is_fresh(&self) -> bool {
        let now = (self.inner.clock)();
        let state = self.lock_state();
        state.download.is_some()
            && matches!(state.window, Some((start, end)) if start <= now && now < end)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().window.map(|(_, end)| end)
    }

    /// Refresh unless the cached snapshot is still inside its window.
    pub async fn ensure_fresh(&self) -> QueryResult {
        if self.is_fresh() {
            return QueryResult::ok(0);
        }
        self.refresh().await
    }

    /// Download the catalog, revalidating with If-None-Match when an ETag is
    /// cached. Concurrent callers coalesce onto the one in-flight download
    /// and share its result.
    pub async fn refresh(&self) -> QueryResult {
        enum Role {
            Leader(WireRequest, u64),
            Follower(oneshot::Receiver<QueryResult>),
        }

        let role = {
            let mut state = self.lock_state();
            if state.in_flight.is_some() {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Role::Follower(rx)
            } else {
                let generation = state.generation;
                state.in_flight = Some(generation);
                let mut request = WireRequest::get(&self.inner.catalog_url);
                if let Some(etag) = &state.etag {
                    request = request.with_header("If-None-Match", etag.clone());
                }
                Role::Leader(request, generation)
            }
        };

        match role {
            Role::Follower(rx) => rx.await.unwrap_or_else(|_| QueryResult::cancelled()),
            Role::Leader(request, generation) => {
                self.download_and_publish(request, generation).await
            }
        }
    }

    async fn download_and_publish(&self, request: WireRequest, generation: u64) -> QueryResult {
        let response = self.inner.transport.execute(request).await;

        let (result, waiters) = {
            let mut state = self.lock_state();
            if state.generation != generation {
                // flushed while downloading; the flush already resolved the
                // waiters and reset in_flight
                debug!("discarding catalog download from before a cache flush");
                return QueryResult::cancelled();
            }
            state.in_flight = None;

            let result = match response {
                Err(TransportError::Cancelled) => QueryResult::cancelled(),
                Err(TransportError::Network(msg)) => {
                    warn!("catalog download failed: {}", msg);
                    QueryResult::failed(0, ERR_TRANSPORT, msg)
                }
                Ok(resp) if resp.is_not_modified() => {
                    // same content: keep the snapshot identity, only extend
                    // the freshness window
                    let hours = state
                        .download
                        .as_ref()
                        .map(|d| interval_hours(d.refresh_interval_hrs))
                        .unwrap_or(1);
                    state.window = Some(refresh_interval((self.inner.clock)(), hours));
                    debug!("catalog revalidated, window extended");
                    QueryResult::ok(304)
                }
                Ok(resp) if resp.is_success() => {
                    match serde_json::from_str::<CatalogDownload>(&resp.body) {
                        Ok(download) => {
                            let hours = interval_hours(download.refresh_interval_hrs);
                            state.etag = resp.header("ETag").map(str::to_string);
                            state.window = Some(refresh_interval((self.inner.clock)(), hours));
                            info!(
                                "catalog updated: {} storefronts, refresh every {}h",
                                download.storefronts.len(),
                                hours
                            );
                            state.download = Some(Arc::new(download));
                            QueryResult::ok(resp.status)
                        }
                        Err(e) => {
                            warn!("catalog body did not parse: {}", e);
                            QueryResult::failed(resp.status, ERR_MALFORMED_RESPONSE, e.to_string())
                        }
                    }
                }
                Ok(resp) => QueryResult::failed(resp.status, "", resp.body),
            };

            (result, std::mem::take(&mut state.waiters))
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Invalidate the cache. The snapshot itself survives (readers may keep
    /// using stale data) but the ETag and window are dropped, coalesced
    /// waiters are cancelled, and any in-flight download is disowned.
    pub fn flush_cache(&self) {
        let waiters = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.etag = None;
            state.window = None;
            state.in_flight = None;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(QueryResult::cancelled());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CatalogState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Filtered offer views of one storefront. Each view co-owns the
    /// snapshot it was cut from, so it stays valid across later refreshes.
    pub fn visible_offer_views(
        &self,
        storefront_name: &str,
        ctx: &OfferFilterContext<'_>,
    ) -> Vec<OfferView> {
        let Some(download) = self.current() else {
            return Vec::new();
        };
        let Some(storefront_idx) = download
            .storefronts
            .iter()
            .position(|sf| sf.name == storefront_name)
        else {
            return Vec::new();
        };

        let storefront = &download.storefronts[storefront_idx];
        visible_offers(storefront, ctx)
            .iter()
            .filter_map(|offer| {
                storefront
                    .catalog_entries
                    .iter()
                    .position(|o| o.offer_id == offer.offer_id)
            })
            .map(|entry_idx| OfferView {
                download: download.clone(),
                storefront_idx,
                entry_idx,
            })
            .collect()
    }
}

/// One offer plus shared ownership of the catalog snapshot it came from.
#[derive(Clone)]
pub struct OfferView {
    download: Arc<CatalogDownload>,
    storefront_idx: usize,
    entry_idx: usize,
}

impl OfferView {
    pub fn offer(&self) -> &CatalogOffer {
        &self.download.storefronts[self.storefront_idx].catalog_entries[self.entry_idx]
    }

    pub fn storefront_name(&self) -> &str {
        &self.download.storefronts[self.storefront_idx].name
    }

    pub fn snapshot(&self) -> &Arc<CatalogDownload> {
        &self.download
    }
}

fn interval_hours(refresh_interval_hrs: f64) -> i64 {
    refresh_interval_hrs.max(0.0).round() as i64
}

// ============================================================================
// Offer visibility
// ============================================================================

/// Profile-derived context for offer filtering. Borrowed from a profile
/// while the group lock is held.
pub struct OfferFilterContext<'a> {
    pub items: &'a ItemStore,
    pub stats: &'a serde_json::Map<String, Value>,
    /// Real-money currency the storefront is being browsed in (e.g. "USD").
    pub currency_code: &'a str,
    /// Two-letter country of the storefront session.
    pub country: &'a str,
}

impl OfferFilterContext<'_> {
    fn fulfillment_count(&self, fulfillment_id: &str) -> i32 {
        self.stats
            .get("fulfillment_counts")
            .and_then(|v| v.get(fulfillment_id))
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32
    }

    fn has_purchased(&self, offer_id: &str) -> bool {
        self.stats
            .get("purchase_history")
            .and_then(|v| v.get("offers"))
            .and_then(Value::as_array)
            .map(|offers| {
                offers
                    .iter()
                    .any(|o| o.get("offerId").and_then(Value::as_str) == Some(offer_id))
            })
            .unwrap_or(false)
    }
}

/// Offers of one storefront the player is currently allowed to see, in
/// display order (sort priority descending, title as tie-break).
pub fn visible_offers<'a>(
    storefront: &'a Storefront,
    ctx: &OfferFilterContext<'_>,
) -> Vec<&'a CatalogOffer> {
    // within a catalog group only the highest-priority member competes
    let mut group_winner: HashMap<&str, i32> = HashMap::new();
    for offer in &storefront.catalog_entries {
        if offer.catalog_group.is_empty() {
            continue;
        }
        let entry = group_winner
            .entry(offer.catalog_group.as_str())
            .or_insert(offer.catalog_group_priority);
        if offer.catalog_group_priority > *entry {
            *entry = offer.catalog_group_priority;
        }
    }

    let mut visible: Vec<&CatalogOffer> = storefront
        .catalog_entries
        .iter()
        .filter(|offer| {
            if !offer.catalog_group.is_empty()
                && group_winner.get(offer.catalog_group.as_str())
                    != Some(&offer.catalog_group_priority)
            {
                return false;
            }
            offer_matches_market(offer, ctx) && offer_requirements_met(offer, ctx)
        })
        .collect();

    visible.sort_by(|a, b| {
        b.sort_priority
            .cmp(&a.sort_priority)
            .then_with(|| a.title.cmp(&b.title))
    });
    visible
}

fn offer_matches_market(offer: &CatalogOffer, ctx: &OfferFilterContext<'_>) -> bool {
    if offer.offer_type == OfferType::RealMoney {
        if let Some(currency) = &offer.currency_code {
            if currency != ctx.currency_code {
                return false;
            }
        }
        if !offer.countries.is_empty() && !offer.countries.iter().any(|c| c == ctx.country) {
            return false;
        }
    }
    true
}

fn offer_requirements_met(offer: &CatalogOffer, ctx: &OfferFilterContext<'_>) -> bool {
    if offer.single_purchase_only && ctx.has_purchased(&offer.offer_id) {
        return false;
    }
    offer.requirements.iter().all(|req| {
        let needed = req.minimum_quantity.max(1);
        match req.requirement_type {
            RequirementType::RequireItemOwnership => {
                ctx.items.count_by_template(&req.required_id) >= needed
            }
            RequirementType::DenyOnItemOwnership => {
                ctx.items.count_by_template(&req.required_id) < needed
            }
            RequirementType::RequireFulfillment => {
                ctx.fulfillment_count(&req.required_id) >= needed
            }
        }
    })
}

// ============================================================================
// Daily purchase limits
// ============================================================================

/// Purchases of `offer_id` made inside the current calendar interval,
/// read from the profile's `daily_purchases` stat.
pub fn purchases_in_current_interval(
    stats: &serde_json::Map<String, Value>,
    offer_id: &str,
    now: DateTime<Utc>,
    hours_per_interval: i64,
) -> i32 {
    let Some(daily) = stats.get("daily_purchases") else {
        return 0;
    };
    let last_interval = daily
        .get("lastInterval")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok());
    match last_interval {
        Some(last) if same_interval(last, now, hours_per_interval) => daily
            .get("purchaseList")
            .and_then(|v| v.get(offer_id))
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32,
        _ => 0,
    }
}

/// Whether the daily limit still allows purchasing this offer now.
pub fn within_daily_limit(
    stats: &serde_json::Map<String, Value>,
    offer: &CatalogOffer,
    now: DateTime<Utc>,
    hours_per_interval: i64,
) -> bool {
    if offer.daily_limit < 0 {
        return true;
    }
    purchases_in_current_interval(stats, &offer.offer_id, now, hours_per_interval)
        < offer.daily_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ERR_CANCELLED;
    use crate::item::Item;
    use crate::transport::testing::MockTransport;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn catalog_body(refresh_hrs: f64) -> String {
        json!({
            "refreshIntervalHrs": refresh_hrs,
            "storefronts": [
                { "name": "Featured", "catalogEntries": [] }
            ]
        })
        .to_string()
    }

    fn service(transport: Arc<MockTransport>) -> CatalogService {
        CatalogService::with_clock(transport, "https://vault.test/api/catalog", || {
            "2024-03-01T13:10:00Z".parse().unwrap()
        })
    }

    #[tokio::test]
    async fn test_download_publishes_snapshot_and_window() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response_with_headers(
            200,
            vec![("ETag".to_string(), "\"v1\"".to_string())],
            catalog_body(6.0),
        );
        let catalog = service(transport);

        let result = catalog.refresh().await;
        assert!(result.success);
        assert!(catalog.current().is_some());
        assert!(catalog.is_fresh());
        // 13:10 with 6h intervals sits in [12:00, 18:00)
        assert_eq!(
            catalog.expires_at(),
            Some("2024-03-01T18:00:00Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_revalidation_preserves_snapshot_identity() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response_with_headers(
            200,
            vec![("ETag".to_string(), "\"v1\"".to_string())],
            catalog_body(6.0),
        );
        transport.push_response(304, "");
        let catalog = service(transport.clone());

        catalog.refresh().await;
        let first = catalog.current().unwrap();
        let result = catalog.refresh().await;
        assert!(result.success);
        assert_eq!(result.http_status, 304);
        let second = catalog.current().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // the revalidation carried the cached ETag
        let requests = transport.requests();
        assert_eq!(
            requests[1]
                .headers
                .iter()
                .find(|(n, _)| n == "If-None-Match")
                .map(|(_, v)| v.as_str()),
            Some("\"v1\"")
        );
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let transport = Arc::new(MockTransport::new());
        transport.push_delayed_response(200, catalog_body(6.0), StdDuration::from_millis(20));
        let catalog = service(transport.clone());

        let a = catalog.clone();
        let b = catalog.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.refresh().await }),
            tokio::spawn(async move { b.refresh().await }),
        );
        assert!(ra.unwrap().success);
        assert!(rb.unwrap().success);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_disowns_inflight_download() {
        let transport = Arc::new(MockTransport::new());
        transport.push_delayed_response(200, catalog_body(6.0), StdDuration::from_millis(30));
        let catalog = service(transport.clone());

        let worker = catalog.clone();
        let handle = tokio::spawn(async move { worker.refresh().await });
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        catalog.flush_cache();

        let result = handle.await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code, ERR_CANCELLED);
        // the flushed generation never published
        assert!(catalog.current().is_none());
        assert!(!catalog.is_fresh());
    }

    #[tokio::test]
    async fn test_flush_clears_etag_but_keeps_snapshot() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response_with_headers(
            200,
            vec![("ETag".to_string(), "\"v1\"".to_string())],
            catalog_body(6.0),
        );
        transport.push_response(200, catalog_body(6.0));
        let catalog = service(transport.clone());

        catalog.refresh().await;
        catalog.flush_cache();
        assert!(catalog.current().is_some());
        assert!(!catalog.is_fresh());

        catalog.refresh().await;
        let second = &transport.requests()[1];
        assert!(
            !second.headers.iter().any(|(n, _)| n == "If-None-Match"),
            "flushed cache must not revalidate against a dropped ETag"
        );
    }

    #[tokio::test]
    async fn test_offer_views_survive_a_refresh() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(
            200,
            json!({
                "refreshIntervalHrs": 6.0,
                "storefronts": [{ "name": "Featured", "catalogEntries": [{
                    "offerId": "o1", "offerType": "inGameCurrency", "title": "Old Title"
                }]}]
            })
            .to_string(),
        );
        transport.push_response(
            200,
            json!({
                "refreshIntervalHrs": 6.0,
                "storefronts": [{ "name": "Featured", "catalogEntries": [{
                    "offerId": "o1", "offerType": "inGameCurrency", "title": "New Title"
                }]}]
            })
            .to_string(),
        );
        let catalog = service(transport);

        catalog.refresh().await;
        let items = ItemStore::new();
        let stats = serde_json::Map::new();
        let views = catalog.visible_offer_views("Featured", &empty_ctx(&items, &stats));
        assert_eq!(views.len(), 1);

        // a new snapshot replaces the published pointer; the held view
        // keeps reading its own snapshot consistently
        catalog.refresh().await;
        assert_eq!(views[0].offer().title, "Old Title");
        assert_eq!(
            catalog.current().unwrap().storefronts[0].catalog_entries[0].title,
            "New Title"
        );
    }

    #[tokio::test]
    async fn test_ensure_fresh_short_circuits_inside_window() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, catalog_body(6.0));
        let catalog = service(transport.clone());

        catalog.ensure_fresh().await;
        catalog.ensure_fresh().await;
        catalog.ensure_fresh().await;
        assert_eq!(transport.request_count(), 1);
    }

    // ------------------------------------------------------------------------
    // Offer visibility
    // ------------------------------------------------------------------------

    fn offer(id: &str, json_extra: Value) -> CatalogOffer {
        let mut base = json!({
            "offerId": id,
            "offerType": "inGameCurrency",
            "title": id,
        });
        base.as_object_mut()
            .unwrap()
            .extend(json_extra.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    fn storefront(offers: Vec<CatalogOffer>) -> Storefront {
        Storefront {
            name: "Featured".to_string(),
            catalog_entries: offers,
        }
    }

    fn empty_ctx<'a>(
        items: &'a ItemStore,
        stats: &'a serde_json::Map<String, Value>,
    ) -> OfferFilterContext<'a> {
        OfferFilterContext {
            items,
            stats,
            currency_code: "USD",
            country: "US",
        }
    }

    #[test]
    fn test_catalog_group_priority_competition() {
        let sf = storefront(vec![
            offer("low", json!({ "catalogGroup": "bundles", "catalogGroupPriority": 1 })),
            offer("high", json!({ "catalogGroup": "bundles", "catalogGroupPriority": 5 })),
            offer("solo", json!({})),
        ]);
        let items = ItemStore::new();
        let stats = serde_json::Map::new();
        let visible = visible_offers(&sf, &empty_ctx(&items, &stats));
        let ids: Vec<&str> = visible.iter().map(|o| o.offer_id.as_str()).collect();
        assert!(ids.contains(&"high"));
        assert!(ids.contains(&"solo"));
        assert!(!ids.contains(&"low"));
    }

    #[test]
    fn test_real_money_currency_and_country_filter() {
        let sf = storefront(vec![
            offer("usd-us", json!({ "offerType": "realMoney", "currencyCode": "USD", "countries": ["US"] })),
            offer("eur", json!({ "offerType": "realMoney", "currencyCode": "EUR" })),
            offer("usd-gb", json!({ "offerType": "realMoney", "currencyCode": "USD", "countries": ["GB"] })),
        ]);
        let items = ItemStore::new();
        let stats = serde_json::Map::new();
        let visible = visible_offers(&sf, &empty_ctx(&items, &stats));
        let ids: Vec<&str> = visible.iter().map(|o| o.offer_id.as_str()).collect();
        assert_eq!(ids, vec!["usd-us"]);
    }

    #[test]
    fn test_ownership_requirements() {
        let sf = storefront(vec![
            offer("needs-key", json!({ "requirements": [
                { "requirementType": "requireItemOwnership", "requiredId": "Token.Key" }
            ]})),
            offer("upsell", json!({ "requirements": [
                { "requirementType": "denyOnItemOwnership", "requiredId": "Skin.Gold" }
            ]})),
        ]);

        let mut items = ItemStore::new();
        items.insert(Item::new("a", "Skin.Gold", 1, 0));
        let stats = serde_json::Map::new();
        let visible = visible_offers(&sf, &empty_ctx(&items, &stats));
        assert!(visible.is_empty());

        let mut items = ItemStore::new();
        items.insert(Item::new("a", "Token.Key", 1, 0));
        let visible = visible_offers(&sf, &empty_ctx(&items, &stats));
        let ids: Vec<&str> = visible.iter().map(|o| o.offer_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"needs-key"));
        assert!(ids.contains(&"upsell"));
    }

    #[test]
    fn test_single_purchase_hidden_after_purchase() {
        let sf = storefront(vec![offer("once", json!({ "singlePurchaseOnly": true }))]);
        let items = ItemStore::new();

        let stats = serde_json::Map::new();
        assert_eq!(visible_offers(&sf, &empty_ctx(&items, &stats)).len(), 1);

        let stats = json!({ "purchase_history": { "offers": [{ "offerId": "once" }] } });
        let stats = stats.as_object().unwrap().clone();
        assert!(visible_offers(&sf, &empty_ctx(&items, &stats)).is_empty());
    }

    #[test]
    fn test_sort_priority_then_title() {
        let sf = storefront(vec![
            offer("bravo", json!({ "sortPriority": 5 })),
            offer("alpha", json!({ "sortPriority": 5 })),
            offer("zulu", json!({ "sortPriority": 10 })),
        ]);
        let items = ItemStore::new();
        let stats = serde_json::Map::new();
        let visible = visible_offers(&sf, &empty_ctx(&items, &stats));
        let ids: Vec<&str> = visible.iter().map(|o| o.offer_id.as_str()).collect();
        assert_eq!(ids, vec!["zulu", "alpha", "bravo"]);
    }

    #[test]
    fn test_daily_limit_counts_current_interval_only() {
        let limited = offer("daily", json!({ "dailyLimit": 2 }));
        let now: DateTime<Utc> = "2024-03-01T13:10:00Z".parse().unwrap();

        // two purchases earlier in the same 6h interval: limit reached
        let stats = json!({ "daily_purchases": {
            "lastInterval": "2024-03-01T12:05:00Z",
            "purchaseList": { "daily": 2 }
        }});
        let stats = stats.as_object().unwrap().clone();
        assert_eq!(purchases_in_current_interval(&stats, "daily", now, 6), 2);
        assert!(!within_daily_limit(&stats, &limited, now, 6));

        // purchases from a previous interval no longer count
        let stats = json!({ "daily_purchases": {
            "lastInterval": "2024-03-01T09:00:00Z",
            "purchaseList": { "daily": 2 }
        }});
        let stats = stats.as_object().unwrap().clone();
        assert_eq!(purchases_in_current_interval(&stats, "daily", now, 6), 0);
        assert!(within_daily_limit(&stats, &limited, now, 6));

        let unlimited = offer("free", json!({}));
        assert!(within_daily_limit(&stats, &unlimited, now, 6));
    }
}
