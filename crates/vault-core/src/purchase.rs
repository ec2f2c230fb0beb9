//! ============================================================================
//! Commerce - Purchases & Receipt Redemption
//! ============================================================================
//! Two purchase paths share one engine:
//! - in-game currency offers go straight to the backend as a
//!   PurchaseCatalogEntry command, with exactly one automatic catalog
//!   refresh + retry when the backend reports the catalog out of date
//! - real-money offers go through the payment provider, producing receipts
//!   that are then validated against the backend one by one
//!
//! Receipt redemption is a strict state machine
//! (Initialized -> ReadingReceipts -> PendingValidation -> Complete) and is
//! group-wide exclusive: a second flow started while one runs is refused,
//! never interleaved. Flows that already hold their receipts (a checkout
//! just produced them) skip ReadingReceipts and go straight to
//! PendingValidation. Failures move the machine forward; it always reaches
//! Complete with the failure recorded on the report.
//! ============================================================================

use crate::catalog::CatalogService;
use crate::error::{EngineError, QueryResult};
use crate::group::ProfileGroup;
use crate::protocol::{CatalogDownload, CatalogOffer, OfferType, Receipt};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const REDEEM_RECEIPT_COMMAND: &str = "RedeemReceipt";
const PURCHASE_COMMAND: &str = "PurchaseCatalogEntry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionState {
    Initialized,
    ReadingReceipts,
    PendingValidation,
    Complete,
}

/// Platform payment integration. Checkout blocks until the provider UI
/// resolves; a user backing out surfaces as a user-cancelled backend error.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn enumerate_receipts(&self) -> Result<Vec<Receipt>, EngineError>;
    async fn checkout(
        &self,
        offer: &CatalogOffer,
        quantity: i32,
    ) -> Result<Vec<Receipt>, EngineError>;
}

/// Outcome of one redemption pass. The machine always reaches Complete;
/// `result` carries the first failure encountered, if any. `walk` records
/// every state entered, in order.
#[derive(Debug)]
pub struct RedemptionReport {
    pub state: RedemptionState,
    pub walk: Vec<RedemptionState>,
    pub result: QueryResult,
    pub validated: usize,
    pub skipped: usize,
}

impl RedemptionReport {
    fn new() -> Self {
        Self {
            state: RedemptionState::Initialized,
            walk: vec![RedemptionState::Initialized],
            result: QueryResult::ok(0),
            validated: 0,
            skipped: 0,
        }
    }

    fn advance(&mut self, next: RedemptionState) {
        self.state = next;
        self.walk.push(next);
    }

    fn record_failure(&mut self, failure: QueryResult) {
        // first failure wins; later ones are only logged by the caller
        if self.result.success {
            self.result = failure;
        }
    }
}

/// Releases the group-wide redemption slot on every exit path.
struct RedemptionGuard {
    group: ProfileGroup,
}

impl RedemptionGuard {
    fn acquire(group: &ProfileGroup) -> Result<Self, EngineError> {
        if group.try_begin_redemption() {
            Ok(Self {
                group: group.clone(),
            })
        } else {
            Err(EngineError::Disallowed(
                "a receipt redemption flow is already running for this account".to_string(),
            ))
        }
    }
}

impl Drop for RedemptionGuard {
    fn drop(&mut self) {
        self.group.end_redemption();
    }
}

pub struct CommerceEngine {
    group: ProfileGroup,
    catalog: CatalogService,
    provider: Arc<dyn PaymentProvider>,
    profile_id: String,
}

impl CommerceEngine {
    pub fn new(
        group: ProfileGroup,
        catalog: CatalogService,
        provider: Arc<dyn PaymentProvider>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            group,
            catalog,
            provider,
            profile_id: profile_id.into(),
        }
    }

    /// Re-drive any platform purchases the backend has not granted yet:
    /// enumerate receipts held by the provider and validate the ones the
    /// profile does not already show as redeemed.
    pub async fn validate_existing_purchases(&self) -> Result<RedemptionReport, EngineError> {
        let _guard = RedemptionGuard::acquire(&self.group)?;
        let mut report = RedemptionReport::new();

        report.advance(RedemptionState::ReadingReceipts);
        info!("account {}: reading platform receipts", self.group.account_id());
        let receipts = match self.provider.enumerate_receipts().await {
            Ok(receipts) => receipts,
            Err(e) => {
                // enumeration failure does not stall the machine; it walks
                // the remaining states with an empty receipt list
                warn!("receipt enumeration failed: {}", e);
                report.record_failure(QueryResult::failed(0, "", e.to_string()));
                Vec::new()
            }
        };

        self.validate_receipts(receipts, &mut report).await;
        report.advance(RedemptionState::Complete);
        Ok(report)
    }

    /// Purchase an offer from the current catalog. In-game currency offers
    /// are charged server-side; real-money offers run through the payment
    /// provider and redeem the resulting receipts.
    pub async fn purchase_offer(
        &self,
        storefront: &str,
        offer_id: &str,
        quantity: i32,
    ) -> Result<QueryResult, EngineError> {
        self.catalog.ensure_fresh().await.into_result()?;
        let snapshot = self
            .catalog
            .current()
            .ok_or_else(|| EngineError::Disallowed("no catalog downloaded".to_string()))?;
        let offer = find_offer(&snapshot, storefront, offer_id)
            .ok_or_else(|| {
                EngineError::Disallowed(format!("offer {} not in catalog", offer_id))
            })?
            .clone();

        match offer.offer_type {
            OfferType::InGameCurrency => {
                self.purchase_with_currency(storefront, &offer, quantity).await
            }
            OfferType::RealMoney => self
                .purchase_with_provider(&offer, quantity)
                .await
                .map(|report| report.result),
        }
    }

    async fn purchase_with_currency(
        &self,
        storefront: &str,
        offer: &CatalogOffer,
        quantity: i32,
    ) -> Result<QueryResult, EngineError> {
        let result = self.send_purchase(offer, quantity).await?;
        if !result.is_catalog_out_of_date() {
            return Ok(result);
        }

        // the backend rotated the catalog under us: refresh once and retry
        // once with the offer as currently published, then report honestly
        info!(
            "offer {} priced against a stale catalog, refreshing and retrying",
            offer.offer_id
        );
        self.catalog.flush_cache();
        self.catalog.refresh().await.into_result()?;
        let snapshot = self
            .catalog
            .current()
            .ok_or_else(|| EngineError::Disallowed("no catalog downloaded".to_string()))?;
        let fresh_offer = find_offer(&snapshot, storefront, &offer.offer_id).ok_or_else(|| {
            EngineError::Disallowed(format!(
                "offer {} disappeared from the refreshed catalog",
                offer.offer_id
            ))
        })?;
        self.send_purchase(fresh_offer, quantity).await
    }

    async fn send_purchase(
        &self,
        offer: &CatalogOffer,
        quantity: i32,
    ) -> Result<QueryResult, EngineError> {
        let price = offer.prices.first();
        let body = json!({
            "offerId": offer.offer_id,
            "purchaseQuantity": quantity,
            "currency": price.map(|p| p.currency_type.clone()).unwrap_or_default(),
            "currencySubType": price.map(|p| p.currency_sub_type.clone()).unwrap_or_default(),
            "expectedTotalPrice": price.map(|p| p.final_price * quantity as i64).unwrap_or(0),
        });
        self.group
            .enqueue_command(&self.profile_id, PURCHASE_COMMAND, body)
            .await
            .map_err(|_| EngineError::Cancelled)
    }

    /// Checkout already hands the receipts over, so this flow never enters
    /// ReadingReceipts; it moves from Initialized straight to validation.
    async fn purchase_with_provider(
        &self,
        offer: &CatalogOffer,
        quantity: i32,
    ) -> Result<RedemptionReport, EngineError> {
        let _guard = RedemptionGuard::acquire(&self.group)?;
        let mut report = RedemptionReport::new();

        // user cancellation propagates as-is so UI can suppress the error
        let receipts = self.provider.checkout(offer, quantity).await?;

        self.validate_receipts(receipts, &mut report).await;
        report.advance(RedemptionState::Complete);
        Ok(report)
    }

    /// Validate each receipt against the backend, skipping receipts the
    /// profile already shows as redeemed.
    async fn validate_receipts(&self, receipts: Vec<Receipt>, report: &mut RedemptionReport) {
        report.advance(RedemptionState::PendingValidation);
        for receipt in receipts {
            let already_redeemed = self
                .group
                .with_profile(&self.profile_id, |p| {
                    p.has_redeemed_receipt(&receipt.receipt_id)
                })
                .unwrap_or(false);
            if already_redeemed {
                info!("receipt {} already redeemed, skipping", receipt.receipt_id);
                report.skipped += 1;
                continue;
            }

            let body = json!({
                "appStoreId": receipt.app_store_id,
                "receiptId": receipt.receipt_id,
                "validationBlob": receipt.validation_blob,
            });
            let result = self
                .group
                .enqueue_command(&self.profile_id, REDEEM_RECEIPT_COMMAND, body)
                .await
                .unwrap_or_else(|_| QueryResult::cancelled());

            if result.success {
                report.validated += 1;
            } else {
                warn!(
                    "receipt {} failed validation: {} {}",
                    receipt.receipt_id, result.error_code, result.error_message
                );
                report.record_failure(result);
            }
        }
    }
}

fn find_offer<'a>(
    catalog: &'a CatalogDownload,
    storefront: &str,
    offer_id: &str,
) -> Option<&'a CatalogOffer> {
    catalog
        .storefronts
        .iter()
        .find(|sf| sf.name == storefront)?
        .catalog_entries
        .iter()
        .find(|offer| offer.offer_id == offer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ERR_CATALOG_OUT_OF_DATE, ERR_USER_CANCELLED};
    use crate::group::{GroupConfig, UrlContext};
    use crate::instance::InstanceRegistry;
    use crate::transport::testing::MockTransport;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct MockProvider {
        enumerations: Mutex<VecDeque<Result<Vec<Receipt>, EngineError>>>,
        checkouts: Mutex<VecDeque<Result<Vec<Receipt>, EngineError>>>,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                enumerations: Mutex::new(VecDeque::new()),
                checkouts: Mutex::new(VecDeque::new()),
            }
        }

        fn push_enumeration(&self, result: Result<Vec<Receipt>, EngineError>) {
            self.enumerations.lock().unwrap().push_back(result);
        }

        fn push_checkout(&self, result: Result<Vec<Receipt>, EngineError>) {
            self.checkouts.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        async fn enumerate_receipts(&self) -> Result<Vec<Receipt>, EngineError> {
            self.enumerations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn checkout(
            &self,
            _offer: &CatalogOffer,
            _quantity: i32,
        ) -> Result<Vec<Receipt>, EngineError> {
            self.checkouts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn receipt(id: &str) -> Receipt {
        Receipt {
            app_store_id: "store.test".to_string(),
            receipt_id: id.to_string(),
            validation_blob: format!("blob-{}", id),
        }
    }

    fn engine() -> (CommerceEngine, Arc<MockTransport>, Arc<MockProvider>) {
        let transport = Arc::new(MockTransport::new());
        let group = ProfileGroup::new(
            GroupConfig {
                base_url: "https://vault.test".to_string(),
                account_id: "acct-1".to_string(),
                context: UrlContext::Client,
            },
            transport.clone(),
            InstanceRegistry::new().into_shared(),
        );
        group.add_profile("main");
        let catalog = CatalogService::new(transport.clone(), "https://vault.test/api/catalog");
        let provider = Arc::new(MockProvider::new());
        let engine = CommerceEngine::new(group, catalog, provider.clone(), "main");
        (engine, transport, provider)
    }

    fn profile_body(revision: i64, items: Value) -> String {
        json!({
            "profileRevision": revision,
            "profileChangesBaseRevision": revision,
            "profileChanges": [{
                "changeType": "fullProfileUpdate",
                "profile": { "stats": { "attributes": {} }, "items": items }
            }]
        })
        .to_string()
    }

    fn catalog_body(offers: Value) -> String {
        json!({
            "refreshIntervalHrs": 6.0,
            "storefronts": [
                { "name": "Featured", "catalogEntries": offers }
            ]
        })
        .to_string()
    }

    fn currency_offer(id: &str) -> Value {
        json!({
            "offerId": id,
            "offerType": "inGameCurrency",
            "title": "Test Offer",
            "prices": [
                { "currencyType": "MtxCurrency", "regularPrice": 800, "finalPrice": 600 }
            ]
        })
    }

    #[tokio::test]
    async fn test_redemption_skips_already_redeemed_receipts() {
        let (engine, transport, provider) = engine();
        // profile already shows r2 as redeemed
        transport.push_response(
            200,
            profile_body(
                1,
                json!({ "grant": { "templateId": "Token.Purchase", "quantity": 1,
                                    "attributes": { "receipt_id": "r2" } } }),
            ),
        );
        engine.group.force_query_profile("main").await.unwrap();
        let seeded = transport.request_count();

        provider.push_enumeration(Ok(vec![receipt("r1"), receipt("r2"), receipt("r3")]));
        // validation responses must keep carrying the r2 grant item, or the
        // full update would erase the redeemed-marker mid-walk
        let redeemed_marker = json!({ "grant": { "templateId": "Token.Purchase", "quantity": 1,
                                                 "attributes": { "receipt_id": "r2" } } });
        transport.push_response(200, profile_body(2, redeemed_marker.clone()));
        transport.push_response(200, profile_body(3, redeemed_marker));

        let report = engine.validate_existing_purchases().await.unwrap();
        assert_eq!(report.state, RedemptionState::Complete);
        assert!(report.result.success);
        assert_eq!(report.validated, 2);
        assert_eq!(report.skipped, 1);

        // exactly one RedeemReceipt round-trip per unredeemed receipt
        let redeem_calls: Vec<String> = transport.requests()[seeded..]
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(redeem_calls.len(), 2);
        assert!(redeem_calls.iter().all(|u| u.contains("/RedeemReceipt?")));
        let bodies: Vec<String> = transport.requests()[seeded..]
            .iter()
            .map(|r| r.body.clone().unwrap())
            .collect();
        assert!(bodies[0].contains("\"r1\""));
        assert!(bodies[1].contains("\"r3\""));
    }

    #[tokio::test]
    async fn test_enumeration_failure_still_completes() {
        let (engine, transport, provider) = engine();
        provider.push_enumeration(Err(EngineError::Transport("store unreachable".to_string())));

        let report = engine.validate_existing_purchases().await.unwrap();
        assert_eq!(report.state, RedemptionState::Complete);
        assert_eq!(
            report.walk,
            vec![
                RedemptionState::Initialized,
                RedemptionState::ReadingReceipts,
                RedemptionState::PendingValidation,
                RedemptionState::Complete,
            ]
        );
        assert!(!report.result.success);
        assert_eq!(report.validated, 0);
        assert_eq!(transport.request_count(), 0);

        // the redemption slot was released, a new pass can start
        provider.push_enumeration(Ok(vec![]));
        let report = engine.validate_existing_purchases().await.unwrap();
        assert!(report.result.success);
    }

    #[tokio::test]
    async fn test_second_redemption_refused_while_running() {
        let (engine, transport, provider) = engine();
        provider.push_enumeration(Ok(vec![receipt("r1")]));
        transport.push_delayed_response(
            200,
            profile_body(1, json!({})),
            StdDuration::from_millis(30),
        );

        let engine = Arc::new(engine);
        let running = engine.clone();
        let first = tokio::spawn(async move { running.validate_existing_purchases().await });
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        match engine.validate_existing_purchases().await {
            Err(EngineError::Disallowed(_)) => {}
            other => panic!("expected Disallowed, got {:?}", other.map(|r| r.state)),
        }
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_catalog_out_of_date_refreshes_and_retries_once() {
        let (engine, transport, _provider) = engine();
        transport.push_response(200, catalog_body(json!([currency_offer("offer-1")])));
        transport.push_response(
            409,
            json!({ "errorCode": ERR_CATALOG_OUT_OF_DATE, "errorMessage": "stale" }).to_string(),
        );
        transport.push_response(200, catalog_body(json!([currency_offer("offer-1")])));
        transport.push_response(200, profile_body(1, json!({})));

        let result = engine.purchase_offer("Featured", "offer-1", 1).await.unwrap();
        assert!(result.success);

        let urls: Vec<String> = transport.requests().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls.len(), 4);
        assert!(urls[0].contains("/catalog"));
        assert!(urls[1].contains("/PurchaseCatalogEntry?"));
        assert!(urls[2].contains("/catalog"));
        assert!(urls[3].contains("/PurchaseCatalogEntry?"));
    }

    #[tokio::test]
    async fn test_catalog_out_of_date_not_retried_twice() {
        let (engine, transport, _provider) = engine();
        let stale = json!({ "errorCode": ERR_CATALOG_OUT_OF_DATE, "errorMessage": "stale" });
        transport.push_response(200, catalog_body(json!([currency_offer("offer-1")])));
        transport.push_response(409, stale.to_string());
        transport.push_response(200, catalog_body(json!([currency_offer("offer-1")])));
        transport.push_response(409, stale.to_string());

        let result = engine.purchase_offer("Featured", "offer-1", 1).await.unwrap();
        assert!(!result.success);
        assert!(result.is_catalog_out_of_date());
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_user_cancelled_checkout_is_distinguishable() {
        let (engine, transport, provider) = engine();
        transport.push_response(
            200,
            catalog_body(json!([{
                "offerId": "rm-1",
                "offerType": "realMoney",
                "title": "Starter Pack",
                "currencyCode": "USD"
            }])),
        );
        provider.push_checkout(Err(EngineError::Backend {
            code: ERR_USER_CANCELLED.to_string(),
            message: "user closed the store sheet".to_string(),
        }));

        let err = engine.purchase_offer("Featured", "rm-1", 1).await.unwrap_err();
        assert!(err.is_user_cancelled());
        // only the catalog download hit the wire
        assert_eq!(transport.request_count(), 1);

        // the guard was released on the error path
        assert!(engine.group.try_begin_redemption());
    }

    #[tokio::test]
    async fn test_real_money_purchase_redeems_receipts() {
        let (engine, transport, provider) = engine();
        transport.push_response(
            200,
            catalog_body(json!([{
                "offerId": "rm-1",
                "offerType": "realMoney",
                "title": "Starter Pack"
            }])),
        );
        provider.push_checkout(Ok(vec![receipt("r9")]));
        transport.push_response(200, profile_body(1, json!({})));

        let result = engine.purchase_offer("Featured", "rm-1", 1).await.unwrap();
        assert!(result.success);
        let urls: Vec<String> = transport.requests().iter().map(|r| r.url.clone()).collect();
        assert!(urls[1].contains("/RedeemReceipt?"));
    }

    #[tokio::test]
    async fn test_checkout_flow_goes_straight_to_validation() {
        let (engine, transport, provider) = engine();
        transport.push_response(
            200,
            catalog_body(json!([{
                "offerId": "rm-1",
                "offerType": "realMoney",
                "title": "Starter Pack"
            }])),
        );
        provider.push_checkout(Ok(vec![receipt("r9")]));
        transport.push_response(200, profile_body(1, json!({})));

        assert!(engine.catalog.ensure_fresh().await.success);
        let snapshot = engine.catalog.current().unwrap();
        let offer = find_offer(&snapshot, "Featured", "rm-1").unwrap().clone();

        // receipts come out of checkout already in hand, so the machine
        // never passes through ReadingReceipts
        let report = engine.purchase_with_provider(&offer, 1).await.unwrap();
        assert!(report.result.success);
        assert_eq!(
            report.walk,
            vec![
                RedemptionState::Initialized,
                RedemptionState::PendingValidation,
                RedemptionState::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_offer_is_disallowed() {
        let (engine, transport, _provider) = engine();
        transport.push_response(200, catalog_body(json!([])));
        match engine.purchase_offer("Featured", "ghost", 1).await {
            Err(EngineError::Disallowed(_)) => {}
            other => panic!("expected Disallowed, got {:?}", other),
        }
    }
}
