//! ============================================================================
//! Wire Protocol Types - Backend JSON Payloads
//! ============================================================================
//! Serde mappings for everything that crosses the backend boundary:
//! - Profile responses (revision header, change list, notifications)
//! - Outgoing profile change requests (add/remove/quantity/attributes/stats)
//! - Catalog downloads (storefronts, offers, pricing, requirements)
//! - Payment receipts
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level profile response envelope.
///
/// `profile_changes` is kept as raw JSON values: a single malformed change
/// entry must never abort parsing of the whole batch, so each entry is
/// decoded individually during reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(default)]
    pub profile_id: Option<String>,
    pub profile_revision: i64,
    #[serde(default)]
    pub profile_changes_base_revision: Option<i64>,
    #[serde(default)]
    pub profile_changes: Vec<Value>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    /// Auxiliary profiles updated in the same response.
    #[serde(default)]
    pub multi_update: Vec<Value>,
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
}

/// A single entry of `profileChanges[]`, tagged by `changeType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "changeType", rename_all = "camelCase")]
pub enum ProfileChange {
    #[serde(rename_all = "camelCase")]
    FullProfileUpdate { profile: Value },
    #[serde(rename_all = "camelCase")]
    ItemAdded { item_id: String, item: Value },
    #[serde(rename_all = "camelCase")]
    ItemRemoved { item_id: String },
    #[serde(rename_all = "camelCase")]
    ItemAttrChanged {
        item_id: String,
        attribute_name: String,
        #[serde(default)]
        attribute_value: Value,
    },
    #[serde(rename_all = "camelCase")]
    ItemQuantityChanged { item_id: String, quantity: i32 },
    #[serde(rename_all = "camelCase")]
    StatModified {
        name: String,
        #[serde(default)]
        value: Value,
    },
}

/// Body of a `fullProfileUpdate` change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullProfile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub wipe_number: Option<i32>,
    pub stats: StatsContainer,
    pub items: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsContainer {
    pub attributes: serde_json::Map<String, Value>,
}

/// Out-of-band notification carried on a profile response.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub type_str: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub payload: Option<Value>,
}

// ============================================================================
// Outgoing change request
// ============================================================================

/// Structured change-set sent to the backend, grouped by operation and
/// stamped with the revision the changes were computed against.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChangeRequest {
    pub base_profile_revision: i64,
    #[serde(rename = "addItem", skip_serializing_if = "Vec::is_empty")]
    pub add_requests: Vec<AddItemRequest>,
    #[serde(rename = "removeItem", skip_serializing_if = "Vec::is_empty")]
    pub remove_requests: Vec<RemoveItemRequest>,
    #[serde(rename = "changeQuantity", skip_serializing_if = "Vec::is_empty")]
    pub change_quantity_requests: Vec<ChangeQuantityRequest>,
    #[serde(rename = "changeAttributes", skip_serializing_if = "Vec::is_empty")]
    pub change_attributes_requests: Vec<ChangeAttributesRequest>,
    #[serde(rename = "changeStat", skip_serializing_if = "Vec::is_empty")]
    pub change_stat_requests: Vec<ChangeStatRequest>,
}

impl ProfileChangeRequest {
    pub fn is_empty(&self) -> bool {
        self.add_requests.is_empty()
            && self.remove_requests.is_empty()
            && self.change_quantity_requests.is_empty()
            && self.change_attributes_requests.is_empty()
            && self.change_stat_requests.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub item_id: String,
    pub template_id: String,
    pub quantity: i32,
    pub attributes: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveItemRequest {
    pub item_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeQuantityRequest {
    pub item_id: String,
    pub delta_quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAttributesRequest {
    pub item_id: String,
    /// Removed attributes are sent as explicit nulls.
    pub attributes: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatRequest {
    pub stat_name: String,
    pub stat_value: Value,
}

// ============================================================================
// Catalog payload
// ============================================================================

fn default_refresh_interval_hrs() -> f64 {
    1.0
}

fn default_daily_limit() -> i32 {
    -1
}

/// A full catalog download. Published as an immutable `Arc` snapshot; a
/// refresh replaces the pointer rather than mutating in place, so offer
/// views holding the previous snapshot stay valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDownload {
    #[serde(default = "default_refresh_interval_hrs")]
    pub refresh_interval_hrs: f64,
    #[serde(default)]
    pub service_pricing: Vec<ServicePrice>,
    #[serde(default)]
    pub storefronts: Vec<Storefront>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrice {
    pub service_name: String,
    #[serde(default)]
    pub currency_code: String,
    #[serde(default)]
    pub price: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storefront {
    pub name: String,
    #[serde(default)]
    pub catalog_entries: Vec<CatalogOffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OfferType {
    RealMoney,
    InGameCurrency,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogOffer {
    pub offer_id: String,
    pub offer_type: OfferType,
    #[serde(default)]
    pub title: String,
    /// ISO currency code for real-money offers (e.g. "USD").
    #[serde(default)]
    pub currency_code: Option<String>,
    /// Country whitelist for real-money offers; empty means all countries.
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub prices: Vec<OfferPrice>,
    /// Platform store identifiers, indexed by app-store.
    #[serde(default)]
    pub app_store_ids: Vec<String>,
    /// Purchases allowed per calendar day; -1 means unlimited.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i32,
    #[serde(default)]
    pub single_purchase_only: bool,
    #[serde(default)]
    pub requirements: Vec<OfferRequirement>,
    /// Offers sharing a non-empty group compete: only the highest
    /// `catalog_group_priority` member is shown.
    #[serde(default)]
    pub catalog_group: String,
    #[serde(default)]
    pub catalog_group_priority: i32,
    #[serde(default)]
    pub sort_priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPrice {
    pub currency_type: String,
    #[serde(default)]
    pub currency_sub_type: String,
    #[serde(default)]
    pub regular_price: i64,
    #[serde(default)]
    pub final_price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequirementType {
    RequireItemOwnership,
    DenyOnItemOwnership,
    RequireFulfillment,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequirement {
    pub requirement_type: RequirementType,
    pub required_id: String,
    #[serde(default)]
    pub minimum_quantity: i32,
}

// ============================================================================
// Payment receipts
// ============================================================================

/// Proof of a completed payment-provider purchase, pending backend
/// validation. The validation blob is opaque to this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub app_store_id: String,
    pub receipt_id: String,
    pub validation_blob: String,
}
