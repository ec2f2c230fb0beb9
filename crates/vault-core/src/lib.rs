//! ============================================================================
//! VAULT-CORE: Profile Sync & Commerce Engine
//! ============================================================================
//! Client-side engine for server-authoritative player profiles:
//! - revision-based reconciliation of profile snapshots and deltas
//! - per-account serialized request queue with deferred generators
//! - receipt redemption state machine over a payment provider
//! - conditionally-cached catalog with calendar-aligned refresh windows
//! ============================================================================

pub mod catalog;
pub mod error;
pub mod group;
pub mod instance;
pub mod item;
pub mod profile;
pub mod protocol;
pub mod purchase;
pub mod time_interval;
pub mod transport;

// Re-export main types for convenience
pub use catalog::{CatalogService, OfferFilterContext, OfferView};
pub use error::{EngineError, QueryResult};
pub use group::{GroupConfig, ProfileCommand, ProfileGroup, RequestSink, UrlContext};
pub use instance::{InstanceRegistry, ItemInstance};
pub use item::{Item, ItemStore};
pub use profile::{Profile, ReconcileOutcome};
pub use protocol::{CatalogDownload, CatalogOffer, ProfileResponse, Receipt};
pub use purchase::{CommerceEngine, PaymentProvider, RedemptionReport, RedemptionState};
pub use transport::{HttpTransport, Transport, WireRequest, WireResponse};
