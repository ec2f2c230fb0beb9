//! ============================================================================
//! Profile - Revision Reconciliation
//! ============================================================================
//! A locally-cached mirror of one server-authoritative profile: an item
//! store, a stat map and a monotonically increasing revision number.
//! Server payloads are applied here, either as a full snapshot or as delta
//! commands on top of a known base revision; a missed step marks the profile
//! desynced (revision -1) and schedules a forced full re-query.
//!
//! Recovery policy (deliberate): a malformed delta command is logged and the
//! revision bump is still applied. The cache then knows it is behind and
//! self-heals on the next forced re-query, instead of wedging permanently.
//! The window of incorrect local state between the bad delta and the
//! re-query completing is accepted.
//! ============================================================================

use crate::error::QueryResult;
use crate::instance::{InstanceRegistry, ItemInstance};
use crate::item::{Item, ItemStore};
use crate::protocol::{
    AddItemRequest, ChangeAttributesRequest, ChangeQuantityRequest, ChangeStatRequest,
    FullProfile, Notification, ProfileChange, ProfileChangeRequest, ProfileResponse,
    RemoveItemRequest,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Revision value meaning "never successfully fetched".
pub const REVISION_UNSYNCED: i64 = -1;

/// At most one in-flight plus one queued forced query per profile.
const MAX_PENDING_QUERIES: u8 = 2;

type StatsListener = Arc<dyn Fn(i64) + Send + Sync>;
type ItemsListener = Arc<dyn Fn(&HashSet<String>, i64) + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// What a server payload did to the profile, plus the observer callbacks it
/// armed. Callbacks are not run while the profile is borrowed: the caller
/// dispatches them once no engine lock is held, so an observer may freely
/// call back into the owning group.
#[must_use]
pub struct ReconcileOutcome {
    /// The payload left the profile desynced; a forced full re-query
    /// should be scheduled.
    pub requery_needed: bool,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl ReconcileOutcome {
    fn new() -> Self {
        Self {
            requery_needed: false,
            callbacks: Vec::new(),
        }
    }

    pub fn has_callbacks(&self) -> bool {
        !self.callbacks.is_empty()
    }

    /// Invoke the armed stats/items listeners and notification handlers,
    /// in registration order. Must be called with no engine lock held.
    pub fn dispatch(self) {
        for callback in self.callbacks {
            callback();
        }
    }
}

pub struct Profile {
    profile_id: String,
    debug_name: String,
    revision: i64,
    stats: serde_json::Map<String, Value>,
    items: ItemStore,
    instances: HashMap<String, Box<dyn ItemInstance>>,
    registry: Arc<InstanceRegistry>,
    create_instances: bool,
    pending_query_count: u8,
    pending_query_waiters: Vec<oneshot::Sender<QueryResult>>,
    stats_listeners: Vec<StatsListener>,
    items_listeners: Vec<ItemsListener>,
    notification_handler: Option<NotificationHandler>,
}

impl Profile {
    pub fn new(
        profile_id: impl Into<String>,
        account_label: &str,
        registry: Arc<InstanceRegistry>,
    ) -> Self {
        let profile_id = profile_id.into();
        let debug_name = format!("account={} profile={}", account_label, profile_id);
        Self {
            profile_id,
            debug_name,
            revision: REVISION_UNSYNCED,
            stats: serde_json::Map::new(),
            items: ItemStore::new(),
            instances: HashMap::new(),
            registry,
            create_instances: true,
            pending_query_count: 0,
            pending_query_waiters: Vec::new(),
            stats_listeners: Vec::new(),
            items_listeners: Vec::new(),
            notification_handler: None,
        }
    }

    /// Restore the never-fetched state (explicit account reset).
    pub fn reset(&mut self) {
        self.revision = REVISION_UNSYNCED;
        self.pending_query_count = 0;
        self.pending_query_waiters.clear();
        for (_, instance) in self.instances.iter_mut() {
            instance.process_destroy();
        }
        self.instances.clear();
        self.items.clear();
        self.stats.clear();
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn is_synced(&self) -> bool {
        self.revision >= 0
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn stats(&self) -> &serde_json::Map<String, Value> {
        &self.stats
    }

    pub fn stat(&self, name: &str) -> Option<&Value> {
        self.stats.get(name)
    }

    pub fn on_stats_updated<F>(&mut self, listener: F)
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.stats_listeners.push(Arc::new(listener));
    }

    pub fn on_items_updated<F>(&mut self, listener: F)
    where
        F: Fn(&HashSet<String>, i64) + Send + Sync + 'static,
    {
        self.items_listeners.push(Arc::new(listener));
    }

    pub fn set_notification_handler<F>(&mut self, handler: F)
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.notification_handler = Some(Arc::new(handler));
    }

    /// Globally enable/disable game-side item instances. Disabling destroys
    /// all existing instances; re-enabling recreates them from item state.
    pub fn set_create_instances(&mut self, create: bool) {
        if self.create_instances == create {
            return;
        }
        self.create_instances = create;
        if create {
            let ids: Vec<String> = self.items.ids().cloned().collect();
            for id in ids {
                self.spawn_instance(&id);
            }
        } else {
            for (_, instance) in self.instances.iter_mut() {
                instance.process_destroy();
            }
            self.instances.clear();
        }
    }

    /// True when the backend ledger already granted this receipt: redeemed
    /// receipts surface as items carrying a matching `receipt_id` attribute.
    pub fn has_redeemed_receipt(&self, receipt_id: &str) -> bool {
        self.items
            .iter()
            .any(|item| item.attribute_as_str("receipt_id", "") == receipt_id)
    }

    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} stats:", self.debug_name);
        for (name, value) in &self.stats {
            let _ = writeln!(out, "  {} = {}", name, value);
        }
        let _ = writeln!(out, "{} inventory:", self.debug_name);
        for item in self.items.iter() {
            let _ = writeln!(
                out,
                "  {} x {} [{}]",
                item.quantity, item.template_id, item.instance_id
            );
        }
        out
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Apply a server profile payload. The returned outcome says whether the
    /// payload left the profile desynced (forced full re-query needed) and
    /// carries the observer callbacks the payload armed; the caller dispatches
    /// those after releasing whatever lock guards this profile.
    ///
    /// Notifications are processed regardless of revision movement; the one
    /// flagged primary is stored on `result` for the original caller, all
    /// others go to the registered notification handler.
    pub fn apply_server_payload(
        &mut self,
        response: &ProfileResponse,
        result: &mut QueryResult,
    ) -> ReconcileOutcome {
        let old_revision = self.revision;
        let new_revision = response.profile_revision;
        let mut outcome = ReconcileOutcome::new();

        if old_revision != new_revision {
            let base_revision = match response.profile_changes_base_revision {
                Some(base) if base >= 0 => base,
                _ => {
                    // older backends omit the base; assume the immediately
                    // preceding revision (can cause unnecessary re-queries)
                    warn!(
                        "{}: missing profileChangesBaseRevision, assuming base {}",
                        self.debug_name,
                        new_revision - 1
                    );
                    new_revision - 1
                }
            };

            let mut stats_updated = false;
            let mut item_types_updated: HashSet<String> = HashSet::new();

            if !response.profile_changes.is_empty() {
                let full_entry = response.profile_changes.iter().find(|change| {
                    change.get("changeType").and_then(Value::as_str) == Some("fullProfileUpdate")
                });

                if let Some(raw) = full_entry {
                    let profile_value = raw.get("profile").cloned().unwrap_or(Value::Null);
                    match serde_json::from_value::<FullProfile>(profile_value) {
                        Ok(full) => {
                            self.apply_full_update(
                                &full,
                                &mut stats_updated,
                                &mut item_types_updated,
                                new_revision,
                                old_revision,
                            );
                            self.revision = new_revision;
                        }
                        Err(e) => {
                            // stale-but-consistent beats corrupted: leave
                            // items, stats and revision untouched
                            error!(
                                "{}: full profile update to revision {} did not parse: {}",
                                self.debug_name, new_revision, e
                            );
                        }
                    }
                } else {
                    if old_revision < 0 {
                        error!(
                            "{}: received profile deltas while in indeterminate state (rev={})",
                            self.debug_name, old_revision
                        );
                        self.revision = REVISION_UNSYNCED;
                        outcome.requery_needed = true;
                    } else if old_revision != base_revision {
                        error!(
                            "{}: received deltas based on revision {} but local cache is at {}",
                            self.debug_name, base_revision, old_revision
                        );
                        self.revision = REVISION_UNSYNCED;
                        outcome.requery_needed = true;
                    } else {
                        debug!(
                            "{}: delta profile update (revision {} -> {})",
                            self.debug_name, old_revision, new_revision
                        );
                        for change_value in &response.profile_changes {
                            match serde_json::from_value::<ProfileChange>(change_value.clone()) {
                                Ok(change) => {
                                    if !self.apply_delta(
                                        &change,
                                        &mut stats_updated,
                                        &mut item_types_updated,
                                        new_revision,
                                    ) {
                                        error!(
                                            "{}: unable to apply profile delta {} -> {}",
                                            self.debug_name, base_revision, new_revision
                                        );
                                    }
                                }
                                Err(e) => {
                                    error!(
                                        "{}: unparseable profile delta entry: {}",
                                        self.debug_name, e
                                    );
                                }
                            }
                        }
                        // the bump is applied even when a delta failed: the
                        // next forced re-query repairs whatever was missed
                        self.revision = new_revision;
                    }
                }
            }

            if stats_updated {
                for listener in &self.stats_listeners {
                    let listener = Arc::clone(listener);
                    outcome
                        .callbacks
                        .push(Box::new(move || listener(new_revision)));
                }
            }
            if !item_types_updated.is_empty() {
                let item_types = Arc::new(item_types_updated);
                for listener in &self.items_listeners {
                    let listener = Arc::clone(listener);
                    let item_types = Arc::clone(&item_types);
                    outcome
                        .callbacks
                        .push(Box::new(move || listener(&item_types, new_revision)));
                }
            }
        }

        for notification in &response.notifications {
            if notification.primary {
                if let Some(existing) = &result.primary_notification {
                    error!(
                        "{}: stomping primary notification {} with {} (expected one per response)",
                        self.debug_name, existing.type_str, notification.type_str
                    );
                }
                result.primary_notification = Some(notification.clone());
            } else if let Some(handler) = &self.notification_handler {
                let handler = Arc::clone(handler);
                let notification = notification.clone();
                outcome
                    .callbacks
                    .push(Box::new(move || handler(notification)));
            } else {
                debug!(
                    "{}: dropping notification {} (no handler registered)",
                    self.debug_name, notification.type_str
                );
            }
        }

        outcome
    }

    fn apply_full_update(
        &mut self,
        full: &FullProfile,
        stats_updated: &mut bool,
        item_types_updated: &mut HashSet<String>,
        new_revision: i64,
        old_revision: i64,
    ) {
        info!(
            "{}: full profile update (rev={}, version={})",
            self.debug_name,
            new_revision,
            full.version.as_deref().unwrap_or("unknown")
        );

        if full.stats.attributes != self.stats {
            *stats_updated = true;
            self.stats = full.stats.attributes.clone();
        }

        let mut untouched: HashSet<String> = self.items.ids().cloned().collect();

        for (instance_id, definition) in &full.items {
            if untouched.remove(instance_id) {
                self.reconcile_existing_item(
                    instance_id,
                    definition,
                    item_types_updated,
                    new_revision,
                );
            } else {
                match Item::from_json(instance_id, definition, new_revision) {
                    Some(item) => {
                        if old_revision >= 0 {
                            info!(
                                "{} gained {} x {}",
                                self.debug_name, item.quantity, item.template_id
                            );
                        }
                        item_types_updated.insert(item.item_type.clone());
                        self.items.insert(item);
                        self.spawn_instance(instance_id);
                    }
                    None => {
                        error!(
                            "{}: unable to add item [{}], definition did not parse",
                            self.debug_name, instance_id
                        );
                    }
                }
            }
        }

        // anything the payload no longer mentions is gone
        for instance_id in untouched {
            if let Some(removed) = self.items.remove(&instance_id) {
                info!(
                    "{} lost {} x {}",
                    self.debug_name, removed.quantity, removed.template_id
                );
                item_types_updated.insert(removed.item_type);
            }
            self.destroy_instance(&instance_id);
        }
    }

    fn reconcile_existing_item(
        &mut self,
        instance_id: &str,
        definition: &Value,
        item_types_updated: &mut HashSet<String>,
        new_revision: i64,
    ) {
        let (current_template, current_type, current_quantity) = match self.items.get(instance_id)
        {
            Some(item) => (
                item.template_id.clone(),
                item.item_type.clone(),
                item.quantity,
            ),
            None => return,
        };

        let new_template = definition
            .get("templateId")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if new_template != current_template {
            // template changed under the same instance id: recreate (rare)
            item_types_updated.insert(current_type);
            match Item::from_json(instance_id, definition, new_revision) {
                Some(item) => {
                    warn!(
                        "{} recreated {} x {} (template change from {})",
                        self.debug_name, item.quantity, item.template_id, current_template
                    );
                    item_types_updated.insert(item.item_type.clone());
                    self.destroy_instance(instance_id);
                    self.items.insert(item);
                    self.spawn_instance(instance_id);
                }
                None => {
                    error!(
                        "{}: {} changed template but did not parse, removing item {}",
                        self.debug_name, current_template, instance_id
                    );
                    self.items.remove(instance_id);
                    self.destroy_instance(instance_id);
                }
            }
            return;
        }

        let new_attributes = definition
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let attributes_changed = match self.items.get(instance_id) {
            Some(item) => item.attributes != new_attributes,
            None => false,
        };
        if attributes_changed {
            info!(
                "{}: {} attributes were updated",
                self.debug_name, current_template
            );
            if let Some(item) = self.items.get_mut(instance_id) {
                item.attributes = new_attributes;
                item.last_update_revision = new_revision;
            }
            item_types_updated.insert(current_type.clone());
            self.repopulate_instance(instance_id);
        }

        let new_quantity = definition
            .get("quantity")
            .and_then(Value::as_i64)
            .unwrap_or(current_quantity as i64) as i32;
        if new_quantity != current_quantity {
            if new_quantity >= current_quantity {
                info!(
                    "{} gained {} x {}",
                    self.debug_name,
                    new_quantity - current_quantity,
                    current_template
                );
            } else {
                info!(
                    "{} lost {} x {}",
                    self.debug_name,
                    current_quantity - new_quantity,
                    current_template
                );
            }
            if let Some(item) = self.items.get_mut(instance_id) {
                item.quantity = new_quantity;
                item.last_update_revision = new_revision;
            }
            item_types_updated.insert(current_type);
            if let Some(instance) = self.instances.get_mut(instance_id) {
                instance.update_quantity(new_quantity);
            }
        }
    }

    fn apply_delta(
        &mut self,
        change: &ProfileChange,
        stats_updated: &mut bool,
        item_types_updated: &mut HashSet<String>,
        new_revision: i64,
    ) -> bool {
        match change {
            ProfileChange::FullProfileUpdate { .. } => {
                // handled up front; reaching here means it failed to apply
                false
            }
            ProfileChange::ItemAdded { item_id, item } => {
                match Item::from_json(item_id, item, new_revision) {
                    Some(parsed) => {
                        if self.items.get(item_id).is_some() {
                            info!(
                                "{} replaced {} x {} [{}]",
                                self.debug_name, parsed.quantity, parsed.template_id, item_id
                            );
                            self.destroy_instance(item_id);
                        } else {
                            info!(
                                "{} gained {} x {} [{}]",
                                self.debug_name, parsed.quantity, parsed.template_id, item_id
                            );
                        }
                        item_types_updated.insert(parsed.item_type.clone());
                        self.items.insert(parsed);
                        self.spawn_instance(item_id);
                        true
                    }
                    None => {
                        error!(
                            "{}: itemAdded [{}] did not parse correctly",
                            self.debug_name, item_id
                        );
                        false
                    }
                }
            }
            ProfileChange::ItemRemoved { item_id } => match self.items.remove(item_id) {
                Some(removed) => {
                    info!(
                        "{} lost {} x {}",
                        self.debug_name, removed.quantity, removed.template_id
                    );
                    item_types_updated.insert(removed.item_type);
                    self.destroy_instance(item_id);
                    true
                }
                None => {
                    error!(
                        "{}: unable to remove item {}, not in local cache",
                        self.debug_name, item_id
                    );
                    false
                }
            },
            ProfileChange::ItemAttrChanged {
                item_id,
                attribute_name,
                attribute_value,
            } => {
                let (template_id, item_type) = match self.items.get_mut(item_id) {
                    Some(item) => {
                        item.last_update_revision = new_revision;
                        if attribute_value.is_null() {
                            item.attributes.remove(attribute_name);
                            debug!(
                                "{}: {} attribute {} was removed",
                                self.debug_name, item.template_id, attribute_name
                            );
                        } else {
                            item.attributes
                                .insert(attribute_name.clone(), attribute_value.clone());
                            debug!(
                                "{}: {} attribute {} changed",
                                self.debug_name, item.template_id, attribute_name
                            );
                        }
                        (item.template_id.clone(), item.item_type.clone())
                    }
                    None => {
                        error!(
                            "{}: unable to change attribute on item {}, not in local cache",
                            self.debug_name, item_id
                        );
                        return false;
                    }
                };
                item_types_updated.insert(item_type);

                let attr_value = if attribute_value.is_null() {
                    None
                } else {
                    Some(attribute_value)
                };
                let needs_repopulate = match self.instances.get_mut(item_id) {
                    Some(instance) => !instance.process_attribute_change(
                        attribute_name,
                        attr_value,
                        new_revision,
                    ),
                    None => false,
                };
                if needs_repopulate && !self.repopulate_instance(item_id) {
                    error!(
                        "{}: failed to repopulate instance for {} ({})",
                        self.debug_name, item_id, template_id
                    );
                    return false;
                }
                true
            }
            ProfileChange::ItemQuantityChanged { item_id, quantity } => {
                match self.items.get_mut(item_id) {
                    Some(item) => {
                        if *quantity >= item.quantity {
                            debug!(
                                "{} gained {} x {}",
                                self.debug_name,
                                quantity - item.quantity,
                                item.template_id
                            );
                        } else {
                            debug!(
                                "{} lost {} x {}",
                                self.debug_name,
                                item.quantity - quantity,
                                item.template_id
                            );
                        }
                        item.quantity = *quantity;
                        item.last_update_revision = new_revision;
                        let item_type = item.item_type.clone();
                        item_types_updated.insert(item_type);
                        if let Some(instance) = self.instances.get_mut(item_id) {
                            instance.update_quantity(*quantity);
                        }
                        true
                    }
                    None => {
                        error!(
                            "{}: unable to adjust quantity on item {}, not in local cache",
                            self.debug_name, item_id
                        );
                        false
                    }
                }
            }
            ProfileChange::StatModified { name, value } => {
                *stats_updated = true;
                if value.is_null() {
                    warn!(
                        "{}: unable to process statModified for {}",
                        self.debug_name, name
                    );
                    false
                } else {
                    self.stats.insert(name.clone(), value.clone());
                    true
                }
            }
        }
    }

    // ========================================================================
    // Instance lifecycle
    // ========================================================================

    fn spawn_instance(&mut self, instance_id: &str) {
        if !self.create_instances {
            return;
        }
        let Some(item) = self.items.get(instance_id) else {
            return;
        };
        let Some(mut instance) = self.registry.create_for(item) else {
            return;
        };
        if instance.populate(item) {
            self.instances.insert(instance_id.to_string(), instance);
        } else {
            error!(
                "{}: failed to populate instance for {} ({})",
                self.debug_name, instance_id, item.template_id
            );
        }
    }

    /// Re-run populate against current item state; a refusal drops the
    /// instance. Returns false only on populate failure.
    fn repopulate_instance(&mut self, instance_id: &str) -> bool {
        let Some(item) = self.items.get(instance_id) else {
            return true;
        };
        if let Some(instance) = self.instances.get_mut(instance_id) {
            if !instance.populate(item) {
                self.instances.remove(instance_id);
                return false;
            }
        }
        true
    }

    fn destroy_instance(&mut self, instance_id: &str) {
        if let Some(mut instance) = self.instances.remove(instance_id) {
            instance.process_destroy();
        }
    }

    // ========================================================================
    // Outgoing change-sets
    // ========================================================================

    /// Diff locally desired state against the cached server state into a
    /// structured change request. `desired` carries new snapshots of items
    /// the caller manages (added or modified); `removed` lists instance ids
    /// to delete. Stats are included only when they differ from the cache.
    pub fn build_change_request(
        &self,
        desired: &[Item],
        removed: &[String],
        changed_stats: &serde_json::Map<String, Value>,
    ) -> ProfileChangeRequest {
        let mut changes = ProfileChangeRequest {
            // a never-synced profile is created server-side at revision 1
            base_profile_revision: if self.revision < 0 { 1 } else { self.revision },
            ..Default::default()
        };

        for new_item in desired {
            diff_item(self.items.get(&new_item.instance_id), Some(new_item), &mut changes);
        }
        for instance_id in removed {
            diff_item(self.items.get(instance_id), None, &mut changes);
        }

        for (name, new_value) in changed_stats {
            let differs = match self.stats.get(name) {
                Some(old_value) => old_value != new_value,
                None => true,
            };
            if differs {
                changes.change_stat_requests.push(ChangeStatRequest {
                    stat_name: name.clone(),
                    stat_value: new_value.clone(),
                });
            }
        }

        changes
    }
}

/// Diff one item snapshot pair into add/remove/quantity/attribute entries.
/// Removed attributes are sent as explicit nulls so the backend clears them.
fn diff_item(old: Option<&Item>, new: Option<&Item>, changes: &mut ProfileChangeRequest) -> bool {
    match (old, new) {
        (None, None) => false,
        (None, Some(new_item)) => {
            changes.add_requests.push(AddItemRequest {
                item_id: new_item.instance_id.clone(),
                template_id: new_item.template_id.clone(),
                quantity: new_item.quantity,
                attributes: new_item.attributes.clone(),
            });
            true
        }
        (Some(old_item), None) => {
            changes.remove_requests.push(RemoveItemRequest {
                item_id: old_item.instance_id.clone(),
            });
            true
        }
        (Some(old_item), Some(new_item)) => {
            if old_item.instance_id != new_item.instance_id {
                error!("diff_item called with mismatched instance ids");
                return false;
            }
            let mut changed = false;

            if old_item.quantity != new_item.quantity {
                changes.change_quantity_requests.push(ChangeQuantityRequest {
                    item_id: new_item.instance_id.clone(),
                    delta_quantity: new_item.quantity - old_item.quantity,
                });
                changed = true;
            }

            let mut attribute_changes = serde_json::Map::new();
            for (key, new_value) in &new_item.attributes {
                match old_item.attributes.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    _ => {
                        attribute_changes.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old_item.attributes.keys() {
                if !new_item.attributes.contains_key(key) {
                    attribute_changes.insert(key.clone(), Value::Null);
                }
            }
            if !attribute_changes.is_empty() {
                changes
                    .change_attributes_requests
                    .push(ChangeAttributesRequest {
                        item_id: new_item.instance_id.clone(),
                        attributes: attribute_changes,
                    });
                changed = true;
            }

            changed
        }
    }
}

// ============================================================================
// Forced query accounting (driven by the profile group's dispatcher)
// ============================================================================

impl Profile {
    /// Admit a forced query if fewer than the in-flight + queued budget are
    /// outstanding. Callers denied admission coalesce onto the pending one.
    pub(crate) fn try_begin_force_query(&mut self) -> bool {
        if self.pending_query_count < MAX_PENDING_QUERIES {
            self.pending_query_count += 1;
            true
        } else {
            info!(
                "{}: overlapping profile query coalesced onto the pending one",
                self.debug_name
            );
            false
        }
    }

    pub(crate) fn push_force_query_waiter(&mut self, waiter: oneshot::Sender<QueryResult>) {
        self.pending_query_waiters.push(waiter);
    }

    /// Bookkeeping when a forced query completes; returns the coalesced
    /// waiters so the dispatcher can resolve them with the shared result.
    /// A still-unsynced profile decrements its revision so every failed
    /// attempt still reads as "state changed" to revision watchers.
    pub(crate) fn finish_force_query(&mut self) -> Vec<oneshot::Sender<QueryResult>> {
        if self.revision < 0 {
            self.revision -= 1;
        }
        debug_assert!(self.pending_query_count > 0);
        self.pending_query_count = self.pending_query_count.saturating_sub(1);
        std::mem::take(&mut self.pending_query_waiters)
    }

    #[cfg(test)]
    pub(crate) fn pending_query_count(&self) -> u8 {
        self.pending_query_count
    }
}
