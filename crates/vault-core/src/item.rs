//! ============================================================================
//! Items & Item Store
//! ============================================================================
//! In-memory, indexed inventory for one profile. The secondary by-type index
//! is maintained incrementally on every add/remove, never rebuilt wholesale.
//! ============================================================================

use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One inventory entry, owned exclusively by a profile's item store.
///
/// Attributes are JSON values with value semantics: cloning an item gives an
/// independent snapshot, which the change-set builder relies on when diffing
/// old against new state.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub instance_id: String,
    pub template_id: String,
    /// Prefix of `template_id` before the first '.', or the whole id.
    pub item_type: String,
    pub quantity: i32,
    pub attributes: serde_json::Map<String, Value>,
    pub last_update_revision: i64,
}

impl Item {
    pub fn new(
        instance_id: impl Into<String>,
        template_id: impl Into<String>,
        quantity: i32,
        revision: i64,
    ) -> Self {
        let template_id = template_id.into();
        let item_type = derive_item_type(&template_id);
        Self {
            instance_id: instance_id.into(),
            template_id,
            item_type,
            quantity,
            attributes: serde_json::Map::new(),
            last_update_revision: revision,
        }
    }

    /// New locally-created item with a generated instance id, for change
    /// requests that add items the server has not seen yet.
    pub fn create(template_id: impl Into<String>, quantity: i32) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            template_id,
            quantity,
            0,
        )
    }

    /// Parse an item from its backend JSON definition
    /// (`{templateId, quantity, attributes}`). Returns None when the
    /// definition is missing its template id.
    pub fn from_json(instance_id: &str, definition: &Value, revision: i64) -> Option<Self> {
        let template_id = definition.get("templateId")?.as_str()?.to_string();
        let quantity = definition
            .get("quantity")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        let attributes = definition
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let item_type = derive_item_type(&template_id);
        Some(Self {
            instance_id: instance_id.to_string(),
            template_id,
            item_type,
            quantity,
            attributes,
            last_update_revision: revision,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "templateId": self.template_id,
            "quantity": self.quantity,
            "attributes": Value::Object(self.attributes.clone()),
        })
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attribute_as_number(&self, key: &str, default: f64) -> f64 {
        self.attribute(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn attribute_as_i32(&self, key: &str, default: i32) -> i32 {
        self.attribute(key)
            .and_then(Value::as_i64)
            .map(|n| n as i32)
            .unwrap_or(default)
    }

    pub fn attribute_as_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.attribute(key).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn attribute_as_bool(&self, key: &str, default: bool) -> bool {
        self.attribute(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

/// Item type is the template id's prefix before the first dot.
pub fn derive_item_type(template_id: &str) -> String {
    match template_id.split_once('.') {
        Some((prefix, _)) => prefix.to_string(),
        None => template_id.to_string(),
    }
}

/// Indexed item collection. Invariant: every instance id in the by-type
/// index exists in the primary map and vice versa.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: HashMap<String, Item>,
    by_type: HashMap<String, HashSet<String>>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance_id: &str) -> Option<&Item> {
        self.items.get(instance_id)
    }

    pub fn get_mut(&mut self, instance_id: &str) -> Option<&mut Item> {
        self.items.get_mut(instance_id)
    }

    pub fn insert(&mut self, item: Item) {
        // an insert that replaces an item may change its type bucket
        if let Some(previous) = self.items.get(&item.instance_id) {
            if previous.item_type != item.item_type {
                self.unindex(&previous.item_type.clone(), &item.instance_id);
            }
        }
        self.by_type
            .entry(item.item_type.clone())
            .or_default()
            .insert(item.instance_id.clone());
        self.items.insert(item.instance_id.clone(), item);
    }

    pub fn remove(&mut self, instance_id: &str) -> Option<Item> {
        let item = self.items.remove(instance_id)?;
        self.unindex(&item.item_type, instance_id);
        Some(item)
    }

    fn unindex(&mut self, item_type: &str, instance_id: &str) {
        if let Some(set) = self.by_type.get_mut(item_type) {
            set.remove(instance_id);
            if set.is_empty() {
                self.by_type.remove(item_type);
            }
        }
    }

    pub fn ids_by_type(&self, item_type: &str) -> Option<&HashSet<String>> {
        self.by_type.get(item_type)
    }

    pub fn items_by_type<'a>(&'a self, item_type: &str) -> Vec<&'a Item> {
        match self.by_type.get(item_type) {
            Some(ids) => ids.iter().filter_map(|id| self.items.get(id)).collect(),
            None => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.by_type.clear();
    }

    /// Total quantity across all items sharing a template.
    pub fn count_by_template(&self, template_id: &str) -> i32 {
        self.items
            .values()
            .filter(|i| i.template_id == template_id)
            .map(|i| i.quantity)
            .sum()
    }

    pub fn find_by_template(&self, template_id: &str) -> Option<&Item> {
        self.items.values().find(|i| i.template_id == template_id)
    }

    #[cfg(test)]
    pub(crate) fn index_is_consistent(&self) -> bool {
        let indexed: usize = self.by_type.values().map(|s| s.len()).sum();
        if indexed != self.items.len() {
            return false;
        }
        self.by_type.iter().all(|(ty, ids)| {
            ids.iter()
                .all(|id| self.items.get(id).map(|i| i.item_type == *ty).unwrap_or(false))
        })
    }
}
