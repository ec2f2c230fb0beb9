//! ============================================================================
//! Item Instances - Game-Side Item Behaviors
//! ============================================================================
//! An item may be backed by a game-specific instance object that mirrors the
//! server-authoritative item data. Instances are created through an explicit,
//! test-injectable registry keyed by template id (exact match wins) or item
//! type prefix. No global state.
//! ============================================================================

use crate::item::Item;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability interface for game objects backing an inventory item.
pub trait ItemInstance: Send {
    /// Rebuild instance state from the item. Returning false drops the
    /// instance (the item itself is kept).
    fn populate(&mut self, item: &Item) -> bool;

    /// Apply a single attribute change (None = attribute removed).
    /// Returning false requests a full re-populate instead.
    fn process_attribute_change(
        &mut self,
        name: &str,
        value: Option<&Value>,
        revision: i64,
    ) -> bool;

    /// The item was removed or instance creation was disabled.
    fn process_destroy(&mut self);

    fn update_quantity(&mut self, quantity: i32);
}

type InstanceFactory = Box<dyn Fn() -> Box<dyn ItemInstance> + Send + Sync>;

/// Registry mapping a type tag to an instance factory. Lookup tries the full
/// template id first, then the item-type prefix.
#[derive(Default)]
pub struct InstanceRegistry {
    factories: HashMap<String, InstanceFactory>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_tag: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ItemInstance> + Send + Sync + 'static,
    {
        self.factories.insert(type_tag.into(), Box::new(factory));
    }

    pub fn has_factory_for(&self, item: &Item) -> bool {
        self.factories.contains_key(&item.template_id)
            || self.factories.contains_key(&item.item_type)
    }

    /// Create (but do not populate) an instance for the item, if any factory
    /// is registered for its template or type.
    pub fn create_for(&self, item: &Item) -> Option<Box<dyn ItemInstance>> {
        self.factories
            .get(&item.template_id)
            .or_else(|| self.factories.get(&item.item_type))
            .map(|factory| factory())
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::InstanceCounters;
    use super::*;

    #[test]
    fn test_template_id_beats_type_prefix() {
        let mut registry = InstanceRegistry::new();
        let generic = InstanceCounters::default();
        let specific = InstanceCounters::default();
        generic.register_on(&mut registry, "Weapon");
        specific.register_on(&mut registry, "Weapon.Rocket");

        let rocket = Item::new("a", "Weapon.Rocket", 1, 0);
        let shock = Item::new("b", "Weapon.Shock", 1, 0);

        let mut inst = registry.create_for(&rocket).unwrap();
        inst.populate(&rocket);
        assert_eq!(specific.populated(), 1);
        assert_eq!(generic.populated(), 0);

        let mut inst = registry.create_for(&shock).unwrap();
        inst.populate(&shock);
        assert_eq!(generic.populated(), 1);
    }

    #[test]
    fn test_unregistered_type_has_no_instance() {
        let registry = InstanceRegistry::new();
        let item = Item::new("a", "Consumable.Potion", 1, 0);
        assert!(!registry.has_factory_for(&item));
        assert!(registry.create_for(&item).is_none());
    }
}
