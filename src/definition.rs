//! Definitions — named, inheritable bundles of item definitions.
//!
//! A definition never exists outside a `Manager`; chain walks (`is_a`,
//! `conflicts`, item building) therefore take the owning manager to
//! resolve base keys.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::EngineError;
use crate::item::Item;
use crate::item_def::ItemDef;
use crate::manager::{DefKey, Manager};
use crate::mask::AssociationMask;

/// A named, inheritable schema node.
#[derive(Debug)]
pub struct Definition {
    pub(crate) key: DefKey,
    type_name: String,
    base: Option<DefKey>,
    pub label: Option<String>,
    pub version: u32,
    pub is_abstract: bool,
    /// At most one attribute of this unique family may be associated
    /// with a given model entity. Inherited along the base chain.
    pub is_unique: bool,
    pub is_nodal: bool,
    pub associations: AssociationMask,
    pub brief_description: String,
    pub detailed_description: String,
    item_defs: Vec<Arc<ItemDef>>,
    item_index: HashMap<String, usize>,
    /// Item-level category union, recomputed by
    /// `Manager::update_categories`.
    pub(crate) categories: BTreeSet<String>,
}

impl Definition {
    pub(crate) fn new(key: DefKey, type_name: impl Into<String>, base: Option<DefKey>) -> Self {
        Definition {
            key,
            type_name: type_name.into(),
            base,
            label: None,
            version: 0,
            is_abstract: false,
            is_unique: false,
            is_nodal: false,
            associations: AssociationMask::NONE,
            brief_description: String::new(),
            detailed_description: String::new(),
            item_defs: Vec::new(),
            item_index: HashMap::new(),
            categories: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> DefKey {
        self.key
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn base(&self) -> Option<DefKey> {
        self.base
    }

    pub fn item_definitions(&self) -> &[Arc<ItemDef>] {
        &self.item_defs
    }

    pub fn item_definition(&self, name: &str) -> Option<&Arc<ItemDef>> {
        self.item_index.get(name).map(|i| &self.item_defs[*i])
    }

    pub fn number_of_item_definitions(&self) -> usize {
        self.item_defs.len()
    }

    /// Categories last computed by `Manager::update_categories`.
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    /// Add an owned item definition.
    ///
    /// Name collisions are checked only among this definition's own
    /// items, not against inherited items of the same name: a derived
    /// definition may shadow a base item, in which case the shadowing
    /// item simply appears later in a built attribute's item list.
    pub fn add_item_definition(&mut self, item: ItemDef) -> Result<(), EngineError> {
        if self.item_index.contains_key(&item.name) {
            return Err(EngineError::DuplicateItem {
                definition: self.type_name.clone(),
                item: item.name,
            });
        }
        self.item_index.insert(item.name.clone(), self.item_defs.len());
        self.item_defs.push(Arc::new(item));
        Ok(())
    }

    /// True iff `target` appears in this definition's base chain,
    /// including itself. O(chain depth).
    pub fn is_a(&self, manager: &Manager, target: DefKey) -> bool {
        manager.is_a(self.key, target)
    }

    /// Top of the contiguous unique run starting at this definition:
    /// walk up while the parent is itself unique, stop at the first
    /// non-unique or missing ancestor. `None` when this definition is
    /// not unique.
    pub fn find_unique_base(&self, manager: &Manager) -> Option<DefKey> {
        if !self.is_unique {
            return None;
        }
        let mut current = self.key;
        loop {
            let parent = manager.definition(current).and_then(Definition::base);
            match parent {
                Some(p) if manager.definition(p).map(|d| d.is_unique).unwrap_or(false) => {
                    current = p;
                }
                _ => return Some(current),
            }
        }
    }

    /// Two definitions conflict (cannot both attach to one model
    /// entity) iff both are unique and either chain passes through the
    /// other's nearest-unique ancestor.
    pub fn conflicts(&self, manager: &Manager, other: &Definition) -> bool {
        if !self.is_unique || !other.is_unique {
            return false;
        }
        let mine = match self.find_unique_base(manager) {
            Some(k) => k,
            None => return false,
        };
        let theirs = match other.find_unique_base(manager) {
            Some(k) => k,
            None => return false,
        };
        manager.is_a(other.key, mine) || manager.is_a(self.key, theirs)
    }

    /// Build the full item list for an attribute of this definition:
    /// base items first (recursively), then one item per owned item
    /// definition, in declaration order.
    pub(crate) fn build_items(&self, manager: &Manager) -> Vec<Item> {
        let mut items = match self.base.and_then(|b| manager.definition(b)) {
            Some(base) => base.build_items(manager),
            None => Vec::new(),
        };
        items.extend(self.item_defs.iter().map(|d| d.build_item()));
        items
    }

    /// Union of this definition's own items' categories (groups
    /// recursed). Base categories are deliberately not folded in here;
    /// `Manager::update_categories` re-derives per definition.
    pub fn local_categories(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for item in &self.item_defs {
            item.collect_categories(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Manager;

    #[test]
    fn duplicate_own_item_rejected() {
        let mut mgr = Manager::new();
        let key = mgr.create_definition("Material", None).unwrap();
        let def = mgr.definition_mut(key).unwrap();
        def.add_item_definition(ItemDef::double("Density")).unwrap();
        let err = def
            .add_item_definition(ItemDef::string("Density"))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateItem { .. }));
    }

    #[test]
    fn shadowing_across_chain_is_permitted() {
        let mut mgr = Manager::new();
        let base = mgr.create_definition("Base", None).unwrap();
        mgr.definition_mut(base)
            .unwrap()
            .add_item_definition(ItemDef::int("Count"))
            .unwrap();
        let derived = mgr.create_definition("Derived", Some("Base")).unwrap();
        // Same name as the inherited item: allowed, appends later.
        mgr.definition_mut(derived)
            .unwrap()
            .add_item_definition(ItemDef::string("Count"))
            .unwrap();

        let att = mgr.create_attribute("a", derived).unwrap();
        let att = mgr.attribute(att).unwrap();
        assert_eq!(att.number_of_items(), 2);
        assert_eq!(att.item(0).unwrap().name(), "Count");
        assert_eq!(att.item(1).unwrap().name(), "Count");
    }

    #[test]
    fn local_categories_exclude_base() {
        let mut mgr = Manager::new();
        let base = mgr.create_definition("Base", None).unwrap();
        let mut heat = ItemDef::double("T");
        heat.categories.insert("Heat".into());
        mgr.definition_mut(base)
            .unwrap()
            .add_item_definition(heat)
            .unwrap();

        let derived = mgr.create_definition("Derived", Some("Base")).unwrap();
        let mut flow = ItemDef::double("V");
        flow.categories.insert("Flow".into());
        mgr.definition_mut(derived)
            .unwrap()
            .add_item_definition(flow)
            .unwrap();

        let local = mgr.definition(derived).unwrap().local_categories();
        assert!(local.contains("Flow"));
        assert!(!local.contains("Heat"));
    }
}
