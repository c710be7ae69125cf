//! The manager — registry, factory, and invariant enforcer for one
//! schema instance plus its attribute graph.
//!
//! Definitions and attributes live in slotmap arenas; everything else
//! refers to them through generational keys, so a removed attribute's
//! key can never resolve again. The expression back-reference registry
//! is manager state: writes to expression and reference slots go
//! through here so that removing a target attribute can sever every
//! inbound link before the attribute is dropped.

use std::collections::{BTreeSet, HashMap, HashSet};

use slotmap::{new_key_type, SlotMap};
use tracing::debug;

use crate::attribute::Attribute;
use crate::definition::Definition;
use crate::error::EngineError;
use crate::item::ItemAddress;
use crate::item_def::ItemDef;
use crate::xml::dom::Element;

new_key_type! {
    /// Generational handle to a `Definition` owned by a `Manager`.
    pub struct DefKey;
}

new_key_type! {
    /// Generational handle to an `Attribute` owned by a `Manager`.
    pub struct AttrKey;
}

/// One registered inbound link: `holder`'s item at `address`, slot
/// `slot`, points at the attribute this site is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RefSite {
    pub holder: AttrKey,
    pub address: ItemAddress,
    pub slot: usize,
}

/// Registry owning all definitions and attributes of one schema.
///
/// `DefKey` and `AttrKey` values are slot-map keys and are only
/// meaningful against the manager that minted them. A key from one
/// manager can collide with a live slot in another (two managers
/// built through the same sequence of calls yield identical keys),
/// so passing a foreign key is not detected and resolves to whatever
/// occupies that slot here. Keep keys with their manager; to carry an
/// identity across managers use the attribute name or persistent id.
#[derive(Debug, Default)]
pub struct Manager {
    definitions: SlotMap<DefKey, Definition>,
    def_names: HashMap<String, DefKey>,
    /// Definitions with no base, in creation order. Drives writer
    /// ordering and the category recomputation walk.
    roots: Vec<DefKey>,
    derived: HashMap<DefKey, Vec<DefKey>>,

    attributes: SlotMap<AttrKey, Attribute>,
    attr_names: HashMap<String, AttrKey>,
    attr_ids: HashMap<u64, AttrKey>,
    /// Instances per concrete definition, in creation order.
    instances: HashMap<DefKey, Vec<AttrKey>>,
    next_id: u64,

    /// Inbound expression/reference sites per target attribute.
    references: HashMap<AttrKey, HashSet<RefSite>>,

    /// Aggregate of all definitions' categories; valid after
    /// `update_categories`.
    categories: BTreeSet<String>,
    /// Named category sets, in declaration order.
    analyses: Vec<(String, BTreeSet<String>)>,
    /// Opaque UI/model blocks the codec writes back verbatim.
    sections: Vec<Element>,
}

impl Manager {
    pub fn new() -> Self {
        Manager {
            next_id: 1,
            ..Manager::default()
        }
    }

    // ── definitions ──────────────────────────────────────────────

    /// Create a definition, optionally derived from `base_type`.
    /// Fails when the type name exists or the base type does not.
    pub fn create_definition(
        &mut self,
        type_name: &str,
        base_type: Option<&str>,
    ) -> Result<DefKey, EngineError> {
        if self.def_names.contains_key(type_name) {
            return Err(EngineError::DuplicateDefinition(type_name.to_string()));
        }
        let base = match base_type {
            Some(b) => Some(
                self.def_names
                    .get(b)
                    .copied()
                    .ok_or_else(|| EngineError::UnknownDefinition(b.to_string()))?,
            ),
            None => None,
        };
        let key = self
            .definitions
            .insert_with_key(|k| Definition::new(k, type_name, base));
        self.def_names.insert(type_name.to_string(), key);
        match base {
            Some(b) => self.derived.entry(b).or_default().push(key),
            None => self.roots.push(key),
        }
        debug!(type_name, base = ?base_type, "definition created");
        Ok(key)
    }

    pub fn definition(&self, key: DefKey) -> Option<&Definition> {
        self.definitions.get(key)
    }

    pub fn definition_mut(&mut self, key: DefKey) -> Option<&mut Definition> {
        self.definitions.get_mut(key)
    }

    pub fn find_definition(&self, type_name: &str) -> Option<DefKey> {
        self.def_names.get(type_name).copied()
    }

    pub fn number_of_definitions(&self) -> usize {
        self.definitions.len()
    }

    /// Definitions with no base type, in creation order.
    pub fn find_base_definitions(&self) -> &[DefKey] {
        &self.roots
    }

    /// Directly derived definitions, in creation order.
    pub fn derived_definitions(&self, key: DefKey) -> &[DefKey] {
        self.derived.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True iff `target` appears in `def`'s base chain, `def` included.
    pub fn is_a(&self, def: DefKey, target: DefKey) -> bool {
        let mut current = Some(def);
        while let Some(k) = current {
            if k == target {
                return true;
            }
            current = self.definitions.get(k).and_then(Definition::base);
        }
        false
    }

    /// Convenience: add an item definition to a definition by key.
    pub fn add_item_definition(
        &mut self,
        def: DefKey,
        item: ItemDef,
    ) -> Result<(), EngineError> {
        match self.definitions.get_mut(def) {
            Some(d) => d.add_item_definition(item),
            None => Err(EngineError::UnknownDefinition(format!("{def:?}"))),
        }
    }

    // ── attributes ───────────────────────────────────────────────

    /// Instantiate `definition` under `name`, allocating the next id.
    /// `definition` must have been minted by this manager; a key from
    /// another manager may resolve against an unrelated slot here.
    pub fn create_attribute(
        &mut self,
        name: &str,
        definition: DefKey,
    ) -> Result<AttrKey, EngineError> {
        let id = self.next_id;
        self.create_attribute_with_id(name, definition, id)
    }

    /// Instantiate with an explicit id; used by the XML reader to
    /// restore persisted ids. Bumps the allocator past `id`.
    pub fn create_attribute_with_id(
        &mut self,
        name: &str,
        definition: DefKey,
        id: u64,
    ) -> Result<AttrKey, EngineError> {
        let def = self
            .definitions
            .get(definition)
            .ok_or_else(|| EngineError::UnknownDefinition(format!("{definition:?}")))?;
        if def.is_abstract {
            return Err(EngineError::AbstractInstantiation(def.type_name().to_string()));
        }
        if self.attr_names.contains_key(name) {
            return Err(EngineError::DuplicateAttribute(name.to_string()));
        }
        if self.attr_ids.contains_key(&id) {
            return Err(EngineError::DuplicateAttributeId(id));
        }
        let items = def.build_items(self);
        let key = self
            .attributes
            .insert_with_key(|k| Attribute::new(k, name, id, definition, items));
        self.attr_names.insert(name.to_string(), key);
        self.attr_ids.insert(id, key);
        self.instances.entry(definition).or_default().push(key);
        self.next_id = self.next_id.max(id + 1);
        debug!(name, id, "attribute created");
        Ok(key)
    }

    pub fn attribute(&self, key: AttrKey) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn attribute_mut(&mut self, key: AttrKey) -> Option<&mut Attribute> {
        self.attributes.get_mut(key)
    }

    pub fn find_attribute(&self, name: &str) -> Option<AttrKey> {
        self.attr_names.get(name).copied()
    }

    pub fn find_attribute_by_id(&self, id: u64) -> Option<AttrKey> {
        self.attr_ids.get(&id).copied()
    }

    pub fn number_of_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// All attributes whose definition is `definition` or transitively
    /// derived from it, with no duplicates.
    pub fn find_attributes(&self, definition: DefKey) -> Vec<AttrKey> {
        let mut out = Vec::new();
        let mut stack = vec![definition];
        while let Some(d) = stack.pop() {
            if let Some(inst) = self.instances.get(&d) {
                out.extend(inst.iter().copied());
            }
            stack.extend(self.derived_definitions(d).iter().copied());
        }
        out
    }

    /// Rename an attribute. Fails on collision; the id map is untouched.
    pub fn rename_attribute(&mut self, key: AttrKey, new_name: &str) -> Result<(), EngineError> {
        if self.attr_names.contains_key(new_name) {
            return Err(EngineError::DuplicateAttribute(new_name.to_string()));
        }
        let attr = self
            .attributes
            .get_mut(key)
            .ok_or_else(|| EngineError::UnknownAttribute(format!("{key:?}")))?;
        let old = std::mem::replace(&mut attr.name, new_name.to_string());
        self.attr_names.remove(&old);
        self.attr_names.insert(new_name.to_string(), key);
        debug!(old, new = new_name, "attribute renamed");
        Ok(())
    }

    /// Remove an attribute, first severing every inbound expression and
    /// reference link so nothing dangling survives the drop.
    pub fn remove_attribute(&mut self, key: AttrKey) -> Result<(), EngineError> {
        let attr = self
            .attributes
            .remove(key)
            .ok_or_else(|| EngineError::UnknownAttribute(format!("{key:?}")))?;

        // Inbound: clear every holder slot that pointed at us.
        if let Some(sites) = self.references.remove(&key) {
            debug!(name = attr.name(), inbound = sites.len(), "severing references");
            for site in sites {
                if let Some(holder) = self.attributes.get_mut(site.holder) {
                    if let Some(item) = holder.item_at_mut(&site.address) {
                        item.clear_slot(site.slot);
                    }
                }
            }
        }

        // Outbound: unregister our own sites from other targets.
        for (address, slot, target) in attr.outbound_sites() {
            if let Some(set) = self.references.get_mut(&target) {
                set.remove(&RefSite {
                    holder: key,
                    address,
                    slot,
                });
                if set.is_empty() {
                    self.references.remove(&target);
                }
            }
        }

        self.attr_names.remove(attr.name());
        self.attr_ids.remove(&attr.id());
        if let Some(inst) = self.instances.get_mut(&attr.definition()) {
            inst.retain(|k| *k != key);
        }
        debug!(name = attr.name(), "attribute removed");
        Ok(())
    }

    // ── expressions and references ───────────────────────────────

    /// True iff any item anywhere holds an expression or reference link
    /// to this attribute.
    pub fn is_referenced(&self, key: AttrKey) -> bool {
        self.references.get(&key).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Point slot `slot` of the item at `address` in `holder` at
    /// `target`'s output instead of a literal, or clear it with `None`.
    ///
    /// The write is rejected unless the item allows expressions and
    /// `target`'s definition `is_a` the configured expression
    /// definition. Registration in the back-reference registry makes
    /// the link safe: removing `target` later clears this slot.
    pub fn set_expression(
        &mut self,
        holder: AttrKey,
        address: &ItemAddress,
        slot: usize,
        target: Option<AttrKey>,
    ) -> bool {
        let expr_def = match self
            .attributes
            .get(holder)
            .and_then(|a| a.item_at(address))
            .map(|i| i.definition().expression_def())
        {
            Some(Some(d)) => d,
            _ => return false,
        };
        if let Some(t) = target {
            let target_def = match self.attributes.get(t) {
                Some(a) => a.definition(),
                None => return false,
            };
            if !self.is_a(target_def, expr_def) {
                return false;
            }
        }
        self.relink(holder, address, slot, target, LinkKind::Expression)
    }

    /// Point slot `slot` of the attribute-reference item at `address`
    /// at `target`, or clear it with `None`. Valid iff `target`'s
    /// definition `is_a` the item's target definition (or none is set).
    pub fn set_reference(
        &mut self,
        holder: AttrKey,
        address: &ItemAddress,
        slot: usize,
        target: Option<AttrKey>,
    ) -> bool {
        let ref_def = match self
            .attributes
            .get(holder)
            .and_then(|a| a.item_at(address))
            .map(|i| i.definition().ref_def().map(|r| r.target_def))
        {
            Some(Some(d)) => d,
            _ => return false,
        };
        if let (Some(t), Some(required)) = (target, ref_def) {
            let target_def = match self.attributes.get(t) {
                Some(a) => a.definition(),
                None => return false,
            };
            if !self.is_a(target_def, required) {
                return false;
            }
        } else if let Some(t) = target {
            if !self.attributes.contains_key(t) {
                return false;
            }
        }
        self.relink(holder, address, slot, target, LinkKind::Reference)
    }

    fn relink(
        &mut self,
        holder: AttrKey,
        address: &ItemAddress,
        slot: usize,
        target: Option<AttrKey>,
        kind: LinkKind,
    ) -> bool {
        // Previous target, to unregister below.
        let previous = {
            let item = match self.attributes.get(holder).and_then(|a| a.item_at(address)) {
                Some(i) => i,
                None => return false,
            };
            match kind {
                LinkKind::Expression => item.expression(slot),
                LinkKind::Reference => item.reference(slot),
            }
        };

        let written = {
            let item = match self
                .attributes
                .get_mut(holder)
                .and_then(|a| a.item_at_mut(address))
            {
                Some(i) => i,
                None => return false,
            };
            match (kind, target) {
                (LinkKind::Expression, Some(t)) => item.set_expression_slot(slot, t),
                (LinkKind::Reference, Some(t)) => item.set_reference_slot(slot, t),
                (_, None) => item.clear_slot(slot),
            }
        };
        if !written {
            return false;
        }

        let site = RefSite {
            holder,
            address: address.clone(),
            slot,
        };
        if let Some(prev) = previous {
            if let Some(set) = self.references.get_mut(&prev) {
                set.remove(&site);
                if set.is_empty() {
                    self.references.remove(&prev);
                }
            }
        }
        if let Some(t) = target {
            self.references.entry(t).or_default().insert(site);
        }
        true
    }

    // ── entity associations ──────────────────────────────────────

    /// Associate an attribute with a model entity. Rejected when the
    /// entity already holds an attribute whose definition conflicts
    /// (shared unique family) with this one.
    pub fn associate(&mut self, key: AttrKey, entity: &str) -> Result<(), EngineError> {
        let def_key = self
            .attributes
            .get(key)
            .ok_or_else(|| EngineError::UnknownAttribute(format!("{key:?}")))?
            .definition();
        let def = match self.definitions.get(def_key) {
            Some(d) => d,
            None => return Err(EngineError::UnknownDefinition(format!("{def_key:?}"))),
        };
        for other in self.attributes.values() {
            if other.key() == key || !other.is_associated(entity) {
                continue;
            }
            if let Some(other_def) = self.definitions.get(other.definition()) {
                if def.conflicts(self, other_def) {
                    return Err(EngineError::AssociationConflict {
                        entity: entity.to_string(),
                        definition: def.type_name().to_string(),
                    });
                }
            }
        }
        if let Some(attr) = self.attributes.get_mut(key) {
            attr.entities.insert(entity.to_string());
        }
        Ok(())
    }

    pub fn disassociate(&mut self, key: AttrKey, entity: &str) -> bool {
        match self.attributes.get_mut(key) {
            Some(a) => a.entities.remove(entity),
            None => false,
        }
    }

    // ── categories, analyses, sections ───────────────────────────

    /// Recompute every definition's item-level category union (walking
    /// the derived tree from the roots) and aggregate them here. Not triggered
    /// automatically by schema edits; run it after construction and
    /// before any category-based query.
    pub fn update_categories(&mut self) {
        let mut queue: Vec<DefKey> = self.roots.clone();
        let mut aggregate = BTreeSet::new();
        while let Some(key) = queue.pop() {
            queue.extend(self.derived_definitions(key).iter().copied());
            if let Some(def) = self.definitions.get_mut(key) {
                let local = def.local_categories();
                aggregate.extend(local.iter().cloned());
                def.categories = local;
            }
        }
        self.categories = aggregate;
    }

    /// Aggregate category set; valid after `update_categories`.
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn define_analysis(&mut self, name: &str, categories: BTreeSet<String>) {
        self.analyses.push((name.to_string(), categories));
    }

    pub fn analyses(&self) -> &[(String, BTreeSet<String>)] {
        &self.analyses
    }

    /// Opaque UI/model-layout blocks carried through the codec.
    pub fn sections(&self) -> &[Element] {
        &self.sections
    }

    pub fn add_section(&mut self, section: Element) {
        self.sections.push(section);
    }
}

#[derive(Clone, Copy)]
enum LinkKind {
    Expression,
    Reference,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemAddress;
    use crate::item_def::ItemDef;

    fn unique(mgr: &mut Manager, name: &str, base: Option<&str>) -> DefKey {
        let k = mgr.create_definition(name, base).unwrap();
        mgr.definition_mut(k).unwrap().is_unique = true;
        k
    }

    // ── definition registry ──────────────────────────────────────

    #[test]
    fn duplicate_definition_type_rejected() {
        let mut mgr = Manager::new();
        mgr.create_definition("Material", None).unwrap();
        let err = mgr.create_definition("Material", None).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDefinition(_)));
        assert_eq!(mgr.number_of_definitions(), 1);
    }

    #[test]
    fn unknown_base_rejected() {
        let mut mgr = Manager::new();
        let err = mgr.create_definition("Derived", Some("Missing")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDefinition(_)));
    }

    #[test]
    fn is_a_is_reflexive_and_antisymmetric() {
        let mut mgr = Manager::new();
        let a = mgr.create_definition("A", None).unwrap();
        let b = mgr.create_definition("B", Some("A")).unwrap();
        assert!(mgr.is_a(a, a));
        assert!(mgr.is_a(b, a));
        assert!(!mgr.is_a(a, b));
    }

    #[test]
    fn conflicts_through_shared_unique_ancestor() {
        let mut mgr = Manager::new();
        unique(&mut mgr, "BC", None);
        let d1 = unique(&mut mgr, "Dirichlet", Some("BC"));
        let d2 = unique(&mut mgr, "Neumann", Some("BC"));
        let (d1, d2) = (mgr.definition(d1).unwrap(), mgr.definition(d2).unwrap());
        assert!(d1.conflicts(&mgr, d2));
        assert!(d2.conflicts(&mgr, d1));
    }

    #[test]
    fn unrelated_unique_definitions_do_not_conflict() {
        let mut mgr = Manager::new();
        let a = unique(&mut mgr, "Material", None);
        let b = unique(&mut mgr, "BC", None);
        let (a, b) = (mgr.definition(a).unwrap(), mgr.definition(b).unwrap());
        assert!(!a.conflicts(&mgr, b));
    }

    #[test]
    fn non_unique_definitions_never_conflict() {
        let mut mgr = Manager::new();
        let base = unique(&mut mgr, "Base", None);
        let soft = mgr.create_definition("Soft", Some("Base")).unwrap();
        let soft = mgr.definition(soft).unwrap();
        let base = mgr.definition(base).unwrap();
        assert!(!soft.conflicts(&mgr, base));
    }

    #[test]
    fn unique_run_stops_at_non_unique_ancestor() {
        let mut mgr = Manager::new();
        // Root is NOT unique; two unique branches below it must not
        // conflict with each other.
        mgr.create_definition("Root", None).unwrap();
        let l = unique(&mut mgr, "Left", Some("Root"));
        let r = unique(&mut mgr, "Right", Some("Root"));
        let (l, r) = (mgr.definition(l).unwrap(), mgr.definition(r).unwrap());
        assert_eq!(l.find_unique_base(&mgr), Some(l.key()));
        assert!(!l.conflicts(&mgr, r));
    }

    // ── attribute lifecycle ──────────────────────────────────────

    #[test]
    fn duplicate_attribute_name_leaves_count_unchanged() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("Material", None).unwrap();
        mgr.create_attribute("steel", d).unwrap();
        let err = mgr.create_attribute("steel", d).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAttribute(_)));
        assert_eq!(mgr.number_of_attributes(), 1);
    }

    #[test]
    fn abstract_definition_cannot_instantiate() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("BaseBC", None).unwrap();
        mgr.definition_mut(d).unwrap().is_abstract = true;
        let err = mgr.create_attribute("bc1", d).unwrap_err();
        assert!(matches!(err, EngineError::AbstractInstantiation(_)));
    }

    #[test]
    fn ids_are_monotonic_and_reader_ids_bump_allocator() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("M", None).unwrap();
        let a = mgr.create_attribute("a", d).unwrap();
        assert_eq!(mgr.attribute(a).unwrap().id(), 1);
        mgr.create_attribute_with_id("b", d, 10).unwrap();
        let c = mgr.create_attribute("c", d).unwrap();
        assert_eq!(mgr.attribute(c).unwrap().id(), 11);
        let err = mgr.create_attribute_with_id("dup", d, 10).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAttributeId(10)));
    }

    #[test]
    fn rename_checks_collisions_and_keeps_id() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("M", None).unwrap();
        let a = mgr.create_attribute("a", d).unwrap();
        mgr.create_attribute("b", d).unwrap();
        assert!(matches!(
            mgr.rename_attribute(a, "b"),
            Err(EngineError::DuplicateAttribute(_))
        ));
        mgr.rename_attribute(a, "a2").unwrap();
        assert_eq!(mgr.find_attribute("a"), None);
        assert_eq!(mgr.find_attribute("a2"), Some(a));
        assert_eq!(mgr.find_attribute_by_id(1), Some(a));
    }

    #[test]
    fn find_attributes_unions_subtypes_without_duplicates() {
        let mut mgr = Manager::new();
        let base = mgr.create_definition("BC", None).unwrap();
        let mid = mgr.create_definition("Wall", Some("BC")).unwrap();
        mgr.create_definition("Inlet", Some("BC")).unwrap();
        let leaf = mgr.create_definition("HotWall", Some("Wall")).unwrap();

        let a = mgr.create_attribute("w1", mid).unwrap();
        let b = mgr.create_attribute("h1", leaf).unwrap();
        let c = mgr
            .create_attribute("i1", mgr.find_definition("Inlet").unwrap())
            .unwrap();

        let mut found = mgr.find_attributes(base);
        found.sort();
        let mut expected = vec![a, b, c];
        expected.sort();
        assert_eq!(found, expected);
        assert_eq!(mgr.find_attributes(mid).len(), 2);
        assert_eq!(mgr.find_attributes(leaf), vec![b]);
    }

    // ── inherited item layout ────────────────────────────────────

    #[test]
    fn derived_attribute_items_follow_base_to_derived_order() {
        let mut mgr = Manager::new();
        let base = mgr.create_definition("Base", None).unwrap();
        mgr.add_item_definition(base, ItemDef::int("Count")).unwrap();
        let derived = mgr.create_definition("Derived", Some("Base")).unwrap();
        let mut label = ItemDef::string("Label");
        label.string_def_mut().unwrap().default = Some("x".into());
        mgr.add_item_definition(derived, label).unwrap();

        let a1 = mgr.create_attribute("A1", derived).unwrap();
        let a1 = mgr.attribute(a1).unwrap();
        assert_eq!(a1.number_of_items(), 2);
        assert_eq!(a1.item(0).unwrap().name(), "Count");
        assert!(!a1.item(0).unwrap().is_set(0));
        assert_eq!(a1.item(1).unwrap().name(), "Label");
        assert_eq!(a1.item(1).unwrap().value_as_string(0).as_deref(), Some("x"));
    }

    // ── expressions ──────────────────────────────────────────────

    fn expression_fixture(mgr: &mut Manager) -> (AttrKey, AttrKey) {
        let exp = mgr.create_definition("Exp", None).unwrap();
        mgr.add_item_definition(exp, ItemDef::string("Formula")).unwrap();
        let base = mgr.create_definition("Base", None).unwrap();
        let mut d = ItemDef::double("Value");
        d.double_def_mut().unwrap().expr_def = Some(exp);
        mgr.add_item_definition(base, d).unwrap();

        let e1 = mgr.create_attribute("E1", exp).unwrap();
        let b1 = mgr.create_attribute("B1", base).unwrap();
        (e1, b1)
    }

    #[test]
    fn expression_set_then_target_removal_clears_holder() {
        let mut mgr = Manager::new();
        let (e1, b1) = expression_fixture(&mut mgr);

        let addr = ItemAddress::top_level(0);
        assert!(mgr.set_expression(b1, &addr, 0, Some(e1)));
        assert!(mgr.is_referenced(e1));
        assert!(mgr.attribute(b1).unwrap().item(0).unwrap().is_set(0));

        mgr.remove_attribute(e1).unwrap();
        assert!(!mgr.attribute(b1).unwrap().item(0).unwrap().is_set(0));
        assert!(mgr.attribute(e1).is_none());
    }

    #[test]
    fn expression_target_must_match_expression_definition() {
        let mut mgr = Manager::new();
        let (_, b1) = expression_fixture(&mut mgr);
        let other = mgr.create_definition("Other", None).unwrap();
        let o1 = mgr.create_attribute("O1", other).unwrap();

        let addr = ItemAddress::top_level(0);
        assert!(!mgr.set_expression(b1, &addr, 0, Some(o1)));
        assert!(!mgr.attribute(b1).unwrap().item(0).unwrap().is_set(0));
    }

    #[test]
    fn clearing_expression_unregisters_site() {
        let mut mgr = Manager::new();
        let (e1, b1) = expression_fixture(&mut mgr);
        let addr = ItemAddress::top_level(0);
        mgr.set_expression(b1, &addr, 0, Some(e1));
        assert!(mgr.set_expression(b1, &addr, 0, None));
        assert!(!mgr.is_referenced(e1));
    }

    #[test]
    fn removing_target_clears_every_inbound_reference() {
        let mut mgr = Manager::new();
        let (e1, b1) = expression_fixture(&mut mgr);
        let base = mgr.find_definition("Base").unwrap();
        let b2 = mgr.create_attribute("B2", base).unwrap();
        let b3 = mgr.create_attribute("B3", base).unwrap();

        let addr = ItemAddress::top_level(0);
        for holder in [b1, b2, b3] {
            assert!(mgr.set_expression(holder, &addr, 0, Some(e1)));
        }
        mgr.remove_attribute(e1).unwrap();
        for holder in [b1, b2, b3] {
            let item_set = mgr.attribute(holder).unwrap().item(0).unwrap().is_set(0);
            assert!(!item_set);
        }
    }

    #[test]
    fn removing_holder_unregisters_outbound_sites() {
        let mut mgr = Manager::new();
        let (e1, b1) = expression_fixture(&mut mgr);
        let addr = ItemAddress::top_level(0);
        mgr.set_expression(b1, &addr, 0, Some(e1));
        mgr.remove_attribute(b1).unwrap();
        assert!(!mgr.is_referenced(e1));
    }

    #[test]
    fn value_setters_refuse_expression_occupied_slots() {
        let mut mgr = Manager::new();
        let (e1, b1) = expression_fixture(&mut mgr);
        let addr = ItemAddress::top_level(0);
        assert!(mgr.set_expression(b1, &addr, 0, Some(e1)));

        // The slot stays pinned until the manager clears the link.
        let item = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
        assert!(!item.set_double(0, 3.0));
        assert!(!item.unset(0));
        assert_eq!(item.expression(0), Some(e1));
        assert!(mgr.is_referenced(e1));

        assert!(mgr.set_expression(b1, &addr, 0, None));
        assert!(!mgr.is_referenced(e1));
        let item = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
        assert!(item.set_double(0, 3.0));

        // Removing the old target no longer touches the fresh literal.
        mgr.remove_attribute(e1).unwrap();
        let item = mgr.attribute(b1).unwrap().item(0).unwrap();
        assert_eq!(item.double_value(0), Some(3.0));
    }

    #[test]
    fn linked_slots_pin_later_value_removal() {
        let mut mgr = Manager::new();
        let exp = mgr.create_definition("Exp", None).unwrap();
        let base = mgr.create_definition("Base", None).unwrap();
        let mut d = ItemDef::double("Value");
        {
            let vd = d.double_def_mut().unwrap();
            vd.expr_def = Some(exp);
            vd.required_count = 0;
        }
        mgr.add_item_definition(base, d).unwrap();
        let e1 = mgr.create_attribute("E1", exp).unwrap();
        let b1 = mgr.create_attribute("B1", base).unwrap();

        let addr = ItemAddress::top_level(0);
        {
            let item = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
            assert!(item.append_value());
            assert!(item.append_value());
            assert!(item.set_double(0, 1.0));
        }
        assert!(mgr.set_expression(b1, &addr, 1, Some(e1)));

        // Removing slot 0 would shift the registered slot 1 down.
        let item = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
        assert!(!item.remove_value(0));
        assert_eq!(item.expression(1), Some(e1));

        assert!(mgr.set_expression(b1, &addr, 1, None));
        let item = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
        assert!(item.remove_value(0));
        assert_eq!(item.number_of_values(), 1);
        assert!(!mgr.is_referenced(e1));
    }

    #[test]
    fn group_entries_with_links_cannot_be_removed() {
        let mut mgr = Manager::new();
        let exp = mgr.create_definition("Exp", None).unwrap();
        let base = mgr.create_definition("Base", None).unwrap();
        let mut group = ItemDef::group("Terms");
        let mut coeff = ItemDef::double("Coeff");
        coeff.double_def_mut().unwrap().expr_def = Some(exp);
        group.add_group_child(coeff).unwrap();
        group.group_def_mut().unwrap().required_groups = 0;
        mgr.add_item_definition(base, group).unwrap();
        let e1 = mgr.create_attribute("E1", exp).unwrap();
        let b1 = mgr.create_attribute("B1", base).unwrap();

        {
            let terms = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
            assert!(terms.append_group());
            assert!(terms.append_group());
            assert!(terms.group_item_mut(1, 0).unwrap().set_double(0, 9.0));
        }
        let linked = ItemAddress::top_level(0).into_group(0, 0);
        assert!(mgr.set_expression(b1, &linked, 0, Some(e1)));

        // Entry 0 holds the link; entry 1 would shift under its address.
        let terms = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
        assert!(!terms.remove_group(0));
        assert_eq!(terms.number_of_groups(), 2);

        assert!(mgr.set_expression(b1, &linked, 0, None));
        let terms = mgr.attribute_mut(b1).unwrap().item_mut(0).unwrap();
        assert!(terms.remove_group(0));
        mgr.remove_attribute(e1).unwrap();
        let terms = mgr.attribute(b1).unwrap().item(0).unwrap();
        assert_eq!(terms.group_item(0, 0).unwrap().double_value(0), Some(9.0));
    }

    // ── attribute references ─────────────────────────────────────

    #[test]
    fn reference_item_validates_target_type() {
        let mut mgr = Manager::new();
        let mat = mgr.create_definition("Material", None).unwrap();
        let body = mgr.create_definition("Body", None).unwrap();
        let mut r = ItemDef::attribute_ref("Material");
        r.ref_def_mut().unwrap().target_def = Some(mat);
        mgr.add_item_definition(body, r).unwrap();

        let steel = mgr.create_attribute("steel", mat).unwrap();
        let b = mgr.create_attribute("b", body).unwrap();
        let other = mgr.create_definition("Other", None).unwrap();
        let o = mgr.create_attribute("o", other).unwrap();

        let addr = ItemAddress::top_level(0);
        assert!(!mgr.set_reference(b, &addr, 0, Some(o)));
        assert!(mgr.set_reference(b, &addr, 0, Some(steel)));
        assert!(mgr.is_referenced(steel));

        mgr.remove_attribute(steel).unwrap();
        assert_eq!(mgr.attribute(b).unwrap().item(0).unwrap().reference(0), None);
    }

    // ── associations ─────────────────────────────────────────────

    #[test]
    fn unique_family_conflicts_on_shared_entity() {
        let mut mgr = Manager::new();
        unique(&mut mgr, "BC", None);
        let d1 = unique(&mut mgr, "Dirichlet", Some("BC"));
        let d2 = unique(&mut mgr, "Neumann", Some("BC"));
        let a1 = mgr.create_attribute("bc1", d1).unwrap();
        let a2 = mgr.create_attribute("bc2", d2).unwrap();

        mgr.associate(a1, "face-7").unwrap();
        let err = mgr.associate(a2, "face-7").unwrap_err();
        assert!(matches!(err, EngineError::AssociationConflict { .. }));

        // A different entity is fine.
        mgr.associate(a2, "face-8").unwrap();
        assert!(mgr.disassociate(a1, "face-7"));
        mgr.associate(a2, "face-7").unwrap();
    }

    // ── key scoping ──────────────────────────────────────────────

    #[test]
    fn keys_resolve_only_against_their_minting_manager() {
        let mut a = Manager::new();
        let mut b = Manager::new();
        let mat = a.create_definition("Material", None).unwrap();
        let bc = b.create_definition("Boundary", None).unwrap();

        // Managers built through the same call sequence mint equal
        // keys, so a foreign key resolves to this manager's occupant
        // of the slot. Cross-manager identity must travel by name.
        assert_eq!(mat, bc);
        let inst = b.create_attribute("bc1", mat).unwrap();
        let def = b.attribute(inst).unwrap().definition();
        assert_eq!(b.definition(def).unwrap().type_name(), "Boundary");

        // A key with no live slot on the receiving side is rejected.
        let extra = a.create_definition("Extra", None).unwrap();
        assert!(b.create_attribute("x", extra).is_err());
    }

    // ── categories ───────────────────────────────────────────────

    #[test]
    fn update_categories_aggregates_over_all_definitions() {
        let mut mgr = Manager::new();
        let base = mgr.create_definition("Base", None).unwrap();
        let mut t = ItemDef::double("T");
        t.categories.insert("Heat".into());
        mgr.add_item_definition(base, t).unwrap();

        let derived = mgr.create_definition("Derived", Some("Base")).unwrap();
        let mut v = ItemDef::double("V");
        v.categories.insert("Flow".into());
        mgr.add_item_definition(derived, v).unwrap();

        assert!(mgr.categories().is_empty());
        mgr.update_categories();
        assert!(mgr.categories().contains("Heat"));
        assert!(mgr.categories().contains("Flow"));
        assert_eq!(
            mgr.definition(derived).unwrap().categories().iter().count(),
            1
        );
    }
}
