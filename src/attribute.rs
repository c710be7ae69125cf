//! Attributes — concrete, uniquely-identified instances of a definition.

use std::collections::BTreeSet;

use crate::item::{Item, ItemAddress, ItemKind, Slot};
use crate::manager::{AttrKey, DefKey};

/// A concrete instance of a `Definition`: a name, a numeric id, and the
/// item tree built by walking the definition chain base-to-derived.
#[derive(Debug)]
pub struct Attribute {
    pub(crate) key: AttrKey,
    pub(crate) name: String,
    id: u64,
    definition: DefKey,
    pub(crate) items: Vec<Item>,
    pub(crate) entities: BTreeSet<String>,
}

impl Attribute {
    pub(crate) fn new(
        key: AttrKey,
        name: impl Into<String>,
        id: u64,
        definition: DefKey,
        items: Vec<Item>,
    ) -> Self {
        Attribute {
            key,
            name: name.into(),
            id,
            definition,
            items,
            entities: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> AttrKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn definition(&self) -> DefKey {
        self.definition
    }

    pub fn number_of_items(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, i: usize) -> Option<&Item> {
        self.items.get(i)
    }

    pub fn item_mut(&mut self, i: usize) -> Option<&mut Item> {
        self.items.get_mut(i)
    }

    /// First top-level item with the given name. With shadowed names the
    /// base item wins; use positional access for the shadowing one.
    pub fn find_item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.name() == name)
    }

    pub fn find_item_mut(&mut self, name: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.name() == name)
    }

    /// Index of the first top-level item with the given name.
    pub fn item_position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|i| i.name() == name)
    }

    pub fn item_at(&self, address: &ItemAddress) -> Option<&Item> {
        self.items.get(address.top)?.descend(&address.steps)
    }

    pub fn item_at_mut(&mut self, address: &ItemAddress) -> Option<&mut Item> {
        self.items.get_mut(address.top)?.descend_mut(&address.steps)
    }

    /// Model entities this attribute is associated with.
    pub fn entities(&self) -> &BTreeSet<String> {
        &self.entities
    }

    pub fn is_associated(&self, entity: &str) -> bool {
        self.entities.contains(entity)
    }

    /// Every (address, slot, target) triple where an item of this
    /// attribute points at another attribute, either as an expression or
    /// as an attribute reference. Used by the manager to unregister the
    /// sites when this attribute is removed.
    pub(crate) fn outbound_sites(&self) -> Vec<(ItemAddress, usize, AttrKey)> {
        let mut out = Vec::new();
        for (top, item) in self.items.iter().enumerate() {
            collect_sites(item, ItemAddress::top_level(top), &mut out);
        }
        out
    }
}

fn collect_sites(item: &Item, address: ItemAddress, out: &mut Vec<(ItemAddress, usize, AttrKey)>) {
    match &item.kind {
        ItemKind::Double(v) => collect_value_sites(&v.slots, &address, out),
        ItemKind::Int(v) => collect_value_sites(&v.slots, &address, out),
        ItemKind::String(v) => collect_value_sites(&v.slots, &address, out),
        ItemKind::AttributeRef(r) => {
            for (slot, target) in r.slots.iter().enumerate() {
                if let Some(t) = target {
                    out.push((address.clone(), slot, *t));
                }
            }
        }
        ItemKind::Group(g) => {
            for (entry, children) in g.entries.iter().enumerate() {
                for (child, c) in children.iter().enumerate() {
                    collect_sites(c, address.clone().into_group(entry, child), out);
                }
            }
        }
        ItemKind::Directory(_) | ItemKind::File(_) | ItemKind::Void(_) => {}
    }
}

fn collect_value_sites<T>(
    slots: &[Slot<T>],
    address: &ItemAddress,
    out: &mut Vec<(ItemAddress, usize, AttrKey)>,
) {
    for (slot, s) in slots.iter().enumerate() {
        if let Slot::Expression(t) = s {
            out.push((address.clone(), slot, *t));
        }
    }
}
