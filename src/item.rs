//! Runtime items — concrete, possibly-unset value containers built from
//! their `ItemDef`.
//!
//! Each value slot is a small state machine:
//! `Unset -> Literal | Discrete | Expression`; setting one arm clears the
//! others. Expression arms are written only through the `Manager`, which
//! owns the back-reference registry that keeps them safe to invalidate.

use std::sync::Arc;

use crate::item_def::ItemDef;
use crate::manager::AttrKey;
use crate::value::{ValueDef, ValueScalar};

/// State of one value slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Unset,
    Literal(T),
    Discrete(usize),
    Expression(AttrKey),
}

/// Value slots for the Double/Int/String variants.
#[derive(Debug, Clone)]
pub struct ValueItem<T> {
    pub(crate) slots: Vec<Slot<T>>,
}

impl<T: ValueScalar> ValueItem<T> {
    fn set_literal(&mut self, def: &ValueDef<T>, i: usize, v: T) -> bool {
        if i >= self.slots.len() || !def.is_value_valid(&v) {
            return false;
        }
        // An expression slot is registered with the manager; it must be
        // cleared there before a literal can take its place.
        if matches!(self.slots[i], Slot::Expression(_)) {
            return false;
        }
        // A valid literal that appears in the discrete table is stored
        // as its table index, keeping the discrete state canonical.
        self.slots[i] = match def.discrete_index_of(&v) {
            Some(n) => Slot::Discrete(n),
            None => Slot::Literal(v),
        };
        true
    }

    fn set_discrete(&mut self, def: &ValueDef<T>, i: usize, ndx: usize) -> bool {
        if i >= self.slots.len() || ndx >= def.discrete().len() {
            return false;
        }
        if matches!(self.slots[i], Slot::Expression(_)) {
            return false;
        }
        self.slots[i] = Slot::Discrete(ndx);
        true
    }

    fn value(&self, def: &ValueDef<T>, i: usize) -> Option<T> {
        match self.slots.get(i)? {
            Slot::Literal(v) => Some(v.clone()),
            Slot::Discrete(n) => def.discrete().get(*n).map(|e| e.value.clone()),
            _ => None,
        }
    }

    fn append(&mut self, def: &ValueDef<T>) -> bool {
        if def.required_count != 0 {
            return false;
        }
        self.slots.push(Slot::Unset);
        true
    }

    fn remove(&mut self, def: &ValueDef<T>, i: usize) -> bool {
        if def.required_count != 0 || i >= self.slots.len() {
            return false;
        }
        self.slots.remove(i);
        true
    }
}

/// Entries of a group item: one full child-item list per repetition.
#[derive(Debug, Clone)]
pub struct GroupItem {
    pub(crate) entries: Vec<Vec<Item>>,
}

/// Slots for file/directory items.
#[derive(Debug, Clone)]
pub struct PathItem {
    pub(crate) slots: Vec<Option<String>>,
}

/// Slots for attribute-reference items.
#[derive(Debug, Clone)]
pub struct RefItem {
    pub(crate) slots: Vec<Option<AttrKey>>,
}

/// A void item carries no value; only the enable toggle matters.
#[derive(Debug, Clone)]
pub struct VoidItem;

#[derive(Debug, Clone)]
pub enum ItemKind {
    Double(ValueItem<f64>),
    Int(ValueItem<i64>),
    String(ValueItem<std::string::String>),
    Group(GroupItem),
    Directory(PathItem),
    File(PathItem),
    AttributeRef(RefItem),
    Void(VoidItem),
}

/// Names one item inside an attribute: the top-level index plus a
/// (group entry, child index) step per nesting level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemAddress {
    pub top: usize,
    pub steps: Vec<(usize, usize)>,
}

impl ItemAddress {
    pub fn top_level(top: usize) -> Self {
        ItemAddress { top, steps: Vec::new() }
    }

    pub fn into_group(mut self, entry: usize, child: usize) -> Self {
        self.steps.push((entry, child));
        self
    }
}

/// Runtime counterpart of an `ItemDef`.
#[derive(Debug, Clone)]
pub struct Item {
    def: Arc<ItemDef>,
    enabled: bool,
    pub(crate) kind: ItemKind,
}

impl Item {
    pub(crate) fn new(def: Arc<ItemDef>, kind: ItemKind) -> Self {
        let enabled = if def.optional { def.enabled_by_default } else { true };
        Item { def, enabled, kind }
    }

    pub fn definition(&self) -> &Arc<ItemDef> {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle an optional (or void) item. Non-optional value items are
    /// always enabled and reject the call.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if !self.def.optional && !matches!(self.kind, ItemKind::Void(_)) {
            return false;
        }
        self.enabled = enabled;
        true
    }

    /// Number of value slots. Groups report 0 here; see
    /// [`Item::number_of_groups`].
    pub fn number_of_values(&self) -> usize {
        match &self.kind {
            ItemKind::Double(v) => v.slots.len(),
            ItemKind::Int(v) => v.slots.len(),
            ItemKind::String(v) => v.slots.len(),
            ItemKind::Directory(p) | ItemKind::File(p) => p.slots.len(),
            ItemKind::AttributeRef(r) => r.slots.len(),
            ItemKind::Group(_) | ItemKind::Void(_) => 0,
        }
    }

    pub fn is_set(&self, i: usize) -> bool {
        match &self.kind {
            ItemKind::Double(v) => !matches!(v.slots.get(i), None | Some(Slot::Unset)),
            ItemKind::Int(v) => !matches!(v.slots.get(i), None | Some(Slot::Unset)),
            ItemKind::String(v) => !matches!(v.slots.get(i), None | Some(Slot::Unset)),
            ItemKind::Directory(p) | ItemKind::File(p) => {
                matches!(p.slots.get(i), Some(Some(_)))
            }
            ItemKind::AttributeRef(r) => matches!(r.slots.get(i), Some(Some(_))),
            ItemKind::Group(_) | ItemKind::Void(_) => false,
        }
    }

    /// Clear slot `i` back to unset. Expression and reference slots
    /// must be cleared through the `Manager` so the back-reference
    /// registry stays consistent; this method refuses them.
    pub fn unset(&mut self, i: usize) -> bool {
        if self.slot_is_linked(i) {
            return false;
        }
        self.clear_slot(i)
    }

    /// True iff slot `i` holds a manager-registered link (expression or
    /// attribute reference).
    fn slot_is_linked(&self, i: usize) -> bool {
        self.expression(i).is_some() || self.reference(i).is_some()
    }

    /// True iff any slot of this item, or of any nested group child,
    /// holds a manager-registered link.
    fn subtree_has_links(&self) -> bool {
        match &self.kind {
            ItemKind::Group(g) => g
                .entries
                .iter()
                .flatten()
                .any(|child| child.subtree_has_links()),
            _ => (0..self.number_of_values()).any(|i| self.slot_is_linked(i)),
        }
    }

    /// Unconditional slot clear, used by the manager during reference
    /// invalidation.
    pub(crate) fn clear_slot(&mut self, i: usize) -> bool {
        match &mut self.kind {
            ItemKind::Double(v) if i < v.slots.len() => {
                v.slots[i] = Slot::Unset;
                true
            }
            ItemKind::Int(v) if i < v.slots.len() => {
                v.slots[i] = Slot::Unset;
                true
            }
            ItemKind::String(v) if i < v.slots.len() => {
                v.slots[i] = Slot::Unset;
                true
            }
            ItemKind::Directory(p) | ItemKind::File(p) if i < p.slots.len() => {
                p.slots[i] = None;
                true
            }
            ItemKind::AttributeRef(r) if i < r.slots.len() => {
                r.slots[i] = None;
                true
            }
            _ => false,
        }
    }

    // ── literal values ───────────────────────────────────────────

    pub fn set_double(&mut self, i: usize, v: f64) -> bool {
        match (&mut self.kind, self.def.double_def()) {
            (ItemKind::Double(item), Some(def)) => item.set_literal(def, i, v),
            _ => false,
        }
    }

    pub fn set_int(&mut self, i: usize, v: i64) -> bool {
        match (&mut self.kind, self.def.int_def()) {
            (ItemKind::Int(item), Some(def)) => item.set_literal(def, i, v),
            _ => false,
        }
    }

    pub fn set_string(&mut self, i: usize, v: impl Into<String>) -> bool {
        match (&mut self.kind, self.def.string_def()) {
            (ItemKind::String(item), Some(def)) => item.set_literal(def, i, v.into()),
            _ => false,
        }
    }

    pub fn double_value(&self, i: usize) -> Option<f64> {
        match (&self.kind, self.def.double_def()) {
            (ItemKind::Double(item), Some(def)) => item.value(def, i),
            _ => None,
        }
    }

    pub fn int_value(&self, i: usize) -> Option<i64> {
        match (&self.kind, self.def.int_def()) {
            (ItemKind::Int(item), Some(def)) => item.value(def, i),
            _ => None,
        }
    }

    pub fn string_value(&self, i: usize) -> Option<String> {
        match (&self.kind, self.def.string_def()) {
            (ItemKind::String(item), Some(def)) => item.value(def, i),
            _ => None,
        }
    }

    // ── discrete state ───────────────────────────────────────────

    pub fn set_discrete_index(&mut self, i: usize, ndx: usize) -> bool {
        match &mut self.kind {
            ItemKind::Double(item) => match self.def.double_def() {
                Some(def) => item.set_discrete(def, i, ndx),
                None => false,
            },
            ItemKind::Int(item) => match self.def.int_def() {
                Some(def) => item.set_discrete(def, i, ndx),
                None => false,
            },
            ItemKind::String(item) => match self.def.string_def() {
                Some(def) => item.set_discrete(def, i, ndx),
                None => false,
            },
            _ => false,
        }
    }

    pub fn discrete_index(&self, i: usize) -> Option<usize> {
        match &self.kind {
            ItemKind::Double(v) => match v.slots.get(i)? {
                Slot::Discrete(n) => Some(*n),
                _ => None,
            },
            ItemKind::Int(v) => match v.slots.get(i)? {
                Slot::Discrete(n) => Some(*n),
                _ => None,
            },
            ItemKind::String(v) => match v.slots.get(i)? {
                Slot::Discrete(n) => Some(*n),
                _ => None,
            },
            _ => None,
        }
    }

    // ── expressions ──────────────────────────────────────────────

    /// Target attribute of an expression slot, if slot `i` holds one.
    pub fn expression(&self, i: usize) -> Option<AttrKey> {
        match &self.kind {
            ItemKind::Double(v) => match v.slots.get(i)? {
                Slot::Expression(k) => Some(*k),
                _ => None,
            },
            ItemKind::Int(v) => match v.slots.get(i)? {
                Slot::Expression(k) => Some(*k),
                _ => None,
            },
            ItemKind::String(v) => match v.slots.get(i)? {
                Slot::Expression(k) => Some(*k),
                _ => None,
            },
            _ => None,
        }
    }

    /// Raw expression write; validation and registry bookkeeping live in
    /// `Manager::set_expression`.
    pub(crate) fn set_expression_slot(&mut self, i: usize, target: AttrKey) -> bool {
        match &mut self.kind {
            ItemKind::Double(v) if i < v.slots.len() => {
                v.slots[i] = Slot::Expression(target);
                true
            }
            ItemKind::Int(v) if i < v.slots.len() => {
                v.slots[i] = Slot::Expression(target);
                true
            }
            ItemKind::String(v) if i < v.slots.len() => {
                v.slots[i] = Slot::Expression(target);
                true
            }
            _ => false,
        }
    }

    // ── attribute references ─────────────────────────────────────

    pub fn reference(&self, i: usize) -> Option<AttrKey> {
        match &self.kind {
            ItemKind::AttributeRef(r) => r.slots.get(i).copied().flatten(),
            _ => None,
        }
    }

    pub(crate) fn set_reference_slot(&mut self, i: usize, target: AttrKey) -> bool {
        match &mut self.kind {
            ItemKind::AttributeRef(r) if i < r.slots.len() => {
                r.slots[i] = Some(target);
                true
            }
            _ => false,
        }
    }

    // ── paths ────────────────────────────────────────────────────

    pub fn set_path(&mut self, i: usize, v: impl Into<String>) -> bool {
        match &mut self.kind {
            ItemKind::Directory(p) | ItemKind::File(p) if i < p.slots.len() => {
                p.slots[i] = Some(v.into());
                true
            }
            _ => false,
        }
    }

    pub fn path(&self, i: usize) -> Option<&str> {
        match &self.kind {
            ItemKind::Directory(p) | ItemKind::File(p) => {
                p.slots.get(i).and_then(|s| s.as_deref())
            }
            _ => None,
        }
    }

    // ── string surface for the GUI/codec ─────────────────────────

    /// Stringified value of slot `i`. Expression and reference slots
    /// resolve through the manager (the target name is not known here).
    pub fn value_as_string(&self, i: usize) -> Option<String> {
        match &self.kind {
            ItemKind::Double(_) => self.double_value(i).map(|v| v.to_string()),
            ItemKind::Int(_) => self.int_value(i).map(|v| v.to_string()),
            ItemKind::String(_) => self.string_value(i),
            ItemKind::Directory(_) | ItemKind::File(_) => self.path(i).map(str::to_string),
            ItemKind::AttributeRef(_) | ItemKind::Group(_) | ItemKind::Void(_) => None,
        }
    }

    /// Parse-and-set for slot `i`; the usual entry point for the codec
    /// and widget layers.
    pub fn set_value_from_string(&mut self, i: usize, s: &str) -> bool {
        match &self.kind {
            ItemKind::Double(_) => match s.parse::<f64>() {
                Ok(v) => self.set_double(i, v),
                Err(_) => false,
            },
            ItemKind::Int(_) => match s.parse::<i64>() {
                Ok(v) => self.set_int(i, v),
                Err(_) => false,
            },
            ItemKind::String(_) => self.set_string(i, s),
            ItemKind::Directory(_) | ItemKind::File(_) => self.set_path(i, s),
            ItemKind::AttributeRef(_) | ItemKind::Group(_) | ItemKind::Void(_) => false,
        }
    }

    // ── resizing ─────────────────────────────────────────────────

    /// Append one unset slot. Rejected for fixed-size items.
    pub fn append_value(&mut self) -> bool {
        match &mut self.kind {
            ItemKind::Double(item) => match self.def.double_def() {
                Some(def) => item.append(def),
                None => false,
            },
            ItemKind::Int(item) => match self.def.int_def() {
                Some(def) => item.append(def),
                None => false,
            },
            ItemKind::String(item) => match self.def.string_def() {
                Some(def) => item.append(def),
                None => false,
            },
            ItemKind::Directory(p) | ItemKind::File(p) => match self.def.path_def() {
                Some(def) if def.required_count == 0 => {
                    p.slots.push(None);
                    true
                }
                _ => false,
            },
            ItemKind::AttributeRef(r) => match self.def.ref_def() {
                Some(def) if def.required_count == 0 => {
                    r.slots.push(None);
                    true
                }
                _ => false,
            },
            ItemKind::Group(_) | ItemKind::Void(_) => false,
        }
    }

    /// Resize to exactly `n` slots. Rejected for fixed-size items, and
    /// when shrinking would drop a slot holding an expression or
    /// reference.
    pub fn set_number_of_values(&mut self, n: usize) -> bool {
        let current = self.number_of_values();
        if current == n {
            return !matches!(self.kind, ItemKind::Group(_) | ItemKind::Void(_));
        }
        if n > current {
            return (current..n).all(|_| self.append_value());
        }
        if (n..current).any(|i| self.slot_is_linked(i)) {
            return false;
        }
        (n..current).all(|_| self.remove_value(n))
    }

    /// Remove slot `i`. Rejected for fixed-size items, and whenever
    /// slot `i` or any later slot holds an expression or reference:
    /// removal would shift the later slots under their registered
    /// indices, so such links must be cleared through the manager
    /// first.
    pub fn remove_value(&mut self, i: usize) -> bool {
        if (i..self.number_of_values()).any(|j| self.slot_is_linked(j)) {
            return false;
        }
        match &mut self.kind {
            ItemKind::Double(item) => match self.def.double_def() {
                Some(def) => item.remove(def, i),
                None => false,
            },
            ItemKind::Int(item) => match self.def.int_def() {
                Some(def) => item.remove(def, i),
                None => false,
            },
            ItemKind::String(item) => match self.def.string_def() {
                Some(def) => item.remove(def, i),
                None => false,
            },
            ItemKind::Directory(p) | ItemKind::File(p) => match self.def.path_def() {
                Some(def) if def.required_count == 0 && i < p.slots.len() => {
                    p.slots.remove(i);
                    true
                }
                _ => false,
            },
            ItemKind::AttributeRef(r) => match self.def.ref_def() {
                Some(def) if def.required_count == 0 && i < r.slots.len() => {
                    r.slots.remove(i);
                    true
                }
                _ => false,
            },
            ItemKind::Group(_) | ItemKind::Void(_) => false,
        }
    }

    // ── groups ───────────────────────────────────────────────────

    pub fn number_of_groups(&self) -> usize {
        match &self.kind {
            ItemKind::Group(g) => g.entries.len(),
            _ => 0,
        }
    }

    pub fn group_item(&self, entry: usize, child: usize) -> Option<&Item> {
        match &self.kind {
            ItemKind::Group(g) => g.entries.get(entry)?.get(child),
            _ => None,
        }
    }

    pub fn group_item_mut(&mut self, entry: usize, child: usize) -> Option<&mut Item> {
        match &mut self.kind {
            ItemKind::Group(g) => g.entries.get_mut(entry)?.get_mut(child),
            _ => None,
        }
    }

    pub fn find_group_item(&self, entry: usize, name: &str) -> Option<&Item> {
        match &self.kind {
            ItemKind::Group(g) => g.entries.get(entry)?.iter().find(|i| i.name() == name),
            _ => None,
        }
    }

    /// Append one whole group entry; only when the group is unbounded.
    pub fn append_group(&mut self) -> bool {
        let def = match self.def.group_def() {
            Some(d) if d.required_groups == 0 => d.clone(),
            _ => return false,
        };
        match &mut self.kind {
            ItemKind::Group(g) => {
                g.entries.push(def.build_entry());
                true
            }
            _ => false,
        }
    }

    /// Remove one whole group entry; only when the group is unbounded.
    /// Rejected while the entry, or any later entry, contains an
    /// expression or reference slot: removal would drop or re-index a
    /// registered link, so such links must be cleared through the
    /// manager first.
    pub fn remove_group(&mut self, entry: usize) -> bool {
        match (&mut self.kind, self.def.group_def()) {
            (ItemKind::Group(g), Some(def))
                if def.required_groups == 0 && entry < g.entries.len() =>
            {
                let pinned = g.entries[entry..]
                    .iter()
                    .flatten()
                    .any(|child| child.subtree_has_links());
                if pinned {
                    return false;
                }
                g.entries.remove(entry);
                true
            }
            _ => false,
        }
    }

    /// Follow (entry, child) steps through nested groups.
    pub fn descend(&self, steps: &[(usize, usize)]) -> Option<&Item> {
        match steps.split_first() {
            None => Some(self),
            Some(((entry, child), rest)) => self.group_item(*entry, *child)?.descend(rest),
        }
    }

    pub fn descend_mut(&mut self, steps: &[(usize, usize)]) -> Option<&mut Item> {
        match steps.split_first() {
            None => Some(self),
            Some(((entry, child), rest)) => {
                self.group_item_mut(*entry, *child)?.descend_mut(rest)
            }
        }
    }
}
