//! Item definitions — the static schema for one named slot of a definition.
//!
//! A closed variant set covers every item kind the engine knows; there is
//! no downcasting anywhere, every consumer matches `ItemDefKind`
//! exhaustively.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::EngineError;
use crate::item::{Item, ItemKind, PathItem, RefItem, Slot, ValueItem, VoidItem};
use crate::manager::DefKey;
use crate::value::{ValueDef, ValueScalar};

/// Schema for a group item: an ordered child list plus a repetition count.
#[derive(Debug, Clone, Default)]
pub struct GroupDef {
    /// Number of group entries an item starts with; 0 means the entry
    /// list is unbounded and grows/shrinks at runtime.
    pub required_groups: usize,
    children: Vec<Arc<ItemDef>>,
    index: HashMap<String, usize>,
}

impl GroupDef {
    pub fn children(&self) -> &[Arc<ItemDef>] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Arc<ItemDef>> {
        self.index.get(name).map(|i| &self.children[*i])
    }

    fn add_child(&mut self, owner: &str, child: ItemDef) -> Result<(), EngineError> {
        if self.index.contains_key(&child.name) {
            return Err(EngineError::DuplicateItem {
                definition: owner.to_string(),
                item: child.name,
            });
        }
        self.index.insert(child.name.clone(), self.children.len());
        self.children.push(Arc::new(child));
        Ok(())
    }

    /// One full copy of the child list, instantiated.
    pub(crate) fn build_entry(&self) -> Vec<Item> {
        self.children.iter().map(|c| c.build_item()).collect()
    }
}

/// Schema for file/directory items.
#[derive(Debug, Clone)]
pub struct PathDef {
    pub required_count: usize,
    pub default: Option<String>,
    pub should_exist: bool,
}

impl Default for PathDef {
    fn default() -> Self {
        PathDef {
            required_count: 1,
            default: None,
            should_exist: false,
        }
    }
}

/// Schema for an attribute-reference item.
#[derive(Debug, Clone)]
pub struct RefDef {
    pub required_count: usize,
    /// A candidate attribute is valid iff its definition `is_a` this
    /// target; with no target set, anything is valid.
    pub target_def: Option<DefKey>,
}

impl Default for RefDef {
    fn default() -> Self {
        RefDef {
            required_count: 1,
            target_def: None,
        }
    }
}

/// The closed set of item kinds.
#[derive(Debug, Clone)]
pub enum ItemDefKind {
    Double(ValueDef<f64>),
    Int(ValueDef<i64>),
    String(ValueDef<std::string::String>),
    Group(GroupDef),
    Directory(PathDef),
    File(PathDef),
    AttributeRef(RefDef),
    Void,
}

/// Static description of one named slot of a definition.
#[derive(Debug, Clone)]
pub struct ItemDef {
    pub name: String,
    pub label: Option<String>,
    pub version: u32,
    pub optional: bool,
    pub enabled_by_default: bool,
    pub advance_level: u32,
    pub categories: BTreeSet<String>,
    pub brief_description: String,
    pub detailed_description: String,
    pub kind: ItemDefKind,
}

impl ItemDef {
    fn new(name: impl Into<String>, kind: ItemDefKind) -> Self {
        ItemDef {
            name: name.into(),
            label: None,
            version: 0,
            optional: false,
            enabled_by_default: true,
            advance_level: 0,
            categories: BTreeSet::new(),
            brief_description: String::new(),
            detailed_description: String::new(),
            kind,
        }
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::Double(ValueDef::default()))
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::Int(ValueDef::default()))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::String(ValueDef::default()))
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ItemDefKind::Group(GroupDef {
                required_groups: 1,
                ..GroupDef::default()
            }),
        )
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::Directory(PathDef::default()))
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::File(PathDef::default()))
    }

    pub fn attribute_ref(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::AttributeRef(RefDef::default()))
    }

    pub fn void(name: impl Into<String>) -> Self {
        Self::new(name, ItemDefKind::Void)
    }

    /// XML tag / kind name.
    pub fn type_tag(&self) -> &'static str {
        match &self.kind {
            ItemDefKind::Double(_) => "Double",
            ItemDefKind::Int(_) => "Int",
            ItemDefKind::String(_) => "String",
            ItemDefKind::Group(_) => "Group",
            ItemDefKind::Directory(_) => "Directory",
            ItemDefKind::File(_) => "File",
            ItemDefKind::AttributeRef(_) => "AttributeRef",
            ItemDefKind::Void => "Void",
        }
    }

    // ── typed accessors ──────────────────────────────────────────

    pub fn double_def(&self) -> Option<&ValueDef<f64>> {
        match &self.kind {
            ItemDefKind::Double(d) => Some(d),
            _ => None,
        }
    }

    pub fn double_def_mut(&mut self) -> Option<&mut ValueDef<f64>> {
        match &mut self.kind {
            ItemDefKind::Double(d) => Some(d),
            _ => None,
        }
    }

    pub fn int_def(&self) -> Option<&ValueDef<i64>> {
        match &self.kind {
            ItemDefKind::Int(d) => Some(d),
            _ => None,
        }
    }

    pub fn int_def_mut(&mut self) -> Option<&mut ValueDef<i64>> {
        match &mut self.kind {
            ItemDefKind::Int(d) => Some(d),
            _ => None,
        }
    }

    pub fn string_def(&self) -> Option<&ValueDef<String>> {
        match &self.kind {
            ItemDefKind::String(d) => Some(d),
            _ => None,
        }
    }

    pub fn string_def_mut(&mut self) -> Option<&mut ValueDef<String>> {
        match &mut self.kind {
            ItemDefKind::String(d) => Some(d),
            _ => None,
        }
    }

    pub fn group_def(&self) -> Option<&GroupDef> {
        match &self.kind {
            ItemDefKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn group_def_mut(&mut self) -> Option<&mut GroupDef> {
        match &mut self.kind {
            ItemDefKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn path_def(&self) -> Option<&PathDef> {
        match &self.kind {
            ItemDefKind::Directory(p) | ItemDefKind::File(p) => Some(p),
            _ => None,
        }
    }

    pub fn path_def_mut(&mut self) -> Option<&mut PathDef> {
        match &mut self.kind {
            ItemDefKind::Directory(p) | ItemDefKind::File(p) => Some(p),
            _ => None,
        }
    }

    pub fn ref_def(&self) -> Option<&RefDef> {
        match &self.kind {
            ItemDefKind::AttributeRef(r) => Some(r),
            _ => None,
        }
    }

    pub fn ref_def_mut(&mut self) -> Option<&mut RefDef> {
        match &mut self.kind {
            ItemDefKind::AttributeRef(r) => Some(r),
            _ => None,
        }
    }

    /// The definition this item's expression values must `is_a`, if
    /// expressions are allowed at all.
    pub fn expression_def(&self) -> Option<DefKey> {
        match &self.kind {
            ItemDefKind::Double(d) => d.expr_def,
            ItemDefKind::Int(d) => d.expr_def,
            ItemDefKind::String(d) => d.expr_def,
            _ => None,
        }
    }

    /// Add a child to a group item definition. Child names must be
    /// unique within the group; calling this on a non-group kind fails.
    pub fn add_group_child(&mut self, child: ItemDef) -> Result<(), EngineError> {
        let owner = self.name.clone();
        match &mut self.kind {
            ItemDefKind::Group(g) => g.add_child(&owner, child),
            _ => Err(EngineError::DuplicateItem {
                definition: owner,
                item: child.name,
            }),
        }
    }

    /// Union of this item's categories and, recursively, any group
    /// children's categories.
    pub fn collect_categories(&self, out: &mut BTreeSet<String>) {
        out.extend(self.categories.iter().cloned());
        if let ItemDefKind::Group(g) = &self.kind {
            for c in g.children() {
                c.collect_categories(out);
            }
        }
    }

    /// Factory: instantiate the runtime counterpart. Pure allocation,
    /// defaults applied, no side effects.
    pub fn build_item(self: &Arc<Self>) -> Item {
        let kind = match &self.kind {
            ItemDefKind::Double(d) => ItemKind::Double(build_value_item(d)),
            ItemDefKind::Int(d) => ItemKind::Int(build_value_item(d)),
            ItemDefKind::String(d) => ItemKind::String(build_value_item(d)),
            ItemDefKind::Group(g) => ItemKind::Group(crate::item::GroupItem {
                entries: (0..g.required_groups).map(|_| g.build_entry()).collect(),
            }),
            ItemDefKind::Directory(p) | ItemDefKind::File(p) => {
                let is_dir = matches!(self.kind, ItemDefKind::Directory(_));
                let item = PathItem {
                    slots: vec![p.default.clone(); p.required_count],
                };
                if is_dir {
                    ItemKind::Directory(item)
                } else {
                    ItemKind::File(item)
                }
            }
            ItemDefKind::AttributeRef(r) => ItemKind::AttributeRef(RefItem {
                slots: vec![None; r.required_count],
            }),
            ItemDefKind::Void => ItemKind::Void(VoidItem),
        };
        Item::new(Arc::clone(self), kind)
    }
}

fn build_value_item<T: ValueScalar>(def: &ValueDef<T>) -> ValueItem<T> {
    let initial = if def.is_discrete() {
        match def.default_discrete_index {
            Some(i) if i < def.discrete().len() => Slot::Discrete(i),
            _ => Slot::Unset,
        }
    } else {
        match &def.default {
            Some(v) => Slot::Literal(v.clone()),
            None => Slot::Unset,
        }
    };
    ValueItem {
        slots: vec![initial; def.required_count],
    }
}
