//! Manager → XML serialization.
//!
//! Output is fully deterministic: base definitions precede their
//! subtypes (depth-first through the derived sets, roots in creation
//! order), attributes are ordered by id, entity sets and category sets
//! are sorted, and only non-default schema fields are spelled out. Two
//! writes of the same manager produce identical bytes.

use std::path::Path;

use tracing::debug;

use crate::attribute::Attribute;
use crate::error::EngineError;
use crate::item::{Item, ItemKind};
use crate::item_def::{ItemDef, ItemDefKind, PathDef, RefDef};
use crate::manager::Manager;
use crate::value::{ValueDef, ValueScalar};
use crate::xml::dom::{self, Element};

pub const ROOT_TAG: &str = "SimAttributeSystem";
pub const FORMAT_VERSION: &str = "1";

/// Serialize the whole manager to an XML string.
pub fn write_to_string(manager: &Manager) -> Result<String, EngineError> {
    dom::to_string(&document(manager))
}

/// Serialize the whole manager to a file.
pub fn write_to_file(manager: &Manager, path: impl AsRef<Path>) -> Result<(), EngineError> {
    let text = write_to_string(manager)?;
    std::fs::write(path.as_ref(), text)?;
    debug!(path = %path.as_ref().display(), "attribute system written");
    Ok(())
}

fn document(manager: &Manager) -> Element {
    let mut root = Element::new(ROOT_TAG);
    root.set_attr("Version", FORMAT_VERSION);

    if !manager.categories().is_empty() {
        let mut cats = Element::new("Categories");
        for c in manager.categories() {
            cats.add_text_child("Cat", c);
        }
        root.add_child(cats);
    }

    if !manager.analyses().is_empty() {
        let mut analyses = Element::new("Analyses");
        for (name, cats) in manager.analyses() {
            let mut analysis = Element::new("Analysis");
            analysis.set_attr("Type", name);
            for c in cats {
                analysis.add_text_child("Cat", c);
            }
            analyses.add_child(analysis);
        }
        root.add_child(analyses);
    }

    if manager.number_of_definitions() > 0 {
        let mut defs = Element::new("Definitions");
        // Depth-first from the roots keeps every base ahead of its
        // subtypes, which the reader's first pass relies on.
        let mut stack: Vec<_> = manager.find_base_definitions().iter().rev().copied().collect();
        while let Some(key) = stack.pop() {
            if let Some(def) = manager.definition(key) {
                defs.add_child(definition_element(manager, def));
            }
            stack.extend(manager.derived_definitions(key).iter().rev().copied());
        }
        root.add_child(defs);
    }

    if manager.number_of_attributes() > 0 {
        let mut atts = Element::new("Attributes");
        let mut ordered: Vec<&Attribute> = manager.attributes().collect();
        ordered.sort_by_key(|a| a.id());
        for attr in ordered {
            atts.add_child(attribute_element(manager, attr));
        }
        root.add_child(atts);
    }

    if !manager.sections().is_empty() {
        let mut sections = Element::new("Sections");
        for s in manager.sections() {
            sections.add_child(s.clone());
        }
        root.add_child(sections);
    }

    root
}

// ── definitions ──────────────────────────────────────────────────

fn definition_element(manager: &Manager, def: &crate::definition::Definition) -> Element {
    let mut e = Element::new("AttDef");
    e.set_attr("Type", def.type_name());
    if let Some(base) = def.base().and_then(|b| manager.definition(b)) {
        e.set_attr("BaseType", base.type_name());
    }
    if let Some(label) = &def.label {
        e.set_attr("Label", label);
    }
    if def.version != 0 {
        e.set_attr("Version", def.version.to_string());
    }
    if def.is_abstract {
        e.set_attr("Abstract", "true");
    }
    if def.is_unique {
        e.set_attr("Unique", "true");
    }
    if def.is_nodal {
        e.set_attr("Nodal", "true");
    }
    if !def.associations.is_empty() {
        e.set_attr("Associations", def.associations.to_letters());
    }
    if !def.brief_description.is_empty() {
        e.add_text_child("BriefDescription", &def.brief_description);
    }
    if !def.detailed_description.is_empty() {
        e.add_text_child("DetailedDescription", &def.detailed_description);
    }
    if !def.item_definitions().is_empty() {
        let mut items = Element::new("ItemDefinitions");
        for item in def.item_definitions() {
            items.add_child(item_def_element(manager, item));
        }
        e.add_child(items);
    }
    e
}

fn item_def_element(manager: &Manager, def: &ItemDef) -> Element {
    let mut e = Element::new(def.type_tag());
    e.set_attr("Name", &def.name);
    if let Some(label) = &def.label {
        e.set_attr("Label", label);
    }
    if def.version != 0 {
        e.set_attr("Version", def.version.to_string());
    }
    if def.optional {
        e.set_attr("Optional", "true");
        if !def.enabled_by_default {
            e.set_attr("IsEnabledByDefault", "false");
        }
    }
    if def.advance_level != 0 {
        e.set_attr("AdvanceLevel", def.advance_level.to_string());
    }

    match &def.kind {
        ItemDefKind::Double(v) => value_def_into(manager, v, &mut e),
        ItemDefKind::Int(v) => value_def_into(manager, v, &mut e),
        ItemDefKind::String(v) => value_def_into(manager, v, &mut e),
        ItemDefKind::Group(g) => {
            if g.required_groups != 1 {
                e.set_attr("NumberOfRequiredGroups", g.required_groups.to_string());
            }
            if !g.children().is_empty() {
                let mut children = Element::new("ItemDefinitions");
                for child in g.children() {
                    children.add_child(item_def_element(manager, child));
                }
                e.add_child(children);
            }
        }
        ItemDefKind::Directory(p) | ItemDefKind::File(p) => path_def_into(p, &mut e),
        ItemDefKind::AttributeRef(r) => ref_def_into(manager, r, &mut e),
        ItemDefKind::Void => {}
    }

    if !def.categories.is_empty() {
        let mut cats = Element::new("Categories");
        for c in &def.categories {
            cats.add_text_child("Cat", c);
        }
        e.add_child(cats);
    }
    if !def.brief_description.is_empty() {
        e.add_text_child("BriefDescription", &def.brief_description);
    }
    if !def.detailed_description.is_empty() {
        e.add_text_child("DetailedDescription", &def.detailed_description);
    }
    e
}

fn value_def_into<T: ValueScalar>(manager: &Manager, def: &ValueDef<T>, e: &mut Element) {
    if def.required_count != 1 {
        e.set_attr("NumberOfRequiredValues", def.required_count.to_string());
    }
    if let Some(units) = &def.units {
        e.set_attr("Units", units);
    }
    if let Some(expr) = def.expr_def.and_then(|k| manager.definition(k)) {
        e.add_text_child("ExpressionType", expr.type_name());
    }
    if def.is_discrete() {
        let mut discrete = Element::new("DiscreteInfo");
        if let Some(i) = def.default_discrete_index {
            discrete.set_attr("DefaultIndex", i.to_string());
        }
        for entry in def.discrete() {
            let mut value = Element::new("Value");
            value.set_attr("Enum", &entry.label);
            value.add_text(entry.value.to_string());
            discrete.add_child(value);
        }
        e.add_child(discrete);
    } else {
        if let Some(default) = &def.default {
            e.add_text_child("DefaultValue", default.to_string());
        }
        if let Some(range) = def.range() {
            let mut info = Element::new("RangeInfo");
            if let Some(min) = &range.min {
                let mut m = Element::new("Min");
                m.set_attr("Inclusive", if min.inclusive { "true" } else { "false" });
                m.add_text(min.value.to_string());
                info.add_child(m);
            }
            if let Some(max) = &range.max {
                let mut m = Element::new("Max");
                m.set_attr("Inclusive", if max.inclusive { "true" } else { "false" });
                m.add_text(max.value.to_string());
                info.add_child(m);
            }
            e.add_child(info);
        }
    }
}

fn path_def_into(def: &PathDef, e: &mut Element) {
    if def.required_count != 1 {
        e.set_attr("NumberOfRequiredValues", def.required_count.to_string());
    }
    if def.should_exist {
        e.set_attr("ShouldExist", "true");
    }
    if let Some(default) = &def.default {
        e.add_text_child("DefaultValue", default);
    }
}

fn ref_def_into(manager: &Manager, def: &RefDef, e: &mut Element) {
    if def.required_count != 1 {
        e.set_attr("NumberOfRequiredValues", def.required_count.to_string());
    }
    if let Some(target) = def.target_def.and_then(|k| manager.definition(k)) {
        e.set_attr("AttDef", target.type_name());
    }
}

// ── attributes ───────────────────────────────────────────────────

fn attribute_element(manager: &Manager, attr: &Attribute) -> Element {
    let mut e = Element::new("Att");
    e.set_attr("Name", attr.name());
    if let Some(def) = manager.definition(attr.definition()) {
        e.set_attr("Type", def.type_name());
    }
    e.set_attr("ID", attr.id().to_string());

    if attr.number_of_items() > 0 {
        let mut items = Element::new("Items");
        for item in attr.items() {
            items.add_child(item_element(manager, item));
        }
        e.add_child(items);
    }

    if !attr.entities().is_empty() {
        let mut assoc = Element::new("Associations");
        for entity in attr.entities() {
            assoc.add_text_child("Entity", entity);
        }
        e.add_child(assoc);
    }
    e
}

fn item_element(manager: &Manager, item: &Item) -> Element {
    let mut e = Element::new(item.definition().type_tag());
    e.set_attr("Name", item.name());

    // The enable flag is written only when it differs from the state a
    // fresh item starts in.
    let built_enabled = if item.definition().optional {
        item.definition().enabled_by_default
    } else {
        true
    };
    if item.is_enabled() != built_enabled {
        e.set_attr("Enabled", if item.is_enabled() { "true" } else { "false" });
    }

    match &item.kind {
        ItemKind::Double(_) | ItemKind::Int(_) | ItemKind::String(_) => {
            e.add_child(values_element(manager, item));
        }
        ItemKind::Directory(_) | ItemKind::File(_) | ItemKind::AttributeRef(_) => {
            e.add_child(values_element(manager, item));
        }
        ItemKind::Group(g) => {
            for (n, entry) in g.entries.iter().enumerate() {
                let mut ge = Element::new("GroupEntry");
                ge.set_attr("Ith", n.to_string());
                for child in entry {
                    ge.add_child(item_element(manager, child));
                }
                e.add_child(ge);
            }
        }
        ItemKind::Void(_) => {}
    }
    e
}

fn values_element(manager: &Manager, item: &Item) -> Element {
    let mut values = Element::new("Values");
    values.set_attr("NumberOfValues", item.number_of_values().to_string());
    for i in 0..item.number_of_values() {
        values.add_child(slot_element(manager, item, i));
    }
    values
}

fn slot_element(manager: &Manager, item: &Item, i: usize) -> Element {
    let ith = i.to_string();
    if let Some(target) = item.expression(i) {
        let mut e = Element::new("Expression");
        e.set_attr("Ith", ith);
        if let Some(target) = manager.attribute(target) {
            e.set_attr("Name", target.name());
        }
        return e;
    }
    if let Some(ndx) = item.discrete_index(i) {
        let mut e = Element::new("DiscreteIndex");
        e.set_attr("Ith", ith);
        e.add_text(ndx.to_string());
        return e;
    }
    if let ItemKind::AttributeRef(_) = &item.kind {
        if let Some(target) = item.reference(i).and_then(|k| manager.attribute(k)) {
            let mut e = Element::new("Val");
            e.set_attr("Ith", ith);
            e.add_text(target.name());
            return e;
        }
        let mut e = Element::new("UnsetVal");
        e.set_attr("Ith", ith);
        return e;
    }
    match item.value_as_string(i) {
        Some(text) => {
            let mut e = Element::new("Val");
            e.set_attr("Ith", ith);
            e.add_text(text);
            e
        }
        None => {
            let mut e = Element::new("UnsetVal");
            e.set_attr("Ith", ith);
            e
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item_def::ItemDef;
    use crate::mask::AssociationMask;

    #[test]
    fn empty_manager_writes_bare_root() {
        let mgr = Manager::new();
        let xml = write_to_string(&mgr).unwrap();
        assert!(xml.contains("<SimAttributeSystem Version=\"1\"/>"));
        assert!(!xml.contains("<Definitions"));
    }

    #[test]
    fn base_definition_precedes_derived() {
        let mut mgr = Manager::new();
        mgr.create_definition("Base", None).unwrap();
        mgr.create_definition("Derived", Some("Base")).unwrap();
        let xml = write_to_string(&mgr).unwrap();
        let base = xml.find("Type=\"Base\"").unwrap();
        let derived = xml.find("Type=\"Derived\"").unwrap();
        assert!(base < derived);
        assert!(xml.contains("BaseType=\"Base\""));
    }

    #[test]
    fn definition_flags_and_mask_are_spelled_out() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("BC", None).unwrap();
        {
            let def = mgr.definition_mut(d).unwrap();
            def.is_abstract = true;
            def.is_unique = true;
            def.associations = AssociationMask::FACE | AssociationMask::EDGE;
        }
        let xml = write_to_string(&mgr).unwrap();
        assert!(xml.contains("Abstract=\"true\""));
        assert!(xml.contains("Unique=\"true\""));
        assert!(xml.contains("Associations=\"fe\""));
        assert!(!xml.contains("Nodal"));
    }

    #[test]
    fn attributes_ordered_by_id() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("M", None).unwrap();
        mgr.create_attribute_with_id("late", d, 9).unwrap();
        mgr.create_attribute_with_id("early", d, 2).unwrap();
        let xml = write_to_string(&mgr).unwrap();
        assert!(xml.find("Name=\"early\"").unwrap() < xml.find("Name=\"late\"").unwrap());
    }

    #[test]
    fn unset_and_set_slots_render_distinctly() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("M", None).unwrap();
        let mut pair = ItemDef::double("P");
        pair.double_def_mut().unwrap().required_count = 2;
        mgr.add_item_definition(d, pair).unwrap();
        let a = mgr.create_attribute("a", d).unwrap();
        mgr.attribute_mut(a)
            .unwrap()
            .item_mut(0)
            .unwrap()
            .set_double(1, 2.5);

        let xml = write_to_string(&mgr).unwrap();
        assert!(xml.contains("<UnsetVal Ith=\"0\"/>"));
        assert!(xml.contains("<Val Ith=\"1\">2.5</Val>"));
    }

    #[test]
    fn writing_twice_is_byte_identical() {
        let mut mgr = Manager::new();
        let d = mgr.create_definition("M", None).unwrap();
        mgr.add_item_definition(d, ItemDef::string("Tag")).unwrap();
        mgr.create_attribute("a", d).unwrap();
        mgr.create_attribute("b", d).unwrap();
        assert_eq!(write_to_string(&mgr).unwrap(), write_to_string(&mgr).unwrap());
    }
}
