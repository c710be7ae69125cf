//! XML → Manager deserialization.
//!
//! The reader is best effort: anything it cannot resolve becomes a
//! `Diag` line and the corresponding field stays in its default state.
//! Only a document whose text fails to parse at all is a hard error.
//!
//! Definitions load in two passes so an `ExpressionType` or `AttDef`
//! link may name a definition appearing later in the document: pass one
//! registers every definition skeleton, pass two builds item
//! definitions with every type name resolvable. Attributes likewise
//! load in two sweeps, so expression and reference values may name
//! attributes the document has not introduced yet.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Diag, EngineError};
use crate::item::ItemAddress;
use crate::item_def::ItemDef;
use crate::manager::{AttrKey, DefKey, Manager};
use crate::mask::AssociationMask;
use crate::value::{Bound, ValueDef, ValueRange, ValueScalar};
use crate::xml::dom::{self, Element};
use crate::xml::writer::ROOT_TAG;

/// Parse a document into a fresh manager plus accumulated diagnostics.
pub fn read_from_string(xml: &str) -> Result<(Manager, Vec<Diag>), EngineError> {
    let root = dom::parse(xml)?;
    let mut manager = Manager::new();
    let mut diags = Vec::new();

    if root.name != ROOT_TAG {
        diags.push(Diag::error(format!(
            "unexpected document root '{}', expected '{ROOT_TAG}'",
            root.name
        )));
        return Ok((manager, diags));
    }

    let declared_categories = root
        .child("Categories")
        .map(cat_set)
        .unwrap_or_default();

    if let Some(analyses) = root.child("Analyses") {
        for analysis in analyses.children_named("Analysis") {
            match analysis.attr("Type") {
                Some(name) => manager.define_analysis(name, cat_set(analysis)),
                None => diags.push(Diag::error("analysis element without a Type")),
            }
        }
    }

    if let Some(defs) = root.child("Definitions") {
        read_definitions(&mut manager, defs, &mut diags);
    }

    if let Some(atts) = root.child("Attributes") {
        read_attributes(&mut manager, atts, &mut diags);
    }

    if let Some(sections) = root.child("Sections") {
        for section in sections.child_elements() {
            manager.add_section(section.clone());
        }
    }

    manager.update_categories();
    if root.child("Categories").is_some() {
        for missing in declared_categories.difference(manager.categories()) {
            diags.push(Diag::warning(format!(
                "declared category '{missing}' is used by no item definition"
            )));
        }
        for extra in manager.categories().difference(&declared_categories) {
            diags.push(Diag::warning(format!(
                "category '{extra}' is used but not declared"
            )));
        }
    }

    debug!(
        definitions = manager.number_of_definitions(),
        attributes = manager.number_of_attributes(),
        diags = diags.len(),
        "attribute system read"
    );
    Ok((manager, diags))
}

/// Read a document from disk.
pub fn read_from_file(path: impl AsRef<Path>) -> Result<(Manager, Vec<Diag>), EngineError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    read_from_string(&text)
}

fn cat_set(e: &Element) -> BTreeSet<String> {
    e.children_named("Cat").map(|c| c.text()).collect()
}

fn attr_bool(e: &Element, name: &str) -> bool {
    e.attr(name).map(|v| v == "true").unwrap_or(false)
}

// ── definitions ──────────────────────────────────────────────────

fn read_definitions(manager: &mut Manager, defs: &Element, diags: &mut Vec<Diag>) {
    // Pass 1: register skeletons. A worklist tolerates documents where
    // a base type appears after its subtype.
    let mut pending: Vec<&Element> = defs.children_named("AttDef").collect();
    let mut created: Vec<(DefKey, &Element)> = Vec::new();
    loop {
        let mut progressed = false;
        let mut deferred = Vec::new();
        for e in pending {
            let type_name = match e.attr("Type") {
                Some(t) => t,
                None => {
                    diags.push(Diag::error("definition element without a Type"));
                    continue;
                }
            };
            let base = e.attr("BaseType");
            if let Some(b) = base {
                if manager.find_definition(b).is_none() {
                    deferred.push(e);
                    continue;
                }
            }
            match manager.create_definition(type_name, base) {
                Ok(key) => {
                    apply_definition_fields(manager, key, e);
                    created.push((key, e));
                    progressed = true;
                }
                Err(err) => diags.push(Diag::error(format!(
                    "definition '{type_name}' skipped: {err}"
                ))),
            }
        }
        if deferred.is_empty() {
            break;
        }
        if !progressed {
            for e in &deferred {
                let type_name = e.attr("Type").unwrap_or("?");
                let base = e.attr("BaseType").unwrap_or("?");
                diags.push(Diag::error(format!(
                    "definition '{type_name}' skipped: unknown base type '{base}'"
                )));
            }
            break;
        }
        pending = deferred;
    }

    // Pass 2: every type name is now registered, so item definitions
    // resolve their cross-definition links immediately.
    for (key, e) in created {
        if let Some(items) = e.child("ItemDefinitions") {
            for item_el in items.child_elements() {
                if let Some(item) = parse_item_def(manager, item_el, diags) {
                    if let Err(err) = manager.add_item_definition(key, item) {
                        diags.push(Diag::error(err.to_string()));
                    }
                }
            }
        }
    }
}

fn apply_definition_fields(manager: &mut Manager, key: DefKey, e: &Element) {
    if let Some(def) = manager.definition_mut(key) {
        def.label = e.attr("Label").map(str::to_string);
        if let Some(v) = e.attr("Version").and_then(|v| v.parse().ok()) {
            def.version = v;
        }
        def.is_abstract = attr_bool(e, "Abstract");
        def.is_unique = attr_bool(e, "Unique");
        def.is_nodal = attr_bool(e, "Nodal");
        if let Some(mask) = e.attr("Associations") {
            def.associations = AssociationMask::from_letters(mask);
        }
        if let Some(b) = e.child("BriefDescription") {
            def.brief_description = b.text();
        }
        if let Some(d) = e.child("DetailedDescription") {
            def.detailed_description = d.text();
        }
    }
}

fn parse_item_def(manager: &Manager, e: &Element, diags: &mut Vec<Diag>) -> Option<ItemDef> {
    let name = match e.attr("Name") {
        Some(n) => n.to_string(),
        None => {
            diags.push(Diag::error(format!(
                "item definition <{}> without a Name",
                e.name
            )));
            return None;
        }
    };

    let mut def = match e.name.as_str() {
        "Double" => {
            let mut d = ItemDef::double(&name);
            if let Some(v) = d.double_def_mut() {
                parse_value_def(manager, e, &name, v, diags);
            }
            d
        }
        "Int" => {
            let mut d = ItemDef::int(&name);
            if let Some(v) = d.int_def_mut() {
                parse_value_def(manager, e, &name, v, diags);
            }
            d
        }
        "String" => {
            let mut d = ItemDef::string(&name);
            if let Some(v) = d.string_def_mut() {
                parse_value_def(manager, e, &name, v, diags);
            }
            d
        }
        "Group" => {
            let mut d = ItemDef::group(&name);
            if let Some(g) = d.group_def_mut() {
                if let Some(n) = e.attr("NumberOfRequiredGroups").and_then(|v| v.parse().ok()) {
                    g.required_groups = n;
                }
            }
            if let Some(children) = e.child("ItemDefinitions") {
                for child_el in children.child_elements() {
                    if let Some(child) = parse_item_def(manager, child_el, diags) {
                        if let Err(err) = d.add_group_child(child) {
                            diags.push(Diag::error(err.to_string()));
                        }
                    }
                }
            }
            d
        }
        "Directory" | "File" => {
            let mut d = if e.name == "Directory" {
                ItemDef::directory(&name)
            } else {
                ItemDef::file(&name)
            };
            if let Some(p) = d.path_def_mut() {
                if let Some(n) = e.attr("NumberOfRequiredValues").and_then(|v| v.parse().ok()) {
                    p.required_count = n;
                }
                p.should_exist = attr_bool(e, "ShouldExist");
                p.default = e.child("DefaultValue").map(|c| c.text());
            }
            d
        }
        "AttributeRef" => {
            let mut d = ItemDef::attribute_ref(&name);
            if let Some(r) = d.ref_def_mut() {
                if let Some(n) = e.attr("NumberOfRequiredValues").and_then(|v| v.parse().ok()) {
                    r.required_count = n;
                }
                if let Some(target) = e.attr("AttDef") {
                    match manager.find_definition(target) {
                        Some(key) => r.target_def = Some(key),
                        None => diags.push(Diag::error(format!(
                            "item '{name}': unresolved reference target '{target}'"
                        ))),
                    }
                }
            }
            d
        }
        "Void" => ItemDef::void(&name),
        other => {
            diags.push(Diag::error(format!(
                "item '{name}': unknown item kind '{other}'"
            )));
            return None;
        }
    };

    def.label = e.attr("Label").map(str::to_string);
    if let Some(v) = e.attr("Version").and_then(|v| v.parse().ok()) {
        def.version = v;
    }
    def.optional = attr_bool(e, "Optional");
    if def.optional {
        def.enabled_by_default = e.attr("IsEnabledByDefault").map(|v| v == "true").unwrap_or(true);
    }
    if let Some(v) = e.attr("AdvanceLevel").and_then(|v| v.parse().ok()) {
        def.advance_level = v;
    }
    if let Some(cats) = e.child("Categories") {
        def.categories = cat_set(cats);
    }
    if let Some(b) = e.child("BriefDescription") {
        def.brief_description = b.text();
    }
    if let Some(d) = e.child("DetailedDescription") {
        def.detailed_description = d.text();
    }
    Some(def)
}

fn parse_value_def<T: ValueScalar>(
    manager: &Manager,
    e: &Element,
    name: &str,
    def: &mut ValueDef<T>,
    diags: &mut Vec<Diag>,
) {
    if let Some(n) = e.attr("NumberOfRequiredValues").and_then(|v| v.parse().ok()) {
        def.required_count = n;
    }
    def.units = e.attr("Units").map(str::to_string);

    if let Some(expr) = e.child("ExpressionType") {
        let target = expr.text();
        match manager.find_definition(&target) {
            Some(key) => def.expr_def = Some(key),
            None => diags.push(Diag::error(format!(
                "item '{name}': unresolved expression type '{target}'"
            ))),
        }
    }

    if let Some(discrete) = e.child("DiscreteInfo") {
        for value in discrete.children_named("Value") {
            let text = value.text();
            match text.parse::<T>() {
                Ok(v) => {
                    let label = value.attr("Enum").unwrap_or(&text).to_string();
                    def.add_discrete_entry(v, label);
                }
                Err(_) => diags.push(Diag::error(format!(
                    "item '{name}': unparsable discrete value '{text}'"
                ))),
            }
        }
        if let Some(i) = discrete.attr("DefaultIndex").and_then(|v| v.parse().ok()) {
            def.default_discrete_index = Some(i);
        }
        return;
    }

    if let Some(default) = e.child("DefaultValue") {
        let text = default.text();
        match text.parse::<T>() {
            Ok(v) => def.default = Some(v),
            Err(_) => diags.push(Diag::error(format!(
                "item '{name}': unparsable default value '{text}'"
            ))),
        }
    }
    if let Some(range) = e.child("RangeInfo") {
        let mut parsed = ValueRange { min: None, max: None };
        for (tag, slot) in [("Min", &mut parsed.min), ("Max", &mut parsed.max)] {
            if let Some(bound) = range.child(tag) {
                let text = bound.text();
                match text.parse::<T>() {
                    Ok(v) => {
                        *slot = Some(Bound {
                            value: v,
                            inclusive: attr_bool(bound, "Inclusive"),
                        })
                    }
                    Err(_) => diags.push(Diag::error(format!(
                        "item '{name}': unparsable range bound '{text}'"
                    ))),
                }
            }
        }
        if !def.set_range(parsed) {
            diags.push(Diag::error(format!(
                "item '{name}': range ignored, item already has a discrete table"
            )));
        }
    }
}

// ── attributes ───────────────────────────────────────────────────

fn read_attributes(manager: &mut Manager, atts: &Element, diags: &mut Vec<Diag>) {
    // Sweep 1: create every attribute so expression and reference
    // values can resolve names regardless of document order.
    let mut created: Vec<(AttrKey, &Element)> = Vec::new();
    for e in atts.children_named("Att") {
        let name = match e.attr("Name") {
            Some(n) => n,
            None => {
                diags.push(Diag::error("attribute element without a Name"));
                continue;
            }
        };
        let def = match e.attr("Type").and_then(|t| manager.find_definition(t)) {
            Some(d) => d,
            None => {
                diags.push(Diag::error(format!(
                    "attribute '{name}' skipped: unknown definition type '{}'",
                    e.attr("Type").unwrap_or("?")
                )));
                continue;
            }
        };
        let result = match e.attr("ID").and_then(|v| v.parse::<u64>().ok()) {
            Some(id) => manager.create_attribute_with_id(name, def, id),
            None => manager.create_attribute(name, def),
        };
        match result {
            Ok(key) => created.push((key, e)),
            Err(err) => diags.push(Diag::error(format!("attribute '{name}' skipped: {err}"))),
        }
    }

    // Sweep 2: fill item values and associations.
    for (key, e) in created {
        if let Some(items) = e.child("Items") {
            for item_el in items.child_elements() {
                fill_top_level_item(manager, key, item_el, diags);
            }
        }
        if let Some(assoc) = e.child("Associations") {
            for entity in assoc.children_named("Entity") {
                if let Err(err) = manager.associate(key, &entity.text()) {
                    diags.push(Diag::warning(err.to_string()));
                }
            }
        }
    }
}

fn fill_top_level_item(manager: &mut Manager, holder: AttrKey, e: &Element, diags: &mut Vec<Diag>) {
    let name = match e.attr("Name") {
        Some(n) => n.to_string(),
        None => {
            diags.push(Diag::error("item element without a Name"));
            return;
        }
    };
    let position = manager.attribute(holder).and_then(|a| a.item_position(&name));
    match position {
        Some(top) => fill_item(manager, holder, &ItemAddress::top_level(top), e, diags),
        None => {
            let attr_name = manager
                .attribute(holder)
                .map(|a| a.name().to_string())
                .unwrap_or_default();
            diags.push(Diag::warning(format!(
                "attribute '{attr_name}' has no item named '{name}'"
            )));
        }
    }
}

fn fill_item(
    manager: &mut Manager,
    holder: AttrKey,
    address: &ItemAddress,
    e: &Element,
    diags: &mut Vec<Diag>,
) {
    let item_name = e.attr("Name").unwrap_or(&e.name).to_string();

    if let Some(enabled) = e.attr("Enabled") {
        let enabled = enabled == "true";
        let applied = manager
            .attribute_mut(holder)
            .and_then(|a| a.item_at_mut(address))
            .map(|i| i.set_enabled(enabled))
            .unwrap_or(false);
        if !applied {
            diags.push(Diag::warning(format!(
                "item '{item_name}': enable state ignored"
            )));
        }
    }

    if let Some(values) = e.child("Values") {
        fill_values(manager, holder, address, &item_name, values, diags);
    }

    for entry_el in e.children_named("GroupEntry") {
        let entry = match entry_el.attr("Ith").and_then(|v| v.parse::<usize>().ok()) {
            Some(n) => n,
            None => {
                diags.push(Diag::error(format!(
                    "item '{item_name}': group entry without a valid Ith"
                )));
                continue;
            }
        };
        // Unbounded groups grow on demand; a fixed group already holds
        // its required entries.
        loop {
            let groups = manager
                .attribute(holder)
                .and_then(|a| a.item_at(address))
                .map(|i| i.number_of_groups())
                .unwrap_or(0);
            if groups > entry {
                break;
            }
            let appended = manager
                .attribute_mut(holder)
                .and_then(|a| a.item_at_mut(address))
                .map(|i| i.append_group())
                .unwrap_or(false);
            if !appended {
                diags.push(Diag::error(format!(
                    "item '{item_name}': group entry {entry} out of range"
                )));
                break;
            }
        }
        for child_el in entry_el.child_elements() {
            let child_name = match child_el.attr("Name") {
                Some(n) => n,
                None => {
                    diags.push(Diag::error("item element without a Name"));
                    continue;
                }
            };
            let child_pos = manager
                .attribute(holder)
                .and_then(|a| a.item_at(address))
                .and_then(|i| i.definition().group_def())
                .and_then(|g| g.children().iter().position(|c| c.name == child_name));
            match child_pos {
                Some(pos) => {
                    let child_address = address.clone().into_group(entry, pos);
                    fill_item(manager, holder, &child_address, child_el, diags);
                }
                None => diags.push(Diag::warning(format!(
                    "group '{item_name}' has no child named '{child_name}'"
                ))),
            }
        }
    }
}

fn fill_values(
    manager: &mut Manager,
    holder: AttrKey,
    address: &ItemAddress,
    item_name: &str,
    values: &Element,
    diags: &mut Vec<Diag>,
) {
    let is_ref = manager
        .attribute(holder)
        .and_then(|a| a.item_at(address))
        .map(|i| i.definition().ref_def().is_some())
        .unwrap_or(false);

    // Grow unbounded items up to the written slot count.
    if let Some(count) = values.attr("NumberOfValues").and_then(|v| v.parse::<usize>().ok()) {
        loop {
            let have = manager
                .attribute(holder)
                .and_then(|a| a.item_at(address))
                .map(|i| i.number_of_values())
                .unwrap_or(0);
            if have >= count {
                break;
            }
            let appended = manager
                .attribute_mut(holder)
                .and_then(|a| a.item_at_mut(address))
                .map(|i| i.append_value())
                .unwrap_or(false);
            if !appended {
                diags.push(Diag::warning(format!(
                    "item '{item_name}': written with {count} values but holds {have}"
                )));
                break;
            }
        }
    }

    for slot_el in values.child_elements() {
        let ith = match slot_el.attr("Ith").and_then(|v| v.parse::<usize>().ok()) {
            Some(i) => i,
            None => {
                diags.push(Diag::error(format!(
                    "item '{item_name}': value without a valid Ith"
                )));
                continue;
            }
        };
        match slot_el.name.as_str() {
            "UnsetVal" => {
                // Items are built with their defaults applied, so an
                // explicitly unset slot must be cleared again here.
                let cleared = manager
                    .attribute_mut(holder)
                    .and_then(|a| a.item_at_mut(address))
                    .map(|i| !i.is_set(ith) || i.unset(ith))
                    .unwrap_or(false);
                if !cleared {
                    diags.push(Diag::error(format!(
                        "item '{item_name}': cannot unset slot {ith}"
                    )));
                }
            }
            "Val" if is_ref => {
                let target_name = slot_el.text();
                match manager.find_attribute(&target_name) {
                    Some(target) => {
                        if !manager.set_reference(holder, address, ith, Some(target)) {
                            diags.push(Diag::error(format!(
                                "item '{item_name}': reference to '{target_name}' rejected"
                            )));
                        }
                    }
                    None => diags.push(Diag::error(format!(
                        "item '{item_name}': unresolved attribute reference '{target_name}'"
                    ))),
                }
            }
            "Val" => {
                let text = slot_el.text();
                let written = manager
                    .attribute_mut(holder)
                    .and_then(|a| a.item_at_mut(address))
                    .map(|i| i.set_value_from_string(ith, &text))
                    .unwrap_or(false);
                if !written {
                    diags.push(Diag::error(format!(
                        "item '{item_name}': value '{text}' rejected at slot {ith}"
                    )));
                }
            }
            "DiscreteIndex" => {
                let text = slot_el.text();
                let set = text.parse::<usize>().ok().map(|ndx| {
                    manager
                        .attribute_mut(holder)
                        .and_then(|a| a.item_at_mut(address))
                        .map(|i| i.set_discrete_index(ith, ndx))
                        .unwrap_or(false)
                });
                if set != Some(true) {
                    diags.push(Diag::error(format!(
                        "item '{item_name}': discrete index '{text}' rejected at slot {ith}"
                    )));
                }
            }
            "Expression" => {
                let target_name = slot_el.attr("Name").unwrap_or_default();
                match manager.find_attribute(target_name) {
                    Some(target) => {
                        if !manager.set_expression(holder, address, ith, Some(target)) {
                            diags.push(Diag::error(format!(
                                "item '{item_name}': expression '{target_name}' rejected at slot {ith}"
                            )));
                        }
                    }
                    None => diags.push(Diag::error(format!(
                        "item '{item_name}': unresolved expression attribute '{target_name}'"
                    ))),
                }
            }
            other => {
                warn!(item = item_name, element = other, "unknown value element");
                diags.push(Diag::warning(format!(
                    "item '{item_name}': unknown value element <{other}>"
                )));
            }
        }
    }
}
