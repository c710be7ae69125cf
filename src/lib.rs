//! simattr — a typed attribute/definition engine for simulation inputs.
//!
//! The engine holds a schema of inheritable [`Definition`]s, each made of
//! typed item definitions (doubles, ints, strings, groups, file paths,
//! attribute references, void toggles), and the [`Attribute`] instances
//! built from them. A [`Manager`] owns both sides, enforces name/id
//! uniqueness, validates expression and reference links, and keeps a
//! back-reference registry so removing an attribute can never leave a
//! dangling link behind.
//!
//! Persistence is a deterministic XML dialect ([`xml::writer`] /
//! [`xml::reader`]) with two-pass loading, so forward references inside
//! a document resolve without ordering constraints.
//!
//! ## Quick start
//!
//! ```rust
//! use simattr::{ItemDef, Manager};
//!
//! let mut manager = Manager::new();
//! let material = manager.create_definition("Material", None)?;
//!
//! let mut density = ItemDef::double("Density");
//! density.double_def_mut().unwrap().units = Some("kg/m^3".into());
//! manager.add_item_definition(material, density)?;
//!
//! let steel = manager.create_attribute("steel", material)?;
//! manager
//!     .attribute_mut(steel)
//!     .unwrap()
//!     .find_item_mut("Density")
//!     .unwrap()
//!     .set_double(0, 7850.0);
//!
//! let xml = simattr::xml::writer::write_to_string(&manager)?;
//! let (restored, diags) = simattr::xml::reader::read_from_string(&xml)?;
//! assert!(diags.is_empty());
//! assert!(restored.find_attribute("steel").is_some());
//! # Ok::<(), simattr::EngineError>(())
//! ```

// Error and diagnostic types
pub mod error;

// Entity-kind bitmask
pub mod mask;

// Scalar value schemas: ranges, discrete tables
pub mod value;

// Schema side: item definitions and definitions
pub mod definition;
pub mod item_def;

// Instance side: items and attributes
pub mod attribute;
pub mod item;

// The registry tying both sides together
pub mod manager;

// XML persistence
pub mod xml {
    pub mod dom;
    pub mod reader;
    pub mod writer;
}

pub use attribute::Attribute;
pub use definition::Definition;
pub use error::{Diag, EngineError, Severity};
pub use item::{Item, ItemAddress, ItemKind, Slot};
pub use item_def::{GroupDef, ItemDef, ItemDefKind, PathDef, RefDef};
pub use manager::{AttrKey, DefKey, Manager};
pub use mask::AssociationMask;
pub use value::{Bound, DiscreteEntry, ValueDef, ValueKind, ValueRange, ValueScalar};
