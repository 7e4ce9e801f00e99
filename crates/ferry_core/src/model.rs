//! Generic content tree model.
//!
//! A [`ContentNode`] represents one content item independent of any schema:
//! a named, typed node with ordered typed properties and ordered children.
//! Trees are built from the store on export or deserialized from snapshot
//! files on import, and have no dependency on either.

pub mod format;
mod node;
mod property;
pub mod query;
mod value;

pub use format::SnapshotFormat;
pub use node::{ContentNode, NodeLocation};
pub use property::{ContentProperty, PropertyType};
pub use query::NodePattern;
pub use value::{BinaryValue, ContentValue};

use thiserror::Error;

/// Structural errors in a content tree or one of its values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    #[error("property '{property}' is declared {expected} but holds a {actual} value")]
    TypeMismatch {
        property: String,
        expected: PropertyType,
        actual: &'static str,
    },

    #[error("single-valued property '{property}' must hold exactly one value, found {count}")]
    Cardinality { property: String, count: usize },

    #[error("duplicate property '{property}' on node '{node}'")]
    DuplicateProperty { node: String, property: String },

    #[error("unknown property type '{0}'")]
    UnknownType(String),

    #[error("invalid {ty} value '{value}': {reason}")]
    InvalidValue {
        ty: PropertyType,
        value: String,
        reason: String,
    },

    #[error("invalid binary locator '{0}'")]
    InvalidLocator(String),
}

/// Namespace prefix for traceability metadata attached on export.
pub const META_PREFIX: &str = "meta:";

/// Original item location, attached to the root of every exported tree.
pub const META_PATH: &str = "meta:path";

/// Localized display name of the exported item.
pub const META_NAME: &str = "meta:name";

/// Locale of the exported item, when the store knows one.
pub const META_LOCALE: &str = "meta:locale";

/// Whether a live variant existed when the snapshot was taken.
pub const META_LIVE: &str = "meta:live";
