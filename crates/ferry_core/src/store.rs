//! Collaborator interfaces of the content store.
//!
//! [`ContentStore`] is the session used to read and write nodes, [`Workflow`]
//! drives the lifecycle of content items (create, check out, commit,
//! publish). Both pipelines only talk to the store through these traits;
//! [`memory::MemoryRepository`] is the in-process implementation used by the
//! tests and the CLI.
//!
//! # Item layout
//!
//! A content item is a *handle* node whose children are the item's
//! lifecycle variants, all carrying the handle's name:
//!
//! ```text
//! /content/documents/news/launch            (ferry:handle)
//! /content/documents/news/launch/launch     (site:article, ferry:state = published)
//! /content/documents/news/launch/launch[2]  (site:article, ferry:state = unpublished)
//! ```
//!
//! Same-name siblings are addressed with a one-based `[n]` suffix from the
//! second one on.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ContentNode, ContentProperty, ModelError};

/// Identity of the store root. Never rewritten by reference resolution.
pub const ROOT_IDENTITY: &str = "cafebabe-cafe-babe-cafe-babecafebabe";

/// Store-managed identity property present on every stored node.
pub const UUID_PROPERTY: &str = "system:uuid";

/// Lifecycle state of a variant.
pub const STATE_PROPERTY: &str = "ferry:state";

/// Availability channels of a variant (`live`, `preview`).
pub const AVAILABILITY_PROPERTY: &str = "ferry:availability";

/// Session holding the draft variant checked out.
pub const HOLDER_PROPERTY: &str = "ferry:holder";

/// Localized display name, kept on the item handle.
pub const DISPLAY_NAME_PROPERTY: &str = "ferry:displayName";

/// Locale of an item, kept on the item handle.
pub const LOCALE_PROPERTY: &str = "ferry:locale";

/// Node type of content item handles.
pub const HANDLE_TYPE: &str = "ferry:handle";

/// Default node type for folders created by the workflow.
pub const FOLDER_TYPE: &str = "ferry:folder";

/// Errors raised by a store or workflow implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    #[error("no node at {0}")]
    NotFound(String),

    #[error("a node already exists at {0}")]
    AlreadyExists(String),

    #[error("item {path} is checked out by '{holder}'")]
    CheckedOut { path: String, holder: String },

    #[error("draft of {0} is not checked out")]
    NotCheckedOut(String),

    #[error("{path} is not a {expected}")]
    WrongKind { path: String, expected: &'static str },

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("invalid query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("nothing to publish for {0}")]
    NothingToPublish(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// References
// ============================================================================

/// A located content item (its handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub path: String,
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.id)
    }
}

/// A checked-out draft of an item. Must be committed or disposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableRef {
    pub item: ItemRef,
    /// The draft variant node content is written to.
    pub draft: ItemRef,
    pub holder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: String,
    pub path: String,
}

/// Lifecycle state of a variant, ordered by preference for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantState {
    Draft,
    Unpublished,
    Published,
}

impl VariantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantState::Draft => "draft",
            VariantState::Unpublished => "unpublished",
            VariantState::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(VariantState::Draft),
            "unpublished" => Some(VariantState::Unpublished),
            "published" => Some(VariantState::Published),
            _ => None,
        }
    }
}

impl fmt::Display for VariantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle variant of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub path: String,
    pub primary_type: String,
    pub state: VariantState,
    pub live: bool,
}

/// Summary of an item and its variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: String,
    pub path: String,
    pub name: String,
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub variants: Vec<Variant>,
}

impl ItemInfo {
    /// Most representative variant: published, then unpublished, then draft.
    pub fn best_variant(&self) -> Option<&Variant> {
        self.variants.iter().max_by_key(|v| v.state)
    }

    /// Whether any variant is currently available on the live channel.
    pub fn is_live(&self) -> bool {
        self.variants.iter().any(|v| v.live)
    }

    pub fn display_name_or_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A session on the content store.
///
/// Paths are absolute (`/content/...`); identities are opaque strings.
#[async_trait]
pub trait ContentStore: Send + Sync + fmt::Debug {
    /// Item paths matching a store query, in document order.
    async fn query(&self, query: &str) -> StoreResult<Vec<String>>;

    /// Paths of every item below `root`, in document order.
    async fn list_items(&self, root: &str) -> StoreResult<Vec<String>>;

    async fn item_info(&self, path: &str) -> StoreResult<ItemInfo>;

    /// Full subtree at `path`, including store-managed properties.
    async fn read_node(&self, path: &str) -> StoreResult<ContentNode>;

    /// Current location of the node with identity `id`, if any.
    async fn path_of(&self, id: &str) -> StoreResult<Option<String>>;

    /// Identity of the node at `path`, if any.
    async fn identity_of(&self, path: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, path: &str) -> StoreResult<bool>;

    async fn set_property(&self, path: &str, property: ContentProperty) -> StoreResult<()>;

    async fn remove_property(&self, path: &str, name: &str) -> StoreResult<()>;

    /// Append `node` (with its subtree) under `parent`, returning the new identity.
    async fn add_node(&self, parent: &str, node: ContentNode) -> StoreResult<String>;

    async fn remove_node(&self, path: &str) -> StoreResult<()>;

    /// Persist pending changes.
    async fn save(&self) -> StoreResult<()>;

    /// Drop cached state so later reads see the backend.
    async fn refresh(&self) -> StoreResult<()>;
}

/// Lifecycle operations on content items.
#[async_trait]
pub trait Workflow: Send + Sync + fmt::Debug {
    async fn locate(&self, path: &str) -> StoreResult<Option<ItemRef>>;

    /// Create the folder at `path` and any missing ancestors.
    ///
    /// The first type hint is used as folder type, [`FOLDER_TYPE`] otherwise.
    async fn create_folder(&self, path: &str, type_hints: &[String]) -> StoreResult<FolderRef>;

    /// Create a new item with a single draft variant.
    async fn create_item(
        &self,
        folder_path: &str,
        primary_type: &str,
        name: &str,
        locale: Option<&str>,
        display_name: Option<&str>,
    ) -> StoreResult<ItemRef>;

    async fn obtain_editable(&self, item: &ItemRef) -> StoreResult<EditableRef>;

    async fn commit(&self, editable: &EditableRef) -> StoreResult<ItemRef>;

    async fn dispose(&self, editable: &EditableRef) -> StoreResult<()>;

    async fn publish(&self, item: &ItemRef) -> StoreResult<()>;

    async fn depublish(&self, item: &ItemRef) -> StoreResult<()>;

    async fn copy(&self, item: &ItemRef, folder_path: &str, name: &str) -> StoreResult<ItemRef>;

    async fn translate(&self, item: &ItemRef, locale: &str, name: &str) -> StoreResult<ItemRef>;
}

/// Split an absolute path into its parent and last segment.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

/// Join a parent path and a child segment.
pub fn join_path(parent: &str, segment: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", segment)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), segment)
    }
}
