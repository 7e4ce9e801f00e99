//! Store item to snapshot tree, and the traceability metadata on its root.

use crate::error::{CoreError, Result};
use crate::filter::ItemFilter;
use crate::model::{
    ContentNode, ContentProperty, ContentValue, META_LIVE, META_LOCALE, META_NAME, META_PATH,
};
use crate::store::{ContentStore, ItemInfo, Variant, split_path};

/// Snapshot tree of one variant of an item, passed through `filter`.
///
/// The root is named after the item and keeps the variant's type.
pub async fn map_item(
    store: &dyn ContentStore,
    info: &ItemInfo,
    variant: &Variant,
    filter: &ItemFilter,
) -> Result<ContentNode> {
    let node = store
        .read_node(&variant.path)
        .await
        .map_err(|e| CoreError::store("read item", e))?;
    let mut tree = filter.filtered(&node);
    tree.set_name(&info.name);
    attach_metadata(&mut tree, &SnapshotMeta::of(info));
    Ok(tree)
}

/// Where an item came from, as recorded in `meta:*` properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub path: String,
    pub name: String,
    pub locale: Option<String>,
    pub live: bool,
}

impl SnapshotMeta {
    pub fn of(info: &ItemInfo) -> Self {
        Self {
            path: info.path.clone(),
            name: info.display_name_or_name().to_string(),
            locale: info.locale.clone(),
            live: info.is_live(),
        }
    }

    /// Read the metadata back from a snapshot root.
    ///
    /// `meta:path` is required; the other fields fall back to the last path
    /// segment, no locale, and not live.
    pub fn read(tree: &ContentNode) -> Result<Self> {
        let text = |name: &str| {
            tree.property(name)
                .and_then(|p| p.string_values().next())
                .map(str::to_string)
        };
        let path = text(META_PATH)
            .filter(|p| p.starts_with('/'))
            .ok_or_else(|| {
                CoreError::invalid_format(
                    "snapshot metadata",
                    format!("{} missing or not an absolute path", META_PATH),
                )
            })?;
        if split_path(&path).is_none() {
            return Err(CoreError::invalid_format(
                "snapshot metadata",
                format!("{} '{}' has no item segment", META_PATH, path),
            ));
        }
        let name = text(META_NAME).unwrap_or_else(|| tree.name().to_string());
        let live = matches!(
            tree.property(META_LIVE).and_then(|p| p.value()),
            Some(ContentValue::Boolean(true))
        );
        Ok(Self {
            path,
            name,
            locale: text(META_LOCALE),
            live,
        })
    }

    /// Folder path and node name of the item.
    pub fn location(&self) -> (&str, &str) {
        split_path(&self.path).unwrap_or(("/", self.path.as_str()))
    }
}

pub fn attach_metadata(tree: &mut ContentNode, meta: &SnapshotMeta) {
    tree.set_property(ContentProperty::string(META_PATH, meta.path.as_str()));
    tree.set_property(ContentProperty::string(META_NAME, meta.name.as_str()));
    match &meta.locale {
        Some(locale) => tree.set_property(ContentProperty::string(META_LOCALE, locale.as_str())),
        None => {
            tree.remove_property(META_LOCALE);
        }
    }
    tree.set_property(ContentProperty::boolean(META_LIVE, meta.live));
}
