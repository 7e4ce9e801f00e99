//! Property and child-node exclusion policy.
//!
//! An [`ItemFilter`] answers "does this property or child node survive?"
//! from an ordered list of exclude globs checked against fully-qualified
//! names. Anything not excluded is included.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{CoreError, Result};
use crate::model::{ContentNode, META_PREFIX};
use crate::store::{AVAILABILITY_PROPERTY, HOLDER_PROPERTY, STATE_PROPERTY};

/// Store-managed metadata and workflow lifecycle state.
pub const EXPORT_EXCLUDES: [&str; 4] = [
    "system:*",
    STATE_PROPERTY,
    AVAILABILITY_PROPERTY,
    HOLDER_PROPERTY,
];

#[derive(Debug, Clone)]
pub struct ItemFilter {
    patterns: Vec<String>,
    excludes: GlobSet,
}

impl ItemFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob =
                Glob::new(pattern).map_err(|e| CoreError::invalid_pattern(pattern, e.to_string()))?;
            builder.add(glob);
        }
        let excludes = builder
            .build()
            .map_err(|e| CoreError::invalid_pattern(patterns.join(", "), e.to_string()))?;
        Ok(Self { patterns, excludes })
    }

    /// Filter applied when building a tree from the store.
    pub fn for_export(extra: &[String]) -> Result<Self> {
        Self::new(
            EXPORT_EXCLUDES
                .iter()
                .map(|p| p.to_string())
                .chain(extra.iter().cloned()),
        )
    }

    /// Filter applied when binding a tree onto the store.
    ///
    /// Also strips the traceability metadata attached on export so it is
    /// never written back as content.
    pub fn for_import(extra: &[String]) -> Result<Self> {
        Self::new(
            EXPORT_EXCLUDES
                .iter()
                .map(|p| p.to_string())
                .chain(std::iter::once(format!("{}*", META_PREFIX)))
                .chain(extra.iter().cloned()),
        )
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a property or child node with this qualified name survives.
    pub fn includes(&self, name: &str) -> bool {
        !self.excludes.is_match(name)
    }

    /// Strip excluded properties and child nodes from the whole subtree.
    pub fn apply(&self, node: &mut ContentNode) {
        node.retain_properties(|p| self.includes(p.name()));
        node.retain_children(|c| self.includes(c.name()));
        for child in node.children_mut() {
            self.apply(child);
        }
    }

    /// Filtered copy of `node`.
    pub fn filtered(&self, node: &ContentNode) -> ContentNode {
        let mut copy = node.clone();
        self.apply(&mut copy);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentProperty, META_PATH};

    fn stored() -> ContentNode {
        ContentNode::new("doc", "site:article")
            .with_property(ContentProperty::string("system:uuid", "u1"))
            .with_property(ContentProperty::string("site:title", "T"))
            .with_property(ContentProperty::string(STATE_PROPERTY, "published"))
            .with_property(ContentProperty::string(META_PATH, "/content/documents/doc"))
            .with_child(
                ContentNode::new("body", "site:html")
                    .with_property(ContentProperty::string("system:uuid", "u2"))
                    .with_property(ContentProperty::string("site:content", "<p/>")),
            )
            .with_child(ContentNode::new("system:lock", "system:lock"))
    }

    #[test]
    fn test_export_filter_strips_store_metadata() {
        let filter = ItemFilter::for_export(&[]).unwrap();
        let node = filter.filtered(&stored());
        let names: Vec<_> = node.properties().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["site:title", META_PATH]);
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].properties().len(), 1);
    }

    #[test]
    fn test_import_filter_also_strips_meta() {
        let filter = ItemFilter::for_import(&[]).unwrap();
        assert!(!filter.includes(META_PATH));
        assert!(!filter.includes("system:uuid"));
        assert!(filter.includes("site:title"));
        let node = filter.filtered(&stored());
        assert_eq!(node.properties().len(), 1);
    }

    #[test]
    fn test_extra_patterns() {
        let filter = ItemFilter::for_export(&["site:internal*".to_string()]).unwrap();
        assert!(!filter.includes("site:internalNote"));
        assert!(filter.includes("site:title"));
        assert_eq!(filter.patterns().len(), EXPORT_EXCLUDES.len() + 1);
    }

    #[test]
    fn test_empty_filter_includes_everything() {
        let filter = ItemFilter::new(Vec::<String>::new()).unwrap();
        assert!(filter.includes("system:uuid"));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        assert!(matches!(
            ItemFilter::new(["a[b"]),
            Err(CoreError::InvalidPattern { .. })
        ));
    }
}
