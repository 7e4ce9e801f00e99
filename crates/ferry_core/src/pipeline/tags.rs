//! `name=value` tag directives attached to every item of a run.

use tracing::warn;

use crate::error::Result;
use crate::model::{ContentNode, ContentProperty, ContentValue, PropertyType};
use crate::record::{ATTR_SKIPPED_TAGS, RecordContext};

/// Parsed tag directives.
///
/// Malformed directives are dropped at parse time and counted, so every
/// record of the run can report how many were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<(String, String)>,
    skipped: Vec<String>,
}

impl TagSet {
    pub fn parse(directives: &[String]) -> Self {
        let mut set = TagSet::default();
        for directive in directives {
            match directive.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    set.tags
                        .push((name.trim().to_string(), value.trim().to_string()));
                }
                _ => {
                    warn!("Skipping malformed tag directive '{}'", directive);
                    set.skipped.push(directive.clone());
                }
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Directives that were not `name=value`.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Attach every tag to the root of `tree` as a STRING value.
    ///
    /// A tag whose property already exists with STRING type is appended to
    /// it unless the value is already present; any other existing property
    /// of the same name is replaced.
    pub fn apply(&self, tree: &mut ContentNode, record: &mut RecordContext) -> Result<()> {
        record.add_count(ATTR_SKIPPED_TAGS, self.skipped.len());
        for (name, value) in &self.tags {
            match tree.property_mut(name) {
                Some(existing) if existing.property_type() == PropertyType::String => {
                    if !existing.string_values().any(|v| v == value) {
                        existing.push_value(ContentValue::String(value.clone()))?;
                    }
                }
                _ => tree.set_property(ContentProperty::string(name.as_str(), value.as_str())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Category;
    use tracing_test::traced_test;

    fn directives(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    #[traced_test]
    fn test_malformed_directives_are_skipped() {
        let set = TagSet::parse(&directives(&["site:origin=legacy", "oops", "=nameless", "site:empty="]));
        assert_eq!(
            set.tags(),
            [
                ("site:origin".to_string(), "legacy".to_string()),
                ("site:empty".to_string(), String::new()),
            ]
        );
        assert_eq!(set.skipped(), ["oops", "=nameless"]);
        assert!(logs_contain("Skipping malformed tag directive 'oops'"));
    }

    #[test]
    fn test_apply_appends_and_counts() {
        let set = TagSet::parse(&directives(&["site:tags=migrated", "site:tags=legacy", "bad"]));
        let mut tree = ContentNode::new("doc", "site:article")
            .with_property(ContentProperty::string("site:tags", "legacy"))
            .with_property(ContentProperty::single("site:weight", PropertyType::Long, 3i64).unwrap());
        let mut record = RecordContext::begin(Category::Documents, "/doc");
        set.apply(&mut tree, &mut record).unwrap();

        let tags: Vec<_> = tree.property("site:tags").unwrap().string_values().collect();
        assert_eq!(tags, ["legacy", "migrated"]);
        assert!(tree.property("site:tags").unwrap().is_multiple());
        assert_eq!(record.attribute(ATTR_SKIPPED_TAGS), Some("1"));

        let replace = TagSet::parse(&directives(&["site:weight=heavy"]));
        replace.apply(&mut tree, &mut record).unwrap();
        let weight = tree.property("site:weight").unwrap();
        assert_eq!(weight.property_type(), PropertyType::String);
        assert_eq!(weight.string_values().collect::<Vec<_>>(), ["heavy"]);
    }
}
