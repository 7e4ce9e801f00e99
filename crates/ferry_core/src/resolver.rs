//! Rewriting of references between identities and locations.
//!
//! Identities are not stable across store copies, so exported snapshots
//! carry locations (`/content/assets/logo`) and imports turn them back into
//! the identities of the target store.
//!
//! Each configured reference property is matched independently with a
//! `**[@name]` pattern over the tree. Unresolvable values are left as they
//! are: a dangling reference is a soft condition, not an error.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{ContentNode, ContentValue, NodeLocation, NodePattern};
use crate::record::{ATTR_DANGLING_REFERENCES, ATTR_RESOLVED_REFERENCES, RecordContext};
use crate::store::{ContentStore, ROOT_IDENTITY};

/// Conventional reference property of mirror and link nodes.
pub const DEFAULT_REFERENCE_PROPERTY: &str = "ferry:docbase";

/// Outcome of resolving one tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Values rewritten.
    pub resolved: usize,
    /// Values left unchanged because nothing matched them.
    pub unresolved: Vec<String>,
    /// Locations resolved to, on export.
    pub targets: Vec<String>,
    /// Node locations and property names that were rewritten.
    pub changed: Vec<(NodeLocation, String)>,
}

impl Resolution {
    /// Count the resolution in the record attributes.
    pub fn annotate(&self, record: &mut RecordContext) {
        record.add_count(ATTR_RESOLVED_REFERENCES, self.resolved);
        record.add_count(ATTR_DANGLING_REFERENCES, self.unresolved.len());
    }
}

struct Candidate {
    location: NodeLocation,
    property: String,
    index: usize,
    value: String,
}

#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    properties: Vec<String>,
    reserved: HashSet<String>,
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ReferenceResolver {
    /// Resolver for the default reference property plus `extra` names.
    pub fn new(extra: &[String]) -> Self {
        let mut properties = vec![DEFAULT_REFERENCE_PROPERTY.to_string()];
        for name in extra {
            if !properties.contains(name) {
                properties.push(name.clone());
            }
        }
        Self {
            properties,
            reserved: HashSet::from([ROOT_IDENTITY.to_string()]),
        }
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub fn is_reserved(&self, value: &str) -> bool {
        self.reserved.contains(value)
    }

    /// Whether a value has the shape of an opaque store identity.
    pub fn is_identity(value: &str) -> bool {
        Uuid::parse_str(value).is_ok()
    }

    /// Whether a value has the shape of a store location.
    pub fn is_location(value: &str) -> bool {
        value.starts_with('/')
    }

    fn candidates(&self, tree: &ContentNode) -> Vec<Candidate> {
        let mut found = Vec::new();
        for name in &self.properties {
            for location in NodePattern::with_property(name).select(tree) {
                let Some(property) = tree.node_at(&location).and_then(|n| n.property(name)) else {
                    continue;
                };
                for (index, value) in property.values().iter().enumerate() {
                    if let Some(value) = value.as_str() {
                        found.push(Candidate {
                            location: location.clone(),
                            property: name.clone(),
                            index,
                            value: value.to_string(),
                        });
                    }
                }
            }
        }
        found
    }

    fn rewrite(tree: &mut ContentNode, candidate: &Candidate, value: String) -> Result<()> {
        let property = tree
            .node_at_mut(&candidate.location)
            .and_then(|n| n.property_mut(&candidate.property))
            .ok_or_else(|| {
                CoreError::invalid_format(
                    "reference",
                    format!("property {} vanished during resolution", candidate.property),
                )
            })?;
        property.replace_value(candidate.index, ContentValue::String(value))?;
        Ok(())
    }

    /// Export direction: identities become locations.
    pub async fn to_locations(
        &self,
        store: &dyn ContentStore,
        tree: &mut ContentNode,
    ) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        for candidate in self.candidates(tree) {
            if self.is_reserved(&candidate.value) || !Self::is_identity(&candidate.value) {
                continue;
            }
            let path = store
                .path_of(&candidate.value)
                .await
                .map_err(|e| CoreError::store("resolve identity", e))?;
            match path {
                Some(path) => {
                    Self::rewrite(tree, &candidate, path.clone())?;
                    resolution.resolved += 1;
                    resolution.targets.push(path);
                    resolution
                        .changed
                        .push((candidate.location.clone(), candidate.property.clone()));
                }
                None => {
                    warn!(
                        "Dangling reference {}={} left unchanged",
                        candidate.property, candidate.value
                    );
                    resolution.unresolved.push(candidate.value.clone());
                }
            }
        }
        Ok(resolution)
    }

    /// Import direction: locations become identities of the target store.
    pub async fn to_identities(
        &self,
        store: &dyn ContentStore,
        tree: &mut ContentNode,
    ) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        for candidate in self.candidates(tree) {
            if !Self::is_location(&candidate.value) {
                continue;
            }
            let id = store
                .identity_of(&candidate.value)
                .await
                .map_err(|e| CoreError::store("resolve location", e))?;
            match id {
                Some(id) => {
                    Self::rewrite(tree, &candidate, id)?;
                    resolution.resolved += 1;
                    resolution
                        .changed
                        .push((candidate.location.clone(), candidate.property.clone()));
                }
                None => {
                    debug!(
                        "No item at {} yet for {}, leaving it for the cleanup pass",
                        candidate.value, candidate.property
                    );
                    resolution.unresolved.push(candidate.value.clone());
                }
            }
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentProperty, PropertyType};
    use crate::store::VariantState;
    use crate::store::memory::MemoryRepository;
    use tracing_test::traced_test;

    fn reference(name: &str, value: &str) -> ContentProperty {
        ContentProperty::single(name, PropertyType::String, value).unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_export_direction_resolves_and_keeps_danglings() {
        let repo = MemoryRepository::new();
        let logo = repo
            .insert_item("/content/assets/logo", ContentNode::new("logo", "ferry:asset"), &[])
            .unwrap();
        let dangling = Uuid::new_v4().to_string();
        let mut tree = ContentNode::new("doc", "site:article")
            .with_child(
                ContentNode::new("image", "ferry:mirror")
                    .with_property(reference(DEFAULT_REFERENCE_PROPERTY, &logo.id)),
            )
            .with_child(
                ContentNode::new("broken", "ferry:mirror")
                    .with_property(reference(DEFAULT_REFERENCE_PROPERTY, &dangling)),
            )
            .with_child(
                ContentNode::new("root", "ferry:mirror")
                    .with_property(reference(DEFAULT_REFERENCE_PROPERTY, ROOT_IDENTITY)),
            );

        let resolver = ReferenceResolver::default();
        let resolution = resolver.to_locations(&repo, &mut tree).await.unwrap();
        assert_eq!(resolution.resolved, 1);
        assert_eq!(resolution.targets, vec!["/content/assets/logo"]);
        assert_eq!(resolution.unresolved, vec![dangling.clone()]);

        let value = |i: usize| {
            tree.children()[i]
                .property(DEFAULT_REFERENCE_PROPERTY)
                .unwrap()
                .string_values()
                .next()
                .unwrap()
                .to_string()
        };
        assert_eq!(value(0), "/content/assets/logo");
        assert_eq!(value(1), dangling);
        assert_eq!(value(2), ROOT_IDENTITY);
        assert!(logs_contain("left unchanged"));

        let mut record = RecordContext::begin(crate::record::Category::Documents, "/doc");
        resolution.annotate(&mut record);
        assert_eq!(record.attribute(ATTR_DANGLING_REFERENCES), Some("1"));
    }

    #[tokio::test]
    async fn test_import_direction_matches_extra_properties_independently() {
        let repo = MemoryRepository::new();
        let target = repo
            .insert_item(
                "/content/documents/b",
                ContentNode::new("b", "site:article"),
                &[VariantState::Published],
            )
            .unwrap();
        let mut tree = ContentNode::new("a", "site:article")
            .with_property(reference("site:related", "/content/documents/b"))
            .with_property(reference("site:unrelated", "/content/documents/b"))
            .with_property(
                ContentProperty::new(
                    "ferry:docbase",
                    PropertyType::String,
                    true,
                    vec!["/content/documents/b".into(), "/content/documents/later".into()],
                )
                .unwrap(),
            );

        let resolver = ReferenceResolver::new(&["site:related".to_string()]);
        let resolution = resolver.to_identities(&repo, &mut tree).await.unwrap();
        assert_eq!(resolution.resolved, 2);
        assert_eq!(resolution.unresolved, vec!["/content/documents/later"]);
        assert_eq!(
            tree.property("site:related").unwrap().string_values().next(),
            Some(target.id.as_str())
        );
        assert_eq!(
            tree.property("site:unrelated").unwrap().string_values().next(),
            Some("/content/documents/b")
        );
        let docbase: Vec<_> = tree.property("ferry:docbase").unwrap().string_values().collect();
        assert_eq!(docbase, vec![target.id.as_str(), "/content/documents/later"]);
    }

    #[test]
    fn test_value_shapes() {
        assert!(ReferenceResolver::is_identity("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert!(!ReferenceResolver::is_identity("/content/x"));
        assert!(ReferenceResolver::is_location("/content/x"));
        let resolver = ReferenceResolver::new(&["ferry:docbase".to_string()]);
        assert_eq!(resolver.properties().len(), 1);
        assert!(!resolver.is_reserved("x"));
        assert!(resolver.is_reserved(ROOT_IDENTITY));
    }
}
