//! Inline or external storage of binary property values.
//!
//! Payloads up to the threshold stay embedded in the snapshot as `data:`
//! URLs. Larger payloads are written under `_attachments/` in the bundle and
//! replaced by a `bundle:` locator; import reads them back before the tree is
//! bound to the store.

use crate::bundle::{ATTACHMENTS_DIR, Bundle, escape_segment};
use crate::error::Result;
use crate::model::{BinaryValue, ContentNode, ContentValue, NodeLocation, PropertyType};

/// Default inline threshold: 256 KiB.
pub const DEFAULT_INLINE_THRESHOLD: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct BinaryCodec {
    threshold: usize,
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_THRESHOLD)
    }
}

impl BinaryCodec {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether a payload of `len` bytes stays inline.
    pub fn keeps_inline(&self, len: usize) -> bool {
        len <= self.threshold
    }

    /// Encode one payload, writing it to `locator` in the bundle when too large.
    pub async fn encode(&self, bundle: &Bundle, locator: &str, data: Vec<u8>) -> Result<BinaryValue> {
        if self.keeps_inline(data.len()) {
            return Ok(BinaryValue::Inline(data));
        }
        bundle.write_file(locator, &data).await?;
        Ok(BinaryValue::External {
            locator: locator.to_string(),
        })
    }

    /// Payload bytes of a value, reading external ones from the bundle.
    pub async fn decode(&self, bundle: &Bundle, value: &BinaryValue) -> Result<Vec<u8>> {
        match value {
            BinaryValue::Inline(data) => Ok(data.clone()),
            BinaryValue::External { locator } => bundle.read_file(locator).await,
        }
    }

    /// Move every oversized inline payload of an item tree into the bundle.
    ///
    /// Attachments are laid out as
    /// `_attachments/<item path>/[<node path>~]<property>~<index>.bin`, every
    /// piece escaped with [`escape_segment`] and the node path escaped whole.
    /// Returns the number of values externalized.
    pub async fn externalize(
        &self,
        bundle: &Bundle,
        item_path: &str,
        tree: &mut ContentNode,
    ) -> Result<usize> {
        let mut pending = Vec::new();
        for (location, node_path) in node_paths(tree) {
            let Some(node) = tree.node_at_mut(&location) else {
                continue;
            };
            for property in node.properties_mut() {
                if property.property_type() != PropertyType::Binary {
                    continue;
                }
                let property_name = property.name().to_string();
                for (index, value) in property.values_mut().iter_mut().enumerate() {
                    let oversized = matches!(
                        value,
                        ContentValue::Binary(BinaryValue::Inline(data)) if !self.keeps_inline(data.len())
                    );
                    if !oversized {
                        continue;
                    }
                    let locator = attachment_locator(item_path, &node_path, &property_name, index);
                    let external = ContentValue::Binary(BinaryValue::External {
                        locator: locator.clone(),
                    });
                    if let ContentValue::Binary(BinaryValue::Inline(data)) =
                        std::mem::replace(value, external)
                    {
                        pending.push((locator, data));
                    }
                }
            }
        }

        let count = pending.len();
        for (locator, data) in pending {
            bundle.write_file(&locator, &data).await?;
        }
        Ok(count)
    }

    /// Replace every `bundle:` locator in a tree by the payload it points at.
    ///
    /// Returns the number of values rehydrated.
    pub async fn rehydrate(&self, bundle: &Bundle, tree: &mut ContentNode) -> Result<usize> {
        let mut count = 0;
        for (location, _) in node_paths(tree) {
            let Some(node) = tree.node_at_mut(&location) else {
                continue;
            };
            for property in node.properties_mut() {
                if property.property_type() != PropertyType::Binary {
                    continue;
                }
                for value in property.values_mut().iter_mut() {
                    let ContentValue::Binary(binary @ BinaryValue::External { .. }) = value else {
                        continue;
                    };
                    let data = self.decode(bundle, binary).await?;
                    *binary = BinaryValue::Inline(data);
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

fn attachment_locator(item_path: &str, node_path: &str, property: &str, index: usize) -> String {
    let mut locator = String::from(ATTACHMENTS_DIR);
    for segment in item_path.split('/').filter(|s| !s.is_empty()) {
        locator.push('/');
        locator.push_str(&escape_segment(segment));
    }
    locator.push('/');
    if !node_path.is_empty() {
        locator.push_str(&escape_segment(node_path));
        locator.push('~');
    }
    locator.push_str(&format!("{}~{}.bin", escape_segment(property), index));
    locator
}

/// Location and relative path of every node, in document order.
fn node_paths(tree: &ContentNode) -> Vec<(NodeLocation, String)> {
    fn collect(
        node: &ContentNode,
        location: NodeLocation,
        path: String,
        out: &mut Vec<(NodeLocation, String)>,
    ) {
        let segments = node.child_segments();
        out.push((location.clone(), path.clone()));
        for (i, (child, segment)) in node.children().iter().zip(segments).enumerate() {
            let child_path = if path.is_empty() {
                segment
            } else {
                format!("{}/{}", path, segment)
            };
            collect(child, location.child(i), child_path, out);
        }
    }
    let mut out = Vec::new();
    collect(tree, NodeLocation::root(), String::new(), &mut out);
    out
}
