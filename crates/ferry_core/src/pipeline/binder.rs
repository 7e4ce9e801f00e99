//! Binding of a snapshot tree onto a checked-out draft.

use tracing::debug;

use crate::error::{CoreError, Result};
use crate::filter::ItemFilter;
use crate::model::ContentNode;
use crate::store::{ContentStore, join_path};

/// Make the draft at `draft_path` carry the content of `tree`.
///
/// Only names the filter includes are touched on either side: properties
/// and child nodes of the draft that pass the filter are replaced by those
/// of the tree, everything else on the draft (identity, lifecycle state,
/// holder) is left alone.
pub async fn bind(
    store: &dyn ContentStore,
    draft_path: &str,
    tree: &ContentNode,
    filter: &ItemFilter,
) -> Result<()> {
    let current = store
        .read_node(draft_path)
        .await
        .map_err(|e| CoreError::store("read draft", e))?;
    let source = filter.filtered(tree);

    for property in current.properties() {
        if filter.includes(property.name()) && !source.has_property(property.name()) {
            store
                .remove_property(draft_path, property.name())
                .await
                .map_err(|e| CoreError::store("remove property", e))?;
        }
    }
    for property in source.properties() {
        store
            .set_property(draft_path, property.clone())
            .await
            .map_err(|e| CoreError::store("set property", e))?;
    }

    // Highest index first so same-name sibling indices stay valid.
    let segments = current.child_segments();
    for (child, segment) in current.children().iter().zip(segments).rev() {
        if filter.includes(child.name()) {
            store
                .remove_node(&join_path(draft_path, &segment))
                .await
                .map_err(|e| CoreError::store("remove child node", e))?;
        }
    }
    for child in source.children() {
        store
            .add_node(draft_path, child.clone())
            .await
            .map_err(|e| CoreError::store("add child node", e))?;
    }

    debug!(
        "Bound {} properties and {} child nodes onto {}",
        source.properties().len(),
        source.children().len(),
        draft_path
    );
    Ok(())
}
