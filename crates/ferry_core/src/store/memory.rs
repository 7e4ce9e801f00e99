//! In-process content store implementing [`ContentStore`] and [`Workflow`].
//!
//! The whole repository is one [`ContentNode`] tree behind a lock. Every node
//! carries its identity in `system:uuid`. Changes apply immediately; `save`
//! counts commits and, when the repository was opened from a file, writes the
//! tree back as JSON.
//!
//! Queries are whitespace-separated terms, all of which must match:
//!
//! - `under:<path>` restricts the search root (default `/content`)
//! - `path:<glob>` matches the item path (`*` stays within one segment)
//! - `type:<node type>` matches the primary type of the item's best variant

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AVAILABILITY_PROPERTY, ContentStore, DISPLAY_NAME_PROPERTY, EditableRef, FOLDER_TYPE,
    FolderRef, HANDLE_TYPE, HOLDER_PROPERTY, ItemInfo, ItemRef, LOCALE_PROPERTY, ROOT_IDENTITY,
    STATE_PROPERTY, StoreError, StoreResult, UUID_PROPERTY, Variant, VariantState, Workflow,
    join_path, split_path,
};
use crate::model::{ContentNode, ContentProperty, NodeLocation};

const ROOT_TYPE: &str = "ferry:root";
const DEFAULT_USER: &str = "ferry";
const DEFAULT_QUERY_ROOT: &str = "/content";

/// Folders every fresh repository starts with.
const INITIAL_FOLDERS: [&str; 2] = ["/content/documents", "/content/assets"];

pub struct MemoryRepository {
    root: RwLock<ContentNode>,
    user: String,
    persist_path: Option<PathBuf>,
    saves: AtomicUsize,
    refreshes: AtomicUsize,
    fail_next_save: AtomicBool,
}

impl fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("user", &self.user)
            .field("persist_path", &self.persist_path)
            .field("nodes", &self.root.read().node_count())
            .field("saves", &self.save_count())
            .finish()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Empty repository with the standard content folders.
    pub fn new() -> Self {
        let mut root = ContentNode::new("", ROOT_TYPE);
        root.set_property(ContentProperty::string(UUID_PROPERTY, ROOT_IDENTITY));
        for folder in INITIAL_FOLDERS {
            let mut current = &mut root;
            for segment in folder.split('/').filter(|s| !s.is_empty()) {
                let index = match current.children().iter().position(|c| c.name() == segment) {
                    Some(index) => index,
                    None => {
                        let mut node = ContentNode::new(segment, FOLDER_TYPE);
                        assign_identities(&mut node);
                        current.add_child(node);
                        current.children().len() - 1
                    }
                };
                current = &mut current.children_mut()[index];
            }
        }
        Self::with_root(root)
    }

    fn with_root(root: ContentNode) -> Self {
        Self {
            root: RwLock::new(root),
            user: DEFAULT_USER.to_string(),
            persist_path: None,
            saves: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            fail_next_save: AtomicBool::new(false),
        }
    }

    /// Open a repository persisted at `path`, or start a new one there.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::Backend(format!("checking {}: {}", path.display(), e)))?;
        let mut repository = if exists {
            let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                StoreError::Backend(format!("reading {}: {}", path.display(), e))
            })?;
            let root: ContentNode = serde_json::from_str(&text).map_err(|e| {
                StoreError::Backend(format!("parsing {}: {}", path.display(), e))
            })?;
            info!("Opened repository {} ({} nodes)", path.display(), root.node_count());
            Self::with_root(root)
        } else {
            info!("Starting new repository at {}", path.display());
            Self::new()
        };
        repository.persist_path = Some(path.to_path_buf());
        Ok(repository)
    }

    /// Session user recorded as holder of checked-out drafts.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Make the next `save` fail with a backend error.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Copy of the whole repository tree.
    pub fn snapshot(&self) -> ContentNode {
        self.root.read().clone()
    }

    /// Insert an item directly, creating missing folders.
    ///
    /// One variant is created per state; with no states the item gets a
    /// single variant without lifecycle properties, which counts as
    /// published and live.
    pub fn insert_item(
        &self,
        path: &str,
        variant: ContentNode,
        states: &[VariantState],
    ) -> StoreResult<ItemRef> {
        let (folder_path, name) =
            split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let mut root = self.root.write();
        ensure_folder(&mut root, folder_path, FOLDER_TYPE)?;
        if locate(&root, path)?.is_some() {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }

        let mut handle = ContentNode::new(name, HANDLE_TYPE);
        assign_identities(&mut handle);
        let id = identity(&handle).unwrap_or_default().to_string();
        if states.is_empty() {
            let mut plain = variant;
            plain.set_name(name);
            assign_identities(&mut plain);
            handle.add_child(plain);
        } else {
            for state in states {
                handle.add_child(make_variant(&variant, name, *state));
            }
        }
        node_mut(&mut root, folder_path)?.add_child(handle);
        Ok(ItemRef {
            id,
            path: path.to_string(),
        })
    }
}

// ============================================================================
// Tree addressing
// ============================================================================

fn parse_segment<'a>(path: &str, segment: &'a str) -> StoreResult<(&'a str, usize)> {
    let invalid = || StoreError::InvalidPath(path.to_string());
    if segment.is_empty() {
        return Err(invalid());
    }
    match segment.strip_suffix(']').and_then(|s| s.rsplit_once('[')) {
        Some((name, index)) => {
            let index: usize = index.parse().map_err(|_| invalid())?;
            if name.is_empty() || index == 0 {
                return Err(invalid());
            }
            Ok((name, index))
        }
        None => Ok((segment, 1)),
    }
}

fn locate(root: &ContentNode, path: &str) -> StoreResult<Option<NodeLocation>> {
    if !path.starts_with('/') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let mut location = NodeLocation::root();
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let (name, index) = parse_segment(path, segment)?;
        let found = node
            .children()
            .iter()
            .enumerate()
            .filter(|(_, child)| child.name() == name)
            .nth(index - 1);
        match found {
            Some((i, child)) => {
                location = location.child(i);
                node = child;
            }
            None => return Ok(None),
        }
    }
    Ok(Some(location))
}

fn node_ref<'a>(root: &'a ContentNode, path: &str) -> StoreResult<&'a ContentNode> {
    let location = locate(root, path)?.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
    root.node_at(&location)
        .ok_or_else(|| StoreError::NotFound(path.to_string()))
}

fn node_mut<'a>(root: &'a mut ContentNode, path: &str) -> StoreResult<&'a mut ContentNode> {
    let location = locate(root, path)?.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
    root.node_at_mut(&location)
        .ok_or_else(|| StoreError::NotFound(path.to_string()))
}

fn handle_ref<'a>(root: &'a ContentNode, path: &str) -> StoreResult<&'a ContentNode> {
    let node = node_ref(root, path)?;
    if node.primary_type() != HANDLE_TYPE {
        return Err(StoreError::WrongKind {
            path: path.to_string(),
            expected: "content item",
        });
    }
    Ok(node)
}

fn handle_mut<'a>(root: &'a mut ContentNode, path: &str) -> StoreResult<&'a mut ContentNode> {
    let node = node_mut(root, path)?;
    if node.primary_type() != HANDLE_TYPE {
        return Err(StoreError::WrongKind {
            path: path.to_string(),
            expected: "content item",
        });
    }
    Ok(node)
}

fn string_property<'a>(node: &'a ContentNode, name: &str) -> Option<&'a str> {
    node.property(name)?.value()?.as_str()
}

fn identity(node: &ContentNode) -> Option<&str> {
    string_property(node, UUID_PROPERTY)
}

fn assign_identities(node: &mut ContentNode) {
    node.set_property(ContentProperty::string(
        UUID_PROPERTY,
        Uuid::new_v4().to_string(),
    ));
    for child in node.children_mut() {
        assign_identities(child);
    }
}

fn ensure_folder(root: &mut ContentNode, path: &str, folder_type: &str) -> StoreResult<FolderRef> {
    if !path.starts_with('/') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let mut current = String::from("/");
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment.contains('[') {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let next = join_path(&current, segment);
        match locate(root, &next)? {
            Some(_) => {
                if node_ref(root, &next)?.primary_type() == HANDLE_TYPE {
                    return Err(StoreError::WrongKind {
                        path: next,
                        expected: "folder",
                    });
                }
            }
            None => {
                let mut folder = ContentNode::new(segment, folder_type);
                assign_identities(&mut folder);
                node_mut(root, &current)?.add_child(folder);
                debug!("Created folder {}", next);
            }
        }
        current = next;
    }
    let folder = node_ref(root, &current)?;
    Ok(FolderRef {
        id: identity(folder).unwrap_or_default().to_string(),
        path: current,
    })
}

// ============================================================================
// Variants
// ============================================================================

fn variant_state(node: &ContentNode) -> VariantState {
    string_property(node, STATE_PROPERTY)
        .and_then(VariantState::parse)
        .unwrap_or(VariantState::Published)
}

fn variant_live(node: &ContentNode) -> bool {
    match node.property(AVAILABILITY_PROPERTY) {
        Some(property) => property.string_values().any(|v| v == "live"),
        None => !node.has_property(STATE_PROPERTY),
    }
}

fn availability(channels: &[&str]) -> ContentProperty {
    ContentProperty::strings(AVAILABILITY_PROPERTY, channels.iter().copied())
}

fn find_variant(handle: &ContentNode, state: VariantState) -> Option<usize> {
    handle
        .children()
        .iter()
        .position(|child| child.name() == handle.name() && variant_state(child) == state)
}

/// Fresh copy of `template` as a variant in `state`, with new identities.
fn make_variant(template: &ContentNode, name: &str, state: VariantState) -> ContentNode {
    let mut variant = template.clone();
    variant.set_name(name);
    variant.remove_property(HOLDER_PROPERTY);
    variant.set_property(ContentProperty::string(STATE_PROPERTY, state.as_str()));
    variant.set_property(availability(match state {
        VariantState::Published => &["live"],
        VariantState::Unpublished => &["preview"],
        VariantState::Draft => &[],
    }));
    assign_identities(&mut variant);
    variant
}

/// Replace the variant in `state`, keeping its identity, or append it.
fn put_variant(handle: &mut ContentNode, mut variant: ContentNode, state: VariantState) {
    match find_variant(handle, state) {
        Some(index) => {
            let children = handle.children_mut();
            if let Some(id) = identity(&children[index]).map(str::to_string) {
                variant.set_property(ContentProperty::string(UUID_PROPERTY, id));
            }
            children[index] = variant;
        }
        None => handle.add_child(variant),
    }
}

fn check_holder(draft: &ContentNode, editable: &EditableRef) -> StoreResult<()> {
    match string_property(draft, HOLDER_PROPERTY) {
        Some(holder) if holder == editable.holder => Ok(()),
        Some(holder) if !holder.is_empty() => Err(StoreError::CheckedOut {
            path: editable.item.path.clone(),
            holder: holder.to_string(),
        }),
        _ => Err(StoreError::NotCheckedOut(editable.item.path.clone())),
    }
}

fn item_info_at(root: &ContentNode, path: &str) -> StoreResult<ItemInfo> {
    let handle = handle_ref(root, path)?;
    let variants = handle
        .children()
        .iter()
        .zip(handle.child_segments())
        .filter(|(child, _)| child.name() == handle.name())
        .map(|(child, segment)| Variant {
            id: identity(child).unwrap_or_default().to_string(),
            path: join_path(path, &segment),
            primary_type: child.primary_type().to_string(),
            state: variant_state(child),
            live: variant_live(child),
        })
        .collect();
    Ok(ItemInfo {
        id: identity(handle).unwrap_or_default().to_string(),
        path: path.to_string(),
        name: handle.name().to_string(),
        display_name: string_property(handle, DISPLAY_NAME_PROPERTY).map(str::to_string),
        locale: string_property(handle, LOCALE_PROPERTY).map(str::to_string),
        variants,
    })
}

fn items_under(root: &ContentNode, path: &str) -> StoreResult<Vec<String>> {
    let base = node_ref(root, path)?;
    let mut items = Vec::new();
    base.walk(&mut |relative, node| {
        if node.primary_type() == HANDLE_TYPE {
            items.push(if relative.is_empty() {
                path.to_string()
            } else {
                join_path(path, relative)
            });
        }
    });
    Ok(items)
}

fn copy_item(
    root: &mut ContentNode,
    item: &ItemRef,
    folder_path: &str,
    name: &str,
) -> StoreResult<ItemRef> {
    if name.is_empty() || name.contains('/') || name.contains('[') {
        return Err(StoreError::InvalidPath(join_path(folder_path, name)));
    }
    let mut copy = handle_ref(root, &item.path)?.clone();
    let target = join_path(folder_path, name);
    if locate(root, &target)?.is_some() {
        return Err(StoreError::AlreadyExists(target));
    }

    let original = copy.name().to_string();
    copy.set_name(name);
    for child in copy.children_mut() {
        if child.name() == original {
            child.set_name(name);
            child.remove_property(HOLDER_PROPERTY);
        }
    }
    assign_identities(&mut copy);
    let id = identity(&copy).unwrap_or_default().to_string();

    let folder = node_mut(root, folder_path)?;
    if folder.primary_type() == HANDLE_TYPE {
        return Err(StoreError::WrongKind {
            path: folder_path.to_string(),
            expected: "folder",
        });
    }
    folder.add_child(copy);
    Ok(ItemRef { id, path: target })
}

// ============================================================================
// Queries
// ============================================================================

struct ItemQuery {
    under: String,
    path: Option<GlobMatcher>,
    primary_type: Option<String>,
}

impl ItemQuery {
    fn parse(query: &str) -> StoreResult<Self> {
        let invalid = |reason: String| StoreError::InvalidQuery {
            query: query.to_string(),
            reason,
        };
        let mut parsed = ItemQuery {
            under: DEFAULT_QUERY_ROOT.to_string(),
            path: None,
            primary_type: None,
        };
        for term in query.split_whitespace() {
            match term.split_once(':') {
                Some(("under", root)) => parsed.under = root.to_string(),
                Some(("path", glob)) => {
                    let glob = GlobBuilder::new(glob)
                        .literal_separator(true)
                        .build()
                        .map_err(|e| invalid(e.to_string()))?;
                    parsed.path = Some(glob.compile_matcher());
                }
                Some(("type", primary_type)) => {
                    parsed.primary_type = Some(primary_type.to_string())
                }
                _ => return Err(invalid(format!("unrecognized term '{}'", term))),
            }
        }
        Ok(parsed)
    }

    fn matches(&self, info: &ItemInfo) -> bool {
        if let Some(glob) = &self.path {
            if !glob.is_match(&info.path) {
                return false;
            }
        }
        match &self.primary_type {
            Some(expected) => info
                .best_variant()
                .is_some_and(|v| v.primary_type == *expected),
            None => true,
        }
    }
}

// ============================================================================
// ContentStore
// ============================================================================

#[async_trait]
impl ContentStore for MemoryRepository {
    async fn query(&self, query: &str) -> StoreResult<Vec<String>> {
        let parsed = ItemQuery::parse(query)?;
        let root = self.root.read();
        let mut matches = Vec::new();
        for path in items_under(&root, &parsed.under)? {
            if parsed.matches(&item_info_at(&root, &path)?) {
                matches.push(path);
            }
        }
        Ok(matches)
    }

    async fn list_items(&self, root_path: &str) -> StoreResult<Vec<String>> {
        items_under(&self.root.read(), root_path)
    }

    async fn item_info(&self, path: &str) -> StoreResult<ItemInfo> {
        item_info_at(&self.root.read(), path)
    }

    async fn read_node(&self, path: &str) -> StoreResult<ContentNode> {
        node_ref(&self.root.read(), path).cloned()
    }

    async fn path_of(&self, id: &str) -> StoreResult<Option<String>> {
        let root = self.root.read();
        let mut found = None;
        root.walk(&mut |relative, node| {
            if found.is_none() && identity(node) == Some(id) {
                found = Some(format!("/{}", relative));
            }
        });
        Ok(found)
    }

    async fn identity_of(&self, path: &str) -> StoreResult<Option<String>> {
        let root = self.root.read();
        Ok(match locate(&root, path)? {
            Some(location) => root
                .node_at(&location)
                .and_then(identity)
                .map(str::to_string),
            None => None,
        })
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(locate(&self.root.read(), path)?.is_some())
    }

    async fn set_property(&self, path: &str, property: ContentProperty) -> StoreResult<()> {
        node_mut(&mut self.root.write(), path)?.set_property(property);
        Ok(())
    }

    async fn remove_property(&self, path: &str, name: &str) -> StoreResult<()> {
        node_mut(&mut self.root.write(), path)?.remove_property(name);
        Ok(())
    }

    async fn add_node(&self, parent: &str, mut node: ContentNode) -> StoreResult<String> {
        assign_identities(&mut node);
        let id = identity(&node).unwrap_or_default().to_string();
        node_mut(&mut self.root.write(), parent)?.add_child(node);
        Ok(id)
    }

    async fn remove_node(&self, path: &str) -> StoreResult<()> {
        let (parent_path, _) =
            split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let mut root = self.root.write();
        let location = locate(&root, path)?.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let index = location
            .0
            .last()
            .copied()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        node_mut(&mut root, parent_path)?.children_mut().remove(index);
        Ok(())
    }

    async fn save(&self) -> StoreResult<()> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("save rejected".to_string()));
        }
        if let Some(path) = &self.persist_path {
            let text = {
                let root = self.root.read();
                serde_json::to_string_pretty(&*root)
            }
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            tokio::fs::write(path, text)
                .await
                .map_err(|e| StoreError::Backend(format!("writing {}: {}", path.display(), e)))?;
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh(&self) -> StoreResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Workflow
// ============================================================================

#[async_trait]
impl Workflow for MemoryRepository {
    async fn locate(&self, path: &str) -> StoreResult<Option<ItemRef>> {
        let root = self.root.read();
        let Some(location) = locate(&root, path)? else {
            return Ok(None);
        };
        match root.node_at(&location) {
            Some(node) if node.primary_type() == HANDLE_TYPE => Ok(Some(ItemRef {
                id: identity(node).unwrap_or_default().to_string(),
                path: path.to_string(),
            })),
            Some(_) => Err(StoreError::WrongKind {
                path: path.to_string(),
                expected: "content item",
            }),
            None => Ok(None),
        }
    }

    async fn create_folder(&self, path: &str, type_hints: &[String]) -> StoreResult<FolderRef> {
        let folder_type = type_hints
            .iter()
            .find(|hint| !hint.is_empty())
            .map(String::as_str)
            .unwrap_or(FOLDER_TYPE);
        ensure_folder(&mut self.root.write(), path, folder_type)
    }

    async fn create_item(
        &self,
        folder_path: &str,
        primary_type: &str,
        name: &str,
        locale: Option<&str>,
        display_name: Option<&str>,
    ) -> StoreResult<ItemRef> {
        let path = join_path(folder_path, name);
        if name.is_empty() || name.contains('/') || name.contains('[') {
            return Err(StoreError::InvalidPath(path));
        }
        let mut root = self.root.write();
        if locate(&root, &path)?.is_some() {
            return Err(StoreError::AlreadyExists(path));
        }

        let mut handle = ContentNode::new(name, HANDLE_TYPE);
        if let Some(display_name) = display_name {
            handle.set_property(ContentProperty::string(DISPLAY_NAME_PROPERTY, display_name));
        }
        if let Some(locale) = locale {
            handle.set_property(ContentProperty::string(LOCALE_PROPERTY, locale));
        }
        assign_identities(&mut handle);
        let id = identity(&handle).unwrap_or_default().to_string();
        handle.add_child(make_variant(
            &ContentNode::new(name, primary_type),
            name,
            VariantState::Draft,
        ));

        let folder = node_mut(&mut root, folder_path)?;
        if folder.primary_type() == HANDLE_TYPE {
            return Err(StoreError::WrongKind {
                path: folder_path.to_string(),
                expected: "folder",
            });
        }
        folder.add_child(handle);
        debug!("Created item {} ({})", path, primary_type);
        Ok(ItemRef { id, path })
    }

    async fn obtain_editable(&self, item: &ItemRef) -> StoreResult<EditableRef> {
        let mut root = self.root.write();
        let handle = handle_mut(&mut root, &item.path)?;
        let draft_index = match find_variant(handle, VariantState::Draft) {
            Some(index) => {
                if let Some(holder) = string_property(&handle.children()[index], HOLDER_PROPERTY)
                    .filter(|holder| !holder.is_empty() && *holder != self.user)
                {
                    return Err(StoreError::CheckedOut {
                        path: item.path.clone(),
                        holder: holder.to_string(),
                    });
                }
                index
            }
            None => {
                let source = find_variant(handle, VariantState::Unpublished)
                    .or_else(|| find_variant(handle, VariantState::Published))
                    .ok_or_else(|| StoreError::NotFound(item.path.clone()))?;
                let draft = make_variant(
                    &handle.children()[source],
                    handle.name(),
                    VariantState::Draft,
                );
                handle.add_child(draft);
                handle.children().len() - 1
            }
        };

        let handle_id = identity(handle).unwrap_or_default().to_string();
        let segment = handle.child_segments().swap_remove(draft_index);
        let draft = &mut handle.children_mut()[draft_index];
        draft.set_property(ContentProperty::string(HOLDER_PROPERTY, self.user.as_str()));
        Ok(EditableRef {
            item: ItemRef {
                id: handle_id,
                path: item.path.clone(),
            },
            draft: ItemRef {
                id: identity(draft).unwrap_or_default().to_string(),
                path: join_path(&item.path, &segment),
            },
            holder: self.user.clone(),
        })
    }

    async fn commit(&self, editable: &EditableRef) -> StoreResult<ItemRef> {
        let mut root = self.root.write();
        let handle = handle_mut(&mut root, &editable.item.path)?;
        let index = find_variant(handle, VariantState::Draft)
            .ok_or_else(|| StoreError::NotFound(editable.draft.path.clone()))?;
        check_holder(&handle.children()[index], editable)?;

        let unpublished = make_variant(
            &handle.children()[index],
            handle.name(),
            VariantState::Unpublished,
        );
        handle.children_mut()[index].remove_property(HOLDER_PROPERTY);
        put_variant(handle, unpublished, VariantState::Unpublished);
        Ok(editable.item.clone())
    }

    async fn dispose(&self, editable: &EditableRef) -> StoreResult<()> {
        let mut root = self.root.write();
        let handle = handle_mut(&mut root, &editable.item.path)?;
        let Some(index) = find_variant(handle, VariantState::Draft) else {
            return Ok(());
        };
        check_holder(&handle.children()[index], editable)?;

        let variants = handle
            .children()
            .iter()
            .filter(|child| child.name() == handle.name())
            .count();
        if variants > 1 {
            handle.children_mut().remove(index);
        } else {
            handle.children_mut()[index].remove_property(HOLDER_PROPERTY);
        }
        Ok(())
    }

    async fn publish(&self, item: &ItemRef) -> StoreResult<()> {
        let mut root = self.root.write();
        let handle = handle_mut(&mut root, &item.path)?;
        match find_variant(handle, VariantState::Unpublished) {
            Some(index) => {
                let published = make_variant(
                    &handle.children()[index],
                    handle.name(),
                    VariantState::Published,
                );
                put_variant(handle, published, VariantState::Published);
                Ok(())
            }
            None => match find_variant(handle, VariantState::Published) {
                Some(index) => {
                    handle.children_mut()[index].set_property(availability(&["live"]));
                    Ok(())
                }
                None => Err(StoreError::NothingToPublish(item.path.clone())),
            },
        }
    }

    async fn depublish(&self, item: &ItemRef) -> StoreResult<()> {
        let mut root = self.root.write();
        let handle = handle_mut(&mut root, &item.path)?;
        if let Some(index) = find_variant(handle, VariantState::Published) {
            handle.children_mut()[index].set_property(availability(&[]));
        }
        Ok(())
    }

    async fn copy(&self, item: &ItemRef, folder_path: &str, name: &str) -> StoreResult<ItemRef> {
        copy_item(&mut self.root.write(), item, folder_path, name)
    }

    async fn translate(&self, item: &ItemRef, locale: &str, name: &str) -> StoreResult<ItemRef> {
        let (folder_path, _) =
            split_path(&item.path).ok_or_else(|| StoreError::InvalidPath(item.path.clone()))?;
        let folder_path = folder_path.to_string();
        let mut root = self.root.write();
        let translation = copy_item(&mut root, item, &folder_path, name)?;
        node_mut(&mut root, &translation.path)?
            .set_property(ContentProperty::string(LOCALE_PROPERTY, locale));
        Ok(translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyType;

    fn article(title: &str) -> ContentNode {
        ContentNode::new("ignored", "site:article")
            .with_property(ContentProperty::string("site:title", title))
            .with_child(ContentNode::new("body", "site:html"))
    }

    #[tokio::test]
    async fn test_new_repository_has_standard_folders() {
        let repo = MemoryRepository::new();
        let documents = repo.read_node("/content/documents").await.unwrap();
        let assets = repo.read_node("/content/assets").await.unwrap();
        assert_eq!(documents.primary_type(), FOLDER_TYPE);
        assert_eq!(assets.primary_type(), FOLDER_TYPE);
        assert_ne!(
            repo.identity_of("/content/documents").await.unwrap(),
            repo.identity_of("/content/assets").await.unwrap()
        );
        let content = repo.read_node("/content").await.unwrap();
        assert_eq!(content.children().len(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_create_commit_publish() {
        let repo = MemoryRepository::new();
        repo.create_folder("/content/documents/news", &[]).await.unwrap();
        let item = repo
            .create_item(
                "/content/documents/news",
                "site:article",
                "launch",
                Some("en"),
                Some("Launch"),
            )
            .await
            .unwrap();

        let editable = repo.obtain_editable(&item).await.unwrap();
        assert_eq!(editable.draft.path, "/content/documents/news/launch/launch");
        repo.set_property(&editable.draft.path, ContentProperty::string("site:title", "Hi"))
            .await
            .unwrap();
        repo.commit(&editable).await.unwrap();
        repo.publish(&item).await.unwrap();

        let info = repo.item_info(&item.path).await.unwrap();
        assert_eq!(info.display_name.as_deref(), Some("Launch"));
        assert_eq!(info.locale.as_deref(), Some("en"));
        let states: Vec<_> = info.variants.iter().map(|v| v.state).collect();
        assert_eq!(
            states,
            vec![
                VariantState::Draft,
                VariantState::Unpublished,
                VariantState::Published
            ]
        );
        let best = info.best_variant().unwrap();
        assert!(best.live);
        let published = repo.read_node(&best.path).await.unwrap();
        assert_eq!(
            published.property("site:title").unwrap().string_values().next(),
            Some("Hi")
        );
        assert!(!published.has_property(HOLDER_PROPERTY));

        repo.depublish(&item).await.unwrap();
        assert!(!repo.item_info(&item.path).await.unwrap().is_live());
    }

    #[tokio::test]
    async fn test_checked_out_by_someone_else() {
        let repo = MemoryRepository::new();
        let item = repo
            .insert_item("/content/documents/a", article("A"), &[VariantState::Draft])
            .unwrap();
        let draft = repo.item_info(&item.path).await.unwrap().variants[0].path.clone();
        repo.set_property(&draft, ContentProperty::string(HOLDER_PROPERTY, "someone-else"))
            .await
            .unwrap();

        let err = repo.obtain_editable(&item).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::CheckedOut {
                path: item.path.clone(),
                holder: "someone-else".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dispose_discards_draft_when_other_variants_exist() {
        let repo = MemoryRepository::new();
        let item = repo
            .insert_item("/content/documents/a", article("A"), &[VariantState::Published])
            .unwrap();
        let editable = repo.obtain_editable(&item).await.unwrap();
        assert_eq!(repo.item_info(&item.path).await.unwrap().variants.len(), 2);
        repo.dispose(&editable).await.unwrap();
        assert_eq!(repo.item_info(&item.path).await.unwrap().variants.len(), 1);
        assert!(matches!(
            repo.commit(&editable).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_and_path_lookups() {
        let repo = MemoryRepository::new();
        let item = repo
            .insert_item("/content/assets/logo", ContentNode::new("x", "ferry:resource"), &[])
            .unwrap();
        assert_eq!(repo.path_of(&item.id).await.unwrap(), Some(item.path.clone()));
        assert_eq!(
            repo.identity_of(&item.path).await.unwrap(),
            Some(item.id.clone())
        );
        assert_eq!(repo.path_of(ROOT_IDENTITY).await.unwrap(), Some("/".to_string()));
        assert_eq!(repo.path_of("missing").await.unwrap(), None);
        assert!(repo.identity_of("/content/nothing").await.unwrap().is_none());

        let info = repo.item_info(&item.path).await.unwrap();
        assert_eq!(info.variants[0].state, VariantState::Published);
        assert!(info.variants[0].live);
    }

    #[tokio::test]
    async fn test_same_name_siblings_addressing() {
        let repo = MemoryRepository::new();
        repo.add_node("/content", ContentNode::new("block", "t")).await.unwrap();
        let second = repo
            .add_node("/content", ContentNode::new("block", "t"))
            .await
            .unwrap();
        assert_eq!(
            repo.path_of(&second).await.unwrap().as_deref(),
            Some("/content/block[2]")
        );
        repo.remove_node("/content/block").await.unwrap();
        assert_eq!(
            repo.identity_of("/content/block").await.unwrap(),
            Some(second)
        );
        assert!(matches!(
            repo.exists("/content/block[0]").await,
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_query_by_type_and_path() {
        let repo = MemoryRepository::new();
        repo.insert_item("/content/documents/news/a", article("A"), &[VariantState::Published])
            .unwrap();
        repo.insert_item(
            "/content/documents/news/deep/b",
            article("B"),
            &[VariantState::Draft],
        )
        .unwrap();
        repo.insert_item(
            "/content/documents/c",
            ContentNode::new("c", "site:page"),
            &[VariantState::Published],
        )
        .unwrap();

        let articles = repo.query("type:site:article").await.unwrap();
        assert_eq!(
            articles,
            vec!["/content/documents/news/a", "/content/documents/news/deep/b"]
        );
        let shallow = repo
            .query("path:/content/documents/news/* type:site:article")
            .await
            .unwrap();
        assert_eq!(shallow, vec!["/content/documents/news/a"]);
        assert!(matches!(
            repo.query("color:red").await,
            Err(StoreError::InvalidQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_copy_and_translate_get_new_identities() {
        let repo = MemoryRepository::new();
        let item = repo
            .insert_item("/content/documents/a", article("A"), &[VariantState::Published])
            .unwrap();
        let copy = repo.copy(&item, "/content/documents", "b").await.unwrap();
        assert_ne!(copy.id, item.id);
        let info = repo.item_info(&copy.path).await.unwrap();
        assert_eq!(info.variants[0].path, "/content/documents/b/b");

        let translation = repo.translate(&item, "fr", "a-fr").await.unwrap();
        let info = repo.item_info(&translation.path).await.unwrap();
        assert_eq!(info.locale.as_deref(), Some("fr"));
        assert!(matches!(
            repo.copy(&item, "/content/documents", "b").await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_save_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("repo.json");
        let repo = MemoryRepository::open(&file).await.unwrap();
        let item = repo
            .insert_item(
                "/content/documents/a",
                ContentNode::new("a", "site:page").with_property(
                    ContentProperty::single("site:count", PropertyType::Long, 3_i64).unwrap(),
                ),
                &[VariantState::Published],
            )
            .unwrap();
        repo.save().await.unwrap();
        assert_eq!(repo.save_count(), 1);

        let reopened = MemoryRepository::open(&file).await.unwrap();
        assert_eq!(
            reopened.identity_of(&item.path).await.unwrap(),
            Some(item.id)
        );
    }

    #[tokio::test]
    async fn test_injected_save_failure() {
        let repo = MemoryRepository::new();
        repo.fail_next_save();
        assert!(matches!(repo.save().await, Err(StoreError::Backend(_))));
        repo.save().await.unwrap();
        assert_eq!(repo.save_count(), 1);
    }
}
