//! In-memory source with scripted data and fault injection
//!
//! `ScriptedSource` answers every `SourceClient` call from maps filled in by
//! the caller, paginates with numeric cursors, and can be told to fail a
//! specific call. Every call is recorded with the credential that made it.

use crate::credentials::Credential;
use crate::entity::{ChildEntity, LeafEntity, LeafThread, ParentEntity};
use crate::source::{Page, SearchHit, SourceClient, SourceError, SourceOp, SourceResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Replies returned inline with their top-level leaf
const INLINE_REPLIES: usize = 5;

/// A call the source received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCall {
    pub op: SourceOp,
    pub credential_id: String,
    /// The ids, keyword or cursor the call was about
    pub subject: String,
}

#[derive(Debug)]
struct Fault {
    op: SourceOp,
    /// 1-based call number of `op` to fail; `None` fails every call
    nth: Option<usize>,
    error: SourceError,
}

#[derive(Debug, Default)]
struct Script {
    searches: HashMap<String, Vec<SearchHit>>,
    parents: HashMap<String, ParentEntity>,
    children: HashMap<String, ChildEntity>,
    collections: HashMap<String, Vec<String>>,
    threads: HashMap<String, Vec<LeafEntity>>,
    replies: HashMap<String, Vec<LeafEntity>>,
    keys: HashMap<String, String>,
    faults: Vec<Fault>,
    calls: Vec<SourceCall>,
    counts: HashMap<SourceOp, usize>,
}

/// Scripted `SourceClient`
#[derive(Debug)]
pub struct ScriptedSource {
    page_size: usize,
    script: Mutex<Script>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::with_page_size(2)
    }

    /// Pages hold at most `page_size` items
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            script: Mutex::new(Script::default()),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a parent the source knows in detail
    ///
    /// A parent without a collection id gets `UU<id>`.
    pub fn add_parent(&self, mut parent: ParentEntity) -> &Self {
        if parent.collection_id.is_none() {
            parent.collection_id = Some(format!("UU{}", parent.external_id));
        }
        let mut script = self.script();
        if let Some(collection) = &parent.collection_id {
            script.collections.entry(collection.clone()).or_default();
        }
        script.parents.insert(parent.external_id.clone(), parent);
        drop(script);
        self
    }

    /// Adds a child and lists it in its parent's collection
    pub fn add_child(&self, child: ChildEntity) -> &Self {
        let mut script = self.script();
        let collection = child
            .collection_id
            .clone()
            .or_else(|| {
                script
                    .parents
                    .get(&child.parent_external_id)
                    .and_then(|p| p.collection_id.clone())
            })
            .unwrap_or_else(|| format!("UU{}", child.parent_external_id));
        let listing = script.collections.entry(collection).or_default();
        if !listing.contains(&child.external_id) {
            listing.push(child.external_id.clone());
        }
        script.children.insert(child.external_id.clone(), child);
        drop(script);
        self
    }

    /// Adds a leaf; replies are attached to their top-level leaf
    pub fn add_leaf(&self, leaf: LeafEntity) -> &Self {
        let mut script = self.script();
        match leaf.parent_leaf_id.clone() {
            Some(top) => script.replies.entry(top).or_default().push(leaf),
            None => script
                .threads
                .entry(leaf.child_external_id.clone())
                .or_default()
                .push(leaf),
        }
        drop(script);
        self
    }

    /// Adds `count` top-level leaves to a child
    pub fn add_leaves(&self, child_external_id: &str, count: usize) -> &Self {
        for i in 0..count {
            self.add_leaf(LeafEntity::new(
                format!("{}.c{}", child_external_id, i),
                child_external_id,
            ));
        }
        self
    }

    /// Sets the search results for a keyword
    pub fn set_search(&self, keyword: &str, hits: Vec<SearchHit>) -> &Self {
        self.script().searches.insert(keyword.to_string(), hits);
        self
    }

    /// Makes an alternate key resolve to a parent id
    pub fn add_alternate_key(&self, key: &str, parent_external_id: &str) -> &Self {
        self.script()
            .keys
            .insert(key.to_string(), parent_external_id.to_string());
        self
    }

    /// Fails the `nth` call (1-based) of `op` once with `error`
    pub fn fail_call(&self, op: SourceOp, nth: usize, error: SourceError) -> &Self {
        self.script().faults.push(Fault {
            op,
            nth: Some(nth),
            error,
        });
        self
    }

    /// Fails every call of `op` with `error`
    pub fn fail_always(&self, op: SourceOp, error: SourceError) -> &Self {
        self.script().faults.push(Fault {
            op,
            nth: None,
            error,
        });
        self
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<SourceCall> {
        self.script().calls.clone()
    }

    /// Number of calls received for one operation
    pub fn call_count(&self, op: SourceOp) -> usize {
        self.script().counts.get(&op).copied().unwrap_or(0)
    }

    /// Records the call and returns the scripted fault for it, if any
    fn enter(&self, op: SourceOp, credential: &Credential, subject: &str) -> SourceResult<()> {
        let mut script = self.script();
        let n = {
            let count = script.counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        script.calls.push(SourceCall {
            op,
            credential_id: credential.id.clone(),
            subject: subject.to_string(),
        });

        let hit = script
            .faults
            .iter()
            .position(|f| f.op == op && f.nth.map_or(true, |nth| nth == n));
        match hit {
            Some(idx) if script.faults[idx].nth.is_some() => Err(script.faults.remove(idx).error),
            Some(idx) => Err(script.faults[idx].error.clone()),
            None => Ok(()),
        }
    }

    fn paginate<T: Clone>(&self, items: &[T], cursor: Option<&str>, cost: i64) -> SourceResult<Page<T>> {
        let start = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| SourceError::Malformed(format!("bad cursor {}", raw)))?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        let page = items.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        Ok(Page {
            items: page,
            cost,
            next_cursor: (end < items.len()).then(|| end.to_string()),
        })
    }
}

impl SourceClient for ScriptedSource {
    fn search(
        &self,
        credential: &Credential,
        keyword: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> SourceResult<Page<SearchHit>> {
        self.enter(SourceOp::Search, credential, keyword)?;
        let hits = self.script().searches.get(keyword).cloned().unwrap_or_default();
        let mut page = self.paginate(&hits, cursor, SourceOp::Search.cost())?;
        page.items.truncate(page_size);
        Ok(page)
    }

    fn parent_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ParentEntity>> {
        self.enter(SourceOp::ParentDetails, credential, &external_ids.join(","))?;
        let script = self.script();
        let items = external_ids
            .iter()
            .filter_map(|id| script.parents.get(id).cloned())
            .collect();
        Ok(Page::last(items, SourceOp::ParentDetails.cost()))
    }

    fn child_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ChildEntity>> {
        self.enter(SourceOp::ChildDetails, credential, &external_ids.join(","))?;
        let script = self.script();
        let items = external_ids
            .iter()
            .filter_map(|id| script.children.get(id).cloned())
            .collect();
        Ok(Page::last(items, SourceOp::ChildDetails.cost()))
    }

    fn expand_page(
        &self,
        credential: &Credential,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<ChildEntity>> {
        self.enter(SourceOp::ExpandPage, credential, collection_id)?;
        let listing: Vec<ChildEntity> = {
            let script = self.script();
            let ids = script
                .collections
                .get(collection_id)
                .ok_or_else(|| SourceError::NotFound(format!("collection {}", collection_id)))?;
            ids.iter()
                .filter_map(|id| script.children.get(id))
                .enumerate()
                .map(|(position, child)| {
                    // Listings only carry the summary fields
                    let mut summary =
                        ChildEntity::discovered(&child.external_id, &child.parent_external_id);
                    summary.collection_id = Some(collection_id.to_string());
                    summary.position = Some(position as i64);
                    summary.title = child.title.clone();
                    summary
                })
                .collect()
        };
        self.paginate(&listing, cursor, SourceOp::ExpandPage.cost())
    }

    fn leaf_page(
        &self,
        credential: &Credential,
        child_external_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafThread>> {
        self.enter(SourceOp::LeafPage, credential, child_external_id)?;
        let threads: Vec<LeafThread> = {
            let script = self.script();
            if !script.children.contains_key(child_external_id) {
                return Err(SourceError::NotFound(format!("video {}", child_external_id)));
            }
            script
                .threads
                .get(child_external_id)
                .map(|tops| {
                    tops.iter()
                        .map(|top| {
                            let all = script.replies.get(&top.external_id).cloned().unwrap_or_default();
                            let mut top = top.clone();
                            top.reply_count = Some(all.len() as i64);
                            LeafThread {
                                top,
                                replies: all.into_iter().take(INLINE_REPLIES).collect(),
                            }
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        self.paginate(&threads, cursor, SourceOp::LeafPage.cost())
    }

    fn sub_leaf_page(
        &self,
        credential: &Credential,
        parent_leaf_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafEntity>> {
        self.enter(SourceOp::SubLeafPage, credential, parent_leaf_id)?;
        let replies = self
            .script()
            .replies
            .get(parent_leaf_id)
            .cloned()
            .unwrap_or_default();
        self.paginate(&replies, cursor, SourceOp::SubLeafPage.cost())
    }

    fn resolve_parent(
        &self,
        credential: &Credential,
        alternate_key: &str,
    ) -> SourceResult<Page<String>> {
        self.enter(SourceOp::ResolveParent, credential, alternate_key)?;
        self.script()
            .keys
            .get(alternate_key)
            .cloned()
            .map(|id| Page::last(vec![id], SourceOp::ResolveParent.cost()))
            .ok_or_else(|| SourceError::NotFound(format!("alternate key {}", alternate_key)))
    }
}
