//! Bounded, on-demand materialization of a matched subtree.
//!
//! Consumers render large containers incrementally: fetch a branch with small
//! bounds, merge it into what is already on screen, fetch deeper on demand.
//! Cost is bounded by `max_depth`/`max_children` rather than a timeout, since
//! per-node traversal is cheap but unbounded trees are the real risk.

use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

use crate::document::{DocumentAccess, ElementDescriptor};
use crate::types::{BranchFetch, DomPath, NodeDescriptor};

/// Fetch a descriptor subtree rooted at `path`.
///
/// `max_depth` levels below the root are included; each node returns at most
/// `max_children` children and flags itself truncated when more exist. A
/// `path` that no longer dereferences, or a document that navigates away
/// mid-walk, yields `Stale` - an expected outcome, not an error.
pub async fn fetch_branch(
    doc: &dyn DocumentAccess,
    path: &DomPath,
    max_depth: usize,
    max_children: usize,
) -> Result<BranchFetch> {
    let epoch_before = doc.document_epoch().await?;

    let root = match doc.node_at(path).await? {
        Some(root) => root,
        None => {
            debug!("Branch root {} no longer resolves", path);
            return Ok(BranchFetch::Stale);
        }
    };

    let tree = materialize(doc, &root, max_depth, max_children).await?;

    if doc.document_epoch().await? != epoch_before {
        debug!("Document navigated during branch fetch; discarding result");
        return Ok(BranchFetch::Stale);
    }

    Ok(BranchFetch::Delivered { root: tree })
}

/// Level-bounded walk below one element
async fn materialize(
    doc: &dyn DocumentAccess,
    element: &ElementDescriptor,
    depth_left: usize,
    max_children: usize,
) -> Result<NodeDescriptor> {
    let mut node = describe(element);

    if depth_left == 0 {
        // Children exist but this fetch does not descend into them
        node.truncated = element.child_count > 0;
        return Ok(node);
    }

    let children = doc.children_of(&element.dom_path).await?;
    node.truncated = children.len() > max_children;

    for child in children.into_iter().take(max_children) {
        let materialized = Box::pin(materialize(doc, &child, depth_left - 1, max_children)).await?;
        node.children.push(materialized);
    }

    Ok(node)
}

/// Small identifying attribute set for one node
fn describe(element: &ElementDescriptor) -> NodeDescriptor {
    let mut attributes = BTreeMap::new();
    if let Some(id) = &element.id {
        attributes.insert("id".to_string(), id.clone());
    }
    if !element.classes.is_empty() {
        attributes.insert("class".to_string(), element.classes.join(" "));
    }
    if let Some(text) = &element.text_preview {
        attributes.insert("text".to_string(), text.clone());
    }

    NodeDescriptor {
        tag: element.tag.clone(),
        dom_path: element.dom_path.clone(),
        attributes,
        children: Vec::new(),
        truncated: false,
    }
}
