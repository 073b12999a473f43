//! Top-down resolution of a definition tree into a mirrored match tree.
//!
//! Children are only ever evaluated inside their parent's matched node, and a
//! miss short-circuits the whole subtree: descendants of an unmatched
//! container are mirrored as not-found without their selectors running at all.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};
use url::Url;

use crate::document::DocumentAccess;
use crate::evaluator;
use crate::types::{
    ContainerDefinition, DomPath, MatchOutcome, MatchResult, MatchSnapshot, SiteLibrary,
};

/// Outcome of a resolution pass. A pass whose document navigated away
/// mid-walk is discarded as stale rather than reported as a partial tree.
#[derive(Clone, Debug)]
pub enum ResolvedPass {
    Snapshot(MatchSnapshot),
    Stale,
}

/// Resolve one site library against the current document.
///
/// Picks the root container whose page patterns match `url` (first match in
/// load order; a root without patterns matches any page), then walks its
/// definition tree. Pure with respect to the document: no mutation, no
/// caching between calls.
pub async fn resolve_site(
    doc: &dyn DocumentAccess,
    library: &SiteLibrary,
    url: Option<&Url>,
) -> Result<ResolvedPass> {
    let root = match select_root(library, url) {
        Some(root) => root,
        None => anyhow::bail!(
            "No site library matches: no root container of '{}' applies to this page",
            library.site_key
        ),
    };

    info!(
        "Resolving '{}' root '{}' against current document",
        library.site_key, root.id
    );

    let epoch_before = doc.document_epoch().await?;
    let tree = resolve_container(doc, root, None).await?;
    let epoch_after = doc.document_epoch().await?;

    if epoch_before != epoch_after {
        debug!("Document navigated during resolution pass; discarding result");
        return Ok(ResolvedPass::Stale);
    }

    Ok(ResolvedPass::Snapshot(MatchSnapshot {
        site_key: library.site_key.clone(),
        root_container_id: root.id.clone(),
        tree,
        timestamp: Utc::now(),
    }))
}

/// Pick the root container applicable to `url`.
///
/// First root whose patterns match wins; with no URL available, the first
/// root wins.
pub fn select_root<'a>(
    library: &'a SiteLibrary,
    url: Option<&Url>,
) -> Option<&'a ContainerDefinition> {
    let path = url.map(|u| u.path().to_string());
    library.roots().find(|root| match &path {
        None => true,
        Some(path) => {
            root.page_patterns.is_empty()
                || root
                    .page_patterns
                    .iter()
                    .any(|pattern| page_pattern_matches(pattern, path))
        }
    })
}

/// Match a page pattern against a URL path. A trailing `*` matches any
/// suffix; otherwise the comparison is exact.
pub fn page_pattern_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        path.starts_with(prefix)
    } else {
        pattern == path
    }
}

/// Resolve one definition inside `scope` (`None` means document scope, which
/// is only ever correct for root containers).
pub async fn resolve_container(
    doc: &dyn DocumentAccess,
    definition: &ContainerDefinition,
    scope: Option<&DomPath>,
) -> Result<MatchResult> {
    let matched = evaluator::evaluate(
        doc,
        scope,
        &definition.selector_candidates,
        &definition.constraints,
    )
    .await?;

    let matched = match matched {
        Some(matched) => matched,
        None => {
            debug!("Container '{}' not found in scope", definition.id);
            return Ok(MatchResult::not_found_subtree(definition));
        }
    };

    let mut children = Vec::with_capacity(definition.children.len());
    for child in &definition.children {
        let resolved =
            Box::pin(resolve_container(doc, child, Some(&matched.element.dom_path))).await?;
        children.push(resolved);
    }

    Ok(MatchResult {
        container_id: definition.id.clone(),
        outcome: MatchOutcome::Found {
            dom_path: matched.element.dom_path,
            selector: matched.hit,
        },
        children,
    })
}
