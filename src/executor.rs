//! Capability-gated actions against a single named container.
//!
//! Every execution re-resolves the minimal root-to-target chain against the
//! live document before touching anything; a stale `MatchSnapshot` is never a
//! valid source of handles. A resolution miss produces a typed not-found
//! outcome and no side effect at all; scope is never widened as a fallback.

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::document::{DocumentAccess, ElementDescriptor};
use crate::evaluator;
use crate::registry::LibraryRegistry;
use crate::types::{Capability, ContainerDefinition, DomPath, SelectorHit};

/// Default highlight duration when the caller does not pick one
pub const DEFAULT_HIGHLIGHT_TTL_MS: u64 = 2000;

/// One scoped action request
#[derive(Clone, Debug)]
pub enum Action {
    Highlight { ttl_ms: Option<u64> },
    Click,
    /// Without an offset the element is scrolled into view
    Scroll { by: Option<(i64, i64)> },
    /// Field name -> selector relative to the matched container
    Extract { fields: BTreeMap<String, String> },
}

impl Action {
    /// The capability a definition must grant for this action
    pub fn capability(&self) -> Capability {
        match self {
            Action::Highlight { .. } => Capability::Highlight,
            Action::Click => Capability::Click,
            Action::Scroll { .. } => Capability::Scroll,
            Action::Extract { .. } => Capability::Extract,
        }
    }
}

/// Result of one scoped action. `NotFound` is an ordinary outcome on dynamic
/// pages, not an error.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Performed {
        container_id: String,
        dom_path: DomPath,
        selector: SelectorHit,
        /// Extracted record; present only for `extract`. Missing fields are
        /// null, not errors.
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<BTreeMap<String, Option<String>>>,
    },
    NotFound {
        container_id: String,
    },
}

/// Session-scoped binding of a container to one chosen instance
#[derive(Clone, Debug)]
struct InstancePin {
    marker: String,
    registry_version: u64,
}

/// Executes scoped operations, re-resolving on every call
pub struct ScopedExecutor {
    registry: Arc<LibraryRegistry>,
    /// (session, container id) -> pinned instance. The pin is advisory: the
    /// live document is the source of truth and a pin that no longer
    /// dereferences falls back to fresh selection.
    pins: DashMap<(String, String), InstancePin>,
}

impl ScopedExecutor {
    pub fn new(registry: Arc<LibraryRegistry>) -> Self {
        ScopedExecutor {
            registry,
            pins: DashMap::new(),
        }
    }

    /// Drop all instance pins held for a session
    pub fn clear_session(&self, session: &str) {
        self.pins.retain(|(s, _), _| s != session);
    }

    /// Re-resolve `container_id` and perform exactly one action on it.
    ///
    /// `site`: explicit site key, or `None` to select by the document's
    /// current URL. `scope_override`: evaluate the target directly inside
    /// this path instead of re-walking the root chain (for callers holding a
    /// parent's `dom_path` from a fresh pass). `index`: explicit instance
    /// pick when the selector legitimately matches several elements; the
    /// chosen instance is pinned for the session.
    pub async fn execute(
        &self,
        doc: &dyn DocumentAccess,
        session: &str,
        site: Option<&str>,
        container_id: &str,
        action: Action,
        scope_override: Option<DomPath>,
        index: Option<usize>,
    ) -> Result<ActionOutcome> {
        let snapshot = self.registry.snapshot();

        let library = match site {
            Some(key) => snapshot
                .site_by_key(key)
                .ok_or_else(|| anyhow::anyhow!("No site library matches: site key '{}'", key))?,
            None => {
                let url = doc.current_url().await?.ok_or_else(|| {
                    anyhow::anyhow!("No site library matches: document has no URL and no site key was given")
                })?;
                snapshot.site_for_url(&url).ok_or_else(|| {
                    anyhow::anyhow!("No site library matches: {}", url)
                })?
            }
        };

        let definition = library.container(container_id).ok_or_else(|| {
            anyhow::anyhow!(
                "Container id '{}' is not defined for site '{}'",
                container_id,
                library.site_key
            )
        })?;

        let capability = action.capability();
        if !definition.supports(capability) {
            anyhow::bail!(
                "Container '{}' does not grant the '{}' capability",
                container_id,
                capability.name()
            );
        }

        // Re-resolve before acting. On a miss we return without side effects.
        let resolved = match scope_override {
            Some(scope) => {
                evaluator::evaluate_instances(
                    doc,
                    Some(&scope),
                    &definition.selector_candidates,
                    &definition.constraints,
                )
                .await?
                .map(|found| (found, Some(scope)))
            }
            None => self.resolve_chain(doc, library.root_of(container_id), definition).await?,
        };

        let (found, final_scope) = match resolved {
            Some(resolved) => resolved,
            None => {
                debug!("Container '{}' did not resolve; no action taken", container_id);
                return Ok(ActionOutcome::NotFound {
                    container_id: container_id.to_string(),
                });
            }
        };

        let chosen = match self
            .choose_instance(
                doc,
                session,
                container_id,
                &found.instances,
                final_scope.as_ref(),
                index,
                snapshot.version,
            )
            .await?
        {
            Some(chosen) => chosen,
            None => {
                return Ok(ActionOutcome::NotFound {
                    container_id: container_id.to_string(),
                });
            }
        };

        let mut fields_out = None;
        match &action {
            Action::Highlight { ttl_ms } => {
                let marker = format!("ds-hl-{}", uuid::Uuid::new_v4().simple());
                doc.annotate(
                    &chosen.dom_path,
                    &marker,
                    Some(ttl_ms.unwrap_or(DEFAULT_HIGHLIGHT_TTL_MS)),
                )
                .await?;
            }
            Action::Click => {
                doc.dispatch_pointer_sequence(&chosen.dom_path).await?;
            }
            Action::Scroll { by } => match by {
                Some((dx, dy)) => doc.scroll_by(&chosen.dom_path, *dx, *dy).await?,
                None => doc.scroll_into_view(&chosen.dom_path).await?,
            },
            Action::Extract { fields } => {
                let mut record = BTreeMap::new();
                for (name, relative_css) in fields {
                    let value = self.extract_field(doc, &chosen.dom_path, relative_css).await?;
                    record.insert(name.clone(), value);
                }
                fields_out = Some(record);
            }
        }

        info!(
            "Performed '{}' on container '{}' at {}",
            capability.name(),
            container_id,
            chosen.dom_path
        );

        Ok(ActionOutcome::Performed {
            container_id: container_id.to_string(),
            dom_path: chosen.dom_path.clone(),
            selector: found.hit,
            fields: fields_out,
        })
    }

    /// Walk the minimal root-to-target chain, each step scoped to the
    /// previous match. Returns the target's qualifying instances plus the
    /// scope they were found in, or `None` on any miss along the chain.
    async fn resolve_chain(
        &self,
        doc: &dyn DocumentAccess,
        root: Option<&ContainerDefinition>,
        target: &ContainerDefinition,
    ) -> Result<Option<(evaluator::EvaluatedInstances, Option<DomPath>)>> {
        let root = match root {
            Some(root) => root,
            None => return Ok(None),
        };
        let chain = match root.path_to(&target.id) {
            Some(chain) => chain,
            None => return Ok(None),
        };

        let mut scope: Option<DomPath> = None;
        for definition in &chain[..chain.len() - 1] {
            let matched = evaluator::evaluate(
                doc,
                scope.as_ref(),
                &definition.selector_candidates,
                &definition.constraints,
            )
            .await?;
            match matched {
                Some(matched) => scope = Some(matched.element.dom_path),
                None => {
                    debug!(
                        "Ancestor '{}' of '{}' did not resolve",
                        definition.id, target.id
                    );
                    return Ok(None);
                }
            }
        }

        let found = evaluator::evaluate_instances(
            doc,
            scope.as_ref(),
            &target.selector_candidates,
            &target.constraints,
        )
        .await?;
        Ok(found.map(|found| (found, scope)))
    }

    /// Pick one instance from the qualifying set: explicit index pins it,
    /// an existing pin is honored while it still dereferences, and the
    /// default is the first instance in document order.
    #[allow(clippy::too_many_arguments)]
    async fn choose_instance(
        &self,
        doc: &dyn DocumentAccess,
        session: &str,
        container_id: &str,
        instances: &[ElementDescriptor],
        scope: Option<&DomPath>,
        index: Option<usize>,
        registry_version: u64,
    ) -> Result<Option<ElementDescriptor>> {
        let pin_key = (session.to_string(), container_id.to_string());

        if let Some(index) = index {
            let chosen = match instances.get(index) {
                Some(chosen) => chosen.clone(),
                None => {
                    debug!(
                        "Index {} out of range for container '{}' ({} instance(s))",
                        index,
                        container_id,
                        instances.len()
                    );
                    return Ok(None);
                }
            };
            let marker = format!("ds-pin-{}", uuid::Uuid::new_v4().simple());
            doc.annotate(&chosen.dom_path, &marker, None).await?;
            self.pins.insert(
                pin_key,
                InstancePin {
                    marker,
                    registry_version,
                },
            );
            return Ok(Some(chosen));
        }

        // Copy the pin out so no map guard is held across awaits
        let pin = self.pins.get(&pin_key).map(|p| p.clone());
        if let Some(pin) = pin {
            if pin.registry_version == registry_version {
                let selector = format!("[data-domscope-pin=\"{}\"]", pin.marker);
                let pinned = doc.query(scope, &selector).await?;
                if let Some(element) = pinned.into_iter().next() {
                    debug!(
                        "Container '{}' stays pinned to instance at {}",
                        container_id, element.dom_path
                    );
                    return Ok(Some(element));
                }
            }
            // Pin went stale with the document (or a reload); back to fresh
            // document-order selection.
            self.pins.remove(&pin_key);
        }

        Ok(instances.first().cloned())
    }

    /// Read one extract field relative to the container scope; a missing
    /// field is null, not an error.
    async fn extract_field(
        &self,
        doc: &dyn DocumentAccess,
        scope: &DomPath,
        relative_css: &str,
    ) -> Result<Option<String>> {
        let matches = doc.query(Some(scope), relative_css).await?;
        match matches.first() {
            Some(element) => doc.read_text(&element.dom_path).await,
            None => Ok(None),
        }
    }
}
