use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::DomPath;

pub mod webdriver;

/// Lightweight descriptor of one live element, as returned by scoped queries.
///
/// Carries just enough to re-address the node (`dom_path`) and to label it in
/// output; never a live handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    pub dom_path: DomPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    /// First chunk of trimmed text content, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    pub child_count: usize,
}

/// Narrow seam to the live document, supplied by a browser-automation layer.
///
/// Every method is scoped: queries run inside a `DomPath` subtree (or the
/// document root element when `scope` is `None`), and actions target exactly
/// one `DomPath`. Implementations must not cache node identity across calls;
/// a `DomPath` that no longer dereferences is reported as `None`/absent, not
/// as an error.
#[async_trait]
pub trait DocumentAccess: Send + Sync {
    /// Evaluate a CSS query against the subtree under `scope`, returning
    /// matches in document order. The scope element itself is not a candidate.
    async fn query(&self, scope: Option<&DomPath>, css: &str) -> Result<Vec<ElementDescriptor>>;

    /// Dereference a path captured earlier; `None` when the document has
    /// mutated and the path no longer addresses an element.
    async fn node_at(&self, path: &DomPath) -> Result<Option<ElementDescriptor>>;

    /// Direct element children of the node at `path`, in document order
    async fn children_of(&self, path: &DomPath) -> Result<Vec<ElementDescriptor>>;

    /// Trimmed text content, `None` when the node is gone or has no text
    async fn read_text(&self, path: &DomPath) -> Result<Option<String>>;

    /// Attribute value, `None` when absent or the node is gone
    async fn read_attribute(&self, path: &DomPath, name: &str) -> Result<Option<String>>;

    /// Full synthetic pointer interaction: hover, pointerdown, pointerup,
    /// click, in that order
    async fn dispatch_pointer_sequence(&self, path: &DomPath) -> Result<()>;

    async fn scroll_into_view(&self, path: &DomPath) -> Result<()>;

    async fn scroll_by(&self, path: &DomPath, dx: i64, dy: i64) -> Result<()>;

    /// Attach an ephemeral marker attribute to the node. With a TTL the
    /// marker doubles as a visual highlight and removes itself; without one
    /// it stays until navigation and can be queried back as
    /// `[data-domscope-pin="<marker>"]`.
    async fn annotate(&self, path: &DomPath, marker: &str, ttl_ms: Option<u64>) -> Result<()>;

    /// Monotonic navigation generation. Two equal readings bracket a pass
    /// against one and the same document.
    async fn document_epoch(&self) -> Result<u64>;

    /// URL of the current document, when the backend knows it
    async fn current_url(&self) -> Result<Option<url::Url>>;
}
