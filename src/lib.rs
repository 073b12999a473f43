//! # domscope
#![allow(clippy::uninlined_format_args)]
//!
//! Scoped container resolution for web automation.
//!
//! A declarative, per-site library of structural "container" definitions is
//! matched against a live, mutating document, and actions (highlight, click,
//! extract, scroll) run only within the boundaries of a validated match.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Resolve the container tree for a page
//! domscope resolve "https://news.example.com" --library sites.json
//!
//! # Click a container (re-resolved at action time, never from a cached handle)
//! domscope click "https://news.example.com" list_root.item --index 2
//!
//! # Extract fields relative to a matched container
//! domscope extract "https://news.example.com" list_root.item \
//!     --field title=".headline" --field author=".byline a"
//!
//! # Materialize a bounded branch of the page under a captured dom path
//! domscope branch "https://news.example.com" 1.0.3 --max-depth 2 --max-children 10
//!
//! # Show what the library loaded and what it skipped
//! domscope check --library sites.json
//! ```
//!
//! ## Library Usage
//!
//! The engine consumes the live page through the [`document::DocumentAccess`]
//! trait; anything able to run scoped structural queries and dispatch
//! synthetic events can back it. A WebDriver implementation ships in
//! [`document::webdriver`].
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use domscope::document::webdriver::{BrowserType, WebDriverDocument};
//! use domscope::registry::LibraryRegistry;
//! use domscope::resolver;
//!
//! let registry = LibraryRegistry::load(Some("sites.json".into()))?;
//! let doc = WebDriverDocument::connect(BrowserType::Firefox, None, true).await?;
//! doc.goto("https://news.example.com").await?;
//!
//! let snapshot = registry.snapshot();
//! let url = url::Url::parse("https://news.example.com")?;
//! if let Some(library) = snapshot.site_for_url(&url) {
//!     let pass = resolver::resolve_site(&doc, library, Some(&url)).await?;
//!     println!("{:?}", pass);
//! }
//! # Ok(())
//! # }
//! ```

/// Narrow seam to the live document plus the WebDriver backend
pub mod document;

/// Custom error type with process exit codes
pub mod errors;

/// Selector candidate evaluation within one scope
pub mod evaluator;

/// Capability-gated scoped actions
pub mod executor;

/// Bounded materialization of matched subtrees
pub mod materializer;

/// Container library loading, validation and atomic snapshots
pub mod registry;

/// Recursive definition-tree resolution
pub mod resolver;

/// Container, selector and match-tree data model
pub mod types;

pub use document::{DocumentAccess, ElementDescriptor};
pub use errors::DomscopeError;
pub use executor::{Action, ActionOutcome, ScopedExecutor};
pub use registry::{LibraryRegistry, LoadReport, RegistrySnapshot};
pub use resolver::ResolvedPass;
pub use types::{
    BranchFetch, Capability, ContainerDefinition, ContainerKind, DomPath, MatchOutcome,
    MatchResult, MatchSnapshot, NodeDescriptor, OutputFormat, SelectorCandidate, SelectorHit,
    SiteLibrary, StructuralConstraints,
};
