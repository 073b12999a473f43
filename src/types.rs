use anyhow::Result;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Output format for CLI results
#[derive(Clone, Copy, Debug, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format for programmatic consumption
    Json,
    /// Human-readable simple format
    Simple,
}

/// Actions a container definition permits against its matched element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Highlight,
    Scroll,
    Click,
    Extract,
    FindChild,
}

impl Capability {
    /// Capability name as it appears in persisted definitions
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Highlight => "highlight",
            Capability::Scroll => "scroll",
            Capability::Click => "click",
            Capability::Extract => "extract",
            Capability::FindChild => "find-child",
        }
    }
}

/// Whether a definition is a page root or a nested component
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Top-level container; carries page patterns and anchors a resolution pass
    Root,
    /// Nested container, only ever resolved inside its parent's matched scope
    Component,
}

/// One ranked structural query expression
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SelectorCandidate {
    /// CSS expression evaluated within the parent scope
    pub css: String,
    /// Tag describing where this candidate came from (e.g. "stable-id", "layout")
    #[serde(default)]
    pub variant: String,
    /// Priority score; candidates are tried strictly in descending order
    pub score: i32,
}

/// Structural predicates a candidate element must satisfy before it is accepted
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StructuralConstraints {
    /// Element qualifies only if at least one descendant matches any of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_descendants_any: Vec<String>,
}

impl StructuralConstraints {
    pub fn is_empty(&self) -> bool {
        self.required_descendants_any.is_empty()
    }
}

/// A named, declarative description of a structural page fragment.
///
/// Definitions are immutable once loaded. The `id` is the full dotted path
/// from the root container (e.g. `list_root.item`), unique within a site.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ContainerDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    /// URL path patterns; present only on root containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_patterns: Vec<String>,
    /// Ordered selector candidates, highest score first after load
    #[serde(rename = "selectors")]
    pub selector_candidates: Vec<SelectorCandidate>,
    #[serde(
        default,
        rename = "metadata",
        skip_serializing_if = "StructuralConstraints::is_empty"
    )]
    pub constraints: StructuralConstraints,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContainerDefinition>,
}

impl ContainerDefinition {
    /// Whether this definition permits the given action
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Last segment of the dotted id
    pub fn leaf_id(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }

    /// Find a definition in this subtree by its full dotted id
    pub fn find(&self, id: &str) -> Option<&ContainerDefinition> {
        if self.id == id {
            return Some(self);
        }
        if !id.starts_with(&format!("{}.", self.id)) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Chain of definitions from this root down to `id`, inclusive.
    ///
    /// The minimal path an action has to re-resolve. `None` when `id` is not
    /// in this subtree.
    pub fn path_to(&self, id: &str) -> Option<Vec<&ContainerDefinition>> {
        if self.id == id {
            return Some(vec![self]);
        }
        if !id.starts_with(&format!("{}.", self.id)) {
            return None;
        }
        for child in &self.children {
            if let Some(mut tail) = child.path_to(id) {
                let mut chain = vec![self];
                chain.append(&mut tail);
                return Some(chain);
            }
        }
        None
    }
}

/// All containers known for one site, rooted at top-level definitions
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SiteLibrary {
    pub site_key: String,
    /// Host patterns; exact host or `*.` suffix wildcard
    pub host_matchers: Vec<String>,
    pub containers: Vec<ContainerDefinition>,
}

impl SiteLibrary {
    /// Root containers in load order
    pub fn roots(&self) -> impl Iterator<Item = &ContainerDefinition> {
        self.containers
            .iter()
            .filter(|c| c.kind == ContainerKind::Root)
    }

    /// Find any container in the library by full dotted id
    pub fn container(&self, id: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find_map(|c| c.find(id))
    }

    /// The root container whose subtree holds `id`
    pub fn root_of(&self, id: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.find(id).is_some())
    }
}

/// Stable structural address of an element within one render of the document.
///
/// A chain of child-element indices from the document root element. Not a
/// persistent identity: dereferencing later may legitimately fail once the
/// document has mutated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomPath(Vec<u32>);

impl DomPath {
    /// The document root element itself
    pub fn root() -> Self {
        DomPath(Vec::new())
    }

    pub fn new(steps: Vec<u32>) -> Self {
        DomPath(steps)
    }

    pub fn steps(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Extend with one child index
    pub fn child(&self, index: u32) -> Self {
        let mut steps = self.0.clone();
        steps.push(index);
        DomPath(steps)
    }

    /// Whether `self` addresses a node inside the subtree rooted at
    /// `ancestor`, the ancestor itself included
    pub fn is_within(&self, ancestor: &DomPath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Parse the dotted CLI form, e.g. "0.2.1"; empty string is the root
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(DomPath::root());
        }
        let steps = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| anyhow::anyhow!("Invalid dom path segment: {}", part))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DomPath(steps))
    }
}

impl fmt::Display for DomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// The selector candidate that produced a match
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectorHit {
    pub css: String,
    pub variant: String,
    pub score: i32,
}

impl From<&SelectorCandidate> for SelectorHit {
    fn from(candidate: &SelectorCandidate) -> Self {
        SelectorHit {
            css: candidate.css.clone(),
            variant: candidate.variant.clone(),
            score: candidate.score,
        }
    }
}

/// Outcome of matching one container definition
#[derive(Clone, Debug, PartialEq)]
pub enum MatchOutcome {
    Found {
        dom_path: DomPath,
        selector: SelectorHit,
    },
    NotFound,
}

/// One node of the match tree, mirroring the definition's children.
///
/// A `NotFound` node still carries its mirrored children so consumers see the
/// full shape, but none of those children ever had their selectors evaluated.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    pub container_id: String,
    pub outcome: MatchOutcome,
    pub children: Vec<MatchResult>,
}

impl MatchResult {
    pub fn is_found(&self) -> bool {
        matches!(self.outcome, MatchOutcome::Found { .. })
    }

    pub fn dom_path(&self) -> Option<&DomPath> {
        match &self.outcome {
            MatchOutcome::Found { dom_path, .. } => Some(dom_path),
            MatchOutcome::NotFound => None,
        }
    }

    /// Mirror a definition subtree as all-`NotFound` without evaluating anything
    pub fn not_found_subtree(definition: &ContainerDefinition) -> MatchResult {
        MatchResult {
            container_id: definition.id.clone(),
            outcome: MatchOutcome::NotFound,
            children: definition
                .children
                .iter()
                .map(MatchResult::not_found_subtree)
                .collect(),
        }
    }

    /// Find a result in this subtree by container id
    pub fn find(&self, container_id: &str) -> Option<&MatchResult> {
        if self.container_id == container_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(container_id))
    }
}

// Serialized with an explicit `found` flag so consumers never have to infer
// presence from missing fields.
impl Serialize for MatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.outcome {
            MatchOutcome::Found { dom_path, selector } => {
                let mut state = serializer.serialize_struct("MatchResult", 5)?;
                state.serialize_field("container_id", &self.container_id)?;
                state.serialize_field("found", &true)?;
                state.serialize_field("dom_path", &dom_path.to_string())?;
                state.serialize_field("selector", selector)?;
                state.serialize_field("children", &self.children)?;
                state.end()
            }
            MatchOutcome::NotFound => {
                let mut state = serializer.serialize_struct("MatchResult", 3)?;
                state.serialize_field("container_id", &self.container_id)?;
                state.serialize_field("found", &false)?;
                state.serialize_field("children", &self.children)?;
                state.end()
            }
        }
    }
}

/// Result of one full resolution pass. Ephemeral, never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct MatchSnapshot {
    pub site_key: String,
    pub root_container_id: String,
    pub tree: MatchResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Lightweight node descriptor produced by branch materialization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub tag: String,
    pub dom_path: DomPath,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDescriptor>,
    /// More children exist than `max_children` allowed us to return
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Outcome of a branch fetch; `stale` is an expected state, not an error
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BranchFetch {
    Delivered { root: NodeDescriptor },
    Stale,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
