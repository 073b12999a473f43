// Common test utilities: an in-memory document with spy counters, plus
// builders for fake element trees and container definitions.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use domscope::document::{DocumentAccess, ElementDescriptor};
use domscope::types::{ContainerDefinition, DomPath};

/// One element of the fake tree
#[derive(Clone, Debug)]
pub struct FakeNode {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<FakeNode>,
}

/// Start building an element
pub fn el(tag: &str) -> FakeNode {
    FakeNode {
        tag: tag.to_string(),
        id: None,
        classes: Vec::new(),
        attrs: HashMap::new(),
        text: None,
        children: Vec::new(),
    }
}

#[allow(dead_code)]
impl FakeNode {
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn child(mut self, child: FakeNode) -> Self {
        self.children.push(child);
        self
    }

    fn full_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(text) = &self.text {
            parts.push(text.clone());
        }
        for child in &self.children {
            let t = child.full_text();
            if !t.is_empty() {
                parts.push(t);
            }
        }
        parts.join(" ").trim().to_string()
    }
}

/// In-memory stand-in for the browser-automation collaborator.
///
/// Every interaction is recorded so tests can assert not just outcomes but
/// the absence of side effects (e.g. zero pointer events on a failed click).
pub struct FakeDocument {
    root: Mutex<FakeNode>,
    epoch: AtomicU64,
    url: Mutex<Option<Url>>,
    pub queries: Mutex<Vec<(Option<DomPath>, String)>>,
    pub pointer_sequences: Mutex<Vec<DomPath>>,
    pub scrolls: Mutex<Vec<(DomPath, Option<(i64, i64)>)>>,
    pub annotations: Mutex<Vec<(DomPath, String, Option<u64>)>>,
}

#[allow(dead_code)]
impl FakeDocument {
    pub fn new(root: FakeNode) -> Self {
        FakeDocument {
            root: Mutex::new(root),
            epoch: AtomicU64::new(1),
            url: Mutex::new(None),
            queries: Mutex::new(Vec::new()),
            pointer_sequences: Mutex::new(Vec::new()),
            scrolls: Mutex::new(Vec::new()),
            annotations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_url(self, url: &str) -> Self {
        *self.url.lock().unwrap() = Some(Url::parse(url).unwrap());
        self
    }

    /// Replace the whole document, as a navigation would
    pub fn navigate(&self, new_root: FakeNode) {
        *self.root.lock().unwrap() = new_root;
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    /// How many queries ran a given selector expression
    pub fn queries_for(&self, css: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, q)| q == css)
            .count()
    }

    pub fn pointer_sequence_count(&self) -> usize {
        self.pointer_sequences.lock().unwrap().len()
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.lock().unwrap().len()
    }

    fn describe(node: &FakeNode, path: &DomPath) -> ElementDescriptor {
        let text = node.full_text();
        ElementDescriptor {
            tag: node.tag.clone(),
            dom_path: path.clone(),
            id: node.id.clone(),
            classes: node.classes.clone(),
            text_preview: if text.is_empty() {
                None
            } else {
                Some(text.chars().take(80).collect())
            },
            child_count: node.children.len(),
        }
    }

    fn with_node<T>(&self, path: &DomPath, f: impl FnOnce(&FakeNode) -> T) -> Option<T> {
        let root = self.root.lock().unwrap();
        node_at(&root, path).map(f)
    }
}

fn node_at<'a>(root: &'a FakeNode, path: &DomPath) -> Option<&'a FakeNode> {
    let mut node = root;
    for step in path.steps() {
        node = node.children.get(*step as usize)?;
    }
    Some(node)
}

fn node_at_mut<'a>(root: &'a mut FakeNode, path: &DomPath) -> Option<&'a mut FakeNode> {
    let mut node = root;
    for step in path.steps() {
        node = node.children.get_mut(*step as usize)?;
    }
    Some(node)
}

/// Preorder walk of strict descendants of `scope_path`
fn descendants(root: &FakeNode, scope_path: &DomPath, out: &mut Vec<DomPath>) {
    if let Some(scope) = node_at(root, scope_path) {
        for (i, _) in scope.children.iter().enumerate() {
            let child_path = scope_path.child(i as u32);
            out.push(child_path.clone());
            descendants(root, &child_path, out);
        }
    }
}

// --- tiny CSS subset -------------------------------------------------------
//
// Supports what container libraries in these tests use: compound selectors of
// tag, #id, .class and [attr="value"], combined with descendant (space) and
// child (>) combinators. Matching follows querySelectorAll semantics:
// candidates are descendants of the scope, but ancestor parts of the selector
// may match above the scope.

#[derive(Clone, Debug, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Clone, Debug, Default)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

fn parse_simple(token: &str) -> SimpleSelector {
    let mut simple = SimpleSelector::default();
    let mut rest = token;

    // Leading tag name
    let boundary = rest
        .find(|c| c == '#' || c == '.' || c == '[')
        .unwrap_or(rest.len());
    if boundary > 0 {
        let tag = &rest[..boundary];
        if tag != "*" {
            simple.tag = Some(tag.to_string());
        }
        rest = &rest[boundary..];
    }

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('#') {
            let end = tail
                .find(|c| c == '#' || c == '.' || c == '[')
                .unwrap_or(tail.len());
            simple.id = Some(tail[..end].to_string());
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('.') {
            let end = tail
                .find(|c| c == '#' || c == '.' || c == '[')
                .unwrap_or(tail.len());
            simple.classes.push(tail[..end].to_string());
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail.find(']').unwrap_or(tail.len());
            let inner = &tail[..end];
            match inner.split_once('=') {
                Some((name, value)) => {
                    let value = value.trim_matches(|c| c == '"' || c == '\'');
                    simple
                        .attrs
                        .push((name.to_string(), Some(value.to_string())));
                }
                None => simple.attrs.push((inner.to_string(), None)),
            }
            rest = tail.get(end + 1..).unwrap_or("");
        } else {
            break;
        }
    }

    simple
}

fn parse_selector(css: &str) -> Vec<(Combinator, SimpleSelector)> {
    let spaced = css.replace('>', " > ");
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    for token in spaced.split_whitespace() {
        if token == ">" {
            pending = Combinator::Child;
            continue;
        }
        parts.push((pending.clone(), parse_simple(token)));
        pending = Combinator::Descendant;
    }
    parts
}

fn matches_simple(node: &FakeNode, simple: &SimpleSelector) -> bool {
    if let Some(tag) = &simple.tag {
        if node.tag != *tag {
            return false;
        }
    }
    if let Some(id) = &simple.id {
        if node.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    for class in &simple.classes {
        if !node.classes.contains(class) {
            return false;
        }
    }
    for (name, expected) in &simple.attrs {
        match node.attrs.get(name) {
            Some(actual) => {
                if let Some(expected) = expected {
                    if actual != expected {
                        return false;
                    }
                }
            }
            None => return false,
        }
    }
    true
}

/// Whether the node at `path` matches the full selector, checking ancestor
/// parts against the real ancestry
fn matches_selector(root: &FakeNode, path: &DomPath, parts: &[(Combinator, SimpleSelector)]) -> bool {
    fn at_depth<'a>(root: &'a FakeNode, path: &DomPath, depth: usize) -> Option<&'a FakeNode> {
        node_at(root, &DomPath::new(path.steps()[..depth].to_vec()))
    }

    fn matches_from(
        root: &FakeNode,
        path: &DomPath,
        depth: usize,
        parts: &[(Combinator, SimpleSelector)],
    ) -> bool {
        let (combinator, simple) = match parts.last() {
            Some(last) => last,
            None => return true,
        };
        let node = match at_depth(root, path, depth) {
            Some(node) => node,
            None => return false,
        };
        if !matches_simple(node, simple) {
            return false;
        }
        let remaining = &parts[..parts.len() - 1];
        if remaining.is_empty() {
            return true;
        }
        if depth == 0 {
            return false;
        }
        match combinator {
            Combinator::Child => matches_from(root, path, depth - 1, remaining),
            Combinator::Descendant => {
                (0..depth).rev().any(|d| matches_from(root, path, d, remaining))
            }
        }
    }

    matches_from(root, path, path.depth(), parts)
}

#[async_trait]
impl DocumentAccess for FakeDocument {
    async fn query(&self, scope: Option<&DomPath>, css: &str) -> Result<Vec<ElementDescriptor>> {
        self.queries
            .lock()
            .unwrap()
            .push((scope.cloned(), css.to_string()));

        let root = self.root.lock().unwrap();
        let scope_path = scope.cloned().unwrap_or_else(DomPath::root);
        if node_at(&root, &scope_path).is_none() {
            return Ok(Vec::new());
        }

        let parts = parse_selector(css);
        let mut candidate_paths = Vec::new();
        descendants(&root, &scope_path, &mut candidate_paths);

        let mut results = Vec::new();
        for path in candidate_paths {
            if matches_selector(&root, &path, &parts) {
                let node = node_at(&root, &path).unwrap();
                results.push(FakeDocument::describe(node, &path));
            }
        }
        Ok(results)
    }

    async fn node_at(&self, path: &DomPath) -> Result<Option<ElementDescriptor>> {
        Ok(self.with_node(path, |node| FakeDocument::describe(node, path)))
    }

    async fn children_of(&self, path: &DomPath) -> Result<Vec<ElementDescriptor>> {
        let root = self.root.lock().unwrap();
        let node = match node_at(&root, path) {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };
        Ok(node
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| FakeDocument::describe(child, &path.child(i as u32)))
            .collect())
    }

    async fn read_text(&self, path: &DomPath) -> Result<Option<String>> {
        Ok(self
            .with_node(path, |node| node.full_text())
            .filter(|t| !t.is_empty()))
    }

    async fn read_attribute(&self, path: &DomPath, name: &str) -> Result<Option<String>> {
        Ok(self
            .with_node(path, |node| node.attrs.get(name).cloned())
            .flatten())
    }

    async fn dispatch_pointer_sequence(&self, path: &DomPath) -> Result<()> {
        self.pointer_sequences.lock().unwrap().push(path.clone());
        Ok(())
    }

    async fn scroll_into_view(&self, path: &DomPath) -> Result<()> {
        self.scrolls.lock().unwrap().push((path.clone(), None));
        Ok(())
    }

    async fn scroll_by(&self, path: &DomPath, dx: i64, dy: i64) -> Result<()> {
        self.scrolls
            .lock()
            .unwrap()
            .push((path.clone(), Some((dx, dy))));
        Ok(())
    }

    async fn annotate(&self, path: &DomPath, marker: &str, ttl_ms: Option<u64>) -> Result<()> {
        self.annotations
            .lock()
            .unwrap()
            .push((path.clone(), marker.to_string(), ttl_ms));

        // Persistent pins land in the tree so scoped queries can find them
        // again; TTL highlights stay purely visual.
        if ttl_ms.is_none() {
            let mut root = self.root.lock().unwrap();
            if let Some(node) = node_at_mut(&mut root, path) {
                node.attrs
                    .insert("data-domscope-pin".to_string(), marker.to_string());
            }
        }
        Ok(())
    }

    async fn document_epoch(&self) -> Result<u64> {
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn current_url(&self) -> Result<Option<Url>> {
        Ok(self.url.lock().unwrap().clone())
    }
}

/// Parse a container definition from inline JSON
#[allow(dead_code)]
pub fn definition(json: serde_json::Value) -> ContainerDefinition {
    serde_json::from_value(json).expect("invalid test definition")
}

/// Write a library index to a temp file and load a registry from it
#[allow(dead_code)]
pub fn registry_from(index: serde_json::Value) -> (tempfile::NamedTempFile, domscope::LibraryRegistry) {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", serde_json::to_string(&index).unwrap()).unwrap();
    file.flush().unwrap();
    let registry =
        domscope::LibraryRegistry::load(Some(file.path().to_path_buf())).unwrap();
    (file, registry)
}
