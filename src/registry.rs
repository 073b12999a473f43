//! Container library loading, validation and atomic snapshot exposure.
//!
//! The registry is read-mostly: one snapshot is built at load time and only
//! ever replaced wholesale by `reload()`. Resolution passes clone the `Arc`
//! and keep reading their snapshot even while a reload swaps in a new one.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use url::Url;

use crate::types::{ContainerDefinition, ContainerKind, SiteLibrary};

/// One definition rejected at load time, with the reason it was skipped
#[derive(Clone, Debug, Serialize)]
pub struct SkippedDefinition {
    pub site_key: String,
    pub container_id: String,
    pub reason: String,
}

/// Summary of one library load
#[derive(Clone, Debug, Default, Serialize)]
pub struct LoadReport {
    pub sites: usize,
    pub containers: usize,
    pub skipped: Vec<SkippedDefinition>,
}

/// Immutable view of the whole library at one load
#[derive(Debug)]
pub struct RegistrySnapshot {
    pub libraries: Vec<SiteLibrary>,
    pub report: LoadReport,
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Select the site library for a URL: first host matcher that matches,
    /// with the more specific (longer) matcher winning ties across sites.
    pub fn site_for_url(&self, url: &Url) -> Option<&SiteLibrary> {
        let host = url.host_str()?;
        let mut best: Option<(&SiteLibrary, usize)> = None;
        for library in &self.libraries {
            for matcher in &library.host_matchers {
                if host_matches(matcher, host) {
                    let specificity = matcher.len();
                    if best.map(|(_, s)| specificity > s).unwrap_or(true) {
                        best = Some((library, specificity));
                    }
                }
            }
        }
        best.map(|(library, _)| library)
    }

    pub fn site_by_key(&self, key: &str) -> Option<&SiteLibrary> {
        self.libraries.iter().find(|l| l.site_key == key)
    }
}

/// Match one host pattern. `*.example.com` covers the apex host and any
/// subdomain; anything else is an exact comparison.
fn host_matches(pattern: &str, host: &str) -> bool {
    if let Some(apex) = pattern.strip_prefix("*.") {
        host == apex || host.ends_with(&pattern[1..])
    } else {
        pattern == host
    }
}

/// Process-wide registry of per-site container libraries
pub struct LibraryRegistry {
    path: PathBuf,
    snapshot: ArcSwap<RegistrySnapshot>,
    version: AtomicU64,
}

impl LibraryRegistry {
    /// Load the library from `path` (or the default location). An unreadable
    /// library file is the one fatal condition: without it no scoped
    /// operation is safe.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => default_library_path()?,
        };
        let snapshot = read_snapshot(&path, 1)?;
        info!(
            "Loaded container library: {} site(s), {} container(s), {} skipped",
            snapshot.report.sites,
            snapshot.report.containers,
            snapshot.report.skipped.len()
        );
        Ok(LibraryRegistry {
            path,
            snapshot: ArcSwap::from_pointee(snapshot),
            version: AtomicU64::new(1),
        })
    }

    /// Current snapshot. The returned `Arc` stays valid across reloads.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Re-read the library from storage and atomically replace the snapshot.
    /// In-flight readers keep the snapshot they already hold; there is no
    /// partially-updated state to observe.
    pub fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let next = Arc::new(read_snapshot(&self.path, version)?);
        self.snapshot.store(next.clone());
        info!(
            "Reloaded container library (version {}): {} site(s), {} skipped",
            version,
            next.report.sites,
            next.report.skipped.len()
        );
        Ok(next)
    }

    pub fn library_path(&self) -> &Path {
        &self.path
    }
}

/// Default library location under the user config directory
pub fn default_library_path() -> Result<PathBuf> {
    let config = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(config.join("domscope").join("library.json"))
}

fn read_snapshot(path: &Path, version: u64) -> Result<RegistrySnapshot> {
    let raw = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read container library at {}",
            path.display()
        )
    })?;
    let index: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Container library load failed: invalid JSON in {}", path.display()))?;
    let (libraries, report) = parse_index(&index)?;
    Ok(RegistrySnapshot {
        libraries,
        report,
        version,
        loaded_at: Utc::now(),
    })
}

/// Parse the top-level index `{siteKey: {website, containers: {id -> def}}}`.
///
/// Sites iterate in sorted key order so selection stays deterministic.
/// Malformed definitions are skipped and reported, never aborting the load.
fn parse_index(index: &serde_json::Value) -> Result<(Vec<SiteLibrary>, LoadReport)> {
    let sites = index
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Container library load failed: top level must be an object"))?;

    let mut libraries = Vec::new();
    let mut report = LoadReport::default();

    for (site_key, entry) in sites {
        let entry = match entry.as_object() {
            Some(entry) => entry,
            None => {
                report.skipped.push(SkippedDefinition {
                    site_key: site_key.clone(),
                    container_id: "-".to_string(),
                    reason: "site entry is not an object".to_string(),
                });
                continue;
            }
        };

        let host_matchers = match parse_host_matchers(entry.get("website")) {
            Some(matchers) => matchers,
            None => {
                report.skipped.push(SkippedDefinition {
                    site_key: site_key.clone(),
                    container_id: "-".to_string(),
                    reason: "missing or malformed 'website' host matcher".to_string(),
                });
                continue;
            }
        };

        let mut containers = Vec::new();
        if let Some(map) = entry.get("containers").and_then(|c| c.as_object()) {
            // serde_json objects don't preserve order; sort for determinism
            let mut ids: Vec<&String> = map.keys().collect();
            ids.sort();

            for id in ids {
                match parse_definition(id, &map[id]) {
                    Ok(definition) => containers.push(definition),
                    Err(reason) => {
                        warn!(
                            "Skipping container '{}' of site '{}': {}",
                            id, site_key, reason
                        );
                        report.skipped.push(SkippedDefinition {
                            site_key: site_key.clone(),
                            container_id: id.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        report.containers += containers.len();
        libraries.push(SiteLibrary {
            site_key: site_key.clone(),
            host_matchers,
            containers,
        });
    }

    report.sites = libraries.len();
    Ok((libraries, report))
}

fn parse_host_matchers(value: Option<&serde_json::Value>) -> Option<Vec<String>> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(vec![s.clone()]),
        serde_json::Value::Array(items) => {
            let matchers: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string))
                .collect();
            matchers.filter(|m| !m.is_empty())
        }
        _ => None,
    }
}

/// Deserialize and validate one top-level definition. One bad definition is
/// one skipped entry; the rest of the site still loads.
fn parse_definition(
    id: &str,
    value: &serde_json::Value,
) -> std::result::Result<ContainerDefinition, String> {
    let mut definition: ContainerDefinition =
        serde_json::from_value(value.clone()).map_err(|e| format!("parse error: {}", e))?;

    if definition.id != id {
        return Err(format!(
            "id '{}' does not match its index key '{}'",
            definition.id, id
        ));
    }

    validate_definition(&definition, None)?;
    sort_candidates(&mut definition);
    Ok(definition)
}

/// Structural validation, recursive over children
fn validate_definition(
    definition: &ContainerDefinition,
    parent_id: Option<&str>,
) -> std::result::Result<(), String> {
    if definition.id.trim().is_empty() {
        return Err("empty container id".to_string());
    }
    if definition.selector_candidates.is_empty() {
        return Err(format!(
            "container '{}' has no selector candidates",
            definition.id
        ));
    }

    match parent_id {
        None => {
            if definition.kind == ContainerKind::Component && !definition.page_patterns.is_empty() {
                return Err(format!(
                    "component '{}' carries page patterns (roots only)",
                    definition.id
                ));
            }
        }
        Some(parent_id) => {
            if definition.kind == ContainerKind::Root {
                return Err(format!(
                    "nested container '{}' declared as root",
                    definition.id
                ));
            }
            if !definition.page_patterns.is_empty() {
                return Err(format!(
                    "nested container '{}' carries page patterns (roots only)",
                    definition.id
                ));
            }
            let expected_prefix = format!("{}.", parent_id);
            if !definition.id.starts_with(&expected_prefix)
                || definition.id[expected_prefix.len()..].contains('.')
            {
                return Err(format!(
                    "child id '{}' does not extend parent id '{}' by one segment",
                    definition.id, parent_id
                ));
            }
        }
    }

    let mut seen = BTreeSet::new();
    for child in &definition.children {
        if !seen.insert(child.id.as_str()) {
            return Err(format!(
                "duplicate child id '{}' under '{}'",
                child.id, definition.id
            ));
        }
        validate_definition(child, Some(&definition.id))?;
    }

    Ok(())
}

/// Order candidates highest score first, stably, so evaluation order is
/// fixed at load time
fn sort_candidates(definition: &mut ContainerDefinition) {
    definition
        .selector_candidates
        .sort_by_key(|c| std::cmp::Reverse(c.score));
    for child in &mut definition.children {
        sort_candidates(child);
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
