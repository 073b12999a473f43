//! Live-document backend over the WebDriver protocol.
//!
//! All structural work happens in injected JavaScript so the wire cost per
//! call is one script round-trip: paths are child-index chains resolved and
//! re-derived inside the page, and descriptors come back as plain JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::document::{DocumentAccess, ElementDescriptor};
use crate::types::DomPath;

/// Supported browser types
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BrowserType {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome/Chromium
    Chrome,
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    /// Parse browser type from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(BrowserType::Firefox),
            "chrome" | "chromium" => Ok(BrowserType::Chrome),
            _ => anyhow::bail!("Unsupported browser: {}", s),
        }
    }
}

impl BrowserType {
    /// Default WebDriver endpoint for this browser type
    pub fn default_webdriver_url(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "http://localhost:4444",
            BrowserType::Chrome => "http://localhost:9515",
        }
    }
}

// Shared JS prelude: resolve a child-index path, re-derive one, and build a
// descriptor object matching ElementDescriptor's serde shape.
const JS_PRELUDE: &str = r#"
    function dsResolve(steps) {
        let node = document.documentElement;
        for (const i of steps) {
            node = node.children[i];
            if (!node) return null;
        }
        return node;
    }
    function dsPath(el) {
        const steps = [];
        while (el && el !== document.documentElement) {
            const parent = el.parentElement;
            if (!parent) return null;
            steps.unshift(Array.prototype.indexOf.call(parent.children, el));
            el = parent;
        }
        return steps;
    }
    function dsDescribe(el) {
        const text = (el.textContent || '').trim();
        return {
            tag: el.tagName.toLowerCase(),
            dom_path: dsPath(el),
            id: el.id || null,
            classes: Array.from(el.classList),
            text_preview: text ? text.slice(0, 80) : null,
            child_count: el.children.length
        };
    }
"#;

/// WebDriver-backed document access
pub struct WebDriverDocument {
    client: Client,
    /// Epoch ids observed so far; index+1 is the epoch number
    epochs: Arc<Mutex<Vec<String>>>,
}

impl WebDriverDocument {
    /// Connect to a running WebDriver endpoint.
    ///
    /// Driver lifecycle is out of scope here: geckodriver/chromedriver must
    /// already be listening, either at `webdriver_url` or the browser's
    /// default port.
    pub async fn connect(
        browser_type: BrowserType,
        webdriver_url: Option<&str>,
        headless: bool,
    ) -> Result<Self> {
        let webdriver_url = webdriver_url
            .map(str::to_string)
            .unwrap_or_else(|| browser_type.default_webdriver_url().to_string());

        let mut caps = serde_json::Map::new();
        match browser_type {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if headless {
                    args.push("--headless".to_string());
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
            }
            BrowserType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                if headless {
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                    args.push("--disable-dev-shm-usage".to_string());
                }
                caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
            }
        }

        debug!("Connecting to WebDriver at {}", webdriver_url);

        let client = ClientBuilder::rustls()
            .capabilities(caps)
            .connect(&webdriver_url)
            .await
            .with_context(|| {
                let driver_name = match browser_type {
                    BrowserType::Firefox => "geckodriver",
                    BrowserType::Chrome => "chromedriver",
                };
                format!(
                    "Failed to connect to WebDriver at {}.\n\
                    Please ensure {} is running:\n\
                      For Firefox: geckodriver --port 4444\n\
                      For Chrome: chromedriver --port 9515",
                    webdriver_url, driver_name
                )
            })?;

        Ok(WebDriverDocument {
            client,
            epochs: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Navigate and wait for the document to settle
    pub async fn goto(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.client.goto(url).await?;

        // Wait for the page to be ready so early queries don't race the load
        let wait_script = "return document.readyState === 'complete';";
        for _ in 0..20 {
            match self.client.execute(wait_script, vec![]).await {
                Ok(val) if val.as_bool().unwrap_or(false) => break,
                _ => tokio::time::sleep(tokio::time::Duration::from_millis(100)).await,
            }
        }
        Ok(())
    }

    /// Close the underlying session
    pub async fn close(self) -> Result<()> {
        self.client.close().await.context("Failed to close WebDriver session")
    }

    async fn run(&self, body: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        let script = format!("{}\n{}", JS_PRELUDE, body);
        self.client
            .execute(&script, args)
            .await
            .context("Failed to execute script")
    }

    fn path_arg(path: &DomPath) -> serde_json::Value {
        json!(path.steps())
    }

    fn parse_descriptors(value: serde_json::Value) -> Result<Vec<ElementDescriptor>> {
        serde_json::from_value(value).context("Failed to parse element descriptors")
    }
}

#[async_trait]
impl DocumentAccess for WebDriverDocument {
    async fn query(&self, scope: Option<&DomPath>, css: &str) -> Result<Vec<ElementDescriptor>> {
        let body = r#"
            const scopeSteps = arguments[0];
            const scope = scopeSteps === null ? document.documentElement : dsResolve(scopeSteps);
            if (!scope) return [];
            return Array.from(scope.querySelectorAll(arguments[1])).map(dsDescribe);
        "#;
        let scope_arg = match scope {
            Some(path) => Self::path_arg(path),
            None => serde_json::Value::Null,
        };
        let result = self.run(body, vec![scope_arg, json!(css)]).await?;
        Self::parse_descriptors(result)
    }

    async fn node_at(&self, path: &DomPath) -> Result<Option<ElementDescriptor>> {
        let body = r#"
            const el = dsResolve(arguments[0]);
            return el ? dsDescribe(el) : null;
        "#;
        let result = self.run(body, vec![Self::path_arg(path)]).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_value(result).context("Failed to parse element descriptor")?,
        ))
    }

    async fn children_of(&self, path: &DomPath) -> Result<Vec<ElementDescriptor>> {
        let body = r#"
            const el = dsResolve(arguments[0]);
            if (!el) return [];
            return Array.from(el.children).map(dsDescribe);
        "#;
        let result = self.run(body, vec![Self::path_arg(path)]).await?;
        Self::parse_descriptors(result)
    }

    async fn read_text(&self, path: &DomPath) -> Result<Option<String>> {
        let body = r#"
            const el = dsResolve(arguments[0]);
            if (!el) return null;
            const text = (el.textContent || '').trim();
            return text === '' ? null : text;
        "#;
        let result = self.run(body, vec![Self::path_arg(path)]).await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn read_attribute(&self, path: &DomPath, name: &str) -> Result<Option<String>> {
        let body = r#"
            const el = dsResolve(arguments[0]);
            return el ? el.getAttribute(arguments[1]) : null;
        "#;
        let result = self
            .run(body, vec![Self::path_arg(path), json!(name)])
            .await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn dispatch_pointer_sequence(&self, path: &DomPath) -> Result<()> {
        // Full hover -> pointerdown -> pointerup -> click sequence against
        // the element center, closer to a real interaction than a bare
        // programmatic click
        let body = r#"
            const el = dsResolve(arguments[0]);
            if (!el) return false;
            const rect = el.getBoundingClientRect();
            const opts = {
                bubbles: true,
                cancelable: true,
                composed: true,
                clientX: rect.x + rect.width / 2,
                clientY: rect.y + rect.height / 2
            };
            const sequence = [
                'pointerover', 'pointerenter', 'mouseover',
                'pointerdown', 'mousedown',
                'pointerup', 'mouseup',
                'click'
            ];
            for (const type of sequence) {
                const ev = type.startsWith('pointer')
                    ? new PointerEvent(type, opts)
                    : new MouseEvent(type, opts);
                el.dispatchEvent(ev);
            }
            return true;
        "#;
        let dispatched = self.run(body, vec![Self::path_arg(path)]).await?;
        if !dispatched.as_bool().unwrap_or(false) {
            anyhow::bail!("Element at {} went away before the click", path);
        }
        Ok(())
    }

    async fn scroll_into_view(&self, path: &DomPath) -> Result<()> {
        let body = r#"
            const el = dsResolve(arguments[0]);
            if (!el) return false;
            el.scrollIntoView({ block: 'center' });
            return true;
        "#;
        self.run(body, vec![Self::path_arg(path)]).await?;
        Ok(())
    }

    async fn scroll_by(&self, path: &DomPath, dx: i64, dy: i64) -> Result<()> {
        let body = r#"
            const el = dsResolve(arguments[0]);
            if (!el) return false;
            el.scrollBy(arguments[1], arguments[2]);
            return true;
        "#;
        self.run(body, vec![Self::path_arg(path), json!(dx), json!(dy)])
            .await?;
        Ok(())
    }

    async fn annotate(&self, path: &DomPath, marker: &str, ttl_ms: Option<u64>) -> Result<()> {
        // TTL: transient visual highlight that cleans itself up.
        // No TTL: persistent instance pin, queryable back as
        // [data-domscope-pin="<marker>"] until navigation.
        let body = r#"
            const el = dsResolve(arguments[0]);
            if (!el) return false;
            const marker = arguments[1];
            const ttl = arguments[2];
            if (ttl === null) {
                el.setAttribute('data-domscope-pin', marker);
                return true;
            }
            el.setAttribute('data-domscope-mark', marker);
            const prev = el.style.outline;
            el.style.outline = '2px solid #ff7a00';
            setTimeout(() => {
                el.style.outline = prev;
                el.removeAttribute('data-domscope-mark');
            }, ttl);
            return true;
        "#;
        self.run(
            body,
            vec![Self::path_arg(path), json!(marker), json!(ttl_ms)],
        )
        .await?;
        Ok(())
    }

    async fn document_epoch(&self) -> Result<u64> {
        // A navigation wipes window state, so a fresh id on the window object
        // marks a fresh document. The epoch number is our local count of
        // distinct ids seen.
        let body = r#"
            if (!window.__domscope_epoch_id) {
                window.__domscope_epoch_id = arguments[0];
            }
            return window.__domscope_epoch_id;
        "#;
        let candidate = uuid::Uuid::new_v4().simple().to_string();
        let result = self.run(body, vec![json!(candidate)]).await?;
        let id = result
            .as_str()
            .context("Epoch probe returned a non-string")?
            .to_string();

        let mut epochs = self.epochs.lock().await;
        if let Some(position) = epochs.iter().position(|e| *e == id) {
            Ok((position + 1) as u64)
        } else {
            epochs.push(id);
            Ok(epochs.len() as u64)
        }
    }

    async fn current_url(&self) -> Result<Option<Url>> {
        let url = self.client.current_url().await?;
        Ok(Some(url))
    }
}
