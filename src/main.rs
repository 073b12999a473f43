#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use domscope::document::webdriver::{BrowserType, WebDriverDocument};
use domscope::document::DocumentAccess;
use domscope::errors::DomscopeError;
use domscope::executor::{Action, ActionOutcome, ScopedExecutor};
use domscope::registry::LibraryRegistry;
use domscope::resolver::{self, ResolvedPass};
use domscope::materializer;
use domscope::types::{
    BranchFetch, DomPath, MatchResult, MatchSnapshot, NodeDescriptor, OutputFormat,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const _EXIT_COMMAND_ERROR: i32 = 1;
const _EXIT_CONTAINER_NOT_FOUND: i32 = 2;
const _EXIT_UNKNOWN_SITE: i32 = 3;
const _EXIT_WEBDRIVER_FAILED: i32 = 4;
const _EXIT_LIBRARY_LOAD_FAILED: i32 = 5;
const _EXIT_CAPABILITY_DENIED: i32 = 6;

#[derive(Parser)]
#[command(name = "domscope")]
#[command(about = "Scoped container resolution for web automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Container library file (defaults to the user config directory)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Session name scoping instance pins
    #[arg(long, global = true, default_value = "cli")]
    session: String,

    /// Browser to drive
    #[arg(long, global = true, default_value = "firefox")]
    browser: String,

    /// Explicit WebDriver endpoint (defaults to the browser's usual port)
    #[arg(long, global = true)]
    webdriver_url: Option<String>,

    /// Run the browser with a visible window
    #[arg(long, global = true)]
    no_headless: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the container tree for a page
    Resolve {
        /// URL to resolve against
        url: String,

        /// Site key override (skip host matching)
        #[arg(long)]
        site: Option<String>,
    },

    /// Highlight a container on the page
    Highlight {
        /// URL of the page
        url: String,

        /// Dotted container id (e.g. list_root.item)
        container: String,

        /// Highlight duration in milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,

        /// Pick the Nth qualifying instance (0-based) and pin it
        #[arg(long)]
        index: Option<usize>,

        /// Site key override
        #[arg(long)]
        site: Option<String>,
    },

    /// Click a container with a full synthetic pointer sequence
    Click {
        /// URL of the page
        url: String,

        /// Dotted container id
        container: String,

        /// Pick the Nth qualifying instance (0-based) and pin it
        #[arg(long)]
        index: Option<usize>,

        /// Site key override
        #[arg(long)]
        site: Option<String>,
    },

    /// Extract fields relative to a matched container
    Extract {
        /// URL of the page
        url: String,

        /// Dotted container id
        container: String,

        /// Field to read, as name=relative-selector (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Site key override
        #[arg(long)]
        site: Option<String>,
    },

    /// Scroll a container into view or by an offset
    Scroll {
        /// URL of the page
        url: String,

        /// Dotted container id
        container: String,

        /// Horizontal scroll offset in pixels
        #[arg(long, default_value = "0")]
        by_x: i64,

        /// Vertical scroll offset in pixels
        #[arg(long, default_value = "0")]
        by_y: i64,

        /// Site key override
        #[arg(long)]
        site: Option<String>,
    },

    /// Materialize a bounded branch of the document under a dom path
    Branch {
        /// URL of the page
        url: String,

        /// Dotted dom path captured from a resolve pass (e.g. "1.0.3")
        path: String,

        /// Levels to descend below the addressed node
        #[arg(long, default_value = "1")]
        max_depth: usize,

        /// Children returned per node before truncation
        #[arg(long, default_value = "20")]
        max_children: usize,
    },

    /// List loaded site libraries
    Sites,

    /// Validate the container library and print the load report
    Check,
}

#[tokio::main]
async fn main() {
    let result = run().await;

    // Handle exit codes based on error type
    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            // Convert to our error type to get proper exit code
            let domscope_err: DomscopeError = err.into();

            // Output JSON error to stdout for programmatic consumption
            let error_json = json!({
                "error": true,
                "message": domscope_err.to_string(),
                "exit_code": domscope_err.exit_code()
            });
            println!(
                "{}",
                serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
            );

            // Also log to stderr for human reading
            eprintln!("Error: {}", domscope_err);
            std::process::exit(domscope_err.exit_code());
        }
    }
}

async fn run() -> Result<()> {
    // Initialize tracing to stderr (so JSON output to stdout remains clean)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "domscope=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    let registry = Arc::new(LibraryRegistry::load(cli.library.clone())?);

    match &cli.command {
        Commands::Resolve { url, site } => {
            let doc = connect(&cli, url).await?;
            let snapshot = resolve_once(registry.as_ref(), &doc, url, site.as_deref()).await?;
            print_snapshot(cli.format, &snapshot);
        }

        Commands::Highlight {
            url,
            container,
            ttl_ms,
            index,
            site,
        } => {
            let doc = connect(&cli, url).await?;
            let action = Action::Highlight { ttl_ms: *ttl_ms };
            run_action(&cli, &registry, &doc, site.as_deref(), container, action, *index).await?;
        }

        Commands::Click {
            url,
            container,
            index,
            site,
        } => {
            let doc = connect(&cli, url).await?;
            run_action(&cli, &registry, &doc, site.as_deref(), container, Action::Click, *index)
                .await?;
        }

        Commands::Extract {
            url,
            container,
            fields,
            site,
        } => {
            let doc = connect(&cli, url).await?;
            let action = Action::Extract {
                fields: parse_fields(fields)?,
            };
            run_action(&cli, &registry, &doc, site.as_deref(), container, action, None).await?;
        }

        Commands::Scroll {
            url,
            container,
            by_x,
            by_y,
            site,
        } => {
            let doc = connect(&cli, url).await?;
            let by = if *by_x == 0 && *by_y == 0 {
                None
            } else {
                Some((*by_x, *by_y))
            };
            let action = Action::Scroll { by };
            run_action(&cli, &registry, &doc, site.as_deref(), container, action, None).await?;
        }

        Commands::Branch {
            url,
            path,
            max_depth,
            max_children,
        } => {
            let doc = connect(&cli, url).await?;
            let path = DomPath::parse(path)?;
            let fetched = materializer::fetch_branch(&doc, &path, *max_depth, *max_children).await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&fetched)?),
                OutputFormat::Simple => match &fetched {
                    BranchFetch::Delivered { root } => print_branch(root, 0),
                    BranchFetch::Stale => println!("stale: path no longer resolves"),
                },
            }
        }

        Commands::Sites => {
            let snapshot = registry.snapshot();
            match cli.format {
                OutputFormat::Json => {
                    let sites: Vec<_> = snapshot
                        .libraries
                        .iter()
                        .map(|l| {
                            json!({
                                "site_key": l.site_key,
                                "host_matchers": l.host_matchers,
                                "roots": l.roots().map(|r| &r.id).collect::<Vec<_>>(),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&sites)?);
                }
                OutputFormat::Simple => {
                    for library in &snapshot.libraries {
                        println!(
                            "{} ({}): {} container(s)",
                            library.site_key,
                            library.host_matchers.join(", "),
                            library.containers.len()
                        );
                    }
                }
            }
        }

        Commands::Check => {
            let snapshot = registry.snapshot();
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&snapshot.report)?)
                }
                OutputFormat::Simple => {
                    println!(
                        "{} site(s), {} container(s) loaded",
                        snapshot.report.sites, snapshot.report.containers
                    );
                    for skipped in &snapshot.report.skipped {
                        println!(
                            "skipped {}/{}: {}",
                            skipped.site_key, skipped.container_id, skipped.reason
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

/// Connect to the browser and navigate to the target page
async fn connect(cli: &Cli, url: &str) -> Result<WebDriverDocument> {
    let browser_type: BrowserType = cli.browser.parse()?;
    let doc = WebDriverDocument::connect(
        browser_type,
        cli.webdriver_url.as_deref(),
        !cli.no_headless,
    )
    .await?;
    doc.goto(url).await?;
    Ok(doc)
}

/// Resolve the page once; a pass invalidated by navigation is retried once
async fn resolve_once(
    registry: &LibraryRegistry,
    doc: &WebDriverDocument,
    url: &str,
    site: Option<&str>,
) -> Result<MatchSnapshot> {
    let parsed = url::Url::parse(url)?;
    let snapshot = registry.snapshot();
    let library = match site {
        Some(key) => snapshot
            .site_by_key(key)
            .ok_or_else(|| anyhow::anyhow!("No site library matches: site key '{}'", key))?,
        None => snapshot
            .site_for_url(&parsed)
            .ok_or_else(|| anyhow::anyhow!("No site library matches: {}", url))?,
    };

    for _ in 0..2 {
        match resolver::resolve_site(doc, library, Some(&parsed)).await? {
            ResolvedPass::Snapshot(snapshot) => return Ok(snapshot),
            ResolvedPass::Stale => continue,
        }
    }
    anyhow::bail!("Document kept navigating during resolution; giving up")
}

/// Execute one scoped action and print its outcome
async fn run_action(
    cli: &Cli,
    registry: &Arc<LibraryRegistry>,
    doc: &dyn DocumentAccess,
    site: Option<&str>,
    container: &str,
    action: Action,
    index: Option<usize>,
) -> Result<()> {
    let executor = ScopedExecutor::new(registry.clone());
    let outcome = executor
        .execute(doc, &cli.session, site, container, action, None, index)
        .await?;

    match &outcome {
        ActionOutcome::Performed { .. } => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        ActionOutcome::NotFound { container_id } => {
            // Typed miss at the API; maps to exit code 2 for scripts
            anyhow::bail!(
                "Container did not resolve on the current page: {}",
                container_id
            )
        }
    }
}

/// Parse repeated name=selector field arguments
fn parse_fields(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for entry in raw {
        let (name, selector) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid field '{}': use name=selector", entry))?;
        if name.is_empty() || selector.is_empty() {
            anyhow::bail!("Invalid field '{}': use name=selector", entry);
        }
        fields.insert(name.to_string(), selector.to_string());
    }
    Ok(fields)
}

fn print_snapshot(format: OutputFormat, snapshot: &MatchSnapshot) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Simple => {
            println!(
                "{} / {} at {}",
                snapshot.site_key, snapshot.root_container_id, snapshot.timestamp
            );
            print_match(&snapshot.tree, 0);
        }
    }
}

fn print_match(result: &MatchResult, indent: usize) {
    let pad = "  ".repeat(indent);
    match result.dom_path() {
        Some(path) => println!("{}+ {} @ {}", pad, result.container_id, path),
        None => println!("{}- {} (not found)", pad, result.container_id),
    }
    for child in &result.children {
        print_match(child, indent + 1);
    }
}

fn print_branch(node: &NodeDescriptor, indent: usize) {
    let pad = "  ".repeat(indent);
    let label = node
        .attributes
        .get("id")
        .map(|id| format!("#{}", id))
        .or_else(|| node.attributes.get("class").map(|c| format!(".{}", c)))
        .unwrap_or_default();
    let more = if node.truncated { " (truncated)" } else { "" };
    println!("{}{}{} @ {}{}", pad, node.tag, label, node.dom_path, more);
    for child in &node.children {
        print_branch(child, indent + 1);
    }
}
