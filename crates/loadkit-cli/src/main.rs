//! Loadkit CLI - run content loaders from a collection file

mod collections;

use clap::{Parser, Subcommand, ValueEnum};
use collections::{CollectionFile, ProcessEnv};
use loadkit::{render_text, LinkTextMode, LoadOutcome, MemoryStore, NewlineMode, RenderOptions, BLUESKY, X};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Platform whose link conventions `render` uses
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum RenderPlatform {
    #[default]
    Bluesky,
    X,
}

/// Output format for the render subcommand
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Html,
    Md,
    Json,
}

/// Loadkit - content loaders for Bluesky, GitHub, Instagram and X
#[derive(Parser, Debug)]
#[command(name = "loadkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging for loadkit (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the loaders of a collection file
    Load {
        /// TOML file with `[[collections]]` entries
        file: PathBuf,

        /// Directory for the per-collection JSON snapshots
        #[arg(long, default_value = ".loadkit")]
        store_dir: PathBuf,

        /// Only run these collections
        #[arg(long)]
        only: Vec<String>,
    },
    /// Print the JSON schema of the collection file
    Schema,
    /// Render plain text as a loader would
    Render {
        #[arg(long)]
        text: String,

        #[arg(long, value_enum, default_value = "bluesky")]
        platform: RenderPlatform,

        /// `domain-path` or `display-url`
        #[arg(long, default_value = "display-url")]
        link_text: LinkTextMode,

        /// `none`, `break` or `paragraph`
        #[arg(long, default_value = "none")]
        newline: NewlineMode,

        #[arg(long, short, default_value = "html")]
        output: OutputFormat,
    },
}

/// One line of `load` output
#[derive(Debug, Serialize)]
struct CollectionReport {
    collection: String,
    #[serde(flatten)]
    outcome: Option<LoadOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,loadkit=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Load { file, store_dir, only } => {
            let ok = run_load(&file, &store_dir, &only).await;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(CollectionFile);
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => writeln_safe(&json),
                Err(e) => {
                    eprintln!("Error serializing schema: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Render {
            text,
            platform,
            link_text,
            newline,
            output,
        } => {
            let options = RenderOptions {
                link_text_mode: link_text,
                newline_mode: newline,
                remove_trailing_links: false,
            };
            writeln_safe(&render(&text, platform, &options, output));
        }
    }
}

/// Run every selected collection; false if any of them failed
async fn run_load(file: &Path, store_dir: &Path, only: &[String]) -> bool {
    let collections = match CollectionFile::read(file) {
        Ok(collections) => collections,
        Err(e) => {
            eprintln!("Error: {}", e);
            return false;
        }
    };
    let registry = match collections.registry(only, &ProcessEnv) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {}", e);
            return false;
        }
    };
    if registry.is_empty() {
        eprintln!("Error: no collections selected");
        return false;
    }

    let mut ok = true;
    let names: Vec<String> = registry.names().map(str::to_string).collect();
    for name in names {
        let path = snapshot_path(store_dir, &name);
        let report = match run_collection(&registry, &name, &path).await {
            Ok(outcome) => CollectionReport {
                collection: name,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => {
                error!(collection = %name, error = %e, "collection failed");
                ok = false;
                CollectionReport {
                    collection: name,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        };
        match serde_json::to_string(&report) {
            Ok(line) => writeln_safe(&line),
            Err(e) => eprintln!("Error serializing report: {}", e),
        }
    }
    ok
}

async fn run_collection(
    registry: &loadkit::LoaderRegistry,
    name: &str,
    path: &Path,
) -> Result<LoadOutcome, loadkit::LoadError> {
    let store = MemoryStore::load(path)?;
    let outcome = registry.load(name, &store).await?;
    store.save(path).await?;
    Ok(outcome)
}

/// `DIR/<name>.json`, with path separators in the name replaced
fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    let file: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    dir.join(format!("{}.json", file))
}

fn render(text: &str, platform: RenderPlatform, options: &RenderOptions, output: OutputFormat) -> String {
    let platform = match platform {
        RenderPlatform::Bluesky => &BLUESKY,
        RenderPlatform::X => &X,
    };
    let rendered = render_text(text, &[], platform, options);
    match output {
        OutputFormat::Html => rendered.html,
        OutputFormat::Md => rendered.markdown,
        OutputFormat::Json => serde_json::to_string_pretty(&rendered).unwrap_or_default(),
    }
}

/// Write to stdout, exit silently on broken pipe
fn writeln_safe(s: &str) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", s) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        eprintln!("Error writing to stdout: {}", e);
        std::process::exit(1);
    }
}
