//! Example: Load Bluesky posts and print their rendered HTML
//!
//! Run with: cargo run -p loadkit --example load_posts -- <at-uri or bsky.app URL>...
//!
//! The public Bluesky API needs no token.

use loadkit::{BlueskyConfig, BlueskyPostsLoader, ContentStore, Loader, MemoryStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let uris: Vec<String> = std::env::args().skip(1).collect();
    if uris.is_empty() {
        eprintln!("Usage: load_posts <at-uri or bsky.app URL>...");
        std::process::exit(1);
    }

    let loader = match BlueskyPostsLoader::new(BlueskyConfig::new(uris)) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let store = MemoryStore::new();

    match loader.load(&store).await {
        Ok(outcome) => println!("status: {:?}, loaded: {}\n", outcome.status, outcome.loaded),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    for record in store.records().await.unwrap_or_default() {
        println!("{}", record.id);
        if let Some(rendered) = record.rendered {
            println!("  {}", rendered.html);
        }
        println!();
    }
}
