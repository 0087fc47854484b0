mod comments;
mod config;
mod ratings;
mod server;
mod store;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;

use crate::{
    comments::CommentService,
    config::Settings,
    ratings::RatingService,
    server::AppState,
    store::KvStore,
};

#[derive(Debug, Parser)]
#[command(name = "gcatalog-engage", version)]
struct Cli {
    /// Override HTTP_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override HTTP_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(h) = cli.host {
        settings.http_host = h;
    }
    if let Some(p) = cli.port {
        settings.http_port = p;
    }

    let store = KvStore::new(&settings.sqlite_path)?;
    store.init_db()?;

    log::info!(
        "app.start host={} port={} cors={} sqlite={}",
        settings.http_host,
        settings.http_port,
        settings.cors_enabled,
        store.path()
    );

    // One lock serializes every read-modify-write against the kv store, so
    // concurrent requests for the same key cannot interleave mid-sequence.
    let write_lock = Arc::new(Mutex::new(()));
    let state = AppState {
        settings: settings.clone(),
        store: store.clone(),
        ratings: RatingService::new(store.clone(), write_lock.clone()),
        comments: CommentService::new(store, write_lock),
    };

    server::serve(state).await
}
