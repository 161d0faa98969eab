//! todo_sync
//!
//! Keeps a todo list in sync with an in-memory realtime store while a
//! simulated second client edits it.
//!
//! # Usage
//!
//! ```text
//! todo_sync [--verbose] [--settings settings.json] [--remote-edits N]
//! ```
//!
//! `settings.json` holds `SyncSettings`, for example
//! `{"auto_sync": true, "id_attribute": "id"}`.

use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use treesync_core::{
    Attributes, CollectionEvent, FetchOptions, ModelDefaults, SyncConfig, SyncContext,
    SyncOptions, SyncSettings, SyncedCollection, SyncedModel,
};
use treesync_store::MemoryStore;

/// Todo list sync demo.
#[derive(Parser)]
#[command(name = "todo_sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with sync settings
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Number of edits the simulated second client makes
    #[arg(long, default_value_t = 3)]
    remote_edits: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings: SyncSettings = match &cli.settings {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SyncSettings::default(),
    };
    info!(?settings, version = treesync_core::VERSION, "starting");

    let store = Arc::new(MemoryStore::new());
    let context = SyncContext::from_settings(&settings, store.clone());

    live_todos(&store, &context, cli.remote_edits)?;
    archived_todos(&store, &context)?;
    profile(&store, &context)?;

    println!("{}", serde_json::to_string_pretty(&store.value_at(&treesync_store::Path::root()))?);
    Ok(())
}

fn object(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

fn live_todos(
    store: &MemoryStore,
    context: &SyncContext,
    remote_edits: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let todos = SyncedCollection::builder(context)
        .location("todos")
        .config(SyncConfig::new().with_auto_sync(true))
        .build()?;
    todos.on(|event| match event {
        CollectionEvent::Add { model } => info!(id = ?model.id(), "todo added"),
        CollectionEvent::Remove { model } => info!(id = ?model.id(), "todo removed"),
        CollectionEvent::Change { model, changed } => {
            info!(id = ?model.id(), ?changed, "todo changed")
        }
        CollectionEvent::Error { operation, error } => {
            tracing::warn!(%operation, %error, "sync error")
        }
        _ => {}
    });
    todos.fetch(FetchOptions::new().with_options(
        SyncOptions::new().on_success(|_| info!("initial load complete")),
    ))?;

    let first = todos.create(object(json!({"title": "write docs", "done": false})), SyncOptions::new())?;
    let second = todos.create(object(json!({"title": "ship", "done": false})), SyncOptions::new())?;
    let ids: Vec<String> = [first, second]
        .iter()
        .filter_map(|record| record.get(context.id_attribute()).and_then(Value::as_str).map(str::to_string))
        .collect();

    // local edit: pushed as a one-key update
    if let Some(model) = ids.first().and_then(|id| todos.get(id)) {
        model.set_attr("done", json!(true));
    }

    // another client edits the same list
    for n in 0..remote_edits {
        store.remote_set(&format!("todos/remote-{n}"), json!({"title": format!("remote {n}"), "done": false}))?;
    }
    if let Some(id) = ids.get(1) {
        store.remote_update(&format!("todos/{id}"), object(json!({"title": "ship it"})))?;
    }
    if remote_edits > 0 {
        store.remote_remove("todos/remote-0")?;
    }

    info!(count = todos.len(), "live list settled");
    todos.close();
    Ok(())
}

fn archived_todos(store: &MemoryStore, context: &SyncContext) -> Result<(), Box<dyn std::error::Error>> {
    store.remote_set("archive", json!({"a1": {"title": "old"}, "a2": {"title": "older"}}))?;
    let archive = SyncedCollection::builder(context)
        .location("archive")
        .config(SyncConfig::new().with_auto_sync(false))
        .build()?;
    archive.fetch(FetchOptions::new().with_reset(true))?;
    info!(ids = ?archive.ids(), "archive loaded once");

    if let Some(old) = archive.get("a1") {
        old.destroy();
    }
    info!(ids = ?archive.ids(), "archive after delete");
    Ok(())
}

fn profile(store: &MemoryStore, context: &SyncContext) -> Result<(), Box<dyn std::error::Error>> {
    store.remote_set("profile", json!({"name": "demo"}))?;
    let profile = SyncedModel::builder(context)
        .location("profile")
        .defaults(ModelDefaults::new().with_attributes(object(json!({"theme": "light"}))))
        .build()?;
    profile.fetch(SyncOptions::new())?;
    info!(name = ?profile.get("name"), theme = ?profile.get("theme"), "profile synced");
    profile.close();
    Ok(())
}
