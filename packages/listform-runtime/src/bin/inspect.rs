//! `listform-inspect`: loads a fixture directory into in-memory
//! collaborators, runs the initialization pipeline and prints the form.
//!
//! A fixture directory holds:
//! - `schema.json`: `{ "<list>": [column, ...], ... }`
//! - `items.json`: `{ "<list>": [item, ...], ... }`
//! - `users.json`: `[profile, ...]`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use listform_core::{format_fragment, ColumnDef, StoreCapability, UserProfile};
use listform_runtime::{
    initialize, Collaborators, FormConfig, MemoryFragment, MemoryIdentity, MemoryListStore,
    PipelineOutcome, RawItem, SessionContext,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "listform-inspect", version, about = "Render a list form from a fixture")]
struct Cli {
    /// Directory holding schema.json, items.json and users.json
    #[arg(long, env = "LISTFORM_FIXTURE", value_name = "DIR")]
    fixture: PathBuf,

    /// List to open (overrides the config file)
    #[arg(long)]
    list: Option<String>,

    /// Record id to open; omit for a new record
    #[arg(long)]
    id: Option<u64>,

    /// Signed-in user id
    #[arg(long)]
    user: Option<u64>,

    /// JSON form configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Backend API generation to emulate
    #[arg(long, value_enum, default_value_t = Generation::Modern)]
    generation: Generation,

    /// Print the rendered form as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LISTFORM_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Generation {
    Legacy,
    Modern,
}

impl From<Generation> for StoreCapability {
    fn from(generation: Generation) -> Self {
        match generation {
            Generation::Legacy => Self::Legacy,
            Generation::Modern => Self::Modern,
        }
    }
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_config(cli: &Cli) -> Result<FormConfig> {
    let mut config = match &cli.config {
        Some(path) => read_json::<FormConfig>(path)?,
        None => FormConfig::default(),
    };
    if let Some(list) = &cli.list {
        config.list_name.clone_from(list);
    }
    if config.list_name.is_empty() {
        bail!("no list given: pass --list or set listName in --config");
    }
    Ok(config)
}

fn load_store(dir: &Path, capability: StoreCapability) -> Result<MemoryListStore> {
    let store = MemoryListStore::new(capability);
    let schemas: BTreeMap<String, Vec<ColumnDef>> = read_json(&dir.join("schema.json"))?;
    for (list, columns) in schemas {
        store.add_list(&list, columns);
    }
    let items_path = dir.join("items.json");
    if items_path.exists() {
        let items: BTreeMap<String, Vec<RawItem>> = read_json(&items_path)?;
        for (list, rows) in items {
            for row in rows {
                store.insert_item(&list, row);
            }
        }
    }
    Ok(store)
}

fn load_users(dir: &Path) -> Result<Vec<UserProfile>> {
    let path = dir.join("users.json");
    if path.exists() {
        read_json(&path)
    } else {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = load_config(&cli)?;
    config.status_hide_delay_ms = 0;
    let store = Arc::new(load_store(&cli.fixture, cli.generation.into())?);
    let identity = Arc::new(MemoryIdentity::new(load_users(&cli.fixture)?));
    identity.sign_in(cli.user);
    store.act_as(cli.user);

    let fragment = cli.id.map(format_fragment);
    let services = Collaborators::for_config(&config, store, identity)
        .with_fragment(Arc::new(MemoryFragment::new(fragment.as_deref())));
    let mut session = SessionContext::new(config, services);

    let outcome = initialize(&mut session)
        .await
        .context("initialization pipeline broke its contract")?;
    if let PipelineOutcome::Failed { step, message } = &outcome {
        bail!(
            "initialization failed at `{step}`: {}",
            message.as_deref().unwrap_or("no message")
        );
    }

    let rendered = session.render();
    let model = &session.model;
    if cli.json {
        let document = json!({
            "list": model.list_name(),
            "id": model.id(),
            "permissions": model.permissions(),
            "audit": model.audit(),
            "attachments": model.attachments(),
            "history": model.history(),
            "fields": rendered,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    match model.id() {
        Some(id) => println!("{} #{id}", model.list_name()),
        None => println!("{} (new)", model.list_name()),
    }
    let width = rendered.iter().map(|f| f.label.len()).max().unwrap_or(0);
    for field in &rendered {
        let mut flags = String::new();
        if field.required {
            flags.push('*');
        }
        if !field.editable {
            flags.push_str(" (read-only)");
        }
        println!("  {:width$}{flags}  {}", field.label, field.text);
        if let Some(reason) = &field.invalid {
            println!("  {:width$}   ! {reason}", "");
        }
    }
    if let Some(audit) = model.audit() {
        let name = |actor: &listform_core::ActorRef| {
            actor
                .display_name()
                .map_or_else(|| format!("user {}", actor.id()), ToString::to_string)
        };
        println!(
            "  created {} by {}, modified {} by {}",
            audit.created.at.format("%Y-%m-%d %H:%M"),
            name(&audit.created.by),
            audit.modified.at.format("%Y-%m-%d %H:%M"),
            name(&audit.modified.by),
        );
    }
    for attachment in model.attachments() {
        println!("  attachment: {}", attachment.file_name);
    }
    for entry in model.history() {
        println!(
            "  {} {} {}",
            entry.at.format("%Y-%m-%d"),
            entry.actor.as_deref().unwrap_or("-"),
            entry.action
        );
    }
    let permissions = model.permissions();
    println!(
        "  can save: {}, can print: {}, can delete: {}",
        permissions.can_save, permissions.can_print, permissions.can_delete
    );
    Ok(())
}
