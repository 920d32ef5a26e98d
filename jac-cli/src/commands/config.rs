//! `config`, `clean`, `plugins`, and `tool`.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use colored::Colorize;
use jac_compiler::cache::CACHE_DIR;
use jac_core::config::{JacConfig, CONFIG_FILE};
use jac_runtime::memory::SESSION_DB;
use jac_runtime::plugin::{Capability, PluginRegistry};
use toml_edit::DocumentMut;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// List the known configuration groups
    Groups,
    /// Print the path of the active jac.toml
    Path,
    /// Show the parsed configuration (optionally one group)
    Show {
        #[arg(short = 'g', long)]
        group: Option<String>,
    },
    /// List all keys with values
    List,
    /// Get one key (dotted, e.g. serve.cl-route-prefix)
    Get { key: String },
    /// Set one key
    Set { key: String, value: String },
    /// Remove one key
    Unset { key: String },
    /// Dump the configuration as json or toml
    Output { format: String },
}

pub fn config(action: ConfigAction) -> Result<(), String> {
    let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
    match action {
        ConfigAction::Groups => {
            for group in ["project", "run", "build", "test", "serve", "environments"] {
                println!("{group}");
            }
            Ok(())
        }
        ConfigAction::Path => {
            let config = JacConfig::discover(&cwd).map_err(|e| e.to_string())?;
            match config.source_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("(no {CONFIG_FILE} found; defaults active)"),
            }
            Ok(())
        }
        ConfigAction::Show { group } => {
            let doc = load_document(&cwd)?;
            match group {
                Some(group) => match doc.get(&group) {
                    Some(item) => {
                        print!("{item}");
                        Ok(())
                    }
                    None => Err(format!("no group '{group}'")),
                },
                None => {
                    print!("{doc}");
                    Ok(())
                }
            }
        }
        ConfigAction::List => {
            let doc = load_document(&cwd)?;
            let mut keys = Vec::new();
            flatten(doc.as_table(), "", &mut keys);
            for (key, value) in keys {
                println!("{key} = {value}");
            }
            Ok(())
        }
        ConfigAction::Get { key } => {
            let doc = load_document(&cwd)?;
            match lookup(&doc, &key) {
                Some(value) => {
                    println!("{}", value.to_string().trim());
                    Ok(())
                }
                None => Err(format!("key '{key}' is not set")),
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_file_path(&cwd);
            let mut doc = load_document_or_default(&path)?;
            set_key(&mut doc, &key, &value);
            std::fs::write(&path, doc.to_string()).map_err(|e| e.to_string())?;
            println!("{} {key}", "set".green());
            Ok(())
        }
        ConfigAction::Unset { key } => {
            let path = config_file_path(&cwd);
            let mut doc = load_document_or_default(&path)?;
            unset_key(&mut doc, &key);
            std::fs::write(&path, doc.to_string()).map_err(|e| e.to_string())?;
            println!("{} {key}", "unset".yellow());
            Ok(())
        }
        ConfigAction::Output { format } => {
            let doc = load_document(&cwd)?;
            match format.as_str() {
                "toml" => {
                    print!("{doc}");
                    Ok(())
                }
                "json" => {
                    let json = toml_to_json(&doc.to_string())?;
                    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
                    Ok(())
                }
                other => Err(format!("unknown output format '{other}' (json|toml)")),
            }
        }
    }
}

fn toml_to_json(text: &str) -> Result<serde_json::Value, String> {
    let value: toml_edit::DocumentMut = text.parse().map_err(|e: toml_edit::TomlError| e.to_string())?;
    fn item_to_json(item: &toml_edit::Item) -> serde_json::Value {
        match item {
            toml_edit::Item::None => serde_json::Value::Null,
            toml_edit::Item::Value(value) => value_to_json(value),
            toml_edit::Item::Table(table) => serde_json::Value::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.to_string(), item_to_json(v)))
                    .collect(),
            ),
            toml_edit::Item::ArrayOfTables(tables) => serde_json::Value::Array(
                tables
                    .iter()
                    .map(|t| {
                        serde_json::Value::Object(
                            t.iter()
                                .map(|(k, v)| (k.to_string(), item_to_json(v)))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        }
    }
    fn value_to_json(value: &toml_edit::Value) -> serde_json::Value {
        match value {
            toml_edit::Value::String(s) => serde_json::Value::String(s.value().clone()),
            toml_edit::Value::Integer(n) => serde_json::Value::from(*n.value()),
            toml_edit::Value::Float(x) => serde_json::Value::from(*x.value()),
            toml_edit::Value::Boolean(b) => serde_json::Value::Bool(*b.value()),
            toml_edit::Value::Datetime(d) => serde_json::Value::String(d.value().to_string()),
            toml_edit::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(value_to_json).collect())
            }
            toml_edit::Value::InlineTable(table) => serde_json::Value::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.to_string(), value_to_json(v)))
                    .collect(),
            ),
        }
    }
    Ok(item_to_json(value.as_item()))
}

fn config_file_path(cwd: &Path) -> PathBuf {
    JacConfig::discover(cwd)
        .ok()
        .and_then(|c| c.source_path().map(Path::to_path_buf))
        .unwrap_or_else(|| cwd.join(CONFIG_FILE))
}

fn load_document(cwd: &Path) -> Result<DocumentMut, String> {
    load_document_or_default(&config_file_path(cwd))
}

fn load_document_or_default(path: &Path) -> Result<DocumentMut, String> {
    if !path.is_file() {
        return Ok(DocumentMut::new());
    }
    std::fs::read_to_string(path)
        .map_err(|e| e.to_string())?
        .parse()
        .map_err(|e: toml_edit::TomlError| e.to_string())
}

fn flatten(table: &toml_edit::Table, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, item) in table.iter() {
        let full = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match item {
            toml_edit::Item::Table(nested) => flatten(nested, &full, out),
            other => out.push((full, other.to_string().trim().to_string())),
        }
    }
}

fn lookup<'a>(doc: &'a DocumentMut, dotted: &str) -> Option<&'a toml_edit::Item> {
    let mut item: &toml_edit::Item = doc.as_item();
    for part in dotted.split('.') {
        item = item.get(part)?;
    }
    Some(item)
}

fn set_key(doc: &mut DocumentMut, dotted: &str, value: &str) {
    let parts: Vec<&str> = dotted.split('.').collect();
    let mut item: &mut toml_edit::Item = doc.as_item_mut();
    for part in &parts[..parts.len() - 1] {
        if item.get(part).is_none() {
            item[part] = toml_edit::table();
        }
        item = &mut item[part];
    }
    let parsed: toml_edit::Value = value
        .parse()
        .unwrap_or_else(|_| toml_edit::Value::from(value));
    item[parts[parts.len() - 1]] = toml_edit::value(parsed);
}

fn unset_key(doc: &mut DocumentMut, dotted: &str) {
    let parts: Vec<&str> = dotted.split('.').collect();
    let mut item: &mut toml_edit::Item = doc.as_item_mut();
    for part in &parts[..parts.len() - 1] {
        let Some(next) = item.get_mut(part) else {
            return;
        };
        item = next;
    }
    if let Some(table) = item.as_table_mut() {
        table.remove(parts[parts.len() - 1]);
    }
}

// ── clean ───────────────────────────────────────────────────────────────────

pub fn clean(
    data: bool,
    cache: bool,
    packages: bool,
    client: bool,
    all: bool,
    force: bool,
) -> Result<(), String> {
    let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
    // Default to the cache when no category was chosen.
    let none_chosen = !(data || cache || packages || client || all);
    let cache = cache || all || none_chosen;
    let data = data || all;
    let packages = packages || all;
    let client = client || all;

    if data && !force {
        return Err("--data removes persisted graphs; pass --force to confirm".to_string());
    }

    if cache {
        remove_dir(&cwd.join(CACHE_DIR));
    }
    if data {
        for suffix in ["", "-wal", "-shm"] {
            remove_file(&cwd.join(format!("{SESSION_DB}{suffix}")));
        }
    }
    if packages {
        remove_dir(&cwd.join("jac_packages"));
    }
    if client {
        remove_dir(&cwd.join(".jac_client"));
    }
    println!("{}", "clean complete".green());
    Ok(())
}

fn remove_dir(path: &Path) {
    if path.is_dir() {
        let _ = std::fs::remove_dir_all(path);
        println!("removed {}", path.display());
    }
}

fn remove_file(path: &Path) {
    if path.is_file() {
        let _ = std::fs::remove_file(path);
        println!("removed {}", path.display());
    }
}

// ── plugins / tool ──────────────────────────────────────────────────────────

pub fn plugins() -> Result<(), String> {
    if PluginRegistry::disabled() {
        println!("plugins disabled (JAC_DISABLE_PLUGINS=1)");
        return Ok(());
    }
    let registry = PluginRegistry::global()
        .lock()
        .map_err(|_| "plugin registry unavailable".to_string())?;
    if registry.all().is_empty() {
        println!("no plugins installed");
    }
    for provider in registry.all() {
        println!("{}\t{:?}", provider.name, provider.capability);
    }
    Ok(())
}

pub fn tool(name: &str, _args: &[String]) -> Result<(), String> {
    let registry = PluginRegistry::global()
        .lock()
        .map_err(|_| "plugin registry unavailable".to_string())?;
    let tools = registry.providers_for(Capability::CliCommand);
    if tools.iter().any(|p| p.name == name) {
        // Dispatch belongs to the plugin host; nothing built-in answers.
        println!("tool '{name}' is provided by a plugin");
        Ok(())
    } else {
        Err(format!("no tool named '{name}'"))
    }
}
