//! polres CLI - stamp-based policy resolver.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use polres_core::{Definitions, ResolverConfig, ResolverEvent, ScriptValue};
use polres_resolver::{MainLoop, Resolver, SharedResolver, UpdateReport};
use polres_storage::{FactStore, MemoryStore};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polres")]
#[command(about = "Stamp-based policy resolver", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Target definitions (JSON)
    #[arg(short, long)]
    definitions: PathBuf,

    /// Fact store snapshot (JSON); an empty store is used if missing
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Interpreter used for scripts of type `default`
    #[arg(long)]
    interpreter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show facts and targets
    Dump {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Resolve a target once
    Resolve {
        /// Target name
        target: String,
        /// Bind a variable for this request
        #[arg(long = "set", value_name = "NAME=TYPE:VALUE")]
        set: Vec<String>,
        /// Write the store back after a successful resolution
        #[arg(long)]
        save: bool,
    },
    /// Apply fact changes from stdin and auto-update on every commit
    Watch {
        /// Auto-update target name (overrides the definitions file)
        #[arg(long)]
        auto_update: Option<String>,
        /// Write the store back on exit
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (store, resolver) = load(&cli)?;

    match cli.command {
        Commands::Dump { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&dump_json(&resolver))?);
            } else {
                let mut out = std::io::stdout();
                resolver.dump_facts(&mut out)?;
                resolver.dump_targets(&mut out)?;
            }
        }
        Commands::Resolve { target, set, save } => {
            let mut resolver = resolver;
            resolver.events().subscribe(Rc::new(print_event));

            let vars = set
                .iter()
                .map(|s| parse_assignment(s))
                .collect::<Result<Vec<_>>>()?;
            let vars: Vec<(&str, ScriptValue)> =
                vars.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();

            let report = resolver.update(&target, &vars)?;
            print_report(&report);

            if save {
                let path = cli
                    .store
                    .as_deref()
                    .ok_or_else(|| anyhow!("--save needs --store"))?;
                store.save_json(path)?;
                info!("saved store to {}", path.display());
            }
        }
        Commands::Watch { auto_update, save } => {
            let shared = Rc::new(RefCell::new(resolver));
            watch(&store, &shared, auto_update).await?;

            if save {
                let path = cli
                    .store
                    .as_deref()
                    .ok_or_else(|| anyhow!("--save needs --store"))?;
                store.save_json(path)?;
                info!("saved store to {}", path.display());
            }
        }
    }

    Ok(())
}

fn load(cli: &Cli) -> Result<(Rc<MemoryStore>, Resolver)> {
    let mut defs = Definitions::from_path(&cli.definitions)
        .with_context(|| format!("reading {}", cli.definitions.display()))?;
    if let Some(interp) = &cli.interpreter {
        defs.default_interpreter = Some(interp.clone());
    }

    let store = match &cli.store {
        Some(path) if path.exists() => Rc::new(
            MemoryStore::load_json(path).with_context(|| format!("reading {}", path.display()))?,
        ),
        _ => Rc::new(MemoryStore::new()),
    };

    let resolver = Resolver::from_definitions(&defs, store.clone(), ResolverConfig::default())?;
    Ok((store, resolver))
}

/// Parse `name=type:value`.
fn parse_assignment(s: &str) -> Result<(String, ScriptValue)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=TYPE:VALUE, got '{}'", s))?;
    if name.is_empty() {
        bail!("empty variable name in '{}'", s);
    }
    let value = ScriptValue::parse_typed(value)
        .ok_or_else(|| anyhow!("bad value '{}', expected TYPE:VALUE", value))?;
    Ok((name.to_string(), value))
}

fn print_event(event: &ResolverEvent) {
    println!("event: {} target={} level={}", event.kind, event.target, event.level);
}

fn print_report(report: &UpdateReport) {
    for line in &report.output {
        println!("  | {}", line);
    }
    if report.updated.is_empty() {
        println!("{}: up to date", report.target);
    } else {
        println!("{}: updated {}", report.target, report.updated.join(", "));
    }
}

fn dump_json(resolver: &Resolver) -> serde_json::Value {
    let targets: Vec<_> = resolver
        .targets()
        .map(|(id, t)| {
            let name_of = |i: &polres_core::TargetId| {
                resolver
                    .targets()
                    .find(|(other, _)| other == i)
                    .map(|(_, t)| t.name().to_string())
                    .unwrap_or_default()
            };
            serde_json::json!({
                "id": id.index(),
                "name": t.name(),
                "stamp": t.stamp(),
                "prepared": t.is_prepared(),
                "script": t.script().map(|s| s.interpreter_name().to_string()),
                "depends": t.dependencies().iter().map(|d| d.name()).collect::<Vec<_>>(),
                "facts": t.update_facts().iter().map(|f| f.index()).collect::<Vec<_>>(),
                "plan": t.update_targets().iter().map(name_of).collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({
        "facts": resolver.facts(),
        "targets": targets,
    })
}

/// Apply one stdin command. Returns false on `quit`.
fn apply_command(line: &str, store: &MemoryStore, shared: &SharedResolver) -> Result<bool> {
    let mut parts = line.splitn(4, char::is_whitespace);
    let command = parts.next().unwrap_or("");

    match command {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "set" => {
            let (Some(table), Some(key), Some(json)) = (parts.next(), parts.next(), parts.next())
            else {
                bail!("usage: set <table> <key> <json>");
            };
            let value: serde_json::Value =
                serde_json::from_str(json).with_context(|| format!("bad JSON '{}'", json))?;
            let tx = store.begin_transaction()?;
            store.upsert(table, key, value)?;
            store.commit(tx)?;
        }
        "drop" => {
            let Some(table) = parts.next() else {
                bail!("usage: drop <table>");
            };
            let tx = store.begin_transaction()?;
            if let Err(e) = store.drop_table(table) {
                store.rollback(tx)?;
                return Err(e.into());
            }
            store.commit(tx)?;
        }
        "resolve" => {
            let Some(target) = parts.next() else {
                bail!("usage: resolve <target>");
            };
            let report = shared.borrow_mut().update(target, &[])?;
            print_report(&report);
        }
        "dump" => {
            let resolver = shared.borrow();
            let mut out = std::io::stdout();
            resolver.dump_facts(&mut out)?;
            resolver.dump_targets(&mut out)?;
        }
        other => bail!("unknown command '{}'", other),
    }
    Ok(true)
}

async fn watch(
    store: &Rc<MemoryStore>,
    shared: &SharedResolver,
    auto_update: Option<String>,
) -> Result<()> {
    let main_loop = Rc::new(MainLoop::new());

    let name = auto_update.or_else(|| shared.borrow().config().auto_update.clone());
    match name {
        Some(name) => {
            Resolver::enable_auto_update(shared, &name, main_loop.clone())?;
            info!("auto-updating '{}'", name);
        }
        None => warn!("no auto-update target configured; fact changes will not trigger resolution"),
    }
    shared.borrow().events().subscribe(Rc::new(print_event));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match apply_command(line.trim(), store, shared) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {:#}", e),
        }
        main_loop.dispatch();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        let (name, value) = parse_assignment("volume=uint32:7").unwrap();
        assert_eq!(name, "volume");
        assert_eq!(value, ScriptValue::Uint32(7));

        assert!(parse_assignment("volume").is_err());
        assert!(parse_assignment("=int32:1").is_err());
        assert!(parse_assignment("x=int32:abc").is_err());
    }

    #[test]
    fn test_watch_commands() {
        let store = Rc::new(MemoryStore::new());
        let defs = Definitions::from_json_str(
            r#"{ "targets": [ { "name": "a", "depends": ["$f"], "script": { "source": "echo(\"a\")" } } ] }"#,
        )
        .unwrap();
        let resolver = Resolver::from_definitions_with(
            &defs,
            store.clone(),
            ResolverConfig::default(),
            std::sync::Arc::new(polres_script::InterpreterRegistry::with_builtins()),
        )
        .unwrap();
        let shared = Rc::new(RefCell::new(resolver));

        assert!(apply_command("set f k 1", &store, &shared).unwrap());
        assert_eq!(store.get("f", "k"), Some(serde_json::json!(1)));
        assert!(apply_command("resolve a", &store, &shared).unwrap());
        assert!(apply_command("drop f", &store, &shared).unwrap());
        assert!(store.lookup_table("f").is_none());
        assert!(apply_command("drop f", &store, &shared).is_err());
        assert_eq!(store.transaction_depth(), 0);
        assert!(apply_command("bogus", &store, &shared).is_err());
        assert!(!apply_command("quit", &store, &shared).unwrap());
    }
}
