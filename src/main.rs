//! Tessera CLI - validate and render widget definitions

use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use tessera::config::EngineConfig;
use tessera::error::{FixSuggestion, Result, TesseraError};
use tessera::util::constants::DATA_ROOT;
use tessera::util::jsonpath;
use tessera::{
    template, BindingRegistry, DataModel, Document, HostLoop, MemoryModel, ScriptHost, View,
    WidgetDefinition,
};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - reactive template binding engine for HTML widgets")]
#[command(version)]
struct Cli {
    /// Config file (default: ./tessera.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a widget definition: template, bindings and scripts
    Validate {
        /// Path to the widget YAML file
        file: PathBuf,
    },

    /// Render a widget against a model and print the resulting HTML
    Render {
        /// Path to the widget YAML file
        file: PathBuf,

        /// Model JSON file; a root without `data` is used as the data object
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// View id substituted for `{id}`
        #[arg(long, default_value = "w1")]
        id: String,

        /// Model change applied after the first render: path=json (path under data)
        #[arg(long = "set", value_name = "PATH=JSON")]
        set: Vec<String>,

        /// Print the engine event log after the HTML
        #[arg(long)]
        events: bool,
    },
}

fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.clone().unwrap_or_else(EngineConfig::default_path))
        .map(EngineConfig::with_env);
    init_tracing(cli.verbose, config.as_ref().ok());

    let result = config.and_then(|config| match cli.command {
        Commands::Validate { file } => validate_widget(&file, &config),
        Commands::Render {
            file,
            model,
            id,
            set,
            events,
        } => render_widget(&file, model.as_deref(), &id, &set, events, config),
    });

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, config: Option<&EngineConfig>) {
    let default = if verbose {
        "debug".to_string()
    } else {
        config
            .and_then(|c| c.log_filter.clone())
            .unwrap_or_else(|| "warn".to_string())
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // Logs on stderr; stdout carries the rendered HTML
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn validate_widget(file: &std::path::Path, config: &EngineConfig) -> Result<()> {
    let definition = WidgetDefinition::from_file(file)?;
    let compiled = template::compile(&definition.template, &definition.methods)?;
    let registry = BindingRegistry::build(&definition, &compiled)?;
    let scripts = ScriptHost::build(
        registry
            .scripts()
            .iter()
            .map(|s| (&*s.name, s.source.as_str())),
        compiled.node_names(),
        config.max_script_depth,
    )?;

    let name = definition.name.as_deref().unwrap_or("(unnamed)");
    println!("{} Widget '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", name);
    println!("  Nodes: {}", compiled.node_names().len());
    println!("  Attribute bindings: {}", registry.attrs().count());
    println!("  Event bindings: {}", registry.events().count());
    println!("  Children slots: {}", registry.children().count());
    println!("  Callbacks: {}", registry.callbacks().len());
    println!("  Scripts: {}", scripts.len());

    Ok(())
}

fn render_widget(
    file: &std::path::Path,
    model_file: Option<&std::path::Path>,
    view_id: &str,
    assignments: &[String],
    show_events: bool,
    config: EngineConfig,
) -> Result<()> {
    let definition = WidgetDefinition::from_file(file)?;
    let root = match model_file {
        Some(path) => {
            let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            if value.get(DATA_ROOT).is_some() {
                value
            } else {
                json!({ DATA_ROOT: value })
            }
        }
        None => json!({ DATA_ROOT: {} }),
    };
    // Parse every --set up front so a typo fails before anything renders
    let changes = assignments
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>>>()?;

    let host = HostLoop::new();
    let document = Document::new(host.clone());
    let container = document.create_element("div");
    document.append_child(document.body(), container);
    let model = Rc::new(MemoryModel::new(root));

    let view = View::new(
        definition,
        model.clone(),
        document,
        container,
        view_id,
        config,
    )?;
    view.initialize()?;
    host.run_until_idle();

    for (path, value) in changes {
        model.set_batch(vec![(path, value)])?;
        host.run_until_idle();
    }
    view.after_layout()?;
    host.run_until_idle();

    println!("{}", view.html());

    if show_events {
        let log = view.events().to_json();
        let outbound = serde_json::to_value(model.events())?;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "log": log, "outbound": outbound }))?
        );
    }
    Ok(())
}

/// `path=json` → (absolute model path, value); non-JSON text is a string
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((path, value)) = raw.split_once('=') else {
        return Err(TesseraError::InvalidAssignment {
            raw: raw.to_string(),
            reason: "expected path=value".into(),
        });
    };
    let path = path.trim();
    if path.is_empty() {
        return Err(TesseraError::InvalidAssignment {
            raw: raw.to_string(),
            reason: "empty path".into(),
        });
    }
    jsonpath::parse(path)?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((jsonpath::join(DATA_ROOT, path), value))
}
