use std::{
    fs,
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plugdeck_core::{
    broker::{auth_channel, HostSources, MessageBroker},
    config::InstanceConfig,
    dom::Document,
    loader::HttpResourceLoader,
    registry::ElementRegistry,
    routes::RouteTable,
    runtime::PluginRuntime,
};
use regex::Regex;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "plugdeck", author, version, about = "Plugin runtime host for the comment platform console")]
struct Cli {
    /// Sets the log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the plugin host using the supplied configuration file.
    Run {
        #[arg(
            short,
            long,
            value_name = "FILE",
            default_value = "demos/config/minimal.plugdeck.toml"
        )]
        config: PathBuf,
    },
    /// Interact with configuration files (validate, sample output, etc.)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Inspect configured plugins.
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// Dump the resolved configuration as JSON.
    Diag {
        #[arg(
            short,
            long,
            value_name = "FILE",
            default_value = "demos/config/minimal.plugdeck.toml"
        )]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validates the provided configuration file.
    Validate {
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },
    /// Prints the bundled minimal example configuration.
    Example,
}

#[derive(Subcommand, Debug)]
enum PluginCommands {
    /// Lists the plugins declared in a configuration file.
    List {
        #[arg(
            short,
            long,
            value_name = "FILE",
            default_value = "demos/config/minimal.plugdeck.toml"
        )]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    match cli.command {
        Commands::Run { config } => handle_run(config).await,
        Commands::Config { command } => handle_config(command),
        Commands::Plugins { command } => handle_plugins(command),
        Commands::Diag { config } => handle_diag(config),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().ok();
    Ok(())
}

async fn handle_run(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    config.validate()?;
    let plugin_ids: Vec<String> = config.plugins.iter().map(|p| p.id.clone()).collect();

    let registry = ElementRegistry::new();
    let routes = Arc::new(RouteTable::new());
    let document = Arc::new(Document::new());
    let runtime = PluginRuntime::new(
        Arc::new(HttpResourceLoader::new()),
        registry,
        routes.clone(),
        document,
    );

    // The broker answers subscription requests regardless of plugin load
    // state; the publisher is where the host session layer pushes principal
    // changes.
    let (auth_publisher, auth_source) = auth_channel(None);
    let _broker = MessageBroker::spawn(HostSources { auth: auth_source });

    if let Err(err) = runtime.init(config).await {
        tracing::error!(error = %err, "plugin initialization reported a failure");
    }
    for id in &plugin_ids {
        let status = runtime
            .plugin_status(id)
            .with_context(|| format!("missing status for plugin `{id}`"))?;
        match status.settled().await {
            Ok(()) => tracing::info!(plugin = id, "plugin available"),
            Err(err) => tracing::warn!(plugin = id, error = %err, "plugin unavailable"),
        }
    }
    tracing::info!(
        routes = routes.routes().len(),
        "plugin host ready; awaiting shutdown signal (Ctrl+C)"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to install ctrl-c handler")?;
    tracing::info!("shutdown signal received");
    drop(auth_publisher);
    Ok(())
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { config } => {
            let cfg = load_config(&config)?;
            cfg.validate()?;
            println!("configuration OK: {}", config.display());
        }
        ConfigCommands::Example => {
            println!(
                "{}",
                include_str!("../../../demos/config/minimal.plugdeck.toml")
            );
        }
    }
    Ok(())
}

fn handle_plugins(command: PluginCommands) -> Result<()> {
    match command {
        PluginCommands::List { config } => {
            let cfg = load_config(&config)?;
            if cfg.plugins.is_empty() {
                println!("no plugins configured in {}", config.display());
            } else {
                for plugin in &cfg.plugins {
                    println!(
                        "- {} ({} resource(s), {} plug(s))",
                        plugin.id,
                        plugin.ui_resources.len(),
                        plugin.ui_plugs.len()
                    );
                    for plug in &plugin.ui_plugs {
                        println!(
                            "    {} @ {}{}",
                            plug.component_tag,
                            plug.location,
                            plug.path
                                .as_ref()
                                .map(|p| format!(" (routed: {}/{p})", plugin.path))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_diag(path: PathBuf) -> Result<()> {
    let cfg = load_config(&path)?;
    let json = serde_json::to_string_pretty(&cfg)?;
    println!("{json}");
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<InstanceConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let expanded = interpolate_env(&raw)?;
    let cfg = toml::from_str::<InstanceConfig>(&expanded)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(cfg)
}

fn interpolate_env(input: &str) -> Result<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let regex = RE.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)(?::([^}]+))?\}").unwrap());
    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let key = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(key).unwrap_or_else(|_| default.to_string())
    });
    Ok(result.into_owned())
}
