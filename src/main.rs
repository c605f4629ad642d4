use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use sluice::{
    adapters::{
        HttpServer, InMemoryFilterRegistry, MetricsFilterMetrics, MetricsUsageNotifier,
        register_builtin_filters,
    },
    config::{
        ServerConfigValidator,
        loader::{load_config, load_config_unchecked},
        models::{ServerConfig, SharedSettings},
    },
    core::{RunnerServices, binding::SpanBinding},
    metrics, tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(config).await,
        None => serve(args.config).await,
    }
}

async fn serve(config_path: String) -> Result<()> {
    let config = Arc::new(
        load_config(&config_path)
            .with_context(|| format!("Failed to load config from {config_path}"))?,
    );

    tracing_setup::init_tracing_with_config(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    tracing::info!("Loaded configuration from {config_path}");
    for (prefix, endpoint) in &config.routes {
        tracing::info!("Configured route: {} -> {}", prefix, endpoint);
    }

    let settings = config.shared_filter_settings();
    let registry = Arc::new(InMemoryFilterRegistry::new());
    register_builtin_filters(&registry, &config, &settings);

    let services = RunnerServices::new(
        Arc::new(MetricsUsageNotifier),
        Arc::new(MetricsFilterMetrics),
        settings.clone(),
    )
    .with_binding(Arc::new(SpanBinding));

    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    // Settings reload task
    let mut reload_rx = graceful_shutdown.subscribe_reload();
    let reload_path = config_path.clone();
    tokio::spawn(async move {
        while reload_rx.recv().await.is_ok() {
            reload_filter_settings(&reload_path, &settings);
        }
        tracing::debug!("Settings reload task is shutting down.");
    });

    let server = HttpServer::new(config.clone(), registry, services);
    let token = graceful_shutdown.token();
    let server_task = tokio::task::spawn_blocking(move || server.run(token));

    let outcome = server_task.await.context("Server thread panicked")?;
    if !graceful_shutdown.is_shutdown_initiated() {
        // Event loops only stop on their own when something failed.
        graceful_shutdown.trigger_shutdown();
    }
    outcome.context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Swap in filter settings from a fresh read of the config file, keeping the
/// current ones when the file no longer loads or validates.
fn reload_filter_settings(config_path: &str, settings: &SharedSettings) {
    tracing::info!("Attempting to reload filter settings from {}", config_path);
    match load_config(config_path) {
        Ok(new_config) => {
            settings.store(Arc::new(new_config.filters));
            tracing::info!("Filter settings reloaded.");
        }
        Err(e) => {
            tracing::error!(
                "Failed to reload configuration: {:#}. Keeping old settings.",
                e
            );
        }
    }
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config: ServerConfig = match load_config_unchecked(config_path) {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("Configuration validation: OK");
            println!();
            println!("Configuration Summary:");
            println!("   - Listen Address: {}", config.listen_addr);
            println!("   - Event Loops: {}", config.event_loops);
            println!("   - Routes: {}", config.routes.len());
            println!(
                "   - Excessive Execution Threshold: {}ms",
                config.filters.excessive_exec_time_ms
            );
            println!("   - Disabled Filters: {}", config.disabled_filters.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("Common fixes:");
            println!("   - Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   - Route prefixes must start with '/'");
            println!("   - Endpoint names must not be empty");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# sluice configuration

# The address to listen on
listen_addr = "127.0.0.1:8080"

# Single-threaded event loops; defaults to the number of CPUs
# event_loops = 4

# Seconds before an unanswered exchange is answered with 504
exchange_timeout_secs = 30

# Built-in filters to switch off
disabled_filters = []

[filters]
excessive_exec_time_ms = 500
default_error_endpoint = "endpoint.ErrorResponse"
concurrency_protect_enabled = true
concurrency_limit = 4000

[filters.concurrency_limits]
"endpoint.Echo" = 200

# Path prefix -> endpoint filter
[routes]
"/health" = "endpoint.Health"
"/echo" = "endpoint.Echo"

[response_headers]
server = "sluice"

[logging]
level = "info"
json = false
spans = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'sluice serve --config {config_path}' to start the server");
    Ok(())
}
