use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::subscriber::set_global_default;
use tracing::{error, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use datasweep::config::context::build_context;
use datasweep::config::schema::load_config;
use datasweep::frontend::http::run_server;

const DEFAULT_CONFIG_PATH: &str = "datasweep.toml";

#[derive(Debug, Parser)]
#[clap(name = "datasweep", about = "Clean and explore tabular datasets over HTTP")]
struct Args {
    #[clap(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[clap(long, help = "Log in JSON instead of plain text")]
    json_logs: bool,
}

fn prepare_tracing(json_logs: bool) {
    // Route `log` records from dependencies through tracing
    if let Err(e) = LogTracer::init() {
        eprintln!("Couldn't forward log records to tracing: {e}");
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_logs {
        set_global_default(registry.with(tracing_subscriber::fmt::layer().json()))
    } else {
        set_global_default(registry.with(tracing_subscriber::fmt::layer()))
    };
    if let Err(e) = result {
        eprintln!("Couldn't install the tracing subscriber: {e}");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Couldn't listen for Ctrl-C, shutting down");
        return;
    }
    info!("Received Ctrl-C, shutting down");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    prepare_tracing(args.json_logs);

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = ?args.config, error = %e, "Error loading the config");
            exit(1);
        }
    };

    let context = match build_context(&config).await {
        Ok(context) => Arc::new(context),
        Err(e) => {
            error!(error = %e, "Error building the context");
            exit(1);
        }
    };

    let http = config.frontend.http.clone().unwrap_or_default();
    info!(
        "Starting the HTTP frontend on {}:{}",
        http.bind_host, http.bind_port
    );
    if http.users.is_empty() {
        warn!("No users configured, every request will be rejected");
    }

    if let Err(e) = run_server(context, http, shutdown_signal()).await {
        error!(error = %e, "HTTP frontend failed");
        exit(1);
    }
}
