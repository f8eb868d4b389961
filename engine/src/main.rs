//! bluegreen - Entry Point
//!
//! Blue-green deployment engine: alternates releases between two slots per
//! service and shifts traffic between them through the edge router.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use bluegreen::app::options::AppOptions;
use bluegreen::app::run::run;
use bluegreen::filesys::file::File;
use bluegreen::logs::{init_logging, LogOptions};
use bluegreen::storage::layout::StorageLayout;
use bluegreen::storage::settings::Settings;
use bluegreen::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let mut settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            std::process::exit(2);
        }
    };

    if let Some(port) = cli_args.get("port") {
        match port.parse() {
            Ok(port) => settings.server.port = port,
            Err(_) => {
                eprintln!("Invalid --port value: {port}");
                std::process::exit(2);
            }
        }
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_dir.as_deref().map(|dir| layout.resolve(dir)),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the engine
    let options = AppOptions::from_settings(&settings, &layout);
    info!(
        "Running bluegreen engine {} for services {:?}",
        version.version, options.services
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the engine: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
