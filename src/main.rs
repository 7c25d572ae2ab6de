use clap::Parser;
use log::{error, info};
use snare::configuration::{CliArgs, Config};
use snare::network::host_key::load_or_generate;
use snare::network::NetworkListener;
use snare::session_management::SessionManager;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .init();

    println!(
        "
███████╗███╗   ██╗ █████╗ ██████╗ ███████╗
██╔════╝████╗  ██║██╔══██╗██╔══██╗██╔════╝
███████╗██╔██╗ ██║███████║██████╔╝█████╗
╚════██║██║╚██╗██║██╔══██║██╔══██╗██╔══╝
███████║██║ ╚████║██║  ██║██║  ██║███████╗
╚══════╝╚═╝  ╚═══╝╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝
==========================================
   SSH credential capture honeypot v{}
==========================================
",
        env!("CARGO_PKG_VERSION")
    );

    info!("Importing configuration");
    let config = Config::from_args(&args).unwrap_or_else(|e| {
        error!("Unable to import configuration: {}", e);
        std::process::exit(1);
    });
    match &args.config_file {
        Some(path) => info!("Configuration imported from {}", path.display()),
        None => info!("No configuration file given, using defaults"),
    }

    let host_key = load_or_generate(&config.server.host_key_path).unwrap_or_else(|e| {
        error!("{}, exiting...", e);
        std::process::exit(1);
    });

    let manager = Arc::new(SessionManager::new(&config, host_key));
    let listener = NetworkListener::bind(&config, manager)
        .await
        .unwrap_or_else(|e| {
            error!("{}, exiting...", e);
            std::process::exit(1);
        });

    tokio::select! {
        result = listener.start_listening() => {
            if let Err(e) = result {
                error!("Listener stopped: {}, exiting...", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }
}
