use copytrade_clock::SystemClock;
use copytrade_core::Priority;
use copytrade_runner::{RunnerConfig, bootstrap, render};
use log::{info, warn};
use std::sync::Arc;

fn print_help() {
    eprintln!(
        r#"Copy-Trade Runner - distribute one signal across subscribed accounts

USAGE:
    copytrade [OPTIONS]

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG            Log level filter (default: info)

EXAMPLES:
    # Run the embedded demo (paper accounts)
    copytrade

    # Run with config file
    copytrade --config accounts.json
"#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(args[i].clone());
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            RunnerConfig::from_file(&path)?
        }
        None => {
            info!("Using embedded demo configuration");
            RunnerConfig::demo()?
        }
    };

    let mut boot = bootstrap(config, Arc::new(SystemClock::new()))?;
    let report = boot.engine.submit_and_distribute(&boot.signal).await?;

    while let Ok(event) = boot.events.try_recv() {
        if event.priority() == Priority::High {
            warn!("[ALERT] {:?}", event);
        }
    }

    print!("{}", render(&report));
    Ok(())
}
