//! GeoFuse — image geolocation by fusing independent estimators.

use std::path::PathBuf;
use std::sync::Arc;

use geofuse_core::GeoFuseConfig;
use geofuse_server::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> PathBuf {
    std::env::var("GEOFUSE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("geofuse.json"))
}

fn print_help() {
    println!("GeoFuse image geolocation server");
    println!();
    println!("Usage: geofuse [command]");
    println!();
    println!("Commands:");
    println!("  (none)                   Start the server");
    println!("  --offline                Start without remote estimators");
    println!("  check-config [path]      Load, validate and print the configuration");
    println!("  init-config [path]       Write the effective configuration to a file");
    println!("  help                     Show this help message");
    println!();
    println!("Configuration is read from $GEOFUSE_CONFIG (default geofuse.json),");
    println!("then overridden by GEOFUSE_* environment variables.");
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let mut config = match GeoFuseConfig::load(Some(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    for endpoint in &mut config.estimators {
        if endpoint.api_key.is_some() {
            endpoint.api_key = Some("<redacted>".into());
        }
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init_config(path: PathBuf) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists, refusing to overwrite", path.display());
    }
    // Defaults plus any GEOFUSE_* overrides in the environment.
    let mut config = GeoFuseConfig::default();
    config.apply_env();
    config.validate()?;
    config.save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut offline = false;

    // Handle CLI subcommands
    if args.len() > 1 {
        match args[1].as_str() {
            "--help" | "-h" | "help" => {
                print_help();
                return Ok(());
            }
            "--check-config" | "check-config" => {
                let path = args
                    .get(2)
                    .map(PathBuf::from)
                    .unwrap_or_else(resolve_config_path);
                return check_config(path);
            }
            "init-config" => {
                let path = args
                    .get(2)
                    .map(PathBuf::from)
                    .unwrap_or_else(resolve_config_path);
                return init_config(path);
            }
            "--offline" | "offline" => offline = true,
            _ => {
                eprintln!("Unknown command: {}. Use 'geofuse help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    let config = GeoFuseConfig::load(Some(&resolve_config_path()))?;

    let estimators = if offline {
        info!("Offline mode: only GPS fixes supplied with uploads are used");
        Vec::new()
    } else {
        geofuse_estimators::create_estimators(&config)?
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, estimators));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("GeoFuse server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
