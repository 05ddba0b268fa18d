//! Vigil Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - VIGIL_HOST: Bind address (default: 0.0.0.0)
//! - VIGIL_PORT: Port number (default: 8080)
//! - VIGIL_TICK_MS: Scheduling loop period in milliseconds (default: 1000)
//! - VIGIL_INVENTORY: Path to the JSON inventory (default: none, empty engine)
//! - VIGIL_*: Engine tunables, see `EngineConfig::from_env`
//! - RUST_LOG: Log level (default: info)

use vigil::api::{run_server, ServerConfig};
use vigil::{Engine, EngineConfig, Inventory};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine_config = EngineConfig::from_env();
    let config = ServerConfig::from_env();

    let engine = match std::env::var("VIGIL_INVENTORY") {
        Ok(path) => {
            let (engine, diagnostics) = Inventory::load(&path)?.build(engine_config)?;
            for diagnostic in &diagnostics {
                tracing::warn!(
                    entity = %diagnostic.entity,
                    error = %diagnostic.error,
                    "Business rule configuration problem"
                );
            }
            tracing::info!("  Inventory: {}", path);
            engine
        }
        Err(_) => {
            tracing::warn!("VIGIL_INVENTORY not set, starting with an empty inventory");
            Engine::new(engine_config)
        }
    };

    tracing::info!("Vigil configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Tick interval: {} ms", config.tick_interval_ms);
    tracing::info!("  Interval length: {} seconds", engine.config().interval_length);
    tracing::info!("  Entities: {}", engine.registry().len());

    println!(
        r#"
 __   ___      _ _
 \ \ / (_) __ _(_) |
  \ V /| |/ _` | | |
   \_/ |_|\__, |_|_|
          |___/

 Host and service monitoring core
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config, engine).await
}
