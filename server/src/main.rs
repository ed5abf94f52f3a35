use eightball_server::config::ServerConfig;
use eightball_server::lobby::RoomRegistry;
use eightball_server::ws::{router, AppState};
use eightball_shared::config::GameConfig;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    let game_config = GameConfig::default();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = game_config.validate() {
        eprintln!("Invalid game configuration: {}", e);
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let registry = RoomRegistry::new(config.clone(), game_config);
    let app = router(AppState::new(registry, config.clone()));

    tracing::info!("Starting 8-ball server on {}", config.listen_addr);
    println!("8-ball server listening on {}", config.listen_addr);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
