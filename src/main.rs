use whiteboard::config::RelayConfig;
use whiteboard::{routes, state};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env();
    let state = state::AppState::new(config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, volatile_capacity = config.volatile_capacity, "whiteboard relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
