use std::net::SocketAddr;

use gortms::config::Config;
use gortms::http::build_router;
use gortms::GoRtmsEngine;

#[tokio::main]
async fn main() {
    let config = Config::global();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.server.log_level.clone()))
        .init();

    let engine = GoRtmsEngine::new();
    let app = build_router(engine.app_state());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("SERVER_HOST/SERVER_PORT must form a valid socket address");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind HTTP listener");
    tracing::info!(%addr, "gortms listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    tracing::info!("shutdown signal received");
}
