//! OpenNotes-Server entry point.

use std::net::SocketAddr;
use tracing::info;

use opennotes_infrastructure::config::ConfigLoader;
use opennotes_infrastructure::logging;
use opennotes_server::{bootstrap, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader = ConfigLoader::new();
    let config = loader.load().or_else(|_| loader.load_from_env())?;
    logging::init(config.environment);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let (context, scheduler_shutdown) = bootstrap::build(config).await?;

    let app = routes::api_router(context.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "OpenNotes server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await?;

    scheduler_shutdown.cancel();
    context.bus.stop().await.ok();
    context.cache.stop().await.ok();
    Ok(())
}
