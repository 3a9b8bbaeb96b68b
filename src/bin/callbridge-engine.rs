use callbridge_engine::{config::Config, listener::start_listener};
use miette::Result;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let config = Config::load().await?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        "Starting {} listening on {}:{}",
        config.instance_name(),
        config.listen.host,
        config.listen.port
    );

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("callbridge-engine", move |s| async move { start_listener(&s, config).await }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await?;

    Ok(())
}
