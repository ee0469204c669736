// Shuttle Linux: fetch the bus feed and relay it to a connected peer.

mod config;
mod fetch;
mod link;

use std::sync::Arc;

use anyhow::Context;
use shuttle_core::{Dispatcher, TokioTimer, Transformer};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("shuttle-linux {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load();
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(version = VERSION, api_url = %cfg.api_url, "starting");

    let source = fetch::HttpSource::new(&cfg.api_url, cfg.fetch_timeout())
        .context("building HTTP client")?;
    let link = Arc::new(link::PeerLink::new(cfg.ack_timeout()));
    let dispatcher = Arc::new(
        Dispatcher::new(source, link.clone(), TokioTimer)
            .with_transformer(Transformer::with_scale(cfg.scale))
            .with_policy(cfg.retry_policy()),
    );

    let bind: std::net::SocketAddr = format!("0.0.0.0:{}", cfg.listen_port).parse()?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("binding {}", bind))?;
        tracing::info!(%bind, "waiting for peer");
        tokio::select! {
            res = link::serve(listener, dispatcher, link) => res.context("peer listener")?,
            res = shutdown_signal() => {
                res?;
                tracing::info!("shutting down");
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
