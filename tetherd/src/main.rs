mod api;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::level_filters::LevelFilter;

use tether_core::config::Config;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(long = "listen", short = 'l', help = "listen address for the control surface", default_value = "127.0.0.1:7878")]
    listen: SocketAddr,

    #[clap(
        long = "config",
        short = 'c',
        help = "path to the TOML configuration file",
        default_value = "/etc/tetherd/config.toml"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .context("failed to set global default subscriber")?;

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config).context("loading configuration")?;
    let state = state::AppState::build(config).context("building daemon state")?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    tracing::info!(addr = %cli.listen, "tetherd listening");
    axum::serve(listener, app).await.context("serving control surface")?;
    Ok(())
}
