mod cli;

use std::net::SocketAddr;

use clap::{error::ErrorKind, CommandFactory, Parser};
use prettytable::row;
use tracing::level_filters::LevelFilter;

use tether_core::types::TetherMode;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(long = "server", short = 's', help = "tetherd control address", default_value = "127.0.0.1:7878")]
    server: SocketAddr,
    #[command(subcommand)]
    command: Cmds,
}

#[derive(Debug, clap::Subcommand)]
enum Cmds {
    /// Enable tethering in NAT or bridged-AP mode over the given upstream interface.
    Enable {
        #[clap(long, value_enum)]
        mode: Mode,
        #[clap(long)]
        upstream_ifname: String,
    },
    /// Disable a previously enabled mode (refcounted; a matching number of enables must disable).
    Disable {
        #[clap(long, value_enum)]
        mode: Mode,
    },
    /// Print the current tethering status.
    Status,
    /// Request a per-client private network; blocks until it's ready.
    Request {
        #[clap(long)]
        owner_id: String,
    },
    /// Release a previously requested private network by its path.
    Release {
        #[clap(long)]
        path: String,
    },
    /// Refresh an owner's liveness deadline.
    Heartbeat {
        #[clap(long)]
        owner_id: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Mode {
    Nat,
    BridgedAp,
}

impl From<Mode> for TetherMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Nat => TetherMode::Nat,
            Mode::BridgedAp => TetherMode::BridgedAp,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::WARN.into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .ok();

    let cli = Cli::parse();
    if let Err(e) = dispatch(&cli).await {
        Cli::command()
            .error(ErrorKind::Io, format!("{:?}", e))
            .exit();
    }
}

async fn dispatch(opts: &Cli) -> anyhow::Result<()> {
    let client = cli::Client::new(opts.server);
    match &opts.command {
        Cmds::Enable { mode, upstream_ifname } => {
            let status = client.enable((*mode).into(), upstream_ifname.clone()).await?;
            print_status(&status);
        }
        Cmds::Disable { mode } => {
            let status = client.disable((*mode).into()).await?;
            print_status(&status);
        }
        Cmds::Status => {
            let status = client.status().await?;
            print_status(&status);
        }
        Cmds::Request { owner_id } => {
            let reply = client.request_private_network(owner_id.clone()).await?;
            let mut table = prettytable::Table::new();
            table.add_row(row!["path", "server ip", "peer ip", "primary dns", "secondary dns", "fd"]);
            table.add_row(row![
                reply.path,
                reply.server_ipv4,
                reply.peer_ipv4,
                reply.primary_dns.as_deref().unwrap_or("-"),
                reply.secondary_dns.as_deref().unwrap_or("-"),
                reply.fd
            ]);
            table.printstd();
        }
        Cmds::Release { path } => {
            client.release_private_network(path.clone()).await?;
        }
        Cmds::Heartbeat { owner_id } => {
            client.heartbeat(owner_id.clone()).await?;
        }
    }
    Ok(())
}

fn print_status(status: &tether_core::wire::StatusResponse) {
    let mut table = prettytable::Table::new();
    table.add_row(row!["status", "enable_count"]);
    table.add_row(row![format!("{:?}", status.status), status.enable_count]);
    table.printstd();
}
