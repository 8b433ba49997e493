use clap::{Args, Parser, Subcommand};
use log::{debug, error, info, LevelFilter};
use loramesh::{
    address::Address,
    config::{NodeConfig, TransportConfig},
    simulation::{Scenario, Simulation},
    transport::at,
    Node,
};
use std::{
    error::Error,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
#[cfg(target_family = "unix")]
use tokio::signal::{self, unix::SignalKind};

mod cli;

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the node configuration file. Values given on the command line take precedence.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging. Does nothing if `--silent` is set.
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Disable all logs except error logs.
    #[arg(long = "silent", default_value_t = false)]
    silent: bool,

    #[clap(flatten)]
    node_args: NodeArguments,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a node on a radio module. This is the default.
    Run,
    /// Run a virtual network described by a scenario file.
    Simulate {
        /// Path to the toml scenario.
        scenario: PathBuf,
    },
}

#[derive(Debug, Args)]
struct NodeArguments {
    /// Address of this node, 0 to 254.
    #[arg(short = 'a', long = "address")]
    address: Option<Address>,

    /// Serial device of the radio module. The baud rate must already be configured.
    #[arg(long = "device", conflicts_with = "tcp")]
    device: Option<PathBuf>,

    /// Reach the radio module through a TCP to serial bridge at this address instead.
    #[arg(long = "tcp")]
    tcp: Option<SocketAddr>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    pretty_env_logger::formatted_timed_builder()
        .filter_module(
            "loramesh",
            if cli.silent {
                LevelFilter::Error
            } else if cli.debug {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
        )
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = load_config(cli.config.as_deref(), cli.node_args)?;
            run(config).await
        }
        Command::Simulate { scenario } => simulate(&scenario).await,
    }
}

fn load_config(path: Option<&Path>, args: NodeArguments) -> Result<NodeConfig, Box<dyn Error>> {
    let mut config = match (path, args.address) {
        (Some(path), _) => {
            debug!("Loading configuration from {}", path.display());
            NodeConfig::load(path)?
        }
        (None, Some(address)) => NodeConfig::new(address),
        (None, None) => return Err("either a config file or a node address is required".into()),
    };

    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(device) = args.device {
        config.transport = TransportConfig::Serial { device };
    }
    if let Some(address) = args.tcp {
        config.transport = TransportConfig::Tcp { address };
    }
    config.validate()?;

    Ok(config)
}

async fn run(config: NodeConfig) -> Result<(), Box<dyn Error>> {
    let link = match &config.transport {
        TransportConfig::Serial { device } => {
            info!("Opening radio module at {}", device.display());
            at::connect(SerialDevice::open(device)?, config.radio.clone()).await?
        }
        TransportConfig::Tcp { address } => {
            info!("Connecting to radio module at {address}");
            at::connect(TcpStream::connect(address).await?, config.radio.clone()).await?
        }
    };

    let node = Node::new(&config, link);
    tokio::spawn(cli::print_messages(node.subscribe()));

    tokio::select! {
        res = cli::shell(&node) => {
            if let Err(e) = res {
                error!("Failed to read commands: {e}");
            }
        }
        _ = wait_for_shutdown() => {}
    }

    info!("Node {} stopped", node.address());

    Ok(())
}

async fn simulate(path: &Path) -> Result<(), Box<dyn Error>> {
    let scenario = Scenario::load(path)?;
    info!(
        "Simulating {} nodes with {} links",
        scenario.nodes.len(),
        scenario.links.len()
    );

    let simulation = Simulation::new(scenario);
    let outcomes = simulation.run_messages().await;
    cli::print_simulation(&simulation, &outcomes);

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(target_family = "unix")]
    {
        let mut sigint =
            signal::unix::signal(SignalKind::interrupt()).expect("Can install SIGINT handler");
        let mut sigterm =
            signal::unix::signal(SignalKind::terminate()).expect("Can install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => { }
            _ = sigterm.recv() => { }
        }
    }
    #[cfg(not(target_family = "unix"))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for SIGINT: {e}");
        }
    }
}

/// A serial device node, opened twice so a blocked read never holds up a write.
struct SerialDevice {
    reader: File,
    writer: File,
}

impl SerialDevice {
    fn open(path: &Path) -> io::Result<Self> {
        let reader = std::fs::OpenOptions::new().read(true).open(path)?;
        let writer = std::fs::OpenOptions::new().write(true).open(path)?;
        Ok(Self {
            reader: File::from_std(reader),
            writer: File::from_std(writer),
        })
    }
}

impl AsyncRead for SerialDevice {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialDevice {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
