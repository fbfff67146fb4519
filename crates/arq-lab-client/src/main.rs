use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use arq_lab_abstract::ProtocolConfig;
use arq_lab_client::Reactor;
use arq_lab_protocol::{Client, ack_mode_by_name, mode_by_name};
use bytes::Bytes;
use clap::Parser;
use tokio::net::{UdpSocket, lookup_host};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send a file over UDP with a reliable byte-stream protocol")]
struct Args {
    /// Receiver host name or address.
    host: String,

    /// Receiver UDP port.
    port: u16,

    /// File to transfer.
    file: PathBuf,

    /// ARQ mode: `sr` (selective repeat) or `gbn` (go-back-N).
    #[arg(long)]
    mode: Option<String>,

    /// How the receiver acknowledges: `cumulative` or `selective`.
    /// Defaults to selective for `sr` and cumulative for `gbn`.
    #[arg(long)]
    peer_acks: Option<String>,

    /// Protocol settings (TOML); flags override individual fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Retransmission timeout in milliseconds.
    #[arg(long)]
    rto_ms: Option<u64>,

    /// Give up after this many consecutive timeouts without progress.
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Args {
    fn protocol_config(&self) -> Result<ProtocolConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProtocolConfig::default(),
        };
        if let Some(mode) = &self.mode {
            config.mode = mode_by_name(mode)?;
        }
        if let Some(acks) = &self.peer_acks {
            config.peer_ack_mode = Some(ack_mode_by_name(acks)?);
        }
        if let Some(rto) = self.rto_ms {
            config.rto_ms = rto;
        }
        if self.max_retries.is_some() {
            config.max_retries = self.max_retries;
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<ProtocolConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse protocol config")
}

fn main() -> ExitCode {
    let args = Args::parse();
    // stdout carries only the event log.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("ERROR: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.protocol_config()?;

    let peer = lookup_host((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to resolve {}", args.host))?
        .next()
        .with_context(|| format!("No address found for {}", args.host))?;

    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("File not found: {}", args.file.display()))?;

    let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)
        .await
        .context("Failed to open UDP socket")?;

    info!(
        %peer,
        bytes = data.len(),
        mode = ?config.mode,
        peer_acks = ?config.peer_acks(),
        "starting transfer"
    );
    let client = Client::new(config, Bytes::from(data));
    let mut reactor = Reactor::new(socket, Some(peer), client).echo_events(true);
    reactor.run().await?;

    if let Some(err) = reactor.protocol().error() {
        return Err(err.clone()).context("Transfer aborted");
    }
    info!("transfer complete");
    Ok(())
}
