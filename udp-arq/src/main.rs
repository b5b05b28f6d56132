//! Entry point for `udp-arq`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, signal handling, argument parsing, opening files and
//! sockets).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};

use udp_arq::{
    receive_stream, send_stream, FileObserver, Framing, LogObserver, Observer, ReceiverConfig,
    SenderConfig, UdpTransport, WindowSize,
};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a waiting receiver.
    Send {
        /// File to send.
        file: PathBuf,
        /// Receiver host name or address.
        host: String,
        /// Receiver UDP port.
        port: u16,
        /// Packets in flight, 1 to 32.
        window: WindowSize,
        /// Wait this long for progress before retransmitting.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
        /// Give up after this many consecutive timeouts.
        #[arg(long, default_value_t = 3)]
        max_timeouts: u32,
        #[command(flatten)]
        common: Common,
    },
    /// Receive a file from a sender.
    Recv {
        /// Output file, created or truncated.
        file: PathBuf,
        /// Local UDP port to listen on.
        port: u16,
        /// Packets buffered ahead of the next in-order one, 1 to 32.
        window: WindowSize,
        /// Local address to bind.
        #[arg(long, default_value = "0.0.0.0")]
        bind_host: String,
        /// Keep answering retransmissions this long after the transfer ends.
        #[arg(long, default_value_t = 0)]
        linger_ms: u64,
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args)]
struct Common {
    /// Frame layout; both ends must agree.
    #[arg(long, default_value_t = Framing::LengthPrefixed)]
    framing: Framing,
    /// Append one line per packet event to this file.
    #[arg(long)]
    packet_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let transfer = async move {
        match cli.mode {
            Mode::Send {
                file,
                host,
                port,
                window,
                timeout_ms,
                max_timeouts,
                common,
            } => {
                let config = SenderConfig::new(window)
                    .with_framing(common.framing)
                    .with_ack_timeout(Duration::from_millis(timeout_ms))
                    .with_max_timeouts(max_timeouts);
                run_send(&file, &host, port, config, common.packet_log.as_deref()).await
            }
            Mode::Recv {
                file,
                port,
                window,
                bind_host,
                linger_ms,
                common,
            } => {
                let config = ReceiverConfig::new(window)
                    .with_framing(common.framing)
                    .with_linger(Duration::from_millis(linger_ms));
                run_recv(&file, &bind_host, port, config, common.packet_log.as_deref()).await
            }
        }
    };

    tokio::select! {
        result = transfer => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{e:#}");
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted; shutting down");
            ExitCode::SUCCESS
        }
    }
}

async fn run_send(
    file: &Path,
    host: &str,
    port: u16,
    config: SenderConfig,
    packet_log: Option<&Path>,
) -> anyhow::Result<()> {
    config.validate()?;

    let peer = resolve(host, port).await?;
    let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let transport = UdpTransport::bind(local)
        .await
        .with_context(|| format!("failed to bind {local}"))?;

    log::info!("sending {} to {peer}", file.display());
    let observer = open_observer(packet_log).await?;
    let result = send_stream(&transport, peer, source, config, observer.as_dyn()).await;
    observer.close().await?;

    let report = result.with_context(|| format!("transfer to {peer} failed"))?;
    log::info!(
        "sent {} byte(s) in {} chunk(s), {} retransmission(s), {:.3}s",
        report.bytes,
        report.chunks,
        report.retransmissions,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn run_recv(
    file: &Path,
    bind_host: &str,
    port: u16,
    config: ReceiverConfig,
    packet_log: Option<&Path>,
) -> anyhow::Result<()> {
    let local = resolve(bind_host, port).await?;
    let transport = UdpTransport::bind(local)
        .await
        .with_context(|| format!("failed to bind {local}"))?;
    let sink = tokio::fs::File::create(file)
        .await
        .with_context(|| format!("failed to create {}", file.display()))?;

    let observer = open_observer(packet_log).await?;
    let result = receive_stream(&transport, sink, config, observer.as_dyn()).await;
    observer.close().await?;

    let report = result.with_context(|| format!("receiving into {} failed", file.display()))?;
    log::info!(
        "received {} byte(s) in {} chunk(s) from {}, {:.3}s",
        report.bytes,
        report.chunks,
        report
            .peer
            .map_or_else(|| "nobody".to_string(), |p| p.to_string()),
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {host}"))
}

/// Packet diagnostics go to a file when `--packet-log` is given, otherwise to
/// the logger.
enum PacketLog {
    File(FileObserver),
    Log(LogObserver),
}

impl PacketLog {
    fn as_dyn(&self) -> &dyn Observer {
        match self {
            PacketLog::File(f) => f,
            PacketLog::Log(l) => l,
        }
    }

    async fn close(self) -> anyhow::Result<()> {
        if let PacketLog::File(f) = self {
            f.close().await.context("failed to write packet log")?;
        }
        Ok(())
    }
}

async fn open_observer(path: Option<&Path>) -> anyhow::Result<PacketLog> {
    match path {
        Some(path) => {
            let observer = FileObserver::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(PacketLog::File(observer))
        }
        None => Ok(PacketLog::Log(LogObserver)),
    }
}
