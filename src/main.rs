use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use framecast::cli::{Cli, Commands};
use framecast::config::RelayConfig;
use framecast::protocol::{DEFAULT_KEEPALIVE, WS_PATH};
use framecast::relay::RelayServer;
use framecast::source::SourceKind;
use framecast::stream::{self, FrameFile, FrameStats, ProducerOptions, Renderer};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse_args();

    match cli.command {
        Commands::Relay { addr, echo, config } => run_relay(addr, echo, config).await?,
        Commands::Stream {
            url,
            source,
            sample_ms,
            send_ms,
        } => run_stream(url, source, sample_ms, send_ms).await,
        Commands::View { url, save } => run_view(url, save).await,
    }

    Ok(())
}

async fn run_relay(addr: Option<String>, echo: bool, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = RelayConfig::load(config_path.as_deref())?;
    if let Some(addr) = addr {
        config.listen = addr;
    }
    if echo {
        config.echo_to_sender = true;
    }

    let server = RelayServer::bind(config).await?;
    println!("Relay started at ws://{}{}", server.local_addr(), WS_PATH);
    println!("Press Ctrl+C to stop");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("Interrupted — shutting down");
        }
    }

    Ok(())
}

/// Cancel the token on Ctrl+C so the loops can finish their in-flight
/// work instead of being killed mid-send.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

/// Print status strings from the loops as they arrive.
fn print_status(mut status_rx: mpsc::UnboundedReceiver<String>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = status_rx.recv().await {
            println!("{}", line);
        }
    })
}

async fn run_stream(url: String, source: SourceKind, sample_ms: u64, send_ms: u64) {
    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let printer = print_status(status_rx);
    cancel_on_ctrl_c(cancel.clone());

    println!("Broadcasting to {} (Ctrl+C to stop)", url);

    let options = ProducerOptions {
        url,
        sample_period: Duration::from_millis(sample_ms),
        send_period: Duration::from_millis(send_ms),
        keepalive: DEFAULT_KEEPALIVE,
        queue_capacity: 1,
    };
    let preview: Arc<dyn Renderer> = Arc::new(FrameStats::new("sent"));

    stream::run_broadcast(options, source.factory(), Some(preview), cancel, status_tx).await;
    printer.abort();
}

async fn run_view(url: String, save: Option<PathBuf>) {
    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let printer = print_status(status_rx);
    cancel_on_ctrl_c(cancel.clone());

    println!("Viewing {} (Ctrl+C to stop)", url);

    let renderer: Arc<dyn Renderer> = match save {
        Some(path) => Arc::new(FrameFile::new(path)),
        None => Arc::new(FrameStats::new("received")),
    };

    stream::run_view(url, DEFAULT_KEEPALIVE, renderer, cancel, status_tx).await;
    printer.abort();
}
