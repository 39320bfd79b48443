use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::protocol::DEFAULT_URL;
use crate::source::SourceKind;

#[derive(Parser)]
#[command(name = "framecast")]
#[command(about = "Screen frame streaming over WebSocket", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broadcast relay server
    Relay {
        /// Address to bind to
        #[arg(short, long)]
        addr: Option<String>,

        /// Send a client's own frames back to it
        #[arg(long)]
        echo: bool,

        /// JSON config file (flags override its values)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Capture frames and broadcast them through the relay
    Stream {
        /// Relay endpoint
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,

        /// What to capture
        #[arg(short, long, value_enum, default_value_t = SourceKind::Screen)]
        source: SourceKind,

        /// Capture sampling period in milliseconds
        #[arg(long, default_value_t = 33)]
        sample_ms: u64,

        /// Transmission pacing period in milliseconds
        #[arg(long, default_value_t = 100)]
        send_ms: u64,
    },

    /// Receive broadcast frames from the relay
    View {
        /// Relay endpoint
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,

        /// Keep the latest frame written to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
