use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use speedstream_core::config::{self, ProxyConfig};
use speedstream_core::proxy;

/// speedstream: an HTTP-accelerating forward proxy. Large GET responses are
/// re-fetched as concurrent byte-range segments and streamed back to the
/// client as one ordinary body.
#[derive(Debug, Parser)]
#[command(name = "speedstream")]
#[command(about = "HTTP-accelerating forward proxy", long_about = None)]
pub struct Cli {
    /// Listening port (overrides the config file).
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Initial (minimum) segment size in bytes.
    #[arg(long)]
    min_seg: Option<u64>,

    /// Maximum segment size in bytes.
    #[arg(long)]
    max_seg: Option<u64>,

    /// Number of concurrent download workers per transfer.
    #[arg(long)]
    threads: Option<usize>,

    /// Sliding-window buffer capacity in bytes.
    #[arg(long)]
    buffer: Option<usize>,

    /// Directory to tee accelerated downloads into.
    #[arg(long)]
    outdir: Option<PathBuf>,
}

impl Cli {
    /// Config file values overlaid with any flags given on the command line.
    fn apply(&self, mut cfg: ProxyConfig) -> ProxyConfig {
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(min_seg) = self.min_seg {
            cfg.min_segment_bytes = min_seg;
        }
        if let Some(max_seg) = self.max_seg {
            cfg.max_segment_bytes = max_seg;
        }
        if let Some(threads) = self.threads {
            cfg.workers = threads;
        }
        if let Some(buffer) = self.buffer {
            cfg.buffer_bytes = buffer;
        }
        if let Some(outdir) = &self.outdir {
            cfg.output_dir = Some(outdir.clone());
        }
        cfg
    }
}

pub fn run_from_args() -> Result<()> {
    let cli = Cli::parse();
    let cfg = cli.apply(config::load_or_init()?);
    tracing::debug!("effective config: {:?}", cfg);
    proxy::serve(&cfg)
}
