use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/speedstream/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port the proxy listens on.
    pub port: u16,
    /// First segment size handed to a worker; the ramp-up starts here.
    pub min_segment_bytes: u64,
    /// Cap on the adaptively doubling segment size.
    pub max_segment_bytes: u64,
    /// Number of concurrent segment workers per accelerated transfer.
    pub workers: usize,
    /// Capacity of the sliding-window buffer.
    pub buffer_bytes: usize,
    /// Directory to tee accelerated downloads into (None = no tee).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 9050,
            min_segment_bytes: 200_000,
            max_segment_bytes: 1_000_000,
            workers: 4,
            buffer_bytes: 6_000_000,
            output_dir: None,
        }
    }
}

impl ProxyConfig {
    /// Sanity-checks the tuning values. The segment cap must fit inside the
    /// window with room to spare: the worker holding the oldest unread
    /// segment must never be able to block on its own window, or the
    /// reader's gap could stop filling.
    pub fn validate(&self) -> Result<()> {
        if self.min_segment_bytes == 0 || self.workers == 0 || self.buffer_bytes == 0 {
            anyhow::bail!("min_segment_bytes, workers and buffer_bytes must all be non-zero");
        }
        if self.min_segment_bytes > self.max_segment_bytes {
            anyhow::bail!(
                "min_segment_bytes ({}) exceeds max_segment_bytes ({})",
                self.min_segment_bytes,
                self.max_segment_bytes
            );
        }
        if self.max_segment_bytes >= self.buffer_bytes as u64 {
            anyhow::bail!(
                "max_segment_bytes ({}) must be smaller than buffer_bytes ({})",
                self.max_segment_bytes,
                self.buffer_bytes
            );
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("speedstream")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ProxyConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ProxyConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ProxyConfig = toml::from_str(&data)?;
    Ok(cfg)
}
