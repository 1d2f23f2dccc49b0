use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use sync_core::ConflictPolicy;

/// Command-line entrypoint for the agent. Flags override the persisted
/// settings file; the settings file persists across restarts.
#[derive(Parser, Debug, Clone)]
#[command(name = "sync-agent")]
#[command(about = "Bidirectional file synchronization agent")]
pub struct Cli {
    /// Path to the settings JSON file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Raise the log filter to debug.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Persisted settings, per the external settings-file contract. Loaded from
/// and saved to the per-OS user configuration directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub server_url: String,
    pub server_port: u16,
    pub username: String,
    pub auto_start_sync: bool,
    pub sync_interval: u64,
    pub max_concurrent_transfers: usize,
    pub bandwidth_limit_mbps: u32,
    pub conflict_resolution: ConflictPolicy,
    pub theme: String,
    pub enable_debug_logging: bool,
    pub chunk_size_mb: u32,
    pub device_id: String,
    pub device_name: String,
    pub device_registered: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost".to_string(),
            server_port: 8000,
            username: String::new(),
            auto_start_sync: true,
            sync_interval: 60,
            max_concurrent_transfers: 4,
            bandwidth_limit_mbps: 0,
            conflict_resolution: ConflictPolicy::Ask,
            theme: "dark".to_string(),
            enable_debug_logging: false,
            chunk_size_mb: 10,
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-device".to_string()),
            device_registered: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults (persisted
    /// immediately) when the file is absent.
    pub fn load_or_default(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let settings = Settings::default();
            settings.save(path)?;
            return Ok(settings);
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// The per-OS user configuration directory for the agent's settings and
    /// database files.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sync-agent")
    }
}
