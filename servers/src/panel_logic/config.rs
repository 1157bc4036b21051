use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "PanelStream security-event broadcast server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PANEL_PORT", help = "Port to listen on for viewer connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "PANEL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PANEL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PANEL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PANEL_UPSTREAM_URL", help = "Upstream security-event stream URL.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "PANEL_API_TOKEN", help = "Bearer token for the upstream event API.")]
    pub api_token: Option<String>,

    #[clap(long, env = "PANEL_SYSTEM_ID", help = "Identifier of the security system to stream events for.")]
    pub system_id: Option<String>,

    #[clap(long, env = "PANEL_DATABASE_URL", help = "PostgreSQL URL for the event store. Persistence is disabled when unset.")]
    pub database_url: Option<String>,

    #[clap(long, env = "PANEL_RECONNECT_FLOOR_SECONDS", help = "Initial delay in seconds between upstream reconnect attempts.")]
    pub reconnect_floor_seconds: Option<u64>,

    #[clap(long, env = "PANEL_RECONNECT_CEILING_SECONDS", help = "Maximum delay in seconds between upstream reconnect attempts.")]
    pub reconnect_ceiling_seconds: Option<u64>,

    #[clap(long, env = "PANEL_HEARTBEAT_SECONDS", help = "Interval in seconds between heartbeat frames to idle viewers.")]
    pub heartbeat_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            upstream_url: other.upstream_url.or(self.upstream_url),
            api_token: other.api_token.or(self.api_token),
            system_id: other.system_id.or(self.system_id),
            database_url: other.database_url.or(self.database_url),
            reconnect_floor_seconds: other.reconnect_floor_seconds.or(self.reconnect_floor_seconds),
            reconnect_ceiling_seconds: other
                .reconnect_ceiling_seconds
                .or(self.reconnect_ceiling_seconds),
            heartbeat_seconds: other.heartbeat_seconds.or(self.heartbeat_seconds),
        }
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        port: Some(9010),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        reconnect_floor_seconds: Some(5),
        reconnect_ceiling_seconds: Some(60),
        heartbeat_seconds: Some(30),
        ..Default::default()
    };

    // 2. Load from config file (server_panel.conf) if present.
    //    Allow overriding default config file path with CLI arg.
    let cli_args_for_path = Config::parse();

    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_panel.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Override with environment variables and CLI arguments.
    //    clap::Parser handles env vars and CLI args in one pass.
    current_config.merge(cli_args_for_path)
}
