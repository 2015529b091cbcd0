use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use portal_protocol::simulate::SimulationRates;
use serde::Deserialize;

/// Command line options for the chat server.
#[derive(Parser, Debug, Default)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Force the demo presence simulator on.
    #[arg(long)]
    pub demo: bool,
}

/// Timing of the authoritative presence registry.
#[derive(Clone, Debug)]
pub struct PresenceSettings {
    /// A user without a heartbeat for this long is dropped by the sweeper.
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    /// Grace period between `user_offline` and the user disappearing.
    pub offline_debounce: Duration,
    pub typing_debounce: Duration,
}

#[derive(Clone, Debug)]
pub struct HistorySettings {
    pub capacity: usize,
    /// Newest messages included in a stream's `init`; older ones are paged
    /// through `/api/chat/history`.
    pub init_page: usize,
    /// Posted by the system user when the server starts.
    pub welcome: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DemoSettings {
    pub enabled: bool,
    pub tick: Duration,
    pub rates: SimulationRates,
    pub members: Vec<String>,
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Longest accepted message, in characters.
    pub max_message_len: usize,
    pub presence: PresenceSettings,
    pub history: HistorySettings,
    pub demo: DemoSettings,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    presence: FilePresence,
    #[serde(default)]
    history: FileHistory,
    #[serde(default)]
    demo: FileDemo,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_max_message_len")]
    max_message_len: usize,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FilePresence {
    heartbeat_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    offline_debounce_ms: Option<u64>,
    typing_debounce_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FileHistory {
    capacity: Option<usize>,
    init_page: Option<usize>,
    welcome: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileDemo {
    #[serde(default)]
    enabled: bool,
    tick_secs: Option<u64>,
    flip_probability: Option<f64>,
    typing_probability: Option<f64>,
    members: Option<Vec<String>>,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_max_message_len() -> usize {
    2000
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_message_len: default_max_message_len(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(15),
            offline_debounce: Duration::from_millis(1000),
            typing_debounce: Duration::from_millis(2000),
        }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: 500,
            init_page: 50,
            welcome: Some("Welcome to the community chat!".into()),
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            tick: Duration::from_secs(15),
            rates: SimulationRates::default(),
            members: ["MovieBuff", "SeriesFan", "CinemaLover", "PopcornKing"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", default_port()),
            logging_enabled: default_logging(),
            max_message_len: default_max_message_len(),
            presence: PresenceSettings::default(),
            history: HistorySettings::default(),
            demo: DemoSettings::default(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Config::default();
        let mut port = default_port();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("PORTAL_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/portal.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            cfg.max_message_len = file_cfg.server.max_message_len;
            cfg.logging_enabled = file_cfg.logging.enabled;
            file_cfg.presence.apply(&mut cfg.presence);
            file_cfg.history.apply(&mut cfg.history);
            file_cfg.demo.apply(&mut cfg.demo);
        }

        // environment overrides
        if let Ok(p) = std::env::var("PORTAL_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("PORTAL_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                cfg.logging_enabled = l;
            }
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            cfg.logging_enabled = l;
        }
        if cli.demo {
            cfg.demo.enabled = true;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if cfg.history.capacity == 0 {
            anyhow::bail!("invalid_history_capacity");
        }
        if cfg.history.init_page == 0 {
            anyhow::bail!("invalid_init_page");
        }
        let rates = cfg.demo.rates;
        if ![rates.flip, rates.typing]
            .iter()
            .all(|p| (0.0..=1.0).contains(p))
        {
            anyhow::bail!("invalid_probability");
        }

        cfg.bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };
        Ok(cfg)
    }
}

impl FilePresence {
    fn apply(self, s: &mut PresenceSettings) {
        if let Some(v) = self.heartbeat_timeout_secs {
            s.heartbeat_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.sweep_interval_secs {
            s.sweep_interval = Duration::from_secs(v.max(1));
        }
        if let Some(v) = self.offline_debounce_ms {
            s.offline_debounce = Duration::from_millis(v);
        }
        if let Some(v) = self.typing_debounce_ms {
            s.typing_debounce = Duration::from_millis(v);
        }
    }
}

impl FileHistory {
    fn apply(self, s: &mut HistorySettings) {
        if let Some(c) = self.capacity {
            s.capacity = c;
        }
        if let Some(p) = self.init_page {
            s.init_page = p;
        }
        if let Some(w) = self.welcome {
            s.welcome = if w.trim().is_empty() { None } else { Some(w) };
        }
    }
}

impl FileDemo {
    fn apply(self, s: &mut DemoSettings) {
        s.enabled = self.enabled;
        if let Some(t) = self.tick_secs {
            s.tick = Duration::from_secs(t.max(1));
        }
        if let Some(p) = self.flip_probability {
            s.rates.flip = p;
        }
        if let Some(p) = self.typing_probability {
            s.rates.typing = p;
        }
        if let Some(m) = self.members {
            s.members = m;
        }
    }
}
