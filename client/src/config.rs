use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::{
    chat::ChatSettings, cli::Cli, media::MediaConfig, session::SessionStore,
    supervisor::ReconnectPolicy,
};

/// Client configuration resolved from CLI, environment, file and defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub media: MediaConfig,
    pub chat: ChatSettings,
    pub session_path: PathBuf,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    media: FileMedia,
    #[serde(default)]
    chat: FileChat,
    #[serde(default)]
    session: FileSession,
}

#[derive(Deserialize, Default)]
struct FileServer {
    url: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileMedia {
    url: Option<String>,
    device_id: Option<String>,
    fallback_to_mock: Option<bool>,
}

#[derive(Deserialize, Default)]
struct FileChat {
    heartbeat_secs: Option<u64>,
    reconnect_initial_secs: Option<u64>,
    reconnect_max_secs: Option<u64>,
    /// 0 retries forever.
    max_attempts: Option<u32>,
    history_capacity: Option<usize>,
}

#[derive(Deserialize, Default)]
struct FileSession {
    path: Option<PathBuf>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8787".into()
}

fn default_media_url() -> String {
    "http://127.0.0.1:8096".into()
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "portal", "portal").map(|p| p.config_dir().join("portal.toml"))
}

impl ClientConfig {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("PORTAL_CLIENT_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        let file_cfg = match config_path.as_ref().and_then(|p| fs::read(p).ok()) {
            Some(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            None => FileConfig::default(),
        };

        let mut server_url = file_cfg.server.url.unwrap_or_else(default_server_url);
        let mut media = MediaConfig::new(file_cfg.media.url.unwrap_or_else(default_media_url));
        if let Some(id) = file_cfg.media.device_id {
            media.device_id = id;
        }
        if let Some(f) = file_cfg.media.fallback_to_mock {
            media.fallback_to_mock = f;
        }
        let chat = file_cfg.chat.into_settings()?;
        let session_path = match file_cfg.session.path {
            Some(p) => p,
            None => SessionStore::default_path()?,
        };

        // environment overrides
        if let Ok(url) = std::env::var("PORTAL_SERVER_URL") {
            server_url = url;
        }
        if let Ok(url) = std::env::var("PORTAL_MEDIA_URL") {
            media.base_url = url;
        }
        if let Ok(key) = std::env::var("PORTAL_MEDIA_API_KEY") {
            if !key.is_empty() {
                media.api_key = Some(key);
            }
        }

        // CLI overrides
        if let Some(url) = &cli.server {
            server_url = url.clone();
        }

        for url in [&server_url, &media.base_url] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("invalid_url: {url}");
            }
        }

        Ok(Self {
            server_url,
            media,
            chat,
            session_path,
        })
    }
}

impl FileChat {
    fn into_settings(self) -> Result<ChatSettings> {
        let mut s = ChatSettings::default();
        if let Some(v) = self.heartbeat_secs {
            s.heartbeat = Duration::from_secs(v.max(1));
        }
        let mut policy: ReconnectPolicy = s.reconnect;
        if let Some(v) = self.reconnect_initial_secs {
            policy.initial = Duration::from_secs(v);
        }
        if let Some(v) = self.reconnect_max_secs {
            policy.max = Duration::from_secs(v);
        }
        if let Some(v) = self.max_attempts {
            policy.max_attempts = (v > 0).then_some(v);
        }
        if policy.initial > policy.max {
            anyhow::bail!("invalid_reconnect_delay");
        }
        s.reconnect = policy;
        if let Some(c) = self.history_capacity {
            if c == 0 {
                anyhow::bail!("invalid_history_capacity");
            }
            s.history_capacity = c;
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "PORTAL_CLIENT_CONFIG",
            "PORTAL_SERVER_URL",
            "PORTAL_MEDIA_URL",
            "PORTAL_MEDIA_API_KEY",
        ] {
            std::env::remove_var(key);
        }
    }

    fn write(contents: &str) -> (tempfile::TempDir, Cli) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        (dir, cli)
    }

    #[test]
    #[serial]
    fn file_values_apply() {
        clear_env();
        let (dir, cli) = write(&format!(
            "[server]\nurl=\"http://chat.local:9000\"\n[media]\nfallback_to_mock=false\n\
             [chat]\nreconnect_initial_secs=1\nmax_attempts=0\nhistory_capacity=20\n\
             [session]\npath=\"{}\"\n",
            "/tmp/portal-session.json"
        ));
        let cfg = ClientConfig::load(&cli).unwrap();
        assert_eq!(cfg.server_url, "http://chat.local:9000");
        assert!(!cfg.media.fallback_to_mock);
        assert_eq!(cfg.chat.reconnect.initial, Duration::from_secs(1));
        assert_eq!(cfg.chat.reconnect.max_attempts, None);
        assert_eq!(cfg.chat.history_capacity, 20);
        assert_eq!(cfg.session_path, PathBuf::from("/tmp/portal-session.json"));
        drop(dir);
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut cli) = write("[server]\nurl=\"http://file:1\"\n[session]\npath=\"s.json\"\n");
        std::env::set_var("PORTAL_SERVER_URL", "http://env:2");
        std::env::set_var("PORTAL_MEDIA_API_KEY", "k3y");
        let cfg = ClientConfig::load(&cli).unwrap();
        assert_eq!(cfg.server_url, "http://env:2");
        assert_eq!(cfg.media.api_key.as_deref(), Some("k3y"));
        cli.server = Some("http://cli:3".into());
        assert_eq!(ClientConfig::load(&cli).unwrap().server_url, "http://cli:3");
        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_values_fail() {
        clear_env();
        let (_dir, cli) = write("[server]\nurl=\"chat.local\"\n[session]\npath=\"s.json\"\n");
        assert!(ClientConfig::load(&cli).is_err());
        let (_dir, cli) =
            write("[chat]\nreconnect_initial_secs=90\nreconnect_max_secs=60\n[session]\npath=\"s.json\"\n");
        assert!(ClientConfig::load(&cli).is_err());
    }
}
