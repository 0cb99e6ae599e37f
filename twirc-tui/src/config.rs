//! Configuration for twirc.
//!
//! Config file lives at `<config_dir>/twirc/config.toml`. Every field is
//! optional; command-line flags win over the file, the file wins over
//! the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use twirc_sdk::ConnectConfig;

pub const DEFAULT_SERVER: &str = "irc.chat.twitch.tv";
pub const DEFAULT_PORT: u16 = 6667;
/// Anonymous read-only login.
pub const ANONYMOUS_USER: &str = "justinfan3141592653";
pub const ANONYMOUS_PASSWORD: &str = "blah";
pub const DEFAULT_CAPS: &str = "twitch.tv/tags twitch.tv/commands twitch.tv/membership";
pub const DEFAULT_PLUGINS: &[&str] = &["ping", "log", "say"];
pub const DEFAULT_LOG_FILE: &str = "twirc.log";

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "twirc", about = "Terminal chat client for IRC and Twitch chat")]
pub struct Cli {
    /// Channels to join ('#' is optional)
    pub channels: Vec<String>,

    /// Server host
    #[arg(long)]
    pub server: Option<String>,

    /// Server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Nickname (also the login name)
    #[arg(long)]
    pub nick: Option<String>,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// User configuration (config.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: Option<String>,
    pub port: Option<u16>,
    /// Login name; setting it means we are logged in.
    pub username: Option<String>,
    /// For Twitch, `oauth:<token>`.
    pub password: Option<String>,
    pub caps: Option<String>,
    pub channels: Option<Vec<String>>,
    /// Plugins loaded at startup, in order.
    pub plugins: Option<Vec<String>>,
    pub log_file: Option<PathBuf>,
    pub reconnect_threshold_secs: Option<u64>,
    pub reconnect_base_delay_secs: Option<u64>,
    pub ping_every_secs: Option<u64>,
    pub ping_timeout_secs: Option<u64>,
    pub repost_delay_ms: Option<u64>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twirc")
        .join("config.toml")
}

impl Config {
    /// Read `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Effective settings after merging CLI > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub caps: Option<String>,
    /// Without the leading '#'.
    pub channels: Vec<String>,
    pub plugins: Vec<String>,
    pub log_file: PathBuf,
    pub logged_in: bool,
    pub reconnect_threshold: Duration,
    pub reconnect_base_delay: Duration,
    pub ping_every: Duration,
    pub ping_timeout: Duration,
    pub repost_delay: Duration,
}

impl Resolved {
    pub fn merge(cli: &Cli, config: &Config) -> Self {
        let username = cli.nick.clone().or_else(|| config.username.clone());
        let logged_in = username.is_some();
        let (username, password) = match username {
            Some(name) => (name, config.password.clone()),
            None => (
                ANONYMOUS_USER.to_string(),
                Some(ANONYMOUS_PASSWORD.to_string()),
            ),
        };

        let channels = if cli.channels.is_empty() {
            config.channels.clone().unwrap_or_default()
        } else {
            cli.channels.clone()
        };
        let channels = channels
            .iter()
            .map(|c| c.trim().trim_start_matches('#').to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let plugins = config
            .plugins
            .clone()
            .unwrap_or_else(|| DEFAULT_PLUGINS.iter().map(|p| p.to_string()).collect());

        let secs = |value: Option<u64>, default: u64| Duration::from_secs(value.unwrap_or(default));

        Self {
            server: cli
                .server
                .clone()
                .or_else(|| config.server.clone())
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            port: cli.port.or(config.port).unwrap_or(DEFAULT_PORT),
            username,
            password,
            caps: Some(config.caps.clone().unwrap_or_else(|| DEFAULT_CAPS.to_string()))
                .filter(|caps| !caps.trim().is_empty()),
            channels,
            plugins,
            log_file: config
                .log_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            logged_in,
            reconnect_threshold: secs(config.reconnect_threshold_secs, 60),
            reconnect_base_delay: secs(config.reconnect_base_delay_secs, 2),
            ping_every: secs(config.ping_every_secs, 300),
            ping_timeout: secs(config.ping_timeout_secs, 10),
            repost_delay: Duration::from_millis(config.repost_delay_ms.unwrap_or(1500)),
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server: self.server.clone(),
            port: self.port,
            nick: self.username.clone(),
            password: self.password.clone(),
            caps: self.caps.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_anonymous() {
        let resolved = Resolved::merge(&Cli::default(), &Config::default());
        assert_eq!(resolved.server, DEFAULT_SERVER);
        assert_eq!(resolved.port, 6667);
        assert_eq!(resolved.username, ANONYMOUS_USER);
        assert_eq!(resolved.password.as_deref(), Some("blah"));
        assert!(!resolved.logged_in);
        assert_eq!(resolved.plugins, vec!["ping", "log", "say"]);
        assert_eq!(resolved.reconnect_threshold, Duration::from_secs(60));
        assert_eq!(resolved.ping_timeout, Duration::from_secs(10));
    }

    #[test]
    fn cli_beats_file() {
        let config: Config = toml::from_str(
            r##"
            server = "irc.example.org"
            port = 6697
            username = "filebot"
            password = "oauth:abc"
            channels = ["#rust", "tokio"]
            "##,
        )
        .unwrap();
        let cli = Cli {
            channels: vec!["#mine".into()],
            port: Some(7000),
            ..Default::default()
        };

        let resolved = Resolved::merge(&cli, &config);
        assert_eq!(resolved.server, "irc.example.org");
        assert_eq!(resolved.port, 7000);
        assert_eq!(resolved.username, "filebot");
        assert_eq!(resolved.password.as_deref(), Some("oauth:abc"));
        assert!(resolved.logged_in);
        assert_eq!(resolved.channels, vec!["mine"]);

        let resolved = Resolved::merge(&Cli::default(), &config);
        assert_eq!(resolved.channels, vec!["rust", "tokio"]);
    }

    #[test]
    fn empty_caps_means_no_request() {
        let config = Config {
            caps: Some(String::new()),
            ..Default::default()
        };
        let resolved = Resolved::merge(&Cli::default(), &config);
        assert_eq!(resolved.connect_config().caps, None);
    }

    #[test]
    fn missing_file_is_empty_config() {
        let config = Config::load(Path::new("/nonexistent/twirc/config.toml")).unwrap();
        assert!(config.server.is_none());
    }
}
