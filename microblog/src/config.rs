use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use directories::ProjectDirs;
use rand::RngCore;
use serde::Deserialize;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
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
    /// Directory holding the database file.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Directory holding `microblog.db`.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// HS256 key used to verify bearer tokens.
    pub jwt_secret: Vec<u8>,
    /// True when no secret was configured and one was generated for this process.
    pub ephemeral_secret: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("logging_enabled", &self.logging_enabled)
            .field("jwt_secret", &"<redacted>")
            .field("ephemeral_secret", &self.ephemeral_secret)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    auth: FileAuth,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    jwt_secret: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_logging() -> bool {
    true
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
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

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut port = default_port();
        let mut logging = default_logging();
        let mut data_dir: Option<PathBuf> = None;
        let mut secret: Option<String> = None;

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("MICROBLOG_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/microblog.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            logging = file_cfg.logging.enabled;
            data_dir = file_cfg.storage.data_dir;
            secret = file_cfg.auth.jwt_secret;
        }

        // environment overrides
        if let Ok(p) = std::env::var("MICROBLOG_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("MICROBLOG_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(d) = std::env::var("DATA_DIR") {
            data_dir = Some(PathBuf::from(d));
        }
        if let Ok(s) = std::env::var("MICROBLOG_JWT_SECRET") {
            secret = Some(s);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(d) = &cli.data_dir {
            data_dir = Some(d.clone());
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let ephemeral_secret = secret.is_none();
        let jwt_secret = match secret {
            Some(s) => STANDARD
                .decode(s.trim())
                .context("jwt secret must be base64")?,
            None => {
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };
        if jwt_secret.is_empty() {
            anyhow::bail!("empty_jwt_secret");
        }

        Ok(Self {
            bind,
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            logging_enabled: logging,
            jwt_secret,
            ephemeral_secret,
        })
    }

    /// Location of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("microblog.db")
    }
}

/// Determine the default data directory for the server.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("org", "microblog", "microblog")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./microblog_data"))
}
