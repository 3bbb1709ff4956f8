use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "tripsync", about = "Shared trips, itineraries and outfits")]
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
    /// Directory holding the database, objects and token secret.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Print a bearer token for a user, carrying their current event claims.
    Token {
        #[arg(long)]
        uid: String,
        /// Validity in hours.
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base directory for the database, objects and generated secrets.
    pub data_dir: PathBuf,
    /// Origin used in invite links and object URLs.
    pub public_origin: String,
    /// Maximum upload size in megabytes.
    pub max_upload_mb: u64,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Base64 token signing secret; generated under `data_dir` when unset.
    pub jwt_secret: Option<String>,
    /// Whether accepting an invite consumes it.
    pub single_use_invites: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("public_origin", &self.public_origin)
            .field("max_upload_mb", &self.max_upload_mb)
            .field("logging_enabled", &self.logging_enabled)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("single_use_invites", &self.single_use_invites)
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
    #[serde(default)]
    invites: FileInvites,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    public_origin: Option<String>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    max_upload_mb: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    #[serde(default)]
    jwt_secret: Option<String>,
}

#[derive(Deserialize)]
struct FileInvites {
    #[serde(default = "default_single_use")]
    single_use: bool,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_single_use() -> bool {
    true
}

const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_origin: None,
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

impl Default for FileInvites {
    fn default() -> Self {
        Self {
            single_use: default_single_use(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("TRIPSYNC_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/tripsync.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut data_dir = file_cfg.storage.data_dir;
        let mut max_upload_mb = file_cfg
            .storage
            .max_upload_mb
            .unwrap_or(DEFAULT_MAX_UPLOAD_MB);
        let mut public_origin = file_cfg.server.public_origin;
        let mut jwt_secret = file_cfg.auth.jwt_secret;
        let mut single_use_invites = file_cfg.invites.single_use;

        // environment overrides
        if let Some(p) = env_parsed("TRIPSYNC_PORT") {
            port = p;
        }
        if let Some(l) = env_parsed("TRIPSYNC_LOGGING") {
            logging = l;
        }
        if let Ok(d) = std::env::var("TRIPSYNC_DATA_DIR") {
            data_dir = Some(PathBuf::from(d));
        }
        if let Some(m) = env_parsed("TRIPSYNC_MAX_UPLOAD_MB") {
            max_upload_mb = m;
        }
        if let Ok(o) = std::env::var("TRIPSYNC_PUBLIC_ORIGIN") {
            public_origin = Some(o);
        }
        if let Ok(s) = std::env::var("TRIPSYNC_JWT_SECRET") {
            jwt_secret = Some(s);
        }
        if let Some(s) = env_parsed("TRIPSYNC_SINGLE_USE_INVITES") {
            single_use_invites = s;
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

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if max_upload_mb == 0 {
            anyhow::bail!("invalid_max_upload_mb");
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("TRIPSYNC_BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };
        let public_origin = public_origin
            .unwrap_or_else(|| format!("http://{bind}"))
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&public_origin).context("invalid public origin")?;

        Ok(Self {
            bind,
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            public_origin,
            max_upload_mb,
            logging_enabled: logging,
            jwt_secret,
            single_use_invites,
        })
    }

    /// Helper to return the upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tripsync.db")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/tripsync");
        p
    } else {
        PathBuf::from("./tripsync_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    const VARS: &[&str] = &[
        "TRIPSYNC_PORT",
        "TRIPSYNC_LOGGING",
        "TRIPSYNC_DATA_DIR",
        "TRIPSYNC_MAX_UPLOAD_MB",
        "TRIPSYNC_PUBLIC_ORIGIN",
        "TRIPSYNC_JWT_SECRET",
        "TRIPSYNC_SINGLE_USE_INVITES",
        "TRIPSYNC_BIND",
        "TRIPSYNC_CONFIG",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn cli_with(contents: &str) -> (tempfile::TempDir, Cli) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        (dir, cli)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let (_dir, cli) = cli_with(
            "[server]\nport=5555\npublic_origin=\"https://fitlist.app/\"\n\
             [logging]\nenabled=false\n[storage]\ndata_dir=\"/srv/tripsync\"\nmax_upload_mb=3\n\
             [invites]\nsingle_use=false\n",
        );
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert_eq!(cfg.public_origin, "https://fitlist.app");
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/tripsync"));
        assert_eq!(cfg.max_upload_bytes(), 3 * 1024 * 1024);
        assert!(!cfg.logging_enabled);
        assert!(!cfg.single_use_invites);
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        let (_dir, cli) = cli_with("[server]\nport=80\n");
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let (_dir, cli) = cli_with("");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8787");
        assert_eq!(cfg.public_origin, "http://127.0.0.1:8787");
        assert_eq!(cfg.max_upload_mb, DEFAULT_MAX_UPLOAD_MB);
        assert!(cfg.logging_enabled);
        assert!(cfg.single_use_invites);
        assert!(cfg.jwt_secret.is_none());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut cli) = cli_with("[server]\nport=1111\n[invites]\nsingle_use=true\n");
        std::env::set_var("TRIPSYNC_PORT", "2222");
        std::env::set_var("TRIPSYNC_SINGLE_USE_INVITES", "false");
        cli.port = Some(3333);
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        assert!(!cfg.single_use_invites);
        clear_env();
    }

    #[test]
    #[serial]
    fn env_beats_file() {
        clear_env();
        let (_dir, cli) = cli_with("[storage]\ndata_dir=\"/from/file\"\n");
        std::env::set_var("TRIPSYNC_DATA_DIR", "/from/env");
        std::env::set_var("TRIPSYNC_JWT_SECRET", "c2VjcmV0");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/from/env"));
        assert!(!format!("{cfg:?}").contains("c2VjcmV0"));
        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_file_is_an_error() {
        clear_env();
        let (_dir, cli) = cli_with("[server\nport=");
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    fn token_subcommand_parses() {
        let cli = Cli::parse_from(["tripsync", "--port", "9000", "token", "--uid", "u1"]);
        assert_eq!(cli.port, Some(9000));
        assert_eq!(
            cli.command,
            Some(Command::Token {
                uid: "u1".into(),
                hours: 24
            })
        );
    }
}
