//! Command-line and file configuration for both binaries.

use crate::error::{Error, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Hard upper bound on mining threads.
pub const MAX_WORKERS: usize = 256;

/// Optional server config file looked up in the working directory.
pub const SERVER_CONFIG_FILE: &str = "webcashd.conf";

/// Command-line arguments of the mining client.
#[derive(Parser, Debug)]
#[command(name = "webminer", about = "Webcash mining daemon", version)]
pub struct MinerArgs {
    /// Number of mining threads to spawn (0 = hardware concurrency)
    #[arg(long, default_value_t = 0)]
    pub workers: u32,

    /// Server endpoint
    #[arg(long, default_value = "https://webcash.tech")]
    pub server: String,

    /// Base filename of wallet files
    #[arg(long, default_value = "default_wallet")]
    pub walletfile: PathBuf,

    /// Filename to place generated webcash claim codes
    #[arg(long, default_value = "webcash.log")]
    pub webcashlog: PathBuf,

    /// Filename to place solved proof-of-works the server rejects, and
    /// their associated webcash claim codes
    #[arg(long, default_value = "orphans.log")]
    pub orphanlog: PathBuf,

    /// Disable mining above this difficulty
    #[arg(long, default_value_t = 80)]
    pub maxdifficulty: u32,

    /// Auto-accept initial or updated terms of service
    #[arg(long)]
    pub acceptterms: bool,

    /// Level at which log messages are written to the console
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl MinerArgs {
    /// Resolve the effective worker count: explicit value capped at
    /// [`MAX_WORKERS`], or hardware concurrency when zero.
    pub fn worker_count(&self) -> Result<usize> {
        if self.workers as usize > MAX_WORKERS {
            return Err(Error::config(format!(
                "--workers cannot be larger than {MAX_WORKERS}"
            )));
        }
        if self.workers > 0 {
            return Ok(self.workers as usize);
        }
        Ok(num_cpus::get().clamp(1, MAX_WORKERS))
    }
}

/// Command-line arguments of the ledger server.  Every value left unset
/// falls back to `webcashd.conf` and then to the built-in default.
#[derive(Parser, Debug)]
#[command(name = "webcashd", about = "Webcash server process", version)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Ledger database file (or sqlite: URL)
    #[arg(long)]
    pub database: Option<String>,

    /// Address to bind
    #[arg(long)]
    pub listen: Option<String>,

    /// Level at which log messages are written to the console
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// `webcashd.conf` contents (JSON).
#[derive(Debug, Default, Deserialize)]
struct ServerConfigFile {
    port: Option<u16>,
    database: Option<String>,
    listen: Option<String>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Ledger database file or sqlite: URL.
    pub database: String,
    /// Address to bind.
    pub listen: String,
}

impl ServerConfig {
    /// Merge flags over the optional config file over built-in defaults.
    pub fn resolve(args: &ServerArgs, config_dir: &Path) -> Result<ServerConfig> {
        let path = config_dir.join(SERVER_CONFIG_FILE);
        let from_file = if path.exists() {
            serde_json::from_str::<ServerConfigFile>(&std::fs::read_to_string(&path)?)
                .map_err(|err| Error::config(format!("{}: {err}", path.display())))?
        } else {
            ServerConfigFile::default()
        };

        Ok(ServerConfig {
            port: args.port.or(from_file.port).unwrap_or(8000),
            database: args
                .database
                .clone()
                .or(from_file.database)
                .unwrap_or_else(|| "webcashd.db".to_owned()),
            listen: args
                .listen
                .clone()
                .or(from_file.listen)
                .unwrap_or_else(|| "127.0.0.1".to_owned()),
        })
    }

    /// The socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen, self.port)
            .parse()
            .map_err(|err| Error::config(format!("invalid listen address: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_miner_args_defaults() {
        let args = MinerArgs::try_parse_from(["webminer"]).unwrap();
        assert_eq!(args.workers, 0);
        assert_eq!(args.server, "https://webcash.tech");
        assert_eq!(args.walletfile, PathBuf::from("default_wallet"));
        assert_eq!(args.webcashlog, PathBuf::from("webcash.log"));
        assert_eq!(args.orphanlog, PathBuf::from("orphans.log"));
        assert_eq!(args.maxdifficulty, 80);
        assert!(!args.acceptterms);
    }

    #[test]
    fn test_worker_count_bounds() {
        let args = MinerArgs::try_parse_from(["webminer", "--workers", "8"]).unwrap();
        assert_eq!(args.worker_count().unwrap(), 8);

        let args = MinerArgs::try_parse_from(["webminer", "--workers", "257"]).unwrap();
        assert!(args.worker_count().is_err());

        let args = MinerArgs::try_parse_from(["webminer"]).unwrap();
        let auto = args.worker_count().unwrap();
        assert!((1..=MAX_WORKERS).contains(&auto));
    }

    #[test]
    fn test_server_config_defaults() {
        let dir = tempdir().unwrap();
        let args = ServerArgs::try_parse_from(["webcashd"]).unwrap();
        let config = ServerConfig::resolve(&args, dir.path()).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.database, "webcashd.db");
        assert_eq!(config.listen, "127.0.0.1");
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:8000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_server_config_file_and_flag_precedence() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SERVER_CONFIG_FILE),
            r#"{"port": 9000, "database": "ledger.db"}"#,
        )
        .unwrap();

        // File values override built-in defaults.
        let args = ServerArgs::try_parse_from(["webcashd"]).unwrap();
        let config = ServerConfig::resolve(&args, dir.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.database, "ledger.db");

        // Flags override the file.
        let args = ServerArgs::try_parse_from(["webcashd", "--port", "8100"]).unwrap();
        let config = ServerConfig::resolve(&args, dir.path()).unwrap();
        assert_eq!(config.port, 8100);
        assert_eq!(config.database, "ledger.db");
    }

    #[test]
    fn test_server_config_rejects_malformed_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_CONFIG_FILE), "port = 9000").unwrap();
        let args = ServerArgs::try_parse_from(["webcashd"]).unwrap();
        assert!(ServerConfig::resolve(&args, dir.path()).is_err());
    }
}
