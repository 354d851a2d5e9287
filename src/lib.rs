pub mod bmc;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod model;
pub mod orderer;
pub mod powercap;
pub mod response;
pub mod route;
pub mod sequence;
pub mod server;

use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:27777";

/// Queued jobs allowed per worker before `submit` waits.
pub const QUEUE_DEPTH_PER_WORKER: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cluster power control daemon", long_about = None)]
pub struct Cli {
    #[arg(
        long,
        short,
        default_value = DEFAULT_LISTEN_ADDRESS,
        help = "eg: '0.0.0.0:27777' or 'capmc.local:8080'"
    )]
    pub listen_address: String,

    #[arg(long, short, help = "TOML service configuration")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Log hardware requests instead of sending them")]
    pub simulate_only: bool,

    #[arg(long, help = "PEM bundle used to verify BMC certificates")]
    pub ca_bundle: Option<PathBuf>,

    #[arg(long, default_value_t = bmc::client::DEFAULT_CLIENT_TIMEOUT_SECS)]
    pub client_timeout_secs: u64,

    #[arg(long, short, help = "Worker count, overrides ActionMaxWorkers")]
    pub workers: Option<usize>,

    #[arg(long, short)]
    pub debug: bool,
}

impl Cli {
    /// Reads the CA bundle, if one was given.
    pub fn read_ca_bundle(&self) -> error::CapmcResult<Option<Vec<u8>>> {
        match &self.ca_bundle {
            Some(path) => Ok(Some(std::fs::read(path)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["capmcd"]);
        assert_eq!(cli.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(cli.client_timeout_secs, 180);
        assert!(cli.workers.is_none());
        assert!(!cli.simulate_only);
        assert!(cli.read_ca_bundle().unwrap().is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "capmcd",
            "--listen-address",
            "127.0.0.1:9000",
            "--simulate-only",
            "--workers",
            "8",
            "--config",
            "/etc/capmcd.toml",
        ]);
        assert_eq!(cli.listen_address, "127.0.0.1:9000");
        assert!(cli.simulate_only);
        assert_eq!(cli.workers, Some(8));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/capmcd.toml")));
    }
}
