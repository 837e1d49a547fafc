use clap::Parser;

use super::constants::{ENV_HOST, ENV_LOG, ENV_PORT};

#[derive(Parser)]
#[command(name = "fanout")]
#[command(version, about = "In-memory pub/sub broker", long_about = None)]
pub struct Cli {
    /// Server host address
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Log filter (overrides FANOUT_LOG / RUST_LOG)
    #[arg(long, env = ENV_LOG)]
    pub log: Option<String>,
}

/// Parse command line arguments
pub fn parse() -> Cli {
    Cli::parse()
}
