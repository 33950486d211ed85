use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "keyrelay",
    about = "KeyRelay - OpenAI-compatible gateway over a pool of rate-limited keys",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "KEYRELAY_CONFIG", help = "Path to config.json")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Listen port (overrides config and KEYRELAY_PORT)")]
    pub port: Option<u16>,

    #[arg(long, help = "Listen address (overrides config and KEYRELAY_HOST)")]
    pub host: Option<String>,

    #[arg(short, long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Start the gateway (default if no command specified)")]
    Serve,

    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig {
        #[arg(short, long, help = "Print the resolved configuration as JSON")]
        json: bool,
    },
}
