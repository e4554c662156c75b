use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "reql-guard",
    version,
    about = "WebSocket gateway that only forwards whitelisted RethinkDB queries"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "reql-guard.yaml")]
    pub config: PathBuf,

    /// Path to the query whitelist (overrides config file setting)
    #[arg(short, long)]
    pub whitelist: Option<PathBuf>,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Backend address as host:port (overrides config file setting)
    #[arg(long)]
    pub backend: Option<String>,

    /// Forward every query without consulting the whitelist
    #[arg(long)]
    pub unsafely_allow_any_query: bool,
}
