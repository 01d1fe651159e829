use clap::Parser;

/// Command-line entry for the front door binary. Deliberately thin: the
/// config *file*'s shape and loading lives in `crate::config`, not here —
/// this only carries the handful of knobs a process manager sets per
/// deployment (bind address, outbound proxy).
#[derive(Parser)]
#[command(name = "relaymux")]
pub(crate) struct Cli {
    /// Path to the resolved-pipeline config file.
    #[arg(long, default_value = "relaymux.json")]
    pub(crate) config: String,
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8787)]
    pub(crate) port: u16,
    #[arg(long)]
    pub(crate) proxy: Option<String>,
}
