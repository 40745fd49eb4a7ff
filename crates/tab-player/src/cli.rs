use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tab-player", version)]
pub struct Args {
    /// Optional config file (TOML); defaults to config.toml next to the binary
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of simulated tabs sharing the bus
    #[arg(long, default_value_t = 2)]
    pub tabs: usize,

    /// Override how long a tab waits for the active player to answer
    #[arg(long)]
    pub probe_timeout_ms: Option<u64>,

    /// Pause between steps, giving forwarded commands time to land
    #[arg(long, default_value_t = 50)]
    pub step_delay_ms: u64,

    /// Steps to run in order, e.g. `1:42`, `2:7@5,6,7`, `1:next`, `2:seek=3000`, `1:close`
    pub steps: Vec<String>,
}
