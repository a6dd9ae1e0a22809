pub mod op;
pub mod ops;

use std::path::PathBuf;

use clap::Parser;

pub use op::{Op, OpContext};
pub use ops::Command;

#[derive(Parser, Debug)]
#[command(name = "hive", version, about = "Distributed build accelerator node")]
pub struct Cli {
    /// Config file (default: ~/.hive/config.toml)
    #[arg(long, global = true, env = "HIVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}
