use clap::Parser;

use hive_daemon::{logging, Config};

mod cli;

use cli::{Cli, Op, OpContext};

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::load(args.config.as_deref())?;
    logging::init(&config.server.log_level);

    let ctx = OpContext::new(config);
    let output = args.command.execute(&ctx)?;
    println!("{}", output);
    Ok(())
}
