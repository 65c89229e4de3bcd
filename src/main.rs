//! ccm-infra CLI: compose, plan and synthesize the CCM stacks.

use ccm_infra::cli::{dispatch, Cli};
use ccm_infra::util::{init_logging, LoggingConfig};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose, cli.log_json));
    if let Err(e) = dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
