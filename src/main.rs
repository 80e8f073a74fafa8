use std::process::ExitCode;

use clap::Parser;
use log::{debug, error};

use imsimilar::Opts;
use imsimilar::cli::SubCommandExtend;
use imsimilar::config::SubCommand;
use imsimilar::metrics;

fn main() -> ExitCode {
    env_logger::init();

    let opts = Opts::parse();
    let result = match &opts.subcmd {
        SubCommand::Scan(config) => config.run(&opts),
        SubCommand::Similar(config) => config.run(&opts),
    };

    debug!("运行统计:\n{}", metrics::gather_text());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
