//! `isolate`: run a command inside stacked isolation environments

mod cli;
mod collaborators;
mod commands;
mod config;
mod log_file;
mod logging;
mod output;
mod request;

use cli::Cli;
use collaborators::{NoReport, Verbatim};
use commands::run::Collaborators;
use config::Config;

fn main() {
    let cli = Cli::from_env();
    let config = Config::from_env();
    logging::init(cli.verbose || config.verbose);

    let code = if cli.is_query() {
        query(&cli, &config)
    } else {
        let collaborators = Collaborators {
            rewriter: &Verbatim,
            reporter: &NoReport,
        };
        smol::block_on(commands::run::run(&cli, &config, &collaborators))
    };
    std::process::exit(code);
}

fn query(cli: &Cli, config: &Config) -> i32 {
    if let Some(uuid) = &cli.status {
        commands::status::status(config, uuid, &cli.output_format)
    } else if cli.list {
        commands::status::list(config, cli.limit)
    } else {
        commands::cleanup::cleanup(config, cli.cleanup_dry_run)
    }
}
