use anyhow::Context;
use clap::Parser;
use colored::*;
use ream_bully::cli::Cli;
use ream_bully::commands::execute_command;
use std::process;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool, debug: bool) {
    let default_level = if debug {
        "debug"
    } else if verbose {
        "info,ream_bully=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_ansi(colored::control::SHOULD_COLORIZE.should_colorize())
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose, cli.debug);
    execute_command(cli.command, cli.debug, cli.verbose).context("ream-bully failed")
}

fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up colored output
    if cli.no_color {
        colored::control::set_override(false);
    }

    // Handle any errors
    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        process::exit(1);
    }
}
