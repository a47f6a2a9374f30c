//! This is the `hposim` app.
#![deny(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![warn(missing_docs)]

use clap::{Parser, Subcommand};
use hposim::{analyze, common, prepare};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Phenotypic similarity of probands sharing a gene",
    long_about = "hposim tests whether probands with variants in the same gene are more \
    phenotypically similar than random groups of probands, based on HPO term annotations"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of sub commands.
#[derive(Debug, Subcommand)]
enum Commands {
    Analyze(analyze::Args),
    Prepare(prepare::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install globally, events are also emitted from rayon worker threads.
    tracing::subscriber::set_global_default(collector)?;

    match &cli.command {
        Commands::Analyze(args) => analyze::run(&cli.common, args)?,
        Commands::Prepare(args) => prepare::run(&cli.common, args)?,
    }

    Ok(())
}
