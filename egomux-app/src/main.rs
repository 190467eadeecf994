//! Egomux
//!
//! Command-line front end for the sample pipeline.
//!
//! Subcommands:
//! - `inspect`: assemble and collate the first samples of a manifest
//! - `lengths`: length statistics used for length-grouped sampling

mod app;
mod summary;

use app::{AppBuilder, Command};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Egomux - multimodal surgical sample pipeline
#[derive(Parser, Debug)]
#[command(name = "egomux")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Assemble samples and print a summary of each and of the batch
    Inspect {
        /// Path to the JSON sample manifest
        #[arg(short, long)]
        manifest: PathBuf,

        /// Path to the HDF5 archive
        #[arg(short, long)]
        archive: PathBuf,

        /// Path to a tokenizer.json file
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Optional JSON data config; defaults are used for missing fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of samples to assemble
        #[arg(short, long, default_value_t = 4)]
        limit: usize,

        /// Seed for augmentation and subsampling
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Print manifest length statistics
    Lengths {
        /// Path to the JSON sample manifest
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    let command = match args.command {
        Cmd::Inspect {
            manifest,
            archive,
            tokenizer,
            config,
            limit,
            seed,
        } => Command::Inspect {
            manifest,
            archive,
            tokenizer,
            config,
            limit,
            seed,
        },
        Cmd::Lengths { manifest } => Command::Lengths { manifest },
    };

    let app = AppBuilder::new()
        .with_log_level(&args.log_level)
        .with_command(command);

    if let Err(e) = app.run() {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
