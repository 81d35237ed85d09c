use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Command {
    /// Reshape benchmark run documents into per-frame CSV tables
    Stats {
        /// Benchmark run documents (JSON) to process
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Summarize quality metric logs for encoded benchmark outputs
    Quality {
        /// Benchmark run documents (JSON) whose metric logs to parse
        #[arg(required = true)]
        tests: Vec<PathBuf>,

        /// CSV file to append one summary row per run document
        #[arg(short, long, default_value = "quality.csv")]
        output: PathBuf,

        /// Write the column header before the first row
        #[arg(long)]
        header: bool,
    },
}
