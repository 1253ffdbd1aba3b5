use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sarathi")]
#[command(author, version, about = "Structured, source-grounded counsel for ethical dilemmas", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Runtime configuration (YAML); defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the acceptance gate on a case
    Check {
        /// Case file (YAML or JSON)
        case: PathBuf,

        /// Heuristic stage only, no backend call
        #[arg(long)]
        offline: bool,
    },

    /// Rebuild a structured result from prose without any backend
    Reconstruct {
        /// Case file supplying the retrieved sources
        case: PathBuf,

        /// Refined prose
        #[arg(long)]
        refined: Option<PathBuf>,

        /// Draft prose, tried when refined prose is missing or unusable
        #[arg(long)]
        draft: Option<PathBuf>,
    },

    /// Run a full consultation
    Consult {
        /// Case file (YAML or JSON)
        case: PathBuf,

        /// Append audit records to this JSONL file
        #[arg(long)]
        audit: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}
