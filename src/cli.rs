use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml, the model cache and the persisted
    /// session
    #[clap(long, default_value = ".docq")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse, embed and index a document, replacing the active session
    Ingest {
        /// Path to the PDF document
        path: PathBuf,
    },

    /// Retrieve relevant fragments and generate a grounded answer
    Ask {
        /// The question to answer
        question: Option<String>,

        /// Query with an image instead of text
        #[clap(long, conflicts_with = "question")]
        image: Option<PathBuf>,

        /// Number of fragments to retrieve (config default when omitted)
        #[clap(short)]
        k: Option<usize>,
    },

    /// Retrieve relevant fragments and print them without generation
    Search {
        /// The query text
        query: Option<String>,

        /// Query with an image instead of text
        #[clap(long, conflicts_with = "query")]
        image: Option<PathBuf>,

        /// Number of fragments to retrieve (config default when omitted)
        #[clap(short)]
        k: Option<usize>,
    },
}
