use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a media file and wait for the subtitle pipeline to finish
    Process {
        /// Input video or audio file
        #[arg(short, long)]
        input: PathBuf,

        /// Target language for translation (omit to skip translation)
        #[arg(short, long)]
        target_lang: Option<String>,

        /// Keep the original text above the translation (bilingual output)
        #[arg(short, long)]
        keep_original: bool,

        /// Run LLM-based correction on the transcript
        #[arg(long)]
        correct: bool,

        /// Transcription model (see `models` for the catalog)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show the status of a task
    Status {
        /// Task identifier returned by `process`
        task_id: String,
    },

    /// List all known tasks
    List {
        /// Maximum number of tasks to show
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Print the final subtitle path of a completed task
    Output {
        /// Task identifier returned by `process`
        task_id: String,
    },

    /// List the available transcription models
    Models,
}
