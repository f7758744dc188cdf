mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use flowrun_common::types::LanguageId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowrun-cli")]
#[command(about = "flowrun CLI - Submit code to the sandbox and inspect the job queue", long_about = None)]
struct Cli {
    /// Redis URL of the job queue
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", global = true)]
    redis_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file in the sandbox and print the result
    Run {
        /// Language id or name (e.g., 71, python, js, cpp)
        #[arg(short, long)]
        language: LanguageId,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Text passed to the program's stdin
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File whose contents are passed to the program's stdin
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Seconds to wait for the result
        #[arg(short, long, default_value = "30")]
        deadline: u64,
    },

    /// List the built-in language runtimes
    Languages,

    /// Show how many jobs are waiting for a worker
    Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            file,
            input,
            input_file,
            deadline,
        } => {
            let failed = commands::run_file(&cli.redis_url, language, &file, input, input_file.as_deref(), deadline).await?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Languages => {
            commands::list_languages();
        }
        Commands::Queue => {
            commands::show_queue(&cli.redis_url).await?;
        }
    }

    Ok(())
}
