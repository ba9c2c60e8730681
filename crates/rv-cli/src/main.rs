#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use clap::{Parser, Subcommand};

/// reviewctl -- operate the reviewd document-review daemon from the command line.
#[derive(Parser)]
#[command(name = "reviewctl", version, about)]
struct Cli {
    /// Base URL of the reviewd API.
    #[arg(short = 'u', long, global = true, default_value = "http://127.0.0.1:8787")]
    api_url: String,

    /// Bearer token identifying the caller (falls back to REVIEWCTL_TOKEN).
    #[arg(short = 't', long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a document for review.
    Submit {
        /// Path to the document to upload.
        file: String,
        /// Optional task title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,
        /// AI model key to use (defaults to the server's default model).
        #[arg(long)]
        model: Option<String>,
    },

    /// List tasks visible to the caller.
    List {
        /// Filter by status (pending, queued, processing, completed, failed, cancelled).
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    /// Show a task's detail, including its issues.
    Show { task_id: String },

    /// Re-enqueue a failed task.
    Retry { task_id: String },

    /// Cancel a running task or delete a finished one.
    Cancel { task_id: String },

    /// Download a completed task's report.
    Report {
        task_id: String,
        /// Output file path.
        #[arg(short = 'o', long, default_value = "report.csv")]
        out: String,
    },

    /// Show system-wide task and concurrency statistics.
    Stats,

    /// Record accept/reject feedback on an issue (feedback: accept | reject | clear).
    Feedback {
        issue_id: String,
        feedback: String,
        #[arg(long)]
        comment: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/').to_string();
    let token = cli
        .token
        .or_else(|| std::env::var("REVIEWCTL_TOKEN").ok())
        .ok_or_else(|| anyhow::anyhow!("no bearer token given: pass --token or set REVIEWCTL_TOKEN"))?;

    match cli.command {
        Commands::Submit { file, title, model } => {
            commands::submit::run(&api_url, &token, &file, title, model).await?;
        }
        Commands::List { status, page, page_size } => {
            commands::list::run(&api_url, &token, status, page, page_size).await?;
        }
        Commands::Show { task_id } => {
            commands::show::run(&api_url, &token, &task_id).await?;
        }
        Commands::Retry { task_id } => {
            commands::retry::run(&api_url, &token, &task_id).await?;
        }
        Commands::Cancel { task_id } => {
            commands::cancel::run(&api_url, &token, &task_id).await?;
        }
        Commands::Report { task_id, out } => {
            commands::report::run(&api_url, &token, &task_id, &out).await?;
        }
        Commands::Stats => {
            commands::stats::run(&api_url, &token).await?;
        }
        Commands::Feedback { issue_id, feedback, comment } => {
            commands::feedback::run(&api_url, &token, &issue_id, &feedback, comment).await?;
        }
    }

    Ok(())
}
