//! Subflow - Media-to-Subtitle Pipeline
//!
//! This is the main entry point for the Subflow application, which drives
//! media files through audio extraction, whisper transcription and
//! LLM-backed correction/translation, persisting task state across restarts.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subflow::cli::{Args, Commands};
use subflow::config::Config;
use subflow::orchestrator::{Orchestrator, SubmitRequest};
use subflow::store::TaskStatus;
use subflow::transcribe;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    info!("Starting Subflow - Media-to-Subtitle Pipeline");

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env_overrides();

    // Execute command
    match args.command {
        Commands::Models => {
            println!("\nAvailable Transcription Models:");
            println!("{:<18} {}", "Name", "Description");
            println!("{}", "-".repeat(70));
            for model in transcribe::available_models() {
                println!("{:<18} {}", model.name, model.description);
            }
        }
        Commands::Status { task_id } => {
            let orchestrator = Orchestrator::new(config)?;
            let task = orchestrator.task(&task_id)?;

            println!("Task:     {}", task.task_id);
            println!("File:     {}", task.original_filename);
            println!("Status:   {} ({}%)", task.status, task.progress);
            println!("Message:  {}", task.message);
            if let Some(error) = &task.error_message {
                println!("Error:    {}", error);
            }
            if let Some(process_time) = task.process_time {
                println!("Duration: {:.1}s", process_time);
            }
        }
        Commands::List { limit } => {
            let orchestrator = Orchestrator::new(config)?;
            let tasks = orchestrator.tasks(limit)?;

            if tasks.is_empty() {
                println!("No tasks found.");
            } else {
                println!(
                    "{:<38} {:<22} {:>5} {:<30}",
                    "Task", "Status", "%", "File"
                );
                println!("{}", "-".repeat(100));
                for task in tasks {
                    println!(
                        "{:<38} {:<22} {:>5} {:<30}",
                        task.task_id,
                        task.status.as_str(),
                        task.progress,
                        task.original_filename
                    );
                }
            }
        }
        Commands::Output { task_id } => {
            let orchestrator = Orchestrator::new(config)?;
            let path = orchestrator.output_path(&task_id)?;
            println!("{}", path.display());
        }
        Commands::Process {
            input,
            target_lang,
            keep_original,
            correct,
            model,
        } => {
            info!("Processing media file: {}", input.display());

            let orchestrator = Orchestrator::new(config)?;
            orchestrator.start().await?;

            let task = orchestrator
                .submit(SubmitRequest {
                    task_id: None,
                    input_path: input,
                    target_lang,
                    keep_original,
                    correct,
                    model_name: model,
                })
                .await?;
            println!("Task {} queued", task.task_id);

            let finished = wait_for_task(&orchestrator, &task.task_id).await?;
            match finished {
                TaskStatus::Completed => {
                    let output = orchestrator.output_path(&task.task_id)?;
                    println!("Subtitle file: {}", output.display());
                }
                _ => {
                    let task = orchestrator.task(&task.task_id)?;
                    anyhow::bail!(
                        "Task failed: {}",
                        task.error_message.unwrap_or_else(|| task.message)
                    );
                }
            }
        }
    }

    info!("Subflow finished");
    Ok(())
}

/// Poll a task until it reaches a terminal state, echoing progress.
async fn wait_for_task(orchestrator: &Orchestrator, task_id: &str) -> Result<TaskStatus> {
    let mut last_progress = None;
    loop {
        let task = orchestrator.task(task_id)?;
        if last_progress != Some(task.progress) {
            println!("[{:>3}%] {}", task.progress, task.message);
            last_progress = Some(task.progress);
        }
        if task.status.is_terminal() {
            return Ok(task.status);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let subflow_dir = std::env::current_dir()?.join(".subflow");
    let log_dir = subflow_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subflow.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    // Initialize the subscriber
    subscriber
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subflow.log").display()
    );

    Ok(())
}
