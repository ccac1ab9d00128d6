use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use execution_agent::agent_config::AgentConfig;
use execution_agent::error::Result;
use execution_agent::process_handler::ProcessHandler;
use execution_agent::shutdown;
use execution_agent::transport::ControllerClient;
use execution_agent::worker::{Worker, WorkerOptions};

#[derive(Parser, Debug)]
#[command(name = "execution-agent")]
#[command(version)]
#[command(about = "Execution server agent for a remote job-scheduling controller")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Log in, register if configured to, and serve jobs until SIGINT/SIGTERM (default)
    Run,

    /// Register the execution server with the details from the config file
    Register,

    /// Update the description and capacity of the execution server
    Update,
}

fn init_logging(config: &AgentConfig) {
    let level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match run(args.command.unwrap_or(Commands::Run), &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &AgentConfig) -> Result<()> {
    let client = Arc::new(ControllerClient::new(
        &config.controller_url,
        Duration::from_secs(config.connect_timeout_secs),
        config.request_timeout_secs.map(Duration::from_secs),
    )?);
    let handler = Arc::new(ProcessHandler::new(&config.jobs));
    let mut worker = Worker::new(WorkerOptions::from_config(config), client, handler);

    worker
        .authenticate(&config.username, &config.password, &config.domain)
        .await?;

    match command {
        Commands::Register => {
            worker.register().await?;
            println!("Successfully registered.");
        }
        Commands::Update => {
            worker.update().await?;
            println!("Successfully updated.");
        }
        Commands::Run => {
            if config.auto_register {
                worker.register().await?;
            }
            worker.start()?;
            println!("{} execution server {} started", config.server_type, config.name);

            if let Err(e) = shutdown::wait_for_signal().await {
                error!("Failed to listen for shutdown signals: {}", e);
            }

            info!("Stopping, waiting for the poll loop and heartbeat to exit...");
            worker.stop().await?;
            println!("Stopped");
        }
    }

    Ok(())
}
