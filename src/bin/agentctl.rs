//! Operational CLI over the file-backed agent repository.
//!
//! Used to bootstrap agents for local runs and integration tests:
//!
//! ```text
//! agentctl register --file greeter.json --user-id demo
//! agentctl list
//! agentctl show --agent-id greeter
//! agentctl delete --agent-id greeter
//! ```
//!
//! Exits 0 on success, 1 on any failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use agentflow::config::AgentConfig;
use agentflow::storage::{AgentRepository, FileAgentRepository};

#[derive(Parser)]
#[command(name = "agentctl", about = "Manage agent configurations on disk")]
struct Cli {
    /// Root directory of the agent repository.
    #[arg(long, default_value = "agents")]
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register (or replace) an agent from a JSON config file.
    Register {
        /// Path to the agent configuration JSON.
        #[arg(long)]
        file: PathBuf,
        /// Owning user id recorded on the stored agent.
        #[arg(long, default_value = "local")]
        user_id: String,
    },
    /// List registered agents.
    List,
    /// Delete an agent by id.
    Delete {
        #[arg(long)]
        agent_id: String,
    },
    /// Show one agent's full configuration, or all of them.
    Show {
        #[arg(long)]
        agent_id: Option<String>,
    },
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let repository = FileAgentRepository::new(&cli.path)?;

    match cli.command {
        Command::Register { file, user_id } => {
            let text = std::fs::read_to_string(&file)?;
            let config: AgentConfig = serde_json::from_str(&text)?;

            let errors = config.validate();
            if !errors.is_empty() {
                return Err(format!("invalid configuration: {}", errors.join("; ")).into());
            }

            let id = config.id.clone();
            repository.put(config, &user_id).await?;
            println!("registered agent '{}'", id);
        }
        Command::List => {
            let records = repository.list().await?;
            if records.is_empty() {
                println!("no agents registered");
            }
            for record in records {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id,
                    record.agent_type,
                    if record.is_active { "active" } else { "inactive" },
                    record.config.name,
                );
            }
        }
        Command::Delete { agent_id } => {
            if repository.delete(&agent_id).await? {
                println!("deleted agent '{}'", agent_id);
            } else {
                return Err(format!("agent not found: {}", agent_id).into());
            }
        }
        Command::Show { agent_id } => match agent_id {
            Some(agent_id) => {
                let Some(config) = repository.get(&agent_id).await? else {
                    return Err(format!("agent not found: {}", agent_id).into());
                };
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            None => {
                for record in repository.list().await? {
                    println!("{}", serde_json::to_string_pretty(&record.config)?);
                }
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    agentflow::init_logger();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
