//! CLI binary for parley.

use std::io::{BufRead, Write as _};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley::{AppConfig, ChatClient, ChatMessage, Conversation};
use tracing_subscriber::EnvFilter;

/// Parley: voice-first chat client core.
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session.
    Chat,

    /// Check whether the chat endpoint is reachable.
    Health,

    /// Ask the server to terminate runaway agent processes.
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing — suppress noisy dependency logs by default.
    // Users can override with RUST_LOG=debug to see everything.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        AppConfig::from_file(path)?
    } else {
        AppConfig::load_or_default(&AppConfig::default_config_path())
    };

    let client = ChatClient::new(&config.chat)?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(&client).await,
        Command::Health => run_health(&client).await,
        Command::Stop => run_stop(&client).await,
    }
}

async fn run_chat(client: &ChatClient) -> anyhow::Result<()> {
    println!("Parley v{}", env!("CARGO_PKG_VERSION"));
    println!("Type a message and press enter. Ctrl-D to quit.");

    let mut conversation = Conversation::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        conversation.push(ChatMessage::user(line));
        conversation.begin_assistant();

        let mut print_token = |token: &str| {
            print!("{token}");
            let _ = std::io::stdout().flush();
        };
        let reply = match client
            .chat(
                conversation.messages(),
                conversation.server_conversation_id(),
                Some(&mut print_token),
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                conversation.abort_pending();
                eprintln!("\nerror: {e}");
                continue;
            }
        };
        println!();

        if let Some(id) = reply.conversation_id.as_deref() {
            conversation.set_server_conversation_id(id);
        }
        conversation.commit_assistant(reply.content);
    }

    Ok(())
}

async fn run_health(client: &ChatClient) -> anyhow::Result<()> {
    if client.health().await {
        println!("ok");
        Ok(())
    } else {
        println!("unreachable");
        std::process::exit(1);
    }
}

async fn run_stop(client: &ChatClient) -> anyhow::Result<()> {
    let report = client.kill_switch().await;
    if report.success {
        println!(
            "stopped {} process(es): {}",
            report.processes_killed.unwrap_or(0),
            report.message.as_deref().unwrap_or("ok")
        );
    } else {
        println!(
            "stop request failed: {}",
            report.error.unwrap_or_else(|| "unknown error".to_owned())
        );
    }
    Ok(())
}
