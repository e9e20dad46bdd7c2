mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chatbox::Config;

#[derive(Parser)]
#[command(name = "chatbox")]
#[command(version = "0.1.0")]
#[command(about = "Chat with a conversational backend from the terminal", long_about = None)]
struct Cli {
    /// Chat backend root, overrides the config file and CHATBOX_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive conversation
    Chat { conversation: Option<String> },
    /// Print the history of a conversation
    History {
        conversation: Option<String>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Send a single message and print the reply
    Send {
        #[arg(long, short)]
        conversation: Option<String>,
        text: String,
    },
    /// Show the active configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    config.apply_overrides(cli.base_url);

    match cli.command {
        None => commands::run_chat(&config, None).await,
        Some(Commands::Chat { conversation }) => commands::run_chat(&config, conversation).await,
        Some(Commands::History {
            conversation,
            pages,
        }) => commands::show_history(&config, conversation, pages.max(1)).await,
        Some(Commands::Send { conversation, text }) => {
            commands::send_once(&config, conversation, &text).await
        }
        Some(Commands::Config { init }) => commands::show_config(&config, init),
    }
}
