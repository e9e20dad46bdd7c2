use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use chatbox::conversation::{get_help_text, parse_slash_command, SlashCommand};
use chatbox::{
    ChatError, Config, ConversationEvent, ConversationStore, HttpGateway, LoadOutcome, Message,
    Notification, SubmitOutcome,
};

type Events = UnboundedReceiver<ConversationEvent>;

fn resolve_conversation(config: &Config, conversation: Option<String>) -> Result<String> {
    conversation
        .or_else(|| config.default_conversation.clone())
        .filter(|id| !id.trim().is_empty())
        .context("No conversation given. Pass one on the command line or set default_conversation in the config file")
}

fn new_store(config: &Config, conversation_id: &str) -> Result<(ConversationStore, Events)> {
    let gateway = HttpGateway::new(config).context("Failed to create HTTP gateway")?;
    Ok(ConversationStore::new(config.session(conversation_id), Arc::new(gateway)))
}

async fn open_store(config: &Config, conversation_id: &str) -> Result<(ConversationStore, Events)> {
    let gateway = HttpGateway::new(config).context("Failed to create HTTP gateway")?;
    Ok(ConversationStore::open(config.session(conversation_id), Arc::new(gateway)).await)
}

fn print_message(message: &Message) {
    let who = if message.is_user_message() {
        "👤 You"
    } else {
        "🤖 Assistant"
    };
    println!(
        "{} [{}]: {}",
        who,
        message.created_at().format("%Y-%m-%d %H:%M"),
        message.text()
    );
}

/// Print the loaded history, oldest first
fn print_transcript(store: &ConversationStore) {
    let messages = store.messages();
    if messages.is_empty() {
        println!("📭 No messages yet.");
        return;
    }

    for message in messages.iter().rev() {
        print_message(message);
    }
    if store.has_more() {
        println!("… older messages available (/more)");
    }
}

/// Print any queued notifications and discard change events
fn drain_notifications(events: &mut Events) {
    while let Ok(event) = events.try_recv() {
        if let ConversationEvent::Notify(notification) = event {
            println!("{}", notification.status_line());
        }
    }
}

async fn load_pages(store: &ConversationStore, pages: u32) -> usize {
    let mut added = 0;
    for _ in 0..pages {
        match store.load_more().await {
            LoadOutcome::Applied { added: n } => added += n,
            _ => break,
        }
    }
    added
}

/// Writes the streaming reply to stdout as it grows
#[derive(Default)]
struct ReplyPrinter {
    started: bool,
    printed: usize,
}

impl ReplyPrinter {
    fn header(&mut self) {
        if !self.started {
            print!("🤖 Assistant: ");
            self.started = true;
        }
    }

    fn show(&mut self, text: &str) {
        self.header();
        if text.len() > self.printed && text.is_char_boundary(self.printed) {
            print!("{}", &text[self.printed..]);
            self.printed = text.len();
        }
        let _ = io::stdout().flush();
    }

    fn refresh(&mut self, store: &ConversationStore) {
        let view = store.view();
        match view.first() {
            Some(head) if head.is_streaming() => self.show(head.text()),
            Some(head) if head.id().is_loading() => {
                self.header();
                let _ = io::stdout().flush();
            }
            _ => {}
        }
    }

    /// Print whatever the reconciled reply adds beyond what was streamed
    fn finish(&mut self, store: &ConversationStore) {
        if let Some(reply) = store.messages().iter().find(|m| !m.is_user_message()) {
            self.show(reply.text());
        }
        println!();
    }
}

async fn send_and_stream(store: &ConversationStore, events: &mut Events) -> Result<SubmitOutcome> {
    let mut task = store.spawn_submit(store.input());
    let mut printer = ReplyPrinter::default();

    let outcome = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => match event {
                ConversationEvent::Changed => printer.refresh(store),
                ConversationEvent::Notify(notification) => {
                    if printer.started {
                        println!();
                    }
                    println!("{}", notification.status_line());
                }
            },
            joined = &mut task => break joined.context("Send task failed")?,
        }
    };

    debug!(?outcome, "send finished");
    if outcome == SubmitOutcome::Delivered {
        printer.finish(store);
    }
    drain_notifications(events);

    Ok(outcome)
}

pub async fn run_chat(config: &Config, conversation: Option<String>) -> Result<()> {
    let conversation_id = resolve_conversation(config, conversation)?;
    let (store, mut events) = open_store(config, &conversation_id).await?;

    println!("💬 Conversation {}", conversation_id);
    println!("{}", "=".repeat(50));
    print_transcript(&store);
    drain_notifications(&mut events);
    println!("\nType a message and press Enter. /help lists commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read user input")? else {
            break;
        };

        if let Some(parsed) = parse_slash_command(&line) {
            match parsed.command {
                SlashCommand::Quit => break,
                SlashCommand::Help => println!("{}", get_help_text()),
                SlashCommand::History => print_transcript(&store),
                SlashCommand::Refresh => {
                    if let LoadOutcome::Applied { .. } = store.reload().await {
                        print_transcript(&store);
                    }
                }
                SlashCommand::More => match parsed.page_count() {
                    Some(pages) if store.has_more() => {
                        let added = load_pages(&store, pages).await;
                        println!("{}", Notification::info(format!("Loaded {} older messages", added)).status_line());
                    }
                    Some(_) => println!("📭 No older messages."),
                    None => println!("❌ Usage: /more <pages>"),
                },
            }
            drain_notifications(&mut events);
            continue;
        }

        store.set_input(line);
        if store.input().trim().is_empty() {
            continue;
        }
        send_and_stream(&store, &mut events).await?;
    }

    store.close();
    println!("👋 Bye!");
    Ok(())
}

pub async fn show_history(config: &Config, conversation: Option<String>, pages: u32) -> Result<()> {
    let conversation_id = resolve_conversation(config, conversation)?;
    let (store, mut events) = open_store(config, &conversation_id).await?;

    if pages > 1 {
        load_pages(&store, pages - 1).await;
    }

    drain_notifications(&mut events);
    println!("📜 History of {}", conversation_id);
    println!("{}", "=".repeat(50));
    print_transcript(&store);

    store.close();
    Ok(())
}

pub async fn send_once(config: &Config, conversation: Option<String>, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyMessage.into());
    }

    let conversation_id = resolve_conversation(config, conversation)?;
    let (store, mut events) = new_store(config, &conversation_id)?;

    store.set_input(text);
    let outcome = send_and_stream(&store, &mut events).await?;
    store.close();

    match outcome {
        SubmitOutcome::Delivered => Ok(()),
        other => bail!("Message was not delivered ({:?})", other),
    }
}

pub fn show_config(config: &Config, init: bool) -> Result<()> {
    let path = config.config_path();

    if init {
        if path.exists() {
            println!("⚠️  Config already exists at {}", path.display());
        } else {
            config.save()?;
            println!("✅ Wrote default config to {}", path.display());
        }
    }

    println!("⚙️  Config file: {}", path.display());
    println!("{}", "=".repeat(50));
    print!("{}", toml::to_string_pretty(config).context("Failed to serialize config")?);

    Ok(())
}
