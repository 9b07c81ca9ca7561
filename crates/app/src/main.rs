use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use fidus_config::{mask_api_key, Settings};
use fidus_llm::{ChatClient, OpenRouterClient, Role};
use fidus_memory::{Conversation, ConversationStore};
use fidus_runtime::{Agent, TurnToken};
use fidus_tools::{DatetimeTool, MemorySearchTool, ToolRegistry};

const SETTINGS_PATH: &str = "data/settings.toml";

#[derive(Debug, Parser)]
#[command(name = "fidus", version, about = "A personal assistant with a searchable memory")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat session (the default)
    Chat {
        /// Resume an existing conversation by id
        #[arg(long)]
        resume: Option<String>,
    },
    /// List saved conversations, most recently updated first
    List,
    /// Search saved conversations for a phrase
    Search { query: String },
    /// Print a saved conversation
    Show { id: String },
    /// Delete a saved conversation
    Delete { id: String },
    /// Show the active settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::load(Path::new(SETTINGS_PATH))?;
    let store = Arc::new(ConversationStore::new(settings.conversations_dir()));

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Chat { resume: None }) {
        Commands::Chat { resume } => run_chat(&settings, store, resume).await,
        Commands::List => run_list(&store),
        Commands::Search { query } => run_search(&store, &query),
        Commands::Show { id } => run_show(&store, &id),
        Commands::Delete { id } => {
            store.delete(&id)?;
            println!("deleted {id}");
            Ok(())
        }
        Commands::Config => {
            println!("model: {}", settings.model);
            println!("api key: {}", mask_api_key(&settings.api_key));
            println!("data dir: {}", settings.data_dir);
            Ok(())
        }
    }
}

async fn run_chat(
    settings: &Settings,
    store: Arc<ConversationStore>,
    resume: Option<String>,
) -> Result<()> {
    let client: Arc<dyn ChatClient> = Arc::new(
        OpenRouterClient::new(&settings.api_key, &settings.model)
            .context("configure the OpenRouter client")?,
    );

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(DatetimeTool));
    registry.register(Arc::new(MemorySearchTool::new(store.clone())));

    let agent = Agent::new(
        client,
        Arc::new(registry),
        store.clone(),
        &settings.system_prompt,
    );

    let mut conversation = match resume {
        Some(id) => store.load(&id)?,
        None => store.create(&settings.model)?,
    };

    println!("fidus — model {} — conversation {}", settings.model, conversation.id);
    println!("type a message, or /exit to quit");
    replay_transcript(&conversation);

    let stdin = io::stdin();
    loop {
        print!("you> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }

        // A failed turn (transport error mid-stream) ends that turn only;
        // the session keeps going.  Nothing was saved, so reloading drops
        // the failed turn's messages and realigns with the file.
        if let Err(err) = run_streamed_turn(&agent, &mut conversation, line).await {
            eprintln!("error: {err:#}");
            conversation = store.load(&conversation.id)?;
        }
    }

    println!("conversation saved as {}", conversation.id);
    Ok(())
}

/// Drive one turn, printing text tokens as they arrive.  Printing happens
/// on a separate task so the turn keeps streaming while stdout flushes.
async fn run_streamed_turn(
    agent: &Agent,
    conversation: &mut Conversation,
    line: &str,
) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(token) = rx.recv().await {
            match token {
                TurnToken::Text(text) => {
                    let _ = write!(stdout, "{text}");
                    let _ = stdout.flush();
                }
                TurnToken::RoundBoundary => {
                    let _ = writeln!(stdout);
                }
            }
        }
    });

    let result = agent.run_turn(conversation, line, tx).await;
    let _ = printer.await;
    println!();
    result
}

fn replay_transcript(conversation: &Conversation) {
    for message in &conversation.messages {
        match message.role {
            Role::User => {
                if let Some(content) = &message.content {
                    println!("you> {content}");
                }
            }
            Role::Assistant => {
                if let Some(content) = &message.content {
                    println!("{content}");
                }
            }
            Role::System | Role::Tool => {}
        }
    }
    if !conversation.messages.is_empty() {
        println!();
    }
}

fn run_list(store: &ConversationStore) -> Result<()> {
    let summaries = store.list()?;
    if summaries.is_empty() {
        println!("no conversations yet");
        return Ok(());
    }
    for summary in summaries {
        println!("{}  {}  {}", summary.id, summary.updated, summary.title);
    }
    Ok(())
}

fn run_search(store: &ConversationStore, query: &str) -> Result<()> {
    let results = store.search(query)?;
    debug!(query, hits = results.len(), "search complete");
    if results.is_empty() {
        println!("no matches for \"{query}\"");
        return Ok(());
    }
    for result in results {
        println!("{}  {}", result.id, result.title);
        println!("  {}", result.snippet);
    }
    Ok(())
}

fn run_show(store: &ConversationStore, id: &str) -> Result<()> {
    let conversation = store.load(id)?;
    println!("{} — {} ({})", conversation.id, conversation.title, conversation.model);
    for message in &conversation.messages {
        match message.role {
            Role::User => println!("\nyou> {}", message.content.as_deref().unwrap_or_default()),
            Role::Assistant => {
                if let Some(content) = &message.content {
                    println!("\n{content}");
                }
                for call in message.tool_calls.iter().flatten() {
                    println!("\n[tool call {} -> {}]", call.id, call.function.name);
                }
            }
            Role::Tool => println!(
                "\n[tool result {}] {}",
                message.tool_call_id.as_deref().unwrap_or("unknown"),
                message.content.as_deref().unwrap_or_default()
            ),
            Role::System => {}
        }
    }
    Ok(())
}
