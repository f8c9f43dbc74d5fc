//! Parley CLI - line-oriented support chat client.
//!
//! This is the entry point for the `parley` binary. It connects to a chat
//! server as a customer or as an agent, prints the timeline as it changes,
//! and reads messages and slash commands from stdin.

mod app;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use parley_client::{ClientConfig, HttpChatApi, WsPushChannel};
use parley_core::{ConversationId, CustomerId, EmployeeId};
use parley_engine::{ConversationEngine, Participant, Session, SyncConfig};
use parley_store::RocksSessionStore;
use tokio::io::{AsyncBufReadExt, BufReader};

use app::{App, Command};

/// Who the client acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Customer,
    Employee,
}

/// Parley CLI - line-oriented support chat client.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chat server URL.
    #[arg(long, env = "PARLEY_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Push channel URL. Derived from the server URL if omitted.
    #[arg(long, env = "PARLEY_PUSH_URL")]
    push_url: Option<String>,

    /// Bearer token for authentication.
    #[arg(long, env = "PARLEY_TOKEN")]
    token: Option<String>,

    /// Act as a customer or as a support agent.
    #[arg(long, value_enum, default_value = "customer")]
    role: Role,

    /// Registered customer id (customers) or employee id (agents).
    #[arg(long)]
    id: Option<u64>,

    /// Display name for your own messages.
    #[arg(long)]
    name: Option<String>,

    /// Conversation to open on start.
    #[arg(long)]
    conversation: Option<ConversationId>,

    /// JSON file with engine settings (page size, intervals, language).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory where the guest session is persisted between runs.
    #[arg(long, env = "PARLEY_SESSION_DIR")]
    session_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl Args {
    fn participant(&self) -> anyhow::Result<Participant> {
        Ok(match self.role {
            Role::Customer => Participant::Customer {
                id: self.id.map(CustomerId::new),
                name: self.name.clone(),
            },
            Role::Employee => {
                let id = self.id.context("--id is required for agents")?;
                Participant::Employee {
                    id: EmployeeId::new(id),
                    name: self.name.clone().unwrap_or_else(|| format!("Agent {id}")),
                }
            }
        })
    }

    fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        let Some(path) = &self.config else {
            return Ok(SyncConfig::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn session(&self) -> anyhow::Result<Session> {
        let Some(dir) = &self.session_dir else {
            return Ok(Session::ephemeral());
        };
        let profile = match (self.role, self.id) {
            (Role::Customer, None) => "guest".to_string(),
            (Role::Customer, Some(id)) => format!("customer-{id}"),
            (Role::Employee, id) => format!("employee-{}", id.unwrap_or_default()),
        };
        let store = RocksSessionStore::open_profile(dir, profile)
            .with_context(|| format!("opening session store at {}", dir.display()))?;
        Ok(Session::load(Arc::new(store))?)
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.server);
        if let Some(push_url) = &self.push_url {
            config.push_url.clone_from(push_url);
        }
        match &self.token {
            Some(token) => config.with_token(token),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter("parley=debug,parley_engine=debug,parley_client=debug,warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let participant = args.participant()?;
    let sync_config = args.sync_config()?;
    let session = args.session()?;
    let client_config = args.client_config();

    let api = HttpChatApi::new(&client_config)?;
    let push = WsPushChannel::connect(&client_config)
        .await
        .with_context(|| format!("connecting to {}", client_config.push_url))?;

    let engine = ConversationEngine::new(
        Arc::new(api),
        Arc::new(push),
        session,
        participant,
        sync_config,
    );
    let mut app = App::new(engine);

    start(&mut app, args.conversation).await;
    run_event_loop(&mut app).await;

    app.engine().close();
    Ok(())
}

/// Open the first conversation, or show the queue to an agent.
async fn start(app: &mut App, conversation: Option<ConversationId>) {
    let engine = app.engine().clone();
    let lines = match (conversation, engine.participant()) {
        (Some(id), _) => app.execute(Command::Open(id)).await,
        (None, Participant::Customer { .. }) => match engine.resume_guest().await {
            Ok(id) => vec![format!("* conversation {id}")],
            Err(e) => vec![format!("! {}", e.user_message())],
        },
        (None, Participant::Employee { .. }) => {
            if let Err(e) = engine.watch_agent_queue().await {
                tracing::warn!(error = %e, "Agent queue subscription failed");
            }
            let mut lines = vec!["* open a conversation with /open <id>".to_string()];
            lines.extend(app.execute(Command::Queue).await);
            lines
        }
    };
    print_lines(&lines);
    print_lines(&app.observe(&engine.snapshot()));
}

/// Main loop: input lines and timeline snapshots, whichever comes first.
async fn run_event_loop(app: &mut App) {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut snapshots = app.engine().watch();

    loop {
        tokio::select! {
            line = input.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read input");
                        break;
                    }
                };
                match Command::parse(&line) {
                    Ok(Some(command)) => print_lines(&app.execute(command).await),
                    Ok(None) => {}
                    Err(e) => println!("! {e}"),
                }
                // Replies that arrived while the command ran.
                let snapshot = snapshots.borrow_and_update().clone();
                print_lines(&app.observe(&snapshot));
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_lines(&app.observe(&snapshot));
            }
        }

        if app.should_quit {
            break;
        }
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
