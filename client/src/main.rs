use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use portal_protocol::{Identity, Role, Status};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use portal_client::{
    cli::{Cli, Command, MediaCommand},
    config::ClientConfig,
    media::{Fetched, MediaClient},
    session::{SessionStore, StoredUser},
    view::ViewChange,
    ChatClient, ChatTransport, ConnectionState, DemoTransport, HttpTransport,
};

const DEMO_TICK: Duration = Duration::from_secs(15);
const OLDER_PAGE: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();
    let Some(command) = cli.command.as_ref() else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let cfg = ClientConfig::load(&cli)?;
    let store = SessionStore::new(&cfg.session_path);

    match command {
        Command::Login { username, admin } => {
            let mut identity = Identity::new(Uuid::new_v4().to_string(), username.trim());
            if identity.username.is_empty() {
                anyhow::bail!("username must not be empty");
            }
            if *admin {
                identity.role = Role::Admin;
            }
            store.save(&StoredUser::new(identity.clone())).await?;
            println!("logged in as {} ({})", identity.username, identity.id);
        }
        Command::Logout => {
            store.clear().await?;
            println!("logged out");
        }
        Command::Whoami => match store.load().await? {
            Some(user) => {
                println!("{} ({}, {:?})", user.identity.username, user.identity.id, user.identity.role);
                if let Some(plan) = user.plan {
                    println!("plan: {}", plan.tier);
                }
            }
            None => println!("not logged in"),
        },
        Command::Chat { demo } => {
            let stored = store.load().await?.map(|u| u.identity);
            if *demo {
                let identity = stored.unwrap_or_else(|| Identity::new("guest", "Guest"));
                let transport = DemoTransport::with_default_roster();
                let ticker = transport.spawn_ticker(DEMO_TICK);
                let client = ChatClient::new(transport, cfg.chat.clone());
                let res = run_chat(client, identity).await;
                ticker.abort();
                res?;
            } else {
                let identity = stored.context("not logged in; run `portal login --username <name>`")?;
                let transport = HttpTransport::new(&cfg.server_url)?;
                run_chat(ChatClient::new(transport, cfg.chat.clone()), identity).await?;
            }
        }
        Command::Media { command } => {
            let client = MediaClient::new(cfg.media.clone())?;
            match command {
                MediaCommand::Info => {
                    let info = client.server_info().await?;
                    note_fallback(&info);
                    let info = info.into_inner();
                    println!("{} {} ({})", info.server_name, info.version, info.id);
                }
                MediaCommand::Libraries => {
                    let libs = client.libraries().await?;
                    note_fallback(&libs);
                    for lib in libs.into_inner() {
                        println!(
                            "{:<20} {}",
                            lib.name,
                            lib.collection_type.as_deref().unwrap_or("-")
                        );
                    }
                }
                MediaCommand::Latest { limit } => {
                    let items = client.latest_items(*limit).await?;
                    note_fallback(&items);
                    for item in items.into_inner() {
                        let year = item.production_year.map(|y| y.to_string()).unwrap_or_default();
                        println!("{:<8} {:<30} {:<6} {}", item.kind, item.name, year, client.image_url(&item.id));
                    }
                }
            }
        }
    }
    Ok(())
}

fn note_fallback<T>(fetched: &Fetched<T>) {
    if let Fetched::Fallback { reason, .. } = fetched {
        eprintln!("media server unavailable ({reason}); showing sample data");
    }
}

async fn run_chat<T: ChatTransport>(mut client: ChatClient<T>, identity: Identity) -> Result<()> {
    let mut changes = client.changes();
    let mut state = client.watch_state();
    client.connect(identity.clone()).await;
    info!(user = %identity.username, "chat started");
    println!("connected as {}; /hide /show /older /quit", identity.username);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/hide" => client.set_visible(false),
                    "/show" => client.set_visible(true),
                    "/older" => match client.load_older(OLDER_PAGE).await {
                        Ok(n) => println!("-- loaded {n} older messages"),
                        Err(error) => warn!(%error, "failed to load history"),
                    },
                    text => {
                        if let Err(error) = client.send(text).await {
                            eprintln!("send failed: {error}");
                        }
                    }
                }
            }
            change = changes.recv() => match change {
                Ok(change) => render(&client, change),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "display lagging behind");
                }
                Err(_) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = state.borrow_and_update().clone();
                match now {
                    ConnectionState::Backoff { attempt, delay } => {
                        println!("-- disconnected, retry {attempt} in {}s", delay.as_secs())
                    }
                    ConnectionState::GaveUp { attempts } => {
                        println!("-- gave up after {attempts} attempts");
                        break;
                    }
                    other => println!("-- {other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    client.disconnect().await;
    Ok(())
}

fn render<T: ChatTransport>(client: &ChatClient<T>, change: ViewChange) {
    match change {
        ViewChange::Snapshot => {
            for m in client.messages() {
                println!("[{}] {}", m.sender.username, m.content);
            }
            print_presence(client);
        }
        ViewChange::Message(m) => println!("[{}] {}", m.sender.username, m.content),
        ViewChange::History(n) => println!("-- {n} older messages available above"),
        ViewChange::Presence => print_presence(client),
    }
}

fn print_presence<T: ChatTransport>(client: &ChatClient<T>) {
    let users: Vec<String> = client
        .presence()
        .into_iter()
        .filter(|u| u.status != Status::Offline)
        .map(|u| match u.status {
            Status::Typing => format!("{} (typing)", u.identity.username),
            _ => u.identity.username,
        })
        .collect();
    println!("-- online: {}", users.join(", "));
}
