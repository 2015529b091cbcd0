use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the community portal client.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the client configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Chat server base URL, e.g. http://127.0.0.1:8787.
    #[arg(long, global = true)]
    pub server: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store an identity for later sessions.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        admin: bool,
    },
    /// Forget the stored identity.
    Logout,
    /// Show the stored identity.
    Whoami,
    /// Join the chat. Type /hide, /show, /older or /quit.
    Chat {
        /// Use the offline demo backend instead of the server.
        #[arg(long)]
        demo: bool,
    },
    /// Query the media server.
    Media {
        #[command(subcommand)]
        command: MediaCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum MediaCommand {
    Info,
    Libraries,
    Latest {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}
