pub mod chat;
pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod media;
pub mod message_log;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod view;

pub use chat::{ChatClient, ChatSettings};
pub use demo::DemoTransport;
pub use error::ClientError;
pub use supervisor::{ConnectionState, ReconnectPolicy};
pub use transport::{ChatTransport, EventStream, HttpTransport};
