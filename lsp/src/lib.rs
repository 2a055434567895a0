//! LSP client core: framing transport, request correlation, document
//! synchronization and completion requests.

pub mod codec;
pub mod error;
pub mod transport;
pub mod types;

pub(crate) mod documents;
pub(crate) mod pending;
pub(crate) mod protocol;

mod client;
mod session;

pub use client::Client;
pub use error::{LspError, Result};
pub use session::{Session, SessionOptions};
pub use transport::Transport;
pub use types::{
    ClientConfig, CompletionItem, CompletionItemKind, CompletionList, ConnectPolicy, Document,
    Endpoint, EndpointParseError, Position, ServerInfo, ServerNotification,
};
