//! Client facade driven by the probe binary.
//!
//! Construction IS connection: `Client::new` connects, starts the session and
//! completes the `initialize` handshake, so holding a `Client` means the
//! server accepted us.

use std::path::{Path, PathBuf};

use crate::error::{LspError, Result};
use crate::session::Session;
use crate::types::{ClientConfig, CompletionList, Document, Endpoint, Position, ServerInfo};

pub struct Client {
    session: Session,
}

impl Client {
    /// Connect to `endpoint` (`host:port` or a socket path) with default
    /// timeouts, using `workspace_root` as the LSP root.
    pub async fn new(endpoint: &str, workspace_root: impl Into<PathBuf>) -> Result<Self> {
        let endpoint: Endpoint = endpoint.parse().map_err(|e| LspError::Connection {
            endpoint: endpoint.to_string(),
            reason: format!("{e}"),
        })?;
        Self::with_config(ClientConfig::new(endpoint, workspace_root)).await
    }

    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        tracing::info!("Connecting to LSP server at {}...", config.endpoint);
        let session = Session::connect(&config).await?;
        Ok(Self { session })
    }

    /// Open a document; relative paths resolve against the workspace root.
    pub async fn open_doc(&self, path: impl AsRef<Path>, language_id: &str) -> Result<Document> {
        self.session.open(path, language_id).await
    }

    /// Send new full-text content for an open document.
    pub async fn change_doc(&self, doc: &Document, text: &str) -> Result<Document> {
        self.session.change(doc, text).await
    }

    pub async fn close_doc(&self, doc: &Document) -> Result<()> {
        self.session.close_document(doc).await
    }

    pub async fn get_completions(
        &self,
        doc: &Document,
        position: Position,
    ) -> Result<CompletionList> {
        self.session.completions(doc, position).await
    }

    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.session.server_info()
    }

    /// The underlying session, for callers that need concurrency or
    /// notifications.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Shut down the server connection. Errors are logged, never returned.
    pub async fn close(&self) {
        self.session.close().await;
    }
}
