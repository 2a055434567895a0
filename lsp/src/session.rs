//! Session: owns a transport and correlates requests with responses.
//!
//! Two tasks run per session. The writer drains an mpsc queue of outbound
//! frames; the reader drains the transport and dispatches every frame:
//! responses go to the waiter registered under their id, notifications go to
//! the subscriber (if any), and server-to-client requests are refused with
//! `MethodNotFound`. Callers suspend only on their own waiter, so any number
//! of requests can be outstanding at once.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::documents::DocumentRegistry;
use crate::error::{LspError, Result};
use crate::pending::PendingRequests;
use crate::protocol::{self, InitializeResult, Notification, Outbound, Request, ResponseError};
use crate::transport::{BoxedReader, BoxedWriter, Transport};
use crate::types::{
    ClientConfig, CompletionList, Document, Position, ServerInfo, ServerNotification,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: serde_json::Value,
        outcome: Result<serde_json::Value>,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// What the dispatch loop did with one frame.
#[derive(Debug)]
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) enum Dispatched {
    Resolved(u64),
    Rejected(LspError),
    Notification(String),
    RefusedServerRequest(String),
    Ignored,
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let result = frame.get("result");
    let error = frame.get("error");

    match (id, method) {
        (Some(id), None) if error.is_some() => {
            let outcome = match error.cloned().map(serde_json::from_value::<ResponseError>) {
                Some(Ok(err)) => Err(LspError::Server {
                    code: err.code,
                    message: err.message,
                }),
                _ => Err(LspError::protocol("malformed error object in response")),
            };
            Some(IncomingFrame::Response {
                id: id.clone(),
                outcome,
            })
        }
        (Some(id), None) => Some(IncomingFrame::Response {
            id: id.clone(),
            outcome: result.cloned().ok_or_else(|| {
                LspError::protocol("response has neither result nor error")
            }),
        }),
        (Some(id), Some(method)) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

/// Lexically resolve `.` and `..` so `../main.ae` maps to a stable URI.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Options for [`Session::start`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Absolute workspace root; relative document paths resolve against it.
    pub workspace_root: PathBuf,
    pub request_timeout: Duration,
}

pub struct Session {
    peer: String,
    workspace_root: PathBuf,
    request_timeout: Duration,
    pending: Arc<PendingRequests>,
    writer_tx: mpsc::Sender<WriterCommand>,
    documents: Mutex<DocumentRegistry>,
    /// Held across registry update and send so sync notifications leave in
    /// version order.
    document_sync: tokio::sync::Mutex<()>,
    server_info: OnceLock<ServerInfo>,
    notifications: Mutex<Option<mpsc::Receiver<ServerNotification>>>,
    closing: AtomicBool,
    reader_handle: JoinHandle<()>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connect per `config`, start the session, and complete the
    /// `initialize` handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let workspace_root = match &config.workspace_root {
            Some(root) => std::path::absolute(root)?,
            None => std::env::current_dir()?,
        };

        let transport = Transport::connect_with_policy(
            &config.endpoint,
            config.connect_timeout(),
            &config.connect,
        )
        .await?;

        let session = Self::start(
            transport,
            SessionOptions {
                workspace_root: normalize_path(&workspace_root),
                request_timeout: config.request_timeout(),
            },
        )?;

        if let Err(e) = session.initialize().await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Start the reader and writer tasks over `transport`.
    ///
    /// No handshake is performed; see [`Session::initialize`].
    pub fn start(transport: Transport, options: SessionOptions) -> Result<Self> {
        let peer = transport.peer().to_string();
        let (reader, writer) = transport.into_split().ok_or(LspError::SessionClosed)?;

        let pending = PendingRequests::new();
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);

        let writer_handle = tokio::spawn(Self::write_loop(
            writer,
            writer_rx,
            Arc::clone(&pending),
            peer.clone(),
        ));
        let reader_handle = tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&pending),
            notification_tx,
            writer_tx.clone(),
            peer.clone(),
        ));

        Ok(Self {
            peer,
            workspace_root: options.workspace_root,
            request_timeout: options.request_timeout,
            pending,
            writer_tx,
            documents: Mutex::new(DocumentRegistry::new()),
            document_sync: tokio::sync::Mutex::new(()),
            server_info: OnceLock::new(),
            notifications: Mutex::new(Some(notification_rx)),
            closing: AtomicBool::new(false),
            reader_handle,
            writer_handle: Mutex::new(Some(writer_handle)),
        })
    }

    async fn write_loop(
        mut writer: FrameWriter<BoxedWriter>,
        mut rx: mpsc::Receiver<WriterCommand>,
        pending: Arc<PendingRequests>,
        peer: String,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Send(frame) => {
                    if let Err(e) = writer.write_json(&frame).await {
                        tracing::warn!("LSP write error for '{peer}': {e}");
                        pending.close();
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
        writer.close().await;
    }

    async fn read_loop(
        mut reader: FrameReader<BoxedReader>,
        pending: Arc<PendingRequests>,
        notification_tx: mpsc::Sender<ServerNotification>,
        writer_tx: mpsc::Sender<WriterCommand>,
        peer: String,
    ) {
        loop {
            match reader.read_frame().await {
                Ok(Some(body)) => match serde_json::from_slice::<serde_json::Value>(&body) {
                    Ok(frame) => {
                        Self::dispatch_frame(&frame, &pending, &notification_tx, &writer_tx, &peer)
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!("Discarding undecodable frame from '{peer}': {e}");
                    }
                },
                Ok(None) => {
                    tracing::info!("LSP server '{peer}' closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!("LSP reader error for '{peer}': {e}");
                    break;
                }
            }
        }
        let failed = pending.close();
        if failed > 0 {
            tracing::debug!("Failed {failed} pending request(s) for '{peer}'");
        }
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &PendingRequests,
        notification_tx: &mpsc::Sender<ServerNotification>,
        writer_tx: &mpsc::Sender<WriterCommand>,
        peer: &str,
    ) -> Dispatched {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::warn!("Ignoring malformed JSON-RPC frame from '{peer}'");
            return Dispatched::Ignored;
        };

        match incoming {
            IncomingFrame::Response { id, outcome } => {
                let result = match id.as_u64() {
                    Some(id) => pending.resolve(id, outcome).map(|()| id),
                    None => Err(LspError::protocol(format!(
                        "unsolicited response with id {id}"
                    ))),
                };
                match result {
                    Ok(id) => {
                        tracing::trace!(id, "Resolved request from '{peer}'");
                        Dispatched::Resolved(id)
                    }
                    Err(e) => {
                        tracing::warn!("LSP '{peer}': {e}");
                        Dispatched::Rejected(e)
                    }
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Servers block on some of these (workspace/configuration);
                // always answer.
                tracing::debug!("LSP '{peer}' sent request: {method}; replying method not found");
                let response = protocol::method_not_found(&id, &method);
                let _ = writer_tx.send(WriterCommand::Send(response)).await;
                Dispatched::RefusedServerRequest(method)
            }
            IncomingFrame::Notification { method, params } => {
                tracing::trace!("Notification from '{peer}': {method}");
                if notification_tx
                    .try_send(ServerNotification {
                        method: method.clone(),
                        params,
                    })
                    .is_err()
                {
                    tracing::trace!("Dropping notification {method}: no subscriber draining");
                }
                Dispatched::Notification(method)
            }
        }
    }

    fn documents(&self) -> MutexGuard<'_, DocumentRegistry> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LspError::SessionClosed);
        }
        Ok(())
    }

    /// Whether `close` was called or the connection is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.pending.is_closed()
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Server identity from the `initialize` reply, if it sent one.
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.get()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn open_documents(&self) -> usize {
        self.documents().len()
    }

    /// Take the stream of server-initiated notifications.
    ///
    /// Only the first call gets the receiver; until then (or if nobody ever
    /// takes it) notifications beyond the channel capacity are dropped.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<ServerNotification>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn send(&self, outbound: Outbound) -> Result<()> {
        let frame = outbound.to_value()?;
        tracing::debug!(id = ?outbound.id(), method = outbound.method(), "-> {}", self.peer);
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| LspError::SessionClosed)
    }

    async fn round_trip(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let waiter = self.pending.register()?;
        self.send(Outbound::Request(Request::new(waiter.id(), method, params)))
            .await?;
        waiter.wait(timeout, method).await
    }

    async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.ensure_open()?;
        self.round_trip(method, params, self.request_timeout).await
    }

    async fn notify(&self, method: &'static str, params: Option<serde_json::Value>) -> Result<()> {
        self.ensure_open()?;
        self.send(Outbound::Notification(Notification::new(method, params)))
            .await
    }

    /// Run the `initialize` request and send `initialized`.
    pub async fn initialize(&self) -> Result<()> {
        let root_uri = protocol::path_to_file_uri(&self.workspace_root)?;
        let params = protocol::initialize_params(root_uri.as_str());
        let result = self.request("initialize", Some(params)).await?;

        match serde_json::from_value::<InitializeResult>(result) {
            Ok(InitializeResult {
                server_info: Some(info),
            }) => {
                let info = info.into_server_info();
                tracing::info!(
                    "Initialized LSP server '{}' {}",
                    info.name,
                    info.version.as_deref().unwrap_or("")
                );
                let _ = self.server_info.set(info);
            }
            Ok(_) => tracing::info!("Initialized LSP server at '{}'", self.peer),
            Err(e) => tracing::debug!("Unrecognized initialize result from '{}': {e}", self.peer),
        }

        self.notify("initialized", Some(serde_json::json!({})))
            .await
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.workspace_root.join(path))
        }
    }

    /// Open a document: read it from disk, register it at version 1 and send
    /// `textDocument/didOpen`.
    ///
    /// Re-opening an open document returns its current handle.
    pub async fn open(&self, path: impl AsRef<Path>, language_id: &str) -> Result<Document> {
        self.ensure_open()?;
        let path = self.resolve_path(path.as_ref());
        let uri = protocol::path_to_file_uri(&path)?;

        // Disk I/O happens before the registry lock is taken.
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| LspError::FileNotFound {
                path: path.clone(),
                source,
            })?;

        let _sync = self.document_sync.lock().await;
        let (doc, fresh) = self.documents().open(path, uri.clone(), language_id);
        if !fresh {
            tracing::debug!("{uri} already open at version {}", doc.version());
            return Ok(doc);
        }

        let params = protocol::did_open_params(uri.as_str(), language_id, doc.version(), &text);
        if let Err(e) = self
            .notify("textDocument/didOpen", Some(params))
            .await
        {
            self.documents().close(&uri);
            return Err(e);
        }
        tracing::debug!("Opened {uri} as {language_id}");
        Ok(doc)
    }

    /// Replace the document's content and send `textDocument/didChange`.
    ///
    /// The returned handle carries the new version. The registry only
    /// advances once the notification is queued.
    pub async fn change(&self, doc: &Document, text: &str) -> Result<Document> {
        self.ensure_open()?;
        let not_open = || LspError::DocumentNotOpen {
            uri: doc.uri().to_string(),
        };

        let _sync = self.document_sync.lock().await;
        let current = self.documents().get(doc.uri()).ok_or_else(not_open)?;
        let params = protocol::did_change_params(doc.uri().as_str(), current.version() + 1, text);
        self.notify("textDocument/didChange", Some(params)).await?;
        self.documents()
            .bump_version(doc.uri())
            .ok_or_else(not_open)
    }

    /// Send `textDocument/didClose` and release the document.
    pub async fn close_document(&self, doc: &Document) -> Result<()> {
        self.ensure_open()?;
        let _sync = self.document_sync.lock().await;
        if !self.documents().close(doc.uri()) {
            return Err(LspError::DocumentNotOpen {
                uri: doc.uri().to_string(),
            });
        }
        let params = protocol::did_close_params(doc.uri().as_str());
        self.notify("textDocument/didClose", Some(params)).await
    }

    /// Request completions at `position` in `doc`.
    pub async fn completions(&self, doc: &Document, position: Position) -> Result<CompletionList> {
        self.ensure_open()?;
        if !self.documents().contains(doc.uri()) {
            return Err(LspError::DocumentNotOpen {
                uri: doc.uri().to_string(),
            });
        }

        let params = protocol::completion_params(doc.uri().as_str(), position);
        let result = self
            .request("textDocument/completion", Some(params))
            .await?;
        let list = protocol::decode_completion(result)?;
        tracing::debug!(
            uri = %doc.uri(),
            %position,
            count = list.len(),
            incomplete = list.is_incomplete,
            "Completions received"
        );
        Ok(list)
    }

    /// Shut the session down. Idempotent.
    ///
    /// Pending requests fail with [`LspError::SessionClosed`] immediately;
    /// the `shutdown`/`exit` handshake is best-effort and time-bounded.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let failed = self.pending.fail_all();
        if failed > 0 {
            tracing::debug!("Failed {failed} pending request(s) on close");
        }

        if !self.pending.is_closed() {
            let timeout = self.request_timeout.min(SHUTDOWN_TIMEOUT);
            let writer_up = match self.round_trip("shutdown", None, timeout).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("LSP '{}' shutdown failed: {e}", self.peer);
                    !e.is_fatal()
                }
            };
            if writer_up {
                let exit = Outbound::Notification(Notification::new("exit", None));
                if let Err(e) = self.send(exit).await {
                    tracing::debug!("LSP '{}' exit notification failed: {e}", self.peer);
                }
            }
        }

        self.pending.close();
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        let writer_handle = self
            .writer_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = writer_handle
            && tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err()
        {
            tracing::debug!("LSP '{}' writer didn't finish in time", self.peer);
        }
        self.reader_handle.abort();
        self.documents().clear();
        tracing::info!("Closed LSP session with '{}'", self.peer);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_handle.abort();
        if let Some(handle) = self
            .writer_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.pending.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    struct Peer {
        reader: FrameReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: FrameWriter<tokio::io::WriteHalf<DuplexStream>>,
    }

    impl Peer {
        async fn recv(&mut self) -> serde_json::Value {
            let body = self.reader.read_frame().await.unwrap().unwrap();
            serde_json::from_slice(&body).unwrap()
        }

        async fn send(&mut self, msg: serde_json::Value) {
            self.writer.write_json(&msg).await.unwrap();
        }
    }

    #[cfg(windows)]
    fn test_workspace_root() -> PathBuf {
        PathBuf::from(r"C:\test")
    }

    #[cfg(not(windows))]
    fn test_workspace_root() -> PathBuf {
        PathBuf::from("/test")
    }

    fn session_pair(request_timeout: Duration) -> (Session, Peer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (cr, cw) = tokio::io::split(client);
        let (sr, sw) = tokio::io::split(server);
        let session = Session::start(
            Transport::from_io("duplex", cr, cw),
            SessionOptions {
                workspace_root: test_workspace_root(),
                request_timeout,
            },
        )
        .unwrap();
        let peer = Peer {
            reader: FrameReader::new(sr),
            writer: FrameWriter::new(sw),
        };
        (session, peer)
    }

    type Channels = (
        Arc<PendingRequests>,
        mpsc::Sender<ServerNotification>,
        mpsc::Receiver<ServerNotification>,
        mpsc::Sender<WriterCommand>,
        mpsc::Receiver<WriterCommand>,
    );

    fn test_channels() -> Channels {
        let (notification_tx, notification_rx) = mpsc::channel(32);
        let (writer_tx, writer_rx) = mpsc::channel(32);
        (
            PendingRequests::new(),
            notification_tx,
            notification_rx,
            writer_tx,
            writer_rx,
        )
    }

    #[test]
    fn test_normalize_path_resolves_parent_components() {
        assert_eq!(
            normalize_path(Path::new("/work/test/../main.ae")),
            PathBuf::from("/work/main.ae")
        );
        assert_eq!(
            normalize_path(Path::new("/work/./src/main.ae")),
            PathBuf::from("/work/src/main.ae")
        );
        assert_eq!(
            normalize_path(Path::new("/../main.ae")),
            PathBuf::from("/main.ae")
        );
    }

    #[tokio::test]
    async fn test_dispatch_response_routes_to_pending() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let waiter = pending.register().unwrap();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": waiter.id(),
            "result": { "capabilities": {} }
        });
        let outcome = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(outcome, Dispatched::Resolved(1)));

        let response = waiter.wait(Duration::from_secs(1), "test").await.unwrap();
        assert!(response["capabilities"].is_object());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_error_response_becomes_server_error() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let waiter = pending.register().unwrap();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": waiter.id(),
            "error": { "code": -32600, "message": "invalid request" }
        });
        Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;

        let err = waiter.wait(Duration::from_secs(1), "test").await.unwrap_err();
        assert!(
            matches!(err, LspError::Server { code: -32600, ref message } if message == "invalid request")
        );
    }

    #[tokio::test]
    async fn test_dispatch_null_result_is_a_response() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let waiter = pending.register().unwrap();

        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": null });
        Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;

        let value = waiter.wait(Duration::from_secs(1), "test").await.unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_id_rejected_without_touching_pending() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let _waiter = pending.register().unwrap();

        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 999, "result": {} });
        let outcome = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(outcome, Dispatched::Rejected(LspError::Protocol(_))));
        assert_eq!(pending.len(), 1);

        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": "1", "result": {} });
        let outcome = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(outcome, Dispatched::Rejected(LspError::Protocol(_))));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_duplicate_response_rejected() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let waiter = pending.register().unwrap();
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": "first" });

        let first = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        let second = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(first, Dispatched::Resolved(1)));
        assert!(matches!(second, Dispatched::Rejected(LspError::Protocol(_))));
        assert_eq!(
            waiter.wait(Duration::from_secs(1), "test").await.unwrap(),
            "first"
        );
    }

    #[tokio::test]
    async fn test_dispatch_server_request_sends_method_not_found() {
        let (pending, ntx, _nrx, wtx, mut wrx) = test_channels();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "workspace/configuration",
            "params": {}
        });
        Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;

        match wrx.try_recv().unwrap() {
            WriterCommand::Send(response) => {
                assert_eq!(response["id"], 5);
                assert_eq!(response["error"]["code"], -32601);
            }
            WriterCommand::Shutdown => panic!("expected Send, got Shutdown"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_notification_forwarded() {
        let (pending, ntx, mut nrx, wtx, mut wrx) = test_channels();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": { "type": 3, "message": "hello" }
        });
        Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;

        let notification = nrx.try_recv().unwrap();
        assert_eq!(notification.method, "window/logMessage");
        assert_eq!(notification.params.unwrap()["message"], "hello");
        assert!(wrx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_notification_without_subscriber_is_discarded() {
        let (pending, ntx, nrx, wtx, _wrx) = test_channels();
        drop(nrx);

        let frame = serde_json::json!({ "jsonrpc": "2.0", "method": "$/progress" });
        let outcome = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(outcome, Dispatched::Notification(m) if m == "$/progress"));
    }

    #[tokio::test]
    async fn test_dispatch_shapeless_frame_ignored() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let frame = serde_json::json!({ "jsonrpc": "2.0" });
        let outcome = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(outcome, Dispatched::Ignored));
    }

    #[tokio::test]
    async fn test_dispatch_response_without_result_fails_waiter() {
        let (pending, ntx, _nrx, wtx, _wrx) = test_channels();
        let waiter = pending.register().unwrap();

        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": waiter.id() });
        let outcome = Session::dispatch_frame(&frame, &pending, &ntx, &wtx, "test").await;
        assert!(matches!(outcome, Dispatched::Resolved(1)));

        let err = waiter
            .wait(Duration::from_secs(5), "test")
            .await
            .unwrap_err();
        assert!(matches!(err, LspError::Protocol(ref msg) if msg.contains("neither")));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_initialize_handshake_records_server_info() {
        let (session, mut peer) = session_pair(Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let init = peer.recv().await;
            assert_eq!(init["method"], "initialize");
            assert!(init["params"]["rootUri"].as_str().unwrap().starts_with("file:///"));
            peer.send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {
                    "serverInfo": { "name": "aecor lsp server", "version": "0.1" },
                    "capabilities": {}
                }
            }))
            .await;
            let initialized = peer.recv().await;
            assert_eq!(initialized["method"], "initialized");
            assert!(initialized.get("id").is_none());
            peer
        });

        session.initialize().await.unwrap();
        let _peer = server.await.unwrap();
        let info = session.server_info().unwrap();
        assert_eq!(info.name, "aecor lsp server");
    }

    #[tokio::test]
    async fn test_initialize_server_error_is_returned() {
        let (session, mut peer) = session_pair(Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let init = peer.recv().await;
            peer.send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "error": { "code": -32002, "message": "not ready" }
            }))
            .await;
            peer
        });

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, LspError::Server { code: -32002, .. }));
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_after_close_fail() {
        let (session, peer) = session_pair(Duration::from_millis(50));
        drop(peer);
        session.close().await;
        session.close().await;

        assert!(session.is_closed());
        assert!(matches!(
            session.initialize().await,
            Err(LspError::SessionClosed)
        ));
        assert!(matches!(
            session.open("main.ae", "aecor").await,
            Err(LspError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_changes_reach_server_in_version_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.ae");
        std::fs::write(&file, "let x = 1\n").unwrap();

        let (session, mut peer) = session_pair(Duration::from_secs(5));
        let session = Arc::new(session);
        let doc = session.open(&file, "aecor").await.unwrap();
        assert_eq!(peer.recv().await["method"], "textDocument/didOpen");

        let changes: Vec<_> = (0..8)
            .map(|i| {
                let session = Arc::clone(&session);
                let doc = doc.clone();
                tokio::spawn(async move { session.change(&doc, &format!("let x = {i}\n")).await })
            })
            .collect();
        for change in changes {
            change.await.unwrap().unwrap();
        }

        for expected in 2..=9 {
            let msg = peer.recv().await;
            assert_eq!(msg["method"], "textDocument/didChange");
            assert_eq!(msg["params"]["textDocument"]["version"], expected);
        }
        let latest = session.documents().get(doc.uri()).unwrap();
        assert_eq!(latest.version(), 9);
    }

    #[tokio::test]
    async fn test_close_sends_exit_after_failed_shutdown() {
        let (session, mut peer) = session_pair(Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let shutdown = peer.recv().await;
            assert_eq!(shutdown["method"], "shutdown");
            peer.send(serde_json::json!({
                "jsonrpc": "2.0",
                "id": shutdown["id"],
                "error": { "code": -32603, "message": "internal error" }
            }))
            .await;
            peer.recv().await
        });

        session.close().await;
        let exit = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit["method"], "exit");
        assert!(exit.get("id").is_none());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_server_eof_fails_pending_and_closes_session() {
        let (session, mut peer) = session_pair(Duration::from_secs(30));
        let session = Arc::new(session);

        let requester = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.initialize().await })
        };
        let _ = peer.recv().await;
        drop(peer);

        let err = tokio::time::timeout(Duration::from_secs(5), requester)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, LspError::SessionClosed));
        assert!(session.is_closed());
    }
}
