//! Scripted language server for integration tests.
//!
//! Each test hands `start_server` a script that drives one accepted
//! connection; the helpers below cover the handshake and the shutdown tail.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use probe_lsp::codec::{FrameReader, FrameWriter};
use probe_lsp::{ClientConfig, Endpoint};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

pub struct ServerConn {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl ServerConn {
    /// Next message from the client; `None` once it hangs up.
    pub async fn recv(&mut self) -> Option<Value> {
        let body = self.reader.read_frame().await.ok()??;
        Some(serde_json::from_slice(&body).expect("client sent invalid JSON"))
    }

    /// Next message with `method`, skipping anything else.
    pub async fn expect(&mut self, method: &str) -> Value {
        loop {
            let msg = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("client hung up while waiting for {method}"));
            if msg["method"] == method {
                return msg;
            }
        }
    }

    pub async fn send(&mut self, msg: Value) {
        self.writer.write_json(&msg).await.expect("write to client");
    }

    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
            .await;
    }

    pub async fn reply_error(&mut self, request: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    /// Answer `initialize` and consume `initialized`.
    pub async fn handshake(&mut self) -> Value {
        let init = self.expect("initialize").await;
        self.reply(
            &init,
            json!({
                "serverInfo": { "name": "aecor lsp server", "version": "0.1" },
                "capabilities": { "completionProvider": {} }
            }),
        )
        .await;
        self.expect("initialized").await;
        init
    }

    /// Answer `shutdown`, then wait for `exit` or hang-up.
    pub async fn serve_shutdown(&mut self) {
        while let Some(msg) = self.recv().await {
            if msg["method"] == "shutdown" {
                self.reply(&msg, Value::Null).await;
            } else if msg["method"] == "exit" {
                return;
            }
        }
    }
}

pub async fn start_server<F, Fut>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        script(ServerConn {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        })
        .await;
    });
    (addr, handle)
}

pub fn config(addr: SocketAddr, workspace_root: &Path, request_timeout: Duration) -> ClientConfig {
    let mut config = ClientConfig::new(Endpoint::Tcp(addr.to_string()), workspace_root);
    config.request_timeout_ms = u64::try_from(request_timeout.as_millis()).unwrap();
    config
}

/// Lay out `<tmp>/main.ae` and `<tmp>/test/` so the workspace root is
/// `test/` and the document is reached as `../main.ae`.
pub fn workspace(source: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.ae"), source).unwrap();
    let root = dir.path().join("test");
    std::fs::create_dir(&root).unwrap();
    (dir, root)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("probe_lsp=debug")
        .try_init();
}
