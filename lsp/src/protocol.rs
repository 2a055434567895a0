//! Internal LSP message serde types for JSON-RPC communication.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LspError;
use crate::types::{CompletionItem, CompletionItemKind, CompletionList, Position, ServerInfo};

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC "Method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Everything the client writes: fire-and-forget or correlated by id.
#[derive(Debug)]
pub(crate) enum Outbound {
    Notification(Notification),
    Request(Request),
}

impl Outbound {
    /// The id a response must carry, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Notification(_) => None,
            Self::Request(req) => Some(req.id),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Notification(n) => n.method,
            Self::Request(r) => r.method,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, LspError> {
        match self {
            Self::Notification(n) => serde_json::to_value(n),
            Self::Request(r) => serde_json::to_value(r),
        }
        .map_err(|e| LspError::protocol(format!("serializing {}: {e}", self.method())))
    }
}

/// Reply to a server-to-client request we don't implement.
pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "completion": {
                    "dynamicRegistration": false,
                    "completionItem": {
                        "snippetSupport": false,
                        "documentationFormat": ["plaintext", "markdown"]
                    },
                    "contextSupport": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

pub(crate) fn completion_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": {
            "line": position.line,
            "character": position.character
        }
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct InitializeResult {
    #[serde(rename = "serverInfo")]
    pub server_info: Option<LspServerInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspServerInfo {
    pub name: String,
    pub version: Option<String>,
}

impl LspServerInfo {
    pub fn into_server_info(self) -> ServerInfo {
        ServerInfo {
            name: self.name,
            version: self.version,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// `textDocument/completion` result: both legal shapes, or `null`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CompletionResponse {
    Items(Vec<LspCompletionItem>),
    List(LspCompletionList),
}

impl CompletionResponse {
    pub fn normalize(self) -> CompletionList {
        let (is_incomplete, items) = match self {
            Self::Items(items) => (false, items),
            Self::List(list) => (list.is_incomplete, list.items),
        };
        CompletionList {
            is_incomplete,
            items: items
                .into_iter()
                .map(LspCompletionItem::into_completion_item)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspCompletionList {
    #[serde(rename = "isIncomplete", default)]
    pub is_incomplete: bool,
    pub items: Vec<LspCompletionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LspCompletionItem {
    pub label: String,
    pub kind: Option<u64>,
    pub detail: Option<String>,
    pub documentation: Option<LspDocumentation>,
    pub insert_text: Option<String>,
    pub sort_text: Option<String>,
    pub filter_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LspDocumentation {
    Plain(String),
    Markup { value: String },
}

impl LspCompletionItem {
    pub fn into_completion_item(self) -> CompletionItem {
        CompletionItem {
            label: self.label,
            kind: self.kind.and_then(CompletionItemKind::from_lsp),
            detail: self.detail,
            documentation: self.documentation.map(|doc| match doc {
                LspDocumentation::Plain(text) | LspDocumentation::Markup { value: text } => text,
            }),
            insert_text: self.insert_text,
            sort_text: self.sort_text,
            filter_text: self.filter_text,
        }
    }
}

/// Decode a completion `result` value into the normalized list.
pub(crate) fn decode_completion(result: serde_json::Value) -> Result<CompletionList, LspError> {
    serde_json::from_value::<Option<CompletionResponse>>(result)
        .map(|resp| resp.map(CompletionResponse::normalize).unwrap_or_default())
        .map_err(|e| LspError::protocol(format!("decoding completion result: {e}")))
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, LspError> {
    url::Url::from_file_path(path).map_err(|()| LspError::InvalidPath {
        path: path.to_path_buf(),
    })
}
